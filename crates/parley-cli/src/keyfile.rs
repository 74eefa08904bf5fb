//! Private key files.
//!
//! A key file holds the 32-byte X25519 private key as 64 hex characters and
//! is created owner-readable only.

use anyhow::Context;
use parley_core::Identity;
use std::fs;
use std::io::Write;
use std::path::Path;
use zeroize::Zeroizing;

/// Write `identity`'s private key to `path`.
///
/// # Errors
///
/// Returns an error if the file exists or cannot be written.
pub fn save_identity(identity: &Identity, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let encoded = Zeroizing::new(hex::encode(*identity.secret_bytes()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("Cannot create key file {}", path.display()))?;
    file.write_all(encoded.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Read an identity from a key file.
///
/// # Errors
///
/// Returns an error if the file is missing or does not hold a hex key.
pub fn load_identity(path: &Path) -> anyhow::Result<Identity> {
    let contents = Zeroizing::new(
        fs::read_to_string(path)
            .with_context(|| format!("Cannot read key file {}", path.display()))?,
    );
    let decoded = Zeroizing::new(
        hex::decode(contents.trim()).context("Key file is not valid hex")?,
    );
    let bytes: [u8; 32] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Key file must hold 32 bytes, found {}", decoded.len()))?;
    Ok(Identity::from_secret_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/private_key");
        let identity = Identity::generate().unwrap();

        save_identity(&identity, &path).unwrap();
        let loaded = load_identity(&path).unwrap();
        assert_eq!(loaded.peer_id(), identity.peer_id());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private_key");
        save_identity(&Identity::generate().unwrap(), &path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private_key");
        save_identity(&Identity::generate().unwrap(), &path).unwrap();
        assert!(save_identity(&Identity::generate().unwrap(), &path).is_err());
    }

    #[test]
    fn test_load_rejects_bad_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private_key");

        fs::write(&path, "not hex").unwrap();
        assert!(load_identity(&path).is_err());

        fs::write(&path, "abcd").unwrap();
        assert!(load_identity(&path).is_err());

        assert!(load_identity(&dir.path().join("missing")).is_err());
    }
}
