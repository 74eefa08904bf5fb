//! Multi-node test fixtures

mod overlay;

pub use overlay::{OverlayFixture, TestNode, test_config};
