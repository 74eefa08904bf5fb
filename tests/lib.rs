//! Shared fixtures for the Parley end-to-end tests.

pub mod fixtures;
