//! Shared fixtures and helpers for the Burrow integration tests.

pub mod fixtures;
pub mod test_helpers;
