//! Reusable multi-engine test fixtures.

mod lossy;
mod two_engine;

pub use lossy::LossyTransport;
pub use two_engine::{Endpoint, TwoEngineFixture, fast_config};
