pub mod card;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod gate;
pub mod locations;
pub mod notify;
pub mod partition;
pub mod progress;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use coordinator::{start, EngineState, ScanConfig, ScanDeps, ScanHandle, ScanStopper};
pub use error::ScanError;
