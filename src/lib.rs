pub mod config;
pub mod context;
pub mod error;
pub mod logger;
pub mod prober;
pub mod sink;

#[cfg(test)]
mod test_util;

pub use context::{CancelHandle, ProbeContext};
pub use error::ProbeError;
pub use logger::ProbeLogger;
pub use prober::{Prober, run_module};
pub use sink::{ResultSink, Sample};
