//! Services - request handling logic
//!
//! - `ingest` - Event notification → broker
//! - `gate` - Lane id → barrier open command

pub mod gate;
pub mod ingest;

// Re-export commonly used types
pub use gate::{GateDispatcher, GateOutcome};
pub use ingest::{IngestOutcome, IngestPipeline};
