//! The Worker Engine: Batch Claimer, Request Processor, Waiting Sweeper, and
//! the tick loop tying them together with cooperative shutdown.

pub mod backoff;
pub mod claimer;
pub mod error;
pub mod processor;
pub mod sweeper;
pub mod worker;

pub use error::EngineError;
pub use processor::ProcessorConfig;
pub use sweeper::SweeperGate;
pub use worker::Worker;
