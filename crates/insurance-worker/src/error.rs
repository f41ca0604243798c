//! The engine's error taxonomy. Every variant here is caught at the cycle
//! boundary by the worker loop; none of them kill the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient storage error: {0}")]
    TransientStorage(#[from] anyhow::Error),

    #[error("claim selected {selected} rows but the update touched none of them")]
    ClaimFailed { selected: usize },

    #[error("processor bug while handling request {request_id}: {source}")]
    ProcessorBug {
        request_id: i64,
        #[source]
        source: anyhow::Error,
    },
}
