//! Error types for the ingestion engine.

use thiserror::Error;

/// Errors that can occur while ingesting blocks.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The governing cancellation token fired.
    #[error("context cancelled")]
    Cancelled,

    #[error("integer overflow: {value} does not fit in {target}")]
    Overflow { value: String, target: &'static str },

    #[error("transaction output not found: {txid}:{vout}")]
    NotFound { txid: String, vout: u32 },

    #[error("source error: {0}")]
    Source(String),

    #[error("store error in '{operation}': {reason}")]
    Store { operation: String, reason: String },

    #[error("flush error: {0}")]
    Flush(String),

    #[error("fetch block height {height}: {source}")]
    FetchBlock {
        height: u64,
        source: Box<IngestError>,
    },

    #[error("write block height {height}: {source}")]
    WriteBlock {
        height: u64,
        source: Box<IngestError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Build a [`IngestError::Store`] for the named repository operation.
    pub fn store(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a per-height fetch failure. Cancellation is passed through untouched.
    pub fn fetch_block(height: u64, err: IngestError) -> Self {
        if err.is_cancelled() {
            return err;
        }
        Self::FetchBlock {
            height,
            source: Box::new(err),
        }
    }

    /// Wrap a per-height write failure. Cancellation is passed through untouched.
    pub fn write_block(height: u64, err: IngestError) -> Self {
        if err.is_cancelled() {
            return err;
        }
        Self::WriteBlock {
            height,
            source: Box::new(err),
        }
    }

    /// Returns `true` if this error is (or wraps) a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::FetchBlock { source, .. } | Self::WriteBlock { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// Returns `true` if retrying the same work later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(_) | Self::Store { .. } | Self::Flush(_) | Self::NotFound { .. } => true,
            Self::FetchBlock { source, .. } | Self::WriteBlock { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_messages_carry_height() {
        let err = IngestError::fetch_block(5, IngestError::Source("connection refused".into()));
        assert_eq!(
            err.to_string(),
            "fetch block height 5: source error: connection refused"
        );

        let err = IngestError::write_block(7, IngestError::Flush("closed".into()));
        assert!(err.to_string().starts_with("write block height 7: "));
    }

    #[test]
    fn cancellation_is_never_wrapped() {
        let err = IngestError::fetch_block(5, IngestError::Cancelled);
        assert!(matches!(err, IngestError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn retryable_classification() {
        assert!(IngestError::store("insert_blocks", "timeout").is_retryable());
        assert!(!IngestError::Cancelled.is_retryable());
        assert!(!IngestError::Overflow {
            value: "-1".into(),
            target: "u32"
        }
        .is_retryable());
    }
}
