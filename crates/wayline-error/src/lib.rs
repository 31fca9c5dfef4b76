use thiserror::Error;

/// Primary error type for Wayline store operations.
///
/// Structured variants for the store-facing failure modes; conditions the
/// update engine recovers from on its own (a node missing from a resolver,
/// an attic collision) are diagnostics, not errors, and never surface here.
#[derive(Error, Debug)]
pub enum WaylineError {
    // === Store I/O ===
    /// File or block I/O error reported by a backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read from a named store failed.
    #[error("store read failed: {store}: {detail}")]
    StoreRead { store: &'static str, detail: String },

    /// A write to a named store failed.
    #[error("store write failed: {store}: {detail}")]
    StoreWrite { store: &'static str, detail: String },

    // === Record integrity ===
    /// A persisted record could not be interpreted.
    #[error("corrupt record in {store}: {detail}")]
    CorruptRecord { store: &'static str, detail: String },

    /// A delta did not apply cleanly to its reference skeleton.
    #[error("delta for way {way} does not match its reference: {detail}")]
    DeltaMismatch { way: u64, detail: String },

    // === Partial-batch sinks ===
    /// A sink suffix outside the `.0a[0-f]` / `.1a[0-f]` / `.1` / `.2` grammar.
    #[error("unknown sink suffix: '{suffix}'")]
    UnknownSinkSuffix { suffix: String },

    /// A merge pass was asked to combine more inputs than the fan-in limit.
    #[error("merge fan-in exceeded: {count} inputs (max {max})")]
    MergeFanInExceeded { count: usize, max: usize },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl WaylineError {
    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a store-read error.
    pub fn store_read(store: &'static str, detail: impl Into<String>) -> Self {
        Self::StoreRead {
            store,
            detail: detail.into(),
        }
    }

    /// Create a store-write error.
    pub fn store_write(store: &'static str, detail: impl Into<String>) -> Self {
        Self::StoreWrite {
            store,
            detail: detail.into(),
        }
    }

    /// Create a corrupt-record error.
    pub fn corrupt(store: &'static str, detail: impl Into<String>) -> Self {
        Self::CorruptRecord {
            store,
            detail: detail.into(),
        }
    }

    /// Whether retrying the batch may succeed without operator intervention.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::StoreRead { .. } | Self::StoreWrite { .. })
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Io(_) | Self::StoreRead { .. } | Self::StoreWrite { .. } => {
                Some("Check disk space and permissions, then replay the batch")
            }
            Self::CorruptRecord { .. } | Self::DeltaMismatch { .. } => {
                Some("Rebuild the affected store from the changelog")
            }
            Self::UnknownSinkSuffix { .. } => {
                Some("Remove stray sink files left by an interrupted run")
            }
            _ => None,
        }
    }
}

/// Result type alias using `WaylineError`.
pub type Result<T> = std::result::Result<T, WaylineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WaylineError::store_read("ways", "short block");
        assert_eq!(err.to_string(), "store read failed: ways: short block");
    }

    #[test]
    fn error_display_delta_mismatch() {
        let err = WaylineError::DeltaMismatch {
            way: 42,
            detail: "remove position 7 out of bounds".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "delta for way 42 does not match its reference: remove position 7 out of bounds"
        );
    }

    #[test]
    fn is_transient() {
        assert!(WaylineError::store_write("ways_attic", "busy").is_transient());
        assert!(!WaylineError::corrupt("ways", "bad length").is_transient());
        assert!(!WaylineError::internal("bug").is_transient());
    }

    #[test]
    fn suggestions() {
        assert!(WaylineError::corrupt("ways", "x").suggestion().is_some());
        assert!(WaylineError::internal("x").suggestion().is_none());
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: WaylineError = io_err.into();
        assert!(matches!(err, WaylineError::Io(_)));
        assert!(err.is_transient());
    }
}
