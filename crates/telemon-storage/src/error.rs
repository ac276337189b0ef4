/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use telemon_storage::error::StorageError;
///
/// let err = StorageError::NotFound { id: "PollCount".to_string() };
/// assert!(err.to_string().contains("PollCount"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested metric is not in the store.
    #[error("Storage: metric not found (id={id})")]
    NotFound { id: String },

    /// The backend cannot be reached (failed ping, dropped connection).
    #[error("Storage: backend unavailable: {0}")]
    Unavailable(String),

    /// A database row could not be mapped back onto a metric.
    #[error("Storage: invalid record (id={id}): {reason}")]
    InvalidRecord { id: String, reason: String },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Snapshot serialization or deserialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot file I/O failure.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(id: impl Into<String>) -> Self {
        StorageError::NotFound { id: id.into() }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
