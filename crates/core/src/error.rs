use std::fmt;

use thiserror::Error;

/// Stable classification of a storage client failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The table (or index) addressed by the call does not exist.
    ResourceNotFound,
    /// A conditional write predicate did not hold server-side.
    ConditionalCheckFailed,
    /// Throughput or request-rate limits were exceeded.
    Throttled,
    /// Anything else.
    Other,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            FaultKind::ResourceNotFound => "ResourceNotFound",
            FaultKind::ConditionalCheckFailed => "ConditionalCheckFailed",
            FaultKind::Throttled => "Throttled",
            FaultKind::Other => "Other",
        };
        f.write_str(tag)
    }
}

/// A failure reported by the storage client.
///
/// The original client error is kept as the `source` so callers can
/// downcast to it when they need more than the [`FaultKind`] tag.
#[derive(Debug, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ClientFault {
    pub operation: &'static str,
    pub kind: FaultKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ClientFault {
    /// Creates a fault without an underlying source error.
    pub fn new(operation: &'static str, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the original client error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_resource_not_found(&self) -> bool {
        self.kind == FaultKind::ResourceNotFound
    }

    pub fn is_conditional_check_failed(&self) -> bool {
        self.kind == FaultKind::ConditionalCheckFailed
    }
}

/// Errors returned by table access operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Version conflict writing {key} to table '{table}'")]
    Conflict { table: String, key: String },

    #[error("Table '{table}' not found")]
    TableNotFound { table: String },

    #[error("Item {key} not found in table '{table}'")]
    ItemNotFound { table: String, key: String },

    #[error("Index '{index}' not found on table '{table}'")]
    IndexNotFound { table: String, index: String },

    #[error(transparent)]
    Infrastructure(#[from] ClientFault),

    #[error("Marshalling error: {0}")]
    Marshalling(String),

    #[error("Storage client has been disposed")]
    ClientDisposed,
}

impl Error {
    /// True for missing tables, items and indexes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::TableNotFound { .. } | Error::ItemNotFound { .. } | Error::IndexNotFound { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Result type for table access operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_fault_display() {
        let fault = ClientFault::new("PutItem", FaultKind::ConditionalCheckFailed, "rejected");
        assert_eq!(
            fault.to_string(),
            "PutItem failed (ConditionalCheckFailed): rejected"
        );
        assert!(fault.is_conditional_check_failed());
        assert!(!fault.is_resource_not_found());
    }

    #[test]
    fn test_client_fault_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let fault = ClientFault::new("Query", FaultKind::Other, "dispatch failure").with_source(io);

        let source = std::error::Error::source(&fault).expect("source should be kept");
        assert_eq!(source.to_string(), "socket closed");
    }

    #[test]
    fn test_infrastructure_error_is_transparent() {
        let fault = ClientFault::new("Scan", FaultKind::Throttled, "slow down");
        let error = Error::from(fault);
        assert_eq!(error.to_string(), "Scan failed (Throttled): slow down");
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_not_found_helpers() {
        let table = Error::TableNotFound {
            table: "app.users".to_string(),
        };
        let item = Error::ItemNotFound {
            table: "app.users".to_string(),
            key: "id=a1".to_string(),
        };
        assert!(table.is_not_found());
        assert!(item.is_not_found());
        assert_eq!(item.to_string(), "Item id=a1 not found in table 'app.users'");
    }

    #[test]
    fn test_conflict_display() {
        let error = Error::Conflict {
            table: "users".to_string(),
            key: "id=a1".to_string(),
        };
        assert!(error.is_conflict());
        assert_eq!(error.to_string(), "Version conflict writing id=a1 to table 'users'");
    }
}
