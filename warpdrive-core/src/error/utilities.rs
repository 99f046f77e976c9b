use crate::{Error, error::StorageError};

/// Extension trait for Result types to simplify database error mapping
///
/// This trait provides convenient methods to convert database errors into warpdrive errors,
/// reducing boilerplate code in storage backends.
///
/// # Example
///
/// ```rust,ignore
/// use warpdrive_core::error::utilities::DatabaseResultExt;
///
/// query.execute(&pool).await.map_db_err()?;
/// ```
pub trait DatabaseResultExt<T> {
    /// Convert a database error to a warpdrive storage error
    fn map_db_err(self) -> Result<T, Error>;

    /// Convert a database error to a warpdrive storage error with additional context
    fn map_db_err_with_context(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> DatabaseResultExt<T> for Result<T, E> {
    fn map_db_err(self) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(e.to_string())))
    }

    fn map_db_err_with_context(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(format!("{context}: {e}"))))
    }
}

/// Extension trait for mapping (de)serialization failures of stored option values.
pub trait SerializationResultExt<T> {
    /// Convert a serde error into a storage serialization error naming the option
    fn map_option_err(self, option: &str) -> Result<T, Error>;
}

impl<T> SerializationResultExt<T> for Result<T, serde_json::Error> {
    fn map_option_err(self, option: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Serialization(format!("{option}: {e}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_result_ext() {
        let error_result: Result<i32, &str> = Err("database connection failed");
        match error_result.map_db_err().unwrap_err() {
            Error::Storage(StorageError::Database(msg)) => {
                assert_eq!(msg, "database connection failed");
            }
            _ => panic!("Expected storage database error"),
        }
    }

    #[test]
    fn test_database_result_ext_with_context() {
        let error_result: Result<i32, &str> = Err("timeout");
        match error_result
            .map_db_err_with_context("Failed to save option")
            .unwrap_err()
        {
            Error::Storage(StorageError::Database(msg)) => {
                assert_eq!(msg, "Failed to save option: timeout");
            }
            _ => panic!("Expected storage database error"),
        }
    }

    #[test]
    fn test_serialization_result_ext() {
        let parsed: Result<u32, serde_json::Error> = serde_json::from_str("\"nope\"");
        match parsed.map_option_err("WarpdriveLLA-attempts").unwrap_err() {
            Error::Storage(StorageError::Serialization(msg)) => {
                assert!(msg.starts_with("WarpdriveLLA-attempts: "));
            }
            _ => panic!("Expected storage serialization error"),
        }
    }
}
