use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned by every store operation.
///
/// "Not found" and "nonce rejected" are not errors; they are `Ok(None)` and
/// `Ok(false)` respectively. Everything here aborts the caller's flow.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub error: String,
    pub error_description: Option<String>,
}

impl StoreError {
    pub const STORAGE: &'static str = "storage_error";
    pub const CORRUPT_DATA: &'static str = "corrupt_data";
    pub const CONFIGURATION: &'static str = "configuration_error";

    pub fn new(error: &str, description: Option<&str>) -> Self {
        Self {
            error: error.to_string(),
            error_description: description.map(|s| s.to_string()),
        }
    }

    pub fn storage(description: &str) -> Self {
        Self::new(Self::STORAGE, Some(description))
    }

    pub fn corrupt_data(description: &str) -> Self {
        Self::new(Self::CORRUPT_DATA, Some(description))
    }

    pub fn configuration(description: &str) -> Self {
        Self::new(Self::CONFIGURATION, Some(description))
    }

    pub fn is_storage(&self) -> bool {
        self.error == Self::STORAGE
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // Backend failures are carried through unmodified.
        Self::storage(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_description() {
        let err = StoreError::corrupt_data("secret is not valid base64");
        assert_eq!(err.to_string(), "corrupt_data: secret is not valid base64");
        assert!(!err.is_storage());
    }

    #[test]
    fn display_without_description() {
        let err = StoreError::new(StoreError::STORAGE, None);
        assert_eq!(err.to_string(), "storage_error");
        assert!(err.is_storage());
    }
}
