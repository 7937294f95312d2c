// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Provider failures.

/// A failure reported by a cache provider.
///
/// The error is opaque: regions never branch on why a provider failed, they
/// only degrade to pass-through. The underlying cause stays reachable through
/// [`std::error::Error::source()`] for logging.
///
/// # Example
///
/// ```
/// use larder_provider::Error;
///
/// let error = Error::from_message("connection refused");
/// assert!(error.to_string().contains("connection refused"));
/// ```
#[ohno::error]
pub struct Error {}

impl Error {
    /// Creates a provider error from any message or error value.
    pub fn from_message(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(cause)
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_contains_cause_message() {
        let error = Error::from_message("node unreachable");
        let display = format!("{error}");
        assert!(
            display.contains("node unreachable"),
            "display output should contain the cause, got: {display}"
        );
    }

    #[test]
    fn result_alias_propagates_errors() {
        fn fails() -> Result<u8> {
            Err(Error::from_message("disk full"))
        }

        let err = fails().expect_err("should fail");
        assert!(format!("{err:?}").contains("disk full"));
    }
}
