use anyhow::{anyhow, Result};
use laz::LasZipError;

/// Converts laz-rs results, whose error type does not implement `std::error::Error`
pub(crate) trait LazResultExt<T> {
    /// Turns the laz-rs error into an `anyhow::Error` naming the failed `operation`
    fn laz_context(self, operation: &str) -> Result<T>;
}

impl<T> LazResultExt<T> for std::result::Result<T, LasZipError> {
    fn laz_context(self, operation: &str) -> Result<T> {
        self.map_err(|err| anyhow!("{} failed: LasZip error: {}", operation, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_laz_context_names_operation() {
        let result: std::result::Result<(), LasZipError> = Err(LasZipError::IoError(
            std::io::Error::new(std::io::ErrorKind::Other, "broken"),
        ));
        let err = result.laz_context("Building the LASzip VLR").unwrap_err();
        assert!(err.to_string().starts_with("Building the LASzip VLR failed"));
    }
}
