//! Validation functions for configuration values.

use validator::ValidationError;

use std::path::Path;

/// The catalog must be a file path whose parent directory already exists.
pub fn validate_catalog_path<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    let path = path.as_ref();
    if path.is_dir() {
        return Err(ValidationError::new("InvalidCatalogPath")
            .with_message(format!("{:?} is a directory", path).into()));
    }

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            Err(ValidationError::new("InvalidCatalogPath").with_message(
                format!("parent directory of {:?} does not exist", path).into(),
            ))
        }
        _ => Ok(()),
    }
}
