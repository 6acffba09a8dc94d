use crate::backup::archive::CompressionFormat;
use crate::backup::catalog::DEFAULT_CATALOG_FILE;
use crate::backup::function_path;
use crate::backup::pipeline::{run_with_catalog, BackupRequest, PipelineResult};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithFnName, WithMsg};
use crate::backup::validate::validate_catalog_path;

use bon::Builder;
use directories::BaseDirs;
use function_name::named;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use std::fs::File;
use std::path::{Path, PathBuf};

/// Directory under the user's home that backups go to when no root is configured.
pub static DEFAULT_BACKUP_DIR_NAME: &str = ".backups";

fn default_true() -> bool {
    true
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from(DEFAULT_CATALOG_FILE)
}

/// Settings for one backup run, usually read from a YAML file.
///
/// ```yaml
/// source_dir: /home/me/Desktop/DataSafe
/// compression_format: tar.gz
/// backup_root: /mnt/backups
/// ```
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[builder(into)]
    pub source_dir: PathBuf,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub calculate_size: bool,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub compressed: bool,
    #[serde(default)]
    #[builder(default)]
    pub compression_format: CompressionFormat,
    /// Falls back to `~/.backups`.
    #[builder(into)]
    pub backup_root: Option<PathBuf>,
    #[serde(default = "default_catalog_path")]
    #[validate(custom(function = validate_catalog_path))]
    #[builder(default = default_catalog_path(), into)]
    pub catalog_path: PathBuf,
}

impl BackupConfig {
    /// Reads and validates a YAML config file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .and_then(|f| {
                serde_yml::from_reader::<_, BackupConfig>(f)
                    .map_err(Error::from)
                    .with_msg(format!("Parse YAML config failed: {:?}", path))
            })
            .and_then(|bc| {
                bc.validate()
                    .map_err(Error::from)
                    .map(|_| bc)
                    .with_msg(format!("Config validation failed: {:?}", path))
            })
    }

    #[named]
    pub fn resolved_backup_root(&self) -> Result<PathBuf> {
        match &self.backup_root {
            Some(root) => Ok(root.clone()),
            None => BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(DEFAULT_BACKUP_DIR_NAME))
                .ok_or_else(|| Error::Storage {
                    path: PathBuf::from(DEFAULT_BACKUP_DIR_NAME),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "home directory could not be determined",
                    ),
                })
                .with_fn_name(function_path!()),
        }
    }

    pub fn to_request(&self) -> Result<BackupRequest> {
        Ok(BackupRequest::builder()
            .source_path(self.source_dir.clone())
            .calculate_size(self.calculate_size)
            .compressed(self.compressed)
            .format(self.compression_format)
            .backup_root(self.resolved_backup_root()?)
            .build())
    }

    /// Runs one pipeline with a catalog opened for this run only.
    pub fn run(&self) -> Result<PipelineResult> {
        run_with_catalog(&self.to_request()?, &self.catalog_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_defaults() {
        let bc: BackupConfig = serde_yml::from_str("source_dir: /data/Notes\n").unwrap();

        assert_eq!(bc.source_dir, PathBuf::from("/data/Notes"));
        assert!(bc.calculate_size);
        assert!(bc.compressed);
        assert_eq!(bc.compression_format, CompressionFormat::Zip);
        assert_eq!(bc.backup_root, None);
        assert_eq!(bc.catalog_path, PathBuf::from("backups.db"));
        assert_eq!(bc, BackupConfig::builder().source_dir("/data/Notes").build());
    }

    #[test]
    fn test_yaml_full() {
        let yaml = "
source_dir: /data/Notes
calculate_size: false
compressed: true
compression_format: tar.gz
backup_root: /mnt/backups
catalog_path: /tmp/catalog.db
";
        let bc: BackupConfig = serde_yml::from_str(yaml).unwrap();

        assert!(!bc.calculate_size);
        assert_eq!(bc.compression_format, CompressionFormat::TarGz);
        assert_eq!(bc.resolved_backup_root().unwrap(), PathBuf::from("/mnt/backups"));

        let request = bc.to_request().unwrap();
        assert_eq!(request.format(), CompressionFormat::TarGz);
        assert!(!request.calculate_size());
    }

    #[test]
    fn test_yaml_rejects_unknown_fields_and_formats() {
        assert!(serde_yml::from_str::<BackupConfig>("source_dir: /a\nencrypt: true\n").is_err());
        assert!(
            serde_yml::from_str::<BackupConfig>("source_dir: /a\ncompression_format: rar\n")
                .is_err()
        );
    }

    #[test]
    fn test_default_backup_root_is_under_home() {
        let bc = BackupConfig::builder().source_dir("/data/Notes").build();
        if let Some(dirs) = BaseDirs::new() {
            assert_eq!(
                bc.resolved_backup_root().unwrap(),
                dirs.home_dir().join(".backups")
            );
        }
    }

    #[test]
    fn test_from_yaml_file_validates_catalog_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yml");
        std::fs::write(
            &config_path,
            format!(
                "source_dir: /data/Notes\ncatalog_path: {}\n",
                temp_dir.path().display()
            ),
        )
        .unwrap();

        let err = BackupConfig::from_yaml_file(&config_path).unwrap_err();
        assert!(matches!(err.root(), Error::ValidationError(_)));
    }

    #[test]
    fn test_run_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("Data Safe");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), "hello").unwrap();
        let bc = BackupConfig::builder()
            .source_dir(&source)
            .compression_format(CompressionFormat::Tar)
            .backup_root(temp_dir.path().join("backups"))
            .catalog_path(temp_dir.path().join("catalog.db"))
            .build();

        let result = bc.run().unwrap();

        assert_eq!(result.source().safe_name(), "Data_Safe");
        assert!(result.archive().backup_file().is_file());
        assert_eq!(result.backup().compression_format.as_deref(), Some("tar"));
    }
}
