//! # datasafe
//!
//! Archives one directory into a backup and records the run in a SQLite catalog.
//!
//! ## Features
//!
//! - **Formats**: tar, gzip-compressed tar, deflate zip, or a plain copy of the tree
//! - **Deterministic Naming**: `<safe_name>-<YYYY-MM-DD-HHMMSS>[.<ext>]` under one backup root
//! - **Catalog**: directory and backup rows written atomically per run
//! - **Degraded Runs**: a failed archive write is recorded, not raised; check
//!   `BackupArchive::is_success`
//!
//! ## Quick Start
//!
//! ```no_run
//! use datasafe::backup::backup_config::BackupConfig;
//!
//! // Load configuration from YAML file
//! let config = BackupConfig::from_yaml_file("config.yml")?;
//!
//! // Inspect, archive and record one backup
//! let result = config.run()?;
//! println!("{result}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
