use clap::Parser;
use datasafe::backup::archive::CompressionFormat;
use datasafe::backup::backup_config::BackupConfig;
use datasafe::backup::result_error::error::Error;
use datasafe::backup::result_error::result::Result;
use datasafe::backup::result_error::WithMsg;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Back up one directory and record it in the catalog
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory to back up, overrides the config file
    #[arg(short, long, required_unless_present = "config")]
    source: Option<PathBuf>,
    /// Directory backups are written to
    #[arg(long)]
    backup_root: Option<PathBuf>,
    /// Catalog database file
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// One of: tar, tar.gz, zip
    #[arg(short, long)]
    format: Option<String>,
    /// Copy the directory instead of archiving it
    #[arg(long)]
    no_compress: bool,
    /// Skip calculating the source directory size
    #[arg(long)]
    no_size: bool,
}

fn load_config(args: &Args) -> Result<BackupConfig> {
    let mut bc = match (&args.config, &args.source) {
        (Some(path), _) => BackupConfig::from_yaml_file(path)?,
        (None, Some(source)) => BackupConfig::builder().source_dir(source.clone()).build(),
        (None, None) => {
            return Err(Error::InvalidSource {
                path: PathBuf::new(),
                reason: "no source directory given",
            })
        }
    };

    if let Some(source) = &args.source {
        bc.source_dir = source.clone();
    }
    if let Some(backup_root) = &args.backup_root {
        bc.backup_root = Some(backup_root.clone());
    }
    if let Some(catalog) = &args.catalog {
        bc.catalog_path = catalog.clone();
    }
    if let Some(format) = &args.format {
        bc.compression_format = format.parse::<CompressionFormat>()?;
    }
    if args.no_compress {
        bc.compressed = false;
    }
    if args.no_size {
        bc.calculate_size = false;
    }

    bc.validate()
        .map_err(Error::from)
        .map(|_| bc)
        .with_msg("Config validation failed")
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    match load_config(&args).and_then(|bc| bc.run()) {
        Ok(result) => {
            info!("Backup completed:\n{result}");
            if !result.archive().is_success() {
                warn!("Backup was recorded but its archive could not be written");
                exit(2);
            }
        }
        Err(e) => {
            error!("Fatal error: {e}");
            exit(1);
        }
    }
}
