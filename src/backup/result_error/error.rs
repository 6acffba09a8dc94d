use crate::backup::pipeline::PipelineStage;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithFnName, WithMsg};
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Source path is missing or is not a directory.
    #[error("Invalid source directory {path:?}: {reason}")]
    InvalidSource { path: PathBuf, reason: &'static str },
    /// Requested compression format is not one the archive builder can produce.
    #[error("Unsupported compression format: {0:?}, supported: [\"tar\", \"tar.gz\", \"zip\"]")]
    UnsupportedFormat(String),
    /// Backup root cannot be created or accessed.
    #[error("Cannot create or access backup root {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Schema creation or the directory/backup insert unit failed and was rolled back.
    #[error("Catalog write failed: {0}")]
    CatalogWrite(#[from] rusqlite::Error),
    #[error("Catalog read failed: {0}")]
    CatalogRead(#[source] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error("{} stage failed:\n{}", stage, indent::indent_all_with("  ", error.to_string()))]
    Failed {
        stage: PipelineStage,
        error: Box<Error>,
    },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> WithFnName<S> for Error {
    fn with_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    /// Returns the innermost error, skipping every context layer.
    pub fn root(&self) -> &Error {
        match self {
            Error::Failed { error, .. }
            | Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.root(),
            e => e,
        }
    }

    /// Stage of the pipeline run this error aborted, if it came out of one.
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            Error::Failed { stage, .. } => Some(*stage),
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.failed_stage(),
            _ => None,
        }
    }
}
