use std::io;
use std::path::PathBuf;

use derive_more::From;

use crate::variant::Variant;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    // -- Inputs
    InputMissing {
        path: PathBuf,
    },

    // -- Variant Dir
    VariantDirUnavailable {
        dir: PathBuf,
        reason: io::Error,
    },

    // -- Sources
    SourcesCopyFailed {
        from: PathBuf,
        to: PathBuf,
        reason: io::Error,
    },

    #[from(ignore)]
    PatchFailed {
        patch: PathBuf,
        sources: PathBuf,
        reason: io::Error,
    },

    // -- Build
    BuildFailed {
        variant: Variant,
        step: String,
        reason: io::Error,
    },

    // -- Other
    ConfigSerializationFailed {
        reason: serde_json::Error,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {}
