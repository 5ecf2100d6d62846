mod error;

pub use error::{Error, Result};

pub mod builder;
pub mod utils;
pub mod variant;

pub use builder::{BuildConfig, VariantBuild, VariantDir};
pub use variant::Variant;
