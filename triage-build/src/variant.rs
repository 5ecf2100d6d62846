use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The two builds of a harness that are compared against each other.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Built from the unmodified sources.
    #[display("original")]
    Original,
    /// Built with the instrumentation patch applied.
    #[display("patched")]
    Patched,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Original, Variant::Patched];

    pub fn name(&self) -> &'static str {
        match self {
            Variant::Original => "original",
            Variant::Patched => "patched",
        }
    }

    pub fn is_patched(&self) -> bool {
        matches!(self, Variant::Patched)
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "original" => Ok(Variant::Original),
            "patched" => Ok(Variant::Patched),
            other => Err(format!("unknown variant '{other}'")),
        }
    }
}
