//! Release targets that form the outer dimension of the matrix.

use serde::{Deserialize, Serialize};

/// One release being validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ReleaseTarget {
    /// Release identifier passed to the build tool (e.g. "f32", "pip").
    pub name: String,

    /// Enables the optional static-analysis stages for this release.
    #[serde(default)]
    pub primary: bool,
}

impl ReleaseTarget {
    /// A release that only runs required and unit stages.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: false,
        }
    }

    /// A release with the optional lint/style/type stages enabled.
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: true,
        }
    }
}

impl std::fmt::Display for ReleaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
