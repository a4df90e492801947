use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};
use crate::store::{Sibling, has_sibling};

/// Remote name of the code-host sibling.
pub const GITHUB_REMOTE: &str = "github";

/// Visibility class of a publish target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasetRealm {
    /// Access-controlled bucket, no code-host export.
    Private,
    /// Public bucket, optionally mirrored to the code host.
    Public,
}

impl DatasetRealm {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetRealm::Private => "PRIVATE",
            DatasetRealm::Public => "PUBLIC",
        }
    }

    /// Name of the object-store sibling for this realm.
    pub fn s3_remote(&self) -> &'static str {
        match self {
            DatasetRealm::Private => "s3-PRIVATE",
            DatasetRealm::Public => "s3-PUBLIC",
        }
    }

    /// Name of the code-host sibling.
    pub fn github_remote(&self) -> &'static str {
        GITHUB_REMOTE
    }

    /// True for [`DatasetRealm::Public`].
    pub fn is_public(&self) -> bool {
        matches!(self, DatasetRealm::Public)
    }
}

impl fmt::Display for DatasetRealm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetRealm {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRIVATE" => Ok(DatasetRealm::Private),
            "PUBLIC" => Ok(DatasetRealm::Public),
            _ => Err(TaskError::InvalidRealm(s.to_string())),
        }
    }
}

/// Picks the publish realm: an explicit request wins, otherwise a dataset
/// that already has a public object-store sibling stays public.
pub fn resolve_realm(requested: Option<&str>, siblings: &[Sibling]) -> Result<DatasetRealm> {
    if let Some(requested) = requested {
        return requested.parse();
    }
    if has_sibling(siblings, DatasetRealm::Public.s3_remote()) {
        Ok(DatasetRealm::Public)
    } else {
        Ok(DatasetRealm::Private)
    }
}
