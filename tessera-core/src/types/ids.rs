use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Validated dataset identifier (for example `ds000001`).
///
/// Identifiers double as directory names inside the dataset root, so path
/// separators, leading dots and control characters are rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    /// Trims `raw` and checks it can name a directory.
    pub fn new(raw: impl Into<String>) -> Result<Self, TaskError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TaskError::InvalidDataset(
                "dataset id must not be empty".into(),
            ));
        }
        if trimmed.starts_with('.')
            || trimmed
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(TaskError::InvalidDataset(format!(
                "dataset id {trimmed:?} is not a valid directory name"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The validated id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DatasetId {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DatasetId {
    type Error = TaskError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DatasetId> for String {
    fn from(value: DatasetId) -> Self {
        value.0
    }
}

/// Unique identifier for queued tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskId {
    /// Fresh time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex object id of a commit in the versioned store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    /// Hex object id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author identity attached to commits. Missing parts fall back to the
/// store's service identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
}

impl CommitAuthor {
    /// Name used when the author has none.
    pub const SERVICE_NAME: &'static str = "Git Worker";
    /// Email used when the author has none.
    pub const SERVICE_EMAIL: &'static str = "git@openneuro.org";

    /// Author with both parts set.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: Some(email.into()),
        }
    }

    /// Name, or [`Self::SERVICE_NAME`].
    pub fn name_or_default(&self) -> &str {
        self.name.as_deref().unwrap_or(Self::SERVICE_NAME)
    }

    /// Email, or [`Self::SERVICE_EMAIL`].
    pub fn email_or_default(&self) -> &str {
        self.email.as_deref().unwrap_or(Self::SERVICE_EMAIL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_id_rejects_empty_and_path_like_values() {
        assert!(DatasetId::new("").is_err());
        assert!(DatasetId::new("   ").is_err());
        assert!(DatasetId::new("../etc").is_err());
        assert!(DatasetId::new("a/b").is_err());
        assert!(DatasetId::new(".hidden").is_err());
        assert_eq!(DatasetId::new(" ds000001 ").unwrap().as_str(), "ds000001");
    }

    #[test]
    fn dataset_id_deserialization_validates() {
        let ok: DatasetId = serde_json::from_str("\"ds000042\"").unwrap();
        assert_eq!(ok.to_string(), "ds000042");
        assert!(serde_json::from_str::<DatasetId>("\"\"").is_err());
    }

    #[test]
    fn author_defaults_to_service_identity() {
        let author = CommitAuthor::default();
        assert_eq!(author.name_or_default(), CommitAuthor::SERVICE_NAME);
        assert_eq!(author.email_or_default(), CommitAuthor::SERVICE_EMAIL);
    }
}
