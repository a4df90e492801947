use chrono::{NaiveDate, Utc};

use crate::error::{Result, TaskError};
use crate::store::Dataset;
use crate::types::CommitAuthor;

use super::{EditableDocument, Edited, edit_document};

/// Changelog path relative to the dataset root.
pub const CHANGES_PATH: &str = "CHANGES";

/// One changelog entry, prepended above the existing text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangesEntry {
    /// Version heading.
    pub tag: String,
    /// Release date.
    pub date: NaiveDate,
    /// Entry lines, without the leading dash.
    pub lines: Vec<String>,
}

impl ChangesEntry {
    /// Entry for `tag` released on `date`.
    pub fn new(tag: impl Into<String>, date: NaiveDate, lines: Vec<String>) -> Self {
        Self {
            tag: tag.into(),
            date,
            lines,
        }
    }

    /// Entry dated today (UTC).
    pub fn today(tag: impl Into<String>, lines: Vec<String>) -> Self {
        Self::new(tag, Utc::now().date_naive(), lines)
    }

    fn render(&self) -> String {
        let mut out = format!("{}\t{}\n\n", self.tag, self.date.format("%Y-%m-%d"));
        for line in &self.lines {
            out.push_str("\t- ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// The plain-text `CHANGES` file.
#[derive(Debug)]
pub struct ChangesFile;

impl EditableDocument for ChangesFile {
    const PATH: &'static str = CHANGES_PATH;

    type Document = String;
    type Edit = ChangesEntry;

    fn decode(head: Option<&[u8]>) -> Result<Self::Document> {
        match head {
            None => Ok(String::new()),
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|err| TaskError::Store(format!("{CHANGES_PATH} is not UTF-8: {err}"))),
        }
    }

    fn normalize(_head: &Self::Document, mut edit: Self::Edit) -> Option<Self::Edit> {
        edit.lines = edit
            .lines
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        (!edit.lines.is_empty()).then_some(edit)
    }

    fn apply(head: Self::Document, edit: &Self::Edit) -> Self::Document {
        let mut text = edit.render();
        text.push_str(&head);
        text
    }

    fn encode(document: &Self::Document) -> Result<Vec<u8>> {
        Ok(document.as_bytes().to_vec())
    }

    fn commit_message(edit: &Self::Edit) -> String {
        format!("Update {CHANGES_PATH} for {}", edit.tag)
    }
}

/// Prepends `entry` to `CHANGES` and commits it.
pub async fn update_changes(
    dataset: &Dataset,
    entry: ChangesEntry,
    author: CommitAuthor,
) -> Result<Edited<String>> {
    edit_document::<ChangesFile>(dataset, entry, author).await
}
