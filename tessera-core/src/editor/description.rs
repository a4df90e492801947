use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use crate::error::{Result, TaskError};
use crate::store::Dataset;
use crate::types::CommitAuthor;

use super::{EditableDocument, Edited, edit_document};

/// Description path relative to the dataset root.
pub const DESCRIPTION_PATH: &str = "dataset_description.json";

/// License every published dataset carries.
pub const REQUIRED_LICENSE: &str = "CC0";

/// `dataset_description.json`: a JSON object whose `License` is pinned.
#[derive(Debug)]
pub struct DescriptionFile;

impl EditableDocument for DescriptionFile {
    const PATH: &'static str = DESCRIPTION_PATH;

    type Document = Map<String, Value>;
    type Edit = Map<String, Value>;

    fn decode(head: Option<&[u8]>) -> Result<Self::Document> {
        let Some(bytes) = head else {
            return Ok(Map::new());
        };
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(fields) => Ok(fields),
            other => Err(TaskError::Store(format!(
                "{DESCRIPTION_PATH} must hold a JSON object, found {}",
                json_type(&other)
            ))),
        }
    }

    fn normalize(head: &Self::Document, mut edit: Self::Edit) -> Option<Self::Edit> {
        edit.insert("License".into(), Value::from(REQUIRED_LICENSE));
        edit.retain(|key, value| head.get(key) != Some(value));
        (!edit.is_empty()).then_some(edit)
    }

    fn apply(mut head: Self::Document, edit: &Self::Edit) -> Self::Document {
        for (key, value) in edit {
            head.insert(key.clone(), value.clone());
        }
        head
    }

    fn encode(document: &Self::Document) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
        document.serialize(&mut serializer)?;
        Ok(out)
    }

    fn commit_message(edit: &Self::Edit) -> String {
        let keys: Vec<&str> = edit.keys().map(String::as_str).collect();
        format!("Update {DESCRIPTION_PATH} ({})", keys.join(", "))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Merges `fields` into the committed description, forcing the required
/// license, and commits the result as `author`.
pub async fn update_description(
    dataset: &Dataset,
    fields: Map<String, Value>,
    author: CommitAuthor,
) -> Result<Edited<Map<String, Value>>> {
    edit_document::<DescriptionFile>(dataset, fields, author).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::{DatasetStore, InMemoryStore};
    use crate::types::DatasetId;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn seeded(description: &str) -> (InMemoryStore, Dataset) {
        let store = InMemoryStore::new();
        let id = DatasetId::new("ds000001").unwrap();
        store
            .seed(&id, [(DESCRIPTION_PATH, description)])
            .await
            .unwrap();
        let dataset = store.get_dataset(&id);
        (store, dataset)
    }

    #[tokio::test]
    async fn license_is_forced_even_without_overrides() {
        let (store, dataset) = seeded(r#"{"Name":"Balloon","License":"PDDL"}"#).await;

        let edited = update_description(&dataset, Map::new(), CommitAuthor::default())
            .await
            .unwrap();
        assert_eq!(edited.document["License"], "CC0");
        assert_eq!(edited.document["Name"], "Balloon");
        assert!(edited.commit.is_some());

        let written = store
            .file_at(&dataset.id, "HEAD", DESCRIPTION_PATH)
            .await
            .unwrap();
        let text = String::from_utf8(written).unwrap();
        assert_eq!(
            text,
            "{\n    \"Name\": \"Balloon\",\n    \"License\": \"CC0\"\n}"
        );
    }

    #[tokio::test]
    async fn caller_cannot_override_license() {
        let (_store, dataset) = seeded(r#"{"Name":"Balloon","License":"CC0"}"#).await;

        let edited = update_description(
            &dataset,
            fields(json!({"License": "MIT", "Name": "Balloon Analog"})),
            CommitAuthor::default(),
        )
        .await
        .unwrap();
        assert_eq!(edited.document["License"], "CC0");
        assert_eq!(edited.document["Name"], "Balloon Analog");
    }

    #[tokio::test]
    async fn unchanged_document_is_not_committed() {
        let (store, dataset) = seeded(r#"{"Name":"Balloon","License":"CC0"}"#).await;
        let before = store.commit_log(&dataset.id).await.len();

        let edited = update_description(
            &dataset,
            fields(json!({"Name": "Balloon"})),
            CommitAuthor::default(),
        )
        .await
        .unwrap();
        assert!(edited.commit.is_none());
        assert_eq!(store.commit_log(&dataset.id).await.len(), before);
    }

    #[tokio::test]
    async fn drifted_working_copy_is_a_conflict() {
        let (store, dataset) = seeded(r#"{"Name":"Balloon","License":"CC0"}"#).await;
        dataset
            .repo
            .write_working_file(DESCRIPTION_PATH, br#"{"Name":"local edit"}"#)
            .await
            .unwrap();

        let err = update_description(
            &dataset,
            fields(json!({"Name": "Remote edit"})),
            CommitAuthor::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TaskError::PreconditionConflict(_)));
        assert_eq!(store.commit_log(&dataset.id).await.len(), 1);
        assert_eq!(
            dataset
                .repo
                .read_working_file(DESCRIPTION_PATH)
                .await
                .unwrap()
                .as_deref(),
            Some(br#"{"Name":"local edit"}"#.as_slice())
        );
    }

    #[tokio::test]
    async fn failed_commit_does_not_wedge_later_edits() {
        let (store, dataset) = seeded(r#"{"Name":"a","License":"CC0"}"#).await;
        store.fail_next("commit", "index.lock exists").await;

        let err = update_description(&dataset, fields(json!({"Name": "b"})), CommitAuthor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Store(_)));
        assert_eq!(
            dataset.repo.read_working_file(DESCRIPTION_PATH).await.unwrap(),
            dataset.repo.read_head_file(DESCRIPTION_PATH).await.unwrap()
        );

        let edited = update_description(&dataset, fields(json!({"Name": "b"})), CommitAuthor::default())
            .await
            .unwrap();
        assert!(edited.commit.is_some());
        assert_eq!(store.commit_log(&dataset.id).await.len(), 2);
    }

    #[test]
    fn non_object_description_is_rejected() {
        assert!(DescriptionFile::decode(Some(b"[1, 2]")).is_err());
        assert!(DescriptionFile::decode(None).unwrap().is_empty());
    }
}
