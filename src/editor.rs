use crate::models::structs::{DocumentContent, Keyspace};
use crate::modules::safe_file_name;

pub const EDITOR_FILE_EXTENSION: &str = "cbjson";
const MAX_ID_CHARS: usize = 50;

/// A document as handed to the editor surface.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorDocument {
    pub session_id: String,
    pub document_id: String,
    pub bucket: String,
    pub scope: String,
    pub collection: String,
    pub content: serde_json::Value,
    /// CAS of the revision on display.
    pub version_token: u64,
}

impl EditorDocument {
    pub fn from_content(keyspace: &Keyspace, document: DocumentContent) -> Self {
        Self {
            session_id: keyspace.connection_id.clone(),
            document_id: document.id,
            bucket: keyspace.bucket.clone(),
            scope: keyspace.scope.clone(),
            collection: keyspace.collection.clone(),
            content: document.content,
            version_token: document.cas,
        }
    }

    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(
            self.session_id.clone(),
            self.bucket.clone(),
            self.scope.clone(),
            self.collection.clone(),
        )
    }

    pub fn file_name(&self) -> String {
        editor_file_name(&self.keyspace(), &self.document_id)
    }

    /// Indented JSON for display.
    pub fn pretty_content(&self) -> String {
        serde_json::to_string_pretty(&self.content).unwrap_or_else(|_| self.content.to_string())
    }
}

/// Host-side editor. Saving edits back to the cluster is not part of this contract.
pub trait DocumentEditorSurface: Send {
    fn open(&mut self, document: EditorDocument);

    /// Called after a refresh with the latest content and version token.
    fn refreshed(&mut self, document: EditorDocument);
}

/// `bucket.scope.collection.<id>.cbjson`, with the id made filesystem-safe.
pub fn editor_file_name(keyspace: &Keyspace, document_id: &str) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        keyspace.bucket,
        keyspace.scope,
        keyspace.collection,
        safe_file_name(document_id, MAX_ID_CHARS),
        EDITOR_FILE_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_sanitises_and_truncates_id() {
        let ks = Keyspace::new("c1", "travel-sample", "inventory", "airline");
        assert_eq!(
            editor_file_name(&ks, "airline_10"),
            "travel-sample.inventory.airline.airline_10.cbjson"
        );
        let long_id = format!("a/b{}", "z".repeat(100));
        let name = editor_file_name(&ks, &long_id);
        assert!(name.starts_with("travel-sample.inventory.airline.a_bzz"));
        assert_eq!(name.len(), "travel-sample.inventory.airline.".len() + 50 + ".cbjson".len());
    }

    #[test]
    fn editor_document_keeps_keyspace_and_cas() {
        let ks = Keyspace::new("c1", "b", "s", "c");
        let doc = EditorDocument::from_content(
            &ks,
            DocumentContent {
                id: "k1".into(),
                content: serde_json::json!({"a": 1}),
                cas: 42,
            },
        );
        assert_eq!(doc.version_token, 42);
        assert_eq!(doc.keyspace(), ks);
        assert!(doc.pretty_content().contains("\"a\": 1"));
    }
}
