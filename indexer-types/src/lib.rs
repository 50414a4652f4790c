use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A wiki page as handed from the page source to the RAG store.
///
/// `content` is mutable on purpose: the indexer overwrites it with the
/// classification label before the document is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub space: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        space: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            space: space.into(),
            title: title.into(),
            content: content.into(),
            url: None,
            version: None,
            last_modified: None,
        }
    }
}
