//! Bookmark domain types shared by the organizer and the LLM layer.

use serde::{Deserialize, Serialize};

/// Bookmark metadata sent to a model for categorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl BookmarkRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            parent_id: None,
        }
    }
}

/// One category assignment produced by a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizedBookmark {
    /// Identifier echoed by the model (batch-local)
    pub id: String,
    /// Store identifier of the bookmark
    pub bookmark_id: String,
    /// Folder path, `/`-separated
    pub category: String,
    pub title: String,
    /// Model confidence in `[0, 1]`
    pub confidence: f64,
}

/// Node of the hierarchical bookmark store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BookmarkNode>,
}

impl BookmarkNode {
    pub fn is_folder(&self) -> bool {
        self.url.is_none()
    }

    /// Flatten every bookmark (non-folder) below this node
    pub fn bookmarks(&self) -> Vec<BookmarkRecord> {
        let mut out = Vec::new();
        self.collect_bookmarks(&mut out);
        out
    }

    fn collect_bookmarks(&self, out: &mut Vec<BookmarkRecord>) {
        if let Some(url) = &self.url {
            out.push(BookmarkRecord {
                id: self.id.clone(),
                title: self.title.clone(),
                url: url.clone(),
                parent_id: self.parent_id.clone(),
            });
        }
        for child in &self.children {
            child.collect_bookmarks(out);
        }
    }
}

/// A user correction the model should learn from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningHint {
    /// Title or domain fragment the correction applies to
    pub pattern: String,
    /// Category the user chose
    pub category: String,
}

/// Corrections collected from earlier manual moves
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningHints {
    pub hints: Vec<LearningHint>,
}

impl LearningHints {
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }
}
