//! Bookmark and Settings Stores
//!
//! The organizer talks to the browser (or a file standing in for it) through
//! two traits. The in-memory bookmark store can be loaded from and saved to a
//! JSON tree, which is what the CLI operates on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::constants::organizer as consts;
use crate::types::{BookmarkNode, MarksortError, Provider, Result, ResultExt};

/// Settings key holding the batch size
pub const BATCH_SIZE_KEY: &str = "batchSize";

// =============================================================================
// Bookmark Store
// =============================================================================

#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// The whole tree, rooted at the store root
    async fn list_all(&self) -> Result<BookmarkNode>;

    /// Create a folder under `parent_id`
    async fn create(&self, parent_id: &str, title: &str) -> Result<BookmarkNode>;

    async fn move_to(&self, id: &str, parent_id: &str) -> Result<()>;

    /// Direct children of `parent_id`, without their subtrees
    async fn children(&self, parent_id: &str) -> Result<Vec<BookmarkNode>>;

    async fn get(&self, id: &str) -> Result<Option<BookmarkNode>>;
}

pub type SharedBookmarkStore = Arc<dyn BookmarkStore>;

#[derive(Debug, Clone)]
struct Entry {
    parent_id: Option<String>,
    title: String,
    url: Option<String>,
    children: Vec<String>,
}

#[derive(Debug, Default)]
struct Tree {
    root: String,
    entries: HashMap<String, Entry>,
}

impl Tree {
    fn insert(&mut self, node: &BookmarkNode, parent_id: Option<&str>) {
        self.entries.insert(
            node.id.clone(),
            Entry {
                parent_id: parent_id.map(str::to_string),
                title: node.title.clone(),
                url: node.url.clone(),
                children: node.children.iter().map(|c| c.id.clone()).collect(),
            },
        );
        for child in &node.children {
            self.insert(child, Some(&node.id));
        }
    }

    fn entry(&self, id: &str) -> Result<&Entry> {
        self.entries
            .get(id)
            .ok_or_else(|| MarksortError::Store(format!("No bookmark with id {}", id)))
    }

    fn node(&self, id: &str, deep: bool) -> Option<BookmarkNode> {
        let entry = self.entries.get(id)?;
        let children = if deep {
            entry
                .children
                .iter()
                .filter_map(|c| self.node(c, true))
                .collect()
        } else {
            Vec::new()
        };
        Some(BookmarkNode {
            id: id.to_string(),
            parent_id: entry.parent_id.clone(),
            title: entry.title.clone(),
            url: entry.url.clone(),
            children,
        })
    }

    fn is_descendant(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id.to_string());
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            current = self.entries.get(&cur).and_then(|e| e.parent_id.clone());
        }
        false
    }
}

/// Bookmark tree held in memory
#[derive(Debug)]
pub struct MemoryBookmarkStore {
    tree: RwLock<Tree>,
}

impl Default for MemoryBookmarkStore {
    fn default() -> Self {
        Self::from_tree(BookmarkNode {
            id: "root".to_string(),
            parent_id: None,
            title: String::new(),
            url: None,
            children: Vec::new(),
        })
    }
}

impl MemoryBookmarkStore {
    pub fn from_tree(root: BookmarkNode) -> Self {
        let mut tree = Tree {
            root: root.id.clone(),
            entries: HashMap::new(),
        };
        tree.insert(&root, None);
        Self {
            tree: RwLock::new(tree),
        }
    }

    /// Load a JSON bookmark tree
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context_fn(|| format!("Failed to read bookmarks from {}", path.display()))?;
        let root: BookmarkNode = serde_json::from_str(&content)?;
        Ok(Self::from_tree(root))
    }

    /// Write the current tree as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let root = self.snapshot()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&root)?)?;
        debug!("Saved bookmarks to {}", path.display());
        Ok(())
    }

    pub fn root_id(&self) -> String {
        self.read().root.clone()
    }

    /// Deep copy of the whole tree
    pub fn snapshot(&self) -> Result<BookmarkNode> {
        let tree = self.read();
        tree.node(&tree.root, true)
            .ok_or_else(|| MarksortError::Store("bookmark root missing".to_string()))
    }

    fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BookmarkStore for MemoryBookmarkStore {
    async fn list_all(&self) -> Result<BookmarkNode> {
        self.snapshot()
    }

    async fn create(&self, parent_id: &str, title: &str) -> Result<BookmarkNode> {
        let mut tree = self.write();
        if tree.entry(parent_id)?.url.is_some() {
            return Err(MarksortError::Store(format!(
                "Cannot create a folder inside bookmark {}",
                parent_id
            )));
        }

        let id = Uuid::new_v4().to_string();
        tree.entries.insert(
            id.clone(),
            Entry {
                parent_id: Some(parent_id.to_string()),
                title: title.to_string(),
                url: None,
                children: Vec::new(),
            },
        );
        if let Some(parent) = tree.entries.get_mut(parent_id) {
            parent.children.push(id.clone());
        }

        tree.node(&id, false)
            .ok_or_else(|| MarksortError::Store(format!("Folder {} vanished after create", id)))
    }

    async fn move_to(&self, id: &str, parent_id: &str) -> Result<()> {
        let mut tree = self.write();
        if id == tree.root {
            return Err(MarksortError::Store("Cannot move the root folder".to_string()));
        }
        let old_parent = tree.entry(id)?.parent_id.clone();
        if tree.entry(parent_id)?.url.is_some() {
            return Err(MarksortError::Store(format!(
                "Move target {} is not a folder",
                parent_id
            )));
        }
        if tree.is_descendant(parent_id, id) {
            return Err(MarksortError::Store(format!(
                "Cannot move {} into its own subtree",
                id
            )));
        }

        if let Some(old) = old_parent.as_deref()
            && let Some(entry) = tree.entries.get_mut(old)
        {
            entry.children.retain(|c| c != id);
        }
        if let Some(parent) = tree.entries.get_mut(parent_id) {
            parent.children.push(id.to_string());
        }
        if let Some(entry) = tree.entries.get_mut(id) {
            entry.parent_id = Some(parent_id.to_string());
        }
        Ok(())
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<BookmarkNode>> {
        let tree = self.read();
        Ok(tree
            .entry(parent_id)?
            .children
            .iter()
            .filter_map(|c| tree.node(c, false))
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<BookmarkNode>> {
        Ok(self.read().node(id, false))
    }
}

// =============================================================================
// Settings Store
// =============================================================================

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Positive `batchSize`, else the built-in default
    fn batch_size(&self) -> usize {
        self.batch_size_or(consts::DEFAULT_BATCH_SIZE)
    }

    fn batch_size_or(&self, default: usize) -> usize {
        self.get(BATCH_SIZE_KEY)
            .and_then(|v| v.as_u64())
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(default)
    }

    fn api_key(&self, provider: Provider) -> Option<String> {
        self.get(&provider.settings_key())
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|k| !k.trim().is_empty())
    }
}

pub type SharedSettingsStore = Arc<dyn SettingsStore>;

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<Map<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings persisted as a flat JSON object, rewritten on every `set`
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl FileSettingsStore {
    /// Open `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path).with_context_fn(|| {
                format!("Failed to read settings from {}", path.display())
            })?;
            match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => map,
                _ => {
                    return Err(MarksortError::Store(format!(
                        "Settings file {} is not a JSON object",
                        path.display()
                    )));
                }
            }
        } else {
            Map::new()
        };
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let content = {
            let mut values = self.values.write().unwrap_or_else(|p| p.into_inner());
            values.insert(key.to_string(), value);
            serde_json::to_string_pretty(&*values)?
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
