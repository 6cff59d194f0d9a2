//! Bookmark organizer: batching, folder realization, and the stores it works against.

pub mod categorizer;
pub mod session;
pub mod store;

pub use categorizer::{CategorizeReport, Categorizer, ProgressCallback};
pub use session::RunSession;
pub use store::{
    BATCH_SIZE_KEY, BookmarkStore, FileSettingsStore, MemoryBookmarkStore, MemorySettingsStore,
    SettingsStore, SharedBookmarkStore, SharedSettingsStore,
};
