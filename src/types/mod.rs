pub mod bookmark;
pub mod error;
pub mod provider;

pub use bookmark::{BookmarkNode, BookmarkRecord, CategorizedBookmark, LearningHint, LearningHints};
pub use error::{MarksortError, Result, ResultExt, is_retryable_message};
pub use provider::Provider;
