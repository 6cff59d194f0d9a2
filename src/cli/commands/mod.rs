pub mod categorize;
pub mod config;
pub mod models;

pub use categorize::CategorizeOptions;
