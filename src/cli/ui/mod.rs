pub mod output;

pub use output::{ConsoleNotifier, Output};
