pub mod commands;
pub mod ui;
pub mod util;

pub use ui::{ConsoleNotifier, Output};
pub use util::CommandContext;
