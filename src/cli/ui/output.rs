use console::style;

use crate::errors::{ContextError, ErrorNotifier};

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// `label: value` with the label dimmed
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {} {}", style(format!("{}:", label)).dim(), value);
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

/// Prints aggregated failures with their recovery steps to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }

    fn render(error: &ContextError) -> String {
        let mut lines = vec![format!(
            "{} {} {}",
            style("✗").red(),
            style(format!("[{}]", error.kind())).red().bold(),
            error.user_message
        )];
        lines.extend(
            error
                .recovery_steps
                .iter()
                .map(|step| format!("    {} {}", style("→").dim(), step)),
        );
        lines.join("\n")
    }
}

impl ErrorNotifier for ConsoleNotifier {
    fn notify(&self, error: &ContextError) {
        eprintln!("{}", Self::render(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::error_context;
    use crate::types::{MarksortError, Provider};

    #[test]
    fn test_render_includes_recovery_steps() {
        console::set_colors_enabled_stderr(false);
        console::set_colors_enabled(false);
        let err = MarksortError::Provider {
            provider: Provider::Gemini,
            status: 401,
            message: "API key not valid".to_string(),
        };
        let error = ContextError::from_error(&err, error_context([("operation", "categorize")]));

        let rendered = ConsoleNotifier::render(&error);
        assert!(rendered.contains(&error.user_message));
        for step in &error.recovery_steps {
            assert!(rendered.contains(step.as_str()));
        }
    }
}
