//! Models Command
//!
//! List the fallback cascade for the providers that have API keys.

use console::style;

use crate::ai::{ModelCandidate, ModelCatalog};
use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::Result;

pub fn run(format: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let candidates = candidates(&ctx);
    let out = Output::new();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    if candidates.is_empty() {
        out.warning("No provider API keys configured");
        out.info("Set GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY or GROQ_API_KEY");
        return Ok(());
    }

    out.header("Model cascade");
    for (index, candidate) in candidates.iter().enumerate() {
        println!(
            "  {:>2}. {:<40} {}",
            index + 1,
            candidate.label(),
            style(format!("weight {:.0}", candidate.capability.weight())).dim()
        );
    }
    Ok(())
}

/// Ordered candidates for the providers configured in `ctx`
pub fn candidates(ctx: &CommandContext) -> Vec<ModelCandidate> {
    let providers = ctx.configured_providers();
    ModelCatalog::builtin().candidates(|p| providers.contains(&p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::Provider;
    use tempfile::TempDir;

    #[test]
    fn test_candidates_follow_configured_keys() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.organizer.settings_file = Some(dir.path().join("settings.json"));
        config.llm.groq.api_key = Some("gsk-test".to_string());
        let ctx = CommandContext::from_config(config).unwrap();

        let list = candidates(&ctx);
        let groq: Vec<_> = list
            .iter()
            .filter(|c| c.provider == Provider::Groq)
            .collect();
        assert_eq!(groq.len(), 2);
        assert_eq!(groq[0].model, "llama-3.3-70b-versatile");
    }
}
