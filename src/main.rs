use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marksort::cli::commands::CategorizeOptions;

#[derive(Parser)]
#[command(name = "marksort")]
#[command(version, about = "Sort browser bookmarks into folders with language models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Categorize bookmarks and move them into category folders
    Categorize {
        #[arg(long, short, help = "Bookmark tree JSON file")]
        bookmarks: PathBuf,
        #[arg(
            long,
            short,
            value_delimiter = ',',
            help = "Existing categories to prefer (comma separated)"
        )]
        categories: Vec<String>,
        #[arg(long, help = "Ask the model to suggest categories first")]
        suggest: bool,
        #[arg(long = "dry-run", help = "Show assignments only, don't move anything")]
        dry_run: bool,
        #[arg(long, short, help = "Write the organized tree to another file")]
        output: Option<PathBuf>,
        #[arg(long, help = "Learning hints JSON file")]
        hints: Option<PathBuf>,
    },

    /// List the model fallback order for the configured API keys
    Models {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mmarksort encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Categorize {
            bookmarks,
            categories,
            suggest,
            dry_run,
            output,
            hints,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(marksort::cli::commands::categorize::run(CategorizeOptions {
                bookmarks,
                categories,
                suggest,
                dry_run,
                output,
                hints,
            }))?;
        }
        Commands::Models { format } => {
            marksort::cli::commands::models::run(&format)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                marksort::cli::commands::config::show(global, &format)?;
            }
            ConfigAction::Path => {
                marksort::cli::commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                marksort::cli::commands::config::init(global, force)?;
            }
        },
    }

    Ok(())
}
