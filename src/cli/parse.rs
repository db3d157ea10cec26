//! CLI parse: clap types for Storyloom. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Storyloom CLI - Long-form story generation from hierarchical outlines
#[derive(Parser)]
#[command(name = "storyloom")]
#[command(about = "Generate premises, plans and stories with a language model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, default_value = "false")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a title and premise
    Premise {
        /// Where to write the premise JSON (default: paths.premise)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Generate a plan (setting, entities, outline) from a stored premise
    Plan {
        /// Premise JSON to plan from (default: paths.premise)
        #[arg(long)]
        premise: Option<PathBuf>,
        /// Where to write the plan JSON (default: paths.plan)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Render a stored plan into a story
    Story {
        /// Plan JSON to render (default: paths.plan)
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Where to write the story text (default: paths.story)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Ignore existing checkpoints and start from the first node
        #[arg(long)]
        fresh: bool,
    },
    /// Print a stored plan
    Show {
        /// Plan JSON to print (default: paths.plan)
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration after all layers are merged
    Config {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// List stored beam checkpoints
    Checkpoints {
        /// Delete every stored checkpoint instead of listing them
        #[arg(long)]
        clear: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

impl Commands {
    /// Command name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Premise { .. } => "premise",
            Commands::Plan { .. } => "plan",
            Commands::Story { .. } => "story",
            Commands::Show { .. } => "show",
            Commands::Config { .. } => "config",
            Commands::Checkpoints { .. } => "checkpoints",
        }
    }
}
