//! Command line arguments for the `tutor` binary.

use clap::Parser;
use std::path::PathBuf;

/// A voice and text language tutor backed by a realtime model.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// API key, read from OPENAI_API_KEY when the flag is absent.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// The lesson topic.
    #[arg(long, default_value = "")]
    pub topic: String,

    /// File holding the tutor system prompt.
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,
}
