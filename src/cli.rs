use std::path::PathBuf;

use clap::Parser;

use crate::config::ConfigOverrides;

/// Organize the top-level contents of a directory into folders using an
/// LLM classifier, reversibly.
#[derive(Debug, Parser)]
#[command(name = "tidyai", version, about, long_about = None)]
pub struct Cli {
    /// Directory to organize
    pub directory: PathBuf,

    /// Provider preset (openai, openrouter, groq, ollama, lmstudio, custom)
    #[arg(long)]
    pub provider: Option<String>,

    /// Base URL of the chat-completions API
    #[arg(long)]
    pub api_base: Option<String>,

    /// Path appended to the base URL
    #[arg(long)]
    pub api_path: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub api_key: Option<String>,

    /// Header that carries the API key
    #[arg(long = "auth-header")]
    pub auth_header_name: Option<String>,

    /// Scheme placed before the key, e.g. "Bearer"; pass "" to send the bare key
    #[arg(long)]
    pub auth_scheme: Option<String>,

    /// Config file to use instead of the platform default
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Apply without asking and keep the result
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Show the proposed organization and stop
    #[arg(long, conflicts_with = "undo")]
    pub dry_run: bool,

    /// Restore the previous organization of DIRECTORY and exit
    #[arg(long)]
    pub undo: bool,

    /// Log debug output to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            provider: self.provider.clone(),
            api_base: self.api_base.clone(),
            api_path: self.api_path.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            auth_header_name: self.auth_header_name.clone(),
            auth_scheme: self.auth_scheme.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "tidyai",
            "/tmp/downloads",
            "--provider",
            "ollama",
            "--model",
            "llama3.2",
            "--auth-header",
            "X-Api-Key",
            "--auth-scheme",
            "",
            "-y",
        ])
        .unwrap();

        assert_eq!(cli.directory, PathBuf::from("/tmp/downloads"));
        assert!(cli.yes);
        let overrides = cli.overrides();
        assert_eq!(overrides.provider.as_deref(), Some("ollama"));
        assert_eq!(overrides.auth_header_name.as_deref(), Some("X-Api-Key"));
        assert_eq!(overrides.auth_scheme.as_deref(), Some(""));
        assert!(overrides.api_key.is_none());
    }

    #[test]
    fn dry_run_and_undo_are_exclusive() {
        assert!(Cli::try_parse_from(["tidyai", ".", "--dry-run", "--undo"]).is_err());
    }
}
