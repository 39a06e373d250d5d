use anyhow::Context;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "tidyai_lib=warn,tidyai=warn";
const VERBOSE_FILTER: &str = "tidyai_lib=debug,tidyai=debug";

/// `RUST_LOG` wins when set; otherwise warnings only, or debug with `-v`.
/// Logs go to stderr so they never mix with the plan on stdout.
pub fn init(verbose: bool) -> anyhow::Result<()> {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to install tracing subscriber")
}
