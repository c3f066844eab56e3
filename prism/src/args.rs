use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "prism", version, about = "OpenAI-compatible gateway for Gemini backends")]
pub(crate) struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "PRISM_CONFIG", default_value = "prism.toml")]
    pub config: PathBuf,

    /// Address to listen on; overrides the configuration file.
    #[arg(short, long, env = "PRISM_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,llm=debug".
    #[arg(long, env = "PRISM_LOG", default_value = "info")]
    pub log_filter: String,
}
