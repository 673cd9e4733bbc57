use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "command-agent",
    version,
    about = "Executes command documents delivered over a management channel"
)]
pub(crate) struct Args {
    #[arg(long, default_value = agent_protocol::channel::DEFAULT_CHANNEL_ADDR)]
    pub(crate) listen_addr: String,
    #[arg(long, default_value = "config/agent.toml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "logs")]
    pub(crate) log_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
