use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use feedback_server::BrokerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Human-in-the-loop feedback broker")]
struct Args {
    /// TOML config file. Defaults to the per-user config location when present.
    #[arg(long, env = "FEEDBACK_BROKER_CONFIG")]
    config: Option<PathBuf>,
    /// Public host used in session URLs.
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Bind address, when it differs from the public host and port.
    #[arg(long)]
    listen: Option<String>,
    /// Generate https session URLs.
    #[arg(long)]
    https: bool,
    /// Allow access to sessions that never had a URL bound.
    #[arg(long)]
    no_require_token: bool,
    /// Default seconds a session waits for the human.
    #[arg(long)]
    session_timeout: Option<u64>,
    #[arg(long)]
    cleanup_interval: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut BrokerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(listen) = self.listen {
            config.listen = Some(listen);
        }
        if self.https {
            config.use_https = true;
        }
        if self.no_require_token {
            config.require_token = false;
        }
        if let Some(secs) = self.session_timeout {
            config.default_timeout_secs = secs;
        }
        if let Some(secs) = self.cleanup_interval {
            config.cleanup_interval_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedback_server=info,libfeedback=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = BrokerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    feedback_server::run(config).await
}
