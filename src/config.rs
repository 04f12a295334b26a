use clap::Parser;
use uuid::Uuid;

#[derive(Parser, Debug, Clone)]
#[command(name = "talentsource", about = "Candidate sourcing engine")]
pub struct Config {
    /// Database connection URL. When omitted the engine runs against an
    /// in-memory store (local development only).
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true")]
    pub run_migrations: bool,

    /// Static API bearer token. When omitted the API is open.
    #[arg(long, env = "API_TOKEN")]
    pub api_token: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the API server and the source scheduler (default)
    Serve {
        /// Listen address
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,

        /// Scheduler tick interval in seconds
        #[arg(long, env = "TICK_INTERVAL", default_value = "60")]
        tick_interval: u64,
    },
    /// Run a single scrape to completion and exit
    Scrape {
        /// Source id
        #[arg(long)]
        source: Uuid,
    },
    /// Run one scheduler pass over due sources and exit
    Tick,
}

impl Config {
    /// Resolve the command, defaulting to Serve if none specified.
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            tick_interval: std::env::var("TICK_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        })
    }
}
