#[macro_use]
mod command_macros;

use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use keygate_lib::{
    keygate::Keygate,
    keygate_file::{KeygateFile, DEFAULT_TOKEN_PREFIX, DEFAULT_URL},
    server::{run_server, ServerState},
};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)] // requires `derive` feature
#[command(name = "keygate")]
#[command(about = "License token issuing and verification service", long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Override log level (e.g. info, debug, trace).
    #[arg(long, env = "KEYGATE_LOG_LEVEL", global = true)]
    log_level: Option<String>,
    /// TOML configuration file.
    #[arg(short, long, env = "KEYGATE_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// Database url, overrides the one in the configuration file.
    #[arg(long, env = "KEYGATE_DB_URL", global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server.
    Serve {
        #[arg(short, long, env = "KEYGATE_BIND", default_value = "0.0.0.0:8000")]
        bind: SocketAddr,
        /// Key expected in the `x-admin-key` header. Admin routes are closed without it.
        #[arg(long, env = "ADMIN_KEY", hide_env_values = true)]
        admin_key: Option<String>,
    },
    /// Write a configuration file.
    Init {
        #[arg(short, long, default_value = "keygate.toml")]
        file: PathBuf,
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
        #[arg(short, long, default_value = DEFAULT_TOKEN_PREFIX)]
        token_prefix: String,
        #[arg(long)]
        require_admin_for_generate: bool,
    },
    /// Issue a token for a plan.
    Generate {
        #[arg(short, long)]
        plan: Option<String>,
    },
    /// Show a token's binding and expiry.
    Inspect {
        #[arg(short, long)]
        token: Option<String>,
    },
    /// Clear a token's hardware binding.
    Unbind {
        #[arg(short, long)]
        token: Option<String>,
    },
    /// Revoke a token.
    Revoke {
        #[arg(short, long)]
        token: Option<String>,
    },
    /// List a token's change history.
    History {
        #[arg(short, long)]
        token: Option<String>,
    },
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = cli
        .log_level
        .as_deref()
        .map(|lvl| lvl.to_ascii_uppercase())
        .map(|lvl| match lvl.as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or_else(|| match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        });
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<KeygateFile> {
    let mut keygate_file = match &cli.config {
        Some(path) => KeygateFile::load_file(path.clone())?,
        None => KeygateFile::default(),
    };
    if let Some(url) = &cli.db_url {
        keygate_file.url = url.clone();
    }
    Ok(keygate_file)
}

async fn open_keygate(cli: &Cli, change_source: &str) -> anyhow::Result<Keygate> {
    Keygate::new(load_config(cli)?, change_source).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match &cli.command {
        Commands::Serve { bind, admin_key } => {
            info!("initializing database");
            let keygate = open_keygate(&cli, "http").await?;
            let admin_key = admin_key.clone().filter(|key| !key.is_empty());
            if admin_key.is_none() {
                warn!("ADMIN_KEY is not set, admin routes are disabled");
            }
            run_server(ServerState { keygate, admin_key }, *bind).await?;
        }
        Commands::Init {
            file,
            url,
            token_prefix,
            require_admin_for_generate,
        } => {
            let keygate_file = KeygateFile {
                url: url.clone(),
                token_prefix: token_prefix.clone(),
                require_admin_for_generate: *require_admin_for_generate,
                ..KeygateFile::default()
            };
            keygate_file.save_file(file.clone())?;
            println!("Wrote {}", file.display());
        }
        Commands::Generate { plan } => {
            let keygate = open_keygate(&cli, "cli").await?;
            let plan = arg_input!(plan, "Which plan should the token be issued for?:");
            let generated = keygate.generate(&plan).await?;
            println!("{}", serde_json::to_string_pretty(&generated)?);
        }
        Commands::Inspect { token } => {
            let keygate = open_keygate(&cli, "cli").await?;
            let token = arg_input!(token, "Which token?:");
            let status = keygate.inspect(token).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Unbind { token } => {
            let keygate = open_keygate(&cli, "cli").await?;
            let token = arg_input!(token, "Which token should be unbound?:");
            keygate.unbind(token).await?;
            println!("Unbound");
        }
        Commands::Revoke { token } => {
            let keygate = open_keygate(&cli, "cli").await?;
            let token = arg_input!(token, "Which token should be revoked?:");
            keygate.revoke(token).await?;
            println!("Revoked");
        }
        Commands::History { token } => {
            let keygate = open_keygate(&cli, "cli").await?;
            let token = arg_input!(token, "Which token?:");
            let events = keygate.history(token).await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
    }
    Ok(())
}
