use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::{Args, Parser, Subcommand};
use keygraph_crypto::MasterKey;
use keygraph_kms::{KmsConfig, KmsState, router};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "keygraph key management service", long_about = None)]
struct Cli {
    /// Log filter, e.g. `info` or `keygraph_kms=debug`
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Print the base64 bcrypt hash of an admin password
    HashPassword {
        password: String,
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
    /// Generate new master key material
    GenerateKey {
        #[arg(long, default_value_t = 1)]
        key_version: u32,
        /// Write the key to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "KMS_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,

    /// Encoded master key
    #[arg(long, env = "KMS_KEY", hide_env_values = true, conflicts_with = "key_file")]
    key: Option<String>,

    /// File holding the encoded master key
    #[arg(long, env = "KMS_KEY_FILE")]
    key_file: Option<PathBuf>,

    #[arg(long, env = "JWKS_URL")]
    jwks_url: Option<String>,

    #[arg(long, env = "JWKS_TTL_SECS", default_value_t = 300)]
    jwks_ttl_secs: u64,

    #[arg(long, env = "JWKS_MIN_REFRESH_SECS", default_value_t = 30)]
    jwks_min_refresh_secs: u64,

    #[arg(long, env = "BASIC_AUTH_USER")]
    basic_auth_user: Option<String>,

    #[arg(long, env = "HASHED_BASIC_AUTH_PASSWORD", hide_env_values = true)]
    hashed_basic_auth_password: Option<String>,

    #[arg(long, env = "KMS_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::HashPassword { password, cost } => {
            let hashed = bcrypt::hash(password, cost).context("hashing password")?;
            println!("{}", STANDARD.encode(hashed));
            Ok(())
        }
        Commands::GenerateKey { key_version, out } => {
            let encoded = MasterKey::generate(key_version).encode();
            match out {
                Some(path) => {
                    std::fs::write(&path, format!("{encoded}\n"))
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("master key version {key_version} written to {}", path.display());
                }
                None => println!("{encoded}"),
            }
            Ok(())
        }
    }
}

fn load_master_key(args: &ServeArgs) -> Result<MasterKey> {
    let encoded = match (&args.key, &args.key_file) {
        (Some(key), _) => key.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => return Err(anyhow!("a master key is required (KMS_KEY or KMS_KEY_FILE)")),
    };
    MasterKey::parse(encoded.trim()).context("parsing master key")
}

async fn serve(args: ServeArgs) -> Result<()> {
    let master_key = load_master_key(&args)?;
    let config = KmsConfig {
        listen_addr: args.listen_addr,
        jwks_url: args.jwks_url,
        jwks_ttl_secs: args.jwks_ttl_secs,
        jwks_min_refresh_secs: args.jwks_min_refresh_secs,
        basic_auth_user: args.basic_auth_user,
        hashed_basic_auth_password: args.hashed_basic_auth_password,
        request_timeout_secs: args.request_timeout_secs,
    };
    let state = KmsState::new(master_key, config.clone())?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "kms listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    info!("kms stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
