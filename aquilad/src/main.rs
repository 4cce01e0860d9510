//! Aquilad - MQTT broker daemon

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use aquila_server::{
    auth::Authenticator,
    registry::BrokerOptions,
    server,
    tls::TlsConfig,
};
use aquila_storage::{memory::MemoryStore, redis::RedisStore, sqlite::SqliteStore, OfflineStore};

mod config;
mod credentials;

use config::Config;
use credentials::PasswordFile;

#[derive(Parser, Debug)]
#[command(name = "aquilad")]
#[command(about = "Aquila MQTT broker daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path or http(s) URL; overrides AQUILAD_CONFIG
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage password file credentials
    Passwd {
        /// Path to the password file
        #[arg(short = 'f', long)]
        file: String,

        /// Username to add or update
        #[arg(short = 'u', long)]
        username: String,

        /// Delete the user instead of adding/updating
        #[arg(short = 'd', long)]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::Passwd {
        file,
        username,
        delete,
    }) = cli.command
    {
        return passwd(&file, &username, delete);
    }

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).init();

    let config = match cli.config {
        Some(path) => Config::load_from(&path).await?,
        None => Config::load().await?,
    };

    let options = BrokerOptions {
        max_qos: config.max_qos(),
        authenticator: build_authenticator(&config)?,
        store: build_store(&config).await,
    };

    // TLS applies when both paths are set; otherwise the TCP listener is
    // plain. A TLS config that fails to load disables TCP entirely.
    let tls = config.server.tls.as_ref().and_then(|tls| {
        if tls.cert.is_empty() || tls.key.is_empty() {
            None
        } else {
            Some(TlsConfig::new(&tls.cert, &tls.key))
        }
    });

    let tcp = match &config.server.tcp {
        Some(address) => {
            info!("starting TCP listener on {}", address);
            Some(TcpListener::bind(address).await?)
        }
        None => None,
    };

    let ws = match &config.server.http {
        Some(address) => {
            info!("starting WebSocket listener on {}", address);
            Some(TcpListener::bind(address).await?)
        }
        None => None,
    };

    server::run(tcp, tls, ws, options, signal::ctrl_c()).await;

    info!("aquilad stopped");

    Ok(())
}

/// The `passwd` subcommand: add, update or delete one credential.
fn passwd(file: &str, username: &str, delete: bool) -> Result<(), Box<dyn std::error::Error>> {
    if delete {
        let mut passwords = PasswordFile::open(file)?;
        passwords.remove(username)?;
        passwords.store()?;
        eprintln!("Removed `{}` from `{}`", username, file);
        return Ok(());
    }

    let password = rpassword::prompt_password(format!("Password for `{}`: ", username))?;
    if password.is_empty() {
        return Err("refusing to set an empty password".into());
    }
    if rpassword::prompt_password("Confirm password: ")? != password {
        return Err("passwords do not match".into());
    }

    let mut passwords = PasswordFile::open_or_empty(file)?;
    passwords.set_password(username, &password)?;
    passwords.store()?;
    eprintln!("Updated `{}` in `{}`", username, file);
    Ok(())
}

fn build_authenticator(
    config: &Config,
) -> Result<Option<Arc<dyn Authenticator>>, Box<dyn std::error::Error>> {
    let Some(auth) = &config.server.auth else {
        return Ok(None);
    };

    match auth.kind.as_str() {
        "file" => {
            let Some(path) = &auth.password_file else {
                return Err("auth type `file` requires `password_file`".into());
            };
            let passwords = PasswordFile::open(path)?;
            info!("loaded {} credentials from `{}`", passwords.len(), path);
            Ok(Some(Arc::new(passwords.into_authenticator())))
        }
        other => {
            warn!("unknown auth type `{}`, running without authentication", other);
            Ok(None)
        }
    }
}

async fn build_store(config: &Config) -> Option<Arc<dyn OfflineStore>> {
    let Some(persistence) = &config.server.persistence else {
        return None;
    };

    match persistence.kind.as_str() {
        "memory" => {
            if persistence.memory.path.is_empty() {
                info!("using in-memory offline store");
                Some(Arc::new(MemoryStore::new()))
            } else {
                match SqliteStore::new(&persistence.memory.path) {
                    Ok(store) => {
                        info!("using embedded offline store at {}", persistence.memory.path);
                        Some(Arc::new(store))
                    }
                    Err(e) => {
                        error!("embedded store setup failed: {}", e);
                        None
                    }
                }
            }
        }
        "redis" => {
            let Some(redis) = &persistence.redis else {
                error!("persistence type `redis` requires a `redis` section");
                return None;
            };
            match RedisStore::connect(&redis.url, redis.password.as_deref()).await {
                Ok(store) => {
                    info!("connected to redis offline store");
                    Some(Arc::new(store))
                }
                Err(e) => {
                    error!("redis store setup failed: {}", e);
                    None
                }
            }
        }
        other => {
            warn!("unknown persistence type `{}`, offline delivery disabled", other);
            None
        }
    }
}
