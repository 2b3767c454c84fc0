//! Command line interface for operating the reporting service. Supports
//! initializing the data file, serving the HTTP API, and checking the
//! persisted document.

mod config;
mod error;
mod model;
mod server;
mod store;
mod tls;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use config::Settings;
use store::Store;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "civicd",
    author,
    version,
    about = "File-backed civic issue reporting API"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create the data file and a default `.env` if missing.
    Init,
    /// Launch the HTTP (or HTTPS) API service.
    Serve,
    /// Load the data file and report record counts.
    Check,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let store = Store::new(cfg.data_file.clone());
    match cli.command {
        Commands::Init => {
            store.init()?;
        }
        Commands::Check => {
            let doc = store.load().await?;
            println!(
                "{} users, {} events, {} comments",
                doc.users.len(),
                doc.events.len(),
                doc.comments.len()
            );
        }
        Commands::Serve => {
            store.init()?;
            let addr: SocketAddr = cfg.bind.parse()?;
            server::serve(addr, store, &cfg, std::future::pending()).await?;
        }
    }
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let data_file = base_dir.join("civicd-data").join("db.json");
    let mut content = String::new();
    content.push_str(&format!("DATA_FILE={}\n", display_path(&data_file)));
    content.push_str("BIND_ADDR=127.0.0.1:3000\n");
    content.push_str("CORS_ORIGIN=\n");
    content.push_str("BODY_LIMIT_BYTES=10485760\n");
    content.push_str("TLS_CERT=\n");
    content.push_str("TLS_KEY=\n");
    content.push_str(&format!("ADMIN_CODE={}\n", config::DEFAULT_ADMIN_CODE));
    content.push_str(&format!(
        "AUTHORITY_CODE={}\n",
        config::DEFAULT_AUTHORITY_CODE
    ));
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,axum=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{clear_env, ENV_MUTEX};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::{net::TcpListener, task};

    fn write_env(dir: &TempDir, bind: &str) -> String {
        let env_path = dir.path().join(".env");
        let content = format!(
            "DATA_FILE={}\nBIND_ADDR={}\n",
            dir.path().join("db.json").display(),
            bind
        );
        fs::write(&env_path, content).unwrap();
        env_path.to_str().unwrap().into()
    }

    #[tokio::test]
    async fn run_init_and_check() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "127.0.0.1:0");

        run(Cli {
            env: env_file.clone(),
            command: Commands::Init,
        })
        .await
        .unwrap();
        assert!(dir.path().join("db.json").exists());

        run(Cli {
            env: env_file,
            command: Commands::Check,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn init_creates_default_env() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Init,
        })
        .await
        .unwrap();

        let data = fs::read_to_string(&env_path).unwrap();
        let expected_file = dir.path().join("civicd-data").join("db.json");
        assert!(data.contains(&format!("DATA_FILE={}", expected_file.to_string_lossy())));
        assert!(data.contains("BIND_ADDR=127.0.0.1:3000"));
        assert!(data.contains("ADMIN_CODE=admin123"));
        assert!(expected_file.exists());
    }

    #[tokio::test]
    async fn check_fails_on_malformed_data_file() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "127.0.0.1:0");
        fs::write(dir.path().join("db.json"), "{broken").unwrap();
        assert!(run(Cli {
            env: env_file,
            command: Commands::Check,
        })
        .await
        .is_err());
    }

    #[tokio::test]
    async fn run_serve_starts_http() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let env_file = write_env(&dir, &format!("127.0.0.1:{port}"));

        let handle = task::spawn(run(Cli {
            env: env_file,
            command: Commands::Serve,
        }));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let url = format!("http://127.0.0.1:{port}/healthz");
        let resp = reqwest::get(url).await.unwrap();
        assert!(resp.status().is_success());
        handle.abort();
    }
}
