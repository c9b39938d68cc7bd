//! edudesk - command-line front-end for the school-management API.
//!
//! Reads go through the caching client; mutations invalidate the cached
//! reads they affect. Tokens are renewed transparently, and a session that
//! cannot be renewed sends the user back to `edudesk login`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edudesk_core::auth::{open_store, TokenStorageKind};
use edudesk_core::{ApiClient, ApiRequest, AuthState, CachedClient, Config, Method, Query, Session};
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable consulted before prompting for a password
const PASSWORD_ENV: &str = "EDUDESK_PASSWORD";

/// Prefix of the daily log files written with `--log-dir`
const LOG_FILE_PREFIX: &str = "edudesk.log";

/// Exit code when the session expired and could not be renewed
const EXIT_SESSION_EXPIRED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "edudesk", version, about = "Command-line client for the school-management API")]
struct Cli {
    /// Also write logs to daily files in this directory
    #[arg(long, global = true, env = "EDUDESK_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Override the API base URL for this invocation
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the token pair
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Forget the stored token pair
    Logout,
    /// GET a resource through the cache
    Get {
        path: String,
        /// Query parameter, repeatable
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Cache lifetime in seconds (defaults to the configured TTL)
        #[arg(long)]
        ttl: Option<u64>,
        /// Issue the read this many times concurrently
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Send a mutating request and invalidate affected cached reads
    Send {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
        /// Cache prefix to invalidate (defaults to the path's first segment)
        #[arg(long)]
        invalidate: Option<String>,
    },
    /// Show or update the configuration
    Config {
        #[arg(long)]
        base_url: Option<String>,
        /// Default cache TTL in seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// keyring, file or memory
        #[arg(long)]
        token_storage: Option<TokenStorageKind>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());
    info!("edudesk starting");

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let command = match cli.command {
        Command::Config {
            base_url,
            ttl,
            timeout,
            token_storage,
        } => {
            update_config(&mut config, base_url, ttl, timeout, token_storage)?;
            return Ok(ExitCode::SUCCESS);
        }
        command => command,
    };

    let client = build_client(&config, cli.base_url.as_deref())?;
    let mut auth_state = client.api().auth_state();
    auth_state.borrow_and_update();

    let explicit_logout = matches!(command, Command::Logout);
    let result = match command {
        Command::Login { username } => login(&client, &mut config, username).await,
        Command::Logout => {
            client.logout();
            println!("Logged out");
            Ok(())
        }
        Command::Get {
            path,
            params,
            ttl,
            repeat,
        } => {
            let ttl = ttl.map(Duration::from_secs).unwrap_or_else(|| config.default_ttl());
            get(&client, &path, &params, ttl, repeat).await
        }
        Command::Send {
            method,
            path,
            data,
            invalidate,
        } => send(&client, &method, &path, data.as_deref(), invalidate).await,
        // Handled before the client is built
        Command::Config { .. } => Ok(()),
    };

    let session_expired = !explicit_logout
        && auth_state.has_changed().unwrap_or(false)
        && *auth_state.borrow() == AuthState::LoggedOut;
    if session_expired {
        if let Err(e) = result {
            debug!(error = %e, "Request failed after session expiry");
        }
        eprintln!("Session expired. Run `edudesk login` to sign in again.");
        return Ok(ExitCode::from(EXIT_SESSION_EXPIRED));
    }

    result.map(|_| ExitCode::SUCCESS)
}

fn build_client(config: &Config, base_url_override: Option<&str>) -> Result<CachedClient> {
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    debug!(?cache_dir, storage = ?config.token_storage, "Opening token store");

    let session = match Session::load_boxed(open_store(config.token_storage, cache_dir.clone())) {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Failed to load stored tokens, starting logged out");
            Session::from_boxed(open_store(config.token_storage, cache_dir))
        }
    };

    let mut client_config = config.client_config();
    if let Some(url) = base_url_override {
        client_config.base_url = url.to_string();
    }
    debug!(base_url = %client_config.base_url, "Client configured");

    let api = ApiClient::new(&client_config, session).context("Failed to create API client")?;
    Ok(CachedClient::new(api))
}

async fn login(client: &CachedClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.resolved_username()) {
        Some(u) => u,
        None => prompt_username()?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(p) if !p.is_empty() => p,
        _ => prompt_password()?,
    };

    println!("Authenticating as {}...", username);
    client
        .api()
        .login(&username, &password)
        .await
        .context("Login failed")?;

    // Nothing cached for a previous user may be served to this one
    client.clear_cache();

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Login successful!");
    Ok(())
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

async fn get(client: &CachedClient, path: &str, params: &[String], ttl: Duration, repeat: usize) -> Result<()> {
    let query = Query::parse_pairs(params)?;
    let query = (!query.is_empty()).then_some(query);

    let reads = (0..repeat.max(1)).map(|_| client.cached_get::<Value>(path, ttl, query.as_ref()));
    let results = futures::future::join_all(reads).await;
    info!(path, callers = results.len(), "Reads settled");

    let mut first = None;
    for result in results {
        let value = result?;
        first.get_or_insert(value);
    }

    if let Some(value) = first {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

async fn send(
    client: &CachedClient,
    method: &str,
    path: &str,
    data: Option<&str>,
    invalidate: Option<String>,
) -> Result<()> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method '{}'", method))?;

    let mut request = ApiRequest::new(method, path);
    if let Some(data) = data {
        let body: Value = serde_json::from_str(data).context("--data must be valid JSON")?;
        request = request.with_json(&body)?;
    }

    let prefix = invalidate.unwrap_or_else(|| invalidation_prefix(path));
    let response = client.send_and_invalidate(&request, &prefix).await?;
    info!(status = %response.status, prefix = %prefix, "Mutation applied");

    if !response.body.is_null() {
        println!("{}", serde_json::to_string_pretty(&response.body)?);
    }
    Ok(())
}

/// Cache prefix covering a resource's collection and all of its items.
///
/// `/students/7?full=1` invalidates `/students`.
fn invalidation_prefix(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let trimmed = path.trim_start_matches('/');
    match trimmed.split('/').next() {
        Some(segment) if !segment.is_empty() => format!("/{}", segment),
        _ => "/".to_string(),
    }
}

fn update_config(
    config: &mut Config,
    base_url: Option<String>,
    ttl: Option<u64>,
    timeout: Option<u64>,
    token_storage: Option<TokenStorageKind>,
) -> Result<()> {
    let changed = base_url.is_some() || ttl.is_some() || timeout.is_some() || token_storage.is_some();

    if let Some(url) = base_url {
        config.base_url = Some(url);
    }
    if let Some(ttl) = ttl {
        config.default_ttl_secs = ttl;
    }
    if let Some(timeout) = timeout {
        config.request_timeout_secs = timeout;
    }
    if let Some(kind) = token_storage {
        config.token_storage = kind;
    }

    if changed {
        config.save().context("Failed to save config")?;
        println!("Configuration saved to {}", Config::config_path()?.display());
    }

    println!("{}", serde_json::to_string_pretty(config)?);
    println!("Effective base URL: {}", config.resolved_base_url());
    Ok(())
}
