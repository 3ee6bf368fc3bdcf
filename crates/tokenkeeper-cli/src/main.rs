//! tokenkeeper - log in to a REST backend and make authenticated calls from
//! the terminal, with the session renewed behind the scenes.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenkeeper_core::api::{ApiRequest, Method, Navigator};
use tokenkeeper_core::{Clock, Config, SessionManager, SystemClock};

const USAGE: &str = "\
Usage: tokenkeeper <command>

Commands:
  login [email]                 Log in and store the session
  status                        Show the current session
  renew                         Renew the access credential now
  request <METHOD> <PATH> [BODY]  Send an authenticated request (BODY is JSON)
  logout                        End the session";

/// Navigator for a terminal: there is no view to route, so tell the user.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn current_view(&self) -> String {
        "cli".to_string()
    }

    fn redirect_to_login(&self) {
        eprintln!("Session expired. Run `tokenkeeper login` to sign in again.");
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_to_file = std::env::var("TOKENKEEPER_LOG_FILE").is_ok_and(|v| v == "1");
    let log_dir = config.cache_dir().ok().filter(|_| log_to_file);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "tokenkeeper.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    if let Ok(url) = std::env::var("TOKENKEEPER_API_URL") {
        config.api_base_url = url;
    }
    if let Ok(url) = std::env::var("TOKENKEEPER_AUTH_URL") {
        config.auth_base_url = url;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = load_config()?;
    let _log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let manager = SessionManager::from_config(&config, Arc::new(TerminalNavigator))?;
    info!(command = %command, "tokenkeeper starting");

    match command.as_str() {
        "login" => login(&manager, args.get(1).cloned()).await,
        "status" => {
            status(&manager);
            Ok(())
        }
        "renew" => {
            manager.coordinator().request_refresh().await?;
            println!("Session renewed.");
            status(&manager);
            Ok(())
        }
        "request" => request(&manager, &args[1..]).await,
        "logout" => {
            manager.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

async fn login(manager: &SessionManager, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => {
            print!("Email: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    // rpassword reads synchronously from the terminal
    let password = tokio::task::block_in_place(|| rpassword::prompt_password("Password: "))
        .context("Failed to read password")?;

    let session = manager.login(&email, &password).await?;
    println!("Logged in as {} ({})", session.display_name, session.role);
    Ok(())
}

fn status(manager: &SessionManager) {
    let Some(session) = manager.current_session() else {
        println!("Not logged in.");
        return;
    };
    let now = SystemClock.now();

    println!("User:      {} ({})", session.display_name, session.user_id);
    println!("Role:      {}", session.role);
    match session.expires_at() {
        Some(expiry) if expiry > now => println!(
            "Access:    valid for {} more minutes ({})",
            session.minutes_until_expiry(now),
            expiry.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        Some(_) => println!("Access:    expired"),
        None => println!("Access:    unreadable credential"),
    }
    println!(
        "Renewable: {}",
        if session.has_refresh_token() { "yes" } else { "no" }
    );
    println!(
        "Logged in: {}",
        if manager.is_logged_in() { "yes" } else { "no" }
    );
}

async fn request(manager: &SessionManager, args: &[String]) -> Result<()> {
    let (method, path) = match (args.first(), args.get(1)) {
        (Some(method), Some(path)) => (method, path),
        _ => anyhow::bail!("Usage: tokenkeeper request <METHOD> <PATH> [BODY]"),
    };
    let method = method
        .to_ascii_uppercase()
        .parse::<Method>()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut request = ApiRequest::new(method, path.as_str());
    if let Some(body) = args.get(2) {
        let body: serde_json::Value =
            serde_json::from_str(body).context("Request body is not valid JSON")?;
        request = request.with_body(body);
    }

    let response = manager.gate().send(request).await?;
    match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.body),
    }
    Ok(())
}
