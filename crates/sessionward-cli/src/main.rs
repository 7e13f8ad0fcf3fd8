//! sessionward - sign in to an API, keep the session alive, and make
//! authenticated calls from the terminal.
//!
//! Credentials are kept in the OS keychain by default, so a session started
//! by `sessionward login` is picked up by every later invocation.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionward_core::{
    AuthError, Config, ProfileUpdate, RegistrationForm, Session, SessionManager, SessionPhase,
};

// ============================================================================
// Constants
// ============================================================================

/// Prefix of the daily log files written under `log_dir`
const LOG_FILE_PREFIX: &str = "sessionward.log";

/// Time given to the logout notification before the process exits
const LOGOUT_NOTIFY_GRACE_MS: u64 = 500;

const USAGE: &str = "\
Usage: sessionward <command>

Commands:
  login [email]                 Sign in (prompts for the password)
  logout                        Sign out and forget stored credentials
  status [--json]               Show who is signed in
  refresh                       Exchange the refresh token now
  register                      Create an account
  update-profile key=value...   Change profile fields (firstName, lastName, ...)
  get <path>                    GET an API path with the current session";

/// Initialize the tracing subscriber for logging.
///
/// Returns the file writer guard when file logging is on; it must live
/// until exit or buffered lines are lost.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=sessionward_core=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
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
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    let _guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[2..];

    info!(command = %command, api = %config.api_base_url, "sessionward starting");
    let manager = SessionManager::from_config(&config)?;

    match command.as_str() {
        "login" => login(&manager, &mut config, rest.first().map(String::as_str)).await,
        "logout" => logout(&manager).await,
        "status" => status(&manager, rest.iter().any(|a| a == "--json")).await,
        "refresh" => refresh(&manager).await,
        "register" => register(&manager).await,
        "update-profile" => update_profile(&manager, rest).await,
        "get" => match rest.first() {
            Some(path) => get(&manager, path).await,
            None => bail!("Usage: sessionward get <path>"),
        },
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn login(manager: &SessionManager, config: &mut Config, email: Option<&str>) -> Result<()> {
    let email = match email {
        Some(email) => email.to_string(),
        None => {
            let remembered = config.last_email.clone().unwrap_or_default();
            let label = if remembered.is_empty() {
                "Email: ".to_string()
            } else {
                format!("Email [{}]: ", remembered)
            };
            let entered = prompt(&label)?;
            if entered.is_empty() { remembered } else { entered }
        }
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    manager.login(&email, &password).await.map_err(describe)?;

    if config.last_email.as_deref() != Some(email.as_str()) {
        config.last_email = Some(email);
        if let Err(e) = config.save() {
            tracing::warn!(error = %e, "Failed to remember email");
        }
    }

    print_session(&manager.session());
    Ok(())
}

async fn logout(manager: &SessionManager) -> Result<()> {
    manager.bootstrap().await;
    let was_signed_in = manager.session().is_authenticated();
    manager.logout().await;

    if was_signed_in {
        tokio::time::sleep(Duration::from_millis(LOGOUT_NOTIFY_GRACE_MS)).await;
        println!("Signed out.");
    } else {
        println!("Not signed in.");
    }
    Ok(())
}

async fn status(manager: &SessionManager, as_json: bool) -> Result<()> {
    manager.bootstrap().await;
    let session = manager.session();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print_session(&session);
    }
    Ok(())
}

async fn refresh(manager: &SessionManager) -> Result<()> {
    manager.bootstrap().await;
    require_session(&manager.session())?;

    manager.refresh().await.map_err(describe)?;
    println!("Access token refreshed.");
    Ok(())
}

async fn register(manager: &SessionManager) -> Result<()> {
    let username = prompt("Username: ")?;
    let email = prompt("Email: ")?;
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    let confirm = rpassword::prompt_password("Confirm password: ").context("Failed to read password")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let mut form = RegistrationForm::new(&username, &email, &password);
    let first_name = prompt("First name (optional): ")?;
    let last_name = prompt("Last name (optional): ")?;
    if !first_name.is_empty() || !last_name.is_empty() {
        form = form.with_name(&first_name, &last_name);
    }

    manager.register(&form).await.map_err(describe)?;
    println!("Account created. Run `sessionward login {}` to sign in.", email);
    Ok(())
}

async fn update_profile(manager: &SessionManager, pairs: &[String]) -> Result<()> {
    let mut update = ProfileUpdate::default();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected key=value, got '{}'", pair))?;
        update.set(key.trim(), value).map_err(anyhow::Error::msg)?;
    }
    if update.is_empty() {
        bail!("Usage: sessionward update-profile key=value...");
    }

    manager.bootstrap().await;
    require_session(&manager.session())?;

    manager.update_profile(&update).await.map_err(describe)?;
    print_session(&manager.session());
    Ok(())
}

async fn get(manager: &SessionManager, path: &str) -> Result<()> {
    manager.bootstrap().await;

    let body: serde_json::Value = manager
        .get_json(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn require_session(session: &Session) -> Result<()> {
    if session.is_authenticated() {
        return Ok(());
    }
    match session.signed_out_reason() {
        Some(reason) => bail!("{}", reason.message()),
        None => bail!("Not signed in. Run `sessionward login` first."),
    }
}

/// Turn an auth failure into a message with any per-field detail
fn describe(err: AuthError) -> anyhow::Error {
    let mut message = err.to_string();
    if let Some(fields) = err.field_errors() {
        for (field, problems) in fields {
            for problem in problems {
                message.push_str(&format!("\n  {}: {}", field, problem));
            }
        }
    }
    anyhow::Error::msg(message)
}

fn print_session(session: &Session) {
    match (session.phase(), session.user()) {
        (SessionPhase::Authenticated, Some(user)) => {
            println!("Signed in as {} ({})", user.display_name(), user.username);
            if let Some(ref email) = user.email {
                let verified = if user.is_email_verified { "verified" } else { "unverified" };
                println!("  email:  {} ({})", email, verified);
            }
            if let Some(at) = session.authenticated_at() {
                println!("  since:  {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
            }
        }
        _ => match session.signed_out_reason() {
            Some(reason) => println!("Not signed in. {}", reason.message()),
            None => println!("Not signed in."),
        },
    }
}
