//! Terminal client for the financial simulation platform.
//!
//! SYSTEM CONTEXT
//! ==============
//! Runs the same session store and navigator as the browser app, with the
//! session persisted in a JSON state file instead of `localStorage`. Useful
//! for scripting logins against a backend and for checking what the route
//! guard does with a given path and session.


use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use finsim::auth::{self, AuthError};
use finsim::config::{ConfigError, PortalConfig};
use finsim::http::{ApiClient, ApiError};
use finsim::routes::{ImmediateLoader, Navigation, NavigationError, Navigator, RouteMeta, RouteTable, RouteTableError};
use finsim::session::{SessionError, SessionStore};
use finsim::storage::{FileStorage, StorageError};
use finsim::types::RegisterRequest;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error("route table is inconsistent: {0}")]
    RouteTable(#[from] RouteTableError),
    #[error("not signed in; run `finsim login` first")]
    NotSignedIn,
    #[error("no route named {0}")]
    UnknownRouteName(String),
    #[error("route {0} has path parameters; pass a concrete path instead")]
    ParameterizedRoute(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "finsim", about = "Financial simulation platform session and routing CLI")]
struct Cli {
    /// Backend origin [env: FINSIM_BASE_URL] [default: http://127.0.0.1:8000]
    #[arg(long)]
    base_url: Option<String>,

    /// API path prefix [env: FINSIM_API_PREFIX] [default: /api/v1]
    #[arg(long)]
    api_prefix: Option<String>,

    /// Request timeout in seconds [env: FINSIM_REQUEST_TIMEOUT_SECS] [default: 30]
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long, env = "FINSIM_STATE_FILE", default_value = ".finsim/session.json")]
    state_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the backend answers.
    Ping,
    /// Sign in and store the token and profile.
    Login {
        /// Username or email.
        username: String,
        #[arg(long, env = "FINSIM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account (does not sign in).
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "FINSIM_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Clear the stored session.
    Logout,
    /// Show the stored profile.
    Whoami {
        /// Re-fetch the profile from the backend first.
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// List the route table.
    Routes,
    /// Run a navigation through the guard with the stored session.
    Navigate {
        /// An absolute path, or a route name such as `AdminUsers`.
        target: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    init_tracing();
    let cli = Cli::parse();
    let config = portal_config(&cli)?;

    match cli.command {
        Command::Ping => {
            ApiClient::new(&config)?.ping().await?;
            println!("ok");
        }
        Command::Login { username, password } => {
            let (api, mut store) = open_session(&config, &cli.state_file)?;
            let user = auth::sign_in(&api, &mut store, &username, &password).await?;
            println!("signed in as {}", user.display_name().unwrap_or(&username));
        }
        Command::Register { email, username, password, full_name } => {
            let api = ApiClient::new(&config)?;
            let user = api.register(&RegisterRequest { email, username, password, full_name }).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Logout => {
            let (_, mut store) = open_session(&config, &cli.state_file)?;
            auth::sign_out(&mut store)?;
            println!("signed out");
        }
        Command::Whoami { refresh } => {
            let (api, mut store) = open_session(&config, &cli.state_file)?;
            if !store.is_authenticated() {
                return Err(CliError::NotSignedIn);
            }
            if refresh {
                auth::refresh_profile(&api, &mut store).await?;
            }
            println!("{}", serde_json::to_string_pretty(store.user())?);
        }
        Command::Routes => {
            let table = RouteTable::platform();
            table.validate()?;
            for line in render_routes(&table) {
                println!("{line}");
            }
        }
        Command::Navigate { target } => {
            let (_, store) = open_session(&config, &cli.state_file)?;
            let table = RouteTable::platform();
            let path = navigation_path(&table, &target)?;
            let mut navigator = Navigator::new(table, ImmediateLoader);
            let outcome = navigator.navigate(&path, store.session()).await?;
            for line in render_navigation(&outcome) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn portal_config(cli: &Cli) -> Result<PortalConfig, ConfigError> {
    PortalConfig::from_env_with(|key| match key {
        "FINSIM_BASE_URL" => cli.base_url.clone(),
        "FINSIM_API_PREFIX" => cli.api_prefix.clone(),
        "FINSIM_REQUEST_TIMEOUT_SECS" => cli.timeout_secs.map(|secs| secs.to_string()),
        _ => None,
    })
}

/// Paths pass through; anything else is looked up as a route name.
fn navigation_path(table: &RouteTable, target: &str) -> Result<String, CliError> {
    if target.starts_with('/') {
        return Ok(target.to_owned());
    }
    let path = table.path_for_name(target).ok_or_else(|| CliError::UnknownRouteName(target.to_owned()))?;
    if path.split('/').any(|segment| segment.starts_with(':')) {
        return Err(CliError::ParameterizedRoute(target.to_owned()));
    }
    Ok(path)
}

fn open_session(config: &PortalConfig, state_file: &Path) -> Result<(ApiClient, SessionStore<FileStorage>), CliError> {
    let api = ApiClient::new(config)?;
    let storage = FileStorage::open(state_file)?;
    let store = SessionStore::load(storage, api.headers().clone())?;
    tracing::debug!(state_file = %state_file.display(), authenticated = store.is_authenticated(), "session opened");
    Ok((api, store))
}

fn access_label(meta: RouteMeta) -> String {
    let mut flags = Vec::new();
    if meta.requires_auth {
        flags.push("auth");
    }
    if meta.guest_only {
        flags.push("guest");
    }
    if meta.requires_admin {
        flags.push("admin");
    }
    if flags.is_empty() { "public".to_owned() } else { flags.join(",") }
}

fn render_routes(table: &RouteTable) -> Vec<String> {
    table
        .entries()
        .into_iter()
        .map(|entry| {
            let target = match (entry.redirect, entry.component) {
                (Some(redirect), _) => format!("-> {redirect}"),
                (None, Some(component)) if component.is_lazy() => format!("{} (lazy)", component.page().chunk()),
                (None, Some(component)) => component.page().chunk().to_owned(),
                (None, None) => "-".to_owned(),
            };
            format!(
                "{:<28} {:<20} {:<36} {}",
                entry.full_path,
                entry.name.unwrap_or("-"),
                target,
                access_label(entry.meta)
            )
        })
        .collect()
}

fn render_navigation(nav: &Navigation) -> Vec<String> {
    let mut lines = vec![format!("requested  {}", nav.requested)];
    for hop in &nav.guard_redirects {
        lines.push(format!("redirect   {hop}"));
    }
    if let Some(from) = &nav.route.redirected_from {
        lines.push(format!("alias      {from} -> {}", nav.route.path()));
    }
    lines.push(format!("route      {} {}", nav.route.name.unwrap_or("(no match)"), nav.route.full_path()));
    for (key, value) in &nav.route.params {
        lines.push(format!("param      {key}={value}"));
    }
    for page in nav.route.lazy_components() {
        lines.push(format!("chunk      {}", page.chunk()));
    }
    if nav.admin_denied {
        lines.push("admin      denied".to_owned());
    }
    lines
}
