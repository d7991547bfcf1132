//! Command-line demo for session-auth
//!
//! ```bash
//! export SESSION_AUTH_BASE_URL=https://id.example.com/api
//! session-cli login alice --password "correct horse"
//! session-cli status
//! session-cli get /orders
//! session-cli logout
//! ```

use clap::{Parser, Subcommand};
use session_auth::store::{CredentialStore, FileStore};
use session_auth::{SessionConfig, SessionManager, SessionStatus};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "session-cli", about = "Manage an authenticated session")]
struct Cli {
    /// Store name under the config directory
    #[arg(long, default_value = "session-cli")]
    store: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and persist credentials
    Login {
        /// Username or email
        identifier: String,
        /// Password
        #[arg(long, env = "SESSION_AUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Restore the stored session
    Restore,
    /// Show stored credential state without contacting the provider
    Status,
    /// Send an authenticated GET request
    Get {
        /// Path or absolute URL
        path: String,
        /// Base URL for relative paths (defaults to the provider URL)
        #[arg(long, env = "SESSION_AUTH_API_URL")]
        api_url: Option<String>,
    },
    /// Log out and clear stored credentials
    Logout,
}

#[cfg(feature = "keyring")]
fn open_store(name: &str) -> CredentialStore {
    use session_auth::store::KeyringStore;
    CredentialStore::new(KeyringStore::new(name), FileStore::named(name))
}

#[cfg(not(feature = "keyring"))]
fn open_store(name: &str) -> CredentialStore {
    CredentialStore::new(
        FileStore::named(&format!("{name}-tokens")),
        FileStore::named(name),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: info for the demo and library, warn for deps
    // Override with RUST_LOG env var for more detail
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "session_cli=info,session_auth=info,warn".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let store = Arc::new(open_store(&cli.store));

    // Status only inspects local storage
    if matches!(cli.command, Command::Status) {
        return status(&store).await;
    }

    let config = SessionConfig::from_env()?;
    let session = SessionManager::from_config(&config, store)?;

    match cli.command {
        Command::Login {
            identifier,
            password,
        } => {
            session.login(&identifier, &password).await?;
            print_session(&session);
        }
        Command::Restore => {
            let status = session.restore_on_launch().await;
            println!("Restore: {status}");
            print_session(&session);
        }
        Command::Get { path, api_url } => {
            if session.restore_on_launch().await != SessionStatus::Authenticated {
                anyhow::bail!("not signed in; run `session-cli login` first");
            }
            let base = api_url.unwrap_or_else(|| config.provider.base_url.clone());
            let client = session
                .authorized_client(reqwest::Client::new())
                .with_base_url(base);
            let response = client.send(client.get(&path)).await?;
            println!("{}", response.status());
            println!("{}", response.text().await?);
        }
        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        Command::Status => status(session.store()).await?,
    }

    session.scheduler().stop();
    Ok(())
}

async fn status(store: &CredentialStore) -> anyhow::Result<()> {
    let Some(pair) = store.get().await? else {
        println!("No stored credentials");
        return Ok(());
    };

    let claims = session_auth::jwt::decode(&pair.access_token);
    println!(
        "Subject:        {}",
        claims
            .as_ref()
            .and_then(|c| c.subject.as_deref())
            .unwrap_or("-")
    );
    println!("Refresh token:  {}", pair.refresh_token.is_some());
    println!("Expired:        {}", store.is_expired().await);
    println!(
        "Expires in:     {}s",
        store.time_until_expiry().await.as_secs()
    );
    if let Some(claims) = claims.filter(|c| !c.scopes.is_empty()) {
        let scopes: Vec<_> = claims.scopes.into_iter().collect();
        println!("Scopes:         {}", scopes.join(" "));
    }
    Ok(())
}

fn print_session(session: &SessionManager) {
    let snapshot = session.snapshot();
    println!("Status:  {}", snapshot.status);
    if let Some(user) = snapshot.user {
        println!("User:    {} ({})", user.username, user.id);
    }
    if let Some(tenant) = snapshot.tenant {
        println!("Tenant:  {} ({})", tenant.name, tenant.id);
    }
    if let Some(error) = snapshot.last_error {
        println!("Error:   {error}");
    }
}
