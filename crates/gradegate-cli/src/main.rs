//! `gradegate`: command-line client for the gradegated login guard.
//!
//! Every subcommand is one D-Bus call on `org.gradegate.Guard1`; replies are
//! printed as pretty JSON.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[zbus::proxy(
    interface = "org.gradegate.Guard1",
    default_service = "org.gradegate.Guard1",
    default_path = "/org/gradegate/Guard1"
)]
trait Guard {
    fn issue_challenge(&self) -> zbus::Result<String>;

    fn login(
        &self,
        identity: &str,
        credential: &str,
        proof_token: &str,
        proof_answer: &str,
        secondary_proof: &str,
        session_id: &str,
    ) -> zbus::Result<String>;

    fn unlock(&self, identity: &str) -> zbus::Result<bool>;

    fn reset_panic(&self) -> zbus::Result<bool>;

    fn identity_state(&self, identity: &str) -> zbus::Result<String>;

    fn status(&self) -> zbus::Result<String>;

    fn import_roster(&self, entries_json: &str) -> zbus::Result<String>;

    fn recent_events(&self, limit: u32) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "gradegate")]
#[command(about = "Login guard client: challenges, logins, unlocks and the security log", long_about = None)]
#[command(version)]
struct Cli {
    /// Talk to a daemon on the session bus (development mode)
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a new arithmetic challenge
    Challenge,

    /// Attempt a login
    Login {
        /// Identity (e.g. student ID)
        identity: String,

        /// Credential for the identity
        credential: String,

        /// Challenge token; when omitted a challenge is fetched and answered interactively
        #[arg(long)]
        token: Option<String>,

        /// Answer to the challenge named by --token
        #[arg(long, requires = "token")]
        answer: Option<String>,

        /// Secondary proof, required once an identity is near lockout
        #[arg(long)]
        secondary: Option<String>,

        /// Session identifier recorded in the security log
        #[arg(long)]
        session: Option<String>,
    },

    /// Clear an identity's lock and failure counter (root)
    Unlock {
        identity: String,
    },

    /// Lower the global panic flag early (root)
    ResetPanic,

    /// Show the lockout state of one identity (root)
    State {
        identity: String,
    },

    /// Show daemon status
    Status,

    /// Import roster entries from a JSON array file (root)
    Import {
        /// Path to a JSON file: `[{"identity": "...", "credential": "...", ...}]`
        file: PathBuf,
    },

    /// Show the most recent security events (root)
    Events {
        /// Number of events to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let conn = if cli.session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = GuardProxy::new(&conn)
        .await
        .context("gradegated is not reachable; is the daemon running?")?;

    match cli.command {
        Commands::Challenge => print_json(&proxy.issue_challenge().await?),
        Commands::Login {
            identity,
            credential,
            token,
            answer,
            secondary,
            session,
        } => {
            let (token, answer) = match (token, answer) {
                (Some(token), Some(answer)) => (token, answer),
                (Some(token), None) => (token, prompt("answer: ")?),
                (None, _) => answer_challenge(&proxy).await?,
            };
            let reply = proxy
                .login(
                    &identity,
                    &credential,
                    &token,
                    &answer,
                    secondary.as_deref().unwrap_or(""),
                    session.as_deref().unwrap_or(""),
                )
                .await?;
            print_json(&reply);
        }
        Commands::Unlock { identity } => {
            let cleared = proxy.unlock(&identity).await?;
            tracing::debug!(identity, cleared, "unlock");
            println!("{}", if cleared { "unlocked" } else { "failed" });
        }
        Commands::ResetPanic => {
            let reset = proxy.reset_panic().await?;
            println!("{}", if reset { "panic cleared" } else { "failed" });
        }
        Commands::State { identity } => print_json(&proxy.identity_state(&identity).await?),
        Commands::Status => print_json(&proxy.status().await?),
        Commands::Import { file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            serde_json::from_str::<serde_json::Value>(&body)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            print_json(&proxy.import_roster(&body).await?);
        }
        Commands::Events { limit } => print_json(&proxy.recent_events(limit).await?),
    }

    Ok(())
}

/// Fetch a challenge, show its prompt and read the answer from stdin.
async fn answer_challenge(proxy: &GuardProxy<'_>) -> Result<(String, String)> {
    let reply = proxy.issue_challenge().await?;
    let challenge: serde_json::Value =
        serde_json::from_str(&reply).context("malformed challenge reply")?;
    let token = challenge["token"]
        .as_str()
        .context("challenge reply has no token")?
        .to_string();
    let question = challenge["prompt"].as_str().unwrap_or("?");
    let answer = prompt(&format!("{question} = "))?;
    Ok((token, answer))
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_json(reply: &str) {
    println!("{}", pretty(reply));
}

/// Pretty-print a JSON reply; anything unparseable is shown as-is.
fn pretty(reply: &str) -> String {
    serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| reply.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_login_arguments_parse() {
        let cli = Cli::try_parse_from([
            "gradegate", "login", "S001", "4821", "--token", "t", "--answer", "7", "--session",
            "abc",
        ])
        .unwrap();
        match cli.command {
            Commands::Login {
                identity,
                token,
                answer,
                secondary,
                session,
                ..
            } => {
                assert_eq!(identity, "S001");
                assert_eq!(token.as_deref(), Some("t"));
                assert_eq!(answer.as_deref(), Some("7"));
                assert_eq!(secondary, None);
                assert_eq!(session.as_deref(), Some("abc"));
            }
            _ => panic!("expected login"),
        }
    }

    #[test]
    fn test_answer_requires_token() {
        assert!(Cli::try_parse_from(["gradegate", "login", "S001", "4821", "--answer", "7"]).is_err());
    }

    #[test]
    fn test_pretty_falls_back_to_raw() {
        assert_eq!(pretty("not json"), "not json");
        assert_eq!(pretty(r#"{"a":1}"#), "{\n  \"a\": 1\n}");
    }
}
