mod alerts;
mod api_client;
mod classifier;
mod config;
mod dashboard;
mod models;
mod refresher;
mod render;
mod settings_catalog;
mod store;
mod utils;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    api_client::ApiClient,
    config::Settings,
    models::{parse_capital, NewReputationEntry},
    refresher::{run_watch, Refresher},
    settings_catalog::parse_assignment,
    store::SqliteStore,
};

#[derive(Debug, Parser)]
#[command(name = "solbot-dashboard", version, about = "Console for the Solana trading bot backend")]
struct Cli {
    /// Override API_BASE_URL
    #[arg(long)]
    api_url: Option<String>,
    /// Bearer token to use instead of the saved session
    #[arg(long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Obtain a bearer token and save it as the session
    Login {
        #[arg(long, env = "WEB_USERNAME")]
        username: String,
        #[arg(long, env = "WEB_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the saved session
    Logout,
    /// Snapshot, held tokens, trades and recent alerts
    Overview {
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Held tokens with their security status
    Tokens {
        #[arg(long, default_value = "")]
        search: String,
    },
    Trades,
    #[command(subcommand)]
    Reputation(ReputationCmd),
    #[command(subcommand)]
    Settings(SettingsCmd),
    /// Replace the Gemini API key
    GeminiKey { key: String },
    /// Enable or disable TrustWallet auto-validation
    TrustwalletValidation {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
    /// Set the bot's initial capital in SOL
    InitialCapital { amount: String },
    /// Flip the backend's test mode
    TestMode,
    /// Sale alerts recorded locally
    Alerts {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Refresh periodically and print new sale alerts
    Watch,
    /// Local web dashboard plus periodic refresh
    Serve,
}

#[derive(Debug, Subcommand)]
enum ReputationCmd {
    List,
    Add {
        #[arg(long)]
        wallet: String,
        #[arg(long, default_value = "")]
        tags: String,
        #[arg(long, default_value = "")]
        behavior: String,
        #[arg(long)]
        score: String,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsCmd {
    Show,
    /// KEY=VALUE pairs, coerced by the parameter's type
    Set {
        #[arg(required = true)]
        assignments: Vec<String>,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(u) = cli.api_url {
        settings.override_api_url(&u).context("--api-url")?;
    }

    let store = SqliteStore::new(&settings.sqlite_path)?;
    store.init_db()?;

    let token = match cli.token.or_else(|| settings.api_token.clone()) {
        Some(t) => Some(t),
        None => store.load_session(&settings.api_base_url)?,
    };
    let api = ApiClient::from_settings(&settings, token).context("build http client")?;

    log::info!(
        "app.start backend={} session={} sqlite={}",
        settings.api_base_url,
        api.token().is_some(),
        store.path()
    );

    let refresher = Arc::new(Refresher::new(settings.clone(), api, store)?);
    run(cli.command, settings, refresher).await
}

async fn run(command: Command, settings: Settings, refresher: Arc<Refresher>) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            refresher.login(&username, &password).await?;
            println!("Logged in to {}.", refresher.api().base_url());
        }
        Command::Logout => {
            refresher.logout()?;
            println!("Session cleared.");
        }
        Command::Overview { search } => {
            refresher.refresh_all().await;
            print!("{}", render::overview(&refresher.view(), &search));
        }
        Command::Tokens { search } => {
            refresher.refresh_all().await;
            let view = refresher.view();
            print!("{}", render::notices(&view));
            print!("{}", render::token_rows(&view.filtered_rows(&search), &view.thresholds));
        }
        Command::Trades => {
            refresher.refresh_all().await;
            let view = refresher.view();
            print!("{}", render::notices(&view));
            print!("{}", render::trades(&view.trades));
        }
        Command::Reputation(ReputationCmd::List) => {
            refresher.refresh_reputation().await;
            let view = refresher.view();
            print!("{}", render::notices(&view));
            print!("{}", render::reputation(&view.reputation));
        }
        Command::Reputation(ReputationCmd::Add {
            wallet,
            tags,
            behavior,
            score,
        }) => {
            let entry = NewReputationEntry::from_form(&wallet, &tags, &behavior, &score)?;
            refresher.add_reputation(entry).await?;
            print!("{}", render::reputation(&refresher.view().reputation));
        }
        Command::Settings(SettingsCmd::Show) => {
            refresher.refresh_settings().await;
            let view = refresher.view();
            print!("{}", render::notices(&view));
            print!("{}", render::settings(&view.settings));
        }
        Command::Settings(SettingsCmd::Set { assignments }) => {
            let edits = assignments
                .iter()
                .map(|a| parse_assignment(a))
                .collect::<Result<Vec<_>, _>>()?;
            if !refresher.refresh_settings().await {
                anyhow::bail!("could not load current settings; nothing saved");
            }
            refresher.save_settings(edits).await?;
            print!("{}", render::settings(&refresher.view().settings));
        }
        Command::GeminiKey { key } => {
            refresher.update_gemini_api_key(key.trim()).await?;
            println!("Gemini API key updated.");
        }
        Command::TrustwalletValidation { state } => {
            refresher.set_trustwallet_validation(state == "on").await?;
            println!("TrustWallet auto-validation {state}.");
        }
        Command::InitialCapital { amount } => {
            let amount = parse_capital(&amount)?;
            refresher.set_initial_capital(amount).await?;
            println!("Initial capital set to {amount} SOL.");
        }
        Command::TestMode => {
            let msg = refresher.toggle_test_mode().await?;
            println!("{}", if msg.is_empty() { "Test mode toggled." } else { msg.as_str() });
        }
        Command::Alerts { limit } => {
            let rows = refresher.store().fetch_alerts(limit)?;
            print!("{}", render::alerts(&rows));
        }
        Command::Watch => {
            run_watch(refresher.clone(), settings.refresh_secs, |report| {
                for a in &report.alerts {
                    println!("{}", render::alert_line(a));
                }
            })
            .await?;
        }
        Command::Serve => {
            let st = settings.clone();
            let r = refresher.clone();
            let url = format!("http://{}:{}/", st.dashboard_host, st.dashboard_port);
            tokio::spawn(async move {
                if let Err(e) = dashboard::serve_dashboard(st, r).await {
                    log::error!("dashboard.error {}", e);
                }
            });

            if settings.dashboard_open_browser {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(650)).await;
                    let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
                });
            }

            run_watch(refresher, settings.refresh_secs, |report| {
                for a in &report.alerts {
                    log::info!("{}", render::alert_line(a));
                }
            })
            .await?;
        }
    }
    Ok(())
}
