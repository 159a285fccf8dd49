use std::{sync::Arc, time::Duration};

use agora_reqwest::SessionGate;
use agora_sessions::{
    coordinator::RenewalCoordinator,
    notify::NullNotificationStream,
    renewal::RenewalClient,
    store::{FileSessionStore, SessionStore},
    terminator::{NullNavigator, SessionTerminator},
    AccessToken, GateConfig, RenewalToken, Session, UnixMillis,
};
use clap::Parser;
use reqwest_middleware::ClientBuilder;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The board API's base address
    #[arg(short, long, env)]
    base_url: reqwest::Url,

    /// An access token from a prior sign-in
    #[arg(short = 't', long, env, hide_env_values = true)]
    access_token: String,

    /// The renewal token issued alongside it
    #[arg(short, long, env, hide_env_values = true)]
    renewal_token: String,

    /// When the access token expires (seconds or milliseconds since epoch)
    #[arg(short = 'x', long, env)]
    access_expiry: u64,

    /// The local file used to persist the session
    #[arg(short = 'f', long, env, value_name = "FILE", default_value = ".session.json")]
    session_file: std::path::PathBuf,

    /// The path polled on every tick
    #[arg(short, long, env, default_value = "/boards")]
    path: String,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let store = Arc::new(FileSessionStore::new(opts.session_file));
    let session = Session::new(
        AccessToken::from(opts.access_token),
        Some(RenewalToken::from(opts.renewal_token)),
        Some(UnixMillis::from_raw(opts.access_expiry)),
    );
    store
        .write(&session)
        .await
        .map_err(|error| color_eyre::eyre::eyre!(error))?;

    let config = Arc::new(GateConfig::new(opts.base_url.clone()));
    let notifications = Arc::new(NullNotificationStream);
    let terminator = SessionTerminator::new(
        store.clone(),
        notifications.clone(),
        Arc::new(NullNavigator),
        "/auth/sign-in",
    );
    let renewer = Arc::new(RenewalClient::new(
        reqwest::Client::new(),
        config.renew_url(),
        store.clone(),
    ));
    let coordinator =
        RenewalCoordinator::new(renewer, store.clone(), notifications, terminator.clone());

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(SessionGate::new(config, store, coordinator, terminator))
        .build();

    let url = opts.base_url.join(opts.path.trim_start_matches('/'))?;

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        match client.get(url.clone()).send().await {
            Ok(response) => {
                tracing::info!(status = response.status().as_u16(), "polled the board")
            }
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn std::error::Error),
                    "request failed, session is gone"
                );
                break;
            }
        }
    }

    Ok(())
}
