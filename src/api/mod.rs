pub mod routes;

use crate::catalog::CategoryRegistry;
use crate::config::Config;
use crate::identity::IdentityProvider;
use crate::identity::kakao::KakaoIdentity;
use crate::ledger::store::RecordStore;
use crate::provider::ContentProvider;
use crate::provider::gemini::GeminiProvider;
use crate::session::Session;
use anyhow::{Context, Result};
use axum::Router;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use routes::ApiState;

impl ApiState {
    /// Wires the session and the optional external adapters from config.
    /// Missing credentials leave the matching adapter unset.
    pub fn from_config(
        config: Arc<Config>,
        store: Arc<dyn RecordStore>,
        registry: Arc<CategoryRegistry>,
    ) -> Self {
        let mut session = Session::open(&config, store, registry.clone());
        session.restore();

        let provider = GeminiProvider::from_config(&config)
            .map(|provider| Arc::new(provider) as Arc<dyn ContentProvider>)
            .map_err(|error| warn!(error = %error, "content generation disabled"))
            .ok();
        let identity = KakaoIdentity::from_config(&config)
            .map(|identity| Arc::new(identity) as Arc<dyn IdentityProvider>)
            .map_err(|error| warn!(error = %error, "Kakao login disabled"))
            .ok();

        Self {
            config,
            registry,
            session: Arc::new(Mutex::new(session)),
            provider,
            identity,
            access_token: Arc::new(StdMutex::new(None)),
        }
    }
}

pub async fn run_server(state: ApiState) -> Result<()> {
    let port = state.config.api_port;
    let app: Router = routes::router(state);

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server: {addr}"))?;

    info!(address = %addr, "Today's Challenge API server started");

    axum::serve(listener, app)
        .await
        .context("API server failed")?;

    Ok(())
}
