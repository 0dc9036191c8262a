//! Main sync server.

use crate::api;
use crate::auth::TokenAuthority;
use crate::config::ServerConfig;
use crate::decompress::{decompress_body, BodyDecoding};
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, SyncHandler};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use fleetgate_core::Database;
use fleetgate_governance::{Governance, SqliteGovernanceStore};
use fleetgate_protocol::{
    EventUploadResponse, FrameDecoder, PostflightResponse, RuleDownloadResponse, SyncPhase,
    SyncPolicy,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub(crate) sync: SyncHandler,
    pub(crate) governance: Arc<Governance<SqliteGovernanceStore>>,
    pub(crate) auth: Arc<TokenAuthority>,
    pub(crate) db: Database,
}

/// Runs store work off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
}

/// The sync server.
///
/// Serves the four agent sync phases and the governance API from one
/// store. Handlers keep no state between requests, so several servers
/// may share a file-backed store.
///
/// # Example
///
/// ```rust,ignore
/// use fleetgate_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::open(ServerConfig::default())?;
/// let listener = tokio::net::TcpListener::bind(server.config().bind_addr).await?;
/// server.serve(listener, async { let _ = tokio::signal::ctrl_c().await; }).await?;
/// ```
pub struct SyncServer {
    state: AppState,
    config: Arc<ServerConfig>,
}

impl SyncServer {
    /// Opens the configured store and builds the server on it.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let db = Database::open(config.store.clone())?;
        Self::with_database(config, db)
    }

    /// Builds the server on an already open store.
    pub fn with_database(config: ServerConfig, db: Database) -> ServerResult<Self> {
        let auth = TokenAuthority::new(config.auth.clone(), db.clone())?;
        let governance = Governance::new(SqliteGovernanceStore::new(db.clone()), config.governance);
        let context = Arc::new(HandlerContext::new(config.clone(), db.clone()));

        Ok(Self {
            state: AppState {
                sync: SyncHandler::new(context),
                governance: Arc::new(governance),
                auth: Arc::new(auth),
                db,
            },
            config: Arc::new(config),
        })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The store the server runs on.
    pub fn database(&self) -> &Database {
        &self.state.db
    }

    /// The token authority, for minting operator tokens.
    pub fn auth(&self) -> &TokenAuthority {
        &self.state.auth
    }

    /// Builds the HTTP router.
    pub fn router(&self) -> Router {
        let decoding = BodyDecoding {
            decoder: FrameDecoder::new().with_max_decoded_len(self.config.max_decoded_bytes),
            max_body_bytes: self.config.max_body_bytes,
        };

        let sync = SyncPhase::ALL
            .into_iter()
            .fold(Router::new(), |router, phase| {
                let path = format!("/{}/:device_id", phase.as_str());
                match phase {
                    SyncPhase::Preflight => router.route(&path, post(preflight)),
                    SyncPhase::EventUpload => router.route(&path, post(event_upload)),
                    SyncPhase::RuleDownload => router.route(&path, post(rule_download)),
                    SyncPhase::Postflight => router.route(&path, post(postflight)),
                }
            })
            .layer(middleware::from_fn_with_state(decoding, decompress_body));

        Router::new()
            .merge(sync)
            .nest("/api", api::routes())
            .route("/api/config", get(api::public_config))
            .route("/auth/logout", post(api::logout))
            .route("/ping", get(api::ping))
            .layer(RequestBodyLimitLayer::new(self.config.max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serves on `listener` until `shutdown` resolves.
    ///
    /// The expired-session sweep runs alongside and stops with the server.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let reaper = tokio::spawn(reap_sessions(
            self.state.db.clone(),
            self.config.session_sweep_interval,
            stop_rx,
        ));

        let addr = listener.local_addr()?;
        tracing::info!(
            %addr,
            threshold = self.config.governance.vote_threshold,
            "sync server listening"
        );
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = stop_tx.send(true);
        if let Err(e) = reaper.await {
            tracing::warn!(error = %e, "session reaper did not stop cleanly");
        }
        tracing::info!("sync server stopped");
        result.map_err(ServerError::from)
    }
}

/// Deletes expired sessions every `interval` until `stop` flips.
pub(crate) async fn reap_sessions(
    db: Database,
    interval: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let db = db.clone();
                match blocking(move || Ok(db.purge_expired_sessions(Utc::now())?)).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "purged expired sessions"),
                    Err(e) => tracing::warn!(error = %e, "session sweep failed"),
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

async fn preflight(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<SyncPolicy>> {
    let content_type = content_type(&headers);
    let sync = state.sync.clone();
    let policy = blocking(move || Ok(sync.preflight(&device_id, &body, &content_type))).await?;
    Ok(Json(policy))
}

async fn event_upload(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> ServerResult<Json<EventUploadResponse>> {
    let sync = state.sync.clone();
    let response = blocking(move || Ok(sync.event_upload(&device_id, &body))).await?;
    Ok(Json(response))
}

async fn rule_download(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> ServerResult<Json<RuleDownloadResponse>> {
    let sync = state.sync.clone();
    Ok(Json(blocking(move || sync.rule_download(&device_id, &body)).await?))
}

async fn postflight(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ServerResult<Json<PostflightResponse>> {
    let sync = state.sync.clone();
    Ok(Json(blocking(move || Ok(sync.postflight(&device_id))).await?))
}
