//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. One shared `AppState`
//! wires the entitlement store, orchestrator, and history ledger together;
//! routing is a plain (method, path) match.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::db::MongoClient;
use crate::diagnosis::Orchestrator;
use crate::entitlement::{
    AccountEntitlements, Entitlements, GuestCounterStore, MemoryAccountEntitlements,
    MongoAccountEntitlements,
};
use crate::history::HistoryStore;
use crate::oracle::HttpOracle;
use crate::routes;
use crate::types::CropgateError;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub entitlements: Arc<Entitlements>,
    pub orchestrator: Arc<Orchestrator>,
    pub history: Arc<HistoryStore>,
    pub started_at: Instant,
    /// Whether the remote account store was reachable at startup
    pub account_store_connected: bool,
}

impl AppState {
    /// Build state from configuration, connecting to external services.
    ///
    /// In dev mode an unreachable MongoDB falls back to a volatile in-memory
    /// account store; in production it is a startup failure.
    pub async fn from_args(args: Args) -> Result<Self, CropgateError> {
        let (accounts, connected): (Arc<dyn AccountEntitlements>, bool) =
            match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
                Ok(mongo) => (Arc::new(MongoAccountEntitlements::new(mongo)), true),
                Err(e) if args.dev_mode => {
                    warn!("MongoDB unavailable, using in-memory account store: {}", e);
                    (Arc::new(MemoryAccountEntitlements::default()), false)
                }
                Err(e) => return Err(e),
            };

        let entitlements = Arc::new(Entitlements::new(
            GuestCounterStore::new(args.data_dir.join("guest_counters.json")),
            accounts,
            args.guest_limit,
            args.account_limit,
        ));

        let history = Arc::new(HistoryStore::new(
            args.data_dir.join("history"),
            args.max_history_items,
            args.history_capacity_bytes,
        ));

        let oracle = Arc::new(HttpOracle::new(
            args.oracle_url.clone(),
            args.oracle_api_key.clone().unwrap_or_default(),
            args.oracle_model.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            oracle,
            Arc::clone(&entitlements),
            Arc::clone(&history),
        ));

        Ok(Self {
            args,
            entitlements,
            orchestrator,
            history,
            started_at: Instant::now(),
            account_store_connected: connected,
        })
    }
}

/// Run the HTTP server until the process is stopped
pub async fn run(state: Arc<AppState>) -> Result<(), CropgateError> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| CropgateError::Internal(format!("failed to bind {}: {}", state.args.listen, e)))?;

    info!("Cropgate listening on {}", state.args.listen);
    if state.args.dev_mode {
        warn!("Development mode enabled - simulate-payment route active");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move {
                            Ok::<_, CropgateError>(handle_request(state, addr, req).await)
                        }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Dispatch one request to its route handler
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(%method, %path, peer = %addr, "Incoming request");

    match (method, path.as_str()) {
        (Method::GET, "/health" | "/healthz") => routes::health_check(&state),

        (Method::POST, "/api/diagnose") => routes::handle_diagnose(req, state).await,

        (Method::GET, "/api/history") => {
            routes::handle_history_list(req.headers(), state).await
        }
        (Method::DELETE, p) if p.starts_with("/api/history/") => {
            let id_segment = p.trim_start_matches("/api/history/").to_string();
            routes::handle_history_delete(req.headers(), &id_segment, state).await
        }

        (Method::GET, "/api/entitlement") => {
            routes::handle_entitlement(req.headers(), state).await
        }
        (Method::POST, "/api/session/signin") => routes::handle_sign_in(req, state).await,
        (Method::POST, "/api/payment/simulate") => {
            routes::handle_simulate_payment(req, state).await
        }

        (Method::POST, "/webhook/payment") => routes::handle_payment_webhook(req, state).await,

        _ => routes::error_response(StatusCode::NOT_FOUND, "not found"),
    }
}
