//! HTTP server setup.
//!
//! # Responsibilities
//! - Compose the request pipeline from the enabled features
//! - Wire up request IDs and tracing spans around it
//! - Serve the router with peer addresses until shutdown
//!
//! # Design Decisions
//! - Every method and path reaches the forwarder via the fallback route
//! - Disabled features are left out of the router entirely
//! - Layer order, outermost first: request id, trace, CORS, session, audit

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware,
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::audit::filter::parse_filter_rules;
use crate::audit::publisher::AuditPublisher;
use crate::config::ProxyConfig;
use crate::http::forward::{ForwardError, Forwarder};
use crate::http::middleware::{
    audit_middleware, cors_layer, session_middleware, AuditState, SessionState,
};

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<Forwarder>,
}

/// HTTP server for the audit proxy.
pub struct HttpServer {
    router: Router,
    config: Arc<ProxyConfig>,
}

impl HttpServer {
    /// Build the server. `publisher` is `None` when auditing is off.
    pub fn new(
        config: Arc<ProxyConfig>,
        publisher: Option<AuditPublisher>,
    ) -> Result<Self, ForwardError> {
        let forwarder = Forwarder::new(&config.target, config.listener.debug)?;
        let router = build_router(&config, forwarder, publisher);
        Ok(Self { router, config })
    }

    /// The composed router, for driving the pipeline without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            target = %self.config.target.url,
            "HTTP server starting"
        );

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Compose the pipeline: CORS → session → audit → forwarder.
pub fn build_router(
    config: &ProxyConfig,
    forwarder: Forwarder,
    publisher: Option<AuditPublisher>,
) -> Router {
    let state = AppState {
        forwarder: Arc::new(forwarder),
    };

    let mut router = Router::new().fallback(proxy_handler).with_state(state);

    if let Some(publisher) = publisher {
        let rules = parse_filter_rules(&config.audit.filters);
        router = router.layer(middleware::from_fn_with_state(
            AuditState::new(rules, publisher),
            audit_middleware,
        ));
    }

    if let Some(session) = SessionState::from_config(&config.session) {
        router = router.layer(middleware::from_fn_with_state(session, session_middleware));
    }

    if config.cors.enabled {
        tracing::info!("CORS enabled");
        router = router.layer(cors_layer());
    }

    router
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let request_id = req
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                request_id = %request_id,
            )
        }))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Forward everything to the upstream target.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    state.forwarder.forward(request, peer).await
}
