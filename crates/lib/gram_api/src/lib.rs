//! # gram_api
//!
//! HTTP request pipeline for Gram.
//!
//! Every request passes, outermost first, through domain admission, CORS
//! (including chat-session origin checks), session and admin-override
//! extraction and request logging. Each route is then wrapped in its own
//! endpoint span, error reporting, panic recovery and authentication before
//! reaching its handler.

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post};
use gram_core::auth::jwt::TokenCodec;
use gram_core::auth::keys::ApiKeyManager;
use gram_core::auth::resolver::AuthResolver;
use gram_core::auth::sessions::SessionManager;
use gram_core::auth::{ApiKeyScope, AuthPolicy, Scheme};
use gram_core::cache::CacheBackend;
use gram_core::chat_sessions::ChatSessionManager;
use gram_core::store::Stores;

use crate::config::ApiConfig;
use crate::handlers::{chat_sessions, domains, health, mcp};
use crate::middleware::endpoint::Endpoint;
use crate::services::mcp::{JsonRpcGateway, McpGateway};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub stores: Stores,
    pub auth: AuthResolver,
    pub mcp: Arc<dyn McpGateway>,
}

impl AppState {
    /// Wire the auth managers over `stores` and `cache`.
    pub fn new(
        config: ApiConfig,
        stores: Stores,
        cache: Arc<dyn CacheBackend>,
        codec: TokenCodec,
    ) -> Self {
        let sessions = SessionManager::new(Arc::clone(&cache), Arc::clone(&stores.identities));
        let api_keys = ApiKeyManager::new(
            Arc::clone(&stores.api_keys),
            Arc::clone(&stores.identities),
            config.environment.key_environment(),
        );
        let chat_sessions = ChatSessionManager::new(codec, cache);
        let auth = AuthResolver::new(
            sessions,
            api_keys,
            chat_sessions,
            Arc::clone(&stores.projects),
        );

        Self {
            config,
            stores,
            auth,
            mcp: Arc::new(JsonRpcGateway),
        }
    }

    pub fn with_mcp_gateway(mut self, gateway: Arc<dyn McpGateway>) -> Self {
        self.mcp = gateway;
        self
    }
}

/// Builds the Axum router with all routes, middleware and shared state.
pub fn router(state: AppState) -> Router {
    let session_project = AuthPolicy::session_project;
    let chat_issuer = || AuthPolicy::session_project().api_key(ApiKeyScope::Chat);
    let health_route = || Endpoint::public("health").wrap(&state, get(health::health));

    let routes = Router::new()
        .route("/health", health_route())
        .route("/healthz", health_route())
        .route("/livez", health_route())
        .route(
            "/rpc/domain.get",
            Endpoint::authenticated("domain.get", session_project())
                .wrap(&state, get(domains::get_domain)),
        )
        .route(
            "/rpc/domain.register",
            Endpoint::authenticated("domain.register", session_project())
                .wrap(&state, post(domains::register_domain)),
        )
        .route(
            "/rpc/domain.delete",
            Endpoint::authenticated("domain.delete", session_project())
                .wrap(&state, delete(domains::delete_domain)),
        )
        .route(
            "/rpc/chatSessions.create",
            Endpoint::authenticated("chatSessions.create", chat_issuer())
                .wrap(&state, post(chat_sessions::create_chat_session)),
        )
        .route(
            "/rpc/chatSessions.revoke",
            Endpoint::authenticated("chatSessions.revoke", chat_issuer())
                .wrap(&state, post(chat_sessions::revoke_chat_session)),
        )
        .route(
            "/mcp/{slug}",
            Endpoint::authenticated(
                "mcp.serve",
                AuthPolicy::new()
                    .accept(Scheme::ChatSession)
                    .api_key(ApiKeyScope::Consumer)
                    .optional(),
            )
            .wrap(&state, post(mcp::serve_public)),
        )
        .route(
            "/mcp/{project}/{toolset}/{environment}",
            Endpoint::authenticated(
                "mcp.serveToolset",
                AuthPolicy::new()
                    .api_key(ApiKeyScope::Consumer)
                    .require_project(),
            )
            .project_from_path("project")
            .wrap(&state, post(mcp::serve_toolset)),
        );

    // Layers run bottom-up: domain admission sees the request first.
    routes
        .layer(from_fn_with_state(
            state.clone(),
            middleware::logging::log_requests,
        ))
        .layer(from_fn(middleware::session::extract_admin_override))
        .layer(from_fn(middleware::session::extract_session))
        .layer(from_fn_with_state(state.clone(), middleware::cors::cors))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::domains::admit_domain,
        ))
        .with_state(state)
}
