//! HTTP front end: routing, shared state and server startup.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod ratelimit;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::clock::Clock;
use crate::tenant::TenantManager;

use self::ratelimit::FixedWindowLimiter;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
    pub auth: AuthConfig,
    /// Read once per request; the engine never looks at the wall clock.
    pub clock: Arc<dyn Clock>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        tenants: Arc<TenantManager>,
        auth: AuthConfig,
        clock: Arc<dyn Clock>,
        limiter: Arc<FixedWindowLimiter>,
    ) -> Self {
        Self {
            tenants,
            auth,
            clock,
            limiter,
            started: Instant::now(),
        }
    }
}

/// All routes. Only slot lookup is rate limited; it is the one endpoint
/// open to anonymous callers.
pub fn router(state: AppState, max_in_flight: usize) -> Router {
    use handlers::*;

    let public = Router::new()
        .route("/booking/slots", get(get_slots))
        .route_layer(middleware::from_fn_with_state(state.clone(), ratelimit::limit_by_caller));

    let api = Router::new()
        .route(
            "/businesses/{business_id}/appointments",
            post(book_appointment).get(list_appointments),
        )
        .route("/businesses/{business_id}/appointments/confirm", post(confirm_action))
        .route("/businesses/{business_id}/appointments/reject", post(reject_action))
        .route("/businesses/{business_id}/appointments/reschedule", post(reschedule_action))
        .route("/businesses/{business_id}/appointments/cancel", post(cancel_action))
        .route(
            "/businesses/{business_id}/appointments/{appointment_id}",
            get(get_appointment),
        )
        .route(
            "/businesses/{business_id}/appointments/{appointment_id}/confirm",
            post(confirm_appointment),
        )
        .route(
            "/businesses/{business_id}/appointments/{appointment_id}/complete",
            post(complete_appointment),
        )
        .route(
            "/businesses/{business_id}/appointments/{appointment_id}/no-show",
            post(mark_no_show),
        )
        .route(
            "/businesses/{business_id}/appointments/{appointment_id}/cancel",
            post(cancel_appointment),
        )
        .route(
            "/businesses/{business_id}/appointments/{appointment_id}/reschedule",
            post(reschedule_appointment),
        )
        .route(
            "/businesses/{business_id}/actions",
            post(record_action).get(list_actions),
        )
        .route("/businesses/{business_id}/actions/{action_id}", get(get_action));

    Router::new()
        .route("/health", get(get_health))
        .merge(public)
        .merge(api)
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}
