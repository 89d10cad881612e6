use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::{handlers, middleware::auth_middleware, websocket::handle_websocket};
use crate::AppState;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Call routes (protected)
    let call_routes = Router::new()
        .route("/", post(handlers::calls::initiate_call))
        .route("/", get(handlers::calls::get_calls))
        .route("/missed", get(handlers::calls::get_missed_calls))
        .route("/:id", get(handlers::calls::get_call))
        .route("/:id/join", post(handlers::calls::join_call))
        .route("/:id/accept", post(handlers::calls::accept_call))
        .route("/:id/reject", post(handlers::calls::reject_call))
        .route("/:id/end", post(handlers::calls::end_call))
        .route("/:id/missed", post(handlers::calls::mark_missed))
        .route("/:id/recording", post(handlers::calls::attach_recording))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // WebSocket route (protected)
    let ws_route = Router::new()
        .route("/ws", get(handle_websocket))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/calls", call_routes)
        .merge(ws_route)
        .with_state(state)
}
