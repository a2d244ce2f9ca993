// Route table for the Arena API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::ws;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        // Push channel; the browser client connects to the bare origin
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/run-code", post(handlers::run_code))
        .route("/submit-code", post(handlers::submit_code))
        .route("/enter-battle", post(handlers::enter_battle))
        .route("/submit-battle-code", post(handlers::submit_battle_code))
        .route("/problems", get(handlers::list_problems))
        .route("/problem/:problem_id", get(handlers::get_problem))
        .route("/upload", post(handlers::upload_problem))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
