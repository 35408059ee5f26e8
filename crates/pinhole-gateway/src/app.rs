use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::identify;
use crate::handlers::{
    delete_user_urls_handler, list_user_urls_handler, ping_handler, redirect_handler,
    shorten_batch_handler, shorten_json_handler, shorten_text_handler,
};
use crate::state::AppState;

pub struct App {}

impl App {
    pub fn router(state: AppState) -> Router {
        let identified = Router::new()
            .route("/", post(shorten_text_handler))
            .nest(
                "/api",
                Router::new()
                    .route("/shorten", post(shorten_json_handler))
                    .route("/shorten/batch", post(shorten_batch_handler))
                    .route(
                        "/user/urls",
                        get(list_user_urls_handler).delete(delete_user_urls_handler),
                    ),
            )
            .route_layer(middleware::from_fn_with_state(state.clone(), identify));

        Router::new()
            .route("/ping", get(ping_handler))
            .route("/{key}", get(redirect_handler))
            .merge(identified)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
