use crate::auth::Identity;
use crate::error::{AppError, Result};
use crate::extract::JsonBody;
use crate::model::UserUrl;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use pinhole_core::ShortKey;
use tracing::debug;

pub async fn list_user_urls_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    // listing needs an identity the client already held
    if identity.fresh {
        return Err(AppError::Unauthorized);
    }

    let urls = state.shortener().urls_for_user(&identity.user).await?;
    if urls.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<UserUrl> = urls
        .into_iter()
        .map(|(key, original_url)| UserUrl {
            short_url: state.short_url(&key),
            original_url,
        })
        .collect();

    Ok(Json(body).into_response())
}

pub async fn delete_user_urls_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    JsonBody(keys): JsonBody<Vec<String>>,
) -> StatusCode {
    // a brand new identity owns nothing
    if identity.fresh {
        return StatusCode::ACCEPTED;
    }

    let keys: Vec<ShortKey> = keys
        .into_iter()
        .filter_map(|raw| match ShortKey::new(raw) {
            Ok(key) => Some(key),
            Err(err) => {
                debug!(error = %err, "skipping invalid key in delete request");
                None
            }
        })
        .collect();

    // the batch runs detached; its outcome is only logged
    drop(state.shortener().delete_batch(keys, identity.user));

    StatusCode::ACCEPTED
}
