use crate::auth::Identity;
use crate::error::{AppError, Result};
use crate::extract::JsonBody;
use crate::model::{BatchShortenItem, BatchShortenResult, ShortenRequest, ShortenResponse};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use pinhole_core::{url, ShortKey};
use pinhole_shortener::{ShortenParams, Shortened, ShortenerError};
use std::collections::HashSet;

fn created_or_conflict(shortened: &Shortened) -> StatusCode {
    if shortened.duplicate {
        StatusCode::CONFLICT
    } else {
        StatusCode::CREATED
    }
}

fn parse_key(raw: &str) -> Result<ShortKey> {
    ShortKey::new(raw).map_err(|err| AppError::Shortener(err.into()))
}

pub async fn shorten_text_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: String,
) -> Result<Response> {
    let shortened = state
        .shortener()
        .shorten(ShortenParams::new(body.trim()), &identity.user)
        .await?;

    Ok((created_or_conflict(&shortened), state.short_url(&shortened.key)).into_response())
}

pub async fn shorten_json_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    JsonBody(request): JsonBody<ShortenRequest>,
) -> Result<Response> {
    let custom_key = request.custom_key.as_deref().map(parse_key).transpose()?;

    let params = ShortenParams {
        custom_key,
        ..ShortenParams::new(request.url)
    };
    let shortened = state.shortener().shorten(params, &identity.user).await?;

    let body = ShortenResponse {
        result: state.short_url(&shortened.key),
    };
    Ok((created_or_conflict(&shortened), Json(body)).into_response())
}

/// Shortens every item or none of them when the batch itself is invalid.
///
/// Invalid URLs and correlation ids repeated within the batch are rejected
/// before anything is stored. Items whose URL is already shortened reuse the
/// existing key.
pub async fn shorten_batch_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    JsonBody(items): JsonBody<Vec<BatchShortenItem>>,
) -> Result<Response> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in &items {
        url::validate(&item.original_url).map_err(|err| AppError::Shortener(err.into()))?;

        let correlation_id = item.correlation_id.trim();
        if !correlation_id.is_empty() && !seen.insert(correlation_id) {
            return Err(ShortenerError::CorrelationConflict(correlation_id.to_string()).into());
        }
    }

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let params = ShortenParams {
            correlation_id: Some(item.correlation_id),
            ..ShortenParams::new(item.original_url)
        };
        let shortened = state.shortener().shorten(params, &identity.user).await?;

        results.push(BatchShortenResult {
            short_url: state.short_url(&shortened.key),
            correlation_id: shortened.correlation_id,
        });
    }

    Ok((StatusCode::CREATED, Json(results)).into_response())
}

pub async fn redirect_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response> {
    let key = parse_key(&key)?;
    let long_url = state.shortener().resolve(&key).await?;

    Ok(Redirect::temporary(&long_url).into_response())
}
