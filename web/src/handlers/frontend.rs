//! Demo page served at `/`.

use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, response::Html};

/// Serve the configured static index page.
///
/// # Errors
///
/// Returns 404 if no page is configured or the file cannot be read.
pub async fn index(State(state): State<AppState>) -> WebResult<Html<String>> {
    let Some(path) = state.settings.static_index.as_ref() else {
        return Err(AppError::not_found("Not found"));
    };

    match tokio::fs::read_to_string(path).await {
        Ok(page) => Ok(Html(page)),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Static index unreadable");
            Err(AppError::not_found("Not found"))
        }
    }
}
