use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use bazaar_agent::{AgentChatRequest, ConfirmActionRequest};

use crate::app::AppState;
use crate::auth::Caller;
use crate::error::ApiError;

pub async fn chat(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<AgentChatRequest>,
) -> Result<Response, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    let response = state.assistant.run(&caller.user_id, &request).await?;
    Ok(caller.attach_cookie(&state.guest_cookie, (StatusCode::OK, Json(response)).into_response()))
}

/// Runs an action the customer accepted from a chat proposal.
pub async fn confirm(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<ConfirmActionRequest>,
) -> Result<Response, ApiError> {
    let response = state.assistant.confirm(&caller.user_id, caller.authenticated, request).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}
