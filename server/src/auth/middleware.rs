//! Authentication for the trigger endpoint.
//!
//! When `TRIGGER_TOKEN` is configured, callers must present it as a Bearer
//! token. Without it, the endpoint is open (intended for local use behind
//! a scheduler on the same host).

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Caller allowed to trigger a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAuth {
    /// Presented the configured token.
    Token,
    /// No token is configured.
    Anonymous,
}

impl FromRequestParts<AppState> for TriggerAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.trigger_token.as_deref() else {
            return Ok(TriggerAuth::Anonymous);
        };

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ");
                if token.is_empty() {
                    return Err(AppError::Unauthorized("Empty bearer token"));
                }
                if token != expected {
                    return Err(AppError::Unauthorized("Invalid bearer token"));
                }
                Ok(TriggerAuth::Token)
            }
            Some(_) => Err(AppError::Unauthorized(
                "Invalid authorization header format",
            )),
            None => Err(AppError::Unauthorized("Missing authorization header")),
        }
    }
}
