//! Bearer-key authentication extractor.
//!
//! Every protected handler takes an [`AuthUser`]; extraction resolves the
//! presented API key through the auth binder, so an invalid, revoked or
//! expired key is rejected before the handler runs.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use notably_engine::{Error as EngineError, TableService};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller, resolved from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl AuthUser {
    /// Table operations scoped to this caller.
    pub fn tables(&self, state: &AppState) -> TableService {
        TableService::new(state.binder.bind(&self.user_id))
    }
}

fn unauthenticated(message: &str) -> AppError {
    AppError::Engine(EngineError::Unauthenticated(message.to_string()))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match header {
            Some(header) if header.starts_with("Bearer ") => {
                header.trim_start_matches("Bearer ").trim()
            }
            Some(_) => return Err(unauthenticated("invalid authorization header format")),
            None => return Err(unauthenticated("missing authorization header")),
        };
        if token.is_empty() {
            return Err(unauthenticated("empty bearer token"));
        }

        let identity = state.binder.resolve_key(token).await?;
        Ok(AuthUser {
            user_id: identity.user_id,
        })
    }
}
