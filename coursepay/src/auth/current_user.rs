use crate::{
    api::models::users::CurrentUser,
    auth::session::verify_session_token,
    db::handlers::{Repository, Users},
    errors::Error,
    AppState,
};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, instrument};

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim()).filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    /// Resolve the caller from `Authorization: Bearer <jwt>`. The role is read from the
    /// database, so demotions apply to tokens that were already issued.
    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(Error::Unauthenticated { message: None })?;
        let claims = verify_session_token(&state.config, token)?;

        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let user = Users::new(&mut conn).get_by_id(claims.user_id).await?.ok_or_else(|| {
            debug!("Token subject {} no longer exists", claims.user_id);
            Error::Unauthenticated {
                message: Some("User no longer exists".to_string()),
            }
        })?;

        Ok(CurrentUser::from(user))
    }
}
