use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Identity assigned to every caller until real authentication exists.
pub const ANONYMOUS_USER: &str = "anonymous";

/// The caller's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: String,
}

impl CurrentUser {
    pub fn anonymous() -> Self {
        Self {
            user_id: ANONYMOUS_USER.into(),
        }
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentUser::anonymous())
    }
}
