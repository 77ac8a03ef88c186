use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue},
    response::Response,
};
use uuid::Uuid;

use bazaar_core::domain::user::GUEST_PREFIX;

use crate::app::AppState;
use crate::error::ApiError;


#[derive(Clone, Debug)]
pub struct GuestCookieSettings {
    pub name: String,
    pub ttl_days: i64,
}

/// Who is calling: a verified bearer token, or a guest recognised by cookie.
///
/// A guest without a cookie gets a fresh id, which handlers hand back
/// through [`Caller::attach_cookie`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub email: Option<String>,
    pub authenticated: bool,
    issued_guest_id: Option<String>,
}

impl Caller {
    pub fn user(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), email: Some(email.into()), authenticated: true, issued_guest_id: None }
    }

    pub fn guest(guest_id: &str) -> Self {
        Self {
            user_id: format!("{GUEST_PREFIX}{guest_id}"),
            email: None,
            authenticated: false,
            issued_guest_id: None,
        }
    }

    fn new_guest() -> Self {
        let guest_id = Uuid::new_v4().to_string();
        Self { issued_guest_id: Some(guest_id.clone()), ..Self::guest(&guest_id) }
    }

    pub fn attach_cookie(&self, settings: &GuestCookieSettings, mut response: Response) -> Response {
        let Some(guest_id) = &self.issued_guest_id else {
            return response;
        };
        let max_age = settings.ttl_days.max(0) * 24 * 60 * 60;
        let cookie = format!(
            "{}={guest_id}; Path=/; Max-Age={max_age}; HttpOnly; Secure; SameSite=Strict",
            settings.name
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        response
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(&parts.headers) {
            let claims = state
                .tokens
                .verify(token)
                .map_err(|_| ApiError::unauthorized("the access token is invalid or expired"))?;
            return Ok(Self::user(claims.sub, claims.email));
        }

        Ok(match cookie_value(&parts.headers, &state.guest_cookie.name) {
            Some(guest_id) if Uuid::parse_str(guest_id).is_ok() => Self::guest(guest_id),
            _ => Self::new_guest(),
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim()).filter(|token| !token.is_empty())
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}
