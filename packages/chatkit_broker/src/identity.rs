//! Anonymous user identity carried in a long-lived cookie.
//!
//! The browser owns the identifier: the broker only generates one when the
//! request arrives without it, and never rewrites an existing value.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use cookie::time::Duration;
use uuid::Uuid;

pub const SESSION_COOKIE_NAME: &str = "chatkit_session_id";
/// 30 days
pub const SESSION_COOKIE_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 30;

/// The identifier forwarded upstream as `user`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousUser {
    pub id: String,
    /// True when the id was generated for this request and a cookie was queued
    pub issued: bool,
}

/// Read the anonymous id from `jar`, or mint one and queue it on the returned jar.
pub fn resolve_user(jar: CookieJar, secure: bool) -> (AnonymousUser, CookieJar) {
    let existing = jar
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty());

    if let Some(id) = existing {
        return (AnonymousUser { id, issued: false }, jar);
    }

    let id = Uuid::new_v4().to_string();
    let jar = jar.add(session_cookie(id.clone(), secure));
    (AnonymousUser { id, issued: true }, jar)
}

fn session_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, value))
        .path("/")
        .max_age(Duration::seconds(SESSION_COOKIE_MAX_AGE_SECS))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}
