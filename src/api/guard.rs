//! Cookie gate in front of the dashboard routes.

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use reqwest::Url;
use tracing::debug;

pub const PROTECTED_PREFIXES: &[&str] = &["/dashboard"];

/// Either cookie is enough; only presence is checked.
pub const SESSION_COOKIES: &[&str] = &["sb-access-token", "sb-refresh-token"];

pub const LOGIN_PATH: &str = "/login";

pub fn is_protected(path: &str) -> bool {
    PROTECTED_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

pub fn has_session_cookie(headers: &HeaderMap) -> bool {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim()))
        .any(|name| SESSION_COOKIES.contains(&name))
}

pub const REDIRECT_PARAM: &str = "redirectedFrom";

/// `/login?<query>` with `redirectedFrom=<path>` set, form-encoded. The
/// request's other query parameters are kept; an existing `redirectedFrom`
/// is replaced in place.
pub fn login_redirect(path: &str, query: Option<&str>) -> String {
    let Ok(mut url) = Url::parse("http://localhost/") else {
        return LOGIN_PATH.to_string();
    };
    url.set_path(LOGIN_PATH);
    url.set_query(query);

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut replaced = false;
    for (name, value) in url.query_pairs() {
        if name == REDIRECT_PARAM {
            if !replaced {
                pairs.push((name.into_owned(), path.to_string()));
                replaced = true;
            }
        } else {
            pairs.push((name.into_owned(), value.into_owned()));
        }
    }
    if !replaced {
        pairs.push((REDIRECT_PARAM.to_string(), path.to_string()));
    }

    url.query_pairs_mut().clear().extend_pairs(&pairs);
    match url.query() {
        Some(query) => format!("{LOGIN_PATH}?{query}"),
        None => LOGIN_PATH.to_string(),
    }
}

pub async fn require_session(req: Request, next: Next) -> Response {
    let path = req.uri().path();

    if is_protected(path) && !has_session_cookie(req.headers()) {
        let location = login_redirect(path, req.uri().query());
        debug!(path, location = %location, "No session cookie, redirecting to login");
        return Redirect::temporary(&location).into_response();
    }

    next.run(req).await
}
