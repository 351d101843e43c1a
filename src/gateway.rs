//! Authentication front door for API calls and pages.

use std::{net::SocketAddr, time::SystemTime};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use tracing::Instrument;

use crate::{
    error::{Error, Result},
    server::AppState,
    session::{
        cleared_redirect_cookie, cleared_token_cookie, redirect_cookie, redirect_target,
        REDIRECT_COOKIE, TOKEN_COOKIE,
    },
    users::Requestor,
};

/// Remote IP of the request, when the server recorded one.
pub fn remote_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Resolve the session cookie to a requestor.
pub async fn authenticate(state: &AppState, jar: &CookieJar) -> Result<Requestor> {
    let token = jar.get(TOKEN_COOKIE).ok_or(Error::NotAuthenticated)?;
    let username = state
        .signer
        .verify(token.value(), SystemTime::now())
        .map_err(|error| {
            tracing::debug!(%error, "session token rejected");
            Error::NotAuthenticated
        })?;
    state.users.requestor(&username).await.map_err(|error| {
        tracing::warn!(user = %username, %error, "token for unknown user");
        Error::NotAuthenticated
    })
}

// Middleware for /api: 401 and a cleared cookie unless the token checks out
pub async fn api_gateway(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = remote_ip(&req);
    let path = req.uri().path().to_string();

    match authenticate(&state, &jar).await {
        Ok(requestor) => {
            let span = tracing::info_span!("api", %ip, %path, requestor = %requestor.name());
            req.extensions_mut().insert(requestor);
            next.run(req).instrument(span).await
        }
        Err(error) => {
            let span = tracing::info_span!("api", %ip, %path);
            let _guard = span.enter();
            (jar.add(cleared_token_cookie()), error).into_response()
        }
    }
}

// Middleware for pages: bounce to /login and remember where the visitor was going
pub async fn page_gateway(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = remote_ip(&req);
    let path = req.uri().path().to_string();
    let is_login = path == "/login";

    match (authenticate(&state, &jar).await, is_login) {
        (Ok(_), true) => {
            let target = jar
                .get(REDIRECT_COOKIE)
                .map(|cookie| redirect_target(cookie.value()))
                .unwrap_or_else(|| "/".to_string());
            (jar.add(cleared_redirect_cookie()), Redirect::to(&target)).into_response()
        }
        (Err(_), true) => next.run(req).await,
        (Ok(requestor), false) => {
            let span = tracing::info_span!("page", %ip, %path, requestor = %requestor.name());
            req.extensions_mut().insert(requestor);
            next.run(req).instrument(span).await
        }
        (Err(_), false) => {
            let url = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            tracing::debug!(%ip, %url, "redirecting to login");
            let jar = jar
                .add(redirect_cookie(&url, SystemTime::now()))
                .add(cleared_token_cookie());
            (jar, Redirect::to("/login")).into_response()
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Requestor {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Requestor>()
            .cloned()
            .ok_or(Error::NotAuthenticated)
    }
}
