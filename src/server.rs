use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{
    api, assets,
    config::Config,
    gateway::{api_gateway, page_gateway},
    pages,
    ratelimit::LoginLimiter,
    session::Signer,
    users::{self, UserDirectory},
};

// Application state
#[derive(Clone)]
pub struct AppState {
    pub signer: Signer,
    pub users: Arc<UserDirectory>,
    pub limiter: Arc<LoginLimiter>,
}

impl AppState {
    pub fn new(signer: Signer, users: UserDirectory) -> Self {
        Self {
            signer,
            users: Arc::new(users),
            limiter: Arc::new(LoginLimiter::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    // API routes with token-based authentication
    let api_routes = Router::new()
        .route("/api/upload", post(api::upload))
        .route("/api/upload/*rel", post(api::upload))
        .route("/api/download/*rel", get(api::download))
        .route("/api/mkdir", post(api::mkdir))
        .route("/api/compress", post(api::compress))
        .route("/api/extract", post(api::extract))
        .route("/api/move", post(api::move_entry))
        .route("/api/trash", post(api::trash).delete(api::empty_trash))
        .route("/api/restore", post(api::restore))
        .route("/api/system/reboot", post(api::reboot))
        .route("/api/system/poweroff", post(api::poweroff))
        .route("/api/user/create", post(api::create_user))
        .route("/api/user/delete", post(api::delete_user))
        .route("/api/user/reset-password", post(api::reset_password))
        .route("/api/user/change-password", post(api::change_password))
        .route("/api/user/toggle-admin", post(api::toggle_admin))
        .route("/api/user/impersonate", post(api::impersonate))
        .route("/api/user/ssh-key/add", post(api::add_ssh_key))
        .route("/api/user/ssh-key/delete", post(api::delete_ssh_key))
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(state.clone(), api_gateway))
        .with_state(state.clone());

    // Pages redirect to /login when not authenticated
    let page_routes = Router::new()
        .route("/", get(pages::home))
        .route("/login", get(pages::login))
        .route("/files", get(pages::files))
        .route("/files/", get(pages::files))
        .route("/files/*rel", get(pages::files))
        .route("/file/*rel", get(pages::file))
        .route("/trash", get(pages::trash))
        .route("/trash/", get(pages::trash))
        .route("/trash/*rel", get(pages::trash))
        .route("/admin", get(pages::admin))
        .route("/user/:username", get(pages::user))
        .layer(middleware::from_fn_with_state(state.clone(), page_gateway))
        .with_state(state.clone());

    Router::new()
        .merge(api_routes)
        .merge(page_routes)
        .route("/api/login", post(api::login))
        .route("/api/logout", post(api::logout))
        .route("/static/:kind/:name", get(assets::serve))
        .fallback(pages::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the state and serve until the process is stopped.
pub async fn serve(config: Config) -> std::io::Result<()> {
    let admin_group = users::detect_admin_group(std::path::Path::new(users::SUDOERS_PATH))
        .await
        .map_err(|error| std::io::Error::other(error.to_string()))?;
    tracing::info!(%admin_group, "admin group selected");

    let state = AppState::new(
        Signer::generate(),
        UserDirectory::new(&config.home_root, admin_group),
    );
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    tracing::info!(addr = %config.addr, "server running");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
