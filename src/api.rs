//! JSON/form API handlers. Each one checks who may do what, then hands off
//! to the engine modules.

use std::{net::SocketAddr, path::Path as StdPath, time::{Duration, SystemTime}};

use axum::{
    body::Body,
    extract::{ConnectInfo, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::{
    archive,
    error::{Error, Result},
    files,
    paths::{self, Root},
    server::AppState,
    session::{cleared_token_cookie, token_cookie},
    ssh,
    system::{self, PowerAction},
    trash,
    upload,
    users::{self, Requestor},
};

// Delay before a power action, so the response can still go out.
const POWER_ACTION_DELAY: Duration = Duration::from_secs(1);

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathForm {
    rel_home_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MkdirForm {
    rel_home_path: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveForm {
    from_rel_home_path: String,
    to_rel_home_path: String,
}

#[derive(Deserialize)]
pub struct RestoreForm {
    bucket: String,
}

#[derive(Deserialize)]
pub struct UserForm {
    username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordForm {
    username: String,
    current_password: String,
    new_password: String,
    confirm_password: String,
}

#[derive(Deserialize)]
pub struct SshKeyForm {
    username: String,
    key: String,
}

#[derive(Deserialize)]
pub struct SshKeyIndexForm {
    username: String,
    index: usize,
}

#[derive(Serialize)]
pub struct PathResponse {
    path: String,
}

#[derive(Serialize)]
pub struct PathsResponse {
    paths: Vec<String>,
}

#[derive(Serialize)]
pub struct BucketResponse {
    bucket: String,
}

#[derive(Serialize)]
pub struct CountResponse {
    removed: usize,
}

#[derive(Serialize)]
pub struct AdminResponse {
    is_admin: bool,
}

fn home_relative(requestor: &Requestor, full: &StdPath) -> String {
    paths::relative_to(&paths::clean(&requestor.account.home), full)
}

fn rel_or_root(rel: Option<Path<String>>) -> String {
    rel.map(|Path(rel)| rel).unwrap_or_default()
}

// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<(CookieJar, StatusCode)> {
    let now = SystemTime::now();
    let ip = remote.ip().to_string();
    if !state.limiter.check(&ip, now) {
        tracing::warn!(%ip, "login rate limited");
        return Err(Error::RateLimited);
    }

    if !users::verify_credentials(&state.users, &form.username, &form.password).await? {
        tracing::warn!(%ip, user = %form.username, "login failed");
        return Err(Error::NotAuthenticated);
    }

    let token = state.signer.issue(&form.username, now);
    tracing::info!(%ip, user = %form.username, "login");
    Ok((jar.add(token_cookie(token, now)), StatusCode::OK))
}

// POST /api/logout
pub async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    (jar.add(cleared_token_cookie()), StatusCode::OK)
}

// POST /api/upload/<path>
pub async fn upload(
    requestor: Requestor,
    rel: Option<Path<String>>,
    multipart: Multipart,
) -> Result<Json<PathsResponse>> {
    let dir = paths::resolve(&requestor.account, &rel_or_root(rel), Root::Home).await?;
    if !dir.is_dir {
        return Err(Error::input("not a directory"));
    }
    let written = upload::receive(&requestor.account, &dir.full, multipart).await?;
    Ok(Json(PathsResponse {
        paths: written
            .iter()
            .map(|p| home_relative(&requestor, p))
            .collect(),
    }))
}

fn attachment_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' ' => c,
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(name)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

// GET /api/download/<path>
pub async fn download(requestor: Requestor, Path(rel): Path<String>) -> Result<Response> {
    let resolved = paths::resolve(&requestor.account, &rel, Root::Home).await?;
    if resolved.is_dir {
        return Err(Error::input("not a file"));
    }
    let name = resolved
        .full
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file = File::open(&resolved.full).await?;
    let content_type = mime_guess::from_path(&resolved.full)
        .first_or_octet_stream()
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_str(&content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))),
            (header::CONTENT_DISPOSITION, attachment_disposition(&name)),
            (header::CONTENT_LENGTH, HeaderValue::from(resolved.size)),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

// POST /api/mkdir
pub async fn mkdir(requestor: Requestor, Form(form): Form<MkdirForm>) -> Result<Json<PathResponse>> {
    let created = files::mkdir(&requestor.account, &form.rel_home_path, &form.name).await?;
    Ok(Json(PathResponse {
        path: home_relative(&requestor, &created),
    }))
}

// POST /api/compress
pub async fn compress(requestor: Requestor, Form(form): Form<PathForm>) -> Result<Json<PathResponse>> {
    let archive = archive::compress(&requestor.account, &form.rel_home_path).await?;
    Ok(Json(PathResponse {
        path: home_relative(&requestor, &archive),
    }))
}

// POST /api/extract
pub async fn extract(requestor: Requestor, Form(form): Form<PathForm>) -> Result<Json<PathResponse>> {
    let out = archive::extract(&requestor.account, &form.rel_home_path).await?;
    Ok(Json(PathResponse {
        path: home_relative(&requestor, &out),
    }))
}

// POST /api/move
pub async fn move_entry(requestor: Requestor, Form(form): Form<MoveForm>) -> Result<Json<PathResponse>> {
    let destination = files::move_entry(
        &requestor.account,
        &form.from_rel_home_path,
        &form.to_rel_home_path,
    )
    .await?;
    Ok(Json(PathResponse {
        path: home_relative(&requestor, &destination),
    }))
}

// POST /api/trash
pub async fn trash(requestor: Requestor, Form(form): Form<PathForm>) -> Result<Json<BucketResponse>> {
    let bucket = trash::trash(
        &requestor.account,
        &form.rel_home_path,
        &chrono::Local::now(),
    )
    .await?;
    Ok(Json(BucketResponse { bucket }))
}

// POST /api/restore
pub async fn restore(requestor: Requestor, Form(form): Form<RestoreForm>) -> Result<Json<PathResponse>> {
    let restored = trash::restore(&requestor.account, &form.bucket).await?;
    Ok(Json(PathResponse {
        path: home_relative(&requestor, &restored),
    }))
}

// DELETE /api/trash
pub async fn empty_trash(requestor: Requestor) -> Result<Json<CountResponse>> {
    let removed = trash::empty(&requestor.account).await?;
    Ok(Json(CountResponse { removed }))
}

fn schedule_power(requestor: &Requestor, action: PowerAction) -> Result<StatusCode> {
    requestor.require_admin()?;
    tracing::warn!(user = %requestor.name(), ?action, "power action scheduled");
    // The 202 has already gone out when systemctl runs, so a failure only
    // reaches the log.
    tokio::spawn(async move {
        tokio::time::sleep(POWER_ACTION_DELAY).await;
        if let Err(error) = system::power(action).await {
            tracing::error!(%error, ?action, "power action failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

// POST /api/system/reboot
pub async fn reboot(requestor: Requestor) -> Result<StatusCode> {
    schedule_power(&requestor, PowerAction::Reboot)
}

// POST /api/system/poweroff
pub async fn poweroff(requestor: Requestor) -> Result<StatusCode> {
    schedule_power(&requestor, PowerAction::Poweroff)
}

// POST /api/user/create
pub async fn create_user(
    State(state): State<AppState>,
    requestor: Requestor,
    Form(form): Form<UserForm>,
) -> Result<StatusCode> {
    requestor.require_admin()?;
    users::create_user(&state.users, &form.username).await?;
    Ok(StatusCode::CREATED)
}

// POST /api/user/delete
pub async fn delete_user(
    State(state): State<AppState>,
    requestor: Requestor,
    jar: CookieJar,
    Form(form): Form<UserForm>,
) -> Result<(CookieJar, StatusCode)> {
    requestor.require_self_or_admin(&form.username)?;
    users::delete_user(&state.users, &form.username).await?;
    let jar = if requestor.name() == form.username {
        jar.add(cleared_token_cookie())
    } else {
        jar
    };
    Ok((jar, StatusCode::OK))
}

// POST /api/user/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    requestor: Requestor,
    Form(form): Form<UserForm>,
) -> Result<StatusCode> {
    requestor.require_self_or_admin(&form.username)?;
    users::reset_password(&state.users, &form.username).await?;
    Ok(StatusCode::OK)
}

// POST /api/user/change-password
pub async fn change_password(
    State(state): State<AppState>,
    requestor: Requestor,
    Form(form): Form<ChangePasswordForm>,
) -> Result<StatusCode> {
    requestor.require_self_or_admin(&form.username)?;
    users::change_password(
        &state.users,
        &form.username,
        &form.current_password,
        &form.new_password,
        &form.confirm_password,
    )
    .await?;
    Ok(StatusCode::OK)
}

// POST /api/user/toggle-admin
pub async fn toggle_admin(
    State(state): State<AppState>,
    requestor: Requestor,
    Form(form): Form<UserForm>,
) -> Result<Json<AdminResponse>> {
    requestor.require_admin()?;
    let is_admin = users::toggle_admin(&state.users, &form.username).await?;
    Ok(Json(AdminResponse { is_admin }))
}

// POST /api/user/impersonate
pub async fn impersonate(
    State(state): State<AppState>,
    requestor: Requestor,
    jar: CookieJar,
    Form(form): Form<UserForm>,
) -> Result<(CookieJar, StatusCode)> {
    requestor.require_admin()?;
    if requestor.name() == form.username {
        return Err(Error::input("cannot impersonate yourself"));
    }
    state.users.lookup(&form.username)?;

    let now = SystemTime::now();
    let token = state.signer.issue(&form.username, now);
    tracing::warn!(admin = %requestor.name(), user = %form.username, "impersonation");
    Ok((jar.add(token_cookie(token, now)), StatusCode::OK))
}

// POST /api/user/ssh-key/add
pub async fn add_ssh_key(
    State(state): State<AppState>,
    requestor: Requestor,
    Form(form): Form<SshKeyForm>,
) -> Result<StatusCode> {
    requestor.require_self_or_admin(&form.username)?;
    let account = state.users.lookup(&form.username)?;
    ssh::add_key(&account, &form.key).await?;
    Ok(StatusCode::OK)
}

// POST /api/user/ssh-key/delete
pub async fn delete_ssh_key(
    State(state): State<AppState>,
    requestor: Requestor,
    Form(form): Form<SshKeyIndexForm>,
) -> Result<StatusCode> {
    requestor.require_self_or_admin(&form.username)?;
    let account = state.users.lookup(&form.username)?;
    ssh::delete_key(&account, form.index).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_disposition() {
        let value = attachment_disposition("report.pdf");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
        );

        let value = attachment_disposition("naïve \"q\".txt");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"na_ve _q_.txt\"; filename*=UTF-8''na%C3%AFve%20%22q%22.txt"
        );
    }
}
