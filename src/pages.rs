//! Server-rendered HTML pages.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};

use crate::{
    error::Error,
    listing::{self, Entry, SortKey, SortOrder, SortQuery},
    paths::{self, Crumb, Root},
    server::AppState,
    ssh,
    system,
    trash::{self, Bucket},
    users::{Requestor, DEFAULT_PASSWORD},
};

/// An error rendered as the problem page instead of JSON.
pub struct Problem(pub Error);

impl From<Error> for Problem {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = self.0.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "page failed");
        } else {
            tracing::debug!(error = %self.0, "page rejected");
        }
        problem_page(status, &self.0.public_message())
    }
}

type PageResult = Result<Response, Problem>;

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Percent-encode each segment of a `/a/b` path for use in a URL.
fn url_path(rel: &str) -> String {
    rel.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn layout(title: &str, requestor: Option<&Requestor>, body: &str) -> Html<String> {
    let nav = match requestor {
        Some(requestor) => format!(
            r#"<nav>
        <a href="/">Home</a>
        <a href="/files/">Files</a>
        <a href="/trash/">Trash</a>
        <a href="/user/{user}">{user_label}</a>
        {admin}
        <button data-action="logout">Log out</button>
    </nav>"#,
            user = urlencoding::encode(requestor.name()),
            user_label = escape(requestor.name()),
            admin = if requestor.is_admin {
                r#"<a href="/admin">Admin</a>"#
            } else {
                ""
            },
        ),
        None => String::new(),
    };
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - Ground</title>
    <link rel="stylesheet" href="/static/css/ground.css">
    <script src="/static/js/ground.js" defer></script>
</head>
<body>
    {nav}
    <main>
        <h1>{title}</h1>
        <div id="error" class="error" hidden></div>
        {body}
    </main>
    <footer>ground {version}</footer>
</body>
</html>"#,
        title = escape(title),
        version = env!("CARGO_PKG_VERSION"),
    ))
}

pub fn problem_page(status: StatusCode, message: &str) -> Response {
    let body = format!(
        r#"<p class="problem">{}</p><p><a href="/">Back to start</a></p>"#,
        escape(message)
    );
    let title = status.canonical_reason().unwrap_or("Problem");
    (status, layout(title, None, &body)).into_response()
}

// Fallback for unmatched routes
pub async fn not_found() -> Response {
    problem_page(StatusCode::NOT_FOUND, "page not found")
}

// GET /login
pub async fn login() -> Html<String> {
    layout(
        "Log in",
        None,
        r#"<form data-api="/api/login" data-then="reload" class="card">
            <label for="username">Username</label>
            <input type="text" id="username" name="username" required autocomplete="username">
            <label for="password">Password</label>
            <input type="password" id="password" name="password" required autocomplete="current-password">
            <button type="submit">Log in</button>
        </form>"#,
    )
}

// GET /
pub async fn home(requestor: Requestor) -> Html<String> {
    let uptime = system::uptime().await.unwrap_or_else(|| "unknown".to_string());
    let body = format!(
        r#"<p>Signed in as <strong>{user}</strong>{admin}.</p>
        <ul class="tiles">
            <li><a href="/files/">Browse files</a></li>
            <li><a href="/trash/">Trash</a></li>
            <li><a href="/user/{user_url}">Account</a></li>
        </ul>
        <p class="meta">Host up {uptime}</p>"#,
        user = escape(requestor.name()),
        user_url = urlencoding::encode(requestor.name()),
        admin = if requestor.is_admin { " (admin)" } else { "" },
        uptime = escape(&uptime),
    );
    layout("Ground", Some(&requestor), &body)
}

fn render_crumbs(crumbs: &[Crumb], prefix: &str) -> String {
    let links: Vec<String> = crumbs
        .iter()
        .map(|crumb| {
            format!(
                r#"<a href="{prefix}{}">{}</a>"#,
                url_path(&crumb.path),
                escape(&crumb.name)
            )
        })
        .collect();
    format!(r#"<div class="crumbs">{}</div>"#, links.join(" / "))
}

fn sort_header(query: SortQuery, base: &str) -> String {
    let cells: Vec<String> = SortKey::ALL
        .iter()
        .map(|key| {
            let order = if *key == query.sort {
                query.order.flipped()
            } else {
                SortOrder::Asc
            };
            let marker = match (*key == query.sort, query.order) {
                (true, SortOrder::Asc) => " ▲",
                (true, SortOrder::Desc) => " ▼",
                _ => "",
            };
            format!(
                r#"<th><a href="{base}?sort={key}&amp;order={order}">{key}{marker}</a></th>"#,
                key = key.as_str(),
                order = order.as_str(),
            )
        })
        .collect();
    format!("<tr>{}<th></th></tr>", cells.join(""))
}

fn entry_row(entry: &Entry, href: &str, actions: &str) -> String {
    format!(
        r#"<tr>
            <td><span class="icon icon-{icon}"></span></td>
            <td><a href="{href}">{name}</a></td>
            <td>{link}</td>
            <td>{size}</td>
            <td>{time}</td>
            <td>{actions}</td>
        </tr>"#,
        icon = entry.icon.as_str(),
        name = escape(&entry.name),
        link = entry
            .symlink_target
            .as_deref()
            .map(|t| format!("→ {}", escape(t)))
            .unwrap_or_default(),
        size = if entry.is_dir { String::new() } else { escape(&entry.human_size) },
        time = chrono::DateTime::<chrono::Local>::from(entry.mtime).format("%Y-%m-%d %H:%M"),
    )
}

fn file_actions(entry: &Entry) -> String {
    let path = escape(&entry.path);
    let mut actions = format!(
        r#"<button data-api="/api/trash" data-rel-home-path="{path}">Trash</button>
        <button data-api="/api/move" data-prompt="Move to" data-from-rel-home-path="{path}">Move</button>"#
    );
    if entry.is_dir {
        actions.push_str(&format!(
            r#"<button data-api="/api/compress" data-rel-home-path="{path}">Compress</button>"#
        ));
    } else if entry.is_compressed {
        actions.push_str(&format!(
            r#"<button data-api="/api/extract" data-rel-home-path="{path}">Extract</button>"#
        ));
    }
    actions
}

// GET /files/<path>
pub async fn files(
    requestor: Requestor,
    rel: Option<Path<String>>,
    Query(query): Query<SortQuery>,
) -> PageResult {
    let rel = rel.map(|Path(rel)| rel).unwrap_or_default();
    let dir = paths::resolve(&requestor.account, &rel, Root::Home).await?;
    if !dir.is_dir {
        return Ok(Redirect::to(&format!("/file{}", url_path(&dir.rel))).into_response());
    }

    let mut entries = listing::list(&dir.full, &dir.rel).await?;
    listing::sort_entries(&mut entries, query.sort, query.order);

    let base = format!("/files{}", url_path(&dir.rel));
    let rows: Vec<String> = entries
        .iter()
        .map(|entry| {
            let href = if entry.is_dir {
                format!("/files{}", url_path(&entry.path))
            } else {
                format!("/file{}", url_path(&entry.path))
            };
            entry_row(entry, &href, &file_actions(entry))
        })
        .collect();
    let rel_attr = escape(&dir.rel);
    let body = format!(
        r#"{crumbs}
        <div class="toolbar">
            <button data-api="/api/mkdir" data-prompt="New folder name" data-prompt-field="name" data-rel-home-path="{rel_attr}">New folder</button>
            <form class="upload" data-upload="/api/upload{upload}">
                <input type="file" name="file" multiple>
                <button type="submit">Upload</button>
            </form>
        </div>
        <table class="listing">{header}{rows}</table>"#,
        crumbs = render_crumbs(&paths::breadcrumbs(&dir.rel, Root::Home), "/files"),
        upload = if dir.rel == "/" {
            String::new()
        } else {
            url_path(&dir.rel)
        },
        header = sort_header(query, &base),
        rows = rows.join(""),
    );
    Ok(layout("Files", Some(&requestor), &body).into_response())
}

// GET /file/<path>
pub async fn file(requestor: Requestor, Path(rel): Path<String>) -> PageResult {
    let resolved = paths::resolve(&requestor.account, &rel, Root::Home).await?;
    if resolved.is_dir {
        return Ok(Redirect::to(&format!("/files{}", url_path(&resolved.rel))).into_response());
    }
    let name = resolved
        .full
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let path = escape(&resolved.rel);
    let extract = if name.ends_with(crate::archive::ARCHIVE_SUFFIX) {
        format!(r#"<button data-api="/api/extract" data-rel-home-path="{path}">Extract</button>"#)
    } else {
        String::new()
    };
    let body = format!(
        r#"{crumbs}
        <dl class="card">
            <dt>Size</dt><dd>{size}</dd>
            <dt>Modified</dt><dd>{modified}</dd>
        </dl>
        <div class="toolbar">
            <a class="button" href="/api/download{download}">Download</a>
            <button data-api="/api/trash" data-rel-home-path="{path}" data-then="/files/">Trash</button>
            {extract}
        </div>"#,
        crumbs = render_crumbs(&paths::breadcrumbs(&resolved.rel, Root::Home), "/files"),
        size = escape(&listing::human_size(resolved.size)),
        modified = chrono::DateTime::<chrono::Local>::from(resolved.modified).format("%Y-%m-%d %H:%M:%S"),
        download = url_path(&resolved.rel),
    );
    Ok(layout(&name, Some(&requestor), &body).into_response())
}

fn bucket_row(bucket: &Bucket) -> String {
    format!(
        r#"<tr>
            <td><a href="/trash/{name_url}">{payload}</a></td>
            <td>{origin}</td>
            <td>{name}</td>
            <td><button data-api="/api/restore" data-bucket="{name}">Restore</button></td>
        </tr>"#,
        name_url = urlencoding::encode(&bucket.name),
        name = escape(&bucket.name),
        payload = escape(bucket.payload.as_deref().unwrap_or("(empty)")),
        origin = escape(bucket.origin.as_deref().unwrap_or("")),
    )
}

// GET /trash/<path>
pub async fn trash(
    requestor: Requestor,
    rel: Option<Path<String>>,
    Query(query): Query<SortQuery>,
) -> PageResult {
    let rel = rel.map(|Path(rel)| rel).unwrap_or_default();
    let trash_root = paths::clean(&Root::Trash.base(&requestor.account));
    if paths::contain(&trash_root, &rel)? == trash_root {
        let buckets = trash::buckets(&requestor.account).await?;
        let rows: Vec<String> = buckets.iter().map(bucket_row).collect();
        let body = format!(
            r#"<div class="toolbar">
                <button data-api="/api/trash" data-method="DELETE" data-confirm="Empty the trash?">Empty trash</button>
            </div>
            <table class="listing">
                <tr><th>Name</th><th>Original location</th><th>Trashed</th><th></th></tr>
                {}
            </table>"#,
            rows.join("")
        );
        return Ok(layout("Trash", Some(&requestor), &body).into_response());
    }

    let dir = paths::resolve(&requestor.account, &rel, Root::Trash).await?;
    if !dir.is_dir {
        return Err(Error::input("not a directory").into());
    }
    let mut entries = listing::list(&dir.full, &dir.rel).await?;
    entries.retain(|e| e.name != trash::RESTORE_PATH_FILE);
    listing::sort_entries(&mut entries, query.sort, query.order);

    let base = format!("/trash{}", url_path(&dir.rel));
    let rows: Vec<String> = entries
        .iter()
        .map(|entry| {
            // trashed files have no page of their own
            let href = if entry.is_dir {
                format!("/trash{}", url_path(&entry.path))
            } else {
                base.clone()
            };
            entry_row(entry, &href, "")
        })
        .collect();
    let body = format!(
        r#"{crumbs}<table class="listing">{header}{rows}</table>"#,
        crumbs = render_crumbs(&paths::breadcrumbs(&dir.rel, Root::Trash), "/trash"),
        header = sort_header(query, &base),
        rows = rows.join(""),
    );
    Ok(layout("Trash", Some(&requestor), &body).into_response())
}

// GET /admin
pub async fn admin(State(state): State<AppState>, requestor: Requestor) -> PageResult {
    requestor.require_admin()?;
    let users = state.users.list().await?;
    let rows: Vec<String> = users
        .iter()
        .map(|user| {
            let name = escape(&user.name);
            let impersonate = if user.name == requestor.name() {
                String::new()
            } else {
                format!(
                    r#"<button data-api="/api/user/impersonate" data-username="{name}" data-then="/">Impersonate</button>"#
                )
            };
            format!(
                r#"<tr>
                    <td><a href="/user/{url}">{name}</a></td>
                    <td>{admin}</td>
                    <td>
                        <button data-api="/api/user/toggle-admin" data-username="{name}">Toggle admin</button>
                        <button data-api="/api/user/reset-password" data-username="{name}" data-confirm="Reset password of {name} to '{default}'?">Reset password</button>
                        {impersonate}
                        <button data-api="/api/user/delete" data-username="{name}" data-confirm="Delete {name} and their home directory?">Delete</button>
                    </td>
                </tr>"#,
                url = urlencoding::encode(&user.name),
                admin = if user.is_admin { "admin" } else { "" },
                default = DEFAULT_PASSWORD,
            )
        })
        .collect();

    let uptime = system::uptime().await.unwrap_or_else(|| "unknown".to_string());
    let disk = system::disk_free(state.users.home_root())
        .await
        .unwrap_or_else(|| "unknown".to_string());
    let body = format!(
        r#"<section class="card">
            <p>Up {uptime}. Homes: {disk}. Admin group: <code>{group}</code>.</p>
            <button data-api="/api/system/reboot" data-confirm="Reboot the host?">Reboot</button>
            <button data-api="/api/system/poweroff" data-confirm="Power off the host?">Power off</button>
        </section>
        <h2>Users</h2>
        <form data-api="/api/user/create" data-then="reload" class="inline">
            <input type="text" name="username" placeholder="new user" required>
            <button type="submit">Create</button>
            <span class="meta">New accounts start with the password '{default}'.</span>
        </form>
        <table class="listing">
            <tr><th>User</th><th>Role</th><th></th></tr>
            {rows}
        </table>"#,
        uptime = escape(&uptime),
        disk = escape(&disk),
        group = escape(state.users.admin_group()),
        default = DEFAULT_PASSWORD,
        rows = rows.join(""),
    );
    Ok(layout("Admin", Some(&requestor), &body).into_response())
}

// GET /user/<username>
pub async fn user(
    State(state): State<AppState>,
    requestor: Requestor,
    Path(username): Path<String>,
) -> PageResult {
    requestor.require_self_or_admin(&username)?;
    let account = state.users.lookup(&username)?;
    let keys = ssh::list_keys(&account).await?;
    let usage = system::disk_usage(&account.home)
        .await
        .unwrap_or_else(|| "unknown".to_string());
    let name = escape(&account.name);

    let key_rows: Vec<String> = keys
        .iter()
        .map(|key| {
            format!(
                r#"<li><code>{key}</code> <button data-api="/api/user/ssh-key/delete" data-username="{name}" data-index="{index}" data-confirm="Delete this key?">Delete</button></li>"#,
                key = escape(&key.key),
                index = key.index,
            )
        })
        .collect();

    let body = format!(
        r#"<p class="meta">Home directory uses {usage}.</p>
        <h2>Change password</h2>
        <form data-api="/api/user/change-password" class="card">
            <input type="hidden" name="username" value="{name}">
            <label>Current password <input type="password" name="currentPassword" required></label>
            <label>New password <input type="password" name="newPassword" required></label>
            <label>Confirm <input type="password" name="confirmPassword" required></label>
            <button type="submit">Change</button>
        </form>
        <h2>SSH keys</h2>
        <ul class="keys">{keys}</ul>
        <form data-api="/api/user/ssh-key/add" data-then="reload" class="card">
            <input type="hidden" name="username" value="{name}">
            <textarea name="key" placeholder="ssh-ed25519 AAAA... user@host" required></textarea>
            <button type="submit">Add key</button>
        </form>"#,
        usage = escape(&usage),
        keys = key_rows.join(""),
    );
    Ok(layout(&account.name, Some(&requestor), &body).into_response())
}
