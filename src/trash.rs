//! Per-user trash.
//!
//! Each trashed entry gets its own bucket directory named after the moment it
//! was trashed (`YYYYMMDDHHMMSS.mmm`). The bucket holds the entry itself plus
//! a one-line file with the absolute path it came from.

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use chrono::{DateTime, TimeZone};
use regex::Regex;
use serde::Serialize;

use tokio::{
    fs::OpenOptions,
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::{
    error::{Error, Result},
    naming::available_name,
    os::{chown, make_dirs, Invocation, Program},
    paths::{self, Root},
    users::Account,
};

pub const RESTORE_PATH_FILE: &str = ".ground-trash-restore-path";

fn bucket_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{14}\.[0-9]{3}$").expect("bucket regex"))
}

pub fn is_bucket_name(name: &str) -> bool {
    bucket_regex().is_match(name)
}

pub fn bucket_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d%H%M%S%.3f").to_string()
}

/// A bucket as shown on the trash page.
#[derive(Clone, Debug, Serialize)]
pub struct Bucket {
    pub name: String,
    pub payload: Option<String>,
    pub origin: Option<String>,
}

async fn payload_of(bucket_dir: &Path) -> Result<Option<PathBuf>> {
    let mut read_dir = tokio::fs::read_dir(bucket_dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        if entry.file_name() != RESTORE_PATH_FILE {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

// The marker lives in a directory the user controls; never follow a link there.
async fn read_marker(bucket_dir: &Path) -> Option<String> {
    let mut file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(bucket_dir.join(RESTORE_PATH_FILE))
        .await
        .ok()?;
    let mut origin = String::new();
    file.read_to_string(&mut origin).await.ok()?;
    Some(origin.trim_end_matches(['\n', '\r']).to_string())
}

async fn write_marker(account: &Account, bucket_dir: &Path, origin: &Path) -> Result<()> {
    let marker = bucket_dir.join(RESTORE_PATH_FILE);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(&marker)
        .await?;
    file.write_all(format!("{}\n", origin.display()).as_bytes())
        .await?;
    file.flush().await?;
    chown(&marker, account)
}

fn mv(account: &Account, from: &Path, to: &Path) -> Invocation {
    Invocation::new(Program::Mv)
        .arg("--no-target-directory")
        .arg("--")
        .arg(from)
        .arg(to)
        .as_user(account)
}

/// The trash directory, created on demand and checked to still be inside
/// the home directory.
async fn trash_root(account: &Account, create: bool) -> Result<PathBuf> {
    let home = paths::clean(&account.home);
    let trash_root = paths::clean(&Root::Trash.base(account));
    if create {
        make_dirs(account, &trash_root).await?;
    }
    paths::confine(&home, &trash_root)?;
    Ok(trash_root)
}

/// Move the entry at `rel` (under the home directory) into a new bucket.
/// Returns the bucket name.
pub async fn trash<Tz: TimeZone>(account: &Account, rel: &str, now: &DateTime<Tz>) -> Result<String>
where
    Tz::Offset: std::fmt::Display,
{
    let home = paths::clean(&account.home);
    let trash_dir = paths::clean(&Root::Trash.base(account));
    let source = paths::resolve(account, rel, Root::Home).await?;
    if source.full == home {
        return Err(Error::input("cannot trash the home directory"));
    }
    if source.full.starts_with(&trash_dir) {
        return Err(Error::input("already in the trash"));
    }
    if trash_dir.starts_with(&source.full) {
        return Err(Error::input("cannot trash a directory that holds the trash"));
    }
    let Some(basename) = source.full.file_name() else {
        return Err(Error::input("invalid path"));
    };

    let trash_root = trash_root(account, true).await?;
    let bucket = bucket_name(now);
    let bucket_dir = trash_root.join(&bucket);
    // Fails when another trash landed in the same millisecond.
    Invocation::new(Program::Mkdir)
        .arg("--")
        .arg(&bucket_dir)
        .as_user(account)
        .run()
        .await?;

    let filled = match write_marker(account, &bucket_dir, &source.full).await {
        Ok(()) => mv(account, &source.full, &bucket_dir.join(basename))
            .run()
            .await
            .map(drop),
        Err(error) => Err(error),
    };
    if let Err(error) = filled {
        // Only drop the bucket while the entry is still where it was.
        if tokio::fs::symlink_metadata(&source.full).await.is_ok() {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&bucket_dir).await {
                tracing::warn!(bucket = %bucket, error = %cleanup, "could not remove unused bucket");
            }
        }
        return Err(error);
    }

    tracing::info!(user = %account.name, path = %source.rel, bucket = %bucket, "trashed");
    Ok(bucket)
}

/// Put the payload of `bucket` back where it came from, renaming it if the
/// spot is taken. Returns the restored path.
pub async fn restore(account: &Account, bucket: &str) -> Result<PathBuf> {
    if !is_bucket_name(bucket) {
        return Err(Error::input("invalid trash bucket"));
    }
    let home = paths::clean(&account.home);
    let bucket_dir = trash_root(account, false).await?.join(bucket);

    let origin = read_marker(&bucket_dir)
        .await
        .ok_or_else(|| Error::input("trash bucket has no restore path"))?;
    let origin = paths::clean(Path::new(&origin));
    if !origin.is_absolute() || !origin.starts_with(&home) || origin == home {
        return Err(Error::input("path outside of home"));
    }
    let (Some(parent), Some(basename)) = (origin.parent(), origin.file_name()) else {
        return Err(Error::input("invalid restore path"));
    };
    paths::confine(&home, &origin)?;

    let payload = payload_of(&bucket_dir)
        .await?
        .ok_or_else(|| Error::input("trash bucket is empty"))?;

    make_dirs(account, parent).await?;
    paths::confine(&home, parent)?;
    let name = available_name(parent, &basename.to_string_lossy()).await?;
    let destination = parent.join(name);

    mv(account, &payload, &destination).run().await?;
    tokio::fs::remove_file(bucket_dir.join(RESTORE_PATH_FILE)).await?;
    tokio::fs::remove_dir(&bucket_dir).await?;
    tracing::info!(user = %account.name, bucket, path = %destination.display(), "restored");
    Ok(destination)
}

/// Remove every bucket. Returns how many were removed.
pub async fn empty(account: &Account) -> Result<usize> {
    let trash_root = trash_root(account, false).await?;
    let mut read_dir = match tokio::fs::read_dir(&trash_root).await {
        Ok(read_dir) => read_dir,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(error) => return Err(error.into()),
    };

    let mut removed = 0;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_bucket_name) {
            continue;
        }
        // remove_dir_all unlinks symlinks instead of following them
        tokio::fs::remove_dir_all(entry.path()).await?;
        removed += 1;
    }
    tracing::info!(user = %account.name, removed, "trash emptied");
    Ok(removed)
}

/// Buckets in the trash, newest first.
pub async fn buckets(account: &Account) -> Result<Vec<Bucket>> {
    let trash_root = trash_root(account, false).await?;
    let mut read_dir = match tokio::fs::read_dir(&trash_root).await {
        Ok(read_dir) => read_dir,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };

    let mut buckets = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_bucket_name(&name) || !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let path = entry.path();
        let origin = read_marker(&path).await;
        let payload = payload_of(&path)
            .await
            .ok()
            .flatten()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
        buckets.push(Bucket {
            name,
            payload,
            origin,
        });
    }
    buckets.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(buckets)
}
