//! Directory creation and moves inside a home directory, run as its owner.

use std::path::PathBuf;

use crate::{
    error::{Error, Result},
    os::{Invocation, Program},
    paths::{self, Root},
    users::Account,
};

/// `name` must be a single, ordinary path component.
pub fn check_component(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::input("invalid name"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(Error::input("name must not contain '/'"));
    }
    Ok(())
}

/// Create directory `name` inside the directory at `rel_parent`.
pub async fn mkdir(account: &Account, rel_parent: &str, name: &str) -> Result<PathBuf> {
    check_component(name)?;
    let parent = paths::resolve(account, rel_parent, Root::Home).await?;
    if !parent.is_dir {
        return Err(Error::input("not a directory"));
    }
    let target = parent.full.join(name);
    if tokio::fs::symlink_metadata(&target).await.is_ok() {
        return Err(Error::input("destination exists"));
    }

    Invocation::new(Program::Mkdir)
        .arg("--")
        .arg(&target)
        .as_user(account)
        .run()
        .await?;
    tracing::info!(user = %account.name, path = %target.display(), "directory created");
    Ok(target)
}

/// Checks a move from `from` to `to` must pass before `mv` runs.
/// Returns the full source and destination paths.
pub async fn plan_move(account: &Account, from: &str, to: &str) -> Result<(PathBuf, PathBuf)> {
    let home = paths::clean(&account.home);
    let source = paths::resolve(account, from, Root::Home).await?;
    if source.full == home {
        return Err(Error::input("cannot move the home directory"));
    }
    let destination = paths::contain(&home, to)?;
    if destination == home {
        return Err(Error::input("destination exists"));
    }
    if destination.starts_with(&source.full) {
        return Err(Error::input("cannot move a directory into itself"));
    }
    if tokio::fs::symlink_metadata(&destination).await.is_ok() {
        return Err(Error::input("destination exists"));
    }
    let parent_is_dir = match destination.parent() {
        Some(parent) => tokio::fs::metadata(parent)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false),
        None => false,
    };
    if !parent_is_dir {
        return Err(Error::input("destination directory not found"));
    }
    Ok((source.full, destination))
}

pub async fn move_entry(account: &Account, from: &str, to: &str) -> Result<PathBuf> {
    let (source, destination) = plan_move(account, from, to).await?;
    Invocation::new(Program::Mv)
        .arg("--no-target-directory")
        .arg("--")
        .arg(&source)
        .arg(&destination)
        .as_user(account)
        .run()
        .await?;
    tracing::info!(
        user = %account.name,
        from = %source.display(),
        to = %destination.display(),
        "moved"
    );
    Ok(destination)
}
