//! `~/.ssh/authorized_keys` editing.

use std::{path::PathBuf, sync::OnceLock};

use regex::Regex;
use tokio::{
    fs::OpenOptions,
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::{
    error::{Error, Result},
    os::{make_dirs, Invocation, Program},
    paths,
    users::Account,
};

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^ssh-(rsa|ed25519) [A-Za-z0-9+/]+={0,3}( [^@]+@[^@]+)?$")
            .expect("ssh key regex")
    })
}

pub fn is_valid_key(key: &str) -> bool {
    key_regex().is_match(key)
}

pub fn authorized_keys_path(account: &Account) -> PathBuf {
    account.home.join(".ssh").join("authorized_keys")
}

/// A line of `authorized_keys` with its 1-based line number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyLine {
    pub index: usize,
    pub key: String,
}

fn open_options(append: bool) -> OpenOptions {
    let mut options = OpenOptions::new();
    options
        .read(!append)
        .append(append)
        .custom_flags(libc::O_NOFOLLOW);
    options
}

/// Contents of the file, `None` when it does not exist. A symlinked file or
/// a `.ssh` leading out of the home is refused.
async fn read_keys_file(account: &Account) -> Result<Option<String>> {
    let path = authorized_keys_path(account);
    paths::confine(&paths::clean(&account.home), &path)?;
    let mut file = match open_options(false).open(&path).await {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;
    Ok(Some(contents))
}

/// Non-blank lines of the file, numbered as `sed` sees them.
pub async fn list_keys(account: &Account) -> Result<Vec<KeyLine>> {
    let Some(contents) = read_keys_file(account).await? else {
        return Ok(Vec::new());
    };
    Ok(contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| KeyLine {
            index: i + 1,
            key: line.to_string(),
        })
        .collect())
}

pub async fn add_key(account: &Account, key: &str) -> Result<()> {
    let key = key.trim();
    if !is_valid_key(key) {
        return Err(Error::input("invalid ssh key"));
    }
    let path = authorized_keys_path(account);
    let home = paths::clean(&account.home);
    paths::confine(&home, &path)?;
    if let Some(ssh_dir) = path.parent() {
        make_dirs(account, ssh_dir).await?;
    }
    if tokio::fs::symlink_metadata(&path).await.is_err() {
        Invocation::new(Program::Touch)
            .arg("--")
            .arg(&path)
            .as_user(account)
            .run()
            .await?;
    }
    paths::confine(&home, &path)?;

    let mut file = open_options(true).open(&path).await?;
    file.write_all(format!("{key}\n").as_bytes()).await?;
    file.flush().await?;
    tracing::info!(user = %account.name, "ssh key added");
    Ok(())
}

/// Delete line `index` (1-based) of the file.
pub async fn delete_key(account: &Account, index: usize) -> Result<()> {
    let path = authorized_keys_path(account);
    let contents = read_keys_file(account)
        .await?
        .ok_or_else(|| Error::input("no authorized keys"))?;
    if index == 0 || index > contents.lines().count() {
        return Err(Error::input("no such key"));
    }

    Invocation::new(Program::Sed)
        .arg("-i")
        .arg(format!("{index}d"))
        .arg(&path)
        .as_user(account)
        .run()
        .await?;
    tracing::info!(user = %account.name, index, "ssh key deleted");
    Ok(())
}
