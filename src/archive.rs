//! `.tar.gz` compression and extraction, run as the owning user.

use std::path::PathBuf;

use crate::{
    error::{Error, Result},
    naming::available_name,
    os::{self, Invocation, Program},
    paths::{self, Root},
    users::Account,
};

pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

fn check_quote_free(path: &std::path::Path) -> Result<()> {
    if path.to_string_lossy().contains('\'') {
        return Err(Error::input("path must not contain a single quote"));
    }
    Ok(())
}

/// Archive the directory at `rel` next to itself as `<name>.tar.gz`.
pub async fn compress(account: &Account, rel: &str) -> Result<PathBuf> {
    let source = paths::resolve(account, rel, Root::Home).await?;
    check_quote_free(&source.full)?;
    if !source.is_dir {
        return Err(Error::input("not a directory"));
    }
    let (Some(parent), Some(basename)) = (source.full.parent(), source.full.file_name()) else {
        return Err(Error::input("cannot compress the home directory"));
    };
    if source.full == paths::clean(&account.home) {
        return Err(Error::input("cannot compress the home directory"));
    }

    let name = available_name(
        parent,
        &format!("{}{ARCHIVE_SUFFIX}", basename.to_string_lossy()),
    )
    .await?;
    let target = parent.join(name);
    check_quote_free(&target)?;

    os::tar_create(&account.name, &target, &source.full).await?;
    tracing::info!(user = %account.name, path = %source.rel, "compressed");
    Ok(target)
}

/// Unpack the archive at `rel` into a fresh sibling directory named after it.
pub async fn extract(account: &Account, rel: &str) -> Result<PathBuf> {
    let source = paths::resolve(account, rel, Root::Home).await?;
    check_quote_free(&source.full)?;
    if source.is_dir {
        return Err(Error::input("not a file"));
    }
    let (Some(parent), Some(file_name)) = (source.full.parent(), source.full.file_name()) else {
        return Err(Error::input("invalid path"));
    };
    let file_name = file_name.to_string_lossy();
    let stem = match file_name.strip_suffix(ARCHIVE_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem,
        _ => return Err(Error::input("only .tar.gz archives can be extracted")),
    };

    let name = available_name(parent, stem).await?;
    let out = parent.join(name);
    check_quote_free(&out)?;
    Invocation::new(Program::Mkdir)
        .arg("--")
        .arg(&out)
        .as_user(account)
        .run()
        .await?;

    os::tar_extract(&account.name, &source.full, &out).await?;
    tracing::info!(user = %account.name, path = %source.rel, "extracted");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_compress_rejects_files_and_home() {
        let temp_dir = TempDir::new().unwrap();
        let account = Account::current_for_tests(temp_dir.path());
        std::fs::write(temp_dir.path().join("a.txt"), b"").unwrap();

        assert!(matches!(
            compress(&account, "/a.txt").await,
            Err(Error::InputInvalid(_))
        ));
        assert!(matches!(
            compress(&account, "/").await,
            Err(Error::InputInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_quotes_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let account = Account::current_for_tests(temp_dir.path());
        std::fs::create_dir(temp_dir.path().join("it's")).unwrap();
        std::fs::write(temp_dir.path().join("o'k.tar.gz"), b"").unwrap();

        assert!(matches!(
            compress(&account, "/it's").await,
            Err(Error::InputInvalid(_))
        ));
        assert!(matches!(
            extract(&account, "/o'k.tar.gz").await,
            Err(Error::InputInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_extract_requires_tar_gz() {
        let temp_dir = TempDir::new().unwrap();
        let account = Account::current_for_tests(temp_dir.path());
        std::fs::write(temp_dir.path().join("a.zip"), b"").unwrap();
        std::fs::write(temp_dir.path().join(".tar.gz"), b"").unwrap();
        std::fs::create_dir(temp_dir.path().join("d.tar.gz")).unwrap();

        for rel in ["/a.zip", "/.tar.gz", "/d.tar.gz"] {
            assert!(
                matches!(extract(&account, rel).await, Err(Error::InputInvalid(_))),
                "{rel} accepted"
            );
        }
        assert!(!temp_dir.path().join("a").exists());
    }
}
