//! Collision-free file names: `report.pdf`, `report(1).pdf`, `report(2).pdf`...

use std::{path::Path, sync::OnceLock};

use regex::Regex;

use crate::error::{Error, Result};

fn copy_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*)\((\d+)\)$").expect("copy number regex"))
}

/// Split a file name into `(core, extension)`. The extension starts at the
/// first dot, except that a leading dot belongs to the core.
pub fn split_name(name: &str) -> (&str, &str) {
    let skip = usize::from(name.starts_with('.'));
    match name[skip..].find('.') {
        Some(index) => name.split_at(skip + index),
        None => (name, ""),
    }
}

/// The name to try after `name` is taken.
pub fn next_name(name: &str) -> Option<String> {
    let (core, ext) = split_name(name);
    let core = match copy_number_regex().captures(core) {
        Some(captures) => {
            let n: u64 = captures[2].parse().ok()?;
            format!("{}({})", &captures[1], n.checked_add(1)?)
        }
        None => format!("{core}(1)"),
    };
    Some(format!("{core}{ext}"))
}

/// First name in the copy-number sequence starting at `name` that is not
/// present in `dir`.
pub async fn available_name(dir: &Path, name: &str) -> Result<String> {
    let mut candidate = name.to_string();
    while tokio::fs::symlink_metadata(dir.join(&candidate))
        .await
        .is_ok()
    {
        candidate = match next_name(&candidate) {
            Some(next) if next != candidate => next,
            _ => return Err(Error::NamingExhausted(name.to_string())),
        };
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name(".bashrc"), (".bashrc", ""));
        assert_eq!(split_name(".tar.gz"), (".tar", ".gz"));
        assert_eq!(split_name("a.tar.gz"), ("a", ".tar.gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_name(""), ("", ""));
    }

    #[test]
    fn test_next_name() {
        assert_eq!(next_name("report.pdf").unwrap(), "report(1).pdf");
        assert_eq!(next_name("report(1).pdf").unwrap(), "report(2).pdf");
        assert_eq!(next_name("a(9).tar.gz").unwrap(), "a(10).tar.gz");
        assert_eq!(next_name(".bashrc").unwrap(), ".bashrc(1)");
        assert_eq!(next_name("docs").unwrap(), "docs(1)");
        assert_eq!(next_name("x(1)(2)").unwrap(), "x(1)(3)");
        assert!(next_name(&format!("x({})", u64::MAX)).is_none());
    }

    #[tokio::test]
    async fn test_available_name_free() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(
            available_name(temp_dir.path(), "a.txt").await.unwrap(),
            "a.txt"
        );
    }

    #[tokio::test]
    async fn test_copy_number_monotonic() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "a(3).txt");
        assert_eq!(
            available_name(temp_dir.path(), "a(3).txt").await.unwrap(),
            "a(4).txt"
        );
        touch(temp_dir.path(), "a(4).txt");
        assert_eq!(
            available_name(temp_dir.path(), "a(3).txt").await.unwrap(),
            "a(5).txt"
        );
    }

    #[tokio::test]
    async fn test_idempotent_until_taken() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "x.md");
        let first = available_name(temp_dir.path(), "x.md").await.unwrap();
        let again = available_name(temp_dir.path(), "x.md").await.unwrap();
        assert_eq!(first, again);

        touch(temp_dir.path(), &first);
        let next = available_name(temp_dir.path(), "x.md").await.unwrap();
        assert_ne!(next, first);
        assert_eq!(next, "x(2).md");
    }

    #[tokio::test]
    async fn test_dangling_symlink_counts_as_taken() {
        let temp_dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", temp_dir.path().join("link")).unwrap();
        assert_eq!(
            available_name(temp_dir.path(), "link").await.unwrap(),
            "link(1)"
        );
    }

    #[tokio::test]
    async fn test_overflowing_copy_number_is_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let name = format!("x({})", u64::MAX);
        touch(temp_dir.path(), &name);
        assert!(matches!(
            available_name(temp_dir.path(), &name).await,
            Err(Error::NamingExhausted(_))
        ));
    }
}
