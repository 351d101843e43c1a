//! Maps request paths onto a user's home or trash directory.

use std::{
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use serde::Serialize;

use crate::{
    error::{Error, Result},
    users::Account,
};

/// Trash location, relative to a home directory.
pub const TRASH_DIR: &str = ".local/share/ground/trash";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Root {
    Home,
    Trash,
}

impl Root {
    pub fn base(self, account: &Account) -> PathBuf {
        match self {
            Root::Home => account.home.clone(),
            Root::Trash => account.home.join(TRASH_DIR),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Root::Home => "home",
            Root::Trash => "trash",
        }
    }
}

/// Lexically normalize `path`: drop `.`, resolve `..` against the preceding
/// component and collapse repeated separators. `..` never climbs above `/`.
pub fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::CurDir => {}
            Component::RootDir => cleaned.push(Component::RootDir),
            Component::ParentDir => {
                if !cleaned.pop() && !cleaned.has_root() {
                    cleaned.push(Component::ParentDir);
                }
            }
            Component::Normal(part) => cleaned.push(part),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Join `rel` under `base` and refuse anything that ends up outside it,
/// either by `..` or by following a symlink.
pub fn contain(base: &Path, rel: &str) -> Result<PathBuf> {
    if rel.contains('\0') {
        return Err(Error::input("path contains NUL byte"));
    }
    let base = clean(base);
    // `rel` is always relative to base, even with a leading slash
    let full = clean(&base.join(rel.trim_start_matches('/')));
    confine(&base, &full)?;
    Ok(full)
}

/// Check that `full` stays under `base` once symlinks are resolved.
///
/// The deepest part of `full` that exists is canonicalized and compared with
/// the canonical `base`; components below it do not exist yet and cannot be
/// links.
pub fn confine(base: &Path, full: &Path) -> Result<()> {
    let base = clean(base);
    let full = clean(full);
    if !full.starts_with(&base) {
        return Err(Error::input("path outside of home"));
    }
    let canonical_base = std::fs::canonicalize(&base).unwrap_or_else(|_| base.clone());

    let mut ancestor = full.as_path();
    while ancestor != base {
        if let Ok(resolved) = std::fs::canonicalize(ancestor) {
            if !resolved.starts_with(&canonical_base) {
                return Err(Error::input("path outside of home"));
            }
            return Ok(());
        }
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => break,
        }
    }
    Ok(())
}

/// `full` relative to `base`, as an absolute-looking `/a/b` string.
pub fn relative_to(base: &Path, full: &Path) -> String {
    let rest = full.strip_prefix(base).unwrap_or(full);
    let mut rel = String::from("/");
    rel.push_str(&rest.to_string_lossy());
    rel
}

/// A path that passed containment and exists.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub full: PathBuf,
    pub rel: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

pub async fn resolve(account: &Account, rel: &str, root: Root) -> Result<Resolved> {
    let base = clean(&root.base(account));
    let full = contain(&base, rel)?;
    let metadata = tokio::fs::metadata(&full)
        .await
        .map_err(|_| Error::input("path not found"))?;
    Ok(Resolved {
        rel: relative_to(&base, &full),
        is_dir: metadata.is_dir(),
        size: metadata.len(),
        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        full,
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Crumb {
    pub name: String,
    pub path: String,
    pub is_root: bool,
}

pub fn breadcrumbs(rel: &str, root: Root) -> Vec<Crumb> {
    let mut crumbs = vec![Crumb {
        name: root.label().to_string(),
        path: "/".to_string(),
        is_root: true,
    }];
    let mut cumulative = String::new();
    for part in rel.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if part == ".." {
            crumbs.truncate(crumbs.len().saturating_sub(1).max(1));
            cumulative.truncate(cumulative.rfind('/').unwrap_or(0));
            continue;
        }
        cumulative.push('/');
        cumulative.push_str(part);
        crumbs.push(Crumb {
            name: part.to_string(),
            path: cumulative.clone(),
            is_root: false,
        });
    }
    crumbs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn alice(home: &Path) -> Account {
        Account {
            name: "alice".to_string(),
            uid: 1000,
            gid: 1000,
            home: home.to_path_buf(),
        }
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean(Path::new("/a//b/./c/")), PathBuf::from("/a/b/c"));
        assert_eq!(clean(Path::new("/../../etc")), PathBuf::from("/etc"));
        assert_eq!(clean(Path::new("/")), PathBuf::from("/"));
    }

    #[test]
    fn test_contain_traversal() {
        let home = Path::new("/home/alice");
        for rel in ["/../../etc/passwd", "/foo/../../etc", "../alice2", "/../alice2/x"] {
            assert!(contain(home, rel).is_err(), "{rel} escaped");
        }
        assert_eq!(contain(home, "//").unwrap(), PathBuf::from("/home/alice"));
        assert_eq!(contain(home, "").unwrap(), PathBuf::from("/home/alice"));
        assert_eq!(
            contain(home, "/docs/../notes.txt").unwrap(),
            PathBuf::from("/home/alice/notes.txt")
        );
        assert_eq!(
            contain(home, "/docs/./a//b").unwrap(),
            PathBuf::from("/home/alice/docs/a/b")
        );
    }

    #[test]
    fn test_contain_never_leaves_base() {
        let home = Path::new("/home/alice");
        let pieces = ["..", ".", "", "etc", "alice", "/", "x"];
        for a in pieces {
            for b in pieces {
                for c in pieces {
                    let rel = format!("{a}/{b}/{c}");
                    if let Ok(full) = contain(home, &rel) {
                        assert!(full.starts_with(home), "{rel} resolved to {full:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_relative_to() {
        let base = Path::new("/home/alice");
        assert_eq!(relative_to(base, Path::new("/home/alice")), "/");
        assert_eq!(relative_to(base, Path::new("/home/alice/a/b")), "/a/b");
    }

    #[test]
    fn test_breadcrumbs() {
        let crumbs = breadcrumbs("/docs/work", Root::Home);
        assert_eq!(crumbs.len(), 3);
        assert_eq!(crumbs[0].name, "home");
        assert!(crumbs[0].is_root);
        assert_eq!(crumbs[1].path, "/docs");
        assert_eq!(crumbs[2].path, "/docs/work");

        let crumbs = breadcrumbs("/", Root::Trash);
        assert_eq!(crumbs.len(), 1);
        assert_eq!(crumbs[0].name, "trash");
    }

    #[tokio::test]
    async fn test_resolve() {
        let temp_dir = TempDir::new().unwrap();
        let account = alice(temp_dir.path());
        std::fs::create_dir(temp_dir.path().join("docs")).unwrap();
        std::fs::write(temp_dir.path().join("docs/a.txt"), b"hello").unwrap();

        let resolved = resolve(&account, "/docs/a.txt", Root::Home).await.unwrap();
        assert!(!resolved.is_dir);
        assert_eq!(resolved.size, 5);
        assert_eq!(resolved.rel, "/docs/a.txt");

        let root = resolve(&account, "/", Root::Home).await.unwrap();
        assert!(root.is_dir);
        assert_eq!(root.rel, "/");

        let missing = resolve(&account, "/nope", Root::Home).await;
        assert!(matches!(missing, Err(Error::InputInvalid(m)) if m == "path not found"));

        let outside = resolve(&account, "/../../etc/passwd", Root::Home).await;
        assert!(matches!(outside, Err(Error::InputInvalid(m)) if m == "path outside of home"));
    }

    #[tokio::test]
    async fn test_symlinks_out_of_home_rejected() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("victim"), b"secret").unwrap();
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path();
        let account = alice(home);
        std::os::unix::fs::symlink(outside.path(), home.join("evil")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("victim"), home.join("victim")).unwrap();

        for rel in ["/evil/victim", "/evil", "/victim"] {
            let result = resolve(&account, rel, Root::Home).await;
            assert!(
                matches!(result, Err(Error::InputInvalid(ref m)) if m == "path outside of home"),
                "{rel} resolved"
            );
        }
        // not there yet, but its parent is a link out
        assert!(contain(home, "/evil/new.txt").is_err());
        assert!(contain(home, "/evil/a/b/c").is_err());
    }

    #[tokio::test]
    async fn test_symlinks_within_home_allowed() {
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path();
        let account = alice(home);
        std::fs::create_dir(home.join("docs")).unwrap();
        std::fs::write(home.join("docs/a.txt"), b"a").unwrap();
        std::os::unix::fs::symlink(home.join("docs"), home.join("shortcut")).unwrap();
        std::os::unix::fs::symlink(home.join("gone"), home.join("dangling")).unwrap();

        let resolved = resolve(&account, "/shortcut/a.txt", Root::Home).await.unwrap();
        assert_eq!(resolved.rel, "/shortcut/a.txt");
        assert!(contain(home, "/shortcut/new.txt").is_ok());
        assert!(contain(home, "/dangling").is_ok());
    }

    #[tokio::test]
    async fn test_resolve_trash_root() {
        let temp_dir = TempDir::new().unwrap();
        let account = alice(temp_dir.path());
        std::fs::create_dir_all(temp_dir.path().join(TRASH_DIR).join("bucket")).unwrap();

        let resolved = resolve(&account, "/bucket", Root::Trash).await.unwrap();
        assert!(resolved.full.ends_with("ground/trash/bucket"));
        assert!(resolve(&account, "/../../../../Documents", Root::Trash)
            .await
            .is_err());
    }
}
