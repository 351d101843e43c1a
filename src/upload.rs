//! Multipart uploads into a directory of the user's home.
//!
//! Parts are written one after the other. A failure stops the upload but
//! leaves already written parts in place.

use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

use crate::{
    error::{Error, Result},
    naming::available_name,
    os::{chown, make_dirs},
    paths,
    users::Account,
};

const UPLOAD_MODE: u32 = 0o644;

/// Split an uploaded file name (which may carry a relative directory, as sent
/// by folder uploads) into directory components and the final name.
pub fn split_upload_name(file_name: &str) -> Result<(Vec<&str>, &str)> {
    let mut components: Vec<&str> = file_name
        .split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .collect();
    if components.iter().any(|c| *c == "." || *c == ".." || c.contains('\0')) {
        return Err(Error::input("invalid file name"));
    }
    let name = components
        .pop()
        .ok_or_else(|| Error::input("missing file name"))?;
    Ok((components, name))
}

fn upload_error(error: axum::extract::multipart::MultipartError) -> Error {
    Error::Io(std::io::Error::other(error.to_string()))
}

/// Store every part of `multipart` under `dir`, which must be inside the
/// account's home. Returns the written paths in order.
pub async fn receive(account: &Account, dir: &Path, mut multipart: Multipart) -> Result<Vec<PathBuf>> {
    let home = paths::clean(&account.home);
    let mut written = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(upload_error)? {
        let file_name = field
            .file_name()
            .ok_or_else(|| Error::input("part has no filename"))?
            .to_string();
        let (sub_dirs, name) = split_upload_name(&file_name)?;

        let target_dir = paths::clean(&sub_dirs.iter().fold(dir.to_path_buf(), |p, c| p.join(c)));
        paths::confine(&home, &target_dir)?;
        make_dirs(account, &target_dir).await?;
        // a link may have appeared between the check and mkdir
        paths::confine(&home, &target_dir)?;

        let name = available_name(&target_dir, name).await?;
        let path = target_dir.join(&name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(UPLOAD_MODE)
            .custom_flags(libc::O_NOFOLLOW)
            .open(&path)
            .await?;
        chown(&path, account)?;

        while let Some(chunk) = field.chunk().await.map_err(upload_error)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::info!(user = %account.name, path = %path.display(), "uploaded");
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, extract::FromRequest, http::Request};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const BOUNDARY: &str = "X-GROUND-BOUNDARY";

    fn body(parts: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (file_name, content) in parts {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    async fn multipart(parts: &[(&str, &str)]) -> Multipart {
        let request = Request::builder()
            .method("POST")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body(parts)))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    #[test]
    fn test_split_upload_name() {
        assert_eq!(split_upload_name("a.txt").unwrap(), (vec![], "a.txt"));
        assert_eq!(
            split_upload_name("photos/2024/a.jpg").unwrap(),
            (vec!["photos", "2024"], "a.jpg")
        );
        assert!(split_upload_name("../a.txt").is_err());
        assert!(split_upload_name("a/./b").is_err());
        assert!(split_upload_name("").is_err());
        assert!(split_upload_name("///").is_err());
    }

    #[tokio::test]
    async fn test_repeated_uploads_get_copy_numbers() {
        let temp_dir = TempDir::new().unwrap();
        let account = Account::current_for_tests(temp_dir.path());
        let docs = temp_dir.path().join("docs");
        std::fs::create_dir(&docs).unwrap();

        for _ in 0..3 {
            receive(&account, &docs, multipart(&[("report.pdf", "pdf")]).await)
                .await
                .unwrap();
        }

        for name in ["report.pdf", "report(1).pdf", "report(2).pdf"] {
            let path = docs.join(name);
            assert_eq!(std::fs::read(&path).unwrap(), b"pdf", "{name}");
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o600, 0o600);
            assert_eq!(mode & 0o133, 0);
        }
    }

    #[tokio::test]
    async fn test_upload_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let account = Account::current_for_tests(temp_dir.path());

        let written = receive(
            &account,
            temp_dir.path(),
            multipart(&[("album/one.jpg", "1"), ("album/two.jpg", "2")]).await,
        )
        .await
        .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(
            std::fs::read(temp_dir.path().join("album/two.jpg")).unwrap(),
            b"2"
        );
    }

    #[tokio::test]
    async fn test_bad_part_keeps_earlier_parts() {
        let temp_dir = TempDir::new().unwrap();
        let account = Account::current_for_tests(temp_dir.path());

        let result = receive(
            &account,
            temp_dir.path(),
            multipart(&[("ok.txt", "fine"), ("../escape.txt", "bad")]).await,
        )
        .await;

        assert!(result.is_err());
        assert!(temp_dir.path().join("ok.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_through_symlink_out_of_home() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let account = Account::current_for_tests(temp_dir.path());
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("evil")).unwrap();

        let result = receive(
            &account,
            temp_dir.path(),
            multipart(&[("evil/dropped.txt", "x")]).await,
        )
        .await;
        assert!(matches!(result, Err(Error::InputInvalid(ref m)) if m == "path outside of home"));

        let result = receive(
            &account,
            &temp_dir.path().join("evil"),
            multipart(&[("dropped.txt", "x")]).await,
        )
        .await;
        assert!(result.is_err());
        assert!(!outside.path().join("dropped.txt").exists());
    }
}
