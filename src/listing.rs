//! Directory listings for the file browser.

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Type,
    #[default]
    Name,
    Link,
    Size,
    Time,
}

impl SortKey {
    pub const ALL: [SortKey; 5] = [
        SortKey::Type,
        SortKey::Name,
        SortKey::Link,
        SortKey::Size,
        SortKey::Time,
    ];

    // Order secondary keys are consulted in.
    const TIE_BREAKS: [SortKey; 5] = [
        SortKey::Type,
        SortKey::Name,
        SortKey::Time,
        SortKey::Size,
        SortKey::Link,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Type => "type",
            SortKey::Name => "name",
            SortKey::Link => "link",
            SortKey::Size => "size",
            SortKey::Time => "time",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// `?sort=size&order=desc`
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct SortQuery {
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Icon {
    Image,
    Video,
    Audio,
    Text,
    Script,
    Html,
    Document,
    Spreadsheet,
    Slide,
    Desktop,
    Documents,
    Downloads,
    Music,
    Pictures,
    Videos,
    File,
    Folder,
}

impl Icon {
    pub fn as_str(self) -> &'static str {
        match self {
            Icon::Image => "image",
            Icon::Video => "video",
            Icon::Audio => "audio",
            Icon::Text => "text",
            Icon::Script => "script",
            Icon::Html => "html",
            Icon::Document => "document",
            Icon::Spreadsheet => "spreadsheet",
            Icon::Slide => "slide",
            Icon::Desktop => "desktop",
            Icon::Documents => "documents",
            Icon::Downloads => "downloads",
            Icon::Music => "music",
            Icon::Pictures => "pictures",
            Icon::Videos => "videos",
            Icon::File => "file",
            Icon::Folder => "folder",
        }
    }
}

pub fn icon_for(name: &str, is_dir: bool) -> Icon {
    if is_dir {
        return match name.to_lowercase().as_str() {
            "desktop" => Icon::Desktop,
            "documents" => Icon::Documents,
            "downloads" => Icon::Downloads,
            "music" => Icon::Music,
            "pictures" => Icon::Pictures,
            "videos" => Icon::Videos,
            _ => Icon::Folder,
        };
    }
    let ext = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => return Icon::File,
    };
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "svg" | "webp" | "ico" | "tiff" => Icon::Image,
        "mp4" | "mkv" | "webm" | "avi" | "mov" | "wmv" | "m4v" => Icon::Video,
        "mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" | "opus" => Icon::Audio,
        "txt" | "md" | "log" | "csv" | "json" | "yaml" | "yml" | "toml" | "ini" | "conf" => {
            Icon::Text
        }
        "sh" | "bash" | "zsh" | "py" | "rb" | "pl" | "js" | "ts" | "rs" | "go" | "c" | "h"
        | "cpp" | "java" => Icon::Script,
        "html" | "htm" | "xhtml" => Icon::Html,
        "pdf" | "doc" | "docx" | "odt" | "rtf" => Icon::Document,
        "xls" | "xlsx" | "ods" => Icon::Spreadsheet,
        "ppt" | "pptx" | "odp" => Icon::Slide,
        _ => Icon::File,
    }
}

/// Bytes in 1000-based units: `999 B`, `1.500 KB`, `2.000 GB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 3] = [
        (1_000_000_000, "GB"),
        (1_000_000, "MB"),
        (1_000, "KB"),
    ];
    for (threshold, unit) in UNITS {
        if bytes >= threshold {
            return format!("{:.3} {unit}", bytes as f64 / threshold as f64);
        }
    }
    format!("{bytes} B")
}

/// One row of a directory listing.
#[derive(Clone, Debug, Serialize)]
pub struct Entry {
    pub is_dir: bool,
    pub is_compressed: bool,
    pub icon: Icon,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub human_size: String,
    #[serde(skip)]
    pub mtime: SystemTime,
    pub symlink_target: Option<String>,
}

/// Read `dir`, whose path relative to the browsing root is `rel_dir`.
/// Entries that cannot be stat'ed are skipped.
pub async fn list(dir: &Path, rel_dir: &str) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = read_dir.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();

        let mut is_dir = metadata.is_dir();
        let mut size = metadata.len();
        let mut symlink_target = None;
        if metadata.is_symlink() {
            if let Ok(target) = tokio::fs::read_link(entry.path()).await {
                let absolute: PathBuf = if target.is_relative() {
                    dir.join(&target)
                } else {
                    target.clone()
                };
                if let Ok(target_metadata) = tokio::fs::metadata(&absolute).await {
                    is_dir = target_metadata.is_dir();
                    size = target_metadata.len();
                }
                symlink_target = Some(target.to_string_lossy().into_owned());
            }
        }
        if is_dir {
            size = 0;
        }

        let path = if rel_dir.ends_with('/') {
            format!("{rel_dir}{name}")
        } else {
            format!("{rel_dir}/{name}")
        };

        entries.push(Entry {
            is_dir,
            is_compressed: name.ends_with(".tar.gz"),
            icon: icon_for(&name, is_dir),
            human_size: human_size(size),
            mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            symlink_target,
            size,
            path,
            name,
        });
    }

    Ok(entries)
}

fn compare_by(key: SortKey, a: &Entry, b: &Entry) -> Ordering {
    match key {
        // directories first
        SortKey::Type => b.is_dir.cmp(&a.is_dir),
        // case-insensitive, dotfiles last
        SortKey::Name => {
            let a_key = (a.name.starts_with('.'), a.name.to_lowercase());
            let b_key = (b.name.starts_with('.'), b.name.to_lowercase());
            a_key.cmp(&b_key)
        }
        SortKey::Time => a.mtime.cmp(&b.mtime),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::Link => a
            .symlink_target
            .as_deref()
            .unwrap_or("")
            .cmp(b.symlink_target.as_deref().unwrap_or("")),
    }
}

/// Stable sort by `key` in `order`, then ascending by the remaining keys.
pub fn sort_entries(entries: &mut [Entry], key: SortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        let primary = match order {
            SortOrder::Asc => compare_by(key, a, b),
            SortOrder::Desc => compare_by(key, b, a),
        };
        SortKey::TIE_BREAKS
            .iter()
            .filter(|k| **k != key)
            .fold(primary, |ordering, k| {
                ordering.then_with(|| compare_by(*k, a, b))
            })
    });
}
