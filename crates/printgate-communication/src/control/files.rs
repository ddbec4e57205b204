//! Watched print file directory

use chrono::{DateTime, Utc};
use printgate_core::{Result, UserError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extensions eligible for `*kick`
pub const PRINTABLE_EXTENSIONS: [&str; 2] = [".gcode", ".nc"];

/// One printable file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name inside the directory
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification
    pub time: DateTime<Utc>,
}

/// Printable files in `dir`, newest first
pub async fn list_files(dir: &Path) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !PRINTABLE_EXTENSIONS.iter().any(|ext| name.contains(ext)) {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let time = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        entries.push(FileEntry {
            name,
            size: meta.len(),
            time,
        });
    }
    entries.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

/// Path of `name` inside `dir`, refusing anything that would escape it
pub fn resolve(dir: &Path, name: &str) -> Result<PathBuf> {
    let bad = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == "..";
    if bad {
        return Err(UserError::InvalidArgument {
            reason: format!("bad file name {:?}", name),
        }
        .into());
    }
    Ok(dir.join(name))
}

/// Read a print file, mapping a missing file to a user error
pub async fn read_print_file(path: &Path) -> Result<String> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UserError::MissingFile {
            path: path.display().to_string(),
        }
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Delete a file from `dir`
pub async fn delete_file(dir: &Path, name: &str) -> Result<()> {
    let path = resolve(dir, name)?;
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UserError::MissingFile {
            path: path.display().to_string(),
        }
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Store an upload in `dir`
pub async fn store_upload(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let path = resolve(dir, name)?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = Path::new("/srv/prints");
        assert_eq!(resolve(dir, "a.gcode").unwrap(), dir.join("a.gcode"));
        assert!(resolve(dir, "../etc/passwd").is_err());
        assert!(resolve(dir, "..").is_err());
        assert!(resolve(dir, "").is_err());
    }
}
