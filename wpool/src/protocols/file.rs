//! Local-filesystem protocol handler

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::commands::{ErrorKind, JobFlags};
use crate::error::{PoolError, Result};
use crate::payload::{DirEntry, DuResult, FileStat};
use crate::runtime::ProtocolHandler;

/// Serves the command set directly against the local filesystem
#[derive(Debug, Default)]
pub struct FileProtocol;

impl FileProtocol {
    pub fn new() -> Self {
        Self
    }

    fn deny_exists(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(PoolError::job(
                ErrorKind::FileAlreadyExist,
                format!("{} already exists", path.display()),
            ));
        }
        Ok(())
    }
}

/// Recursive directory copy; boxed because async fns cannot recurse directly
fn copy_tree<'a>(
    src: &'a Path,
    dest: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dest).await?;
        let mut read_dir = tokio::fs::read_dir(src).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let ty = entry.file_type().await?;
            let src_path = entry.path();
            let dest_path = dest.join(entry.file_name());
            if ty.is_dir() {
                copy_tree(&src_path, &dest_path).await?;
            } else if ty.is_file() {
                tokio::fs::copy(&src_path, &dest_path).await?;
            }
        }
        Ok(())
    })
}

fn stat_of(path: &Path) -> Result<FileStat> {
    let meta = std::fs::symlink_metadata(path)?;
    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    Ok(FileStat {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        size: meta.len(),
        is_dir: meta.is_dir(),
        mode: {
            use std::os::unix::fs::MetadataExt;
            meta.mode()
        },
        mtime_ms,
    })
}

#[async_trait]
impl ProtocolHandler for FileProtocol {
    fn name(&self) -> &str {
        "file"
    }

    async fn stat(&mut self, path: &str) -> Result<FileStat> {
        stat_of(Path::new(path))
    }

    async fn get(&mut self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn put(&mut self, path: &str, data: Vec<u8>, flags: JobFlags) -> Result<()> {
        let path = Path::new(path);
        if !flags.contains(JobFlags::OVERWRITE) {
            Self::deny_exists(path)?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn listdir(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        let mut read_dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| PoolError::job(ErrorKind::CannotEnterDirectory, format!("{path}: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                is_dir: meta.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn rename(&mut self, src: &str, dest: &str, flags: JobFlags) -> Result<()> {
        if !flags.contains(JobFlags::OVERWRITE) {
            Self::deny_exists(Path::new(dest))?;
        }
        tokio::fs::rename(src, dest).await?;
        Ok(())
    }

    async fn copy(&mut self, src: &str, dest: &str, flags: JobFlags) -> Result<()> {
        let src_path = PathBuf::from(src);
        let dest_path = PathBuf::from(dest);
        if !flags.contains(JobFlags::OVERWRITE) {
            Self::deny_exists(&dest_path)?;
        }

        let meta = tokio::fs::metadata(&src_path).await?;
        if meta.is_dir() {
            if !flags.contains(JobFlags::RECURSIVE) {
                return Err(PoolError::job(
                    ErrorKind::UnsupportedAction,
                    format!("{src} is a directory; recursive flag required"),
                ));
            }
            copy_tree(&src_path, &dest_path).await?;
        } else {
            tokio::fs::copy(&src_path, &dest_path).await?;
        }
        Ok(())
    }

    async fn del(&mut self, path: &str, is_file: bool) -> Result<()> {
        if is_file {
            tokio::fs::remove_file(path).await?;
        } else {
            tokio::fs::remove_dir_all(path).await?;
        }
        Ok(())
    }

    async fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn truncate(&mut self, path: &str, length: u64) -> Result<()> {
        let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(length).await?;
        Ok(())
    }

    async fn du(&mut self, path: &str, recursive: bool) -> Result<DuResult> {
        debug!(path, recursive, "file protocol: du");
        let mut usage = DuResult::default();
        let max_depth = if recursive { usize::MAX } else { 1 };

        for entry in WalkDir::new(path).max_depth(max_depth) {
            let entry = entry.map_err(|e| PoolError::job(ErrorKind::CannotEnterDirectory, e.to_string()))?;
            if entry.file_type().is_dir() {
                usage.dirs += 1;
            } else if entry.file_type().is_file() {
                usage.files += 1;
                usage.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        // The root directory itself is not counted
        if usage.dirs > 0 {
            usage.dirs -= 1;
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_stat_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();

        let mut proto = FileProtocol::new();
        let stat = proto.stat(&path_str(&file)).await.unwrap();
        assert_eq!(stat.name, "a.txt");
        assert_eq!(stat.size, 5);
        assert!(!stat.is_dir);
        assert!(stat.mtime_ms > 0);
    }

    #[tokio::test]
    async fn test_stat_missing_is_error() {
        let tmp = TempDir::new().unwrap();
        let mut proto = FileProtocol::new();
        let err = proto.stat(&path_str(&tmp.path().join("nope"))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CannotEnterDirectory);
    }

    #[tokio::test]
    async fn test_get_put_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("data.bin");

        let mut proto = FileProtocol::new();
        proto
            .put(&path_str(&file), vec![1, 2, 3], JobFlags::NONE)
            .await
            .unwrap();
        assert_eq!(proto.get(&path_str(&file)).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_put_without_overwrite_rejects_existing() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("exists");
        fs::write(&file, b"old").unwrap();

        let mut proto = FileProtocol::new();
        let err = proto
            .put(&path_str(&file), b"new".to_vec(), JobFlags::NONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileAlreadyExist);

        proto
            .put(&path_str(&file), b"new".to_vec(), JobFlags::OVERWRITE)
            .await
            .unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_listdir_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b"), b"x").unwrap();
        fs::write(tmp.path().join("a"), b"xy").unwrap();
        fs::create_dir(tmp.path().join("c")).unwrap();

        let mut proto = FileProtocol::new();
        let entries = proto.listdir(&path_str(tmp.path())).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(entries[2].is_dir);
    }

    #[tokio::test]
    async fn test_del_file_and_dir() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f");
        let dir = tmp.path().join("d");
        fs::write(&file, b"x").unwrap();
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("inner"), b"y").unwrap();

        let mut proto = FileProtocol::new();
        proto.del(&path_str(&file), true).await.unwrap();
        proto.del(&path_str(&dir), false).await.unwrap();
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_copy_directory_requires_recursive() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("x"), b"1").unwrap();

        let mut proto = FileProtocol::new();
        let err = proto
            .copy(&path_str(&src), &path_str(&tmp.path().join("dst")), JobFlags::NONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAction);

        proto
            .copy(
                &path_str(&src),
                &path_str(&tmp.path().join("dst")),
                JobFlags::RECURSIVE,
            )
            .await
            .unwrap();
        assert_eq!(fs::read(tmp.path().join("dst/x")).unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_truncate() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("t");
        fs::write(&file, vec![0u8; 100]).unwrap();

        let mut proto = FileProtocol::new();
        proto.truncate(&path_str(&file), 10).await.unwrap();
        assert_eq!(fs::metadata(&file).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_du_recursive_counts_tree() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), vec![0u8; 100]).unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/b"), vec![0u8; 200]).unwrap();

        let mut proto = FileProtocol::new();
        let recursive = proto.du(&path_str(tmp.path()), true).await.unwrap();
        assert_eq!(recursive.bytes, 300);
        assert_eq!(recursive.files, 2);
        assert_eq!(recursive.dirs, 1);

        let shallow = proto.du(&path_str(tmp.path()), false).await.unwrap();
        assert_eq!(shallow.bytes, 100);
        assert_eq!(shallow.files, 1);
    }
}
