//! Filesystem reference implementation of [`StorageDriver`].
//!
//! Writers write to the real target path directly; `put_content` goes
//! through a temp file in the same directory and renames it into place so
//! replacement is atomic.
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::StreamExt;
use serde::Deserialize;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::errors::{Error, Result};
use super::{ByteStream, FileInfo, FileWriter, Key, StorageDriver, WalkDecision};

#[derive(Clone, Debug, Deserialize)]
pub struct FilesystemConfig {
    #[serde(rename = "rootdirectory")]
    pub root_directory: PathBuf,
}

impl FilesystemConfig {
    pub fn new_driver(&self) -> FilesystemDriver {
        FilesystemDriver::new(self.root_directory.clone())
    }
}

#[derive(Clone, Debug)]
pub struct FilesystemDriver {
    root: PathBuf,
}

impl FilesystemDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, key: &Key) -> PathBuf {
        self.root.join(key.as_pathbuf())
    }

    async fn ensure_parent(&self, full: &Path, key: &Key) -> Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Io {
                    path: String::from(key),
                    source: e,
                })?;
        }
        Ok(())
    }

    fn walk_dir<'a>(
        &'a self,
        rel: String,
        f: &'a mut (dyn for<'b> FnMut(&'b FileInfo) -> WalkDecision + Send),
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let full = self.root.join(&rel);
            let mut entries = Vec::new();
            let mut rd = fs::read_dir(&full)
                .await
                .map_err(|e| Error::from_io(&rel, e))?;
            while let Some(entry) = rd.next_entry().await.map_err(|e| Error::from_io(&rel, e))? {
                entries.push(entry);
            }
            entries.sort_by_key(|e| e.file_name());

            for entry in entries {
                let name = match entry.file_name().into_string() {
                    Ok(n) => n,
                    Err(_) => continue,
                };
                let child_rel = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };
                let md = entry
                    .metadata()
                    .await
                    .map_err(|e| Error::from_io(&child_rel, e))?;
                let info = file_info(&child_rel, &md);
                let is_dir = info.is_dir;
                match f(&info) {
                    WalkDecision::Stop => return Ok(false),
                    WalkDecision::SkipDir => continue,
                    WalkDecision::Continue => {
                        if is_dir && !self.walk_dir(child_rel, f).await? {
                            return Ok(false);
                        }
                    }
                }
            }
            Ok(true)
        }
        .boxed()
    }
}

fn file_info(rel: &str, md: &std::fs::Metadata) -> FileInfo {
    let mod_time = md
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    FileInfo {
        path: rel.to_string(),
        size: if md.is_dir() { 0 } else { md.len() },
        mod_time,
        is_dir: md.is_dir(),
    }
}

#[async_trait]
impl StorageDriver for FilesystemDriver {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn get_content(&self, path: &Key) -> Result<Bytes> {
        let full = self.full_path(path);
        let content = fs::read(&full)
            .await
            .map_err(|e| Error::from_io(&String::from(path), e))?;
        Ok(Bytes::from(content))
    }

    async fn put_content(&self, path: &Key, content: Bytes) -> Result<()> {
        let full = self.full_path(path);
        self.ensure_parent(&full, path).await?;

        // write to a temp file in the same directory and rename into place
        let tmp = full.with_extension(format!("tmp.{}", Uuid::new_v4()));
        let write = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&content).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &full).await
        };
        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Io {
                path: String::from(path),
                source: e,
            });
        }
        Ok(())
    }

    async fn reader(&self, path: &Key, offset: u64) -> Result<ByteStream> {
        let full = self.full_path(path);
        let rel = String::from(path);
        let mut file = fs::File::open(&full)
            .await
            .map_err(|e| Error::from_io(&rel, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::from_io(&rel, e))?
            .len();
        if offset > len {
            return Err(Error::InvalidOffset { path: rel, offset });
        }
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| Error::from_io(&rel, e))?;
        }
        let stream = ReaderStream::new(file).map(move |r| r.map_err(|e| Error::from_io(&rel, e)));
        Ok(stream.boxed())
    }

    async fn writer(&self, path: &Key, append: bool) -> Result<Box<dyn FileWriter>> {
        let full = self.full_path(path);
        self.ensure_parent(&full, path).await?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let rel = String::from(path);
        let file = options
            .open(&full)
            .await
            .map_err(|e| Error::from_io(&rel, e))?;
        let initial_size = if append {
            file.metadata()
                .await
                .map_err(|e| Error::from_io(&rel, e))?
                .len()
        } else {
            0
        };

        Ok(Box::new(FilesystemFileWriter {
            file: Some(file),
            full,
            rel,
            initial_size,
            size: initial_size,
            state: WriterState::Open,
        }))
    }

    async fn stat(&self, path: &Key) -> Result<FileInfo> {
        let rel = String::from(path);
        let md = fs::metadata(self.full_path(path))
            .await
            .map_err(|e| Error::from_io(&rel, e))?;
        Ok(file_info(&rel, &md))
    }

    async fn list(&self, path: &Key) -> Result<Vec<String>> {
        let rel = String::from(path);
        let mut rd = fs::read_dir(self.full_path(path))
            .await
            .map_err(|e| Error::from_io(&rel, e))?;
        let mut children = Vec::new();
        while let Some(entry) = rd.next_entry().await.map_err(|e| Error::from_io(&rel, e))? {
            if let Ok(name) = entry.file_name().into_string() {
                children.push(format!("{rel}/{name}"));
            }
        }
        children.sort();
        Ok(children)
    }

    async fn rename(&self, from: &Key, to: &Key) -> Result<()> {
        let dst = self.full_path(to);
        self.ensure_parent(&dst, to).await?;
        fs::rename(self.full_path(from), dst)
            .await
            .map_err(|e| Error::from_io(&String::from(from), e))
    }

    async fn delete(&self, path: &Key) -> Result<()> {
        let rel = String::from(path);
        let full = self.full_path(path);
        let md = fs::metadata(&full)
            .await
            .map_err(|e| Error::from_io(&rel, e))?;
        if md.is_dir() {
            fs::remove_dir_all(&full)
                .await
                .map_err(|e| Error::from_io(&rel, e))
        } else {
            fs::remove_file(&full)
                .await
                .map_err(|e| Error::from_io(&rel, e))
        }
    }

    async fn walk(
        &self,
        path: &Key,
        f: &mut (dyn for<'b> FnMut(&'b FileInfo) -> WalkDecision + Send),
    ) -> Result<()> {
        self.walk_dir(String::from(path), f).await.map(|_| ())
    }
}

enum WriterState {
    Open,
    Committed,
    Cancelled,
    Closed,
}

pub struct FilesystemFileWriter {
    file: Option<fs::File>,
    full: PathBuf,
    rel: String,
    initial_size: u64,
    size: u64,
    state: WriterState,
}

impl FilesystemFileWriter {
    fn open_file(&mut self) -> Result<&mut fs::File> {
        match self.state {
            WriterState::Open => {}
            _ => {
                return Err(Error::WriterFinished {
                    path: self.rel.clone(),
                })
            }
        }
        self.file.as_mut().ok_or(Error::WriterFinished {
            path: self.rel.clone(),
        })
    }

    async fn discard(&mut self) -> Result<()> {
        // roll the file back to the size it had when the writer was opened;
        // a fresh writer leaves nothing behind at all
        if self.initial_size == 0 {
            self.file.take();
            match fs::remove_file(&self.full).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::from_io(&self.rel, e)),
            }
        } else {
            let file = self.file.take();
            if let Some(file) = file {
                file.set_len(self.initial_size)
                    .await
                    .map_err(|e| Error::from_io(&self.rel, e))?;
            }
            Ok(())
        }
    }
}

#[async_trait]
impl FileWriter for FilesystemFileWriter {
    async fn write(&mut self, data: Bytes) -> Result<usize> {
        let rel = self.rel.clone();
        let file = self.open_file()?;
        file.write_all(&data)
            .await
            .map_err(|e| Error::from_io(&rel, e))?;
        self.size += data.len() as u64;
        Ok(data.len())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn commit(&mut self) -> Result<()> {
        let rel = self.rel.clone();
        let file = self.open_file()?;
        file.sync_all().await.map_err(|e| Error::from_io(&rel, e))?;
        self.state = WriterState::Committed;
        self.file.take();
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        match self.state {
            WriterState::Open => {}
            _ => {
                return Err(Error::WriterFinished {
                    path: self.rel.clone(),
                })
            }
        }
        self.state = WriterState::Cancelled;
        self.discard().await
    }

    async fn close(&mut self) -> Result<()> {
        match self.state {
            // neither committed nor cancelled: closing implicitly cancels
            WriterState::Open => {
                self.state = WriterState::Closed;
                self.discard().await
            }
            WriterState::Closed => Err(Error::WriterFinished {
                path: self.rel.clone(),
            }),
            _ => {
                self.state = WriterState::Closed;
                self.file.take();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use futures::stream::TryStreamExt;

    use super::*;

    fn driver() -> (tempfile::TempDir, FilesystemDriver) {
        let dir = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(dir.path());
        (dir, driver)
    }

    fn key(s: &str) -> Key {
        Key::try_from(s).unwrap()
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, b| async move {
                acc.extend_from_slice(&b);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let (_dir, d) = driver();
        let k = key("a/b/data");
        d.put_content(&k, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(d.get_content(&k).await.unwrap(), Bytes::from_static(b"hello"));

        // atomic replace
        d.put_content(&k, Bytes::from_static(b"goodbye")).await.unwrap();
        assert_eq!(d.get_content(&k).await.unwrap(), Bytes::from_static(b"goodbye"));
    }

    #[tokio::test]
    async fn get_missing_is_path_not_found() {
        let (_dir, d) = driver();
        let err = d.get_content(&key("nope")).await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    #[tokio::test]
    async fn reader_honors_offset() {
        let (_dir, d) = driver();
        let k = key("data");
        d.put_content(&k, Bytes::from_static(b"0123456789")).await.unwrap();

        let bytes = collect(d.reader(&k, 4).await.unwrap()).await;
        assert_eq!(bytes, b"456789");

        // offset at EOF yields an empty stream, past EOF errors
        let bytes = collect(d.reader(&k, 10).await.unwrap()).await;
        assert!(bytes.is_empty());
        let err = d.reader(&k, 11).await.err().unwrap();
        assert!(matches!(err, Error::InvalidOffset { offset: 11, .. }));
    }

    #[tokio::test]
    async fn writer_commit_makes_content_visible() {
        let (_dir, d) = driver();
        let k = key("w/data");
        let mut w = d.writer(&k, false).await.unwrap();
        w.write(Bytes::from_static(b"part1-")).await.unwrap();
        w.write(Bytes::from_static(b"part2")).await.unwrap();
        assert_eq!(w.size(), 11);
        w.commit().await.unwrap();
        w.close().await.unwrap();

        assert_eq!(d.get_content(&k).await.unwrap(), Bytes::from_static(b"part1-part2"));

        // writes after commit fail
        let mut w = d.writer(&k, false).await.unwrap();
        w.commit().await.unwrap();
        assert!(w.write(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn writer_cancel_leaves_no_side_effect() {
        let (_dir, d) = driver();
        let k = key("w/data");
        let mut w = d.writer(&k, false).await.unwrap();
        w.write(Bytes::from_static(b"doomed")).await.unwrap();
        w.cancel().await.unwrap();
        w.close().await.unwrap();
        assert!(d.stat(&k).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn append_writer_resumes_and_cancel_rolls_back() {
        let (_dir, d) = driver();
        let k = key("w/data");
        d.put_content(&k, Bytes::from_static(b"base")).await.unwrap();

        let mut w = d.writer(&k, true).await.unwrap();
        assert_eq!(w.size(), 4);
        w.write(Bytes::from_static(b"-more")).await.unwrap();
        assert_eq!(w.size(), 9);
        w.cancel().await.unwrap();
        // rolled back to the pre-writer content
        assert_eq!(d.get_content(&k).await.unwrap(), Bytes::from_static(b"base"));

        let mut w = d.writer(&k, true).await.unwrap();
        w.write(Bytes::from_static(b"-more")).await.unwrap();
        w.commit().await.unwrap();
        w.close().await.unwrap();
        assert_eq!(d.get_content(&k).await.unwrap(), Bytes::from_static(b"base-more"));
    }

    #[tokio::test]
    async fn append_writer_on_missing_path_starts_fresh() {
        let (_dir, d) = driver();
        let k = key("w/data");
        let mut w = d.writer(&k, true).await.unwrap();
        assert_eq!(w.size(), 0);
        w.write(Bytes::from_static(b"fresh")).await.unwrap();
        w.commit().await.unwrap();
        assert_eq!(d.get_content(&k).await.unwrap(), Bytes::from_static(b"fresh"));
    }

    #[tokio::test]
    async fn close_without_commit_cancels() {
        let (_dir, d) = driver();
        let k = key("w/data");
        let mut w = d.writer(&k, false).await.unwrap();
        w.write(Bytes::from_static(b"doomed")).await.unwrap();
        w.close().await.unwrap();
        assert!(d.stat(&k).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_returns_sorted_full_paths() {
        let (_dir, d) = driver();
        d.put_content(&key("dir/b"), Bytes::new()).await.unwrap();
        d.put_content(&key("dir/a"), Bytes::new()).await.unwrap();
        d.put_content(&key("dir/sub/c"), Bytes::new()).await.unwrap();
        assert_eq!(
            d.list(&key("dir")).await.unwrap(),
            vec!["dir/a".to_string(), "dir/b".to_string(), "dir/sub".to_string()],
        );
    }

    #[tokio::test]
    async fn rename_moves_atomically() {
        let (_dir, d) = driver();
        d.put_content(&key("src"), Bytes::from_static(b"x")).await.unwrap();
        d.rename(&key("src"), &key("dst/nested")).await.unwrap();
        assert!(d.stat(&key("src")).await.unwrap_err().is_not_found());
        assert_eq!(d.get_content(&key("dst/nested")).await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn delete_is_recursive() {
        let (_dir, d) = driver();
        d.put_content(&key("dir/a/b"), Bytes::new()).await.unwrap();
        d.put_content(&key("dir/c"), Bytes::new()).await.unwrap();
        d.delete(&key("dir")).await.unwrap();
        assert!(d.stat(&key("dir")).await.unwrap_err().is_not_found());

        let err = d.delete(&key("dir")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn walk_depth_first_with_skip_and_stop() {
        let (_dir, d) = driver();
        d.put_content(&key("r/a/1"), Bytes::new()).await.unwrap();
        d.put_content(&key("r/b/2"), Bytes::new()).await.unwrap();
        d.put_content(&key("r/c"), Bytes::new()).await.unwrap();

        let mut visited = Vec::new();
        d.walk(&key("r"), &mut |info: &FileInfo| {
            visited.push(info.path.clone());
            WalkDecision::Continue
        })
        .await
        .unwrap();
        assert_eq!(visited, vec!["r/a", "r/a/1", "r/b", "r/b/2", "r/c"]);

        let mut visited = Vec::new();
        d.walk(&key("r"), &mut |info: &FileInfo| {
            visited.push(info.path.clone());
            if info.path == "r/a" {
                WalkDecision::SkipDir
            } else {
                WalkDecision::Continue
            }
        })
        .await
        .unwrap();
        assert_eq!(visited, vec!["r/a", "r/b", "r/b/2", "r/c"]);

        let mut visited = Vec::new();
        d.walk(&key("r"), &mut |info: &FileInfo| {
            visited.push(info.path.clone());
            WalkDecision::Stop
        })
        .await
        .unwrap();
        assert_eq!(visited, vec!["r/a"]);
    }

    #[tokio::test]
    async fn redirects_unsupported() {
        let (_dir, d) = driver();
        let url = d
            .redirect_url(&http::Method::GET, &key("anything"))
            .await
            .unwrap();
        assert!(url.is_none());
    }
}
