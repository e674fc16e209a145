//! A plain text file as the shared document.
//!
//! Whatever program edits the file is the editor. Local edits are noticed
//! through filesystem notifications; remote updates rewrite the file.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use quill_sync::{Cursor, EditorSurface};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

pub struct FileSurface {
    path: PathBuf,
    /// Last text read or written, served when the file can't be read.
    cache: String,
    cursor: Cursor,
}

impl FileSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = read_text(&path).unwrap_or_default();
        Self {
            path,
            cache,
            cursor: Cursor::default(),
        }
    }
}

/// File contents; a missing file is an empty document.
fn read_text(path: &Path) -> std::io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

impl EditorSurface for FileSurface {
    fn text(&self) -> String {
        read_text(&self.path).unwrap_or_else(|e| {
            log::warn!("can't read {}: {e}", self.path.display());
            self.cache.clone()
        })
    }

    fn set_text(&mut self, text: &str) {
        if let Err(e) = std::fs::write(&self.path, text) {
            log::error!("can't write {}: {e}", self.path.display());
        }
        self.cache = text.to_string();
        self.cursor = self.cursor.clamp_to(text);
    }

    // A file has no cursor of its own; one is kept so the position
    // survives remote rewrites the same way an editor's would.
    fn cursor(&self) -> Cursor {
        self.cursor
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor.clamp_to(&self.cache);
    }

    fn set_status(&mut self, status: &str) {
        log::info!("[{}] {status}", self.path.display());
    }
}

/// Reports writes to one file.
///
/// The parent directory is watched rather than the file itself, so editors
/// that save by writing a temporary file and renaming it over the original
/// are still seen. `poll` only matters where notify falls back to polling.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    events: UnboundedReceiver<()>,
}

impl FileWatcher {
    pub fn new(path: &Path, poll: Duration) -> notify::Result<Self> {
        let name: OsString = path
            .file_name()
            .ok_or_else(|| notify::Error::generic("not a file path"))?
            .to_os_string();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, events) = unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    // Removal is ignored: publishing it would empty the document.
                    let relevant =
                        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(name.as_os_str()));
                    if relevant {
                        let _ = tx.send(());
                    }
                }
                Err(e) => log::warn!("watch error: {e}"),
            },
            Config::default().with_poll_interval(poll),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        log::debug!("watching {} for changes", path.display());

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Wait for the next change. A burst of events counts as one change.
    /// Returns false once the watcher has stopped.
    pub async fn changed(&mut self) -> bool {
        if self.events.recv().await.is_none() {
            return false;
        }
        while self.events.try_recv().is_ok() {}
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::time::timeout;

    #[test]
    fn test_missing_file_is_empty_document() {
        let dir = tempdir().unwrap();
        let surface = FileSurface::new(dir.path().join("doc.txt"));
        assert_eq!(surface.text(), "");
    }

    #[test]
    fn test_reads_and_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "on disk").unwrap();

        let mut surface = FileSurface::new(&path);
        assert_eq!(surface.text(), "on disk");

        surface.set_text("from a peer");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "from a peer");
    }

    #[test]
    fn test_external_edit_visible() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let surface = FileSurface::new(&path);
        std::fs::write(&path, "typed in an editor").unwrap();
        assert_eq!(surface.text(), "typed in an editor");
    }

    #[test]
    fn test_cursor_clamped_after_rewrite() {
        let dir = tempdir().unwrap();
        let mut surface = FileSurface::new(dir.path().join("doc.txt"));
        surface.set_text("first line\nsecond line");
        surface.set_cursor(Cursor::new(1, 6));
        assert_eq!(surface.cursor(), Cursor::new(1, 6));

        surface.set_text("short");
        assert_eq!(surface.cursor(), Cursor::new(0, 5));
    }

    #[tokio::test]
    async fn test_watcher_reports_edit_with_unchanged_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "v1").unwrap();
        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();

        let mut watcher = FileWatcher::new(&path, Duration::from_millis(50)).unwrap();
        std::fs::write(&path, "v2").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), mtime);

        let seen = timeout(Duration::from_secs(5), watcher.changed()).await;
        assert_eq!(seen, Ok(true));
    }

    #[tokio::test]
    async fn test_watcher_ignores_sibling_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let mut watcher = FileWatcher::new(&path, Duration::from_millis(50)).unwrap();

        std::fs::write(dir.path().join("other.txt"), "not ours").unwrap();
        assert!(timeout(Duration::from_millis(300), watcher.changed())
            .await
            .is_err());

        std::fs::write(&path, "created").unwrap();
        let seen = timeout(Duration::from_secs(5), watcher.changed()).await;
        assert_eq!(seen, Ok(true));
    }
}
