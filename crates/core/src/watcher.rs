//! File-change subscriptions.
//!
//! [`FileWatcher::subscribe`] registers a handler that receives a file's freshly read bytes
//! whenever its content changes. The parent directory is watched rather than the file itself,
//! so editors that replace the file on save are still seen. Bursts of events are debounced and
//! a handler is only called when the bytes differ from the last delivered content.

use crate::{CoreError, CoreResult};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// File watching operations.
///
/// This is a zero-sized type used for namespacing subscription operations.
pub struct FileWatcher;

/// Active subscription. Watching stops when this is dropped or [`FileWatch::stop`] is called.
pub struct FileWatch {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Subscribe `handler` to content changes of the file at `path`.
    ///
    /// The handler runs on a dedicated thread. The file's content at subscription time is the
    /// baseline, so the handler is not called until the bytes actually change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if:
    /// - `path` has no file name,
    /// - the platform watcher cannot be created or cannot watch the parent directory,
    /// - the handler thread cannot be spawned.
    pub fn subscribe<F>(
        path: impl Into<PathBuf>,
        debounce: Duration,
        handler: F,
    ) -> CoreResult<FileWatch>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        let path = path.into();
        let file_name = path
            .file_name()
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("cannot watch {}: no file name", path.display()))
            })?
            .to_os_string();
        let watch_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        let baseline = std::fs::read(&path).ok();
        let loop_path = path.clone();
        let thread = std::thread::Builder::new()
            .name("epi-file-watch".into())
            .spawn(move || watch_loop(rx, loop_path, file_name, debounce, baseline, handler))
            .map_err(|e| CoreError::Watch(notify::Error::io(e)))?;

        tracing::info!("Started file watcher for {}", path.display());

        Ok(FileWatch {
            path,
            watcher: Some(watcher),
            thread: Some(thread),
        })
    }
}

impl fmt::Debug for FileWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWatch")
            .field("path", &self.path)
            .field("active", &self.thread.is_some())
            .finish()
    }
}

impl FileWatch {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop watching and wait for the handler thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the watcher closes the event channel, which ends the loop.
        self.watcher.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("file watcher thread for {} panicked", self.path.display());
            }
        }
    }
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn is_content_event(event: &Event, file_name: &OsString) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

/// Wait until no further events arrive for `debounce`. Returns `false` if the channel closed.
fn settle(rx: &Receiver<notify::Result<Event>>, debounce: Duration) -> bool {
    let mut deadline = Instant::now() + debounce;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        match rx.recv_timeout(remaining) {
            Ok(_) => deadline = Instant::now() + debounce,
            Err(RecvTimeoutError::Timeout) => return true,
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

fn watch_loop<F>(
    rx: Receiver<notify::Result<Event>>,
    path: PathBuf,
    file_name: OsString,
    debounce: Duration,
    mut last_seen: Option<Vec<u8>>,
    mut handler: F,
) where
    F: FnMut(Vec<u8>),
{
    while let Ok(result) = rx.recv() {
        match result {
            Ok(event) if is_content_event(&event, &file_name) => {}
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("watch error: {}", e);
                continue;
            }
        }

        if !settle(&rx, debounce) {
            break;
        }

        match std::fs::read(&path) {
            Ok(bytes) => {
                if last_seen.as_deref() == Some(bytes.as_slice()) {
                    tracing::debug!("{} touched but unchanged", path.display());
                    continue;
                }
                tracing::info!("{} has been modified", path.display());
                last_seen = Some(bytes.clone());
                handler(bytes);
            }
            Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
        }
    }

    tracing::info!("File watcher for {} shutting down", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn delivers_new_bytes_on_change() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("sample.json");
        std::fs::write(&path, b"[]").expect("initial write");

        let (tx, rx) = mpsc::channel();
        let watch = FileWatcher::subscribe(&path, Duration::from_millis(50), move |bytes| {
            let _ = tx.send(bytes);
        })
        .expect("subscribe");

        std::thread::sleep(Duration::from_millis(100));
        std::fs::write(&path, br#"[{"dateRep": "14/12/2020"}]"#).expect("update");

        let received = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("handler should be called");
        assert_eq!(received, br#"[{"dateRep": "14/12/2020"}]"#.to_vec());

        watch.stop();
    }

    #[test]
    fn ignores_other_files_in_directory() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("sample.json");
        std::fs::write(&path, b"[]").expect("initial write");

        let (tx, rx) = mpsc::channel();
        let _watch = FileWatcher::subscribe(&path, Duration::from_millis(50), move |bytes| {
            let _ = tx.send(bytes);
        })
        .expect("subscribe");

        std::thread::sleep(Duration::from_millis(100));
        std::fs::write(temp_dir.path().join("other.json"), b"{}").expect("write other");

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn debug_output_names_watched_path() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("sample.json");
        let watch = FileWatcher::subscribe(&path, Duration::from_millis(10), |_| {})
            .expect("subscribe");

        let debug = format!("{watch:?}");
        assert!(debug.contains("sample.json"));
        assert!(debug.contains("active: true"));
    }

    #[test]
    fn rejects_path_without_file_name() {
        let err = FileWatcher::subscribe("/", Duration::from_millis(10), |_| {})
            .expect_err("root has no file name");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
