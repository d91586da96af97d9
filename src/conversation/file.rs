//! Conversation store backed by one JSON-lines file per conversation.
//!
//! Each conversation lives at `<dir>/<id>.log` with **one JSON object per
//! line**. A whole batch of messages is serialised up front and written with
//! a single `write_all` on a file opened with `O_APPEND`, while holding an
//! exclusive advisory lock on that file. Within the process, appends to the
//! same id are additionally serialised by a per-id async mutex.
//!
//! A crash mid-write can leave a trailing line without its `\n`. Readers
//! ignore such a tail, and the next append truncates it before writing.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use super::{ConversationId, ConversationStore, Message};
use crate::error::{Error, Result};

const LOG_EXTENSION: &str = "log";

const MAX_LOCK_RETRIES: usize = 10;
const LOCK_RETRY_SLEEP: Duration = Duration::from_millis(100);

pub struct FileSystemStore {
    dir: PathBuf,
    id_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileSystemStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self {
            dir,
            id_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file for `id`.
    pub fn path_for(&self, id: &ConversationId) -> PathBuf {
        self.dir.join(format!("{id}.{LOG_EXTENSION}"))
    }

    fn id_lock(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.id_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id.clone()).or_default().clone()
    }

    /// Forget the lock for `id` once no task holds or waits on it.
    fn release_id_lock(&self, id: &ConversationId) {
        let mut locks = self.id_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    /// Run blocking file work for `id` while holding its in-process lock.
    async fn with_id<T, F>(&self, id: &ConversationId, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T> + Send + 'static,
    {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        let path = self.path_for(id);
        tokio::task::spawn_blocking(move || work(path))
            .await
            .map_err(Error::persistence)?
    }
}

impl std::fmt::Debug for FileSystemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemStore")
            .field("dir", &self.dir)
            .finish()
    }
}

#[async_trait]
impl ConversationStore for FileSystemStore {
    async fn get(&self, id: &ConversationId) -> Result<Option<Vec<Message>>> {
        self.with_id(id, |path| read_log(&path)).await
    }

    async fn append(&self, id: &ConversationId, message: Message) -> Result<()> {
        self.append_many(id, vec![message]).await
    }

    async fn append_many(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let count = messages.len();
        self.with_id(id, move |path| append_log(&path, &messages))
            .await?;
        debug!("Appended {} message(s) to {}", count, id);
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<()> {
        let result = self
            .with_id(id, |path| match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error(&path, e)),
            })
            .await;
        self.release_id_lock(id);
        result
    }

    async fn size(&self) -> Result<usize> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || count_logs(&dir))
            .await
            .map_err(Error::persistence)?
    }

    async fn replace(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        self.with_id(id, move |path| rewrite_log(&path, &messages))
            .await
    }
}

fn io_error(path: &Path, err: io::Error) -> Error {
    Error::Persistence(format!("{}: {}", path.display(), err))
}

fn encode_lines(messages: &[Message]) -> Result<String> {
    let mut out = String::new();
    for message in messages {
        let line = serde_json::to_string(message).map_err(Error::persistence)?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn open_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    options
}

/// Acquire an advisory lock, retrying while another holder keeps it.
fn lock_with_retry(file: &File, exclusive: bool) -> io::Result<()> {
    for _ in 0..MAX_LOCK_RETRIES {
        let attempt = if exclusive {
            FileExt::try_lock_exclusive(file)
        } else {
            FileExt::try_lock_shared(file)
        };
        match attempt {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(LOCK_RETRY_SLEEP);
            }
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::WouldBlock,
        "could not acquire lock on conversation log after multiple attempts",
    ))
}

fn append_log(path: &Path, messages: &[Message]) -> Result<()> {
    let payload = encode_lines(messages)?;

    let mut file = open_options()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| io_error(path, e))?;
    lock_with_retry(&file, true).map_err(|e| io_error(path, e))?;

    heal_torn_tail(&mut file).map_err(|e| io_error(path, e))?;

    file.write_all(payload.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| io_error(path, e))?;

    // The lock is released when `file` is dropped.
    Ok(())
}

/// Truncate a trailing partial line left by an interrupted write.
fn heal_torn_tail(file: &mut File) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut contents = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);

    warn!(
        "Discarding {} byte(s) of torn conversation record",
        contents.len() - keep
    );
    file.set_len(keep as u64)
}

fn read_log(path: &Path) -> Result<Option<Vec<Message>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    lock_with_retry(&file, false).map_err(|e| io_error(path, e))?;

    let mut reader = BufReader::new(&file);
    let mut messages = Vec::new();
    let mut line = String::new();
    let mut line_no = 0usize;
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| io_error(path, e))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        // No terminating newline: an append never finished.
        if !line.ends_with('\n') {
            debug!("Ignoring partial trailing record in {}", path.display());
            break;
        }

        let record = line.trim_end();
        if record.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(record) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(
                "Skipping invalid record {} in {}: {}",
                line_no,
                path.display(),
                e
            ),
        }
    }

    Ok(Some(messages))
}

/// Write the full history to a temporary file and rename it over the log.
fn rewrite_log(path: &Path, messages: &[Message]) -> Result<()> {
    let payload = encode_lines(messages)?;
    let tmp_path = path.with_extension("log.tmp");

    let mut tmp = open_options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| io_error(&tmp_path, e))?;
    tmp.write_all(payload.as_bytes())
        .and_then(|_| tmp.sync_all())
        .map_err(|e| io_error(&tmp_path, e))?;
    drop(tmp);

    fs::rename(&tmp_path, path).map_err(|e| io_error(path, e))
}

fn count_logs(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_error(dir, e)),
    };

    let mut count = 0;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let path = entry.path();
        let is_log = path.extension().and_then(|e| e.to_str()) == Some(LOG_EXTENSION);
        let is_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.parse::<ConversationId>().is_ok());
        if is_log && is_id && path.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(temp_dir.path()).unwrap();
        let id = ConversationId::generate();

        assert_eq!(store.get(&id).await.unwrap(), None);

        store.append(&id, Message::user("make a file")).await.unwrap();
        store
            .append(&id, Message::assistant("Modified: a.txt"))
            .await
            .unwrap();

        let raw = fs::read_to_string(store.path_for(&id)).unwrap();
        assert_eq!(
            raw,
            "{\"role\":\"user\",\"content\":\"make a file\"}\n\
             {\"role\":\"assistant\",\"content\":\"Modified: a.txt\"}\n"
        );

        // A second store over the same directory sees the same history.
        let reopened = FileSystemStore::new(temp_dir.path()).unwrap();
        assert_eq!(
            reopened.get(&id).await.unwrap().unwrap(),
            vec![
                Message::user("make a file"),
                Message::assistant("Modified: a.txt")
            ]
        );
    }

    #[tokio::test]
    async fn test_torn_tail_is_ignored_then_healed() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(temp_dir.path()).unwrap();
        let id = ConversationId::generate();

        store.append(&id, Message::user("first")).await.unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.path_for(&id))
            .unwrap();
        file.write_all(b"{\"role\":\"assistant\",\"cont").unwrap();
        drop(file);

        assert_eq!(
            store.get(&id).await.unwrap().unwrap(),
            vec![Message::user("first")]
        );

        store.append(&id, Message::assistant("second")).await.unwrap();
        assert_eq!(
            store.get(&id).await.unwrap().unwrap(),
            vec![Message::user("first"), Message::assistant("second")]
        );
        let raw = fs::read_to_string(store.path_for(&id)).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(temp_dir.path()).unwrap();
        let id = ConversationId::generate();

        fs::write(
            store.path_for(&id),
            "{\"role\":\"user\",\"content\":\"a\"}\nnot json\n\n{\"role\":\"assistant\",\"content\":\"b\"}\n",
        )
        .unwrap();

        assert_eq!(
            store.get(&id).await.unwrap().unwrap(),
            vec![Message::user("a"), Message::assistant("b")]
        );
    }

    #[tokio::test]
    async fn test_delete_and_size() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(temp_dir.path()).unwrap();
        let first = ConversationId::generate();
        let second = ConversationId::generate();

        store.append(&first, Message::user("a")).await.unwrap();
        store.append(&second, Message::user("b")).await.unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(temp_dir.path().join("stray.log"), "ignored").unwrap();
        assert_eq!(store.size().await.unwrap(), 2);

        store.delete(&first).await.unwrap();
        store.delete(&first).await.unwrap();
        assert_eq!(store.get(&first).await.unwrap(), None);
        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_releases_id_lock() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(temp_dir.path()).unwrap();
        let kept = ConversationId::generate();
        let dropped = ConversationId::generate();

        store.append(&kept, Message::user("a")).await.unwrap();
        store.append(&dropped, Message::user("b")).await.unwrap();
        assert_eq!(store.id_locks.lock().unwrap().len(), 2);

        store.delete(&dropped).await.unwrap();
        let locks = store.id_locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&kept));
    }

    #[tokio::test]
    async fn test_replace_rewrites_whole_log() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(temp_dir.path()).unwrap();
        let id = ConversationId::generate();

        store
            .append_many(
                &id,
                vec![
                    Message::user("q"),
                    Message::assistant("<sg-file path=\"a\">x</sg-file>"),
                ],
            )
            .await
            .unwrap();
        store
            .replace(&id, vec![Message::user("q"), Message::assistant("Modified: a")])
            .await
            .unwrap();

        assert_eq!(
            store.get(&id).await.unwrap().unwrap(),
            vec![Message::user("q"), Message::assistant("Modified: a")]
        );
        assert!(!store.path_for(&id).with_extension("log.tmp").exists());
        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileSystemStore::new(temp_dir.path()).unwrap());
        let id = ConversationId::generate();

        let mut handles = Vec::new();
        for turn in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_many(
                        &id,
                        vec![
                            Message::user(format!("q{turn}")),
                            Message::assistant(format!("a{turn}")),
                        ],
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = store.get(&id).await.unwrap().unwrap();
        assert_eq!(history.len(), 16);
        assert!(crate::conversation::is_alternating(&history));
        for pair in history.chunks(2) {
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }
}
