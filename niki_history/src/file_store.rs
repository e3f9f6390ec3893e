use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use niki_core::util::now_unix;
use niki_core::{ConversationKey, HistoryError, HistoryStore, Message, MessageBatch, ReadOptions};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::key_path::conversation_dir;

const HISTORY_FILE: &str = "history.jsonl";
const SUMMARY_FILE: &str = "summary.json";
const SUMMARY_TMP_FILE: &str = "summary.json.tmp";

type LockMap = Mutex<HashMap<ConversationKey, Arc<RwLock<()>>>>;

/// JSONL-backed history store rooted at a base directory.
///
/// Each log line holds one appended batch, so a batch is either fully present
/// or an unterminated tail that reads ignore.
///
/// Every key has its own `RwLock`: reads share it, appends, summary writes and
/// clears hold it exclusively. A key's lock lives only while someone holds or
/// waits on it.
pub struct FileHistoryStore {
    base_dir: PathBuf,
    locks: LockMap,
}

/// Shared handle on one key's lock. Dropping the last handle evicts the map entry.
struct KeyLock<'a> {
    locks: &'a LockMap,
    key: ConversationKey,
    lock: Arc<RwLock<()>>,
}

impl KeyLock<'_> {
    async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Handles are only cloned under the map mutex, so a count of two
        // (map + self) means nobody else holds or waits on this key.
        let ours = locks
            .get(&self.key)
            .is_some_and(|held| Arc::ptr_eq(held, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

impl FileHistoryStore {
    /// Open (and create if needed) a store rooted at `base_dir`.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let base_dir = base_dir.into();
        if base_dir.as_os_str().is_empty() {
            return Err(HistoryError::InvalidKey(
                "history base directory must be provided".to_string(),
            ));
        }
        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| HistoryError::unavailable("create base directory", e))?;

        info!("History store ready at {}", base_dir.display());
        Ok(Self {
            base_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn lock_for(&self, key: &ConversationKey) -> KeyLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(key.clone()).or_default());
        KeyLock {
            locks: &self.locks,
            key: key.clone(),
            lock,
        }
    }

    /// Number of keys with a live lock entry.
    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn get_history(
        &self,
        key: &ConversationKey,
        opts: ReadOptions,
    ) -> Result<MessageBatch, HistoryError> {
        let path = conversation_dir(&self.base_dir, key)?.join(HISTORY_FILE);

        let bytes = {
            let lock = self.lock_for(key);
            let _guard = lock.read().await;
            match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(HistoryError::unavailable("read history", e)),
            }
        };

        let messages = decode_log(&path, &bytes)?;
        Ok(opts.apply(messages))
    }

    async fn append_messages(
        &self,
        key: &ConversationKey,
        messages: MessageBatch,
    ) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }

        let dir = conversation_dir(&self.base_dir, key)?;
        let count = messages.len();
        let buffer = encode_batch(messages)?;

        let lock = self.lock_for(key);
        let _guard = lock.write().await;

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| HistoryError::unavailable("create conversation directory", e))?;

        let path = dir.join(HISTORY_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await
            .map_err(|e| HistoryError::unavailable("open history for append", e))?;

        let committed = cut_torn_tail(&mut file, &path)
            .await
            .map_err(|e| HistoryError::unavailable("repair history tail", e))?;

        if let Err(e) = write_durably(&mut file, &buffer).await {
            if let Err(rollback) = file.set_len(committed).await {
                warn!(
                    "Could not roll back failed append to {}: {rollback}",
                    path.display()
                );
            }
            return Err(HistoryError::unavailable("append history", e));
        }

        debug!(conversation = %key, count, "Appended messages");
        Ok(())
    }

    async fn upsert_summary(
        &self,
        key: &ConversationKey,
        mut summary: Message,
    ) -> Result<(), HistoryError> {
        let dir = conversation_dir(&self.base_dir, key)?;
        summary.stamp_if_missing(now_unix());
        let mut data = serde_json::to_vec(&summary)
            .map_err(|e| HistoryError::unavailable("encode summary", std::io::Error::other(e)))?;
        data.push(b'\n');

        let lock = self.lock_for(key);
        let _guard = lock.write().await;

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| HistoryError::unavailable("create conversation directory", e))?;

        let tmp = dir.join(SUMMARY_TMP_FILE);
        let mut file = File::create(&tmp)
            .await
            .map_err(|e| HistoryError::unavailable("create summary temp file", e))?;
        write_durably(&mut file, &data)
            .await
            .map_err(|e| HistoryError::unavailable("write summary temp file", e))?;
        drop(file);

        fs::rename(&tmp, dir.join(SUMMARY_FILE))
            .await
            .map_err(|e| HistoryError::unavailable("replace summary", e))?;

        debug!(conversation = %key, "Summary replaced");
        Ok(())
    }

    async fn get_summary(&self, key: &ConversationKey) -> Result<Option<Message>, HistoryError> {
        let path = conversation_dir(&self.base_dir, key)?.join(SUMMARY_FILE);

        let bytes = {
            let lock = self.lock_for(key);
            let _guard = lock.read().await;
            match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(HistoryError::unavailable("read summary", e)),
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| HistoryError::Corrupt {
                path,
                line: 1,
                message: e.to_string(),
            })
    }

    async fn clear(&self, key: &ConversationKey) -> Result<(), HistoryError> {
        let dir = conversation_dir(&self.base_dir, key)?;

        let lock = self.lock_for(key);
        let _guard = lock.write().await;

        // Rename first so the log and summary vanish together, then delete at leisure.
        let tombstone = tombstone_for(&dir);
        match fs::rename(&dir, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(HistoryError::unavailable("detach conversation directory", e)),
        }

        if let Err(e) = fs::remove_dir_all(&tombstone).await {
            warn!(
                "Cleared {key} but could not remove {}: {e}",
                tombstone.display()
            );
        }

        info!(conversation = %key, "Cleared conversation");
        Ok(())
    }
}

fn tombstone_for(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!(".{name}.{}.deleted", Uuid::now_v7()))
}

/// Encode a batch as a single log line: a JSON array of messages.
fn encode_batch(mut messages: MessageBatch) -> Result<Vec<u8>, HistoryError> {
    let now = now_unix();
    for message in &mut messages {
        message.stamp_if_missing(now);
    }
    let mut buffer = serde_json::to_vec(&messages).map_err(|e| {
        HistoryError::unavailable("encode history batch", std::io::Error::other(e))
    })?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// Parse a JSONL log of batches. Only newline-terminated lines count; an
/// unterminated trailing fragment is an append that never completed.
fn decode_log(path: &Path, bytes: &[u8]) -> Result<MessageBatch, HistoryError> {
    let complete_len = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
    let (complete, torn) = bytes.split_at(complete_len);

    if !torn.iter().all(u8::is_ascii_whitespace) {
        warn!(
            "Ignoring {} byte torn tail in {}",
            torn.len(),
            path.display()
        );
    }

    let mut messages = Vec::new();
    for (index, line) in complete.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let batch: MessageBatch =
            serde_json::from_slice(line).map_err(|e| HistoryError::Corrupt {
                path: path.to_path_buf(),
                line: index + 1,
                message: e.to_string(),
            })?;
        messages.extend(batch);
    }
    Ok(messages)
}

/// Drop any unterminated tail and return the committed length of the log.
async fn cut_torn_tail(file: &mut File, path: &Path) -> std::io::Result<u64> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut contents).await?;
    let keep = contents.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);

    warn!(
        "Truncating torn tail of {} from {len} to {keep} bytes",
        path.display()
    );
    let keep = keep as u64;
    file.set_len(keep).await?;
    Ok(keep)
}

async fn write_durably(file: &mut File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_data().await
}
