//! Ingress adapters
//!
//! The relay pulls payload units through [`Ingress`]: "next record or end
//! of feed". The head zone reads its feed directory, every other zone reads
//! what its listeners accepted from upstream.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use segnet_core::Record;

use crate::error::{RelayError, RelayResult};

/// Source of payload units for one relay
///
/// `next` must be cancel safe: if its future is dropped before completion
/// no record is lost.
#[async_trait]
pub trait Ingress: Send {
    /// The next record, or `None` at end of feed
    async fn next(&mut self) -> RelayResult<Option<Record>>;

    /// Human-readable origin, for logs
    fn describe(&self) -> String;

    /// Give up on every unit not read yet and return their seqs
    ///
    /// Sources that cannot know what is left return nothing and keep
    /// yielding through `next`.
    fn skip_remaining(&mut self) -> Vec<u64> {
        Vec::new()
    }
}

/// Ordered feed of record files
///
/// Every regular, non-hidden file in the directory is one record, taken in
/// lexicographic file-name order. Contents are never interpreted.
#[derive(Debug)]
pub struct FeedSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl FeedSource {
    /// List the feed directory once; files added later are not picked up
    pub async fn open(dir: impl AsRef<Path>) -> RelayResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let feed_error = |e: std::io::Error| RelayError::Feed {
            path: dir.clone(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(feed_error)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(feed_error)? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let regular = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if regular && !hidden {
                files.push(entry.path());
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        debug!(dir = %dir.display(), files = files.len(), "feed opened");
        Ok(Self {
            dir,
            files,
            next: 0,
        })
    }

    /// A feed with no records
    pub fn empty(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.files.len() - self.next
    }
}

#[async_trait]
impl Ingress for FeedSource {
    async fn next(&mut self) -> RelayResult<Option<Record>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let seq = self.next as u64;
        let read = tokio::fs::read(path).await;
        // advance only once the read finished, so a dropped future retries
        self.next += 1;

        let payload = read.map_err(|e| RelayError::Feed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(Record::new(seq, payload)))
    }

    fn describe(&self) -> String {
        format!("feed {}", self.dir.display())
    }

    fn skip_remaining(&mut self) -> Vec<u64> {
        let skipped = (self.next..self.files.len()).map(|i| i as u64).collect();
        self.next = self.files.len();
        skipped
    }
}

/// Records accepted by this zone's listeners
///
/// Ends once every listener has stopped and dropped its sender.
#[derive(Debug)]
pub struct ChannelIngress {
    label: String,
    rx: mpsc::Receiver<Record>,
}

impl ChannelIngress {
    pub fn new(label: impl Into<String>, rx: mpsc::Receiver<Record>) -> Self {
        Self {
            label: label.into(),
            rx,
        }
    }

    /// A bounded channel and the ingress reading it
    pub fn channel(label: impl Into<String>, capacity: usize) -> (mpsc::Sender<Record>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(label, rx))
    }
}

#[async_trait]
impl Ingress for ChannelIngress {
    async fn next(&mut self) -> RelayResult<Option<Record>> {
        Ok(self.rx.recv().await)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_order_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("002_wind.csv"), b"wind").unwrap();
        std::fs::write(dir.path().join("001_temp.csv"), b"temp").unwrap();
        std::fs::write(dir.path().join(".partial"), b"skip").unwrap();
        std::fs::create_dir(dir.path().join("archive")).unwrap();

        let mut feed = FeedSource::open(dir.path()).await.unwrap();
        assert_eq!(feed.len(), 2);

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!((first.seq, &first.payload[..]), (0, &b"temp"[..]));
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!((second.seq, &second.payload[..]), (1, &b"wind"[..]));
        assert!(feed.next().await.unwrap().is_none());
        assert_eq!(feed.remaining(), 0);
    }

    #[tokio::test]
    async fn test_skipped_files_are_never_read() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c", "d"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }

        let mut feed = FeedSource::open(dir.path()).await.unwrap();
        assert_eq!(feed.next().await.unwrap().unwrap().seq, 0);
        // gone before the skip: a read would fail
        std::fs::remove_file(dir.path().join("c")).unwrap();

        assert_eq!(feed.skip_remaining(), [1, 2, 3]);
        assert_eq!(feed.remaining(), 0);
        assert!(feed.next().await.unwrap().is_none());
        assert!(feed.skip_remaining().is_empty());
    }

    #[tokio::test]
    async fn test_missing_feed_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = FeedSource::open(dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, RelayError::Feed { .. }));
    }

    #[tokio::test]
    async fn test_channel_ends_when_senders_drop() {
        let (tx, mut ingress) = ChannelIngress::channel("upstream", 4);
        tx.send(Record::new(7, vec![1u8])).await.unwrap();
        drop(tx);
        assert_eq!(ingress.next().await.unwrap().unwrap().seq, 7);
        assert!(ingress.next().await.unwrap().is_none());
    }
}
