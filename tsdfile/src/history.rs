//! History facade: the write/read entry point for stored histories.
//!
//! A [`History`] handle owns one stored history for writing. Producers
//! construct [`TimeSeriesCollection`] values and hand them to
//! [`History::append`]; collections must arrive in non-decreasing timestamp
//! order. Consumers call [`History::read_all`], which yields a lazy,
//! finite iterator over the stored collections; the sequence is
//! restartable by calling `read_all` again.
//!
//! # Thread Safety
//!
//! A handle requires exclusive access for appends (single writer per
//! handle). Reading is non-mutating: any number of readers may iterate the
//! same path through independent [`HistoryReader`]s, concurrently with each
//! other.
//!
//! # Example
//!
//! ```rust,no_run
//! use tsdfile::{History, StrategyKind, CreateOptions, TimeSeriesCollection, Timestamp};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut history = History::create(
//!     "metrics_list.tsd",
//!     StrategyKind::FileList,
//!     CreateOptions::default(),
//! )?;
//!
//! let collection = TimeSeriesCollection::builder(Timestamp::from_unix_millis(0)).build()?;
//! history.append(&collection)?;
//! history.close()?;
//!
//! for collection in History::read_all("metrics_list.tsd")? {
//!     let collection = collection?;
//!     println!("{} groups at {:?}", collection.len(), collection.timestamp());
//! }
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::codec::{self, Decoder, HEADER_LEN};
use crate::collection::{TimeSeriesCollection, Timestamp};
use crate::error::{CodecError, Result, StorageError};
use crate::strategy::{
    self, FileListWriter, SingleFileWriter, StrategyKind, StrategyWriter,
};

/// Options for [`History::create`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Replace an existing history at the target path instead of failing
    /// with `AlreadyExists`.
    pub overwrite: bool,
}

/// Writable handle to one stored history.
///
/// The strategy is chosen at creation time and fixed for the lifetime of
/// the stored history. The handle exclusively owns the underlying file
/// resources; dropping it releases them, [`History::close`] additionally
/// syncs and surfaces errors.
#[derive(Debug)]
pub struct History {
    path: PathBuf,
    writer: Box<dyn StrategyWriter>,
    last_timestamp: Option<Timestamp>,
}

impl History {
    /// Creates a new stored history at `path` under the given strategy.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] if the target exists and
    ///   `options.overwrite` is false
    /// - [`StorageError::Unavailable`] if the target cannot be created
    pub fn create<P: AsRef<Path>>(
        path: P,
        kind: StrategyKind,
        options: CreateOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let writer: Box<dyn StrategyWriter> = match kind {
            StrategyKind::SingleFile => {
                Box::new(SingleFileWriter::create(path, options.overwrite)?)
            }
            StrategyKind::FileList => Box::new(FileListWriter::create(path, options.overwrite)?),
        };
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            last_timestamp: None,
        })
    }

    /// Reopens an existing stored history for appending.
    ///
    /// The strategy is recovered from the file header; the append-order
    /// watermark is recovered by replaying the stored collections.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::Unavailable`] if the path cannot be
    /// opened and with a corrupt-data error if any stored record fails
    /// codec validation (a corrupt history cannot be appended to).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let header = strategy::read_header(path)?;

        let mut last_timestamp = None;
        for collection in Self::read_all(path)? {
            last_timestamp = Some(collection?.timestamp());
        }

        let writer: Box<dyn StrategyWriter> = match header.strategy {
            StrategyKind::SingleFile => Box::new(SingleFileWriter::open(path)?),
            StrategyKind::FileList => Box::new(FileListWriter::open(path)?),
        };
        debug!(
            path = %path.display(),
            last_millis = last_timestamp.map(Timestamp::as_unix_millis),
            "reopened history for append"
        );
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            last_timestamp,
        })
    }

    /// Appends one collection.
    ///
    /// Collections must be appended in non-decreasing timestamp order.
    /// The record is fully encoded before any byte reaches the file, so an
    /// append either completes or fails without a partially observable
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfOrderWrite`] if the collection's
    /// timestamp precedes the last appended one, or a write error with
    /// path context.
    pub fn append(&mut self, collection: &TimeSeriesCollection) -> Result<()> {
        let timestamp = collection.timestamp();
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Err(StorageError::OutOfOrderWrite {
                    last_millis: last.as_unix_millis(),
                    attempted_millis: timestamp.as_unix_millis(),
                }
                .into());
            }
        }
        let record = codec::encode_collection(collection);
        self.writer.append_record(&record)?;
        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    /// Forces all appended data to durable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    /// Syncs and releases all file resources.
    ///
    /// Dropping a `History` also releases resources on every exit path;
    /// `close` exists to surface the final sync error.
    pub fn close(self) -> Result<()> {
        self.writer.close()
    }

    /// Returns the strategy governing this history.
    pub fn kind(&self) -> StrategyKind {
        self.writer.kind()
    }

    /// Returns the path of the history artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the timestamp of the last appended collection, if any.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    /// Opens a stored history for reading.
    ///
    /// Returns a lazy iterator over the stored collections in append
    /// order. The iterator is finite and restartable: calling `read_all`
    /// again yields a fresh pass over the same path.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::Unavailable`] if the path cannot be
    /// opened, or with a corrupt-data error if the header or (for the
    /// file-list strategy) the manifest fails validation. Corruption
    /// inside individual records is reported through the iterator.
    pub fn read_all<P: AsRef<Path>>(path: P) -> Result<HistoryReader> {
        let path = path.as_ref();
        let header = strategy::read_header(path)?;
        let inner = match header.strategy {
            StrategyKind::SingleFile => ReaderInner::Single(SegmentCursor::open(path)?),
            StrategyKind::FileList => {
                let manifest = strategy::read_manifest(path)?;
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
                ReaderInner::List {
                    dir,
                    names: manifest.segments,
                    next: 0,
                    current: None,
                    failed: false,
                }
            }
        };
        Ok(HistoryReader { inner })
    }
}

/// Lazy iterator over the collections of a stored history.
///
/// Yields collections in append order; any corruption is reported as an
/// error item carrying the failing file and offset, after which iteration
/// stops (no partially decoded collection is ever yielded).
#[derive(Debug)]
pub struct HistoryReader {
    inner: ReaderInner,
}

#[derive(Debug)]
enum ReaderInner {
    Single(SegmentCursor),
    List {
        dir: PathBuf,
        names: Vec<String>,
        next: usize,
        current: Option<SegmentCursor>,
        failed: bool,
    },
}

impl Iterator for HistoryReader {
    type Item = Result<TimeSeriesCollection>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            ReaderInner::Single(cursor) => cursor.next_record(),
            ReaderInner::List {
                dir,
                names,
                next,
                current,
                failed,
            } => {
                if *failed {
                    return None;
                }
                loop {
                    if let Some(cursor) = current {
                        match cursor.next_record() {
                            Some(item) => {
                                if item.is_err() {
                                    *failed = true;
                                }
                                return Some(item);
                            }
                            None => *current = None,
                        }
                    }
                    if *next >= names.len() {
                        return None;
                    }
                    let segment_path = dir.join(&names[*next]);
                    *next += 1;
                    match SegmentCursor::open(&segment_path) {
                        Ok(cursor) => *current = Some(cursor),
                        Err(e) => {
                            *failed = true;
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }
}

/// Cursor decoding collection records from one memory-mapped file.
#[derive(Debug)]
struct SegmentCursor {
    mmap: Mmap,
    pos: usize,
    path: PathBuf,
    failed: bool,
}

impl SegmentCursor {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| StorageError::Unavailable {
            path: path.to_path_buf(),
            source: e,
        })?;
        #[allow(clippy::cast_possible_truncation)] // file sizes fit usize on supported targets
        let len = file
            .metadata()
            .map_err(|e| StorageError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?
            .len() as usize;
        if len < HEADER_LEN {
            return Err(StorageError::CorruptFile {
                path: path.to_path_buf(),
                source: CodecError::Truncated {
                    offset: 0,
                    needed: HEADER_LEN,
                    available: len,
                },
            }
            .into());
        }

        // SAFETY: The file is opened read-only and mapped read-only. A
        // concurrent writer to the same path is outside the supported model
        // (readers open histories after the writer closed them).
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| StorageError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?
        };

        let mut dec = Decoder::new(&mmap);
        let header = dec.get_header().map_err(|e| StorageError::CorruptFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        if header.strategy != StrategyKind::SingleFile {
            return Err(StorageError::CorruptFile {
                path: path.to_path_buf(),
                source: CodecError::Corrupt {
                    offset: 0,
                    reason: "expected record data, found a file-list manifest".to_string(),
                },
            }
            .into());
        }

        Ok(Self {
            mmap,
            pos: HEADER_LEN,
            path: path.to_path_buf(),
            failed: false,
        })
    }

    fn next_record(&mut self) -> Option<Result<TimeSeriesCollection>> {
        if self.failed || self.pos >= self.mmap.len() {
            return None;
        }
        let mut dec = Decoder::with_base_offset(&self.mmap[self.pos..], self.pos);
        match dec.get_collection() {
            Ok(collection) => {
                self.pos = dec.offset();
                Some(Ok(collection))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(StorageError::CorruptFile {
                    path: self.path.clone(),
                    source: e,
                }
                .into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::{GroupName, GroupPath};
    use crate::value::MetricValue;
    use crate::TimeSeriesValue;
    use crate::MetricName;
    use tempfile::tempdir;

    fn collection(millis: i64, value: i64) -> TimeSeriesCollection {
        TimeSeriesCollection::builder(Timestamp::from_unix_millis(millis))
            .push(
                TimeSeriesValue::from_metrics(
                    GroupName::untagged(GroupPath::new(["test"]).unwrap()),
                    [(MetricName::new(["v"]).unwrap(), MetricValue::Int(value))],
                )
                .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn read_collections(path: &Path) -> Vec<TimeSeriesCollection> {
        History::read_all(path)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_single_file_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist.tsd");

        let mut history =
            History::create(&path, StrategyKind::SingleFile, CreateOptions::default()).unwrap();
        assert_eq!(history.kind(), StrategyKind::SingleFile);
        history.append(&collection(100, 1)).unwrap();
        history.append(&collection(200, 2)).unwrap();
        history.close().unwrap();

        let stored = read_collections(&path);
        assert_eq!(stored, vec![collection(100, 1), collection(200, 2)]);
    }

    #[test]
    fn test_file_list_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist_list.tsd");

        let mut history =
            History::create(&path, StrategyKind::FileList, CreateOptions::default()).unwrap();
        history.append(&collection(100, 1)).unwrap();
        history.append(&collection(200, 2)).unwrap();
        history.close().unwrap();

        let stored = read_collections(&path);
        assert_eq!(stored, vec![collection(100, 1), collection(200, 2)]);
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist.tsd");

        let mut history =
            History::create(&path, StrategyKind::SingleFile, CreateOptions::default()).unwrap();
        history.append(&collection(200, 1)).unwrap();

        match history.append(&collection(100, 2)) {
            Err(crate::error::TsdError::Storage(StorageError::OutOfOrderWrite {
                last_millis,
                attempted_millis,
            })) => {
                assert_eq!(last_millis, 200);
                assert_eq!(attempted_millis, 100);
            }
            other => panic!("expected OutOfOrderWrite, got {other:?}"),
        }

        // Equal timestamps are allowed (non-decreasing order).
        history.append(&collection(200, 3)).unwrap();
        assert_eq!(history.last_timestamp(), Some(Timestamp::from_unix_millis(200)));
    }

    #[test]
    fn test_create_fails_on_existing_without_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist.tsd");

        History::create(&path, StrategyKind::SingleFile, CreateOptions::default())
            .unwrap()
            .close()
            .unwrap();

        let result = History::create(&path, StrategyKind::SingleFile, CreateOptions::default());
        assert!(matches!(
            result,
            Err(crate::error::TsdError::Storage(
                StorageError::AlreadyExists { .. }
            ))
        ));

        // Overwrite replaces the history.
        let mut history = History::create(
            &path,
            StrategyKind::SingleFile,
            CreateOptions { overwrite: true },
        )
        .unwrap();
        history.append(&collection(1, 1)).unwrap();
        history.close().unwrap();
        assert_eq!(read_collections(&path).len(), 1);
    }

    #[test]
    fn test_reopen_recovers_strategy_and_watermark() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist_list.tsd");

        {
            let mut history =
                History::create(&path, StrategyKind::FileList, CreateOptions::default()).unwrap();
            history.append(&collection(100, 1)).unwrap();
            history.close().unwrap();
        }

        let mut history = History::open(&path).unwrap();
        assert_eq!(history.kind(), StrategyKind::FileList);
        assert_eq!(history.last_timestamp(), Some(Timestamp::from_unix_millis(100)));

        // The recovered watermark still rejects out-of-order appends.
        assert!(history.append(&collection(50, 9)).is_err());
        history.append(&collection(150, 2)).unwrap();
        history.close().unwrap();

        assert_eq!(
            read_collections(&path),
            vec![collection(100, 1), collection(150, 2)]
        );
    }

    #[test]
    fn test_read_all_is_restartable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist.tsd");

        let mut history =
            History::create(&path, StrategyKind::SingleFile, CreateOptions::default()).unwrap();
        history.append(&collection(1, 1)).unwrap();
        history.close().unwrap();

        let first = read_collections(&path);
        let second = read_collections(&path);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_history_reads_empty() {
        let dir = tempdir().unwrap();
        for (name, kind) in [
            ("empty.tsd", StrategyKind::SingleFile),
            ("empty_list.tsd", StrategyKind::FileList),
        ] {
            let path = dir.path().join(name);
            History::create(&path, kind, CreateOptions::default())
                .unwrap()
                .close()
                .unwrap();
            assert!(read_collections(&path).is_empty());
        }
    }

    #[test]
    fn test_truncated_single_file_reports_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist.tsd");

        let mut history =
            History::create(&path, StrategyKind::SingleFile, CreateOptions::default()).unwrap();
        history.append(&collection(1, 1)).unwrap();
        history.close().unwrap();

        // Chop the last byte off the record.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let items: Vec<_> = History::read_all(&path).unwrap().collect();
        assert_eq!(items.len(), 1);
        let err = items.into_iter().next().unwrap().unwrap_err();
        assert!(err.is_corrupt_data(), "unexpected error: {err}");
    }

    #[test]
    fn test_missing_segment_reports_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist_list.tsd");

        let mut history =
            History::create(&path, StrategyKind::FileList, CreateOptions::default()).unwrap();
        history.append(&collection(1, 1)).unwrap();
        history.close().unwrap();

        std::fs::remove_file(dir.path().join("hist_list_00000.tsdseg")).unwrap();

        let items: Vec<_> = History::read_all(&path).unwrap().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn test_read_missing_path_is_unavailable() {
        let result = History::read_all("/nonexistent/history.tsd");
        assert!(matches!(
            result,
            Err(crate::error::TsdError::Storage(
                StorageError::Unavailable { .. }
            ))
        ));
    }
}
