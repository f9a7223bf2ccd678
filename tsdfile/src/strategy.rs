//! Storage strategies: mapping collection records onto physical files.
//!
//! A stored history is realized under one of two strategies, chosen at
//! creation time and recorded in the file header so readers can dispatch:
//!
//! - **Single-file**: one growing file; the header is followed by
//!   collection records in append order.
//! - **File-list**: the named artifact is a manifest listing constituent
//!   segment files in presentation order. Each append call is one logical
//!   batch and produces one new segment (itself in single-file layout)
//!   next to the manifest, after which the manifest is rewritten.
//!
//! # File Layout
//!
//! ```text
//! metrics.tsd                      <- single-file history
//! metrics_list.tsd                 <- file-list manifest
//! metrics_list_00000.tsdseg        <- first segment
//! metrics_list_00001.tsdseg        <- second segment
//! ```
//!
//! The manifest body is a JSON document (`{"version":1,"segments":[...]}`)
//! following the binary header, length-prefixed so the codec can frame it.
//!
//! Writers exclusively own their file handles. Every append is buffered
//! fully in memory and written in a single call, so a failed append never
//! leaves a partially observable record; for the file-list strategy the
//! segment is made durable before the manifest references it, so a crash
//! between the two leaves an unreferenced segment, never a corrupt history.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{Decoder, Encoder, FileHeader, HEADER_LEN};
use crate::error::{Result, StorageError};

/// Extension used for history artifacts (convention, not enforced).
pub const FILE_EXTENSION: &str = "tsd";

/// Extension used for file-list segments (convention, not enforced).
pub const SEGMENT_EXTENSION: &str = "tsdseg";

/// Suffix conventionally appended to file-list artifact stems.
pub const LIST_SUFFIX: &str = "_list";

/// Version of the JSON manifest document inside file-list artifacts.
const MANIFEST_VERSION: u32 = 1;

/// Policy governing how collections map onto backing files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// All collections appended to one growing file.
    SingleFile,
    /// Collections distributed across discrete segment files tracked by a
    /// manifest.
    FileList,
}

impl StrategyKind {
    /// Returns the wire representation of this strategy.
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            StrategyKind::SingleFile => 0,
            StrategyKind::FileList => 1,
        }
    }

    /// Parses the wire representation, `None` for unknown bytes.
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StrategyKind::SingleFile),
            1 => Some(StrategyKind::FileList),
            _ => None,
        }
    }
}

/// Returns the conventional file name for a history artifact.
///
/// Single-file histories get `<stem>.tsd`; file-list histories get
/// `<stem>_list.tsd`. Purely a naming convention for operator legibility —
/// the header, not the name, is authoritative.
pub fn conventional_file_name(stem: &str, kind: StrategyKind) -> String {
    match kind {
        StrategyKind::SingleFile => format!("{stem}.{FILE_EXTENSION}"),
        StrategyKind::FileList => format!("{stem}{LIST_SUFFIX}.{FILE_EXTENSION}"),
    }
}

/// The JSON manifest document stored in file-list artifacts.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Manifest {
    /// Manifest document version.
    pub version: u32,
    /// Segment file names (relative to the manifest's directory) in
    /// presentation order.
    pub segments: Vec<String>,
}

/// Reads and validates the header of an existing history artifact.
///
/// Reads only the header bytes; reading the whole artifact just to look at
/// the header would be wasteful for large single-file histories.
pub(crate) fn read_header(path: &Path) -> Result<FileHeader> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| StorageError::Unavailable {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut buf = vec![0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file
            .read(&mut buf[filled..])
            .map_err(|e| StorageError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        if n == 0 {
            buf.truncate(filled);
            break;
        }
        filled += n;
    }
    parse_header(&buf, path)
}

pub(crate) fn parse_header(bytes: &[u8], path: &Path) -> Result<FileHeader> {
    let mut dec = Decoder::new(bytes);
    dec.get_header().map_err(|e| {
        StorageError::CorruptFile {
            path: path.to_path_buf(),
            source: e,
        }
        .into()
    })
}

/// Capability interface implemented by the two concrete storage strategies.
///
/// A writer exclusively owns the file resources of one stored history for
/// its lifetime; appends require exclusive access (single writer per
/// handle).
pub(crate) trait StrategyWriter: std::fmt::Debug {
    /// Returns the strategy this writer implements.
    fn kind(&self) -> StrategyKind;

    /// Appends one fully-encoded collection record.
    fn append_record(&mut self, record: &[u8]) -> Result<()>;

    /// Forces buffered data to durable storage.
    fn sync(&mut self) -> Result<()>;

    /// Syncs and releases all file resources.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Append-only writer for the single-file strategy.
#[derive(Debug)]
pub(crate) struct SingleFileWriter {
    file: File,
    path: PathBuf,
}

impl SingleFileWriter {
    /// Creates a new single-file history, writing its header.
    pub(crate) fn create(path: &Path, overwrite: bool) -> Result<Self> {
        let file = open_for_create(path, overwrite)?;
        let mut writer = Self {
            file,
            path: path.to_path_buf(),
        };
        let mut enc = Encoder::new();
        enc.put_header(&FileHeader::current(StrategyKind::SingleFile));
        writer.append_record(enc.as_bytes())?;
        debug!(path = %writer.path.display(), "created single-file history");
        Ok(writer)
    }

    /// Opens an existing single-file history for appending.
    ///
    /// The caller has already validated the header.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| StorageError::Unavailable {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(path = %path.display(), "opened single-file history for append");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl StrategyWriter for SingleFileWriter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SingleFile
    }

    fn append_record(&mut self, record: &[u8]) -> Result<()> {
        self.file
            .write_all(record)
            .map_err(|e| StorageError::WriteFailed {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data().map_err(|e| {
            StorageError::SyncFailed {
                path: self.path.clone(),
                source: e,
            }
            .into()
        })
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.sync()
    }
}

/// Writer for the file-list strategy: one segment file per append batch,
/// tracked by a manifest.
#[derive(Debug)]
pub(crate) struct FileListWriter {
    manifest_path: PathBuf,
    dir: PathBuf,
    stem: String,
    segments: Vec<String>,
}

impl FileListWriter {
    /// Creates a new file-list history with an empty manifest.
    ///
    /// When overwriting, segments named by the previous manifest are
    /// removed best-effort before the new manifest is written.
    pub(crate) fn create(path: &Path, overwrite: bool) -> Result<Self> {
        if overwrite && path.exists() {
            remove_stale_segments(path);
        }
        // Reserve the manifest path first so concurrent creates collide here.
        let file = open_for_create(path, overwrite)?;
        drop(file);

        let mut writer = Self {
            manifest_path: path.to_path_buf(),
            dir: parent_dir(path),
            stem: artifact_stem(path),
            segments: Vec::new(),
        };
        writer.write_manifest()?;
        debug!(path = %writer.manifest_path.display(), "created file-list history");
        Ok(writer)
    }

    /// Opens an existing file-list history for appending.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let manifest = read_manifest(path)?;
        debug!(
            path = %path.display(),
            segments = manifest.segments.len(),
            "opened file-list history for append"
        );
        Ok(Self {
            manifest_path: path.to_path_buf(),
            dir: parent_dir(path),
            stem: artifact_stem(path),
            segments: manifest.segments,
        })
    }

    fn next_segment_name(&self) -> String {
        format!(
            "{}_{:05}.{SEGMENT_EXTENSION}",
            self.stem,
            self.segments.len()
        )
    }

    fn write_manifest(&mut self) -> Result<()> {
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            segments: self.segments.clone(),
        };
        let body = serde_json::to_vec(&manifest).map_err(StorageError::ManifestSerialize)?;

        let mut enc = Encoder::new();
        enc.put_header(&FileHeader::current(StrategyKind::FileList));
        let mut bytes = enc.into_bytes();
        #[allow(clippy::cast_possible_truncation)] // manifest bodies are small
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&body);

        let mut file =
            File::create(&self.manifest_path).map_err(|e| StorageError::Unavailable {
                path: self.manifest_path.clone(),
                source: e,
            })?;
        file.write_all(&bytes).map_err(|e| StorageError::WriteFailed {
            path: self.manifest_path.clone(),
            source: e,
        })?;
        file.sync_data().map_err(|e| StorageError::SyncFailed {
            path: self.manifest_path.clone(),
            source: e,
        })?;
        Ok(())
    }
}

impl StrategyWriter for FileListWriter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FileList
    }

    fn append_record(&mut self, record: &[u8]) -> Result<()> {
        let name = self.next_segment_name();
        let segment_path = self.dir.join(&name);

        // Segments are independently readable single-file layouts.
        let mut enc = Encoder::new();
        enc.put_header(&FileHeader::current(StrategyKind::SingleFile));
        let mut bytes = enc.into_bytes();
        bytes.extend_from_slice(record);

        let mut file = open_for_create(&segment_path, true)?;
        file.write_all(&bytes).map_err(|e| StorageError::WriteFailed {
            path: segment_path.clone(),
            source: e,
        })?;
        file.sync_data().map_err(|e| StorageError::SyncFailed {
            path: segment_path.clone(),
            source: e,
        })?;
        drop(file);

        // The segment is durable; now make the manifest reference it.
        self.segments.push(name.clone());
        if let Err(e) = self.write_manifest() {
            self.segments.pop();
            return Err(e);
        }
        debug!(segment = %name, "appended file-list segment");
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        // Segments and the manifest are synced as part of every append.
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn open_for_create(path: &Path, overwrite: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            StorageError::AlreadyExists {
                path: path.to_path_buf(),
            }
            .into()
        } else {
            StorageError::Unavailable {
                path: path.to_path_buf(),
                source: e,
            }
            .into()
        }
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn artifact_stem(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "history".to_string(), |s| s.to_string_lossy().to_string())
}

/// Reads and parses the manifest of a file-list artifact.
pub(crate) fn read_manifest(path: &Path) -> Result<Manifest> {
    let bytes = fs::read(path).map_err(|e| StorageError::Unavailable {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_manifest(&bytes, path)
}

/// Parses a manifest from the full artifact bytes (header included).
pub(crate) fn parse_manifest(bytes: &[u8], path: &Path) -> Result<Manifest> {
    let mut dec = Decoder::new(bytes);
    let header = dec.get_header().map_err(|e| StorageError::CorruptFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    if header.strategy != StrategyKind::FileList {
        return Err(StorageError::CorruptFile {
            path: path.to_path_buf(),
            source: crate::error::CodecError::Corrupt {
                offset: 0,
                reason: "expected a file-list manifest header".to_string(),
            },
        }
        .into());
    }
    let body = dec.get_block().map_err(|e| StorageError::CorruptFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let manifest: Manifest =
        serde_json::from_slice(body).map_err(|e| StorageError::CorruptManifest {
            path: path.to_path_buf(),
            source: e,
        })?;
    if manifest.version != MANIFEST_VERSION {
        return Err(StorageError::CorruptFile {
            path: path.to_path_buf(),
            source: crate::error::CodecError::Corrupt {
                offset: HEADER_LEN,
                reason: format!("unsupported manifest version {}", manifest.version),
            },
        }
        .into());
    }
    Ok(manifest)
}

/// Best-effort removal of segments referenced by an existing manifest,
/// used when a file-list history is created with overwrite.
fn remove_stale_segments(manifest_path: &Path) {
    let Ok(manifest) = read_manifest(manifest_path) else {
        debug!(
            path = %manifest_path.display(),
            "overwriting unreadable manifest; stale segments may remain"
        );
        return;
    };
    let dir = parent_dir(manifest_path);
    for name in &manifest.segments {
        let segment = dir.join(name);
        if let Err(e) = fs::remove_file(&segment) {
            debug!(segment = %segment.display(), error = %e, "failed to remove stale segment");
        }
    }
}
