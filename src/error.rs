use std::fmt;
use std::io;

/// Error type shared by every layer of the engine.
///
/// Callers are expected to match on variants: a scan tolerates
/// [`DbError::PageNotPinned`] while crossing pages, the insert path
/// branches on [`DbError::PageFull`], and `create_rel` treats
/// [`DbError::RelationNotFound`] as the go-ahead to proceed.
#[derive(Debug)]
pub enum DbError {
    /// Underlying I/O failure from the filesystem layer.
    Io(io::Error),

    /// Every frame in the buffer pool is pinned; nothing can be evicted.
    BufferExceeded,

    /// The frame index disagrees with the frame arena (a mapping was
    /// missing on eviction, or already present on load).
    FrameTableCorrupt,

    /// The page is not resident in the buffer pool.
    PageNotCached { file_id: u64, page_no: u32 },

    /// Unpin of a page whose pin count is already zero.
    PageNotPinned { file_id: u64, page_no: u32 },

    /// `flush_file` found a frame of the file still pinned.
    PagePinned { file_id: u64, page_no: u32 },

    /// Record larger than a data page can ever hold.
    RecordTooLong { len: usize, max: usize },

    /// No room left on this page for the record.
    PageFull,

    /// RID does not name a live record on its page.
    InvalidSlot { page_no: u32, slot_no: u16 },

    /// Invalid `start_scan` arguments.
    BadScanParam(String),

    /// Empty name or otherwise invalid catalog input.
    BadCatalogParam(String),

    /// Relation or attribute name does not fit in a catalog record.
    NameTooLong(String),

    /// File creation clashed with an existing file.
    FileExists(String),

    /// The named file does not exist.
    FileNotFound(String),

    /// The file is still open and cannot be destroyed.
    FileOpen(String),

    /// A relation with this name is already cataloged.
    RelationExists(String),

    /// The relation is absent from the catalog.
    RelationNotFound(String),

    /// The relation has no attribute with this name.
    AttributeNotFound { rel: String, attr: String },

    /// The supplied values do not cover the relation's schema.
    SchemaMismatch { expected: usize, given: usize },

    /// A textual value could not be parsed for its attribute type.
    BadValue(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Io(err) => write!(f, "I/O error: {err}"),
            DbError::BufferExceeded => write!(f, "buffer pool exceeded: all frames pinned"),
            DbError::FrameTableCorrupt => write!(f, "frame table out of sync with frame arena"),
            DbError::PageNotCached { file_id, page_no } => {
                write!(f, "page {page_no} of file {file_id} is not buffered")
            }
            DbError::PageNotPinned { file_id, page_no } => {
                write!(f, "page {page_no} of file {file_id} is not pinned")
            }
            DbError::PagePinned { file_id, page_no } => {
                write!(f, "page {page_no} of file {file_id} is still pinned")
            }
            DbError::RecordTooLong { len, max } => {
                write!(f, "record of {len} bytes exceeds page capacity of {max}")
            }
            DbError::PageFull => write!(f, "no space left on page"),
            DbError::InvalidSlot { page_no, slot_no } => {
                write!(f, "no record at slot {slot_no} of page {page_no}")
            }
            DbError::BadScanParam(msg) => write!(f, "bad scan parameter: {msg}"),
            DbError::BadCatalogParam(msg) => write!(f, "bad catalog parameter: {msg}"),
            DbError::NameTooLong(name) => write!(f, "name too long: {name}"),
            DbError::FileExists(name) => write!(f, "file already exists: {name}"),
            DbError::FileNotFound(name) => write!(f, "file not found: {name}"),
            DbError::FileOpen(name) => write!(f, "file is open: {name}"),
            DbError::RelationExists(name) => write!(f, "relation already exists: {name}"),
            DbError::RelationNotFound(name) => write!(f, "relation not found: {name}"),
            DbError::AttributeNotFound { rel, attr } => {
                write!(f, "relation {rel} has no attribute {attr}")
            }
            DbError::SchemaMismatch { expected, given } => {
                write!(f, "schema has {expected} attributes, {given} supplied")
            }
            DbError::BadValue(msg) => write!(f, "bad value: {msg}"),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DbError {
    fn from(err: io::Error) -> Self {
        DbError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
