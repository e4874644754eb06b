//! Failure codes of mesh and query operations

/// Result of a mesh or query operation
pub type Result<T> = std::result::Result<T, Status>;

/// Why a mesh or query operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Generic failure, e.g. a reference that names no polygon
    Failure,
    /// Out-of-range argument or stale reference
    InvalidParam,
    /// No free slot or node left
    OutOfMemory,
    /// Output buffer was too small for the result
    BufferTooSmall,
    /// The tile location is occupied
    AlreadyExists,
    /// No such tile or polygon
    NotFound,
    /// Tile payload failed validation
    DataCorrupted,
    /// Tile payload does not start with the tile magic
    WrongMagic,
    /// Tile payload was written by another format version
    WrongVersion,
}

impl Status {
    /// Checks if the status describes malformed input data
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Status::DataCorrupted | Status::WrongMagic | Status::WrongVersion
        )
    }
}

impl std::error::Error for Status {}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Failure => write!(f, "operation failed"),
            Status::InvalidParam => write!(f, "invalid parameter"),
            Status::OutOfMemory => write!(f, "out of tile slots or nodes"),
            Status::BufferTooSmall => write!(f, "output buffer too small"),
            Status::AlreadyExists => write!(f, "tile location already occupied"),
            Status::NotFound => write!(f, "not found"),
            Status::DataCorrupted => write!(f, "corrupted tile data"),
            Status::WrongMagic => write!(f, "wrong tile magic"),
            Status::WrongVersion => write!(f, "wrong tile version"),
        }
    }
}

impl From<std::io::Error> for Status {
    fn from(_: std::io::Error) -> Self {
        Status::DataCorrupted
    }
}
