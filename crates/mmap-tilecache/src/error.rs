use std::path::PathBuf;

use detour::Status;

use crate::coords::TileCoord;

/// Reasons a navigation file is rejected before it reaches the mesh
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic {found:#010x}")]
    BadMagic { found: u32 },

    #[error("detour version {found}, expected {expected}")]
    BadDetourVersion { found: u32, expected: u32 },

    #[error("mmap version {found}, expected {expected}")]
    BadMmapVersion { found: u32, expected: u32 },

    #[error("payload size {found}, expected {expected}")]
    BadSize { found: u32, expected: u32 },

    #[error("file ends before the declared payload")]
    Truncated,

    #[error("tile payload rejected: {0}")]
    Payload(Status),
}

/// Error types for tile and map loading
#[derive(thiserror::Error, Debug)]
pub enum TileError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid navigation file {}: {reason}", path.display())]
    Format { path: PathBuf, reason: FormatError },

    #[error("navigation mesh {mesh_id} could not be initialized: {status}")]
    LibraryInit { mesh_id: u32, status: Status },

    #[error("navigation mesh {mesh_id} rejected tile {coord}: {status}")]
    LibraryOp {
        mesh_id: u32,
        coord: TileCoord,
        status: Status,
    },
}

impl TileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TileError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: FormatError) -> Self {
        TileError::Format {
            path: path.into(),
            reason,
        }
    }

    /// True when the file simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, TileError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
