// Error types for splat loading and sorting
// Parse failures are fatal to a load; nothing in the per-frame sort path returns these.

use thiserror::Error;

/// Errors raised while reading a PLY stream
#[derive(Error, Debug)]
pub enum PlyError {
    #[error("PLY: first line must be \"ply\"")]
    MissingMagic,

    #[error("PLY: unsupported format \"{0}\"")]
    UnsupportedFormat(String),

    #[error("PLY: invalid header at line {line}: {reason}")]
    InvalidHeader { line: usize, reason: String },

    #[error("PLY: stream ended before end_header")]
    MissingEndHeader,

    #[error("PLY: header exceeds {limit} bytes without end_header")]
    HeaderTooLarge { limit: usize },

    #[error("PLY: cannot parse \"{token}\" for {element}.{property}")]
    InvalidValue {
        element: String,
        property: String,
        token: String,
    },

    #[error("PLY: unexpected end of stream in element \"{element}\" ({read} of {expected} records)")]
    UnexpectedEof {
        element: String,
        expected: usize,
        read: usize,
    },

    #[error("PLY: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building splat resources
#[derive(Error, Debug)]
pub enum SplatError {
    #[error(transparent)]
    Ply(#[from] PlyError),

    #[error("element \"{0}\" not found")]
    MissingElement(String),

    #[error("required property \"{0}\" missing from vertex element")]
    MissingProperty(String),

    #[error("property \"{name}\" has {len} values, expected {expected}")]
    LengthMismatch {
        name: String,
        len: usize,
        expected: usize,
    },

    #[error("scene contains no splats")]
    EmptyScene,

    #[error("failed to spawn sort worker: {0}")]
    WorkerSpawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SplatError>;
