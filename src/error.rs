//! Crate-wide error and result types.

use thiserror::Error;

use crate::{FileId, Rank, MAX_CHUNKS};

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A transport endpoint was used after its counterpart hung up. The
    /// fabric treats delivery as reliable, so this only occurs when a task
    /// died or the group was torn down mid-exchange.
    #[error("transport channel to rank {0} closed")]
    ChannelClosed(Rank),

    /// A rank outside the process group was addressed.
    #[error("rank {0} is not a member of the process group")]
    InvalidRank(Rank),

    /// A received frame did not have the shape its tag requires.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// An input manifest could not be parsed.
    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest { path: String, reason: String },

    /// A file name carries no trailing digit run to derive an id from.
    #[error("file name {0:?} has no trailing digit to derive an id from")]
    InvalidFileName(String),

    /// A manifest would grow past [`MAX_CHUNKS`](crate::MAX_CHUNKS) chunks.
    #[error("file {0} is at the {MAX_CHUNKS} chunk limit")]
    ChunkLimit(FileId),

    /// A spawned task panicked or was cancelled.
    #[error("fabric task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
