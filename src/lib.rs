mod client;
pub mod conf;
mod download;
pub mod engine;
pub mod error;
pub mod manifest;
mod tracker;
pub mod transport;
mod upload;
pub mod wire;

/// The rank of a process within the fabric's process group.
///
/// Rank 0 is always the tracker; ranks `1..=client_count` are clients. On the
/// wire ranks are sent as 4-byte little endian integers, but in the source
/// code we use `u32` and convert at the codec boundary.
pub type Rank = u32;

/// The numeric identity of a file, derived from the trailing digit run of its
/// name (`"file12"` has id 12). Ids partition the swarms; 0 is invalid.
pub type FileId = u32;

/// A chunk's hash digest, 32 bytes long.
///
/// Hashes are opaque tokens read from the input manifests; two chunks with
/// equal hash are the same chunk. The codec ships exactly [`HASH_LEN`] bytes,
/// never a terminator.
pub type ChunkHash = [u8; HASH_LEN];

/// The length of a chunk hash, in bytes.
pub const HASH_LEN: usize = 32;

/// The maximum length of a file name, including the trailing zero padding the
/// wire representation carries.
pub const MAX_FILENAME: usize = 15;

/// The maximum number of chunks a single file may consist of.
pub const MAX_CHUNKS: usize = 100;

/// The size of a progress-report frame. Only the first [`HASH_LEN`] bytes
/// carry the hash; the rest is padding.
pub const BUFF_SIZE: usize = 64;

/// The rank of the tracker process. The tracker owns no files and is never
/// a swarm member.
pub const TRACKER_RANK: Rank = 0;

/// The number of chunk downloads between two progress reports, and the exact
/// number of hash frames in every report burst.
pub(crate) const REPORT_BURST: usize = 10;

/// Formats a hash for log output.
pub(crate) fn fmt_hash(hash: &ChunkHash) -> String {
    hex::encode(&hash[..8])
}

/// What a client does in the fabric, derived from its manifest at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientKind {
    /// Owns files and wants none: only serves chunks.
    Seeder = 0,
    /// Owns files and wants more: serves and downloads.
    Peer = 1,
    /// Owns nothing: only downloads.
    Leecher = 2,
}

impl ClientKind {
    /// Derives the kind from the owned/wanted sets. A client with neither is
    /// treated as a leecher.
    pub fn derive(owns_files: bool, wants_files: bool) -> Self {
        match (owns_files, wants_files) {
            (true, false) => Self::Seeder,
            (true, true) => Self::Peer,
            _ => Self::Leecher,
        }
    }

    pub(crate) fn from_wire(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Seeder),
            1 => Some(Self::Peer),
            2 => Some(Self::Leecher),
            _ => None,
        }
    }
}
