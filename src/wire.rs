//! The wire protocol: message tags and frame shapes.
//!
//! Every message in the fabric travels as a single frame on one of six tags.
//! Integers are 4-byte little endian, file names are [`MAX_FILENAME`]-byte
//! zero-padded strings, hashes are exactly [`HASH_LEN`] raw bytes and control
//! verbs are NUL-terminated ASCII (except the 2-byte `"OK"` acknowledgment).
//! Receivers strip trailing NUL bytes before comparing verbs.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::*, ChunkHash, BUFF_SIZE, HASH_LEN, MAX_FILENAME,
};

/// The tag carried by every message, multiplexing the logical streams
/// between a pair of ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Tag {
    /// Bulk chunk-data channel: inventory uploads and swarm hash lists.
    Hash = 0,
    /// A client's kind, sent once during startup intake.
    ClientType = 1,
    /// `"OK"` acknowledgments: the startup barrier, chunk grants and report
    /// receipts.
    Ack = 2,
    /// The swarm-query exchange.
    Swarm = 3,
    /// Chunk requests between peers, and the tracker's stop signal.
    Request = 4,
    /// Progress reports and peer-list requests.
    Inform = 5,
}

/// The number of distinct tags; tags index per-endpoint receive queues.
pub const TAG_COUNT: usize = 6;

/// The acknowledgment payload, exactly two bytes.
pub const OK: &[u8] = b"OK";

/// The uploader stop signal, fifteen bytes on the wire.
pub const STOP_UPLOADING: &[u8] = b"STOP_UPLOADING\0";

/// The verbs a client may send on the [`Tag::Inform`] stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InformVerb {
    /// Ten more chunks of a file were downloaded since the last report.
    /// Followed by a file id frame and a fixed burst of ten hash frames.
    Down10,
    /// A file was fully acquired; same trailer as `Down10`.
    DownX,
    /// Request fresh swarm info. Carries no trailer.
    GivePeers,
    /// Every wanted file has been acquired.
    FinishedDownAll,
}

impl InformVerb {
    fn as_str(self) -> &'static str {
        match self {
            Self::Down10 => "DOWN_10",
            Self::DownX => "DOWN_X",
            Self::GivePeers => "GIVE_PEERS",
            Self::FinishedDownAll => "FINISHED_DOWN_ALL",
        }
    }

    /// Parses a received inform payload. Returns `None` for unknown verbs,
    /// which the tracker logs and ignores.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match strip_padding(payload) {
            b"DOWN_10" => Some(Self::Down10),
            b"DOWN_X" => Some(Self::DownX),
            b"GIVE_PEERS" => Some(Self::GivePeers),
            b"FINISHED_DOWN_ALL" => Some(Self::FinishedDownAll),
            _ => None,
        }
    }

    /// Encodes the verb as a NUL-terminated frame.
    pub fn frame(self) -> Bytes {
        let s = self.as_str();
        let mut buf = BytesMut::with_capacity(s.len() + 1);
        buf.put_slice(s.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }
}

/// Strips the trailing NUL padding a control frame may carry.
pub fn strip_padding(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    &payload[..end]
}

/// Returns whether an acknowledgment payload grants the request.
pub fn is_ok(payload: &[u8]) -> bool {
    strip_padding(payload) == OK
}

/// Returns whether a request payload is the uploader stop signal.
pub fn is_stop(payload: &[u8]) -> bool {
    strip_padding(payload) == strip_padding(STOP_UPLOADING)
}

/// Encodes an integer frame.
pub fn int_frame(value: i32) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

/// Decodes an integer frame.
pub fn read_int(frame: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = frame
        .try_into()
        .map_err(|_| Error::MalformedFrame("integer frame is not 4 bytes"))?;
    Ok(i32::from_le_bytes(bytes))
}

/// Encodes a list of unsigned integers (ranks or file ids) as one frame.
pub fn int_list_frame(values: &[u32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(values.len() * 4);
    for &value in values {
        buf.put_i32_le(value as i32);
    }
    buf.freeze()
}

/// Decodes a list-of-integers frame.
pub fn read_int_list(frame: &[u8]) -> Result<Vec<u32>> {
    if frame.len() % 4 != 0 {
        return Err(Error::MalformedFrame("integer list frame truncated"));
    }
    Ok(frame
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()) as u32)
        .collect())
}

/// Encodes a file name as a fixed [`MAX_FILENAME`]-byte zero-padded frame.
/// Names are validated to fit when the manifest is read.
pub fn name_frame(name: &str) -> Bytes {
    let mut buf = BytesMut::zeroed(MAX_FILENAME);
    let len = name.len().min(MAX_FILENAME - 1);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf.freeze()
}

/// Decodes a file name frame.
pub fn read_name(frame: &[u8]) -> Result<String> {
    if frame.len() != MAX_FILENAME {
        return Err(Error::MalformedFrame("name frame has wrong length"));
    }
    String::from_utf8(strip_padding(frame).to_vec())
        .map_err(|_| Error::MalformedFrame("name frame is not valid UTF-8"))
}

/// Encodes a chunk hash as an exact [`HASH_LEN`]-byte frame.
pub fn hash_frame(hash: &ChunkHash) -> Bytes {
    Bytes::copy_from_slice(hash)
}

/// Decodes a chunk hash frame.
pub fn read_hash(frame: &[u8]) -> Result<ChunkHash> {
    frame
        .try_into()
        .map_err(|_| Error::MalformedFrame("hash frame has wrong length"))
}

/// Encodes a chunk request. Requests carry only the first `HASH_LEN - 1`
/// hash bytes; the serving peer never inspects them, so the truncation is
/// part of the protocol's shape rather than a defect of it.
pub fn request_frame(hash: &ChunkHash) -> Bytes {
    Bytes::copy_from_slice(&hash[..HASH_LEN - 1])
}

/// Encodes one hash of a progress-report burst as a full [`BUFF_SIZE`]
/// frame, hash first, zero padding after.
pub fn burst_frame(hash: &ChunkHash) -> Bytes {
    let mut buf = BytesMut::zeroed(BUFF_SIZE);
    buf[..HASH_LEN].copy_from_slice(hash);
    buf.freeze()
}

/// A burst frame with no hash in it, padding a report below the fixed burst
/// length.
pub fn empty_burst_frame() -> Bytes {
    Bytes::from_static(&[0u8; BUFF_SIZE])
}

/// Decodes a progress-report burst frame. Returns `None` for a padding
/// frame.
pub fn read_burst(frame: &[u8]) -> Result<Option<ChunkHash>> {
    if frame.len() != BUFF_SIZE {
        return Err(Error::MalformedFrame("burst frame has wrong length"));
    }
    let hash = read_hash(&frame[..HASH_LEN])?;
    if hash.iter().all(|&b| b == 0) {
        Ok(None)
    } else {
        Ok(Some(hash))
    }
}
