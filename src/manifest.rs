//! Manifest I/O: the per-client input file and the per-file download output.
//!
//! The input `in<rank>.txt` lists the files a client starts out with (as
//! ordered chunk-hash sequences) and the names of the files it wants. Upon
//! completing a wanted file the client writes `client<rank>_<file_name>`
//! with one hash per line, in acquisition order.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    error::*, ChunkHash, ClientKind, FileId, Rank, HASH_LEN, MAX_CHUNKS,
    MAX_FILENAME,
};

/// An ordered, append-only sequence of chunk hashes making up one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileManifest {
    /// The textual file name, at most [`MAX_FILENAME`]` - 1` bytes.
    pub name: String,
    /// The numeric identity derived from the name.
    pub id: FileId,
    /// The chunks this holder currently has, in order. A holder considers
    /// chunks `[0..len)` present and seeks the rest from peers.
    pub chunks: Vec<ChunkHash>,
}

impl FileManifest {
    /// Creates an empty manifest for a file identified only by its id, as
    /// happens when a download or a progress report touches a file for the
    /// first time.
    pub fn allocate(id: FileId) -> Self {
        Self {
            name: format!("file{}", id),
            id,
            chunks: Vec::new(),
        }
    }

    /// Returns whether the manifest already holds the given chunk, by
    /// full-hash comparison.
    pub fn contains(&self, hash: &ChunkHash) -> bool {
        self.chunks.iter().any(|own| own == hash)
    }

    /// Appends a chunk. Fails once the [`MAX_CHUNKS`] bound is reached.
    pub fn push(&mut self, hash: ChunkHash) -> Result<()> {
        if self.chunks.len() >= MAX_CHUNKS {
            return Err(Error::ChunkLimit(self.id));
        }
        self.chunks.push(hash);
        Ok(())
    }
}

/// Derives a file's numeric id from the trailing digit run of its name
/// (`"file12"` is file 12). Names without a trailing digit are rejected.
pub fn file_id(name: &str) -> Result<FileId> {
    let digits = name
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(name, |pos| &name[pos + 1..]);
    digits
        .parse()
        .map_err(|_| Error::InvalidFileName(name.to_string()))
}

/// Everything a client knows at startup: what it has, what it wants, and
/// the kind that follows from those two sets.
#[derive(Debug)]
pub struct ClientManifest {
    pub rank: Rank,
    pub owned: Vec<FileManifest>,
    pub wanted: Vec<String>,
    pub kind: ClientKind,
}

impl ClientManifest {
    /// Reads and validates `in<rank>.txt` from the input directory. Any
    /// defect in the file is a configuration error and fails the whole
    /// startup.
    pub fn load(input_dir: &Path, rank: Rank) -> Result<Self> {
        let path = input_dir.join(format!("in{}.txt", rank));
        let text = fs::read_to_string(&path).map_err(|e| {
            Error::InvalidManifest {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let fail = |reason: String| Error::InvalidManifest {
            path: path.display().to_string(),
            reason,
        };

        let mut lines = text.lines();
        let mut next = |what: &str| {
            lines
                .next()
                .ok_or_else(|| fail(format!("missing {}", what)))
        };

        let owned_count: usize = next("owned file count")?
            .trim()
            .parse()
            .map_err(|_| fail("bad owned file count".into()))?;

        let mut owned = Vec::with_capacity(owned_count);
        for _ in 0..owned_count {
            let header = next("owned file header")?;
            let mut parts = header.split_whitespace();
            let name = parts
                .next()
                .ok_or_else(|| fail("empty owned file header".into()))?;
            if name.len() >= MAX_FILENAME {
                return Err(fail(format!("file name {:?} too long", name)));
            }
            let chunk_count: usize = parts
                .next()
                .and_then(|count| count.parse().ok())
                .ok_or_else(|| {
                    fail(format!("bad chunk count for {:?}", name))
                })?;
            if chunk_count > MAX_CHUNKS {
                return Err(fail(format!(
                    "{:?} exceeds the {} chunk limit",
                    name, MAX_CHUNKS
                )));
            }

            let mut chunks = Vec::with_capacity(chunk_count);
            for _ in 0..chunk_count {
                let line = next("chunk hash")?.trim_end_matches('\n');
                let bytes = line.as_bytes();
                if bytes.len() != HASH_LEN {
                    return Err(fail(format!(
                        "hash line of {} bytes, expected {}",
                        bytes.len(),
                        HASH_LEN
                    )));
                }
                let mut hash = [0u8; HASH_LEN];
                hash.copy_from_slice(bytes);
                chunks.push(hash);
            }

            owned.push(FileManifest {
                name: name.to_string(),
                id: file_id(name)?,
                chunks,
            });
        }

        let wanted_count: usize = next("wanted file count")?
            .trim()
            .parse()
            .map_err(|_| fail("bad wanted file count".into()))?;
        let mut wanted = Vec::with_capacity(wanted_count);
        for _ in 0..wanted_count {
            let name = next("wanted file name")?.trim();
            if name.len() >= MAX_FILENAME {
                return Err(fail(format!("file name {:?} too long", name)));
            }
            wanted.push(name.to_string());
        }

        let kind = ClientKind::derive(!owned.is_empty(), !wanted.is_empty());
        Ok(Self {
            rank,
            owned,
            wanted,
            kind,
        })
    }
}

/// Writes a completed file's manifest as `client<rank>_<file_name>`, one
/// hash per line, and returns the path written.
pub fn write_download(
    download_dir: &Path,
    rank: Rank,
    file: &FileManifest,
) -> Result<PathBuf> {
    let path = download_dir.join(format!("client{}_{}", rank, file.name));
    let mut out = fs::File::create(&path)?;
    for hash in &file.chunks {
        out.write_all(hash)?;
        out.write_all(b"\n")?;
    }
    Ok(path)
}
