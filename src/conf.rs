//! This module defines types used to configure the fabric and its parts.

use std::path::PathBuf;

/// The global configuration for a replication fabric run.
#[derive(Clone, Debug)]
pub struct Conf {
    /// The number of client ranks in the group. The full group is one larger:
    /// rank 0 is the tracker.
    pub client_count: usize,
    /// The directory the per-client input manifests (`in<rank>.txt`) are read
    /// from.
    pub input_dir: PathBuf,
    /// The directory completed files (`client<rank>_<file_name>`) are written
    /// into.
    pub download_dir: PathBuf,
}

impl Conf {
    /// Returns the fabric configuration for the given group shape. There are
    /// no tunables beyond the directories: the report cadence and frame sizes
    /// are protocol constants.
    pub fn new(
        client_count: usize,
        input_dir: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client_count,
            input_dir: input_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    /// The size of the whole process group, tracker included.
    pub fn group_size(&self) -> usize {
        self.client_count + 1
    }
}
