//! The uploader: the client task that serves chunk requests until the
//! tracker calls the swarm off.
//!
//! No chunk data ever moves; the acknowledgment alone tells the requester
//! it may add the hash to its manifest. The uploader does not check that it
//! owns the requested hash, trusting peers to only request what was
//! advertised to them, which is also what keeps it free of shared state
//! with the downloader.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    error::*,
    transport::Endpoint,
    wire::{self, Tag},
};

pub(crate) struct Uploader {
    endpoint: Arc<Endpoint>,
}

impl Uploader {
    pub(crate) fn new(endpoint: Arc<Endpoint>) -> Self {
        Self { endpoint }
    }

    /// Serves requests from any source until `STOP_UPLOADING` arrives.
    pub(crate) async fn run(self) -> Result<()> {
        let rank = self.endpoint.rank();
        log::info!("Starting uploader of client {}", rank);

        loop {
            let (src, frame) = self.endpoint.recv_any(Tag::Request).await?;
            if wire::is_stop(&frame) {
                log::info!("Uploader of client {} told to stop", rank);
                break;
            }

            log::debug!(
                "Client {} grants chunk {} to peer {}",
                rank,
                hex::encode(&frame[..frame.len().min(8)]),
                src
            );
            self.endpoint
                .send(src, Tag::Ack, Bytes::from_static(wire::OK))?;
        }
        Ok(())
    }
}
