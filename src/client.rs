//! Client membership: announcing the startup inventory to the tracker,
//! waiting out the barrier and running the replication task pair.

use std::{path::PathBuf, sync::Arc};

use crate::{
    conf::Conf,
    download::Downloader,
    error::*,
    manifest::ClientManifest,
    transport::Endpoint,
    upload::Uploader,
    wire::{self, Tag},
    ClientKind, TRACKER_RANK,
};

/// One client rank of the fabric.
pub(crate) struct Client {
    endpoint: Arc<Endpoint>,
    manifest: ClientManifest,
    download_dir: PathBuf,
}

impl Client {
    pub(crate) fn new(endpoint: Endpoint, manifest: ClientManifest, conf: &Conf) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            manifest,
            download_dir: conf.download_dir.clone(),
        }
    }

    /// Runs the client: announce, barrier, then the downloader and (unless
    /// this is a pure leecher) the uploader side by side until both are
    /// done.
    pub(crate) async fn run(self) -> Result<()> {
        let rank = self.manifest.rank;
        let kind = self.manifest.kind;
        log::info!("Starting client {} as {:?}", rank, kind);

        self.announce()?;

        // the tracker's OK releases every client into the replication
        // phase at once
        let ack = self.endpoint.recv(TRACKER_RANK, Tag::Ack).await?;
        if !wire::is_ok(&ack) {
            return Err(Error::MalformedFrame("startup barrier ack"));
        }
        log::info!("Client {} passed the startup barrier", rank);

        let Self {
            endpoint,
            manifest,
            download_dir,
        } = self;

        let mut tasks = Vec::with_capacity(2);
        if kind != ClientKind::Leecher {
            let uploader = Uploader::new(Arc::clone(&endpoint));
            tasks.push(tokio::spawn(uploader.run()));
        }
        if kind != ClientKind::Seeder {
            let downloader =
                Downloader::new(Arc::clone(&endpoint), manifest, download_dir);
            tasks.push(tokio::spawn(downloader.run()));
        }

        for task in tasks {
            task.await??;
        }
        log::info!("Client {} done", rank);
        Ok(())
    }

    /// Ships the startup inventory: owned count, kind, then every owned
    /// file's name, chunk count and chunk hashes, in the order the
    /// tracker's intake reads them.
    fn announce(&self) -> Result<()> {
        let ep = &self.endpoint;
        ep.send(
            TRACKER_RANK,
            Tag::Hash,
            wire::int_frame(self.manifest.owned.len() as i32),
        )?;
        ep.send(
            TRACKER_RANK,
            Tag::ClientType,
            wire::int_frame(self.manifest.kind as i32),
        )?;
        for file in &self.manifest.owned {
            ep.send(TRACKER_RANK, Tag::Hash, wire::name_frame(&file.name))?;
            ep.send(
                TRACKER_RANK,
                Tag::Hash,
                wire::int_frame(file.chunks.len() as i32),
            )?;
            for hash in &file.chunks {
                ep.send(TRACKER_RANK, Tag::Hash, wire::hash_frame(hash))?;
            }
        }
        Ok(())
    }
}
