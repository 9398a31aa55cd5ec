//! The tracker: swarm membership registry and the rank-0 controller.
//!
//! The tracker absorbs every client's startup inventory, answers per-file
//! swarm queries, folds progress reports back into its registry, counts
//! finishers and finally tells every serving client to stop uploading.

use bytes::Bytes;

use crate::{
    error::*,
    manifest::{self, FileManifest},
    transport::Endpoint,
    wire::{self, InformVerb, Tag},
    ChunkHash, ClientKind, FileId, Rank, REPORT_BURST,
};

/// What the tracker knows about one client: its latest reported inventory
/// and its kind.
struct ClientRecord {
    rank: Rank,
    kind: ClientKind,
    files: Vec<FileManifest>,
}

impl ClientRecord {
    fn file(&self, id: FileId) -> Option<&FileManifest> {
        self.files.iter().find(|f| f.id == id)
    }
}

/// The tracker's registry: per-client inventories plus the per-file swarms
/// recomputed from them after every update.
///
/// Swarms are 1-indexed externally; file `i` lives at slot `i - 1`. The
/// table is sized by the maximum file id observed during intake and never
/// grows afterwards.
struct Registry {
    /// Client records in rank order; rank `r` lives at slot `r - 1`.
    clients: Vec<ClientRecord>,
    /// For each file id, the ranks owning at least one chunk of it.
    swarms: Vec<Vec<Rank>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            clients: Vec::new(),
            swarms: Vec::new(),
        }
    }

    fn client(&self, rank: Rank) -> &ClientRecord {
        &self.clients[rank as usize - 1]
    }

    fn client_mut(&mut self, rank: Rank) -> &mut ClientRecord {
        &mut self.clients[rank as usize - 1]
    }

    /// The number of file slots, which equals the largest valid file id.
    fn swarm_size(&self) -> usize {
        self.swarms.len()
    }

    fn is_valid_file(&self, id: FileId) -> bool {
        id >= 1 && id as usize <= self.swarm_size()
    }

    /// The ranks owning at least one chunk of the given file.
    fn swarm(&self, id: FileId) -> &[Rank] {
        &self.swarms[id as usize - 1]
    }

    /// The number of clients that started out with downloads to do.
    fn non_seeder_count(&self) -> usize {
        self.clients
            .iter()
            .filter(|c| c.kind != ClientKind::Seeder)
            .count()
    }

    /// Sizes the swarm table from the inventories and recomputes every
    /// swarm. Cheap enough to rerun after each progress report; the size
    /// only ever grows during intake, since later file ids are validated
    /// against it.
    fn rebuild_swarms(&mut self) {
        let size = self
            .clients
            .iter()
            .flat_map(|c| c.files.iter())
            .map(|f| f.id as usize)
            .max()
            .unwrap_or(0)
            .max(self.swarm_size());

        self.swarms = vec![Vec::new(); size];
        for client in &self.clients {
            for file in &client.files {
                if file.chunks.is_empty() {
                    continue;
                }
                if file.id < 1 || file.id as usize > size {
                    log::warn!(
                        "Client {} owns invalid file id {}",
                        client.rank,
                        file.id
                    );
                    continue;
                }
                self.swarms[file.id as usize - 1].push(client.rank);
            }
        }
    }

    /// Records one freshly reported chunk for (rank, file), allocating the
    /// file slot on first touch and skipping hashes already recorded.
    fn record_chunk(&mut self, rank: Rank, id: FileId, hash: ChunkHash) {
        let record = self.client_mut(rank);
        let file = match record.files.iter_mut().find(|f| f.id == id) {
            Some(file) => file,
            None => {
                record.files.push(FileManifest::allocate(id));
                record.files.last_mut().unwrap()
            }
        };
        if file.contains(&hash) {
            return;
        }
        if let Err(e) = file.push(hash) {
            log::warn!("Dropping reported chunk from client {}: {}", rank, e);
        }
    }

    /// Promotes a finished peer to seeder. Seeders stay seeders and
    /// leechers stay leechers; a leecher never serves, so there is nothing
    /// to promote it into.
    fn promote_finished(&mut self, rank: Rank) {
        let record = self.client_mut(rank);
        if record.kind == ClientKind::Peer {
            record.kind = ClientKind::Seeder;
        }
    }
}

/// At any given time the tracker is in one of the below phases.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    /// Collecting startup inventories, in rank order.
    Intake,
    /// Answering swarm queries and folding in progress reports.
    Serving,
    /// Every non-seeder has finished; the stop broadcast is under way.
    Draining,
    /// The stop broadcast is done and the tracker exits.
    Stopped,
}

/// The rank-0 controller. Single-threaded: every inform exchange is
/// processed to completion before the next one is picked up, which is what
/// keeps the registry consistent without locks.
pub(crate) struct Tracker {
    endpoint: Endpoint,
    registry: Registry,
    phase: Phase,
}

impl Tracker {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            registry: Registry::new(),
            phase: Phase::Intake,
        }
    }

    fn client_count(&self) -> usize {
        self.endpoint.group_size() - 1
    }

    fn set_phase(&mut self, phase: Phase) {
        log::info!("Tracker phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Runs the tracker to completion: intake, the serving loop, then the
    /// stop broadcast.
    pub(crate) async fn run(mut self) -> Result<()> {
        log::info!(
            "Starting tracker for {} clients",
            self.client_count()
        );
        self.intake().await?;
        self.set_phase(Phase::Serving);
        self.serve_swarm_queries().await?;
        self.serve_reports().await?;
        self.set_phase(Phase::Draining);
        self.broadcast_stop()?;
        self.set_phase(Phase::Stopped);
        Ok(())
    }

    /// Receives every client's startup inventory and releases the barrier.
    ///
    /// Intake runs in rank order, so as long as every client starts up this
    /// phase terminates. Per client the receive order is: owned count
    /// (hash tag), kind (client-type tag), then each file's name, chunk
    /// count and chunk hashes (hash tag); the senders mirror this order
    /// exactly.
    async fn intake(&mut self) -> Result<()> {
        for rank in 1..=self.client_count() as Rank {
            let owned_count =
                wire::read_int(&self.endpoint.recv(rank, Tag::Hash).await?)?
                    .max(0) as usize;

            let kind_code = wire::read_int(
                &self.endpoint.recv(rank, Tag::ClientType).await?,
            )?;
            let kind = match ClientKind::from_wire(kind_code) {
                Some(kind) => kind,
                None => {
                    log::warn!(
                        "Client {} sent unknown kind {}, assuming leecher",
                        rank,
                        kind_code
                    );
                    ClientKind::Leecher
                }
            };

            let mut files = Vec::with_capacity(owned_count);
            for _ in 0..owned_count {
                files.push(self.recv_file_record(rank).await?);
            }

            log::info!(
                "Client {} joined as {:?} with {} files",
                rank,
                kind,
                files.len()
            );
            self.registry.clients.push(ClientRecord { rank, kind, files });
        }

        self.registry.rebuild_swarms();
        log::info!(
            "Intake complete, {} file swarms tracked",
            self.registry.swarm_size()
        );

        // the OK broadcast is the startup barrier gating the whole
        // replication phase, so it goes out even when nobody owns anything
        for rank in 1..=self.client_count() as Rank {
            self.endpoint
                .send(rank, Tag::Ack, Bytes::from_static(wire::OK))?;
        }
        Ok(())
    }

    async fn recv_file_record(&self, rank: Rank) -> Result<FileManifest> {
        let name =
            wire::read_name(&self.endpoint.recv(rank, Tag::Hash).await?)?;
        let chunk_count =
            wire::read_int(&self.endpoint.recv(rank, Tag::Hash).await?)?
                .max(0) as usize;
        let mut chunks = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunks.push(wire::read_hash(
                &self.endpoint.recv(rank, Tag::Hash).await?,
            )?);
        }
        let id = match manifest::file_id(&name) {
            Ok(id) => id,
            Err(_) => {
                log::warn!(
                    "Client {} announced file {:?} with no derivable id",
                    rank,
                    name
                );
                0
            }
        };
        Ok(FileManifest { name, id, chunks })
    }

    /// Serves one swarm exchange per downloading client, first come first
    /// served. Seeders never query, so exactly `non_seeder_count` exchanges
    /// arrive.
    async fn serve_swarm_queries(&mut self) -> Result<()> {
        for _ in 0..self.registry.non_seeder_count() {
            let (rank, frame) = self.endpoint.recv_any(Tag::Swarm).await?;
            if let Some(kind) =
                ClientKind::from_wire(wire::read_int(&frame)?)
            {
                self.registry.client_mut(rank).kind = kind;
            }

            let wanted_count =
                wire::read_int(&self.endpoint.recv(rank, Tag::Swarm).await?)?;
            let ids = wire::read_int_list(
                &self.endpoint.recv(rank, Tag::Swarm).await?,
            )?;
            debug_assert_eq!(wanted_count.max(0) as usize, ids.len());

            for id in ids {
                self.send_swarm_answer(rank, id)?;
            }
        }
        Ok(())
    }

    /// Answers one per-file swarm query: the member count, the member
    /// ranks, then each member's chunk manifest. The requester itself is
    /// left out of the answer so it never self-selects.
    fn send_swarm_answer(&self, rank: Rank, id: FileId) -> Result<()> {
        if !self.registry.is_valid_file(id) {
            log::warn!("Client {} queried invalid file id {}", rank, id);
            self.endpoint.send(rank, Tag::Swarm, wire::int_frame(0))?;
            self.endpoint
                .send(rank, Tag::Swarm, wire::int_list_frame(&[]))?;
            return Ok(());
        }

        let entries: Vec<(Rank, Vec<ChunkHash>)> = self
            .registry
            .swarm(id)
            .iter()
            .filter(|&&member| member != rank)
            .filter_map(|&member| {
                self.registry
                    .client(member)
                    .file(id)
                    .map(|f| (member, f.chunks.clone()))
            })
            .collect();

        let members: Vec<Rank> = entries.iter().map(|(r, _)| *r).collect();
        self.endpoint
            .send(rank, Tag::Swarm, wire::int_frame(members.len() as i32))?;
        self.endpoint
            .send(rank, Tag::Swarm, wire::int_list_frame(&members))?;

        for (member, chunks) in entries {
            self.endpoint.send(
                rank,
                Tag::Swarm,
                wire::int_frame(chunks.len() as i32),
            )?;
            self.endpoint
                .send(rank, Tag::Swarm, wire::int_frame(member as i32))?;
            for hash in &chunks {
                self.endpoint.send(rank, Tag::Hash, wire::hash_frame(hash))?;
            }
        }
        Ok(())
    }

    /// The inform event loop: progress reports, peer-list requests and
    /// terminal signals, until every downloading client has finished.
    async fn serve_reports(&mut self) -> Result<()> {
        let total_downloading = self.registry.non_seeder_count();
        let mut finished = 0;

        while finished < total_downloading {
            let (rank, frame) = self.endpoint.recv_any(Tag::Inform).await?;
            match InformVerb::parse(&frame) {
                Some(InformVerb::FinishedDownAll) => {
                    log::info!("Client {} finished all downloads", rank);
                    self.registry.promote_finished(rank);
                    finished += 1;
                }
                Some(verb @ InformVerb::Down10)
                | Some(verb @ InformVerb::DownX) => {
                    log::debug!("Client {} reported {:?}", rank, verb);
                    self.apply_progress_report(rank).await?;
                    self.endpoint.send(
                        rank,
                        Tag::Ack,
                        Bytes::from_static(wire::OK),
                    )?;
                }
                Some(InformVerb::GivePeers) => {
                    // accepted for wire compatibility; the first answer is
                    // the only peer table a client ever gets
                    log::debug!("Client {} asked for fresh peers", rank);
                }
                None => {
                    log::warn!(
                        "Unknown inform verb {:?} from client {}",
                        String::from_utf8_lossy(wire::strip_padding(&frame)),
                        rank
                    );
                }
            }
        }

        log::info!("All downloading clients have finished");
        Ok(())
    }

    /// Absorbs one `DOWN_10`/`DOWN_X` trailer: the file id and the fixed
    /// burst of hash frames. The burst is drained even for an invalid file
    /// id, or the inform stream would fall out of step with the sender.
    async fn apply_progress_report(&mut self, rank: Rank) -> Result<()> {
        let id = wire::read_int(&self.endpoint.recv(rank, Tag::Inform).await?)?
            .max(0) as FileId;
        let valid = self.registry.is_valid_file(id);
        if !valid {
            log::warn!("Client {} reported invalid file id {}", rank, id);
        }

        for _ in 0..REPORT_BURST {
            let frame = self.endpoint.recv(rank, Tag::Inform).await?;
            if !valid {
                continue;
            }
            if let Some(hash) = wire::read_burst(&frame)? {
                self.registry.record_chunk(rank, id, hash);
            }
        }

        if valid {
            self.registry.rebuild_swarms();
        }
        Ok(())
    }

    /// Tells every serving client to stop its uploader. Leechers never
    /// started one; peers were promoted to seeders as they finished.
    fn broadcast_stop(&self) -> Result<()> {
        for rank in 1..=self.client_count() as Rank {
            if self.registry.client(rank).kind != ClientKind::Leecher {
                log::info!("Stopping uploader of client {}", rank);
                self.endpoint.send(
                    rank,
                    Tag::Request,
                    Bytes::from_static(wire::STOP_UPLOADING),
                )?;
            }
        }
        Ok(())
    }
}
