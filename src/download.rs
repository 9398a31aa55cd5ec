//! The downloader: the client task that acquires every wanted file by
//! trading chunk hashes with the peers the tracker points it at.

use std::{path::PathBuf, sync::Arc};

use rand::Rng;

use crate::{
    error::*,
    manifest::{self, ClientManifest, FileManifest},
    transport::Endpoint,
    wire::{self, InformVerb, Tag},
    ChunkHash, ClientKind, FileId, Rank, REPORT_BURST, TRACKER_RANK,
};

/// One peer's standing in a wanted file's swarm: its rank and the chunk
/// manifest it advertised through the tracker.
struct PeerEntry {
    rank: Rank,
    chunks: Vec<ChunkHash>,
}

/// Picks the next peer to visit out of a table of the given size. The
/// default samples uniformly; tests substitute a scripted one, since peer
/// choice decides which of several valid acquisition orders plays out.
type PeerPicker = Box<dyn FnMut(usize) -> usize + Send + Sync>;

fn random_picker() -> PeerPicker {
    Box::new(|count| {
        if count > 1 {
            rand::thread_rng().gen_range(0..count)
        } else {
            0
        }
    })
}

/// The per-client replication engine.
///
/// Wanted files are processed in fixed input order and never revisited.
/// The downloader owns the client's `owned` manifests outright; the
/// uploader never consults them, so nothing here is shared.
pub(crate) struct Downloader {
    endpoint: Arc<Endpoint>,
    rank: Rank,
    kind: ClientKind,
    owned: Vec<FileManifest>,
    wanted: Vec<String>,
    download_dir: PathBuf,
    picker: PeerPicker,
    /// Chunks acquired since the last progress report, across files.
    fresh_chunks: usize,
}

impl Downloader {
    pub(crate) fn new(
        endpoint: Arc<Endpoint>,
        manifest: ClientManifest,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            endpoint,
            rank: manifest.rank,
            kind: manifest.kind,
            owned: manifest.owned,
            wanted: manifest.wanted,
            download_dir,
            picker: random_picker(),
            fresh_chunks: 0,
        }
    }

    #[cfg(test)]
    fn with_picker(mut self, picker: PeerPicker) -> Self {
        self.picker = picker;
        self
    }

    /// Runs the downloader to completion: one swarm exchange, then the
    /// acquisition loop over every wanted file, then the terminal report.
    pub(crate) async fn run(mut self) -> Result<()> {
        log::info!(
            "Starting downloader of client {} ({} wanted files)",
            self.rank,
            self.wanted.len()
        );

        let tables = self.fetch_peer_tables().await?;
        for (idx, table) in tables.iter().enumerate() {
            self.replicate_file(idx, table).await?;
        }

        self.endpoint.send(
            TRACKER_RANK,
            Tag::Inform,
            InformVerb::FinishedDownAll.frame(),
        )?;
        log::info!("Downloader of client {} finished", self.rank);
        Ok(())
    }

    /// The swarm exchange: announces the kind and the wanted file ids,
    /// then receives each file's peer table. This is the only peer lookup
    /// the client ever performs.
    async fn fetch_peer_tables(&self) -> Result<Vec<Vec<PeerEntry>>> {
        let ep = &self.endpoint;
        ep.send(TRACKER_RANK, Tag::Swarm, wire::int_frame(self.kind as i32))?;

        let ids = self
            .wanted
            .iter()
            .map(|name| manifest::file_id(name))
            .collect::<Result<Vec<FileId>>>()?;
        ep.send(TRACKER_RANK, Tag::Swarm, wire::int_frame(ids.len() as i32))?;
        ep.send(TRACKER_RANK, Tag::Swarm, wire::int_list_frame(&ids))?;

        let mut tables = Vec::with_capacity(ids.len());
        for _ in &self.wanted {
            let member_count =
                wire::read_int(&ep.recv(TRACKER_RANK, Tag::Swarm).await?)?
                    .max(0) as usize;
            // the rank list precedes the per-peer records it duplicates
            let _members = wire::read_int_list(
                &ep.recv(TRACKER_RANK, Tag::Swarm).await?,
            )?;

            let mut peers = Vec::with_capacity(member_count);
            for _ in 0..member_count {
                let chunk_count =
                    wire::read_int(&ep.recv(TRACKER_RANK, Tag::Swarm).await?)?
                        .max(0) as usize;
                let rank =
                    wire::read_int(&ep.recv(TRACKER_RANK, Tag::Swarm).await?)?
                        as Rank;
                let mut chunks = Vec::with_capacity(chunk_count);
                for _ in 0..chunk_count {
                    chunks.push(wire::read_hash(
                        &ep.recv(TRACKER_RANK, Tag::Hash).await?,
                    )?);
                }
                peers.push(PeerEntry { rank, chunks });
            }
            tables.push(peers);
        }
        Ok(tables)
    }

    /// Acquires one wanted file: cycle between randomly picked peers,
    /// pulling one chunk per visit, until a visit yields nothing new.
    async fn replicate_file(
        &mut self,
        idx: usize,
        table: &[PeerEntry],
    ) -> Result<()> {
        let name = self.wanted[idx].clone();
        let id = manifest::file_id(&name)?;

        if table.is_empty() {
            log::warn!(
                "Client {}: swarm of {:?} is empty, skipping",
                self.rank,
                name
            );
            return Ok(());
        }

        let file_pos = self.owned_entry(&name, id);

        loop {
            let peer = &table[(self.picker)(table.len()).min(table.len() - 1)];
            let own_count = self.owned[file_pos].chunks.len();

            let mut acquired = false;
            for hash in peer.chunks.iter().skip(own_count) {
                if self.owned[file_pos].contains(hash) {
                    continue;
                }
                self.endpoint.send(
                    peer.rank,
                    Tag::Request,
                    wire::request_frame(hash),
                )?;
                let ack = self.endpoint.recv(peer.rank, Tag::Ack).await?;
                if wire::is_ok(&ack) {
                    log::debug!(
                        "Client {} got chunk {} of {:?} from peer {}",
                        self.rank,
                        crate::fmt_hash(hash),
                        name,
                        peer.rank
                    );
                    self.owned[file_pos].push(*hash)?;
                    self.fresh_chunks += 1;
                    acquired = true;
                    // move to another peer to balance the load
                    break;
                }
            }

            if !acquired {
                // this peer offered nothing new: the file is as complete
                // as the swarm can make it
                if self.fresh_chunks > 0 {
                    self.send_report(InformVerb::DownX, file_pos)?;
                    self.fresh_chunks = 0;
                }
                let path = manifest::write_download(
                    &self.download_dir,
                    self.rank,
                    &self.owned[file_pos],
                )?;
                log::info!(
                    "Client {} completed {:?} ({} chunks) -> {}",
                    self.rank,
                    name,
                    self.owned[file_pos].chunks.len(),
                    path.display()
                );
                return Ok(());
            }

            if self.fresh_chunks == REPORT_BURST {
                self.send_report(InformVerb::Down10, file_pos)?;
                self.fresh_chunks = 0;
                self.endpoint.send(
                    TRACKER_RANK,
                    Tag::Inform,
                    InformVerb::GivePeers.frame(),
                )?;
                // the tracker's receipt for the report; the peer table is
                // not refreshed
                let ack =
                    self.endpoint.recv(TRACKER_RANK, Tag::Ack).await?;
                if wire::is_ok(&ack) {
                    log::debug!(
                        "Client {} progress report acknowledged",
                        self.rank
                    );
                }
            }
        }
    }

    /// Returns the position of the owned entry for the given file,
    /// creating it on first touch.
    fn owned_entry(&mut self, name: &str, id: FileId) -> usize {
        match self.owned.iter().position(|f| f.id == id) {
            Some(pos) => pos,
            None => {
                self.owned.push(FileManifest {
                    name: name.to_string(),
                    id,
                    chunks: Vec::new(),
                });
                self.owned.len() - 1
            }
        }
    }

    /// Sends a `DOWN_10`/`DOWN_X` report: the verb, the file id and the
    /// fixed-length burst carrying the file's latest hashes, zero-padded
    /// when fewer than [`REPORT_BURST`] exist.
    fn send_report(&self, verb: InformVerb, file_pos: usize) -> Result<()> {
        let file = &self.owned[file_pos];
        let ep = &self.endpoint;
        ep.send(TRACKER_RANK, Tag::Inform, verb.frame())?;
        ep.send(TRACKER_RANK, Tag::Inform, wire::int_frame(file.id as i32))?;

        let start = file.chunks.len().saturating_sub(REPORT_BURST);
        let tail = &file.chunks[start..];
        for hash in tail {
            ep.send(TRACKER_RANK, Tag::Inform, wire::burst_frame(hash))?;
        }
        for _ in tail.len()..REPORT_BURST {
            ep.send(TRACKER_RANK, Tag::Inform, wire::empty_burst_frame())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{transport, upload::Uploader, HASH_LEN};

    fn hash(byte: u8) -> ChunkHash {
        [byte; HASH_LEN]
    }

    fn leech_manifest(rank: Rank, wanted: &[&str]) -> ClientManifest {
        ClientManifest {
            rank,
            owned: Vec::new(),
            wanted: wanted.iter().map(|s| s.to_string()).collect(),
            kind: ClientKind::Leecher,
        }
    }

    /// Answers one per-file swarm query the way the tracker would.
    fn send_swarm_answer(
        tracker: &Endpoint,
        to: Rank,
        entries: &[(Rank, Vec<ChunkHash>)],
    ) {
        let members: Vec<Rank> = entries.iter().map(|(r, _)| *r).collect();
        tracker
            .send(to, Tag::Swarm, wire::int_frame(members.len() as i32))
            .unwrap();
        tracker
            .send(to, Tag::Swarm, wire::int_list_frame(&members))
            .unwrap();
        for (rank, chunks) in entries {
            tracker
                .send(to, Tag::Swarm, wire::int_frame(chunks.len() as i32))
                .unwrap();
            tracker
                .send(to, Tag::Swarm, wire::int_frame(*rank as i32))
                .unwrap();
            for hash in chunks {
                tracker.send(to, Tag::Hash, wire::hash_frame(hash)).unwrap();
            }
        }
    }

    async fn expect_swarm_query(
        tracker: &Endpoint,
        from: Rank,
        ids: &[u32],
    ) {
        let (rank, frame) = tracker.recv_any(Tag::Swarm).await.unwrap();
        assert_eq!(rank, from);
        assert!(ClientKind::from_wire(wire::read_int(&frame).unwrap()).is_some());
        let count =
            wire::read_int(&tracker.recv(from, Tag::Swarm).await.unwrap())
                .unwrap();
        assert_eq!(count as usize, ids.len());
        let sent_ids = wire::read_int_list(
            &tracker.recv(from, Tag::Swarm).await.unwrap(),
        )
        .unwrap();
        assert_eq!(sent_ids, ids);
    }

    async fn expect_inform_verb(tracker: &Endpoint, from: Rank) -> InformVerb {
        let (rank, frame) = tracker.recv_any(Tag::Inform).await.unwrap();
        assert_eq!(rank, from);
        InformVerb::parse(&frame).expect("inform verb")
    }

    /// A downloader pulling one file from two peers with unequal manifests
    /// ends up with the union of their chunks, in per-peer order, and
    /// reports the acquisition in one terminal burst.
    #[tokio::test]
    async fn test_download_merges_two_peer_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = transport::launch(4);
        let leecher = Arc::new(group.pop().unwrap());
        let peer2 = Arc::new(group.pop().unwrap());
        let peer1 = Arc::new(group.pop().unwrap());
        let tracker = group.pop().unwrap();

        let upload1 = tokio::spawn(Uploader::new(Arc::clone(&peer1)).run());
        let upload2 = tokio::spawn(Uploader::new(Arc::clone(&peer2)).run());

        // drain the short peer first, then the long one, then confirm the
        // short one has nothing left
        let mut script = vec![0usize, 0, 0, 1, 1, 0].into_iter();
        let downloader = Downloader::new(
            Arc::clone(&leecher),
            leech_manifest(3, &["file1"]),
            dir.path().to_path_buf(),
        )
        .with_picker(Box::new(move |_| script.next().unwrap_or(0)));
        let handle = tokio::spawn(downloader.run());

        expect_swarm_query(&tracker, 3, &[1]).await;
        send_swarm_answer(
            &tracker,
            3,
            &[
                (1, vec![hash(b'a'), hash(b'b'), hash(b'c')]),
                (
                    2,
                    vec![
                        hash(b'a'),
                        hash(b'b'),
                        hash(b'c'),
                        hash(b'd'),
                        hash(b'e'),
                    ],
                ),
            ],
        );

        assert_eq!(expect_inform_verb(&tracker, 3).await, InformVerb::DownX);
        let id =
            wire::read_int(&tracker.recv(3, Tag::Inform).await.unwrap())
                .unwrap();
        assert_eq!(id, 1);
        let mut reported = Vec::new();
        for _ in 0..REPORT_BURST {
            let frame = tracker.recv(3, Tag::Inform).await.unwrap();
            if let Some(hash) = wire::read_burst(&frame).unwrap() {
                reported.push(hash);
            }
        }
        assert_eq!(
            reported,
            vec![hash(b'a'), hash(b'b'), hash(b'c'), hash(b'd'), hash(b'e')]
        );

        assert_eq!(
            expect_inform_verb(&tracker, 3).await,
            InformVerb::FinishedDownAll
        );
        handle.await.unwrap().unwrap();

        for rank in [1, 2] {
            tracker
                .send(
                    rank,
                    Tag::Request,
                    bytes::Bytes::from_static(wire::STOP_UPLOADING),
                )
                .unwrap();
        }
        upload1.await.unwrap().unwrap();
        upload2.await.unwrap().unwrap();

        let written =
            fs::read_to_string(dir.path().join("client3_file1")).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 5);
        for (line, byte) in lines.iter().zip([b'a', b'b', b'c', b'd', b'e']) {
            assert_eq!(line.as_bytes(), &[byte; HASH_LEN]);
        }
    }

    /// A peer offering only known chunks completes the file without a
    /// single request and without a terminal report; an empty swarm is
    /// skipped outright.
    #[tokio::test]
    async fn test_nothing_new_and_empty_swarm() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = transport::launch(3);
        let peer = Arc::new(group.pop().unwrap());
        let client = Arc::new(group.pop().unwrap());
        let tracker = group.pop().unwrap();
        drop(peer); // never contacted: no request may reach it

        let mut owned = FileManifest::allocate(1);
        owned.push(hash(b'a')).unwrap();
        owned.push(hash(b'b')).unwrap();
        let manifest = ClientManifest {
            rank: 1,
            owned: vec![owned],
            wanted: vec!["file1".into(), "file2".into()],
            kind: ClientKind::Peer,
        };
        let downloader = Downloader::new(
            Arc::clone(&client),
            manifest,
            dir.path().to_path_buf(),
        );
        let handle = tokio::spawn(downloader.run());

        expect_swarm_query(&tracker, 1, &[1, 2]).await;
        // file1: one peer advertising exactly what the client holds
        send_swarm_answer(
            &tracker,
            1,
            &[(2, vec![hash(b'a'), hash(b'b')])],
        );
        // file2: nobody has it
        send_swarm_answer(&tracker, 1, &[]);

        // no DOWN_X: nothing was downloaded since the last report
        assert_eq!(
            expect_inform_verb(&tracker, 1).await,
            InformVerb::FinishedDownAll
        );
        handle.await.unwrap().unwrap();

        let written =
            fs::read_to_string(dir.path().join("client1_file1")).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(!dir.path().join("client1_file2").exists());
    }

    /// Crossing ten fresh chunks triggers the DOWN_10 handshake: report
    /// burst, peer-list request, then the blocking receipt.
    #[tokio::test]
    async fn test_down10_report_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = transport::launch(3);
        let leecher = Arc::new(group.pop().unwrap());
        let seeder = Arc::new(group.pop().unwrap());
        let tracker = group.pop().unwrap();

        let upload = tokio::spawn(Uploader::new(Arc::clone(&seeder)).run());

        let chunks: Vec<ChunkHash> = (0..12u8).map(|i| hash(b'a' + i)).collect();
        let downloader = Downloader::new(
            Arc::clone(&leecher),
            leech_manifest(2, &["file1"]),
            dir.path().to_path_buf(),
        );
        let handle = tokio::spawn(downloader.run());

        expect_swarm_query(&tracker, 2, &[1]).await;
        send_swarm_answer(&tracker, 2, &[(1, chunks.clone())]);

        // after ten chunks: DOWN_10, the first ten hashes, GIVE_PEERS
        assert_eq!(expect_inform_verb(&tracker, 2).await, InformVerb::Down10);
        let id =
            wire::read_int(&tracker.recv(2, Tag::Inform).await.unwrap())
                .unwrap();
        assert_eq!(id, 1);
        for expected in &chunks[..REPORT_BURST] {
            let frame = tracker.recv(2, Tag::Inform).await.unwrap();
            assert_eq!(wire::read_burst(&frame).unwrap(), Some(*expected));
        }
        assert_eq!(
            expect_inform_verb(&tracker, 2).await,
            InformVerb::GivePeers
        );
        // the downloader is now blocked on the receipt
        tracker
            .send(2, Tag::Ack, bytes::Bytes::from_static(wire::OK))
            .unwrap();

        // the remaining two chunks arrive in the terminal report
        assert_eq!(expect_inform_verb(&tracker, 2).await, InformVerb::DownX);
        tracker.recv(2, Tag::Inform).await.unwrap();
        for _ in 0..REPORT_BURST {
            tracker.recv(2, Tag::Inform).await.unwrap();
        }

        assert_eq!(
            expect_inform_verb(&tracker, 2).await,
            InformVerb::FinishedDownAll
        );
        handle.await.unwrap().unwrap();

        tracker
            .send(
                1,
                Tag::Request,
                bytes::Bytes::from_static(wire::STOP_UPLOADING),
            )
            .unwrap();
        upload.await.unwrap().unwrap();

        let written =
            fs::read_to_string(dir.path().join("client2_file1")).unwrap();
        assert_eq!(written.lines().count(), 12);
    }
}
