//! The fabric assembly: builds the process group, spawns the tracker and
//! every client, and waits for all of them to run to completion.

use std::fs;

use crate::{
    client::Client, conf::Conf, error::*, manifest::ClientManifest,
    tracker::Tracker, transport, Rank,
};

/// Runs a whole replication fabric to completion.
///
/// Every manifest is loaded before anything is spawned: a malformed input
/// is a configuration error and aborts the group before the first message
/// moves. The call returns once the tracker and every client have exited.
pub async fn run(conf: Conf) -> Result<()> {
    log::info!(
        "Launching fabric: 1 tracker + {} clients",
        conf.client_count
    );
    fs::create_dir_all(&conf.download_dir)?;

    let mut endpoints = transport::launch(conf.group_size()).into_iter();
    let tracker = Tracker::new(endpoints.next().expect("group is never empty"));

    let mut clients = Vec::with_capacity(conf.client_count);
    for (rank, endpoint) in (1..).zip(endpoints) {
        let manifest = ClientManifest::load(&conf.input_dir, rank as Rank)?;
        clients.push(Client::new(endpoint, manifest, &conf));
    }

    let mut tasks = Vec::with_capacity(conf.group_size());
    tasks.push(tokio::spawn(tracker.run()));
    for client in clients {
        tasks.push(tokio::spawn(client.run()));
    }

    for result in futures::future::try_join_all(tasks).await? {
        result?;
    }
    log::info!("Fabric complete");
    Ok(())
}
