//! The process-group message transport.
//!
//! The fabric assumes a point-to-point, tagged, FIFO, reliable transport
//! with blocking send and blocking receive, including a wildcard-source
//! receive. This module provides that primitive for a group of tasks inside
//! one process: [`launch`] builds the whole group up front (membership is
//! fixed, exactly like a multi-process launcher would fix it) and hands one
//! [`Endpoint`] per rank to the caller.
//!
//! Delivery is FIFO per (sender, receiver, tag); no ordering holds across
//! tags. Sends never block (the queues are unbounded, standing in for the
//! transport's eager buffering); receives block until a matching frame
//! arrives. An endpoint supports concurrent receives on independent tags
//! from different tasks, which is what lets a client run its downloader and
//! uploader side by side over a single endpoint.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Mutex,
};

use crate::{
    error::*,
    wire::{Tag, TAG_COUNT},
    Rank,
};

/// One message in flight: the payload plus the rank that sent it.
struct Frame {
    src: Rank,
    payload: Bytes,
}

/// A per-tag receive queue. Frames from sources other than the one a
/// receive is waiting on are parked in the stash; scanning the stash in
/// order keeps per-source FIFO intact.
struct Inbox {
    queue: UnboundedReceiver<Frame>,
    stash: VecDeque<Frame>,
}

/// One rank's connection to the process group.
pub struct Endpoint {
    rank: Rank,
    /// Send handles, indexed by destination rank and tag.
    mailboxes: Vec<Vec<UnboundedSender<Frame>>>,
    /// Receive queues, one per tag, each independently lockable.
    inboxes: Vec<Mutex<Inbox>>,
}

/// Creates a process group of the given size and returns the endpoints in
/// rank order. The group's membership is fixed for its whole lifetime.
pub fn launch(size: usize) -> Vec<Endpoint> {
    let mut mailboxes = Vec::with_capacity(size);
    let mut queues = Vec::with_capacity(size);
    for _ in 0..size {
        let mut senders = Vec::with_capacity(TAG_COUNT);
        let mut receivers = Vec::with_capacity(TAG_COUNT);
        for _ in 0..TAG_COUNT {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }
        mailboxes.push(senders);
        queues.push(receivers);
    }

    queues
        .into_iter()
        .enumerate()
        .map(|(rank, receivers)| Endpoint {
            rank: rank as Rank,
            mailboxes: mailboxes.clone(),
            inboxes: receivers
                .into_iter()
                .map(|queue| {
                    Mutex::new(Inbox {
                        queue,
                        stash: VecDeque::new(),
                    })
                })
                .collect(),
        })
        .collect()
}

impl Endpoint {
    /// The rank this endpoint belongs to.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// The size of the whole group, tracker included.
    pub fn group_size(&self) -> usize {
        self.mailboxes.len()
    }

    /// Sends a payload to the given rank on the given tag.
    pub fn send(&self, to: Rank, tag: Tag, payload: Bytes) -> Result<()> {
        let senders = self
            .mailboxes
            .get(to as usize)
            .ok_or(Error::InvalidRank(to))?;
        senders[tag as usize]
            .send(Frame {
                src: self.rank,
                payload,
            })
            .map_err(|_| Error::ChannelClosed(to))
    }

    /// Receives the next frame on the given tag from any source. Blocks
    /// until one arrives.
    pub async fn recv_any(&self, tag: Tag) -> Result<(Rank, Bytes)> {
        let mut inbox = self.inboxes[tag as usize].lock().await;
        if let Some(frame) = inbox.stash.pop_front() {
            return Ok((frame.src, frame.payload));
        }
        let frame = inbox
            .queue
            .recv()
            .await
            .ok_or(Error::ChannelClosed(self.rank))?;
        Ok((frame.src, frame.payload))
    }

    /// Receives the next frame on the given tag from the given source,
    /// parking frames from other sources until their turn comes.
    pub async fn recv(&self, from: Rank, tag: Tag) -> Result<Bytes> {
        let mut inbox = self.inboxes[tag as usize].lock().await;
        if let Some(pos) = inbox.stash.iter().position(|f| f.src == from) {
            let frame = inbox.stash.remove(pos).unwrap();
            return Ok(frame.payload);
        }
        loop {
            let frame = inbox
                .queue
                .recv()
                .await
                .ok_or(Error::ChannelClosed(self.rank))?;
            if frame.src == from {
                return Ok(frame.payload);
            }
            inbox.stash.push_back(frame);
        }
    }
}
