use std::fs::File;
use std::iter;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;

use crate::channel::{self, World};
use crate::error::{CommError, CommResult};
use crate::mailbox::{Inbox, Outbox};
use crate::prelude::*;
use crate::receiver;
use crate::wire::{self, Header};

/// Per-rank communication runtime.
///
/// One instance per process, built over the descriptors and environment the
/// launcher installed. All calls happen on the owning thread; the only other
/// threads are the per-peer receivers spawned at init and joined at
/// finalize.
pub struct Runtime {
    pub(crate) world: World,
    detect_deadlocks: bool,
    writers: Vec<Option<File>>,
    inboxes: Vec<Option<Arc<Inbox>>>,
    outboxes: Vec<Option<Outbox>>,
    receivers: Vec<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Claim the launcher-installed channels and spawn one receiver thread
    /// per remote peer. With `detect_deadlocks`, receives additionally
    /// announce themselves to the source rank so mutual blocking between two
    /// ranks is reported instead of hanging.
    pub fn init(detect_deadlocks: bool) -> anyhow::Result<Self> {
        let world = World::from_env()?;
        channel::init()?;

        let mut runtime = Self {
            world,
            detect_deadlocks,
            writers: empty_slots(world.size),
            inboxes: empty_slots(world.size),
            outboxes: empty_slots(world.size),
            receivers: empty_slots(world.size),
        };

        for peer in 0..world.size {
            if peer == world.rank {
                continue;
            }

            let inbox = Arc::new(Inbox::new(peer));
            let handle = receiver::spawn(peer, channel::claim_reader(peer), Arc::clone(&inbox))
                .with_context(|| format!("spawning receiver for rank {peer}"))?;

            runtime.inboxes[peer] = Some(inbox);
            runtime.receivers[peer] = Some(handle);
            runtime.writers[peer] = Some(channel::claim_writer(peer));
            if detect_deadlocks {
                runtime.outboxes[peer] = Some(Outbox::default());
            }
        }

        info!(
            rank = world.rank,
            size = world.size,
            detect_deadlocks,
            "runtime initialized"
        );
        Ok(runtime)
    }

    pub fn world_rank(&self) -> usize {
        self.world.rank
    }

    pub fn world_size(&self) -> usize {
        self.world.size
    }

    /// Send `data` to `dest` under `tag`. Blocks only if the peer's pipe is
    /// full; delivery into the peer's inbox is handled by its receiver.
    pub fn send(&mut self, data: &[u8], dest: usize, tag: i32) -> CommResult {
        self.check_peer(dest)?;
        self.send_frame(dest, tag, data)?;

        if let Some(outbox) = self.outboxes[dest].as_mut() {
            outbox.push(tag, data.len());
        }
        Ok(())
    }

    /// Block until a message of exactly `buf.len()` bytes matching `tag`
    /// arrives from `src`, then copy it into `buf`.
    pub fn recv(&mut self, buf: &mut [u8], src: usize, tag: i32) -> CommResult {
        self.check_peer(src)?;

        if self.detect_deadlocks {
            self.send_probe(src, tag, buf.len())?;
        }
        self.recv_from(buf, src, tag)
    }

    fn check_peer(&self, peer: usize) -> CommResult {
        if peer == self.world.rank {
            return Err(CommError::AttemptedSelfOp);
        }
        if peer >= self.world.size {
            return Err(CommError::NoSuchRank);
        }
        Ok(())
    }

    /// Tell `src` we are now blocked waiting for `(tag, size)`, so its
    /// retrieval logic can tell a pending hand-off from a mutual block.
    fn send_probe(&mut self, src: usize, tag: i32, size: usize) -> CommResult {
        trace!(src, tag, size, "announcing blocked receive");
        let wanted = Header { size, tag }.to_bytes();
        self.send_frame(src, wire::REQUEST_TAG, &wanted)
    }

    /// Frame `payload` onto the writer for `dest`. Used directly by the
    /// collective layer, which does its own bookkeeping.
    pub(crate) fn send_frame(&mut self, dest: usize, tag: i32, payload: &[u8]) -> CommResult {
        let Some(writer) = self.writers[dest].as_mut() else {
            return Err(CommError::NoSuchRank);
        };
        wire::write_frame(writer, tag, payload).map_err(|err| {
            debug!(dest, %err, "channel write failed, treating peer as finished");
            CommError::RemoteFinished
        })
    }

    /// Blocking selective retrieval without validation or probing. Used
    /// directly by the collective layer.
    pub(crate) fn recv_from(&mut self, buf: &mut [u8], src: usize, tag: i32) -> CommResult {
        let Some(inbox) = self.inboxes[src].clone() else {
            return Err(CommError::NoSuchRank);
        };
        inbox.retrieve(tag, buf, self.outboxes[src].as_mut())
    }

    /// Announce shutdown to every peer, then wait for their shutdown to
    /// reach us. Joining the receivers guarantees every descriptor is closed
    /// and every queued buffer is released when this returns.
    pub fn finalize(mut self) -> anyhow::Result<()> {
        for writer in &mut self.writers {
            if let Some(mut writer) = writer.take() {
                // the peer may already be gone; that is not an error here
                let _ = wire::write_frame(&mut writer, wire::CLOSE_TAG, &[]);
            }
        }

        for (peer, slot) in self.receivers.iter_mut().enumerate() {
            if let Some(handle) = slot.take() {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("receiver for rank {peer} panicked"))?;
            }
        }

        info!(rank = self.world.rank, "runtime finalized");
        Ok(())
    }
}

fn empty_slots<T>(n: usize) -> Vec<Option<T>> {
    iter::repeat_with(|| None).take(n).collect()
}
