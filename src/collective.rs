use crate::error::{self, CommError, CommResult};
use crate::prelude::*;
use crate::runtime::Runtime;
use crate::topology::{self, Neighbours};
use crate::wire;

/// Byte-wise reduction operators; every lane is an independent `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Max,
    Min,
    /// Wrapping addition.
    Sum,
    /// Wrapping multiplication.
    Prod,
}

impl ReduceOp {
    fn fold(self, acc: &mut [u8], other: &[u8]) {
        for (lane, contribution) in acc.iter_mut().zip(other) {
            *lane = match self {
                ReduceOp::Max => (*lane).max(*contribution),
                ReduceOp::Min => (*lane).min(*contribution),
                ReduceOp::Sum => lane.wrapping_add(*contribution),
                ReduceOp::Prod => lane.wrapping_mul(*contribution),
            };
        }
    }
}

// every collective buffer carries its payload plus one trailing status code
const STATUS_SIZE: usize = std::mem::size_of::<i32>();

fn write_status(buffer: &mut [u8], outcome: CommResult) {
    let tail = buffer.len() - STATUS_SIZE;
    buffer[tail..].copy_from_slice(&error::status_code(outcome).to_be_bytes());
}

fn read_status(buffer: &[u8]) -> CommResult {
    let tail = buffer.len() - STATUS_SIZE;
    let mut code = [0u8; STATUS_SIZE];
    code.copy_from_slice(&buffer[tail..]);
    error::status_from_code(i32::from_be_bytes(code))
}

// collectives always hang their tree off the same rank unless the caller
// names a root
const DEFAULT_ROOT: usize = 0;

impl Runtime {
    /// Block until every rank has entered the barrier.
    #[instrument(level = "debug", skip(self), fields(rank = self.world.rank))]
    pub fn barrier(&mut self) -> CommResult {
        let links = self.links(DEFAULT_ROOT);
        let status = self.collect(&links, None, None, ReduceOp::Max);
        self.distribute(&links, None, status)
    }

    /// Replicate `data` from `root` to every rank. All ranks must pass
    /// buffers of the same length; only the root's content is read.
    #[instrument(level = "debug", skip(self, data), fields(rank = self.world.rank, count = data.len()))]
    pub fn bcast(&mut self, data: &mut [u8], root: usize) -> CommResult {
        self.check_root(root)?;
        let links = self.links(root);
        let status = self.collect(&links, None, None, ReduceOp::Max);
        self.distribute(&links, Some(data), status)
    }

    /// Fold every rank's `contribution` with `op`. The aggregate lands in
    /// `result` at the root (which must be `contribution.len()` bytes);
    /// other ranks' `result` buffers are left untouched.
    #[instrument(level = "debug", skip(self, contribution, result), fields(rank = self.world.rank, count = contribution.len()))]
    pub fn reduce(
        &mut self,
        contribution: &[u8],
        result: Option<&mut [u8]>,
        op: ReduceOp,
        root: usize,
    ) -> CommResult {
        self.check_root(root)?;
        let links = self.links(root);

        let sink = if self.world.rank == root { result } else { None };
        let status = self.collect(&links, Some(contribution), sink, op);
        self.distribute(&links, None, status)
    }

    fn links(&self, root: usize) -> Neighbours {
        topology::neighbours(self.world.rank, root, self.world.size)
    }

    fn check_root(&self, root: usize) -> CommResult {
        if root >= self.world.size {
            return Err(CommError::NoSuchRank);
        }
        Ok(())
    }

    /// Upward phase: fold the subtree below this rank into one buffer and
    /// pass it towards the root. Child failures travel as data: each buffer
    /// ends with the sender's folded status, and a child payload only enters
    /// the fold when both the transfer and the child's own status are clean.
    fn collect(
        &mut self,
        links: &Neighbours,
        contribution: Option<&[u8]>,
        sink: Option<&mut [u8]>,
        op: ReduceOp,
    ) -> CommResult {
        let count = contribution.map_or(0, <[u8]>::len);

        let mut data = vec![0u8; count + STATUS_SIZE];
        if let Some(contribution) = contribution {
            data[..count].copy_from_slice(contribution);
        }
        let mut status: CommResult = Ok(());

        let mut child_data = vec![0u8; count + STATUS_SIZE];
        for &child in &links.children {
            let received = self.recv_from(&mut child_data, child, wire::GROUP_TAG);
            status = error::merge(status, received);
            if received.is_err() {
                continue;
            }

            let child_status = read_status(&child_data);
            status = error::merge(status, child_status);
            if child_status.is_ok() {
                op.fold(&mut data[..count], &child_data[..count]);
            }
        }

        if let Some(sink) = sink {
            sink.copy_from_slice(&data[..count]);
        }

        if let Some(parent) = links.parent {
            write_status(&mut data, status);
            let sent = self.send_frame(parent, wire::GROUP_TAG, &data);
            status = error::merge(status, sent);
        }

        status
    }

    /// Downward phase: take the root's buffer from the parent, fan it out to
    /// the children, and deliver it to `out`. The status travels with the
    /// buffer, so whatever code the root settled on reaches every leaf.
    fn distribute(
        &mut self,
        links: &Neighbours,
        mut out: Option<&mut [u8]>,
        initial: CommResult,
    ) -> CommResult {
        let count = out.as_deref().map_or(0, <[u8]>::len);

        let mut data = vec![0u8; count + STATUS_SIZE];
        let mut status = initial;

        match links.parent {
            None => {
                if let Some(out) = out.as_deref() {
                    data[..count].copy_from_slice(out);
                }
            }
            Some(parent) => {
                let received = self.recv_from(&mut data, parent, wire::GROUP_TAG);
                status = error::merge(status, received);
                if received.is_ok() {
                    status = error::merge(status, read_status(&data));
                }
            }
        }

        for &child in &links.children {
            write_status(&mut data, status);
            let sent = self.send_frame(child, wire::GROUP_TAG, &data);
            status = error::merge(status, sent);
        }

        if links.parent.is_some() && status.is_ok() {
            if let Some(out) = out.as_deref_mut() {
                out.copy_from_slice(&data[..count]);
            }
        }

        status
    }
}
