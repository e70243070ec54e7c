//! The contract between the launcher and the runtime: where the pipe ends
//! live in the descriptor table and how the group identity reaches us.

use std::fs::File;
use std::os::fd::{FromRawFd, RawFd};

use anyhow::Context;
use nix::sys::signal::{self, SigHandler, Signal};

/// Upper bound on the number of ranks a launcher may create.
pub const MAX_GROUP: usize = 16;

/// The launcher installs the pipe read end from peer R at `READER_BASE + R`.
pub const READER_BASE: RawFd = 64;
/// The launcher installs the pipe write end towards peer R at `WRITER_BASE + R`.
pub const WRITER_BASE: RawFd = READER_BASE + MAX_GROUP as RawFd;

pub const ENV_RANK: &str = "PIPEMESH_RANK";
pub const ENV_SIZE: &str = "PIPEMESH_SIZE";

pub fn reader_fd(peer: usize) -> RawFd {
    READER_BASE + peer as RawFd
}

pub fn writer_fd(peer: usize) -> RawFd {
    WRITER_BASE + peer as RawFd
}

/// Identity of this process within the launched group.
#[derive(Debug, Clone, Copy)]
pub struct World {
    pub rank: usize,
    pub size: usize,
}

impl World {
    pub fn from_env() -> anyhow::Result<Self> {
        let rank = read_env(ENV_RANK)?;
        let size = read_env(ENV_SIZE)?;

        anyhow::ensure!(
            (1..=MAX_GROUP).contains(&size),
            "group size {size} outside 1..={MAX_GROUP}"
        );
        anyhow::ensure!(rank < size, "rank {rank} outside a group of {size}");

        Ok(Self { rank, size })
    }
}

fn read_env(name: &str) -> anyhow::Result<usize> {
    let value =
        std::env::var(name).with_context(|| format!("{name} not exported by the launcher"))?;
    value
        .parse()
        .with_context(|| format!("{name} is not a number: {value:?}"))
}

/// One-time channel setup for a rank. A write to a peer that already
/// finalized must come back as an error, not as a fatal signal.
pub(crate) fn init() -> anyhow::Result<()> {
    // SAFETY: replacing the disposition with SigIgn does not race any
    // handler; the runtime is initialized before receiver threads exist.
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .context("ignoring SIGPIPE")?;
    Ok(())
}

/// Take ownership of the launcher-installed read end for `peer`.
///
/// SAFETY contract with the launcher: the descriptor is open, reserved for
/// this library, and claimed exactly once per process.
pub(crate) fn claim_reader(peer: usize) -> File {
    unsafe { File::from_raw_fd(reader_fd(peer)) }
}

/// Take ownership of the launcher-installed write end towards `peer`.
pub(crate) fn claim_writer(peer: usize) -> File {
    unsafe { File::from_raw_fd(writer_fd(peer)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_regions_do_not_overlap() {
        assert!(READER_BASE + MAX_GROUP as RawFd <= WRITER_BASE);
        assert_eq!(reader_fd(3), READER_BASE + 3);
        assert_eq!(writer_fd(3), WRITER_BASE + 3);
    }

    #[test]
    fn world_is_read_from_the_environment() {
        std::env::set_var(ENV_RANK, "2");
        std::env::set_var(ENV_SIZE, "4");
        let world = World::from_env().unwrap();
        assert_eq!(world.rank, 2);
        assert_eq!(world.size, 4);

        std::env::set_var(ENV_RANK, "4");
        assert!(World::from_env().is_err());

        std::env::set_var(ENV_RANK, "0");
        std::env::set_var(ENV_SIZE, "17");
        assert!(World::from_env().is_err());
    }
}
