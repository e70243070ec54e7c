use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command};

use anyhow::Context;
use clap::Parser;
use nix::unistd::pipe;
use tracing::{warn, Level};

use pipemesh::channel::{self, MAX_GROUP, WRITER_BASE};

// pipe ends are parked above the well-known region until each child moves
// its own ends down into it
const STAGING_BASE: RawFd = WRITER_BASE + MAX_GROUP as RawFd;

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
/// launch a group of ranks wired to each other with a full pipe mesh.
struct Cli {
    /// number of ranks to launch.
    size: usize,

    /// program executed by every rank.
    program: PathBuf,

    /// arguments passed through to every rank.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

/// All pipes of the directed mesh, indexed by (source, destination).
struct Mesh {
    size: usize,
    links: Vec<Option<Link>>,
}

struct Link {
    read: OwnedFd,
    write: OwnedFd,
}

impl Mesh {
    fn open(size: usize) -> anyhow::Result<Self> {
        let mut links = Vec::with_capacity(size * size);
        for source in 0..size {
            for destination in 0..size {
                if source == destination {
                    links.push(None);
                    continue;
                }
                let (read, write) = pipe()
                    .with_context(|| format!("opening pipe {source} -> {destination}"))?;
                links.push(Some(Link {
                    read: stage(read)?,
                    write: stage(write)?,
                }));
            }
        }
        Ok(Self { size, links })
    }

    /// The dup2 moves rank `rank` must perform after fork: its read end from
    /// every peer to `READER_BASE + peer`, its write end towards every peer
    /// to `WRITER_BASE + peer`.
    fn dup_plan(&self, rank: usize) -> Vec<(RawFd, RawFd)> {
        let mut plan = Vec::new();
        for peer in 0..self.size {
            if peer == rank {
                continue;
            }
            if let Some(link) = &self.links[peer * self.size + rank] {
                plan.push((link.read.as_raw_fd(), channel::reader_fd(peer)));
            }
            if let Some(link) = &self.links[rank * self.size + peer] {
                plan.push((link.write.as_raw_fd(), channel::writer_fd(peer)));
            }
        }
        plan
    }

    /// Every staged descriptor; children close all of them once their own
    /// ends sit at the well-known numbers.
    fn staged_fds(&self) -> Vec<RawFd> {
        self.links
            .iter()
            .flatten()
            .flat_map(|link| [link.read.as_raw_fd(), link.write.as_raw_fd()])
            .collect()
    }
}

/// Move a pipe end above the well-known descriptor region, so installing
/// ends into that region can never clobber one that is still unconsumed.
fn stage(fd: OwnedFd) -> anyhow::Result<OwnedFd> {
    let staged = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD, STAGING_BASE) };
    anyhow::ensure!(
        staged >= 0,
        "staging pipe end: {}",
        std::io::Error::last_os_error()
    );
    // SAFETY: freshly returned by F_DUPFD and owned by nothing else; the
    // original end is released when `fd` drops here.
    Ok(unsafe { OwnedFd::from_raw_fd(staged) })
}

fn spawn_rank(cli: &Cli, mesh: &Mesh, rank: usize) -> anyhow::Result<Child> {
    let plan = mesh.dup_plan(rank);
    let staged = mesh.staged_fds();

    let mut command = Command::new(&cli.program);
    command
        .args(&cli.args)
        .env(channel::ENV_RANK, rank.to_string())
        .env(channel::ENV_SIZE, cli.size.to_string());

    // SAFETY: the closure runs between fork and exec and only calls
    // async-signal-safe functions (dup2, close).
    unsafe {
        command.pre_exec(move || {
            for &(from, to) in &plan {
                if libc::dup2(from, to) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            for &fd in &staged {
                libc::close(fd);
            }
            Ok(())
        });
    }

    command
        .spawn()
        .with_context(|| format!("spawning rank {rank}"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(
        (1..=MAX_GROUP).contains(&cli.size),
        "group size {} outside 1..={MAX_GROUP}",
        cli.size
    );

    let mesh = Mesh::open(cli.size)?;
    let mut children = Vec::with_capacity(cli.size);
    for rank in 0..cli.size {
        children.push((rank, spawn_rank(&cli, &mesh, rank)?));
    }

    // children hold their own ends now; keeping ours open would mask peer
    // shutdown from every reader
    drop(mesh);

    let mut failed = 0;
    for (rank, mut child) in children {
        let status = child
            .wait()
            .with_context(|| format!("waiting for rank {rank}"))?;
        if !status.success() {
            warn!(rank, %status, "rank exited with failure");
            failed += 1;
        }
    }
    anyhow::ensure!(failed == 0, "{failed} of {} ranks failed", cli.size);
    Ok(())
}
