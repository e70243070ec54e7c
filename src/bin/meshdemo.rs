use std::thread;
use std::time::Duration;

use anyhow::ensure;
use clap::{Parser, ValueEnum};
use tracing::Level;

use pipemesh::{CommError, ReduceOp, Runtime, ANY_TAG};

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
/// run one rank of an end-to-end exercise; start the group with meshrun.
struct Cli {
    #[arg(value_enum)]
    scenario: Scenario,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    Ping,
    BigPing,
    Validation,
    LateReceiver,
    Deadlock,
    DeadlockAvoided,
    Broadcast,
    ReduceSum,
    Barrier,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_target(false)
        .init();

    match Cli::parse().scenario {
        Scenario::Ping => ping(),
        Scenario::BigPing => big_ping(),
        Scenario::Validation => validation(),
        Scenario::LateReceiver => late_receiver(),
        Scenario::Deadlock => deadlock(),
        Scenario::DeadlockAvoided => deadlock_avoided(),
        Scenario::Broadcast => broadcast(),
        Scenario::ReduceSum => reduce_sum(),
        Scenario::Barrier => barrier(),
    }
}

fn ping() -> anyhow::Result<()> {
    let mut rt = Runtime::init(false)?;
    ensure!(rt.world_size() == 2, "ping needs exactly 2 ranks");

    if rt.world_rank() == 0 {
        rt.send(&[0x41], 1, 7)?;
        rt.send(&[], 1, 9)?;
        rt.send(&[0x07], 1, 5)?;
    } else {
        let mut buf = [0u8; 1];
        rt.recv(&mut buf, 0, 7)?;
        ensure!(buf == [0x41], "payload mismatch: {buf:?}");

        rt.recv(&mut [], 0, 9)?;

        let mut any = [0u8; 1];
        rt.recv(&mut any, 0, ANY_TAG)?;
        ensure!(any == [0x07], "wildcard payload mismatch: {any:?}");
    }
    rt.finalize()
}

fn big_ping() -> anyhow::Result<()> {
    let mut rt = Runtime::init(false)?;
    ensure!(rt.world_size() == 2, "big-ping needs exactly 2 ranks");

    let payload: Vec<u8> = (0..2048).map(|i| (i % 251) as u8).collect();
    if rt.world_rank() == 0 {
        rt.send(&payload, 1, 3)?;
    } else {
        let mut buf = vec![0u8; payload.len()];
        rt.recv(&mut buf, 0, 3)?;
        ensure!(buf == payload, "multi-packet payload arrived corrupted");
    }
    rt.finalize()
}

fn validation() -> anyhow::Result<()> {
    let mut rt = Runtime::init(false)?;
    let me = rt.world_rank();
    let size = rt.world_size();
    let mut buf = [0u8; 1];

    ensure!(rt.send(&buf, me, 1) == Err(CommError::AttemptedSelfOp));
    ensure!(rt.send(&buf, size, 1) == Err(CommError::NoSuchRank));
    ensure!(rt.recv(&mut buf, me, 1) == Err(CommError::AttemptedSelfOp));
    ensure!(rt.recv(&mut buf, size + 3, 1) == Err(CommError::NoSuchRank));

    rt.finalize()
}

fn late_receiver() -> anyhow::Result<()> {
    let mut rt = Runtime::init(false)?;
    ensure!(rt.world_size() == 2, "late-receiver needs exactly 2 ranks");

    if rt.world_rank() == 0 {
        rt.send(&[0x01, 0x02], 1, 5)?;
        rt.send(&[0x03], 1, 5)?;
    } else {
        thread::sleep(Duration::from_millis(200));

        let mut pair = [0u8; 2];
        rt.recv(&mut pair, 0, 5)?;
        ensure!(pair == [0x01, 0x02]);

        let mut one = [0u8; 1];
        rt.recv(&mut one, 0, 5)?;
        ensure!(one == [0x03]);

        let outcome = rt.recv(&mut one, 0, 5);
        ensure!(
            outcome == Err(CommError::RemoteFinished),
            "expected the peer to be finished, got {outcome:?}"
        );
    }
    rt.finalize()
}

fn deadlock() -> anyhow::Result<()> {
    let mut rt = Runtime::init(true)?;
    ensure!(rt.world_size() == 2, "deadlock needs exactly 2 ranks");

    let peer = 1 - rt.world_rank();
    let mut buf = [0u8; 1];
    let outcome = rt.recv(&mut buf, peer, ANY_TAG);
    ensure!(
        outcome == Err(CommError::DeadlockDetected),
        "expected a detected deadlock, got {outcome:?}"
    );
    rt.finalize()
}

fn deadlock_avoided() -> anyhow::Result<()> {
    let mut rt = Runtime::init(true)?;
    ensure!(rt.world_size() == 2, "deadlock-avoided needs exactly 2 ranks");

    let peer = 1 - rt.world_rank();
    rt.send(&[rt.world_rank() as u8], peer, 1)?;

    let mut buf = [0u8; 1];
    rt.recv(&mut buf, peer, 1)?;
    ensure!(buf == [peer as u8], "payload mismatch: {buf:?}");
    rt.finalize()
}

fn broadcast() -> anyhow::Result<()> {
    let mut rt = Runtime::init(false)?;
    ensure!(rt.world_size() == 4, "broadcast needs exactly 4 ranks");

    let root = 2;
    let mut data = if rt.world_rank() == root {
        [0xAA, 0xBB, 0xCC]
    } else {
        [0u8; 3]
    };
    rt.bcast(&mut data, root)?;
    ensure!(data == [0xAA, 0xBB, 0xCC], "broadcast mismatch: {data:?}");
    rt.finalize()
}

fn reduce_sum() -> anyhow::Result<()> {
    let mut rt = Runtime::init(false)?;
    ensure!(rt.world_size() == 3, "reduce-sum needs exactly 3 ranks");

    let contribution = [rt.world_rank() as u8; 3];
    let mut result = [0xEE; 3];
    rt.reduce(&contribution, Some(&mut result), ReduceOp::Sum, 0)?;

    if rt.world_rank() == 0 {
        ensure!(result == [3, 3, 3], "aggregate mismatch: {result:?}");
    } else {
        ensure!(result == [0xEE; 3], "non-root result buffer was written");
    }
    rt.finalize()
}

fn barrier() -> anyhow::Result<()> {
    let mut rt = Runtime::init(false)?;
    ensure!(rt.world_size() == 2, "barrier needs exactly 2 ranks");

    if rt.world_rank() == 0 {
        rt.send(&[0xB1], 1, 1)?;
        rt.barrier()?;
        rt.barrier()?;
        rt.send(&[0xB2], 1, 1)?;
    } else {
        rt.barrier()?;
        rt.barrier()?;

        // sender order must survive the pair of barriers
        let mut buf = [0u8; 1];
        rt.recv(&mut buf, 0, 1)?;
        ensure!(buf == [0xB1]);
        rt.recv(&mut buf, 0, 1)?;
        ensure!(buf == [0xB2]);
    }
    rt.finalize()
}
