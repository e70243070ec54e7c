use thiserror::Error;

/// Failure codes surfaced by every communication call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommError {
    #[error("rank outside the launched group")]
    NoSuchRank,
    #[error("operation addressed the calling rank itself")]
    AttemptedSelfOp,
    #[error("remote rank has already finalized")]
    RemoteFinished,
    #[error("mutually blocked receives detected")]
    DeadlockDetected,
}

pub type CommResult = Result<(), CommError>;

impl CommError {
    fn priority(self) -> u8 {
        match self {
            CommError::NoSuchRank => 4,
            CommError::AttemptedSelfOp => 3,
            CommError::RemoteFinished => 2,
            CommError::DeadlockDetected => 1,
        }
    }
}

/// Fold two outcomes into one; the higher-priority failure wins, ties keep
/// the incumbent.
pub(crate) fn merge(incumbent: CommResult, other: CommResult) -> CommResult {
    match (incumbent, other) {
        (Ok(()), other) => other,
        (incumbent, Ok(())) => incumbent,
        (Err(a), Err(b)) => Err(if b.priority() > a.priority() { b } else { a }),
    }
}

/// Wire representation used when collectives append a status to a payload.
pub(crate) fn status_code(outcome: CommResult) -> i32 {
    match outcome {
        Ok(()) => 0,
        Err(CommError::NoSuchRank) => 1,
        Err(CommError::AttemptedSelfOp) => 2,
        Err(CommError::RemoteFinished) => 3,
        Err(CommError::DeadlockDetected) => 4,
    }
}

pub(crate) fn status_from_code(code: i32) -> CommResult {
    match code {
        0 => Ok(()),
        1 => Err(CommError::NoSuchRank),
        2 => Err(CommError::AttemptedSelfOp),
        3 => Err(CommError::RemoteFinished),
        4 => Err(CommError::DeadlockDetected),
        // anything else means the channel carried garbage; the peer is as
        // good as gone
        _ => Err(CommError::RemoteFinished),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    type CE = CommError;

    #[rstest]
    #[case(Ok(()), Ok(()), Ok(()))]
    #[case(Ok(()), Err(CE::DeadlockDetected), Err(CE::DeadlockDetected))]
    #[case(Err(CE::RemoteFinished), Ok(()), Err(CE::RemoteFinished))]
    #[case(Err(CE::DeadlockDetected), Err(CE::RemoteFinished), Err(CE::RemoteFinished))]
    #[case(Err(CE::RemoteFinished), Err(CE::AttemptedSelfOp), Err(CE::AttemptedSelfOp))]
    #[case(Err(CE::AttemptedSelfOp), Err(CE::NoSuchRank), Err(CE::NoSuchRank))]
    #[case(Err(CE::NoSuchRank), Err(CE::DeadlockDetected), Err(CE::NoSuchRank))]
    fn merge_prefers_higher_priority(
        #[case] incumbent: CommResult,
        #[case] other: CommResult,
        #[case] expected: CommResult,
    ) {
        assert_eq!(merge(incumbent, other), expected);
    }

    #[test]
    fn merge_ties_keep_the_incumbent() {
        let folded = merge(Err(CE::RemoteFinished), Err(CE::RemoteFinished));
        assert_eq!(folded, Err(CE::RemoteFinished));
    }

    #[rstest]
    #[case(Ok(()))]
    #[case(Err(CE::NoSuchRank))]
    #[case(Err(CE::AttemptedSelfOp))]
    #[case(Err(CE::RemoteFinished))]
    #[case(Err(CE::DeadlockDetected))]
    fn status_codes_round_trip(#[case] outcome: CommResult) {
        assert_eq!(status_from_code(status_code(outcome)), outcome);
    }

    #[test]
    fn unknown_status_code_reads_as_remote_finished() {
        assert_eq!(status_from_code(99), Err(CE::RemoteFinished));
        assert_eq!(status_from_code(-7), Err(CE::RemoteFinished));
    }
}
