use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::{CommError, CommResult};
use crate::prelude::*;
use crate::wire;

use super::Outbox;

/// Everything a receiver thread can hand over to the user thread.
#[derive(Debug)]
pub(crate) enum Event {
    /// A user payload; its buffer is owned by the queue until retrieval.
    Message { tag: i32, payload: Vec<u8> },
    /// The peer announced it is blocked receiving this shape from us.
    Request { tag: i32, size: usize },
    /// The peer is gone; always the final event on a queue.
    Close,
    /// Legacy kind; nothing produces it today but retrieval still skips it.
    Deadlock,
}

/// Ordered queue of events received from one peer.
///
/// Exactly one receiver thread appends and exactly one user thread walks and
/// removes, so a mutex plus a tail condvar gives the blocking selective scan:
/// the consumer sleeps precisely when its cursor catches up with the
/// producer.
#[derive(Debug)]
pub(crate) struct Inbox {
    peer: usize,
    queue: Mutex<VecDeque<Event>>,
    ready: Condvar,
}

impl Inbox {
    pub(crate) fn new(peer: usize) -> Self {
        Self {
            peer,
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn save_message(&self, tag: i32, payload: Vec<u8>) {
        trace!(peer = self.peer, tag, size = payload.len(), "queueing message");
        self.push(Event::Message { tag, payload });
    }

    pub(crate) fn save_request(&self, tag: i32, size: usize) {
        trace!(peer = self.peer, tag, size, "queueing receive probe");
        self.push(Event::Request { tag, size });
    }

    /// Seal the queue; no event may be appended after this.
    pub(crate) fn close(&self) {
        self.push(Event::Close);
    }

    #[allow(dead_code)]
    pub(crate) fn save_deadlock(&self) {
        self.push(Event::Deadlock);
    }

    fn push(&self, event: Event) {
        let mut queue = self.queue.lock();
        queue.push_back(event);
        self.ready.notify_one();
    }

    /// Block until an event settles this receive, per the case order of the
    /// retrieval algorithm:
    ///
    /// - CLOSE ends the call (and every later one) with `RemoteFinished`.
    /// - A probe is taken out of the queue and, when detection is on, matched
    ///   against our own unconfirmed sends; a miss means both sides are
    ///   blocked on each other.
    /// - A matching message is copied out and removed; non-matching messages
    ///   are skipped in place, they belong to a later receive.
    pub(crate) fn retrieve(
        &self,
        tag: i32,
        out: &mut [u8],
        mut outbox: Option<&mut Outbox>,
    ) -> CommResult {
        let mut queue = self.queue.lock();
        let mut cursor = 0;

        loop {
            while cursor < queue.len() {
                match &queue[cursor] {
                    Event::Close => return Err(CommError::RemoteFinished),

                    Event::Request { tag: wanted_tag, size: wanted_size } => {
                        let (wanted_tag, wanted_size) = (*wanted_tag, *wanted_size);
                        queue.remove(cursor);

                        match outbox.as_deref_mut() {
                            // probe from before detection was disabled; drop it
                            None => {}
                            Some(outbox) => {
                                if !outbox.pop_matching(wanted_size, wanted_tag) {
                                    return Err(CommError::DeadlockDetected);
                                }
                            }
                        }
                    }

                    Event::Deadlock => {
                        queue.remove(cursor);
                    }

                    Event::Message { tag: offered, payload } => {
                        if payload.len() == out.len() && wire::tags_match(tag, *offered) {
                            if let Some(Event::Message { payload, .. }) = queue.remove(cursor) {
                                out.copy_from_slice(&payload);
                            }
                            return Ok(());
                        }
                        cursor += 1;
                    }
                }
            }

            self.ready.wait(&mut queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ANY_TAG;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn recv(inbox: &Inbox, tag: i32, len: usize) -> (CommResult, Vec<u8>) {
        let mut out = vec![0u8; len];
        let outcome = inbox.retrieve(tag, &mut out, None);
        (outcome, out)
    }

    #[test]
    fn messages_come_back_in_fifo_order() {
        let inbox = Inbox::new(1);
        inbox.save_message(7, vec![1]);
        inbox.save_message(7, vec![2]);
        inbox.save_message(7, vec![3]);

        for expected in 1..=3u8 {
            let (outcome, out) = recv(&inbox, ANY_TAG, 1);
            assert_eq!(outcome, Ok(()));
            assert_eq!(out, vec![expected]);
        }
    }

    #[test]
    fn unmatched_messages_are_skipped_in_place() {
        let inbox = Inbox::new(1);
        inbox.save_message(1, vec![0xA0]);
        inbox.save_message(2, vec![0xB0]);

        let (outcome, out) = recv(&inbox, 2, 1);
        assert_eq!(outcome, Ok(()));
        assert_eq!(out, vec![0xB0]);

        let (outcome, out) = recv(&inbox, 1, 1);
        assert_eq!(outcome, Ok(()));
        assert_eq!(out, vec![0xA0]);
    }

    #[test]
    fn matching_is_selective_on_size_too() {
        let inbox = Inbox::new(1);
        inbox.save_message(5, vec![1, 2]);
        inbox.save_message(5, vec![3]);

        let (outcome, out) = recv(&inbox, 5, 1);
        assert_eq!(outcome, Ok(()));
        assert_eq!(out, vec![3]);
    }

    #[test]
    fn zero_length_messages_need_no_copy() {
        let inbox = Inbox::new(1);
        inbox.save_message(9, Vec::new());
        let (outcome, out) = recv(&inbox, 9, 0);
        assert_eq!(outcome, Ok(()));
        assert!(out.is_empty());
    }

    #[test]
    fn retrieve_blocks_until_the_producer_delivers() {
        let inbox = Arc::new(Inbox::new(1));
        let producer = {
            let inbox = Arc::clone(&inbox);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                inbox.save_message(4, vec![0x2A]);
            })
        };

        let (outcome, out) = recv(&inbox, 4, 1);
        assert_eq!(outcome, Ok(()));
        assert_eq!(out, vec![0x2A]);
        producer.join().unwrap();
    }

    #[test]
    fn close_is_sticky() {
        let inbox = Inbox::new(1);
        inbox.save_message(1, vec![9]);
        inbox.close();

        // an unmatched receive walks past the message and hits the seal
        let (outcome, _) = recv(&inbox, 2, 1);
        assert_eq!(outcome, Err(CommError::RemoteFinished));
        let (outcome, _) = recv(&inbox, 2, 1);
        assert_eq!(outcome, Err(CommError::RemoteFinished));

        // the matching message ahead of the seal is still retrievable
        let (outcome, out) = recv(&inbox, 1, 1);
        assert_eq!(outcome, Ok(()));
        assert_eq!(out, vec![9]);
    }

    #[test]
    fn matched_probe_is_consumed_and_scanning_continues() {
        let inbox = Inbox::new(1);
        let mut outbox = Outbox::default();
        outbox.push(3, 8);

        inbox.save_request(3, 8);
        inbox.save_message(3, vec![1; 8]);

        let mut out = vec![0u8; 8];
        assert_eq!(inbox.retrieve(3, &mut out, Some(&mut outbox)), Ok(()));
        assert_eq!(out, vec![1; 8]);
        // the probe ate the outbox record
        assert!(!outbox.pop_matching(8, 3));
    }

    #[test]
    fn unmatched_probe_reports_deadlock() {
        let inbox = Inbox::new(1);
        let mut outbox = Outbox::default();

        inbox.save_request(3, 8);

        let mut out = vec![0u8; 8];
        assert_eq!(
            inbox.retrieve(3, &mut out, Some(&mut outbox)),
            Err(CommError::DeadlockDetected)
        );
    }

    #[test]
    fn probe_size_governs_matching_not_probe_tag_position() {
        // probe for (size=8, tag=3) must not match a record of (size=3, tag=8)
        let inbox = Inbox::new(1);
        let mut outbox = Outbox::default();
        outbox.push(8, 3);

        inbox.save_request(3, 8);

        let mut out = vec![0u8; 8];
        assert_eq!(
            inbox.retrieve(3, &mut out, Some(&mut outbox)),
            Err(CommError::DeadlockDetected)
        );
    }

    #[test]
    fn probes_are_dropped_when_detection_is_off() {
        let inbox = Inbox::new(1);
        inbox.save_request(3, 8);
        inbox.save_message(6, vec![5]);

        let (outcome, out) = recv(&inbox, 6, 1);
        assert_eq!(outcome, Ok(()));
        assert_eq!(out, vec![5]);
    }

    #[test]
    fn legacy_deadlock_events_are_skipped() {
        let inbox = Inbox::new(1);
        inbox.save_deadlock();
        inbox.save_message(1, vec![7]);

        let (outcome, out) = recv(&inbox, 1, 1);
        assert_eq!(outcome, Ok(()));
        assert_eq!(out, vec![7]);
    }
}
