use std::fs::File;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::mailbox::Inbox;
use crate::prelude::*;
use crate::wire::{self, Header, HEADER_SIZE};

/// Spawn the background thread that owns the read end from `peer` and feeds
/// its inbox. The thread exits once the peer closes, and the CLOSE event it
/// appends is guaranteed to be the last one on that inbox.
pub(crate) fn spawn(peer: usize, reader: File, inbox: Arc<Inbox>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("pipemesh-recv-{peer}"))
        .spawn(move || run(peer, reader, inbox))
}

fn run(peer: usize, mut reader: File, inbox: Arc<Inbox>) {
    loop {
        let frame = match wire::read_frame(&mut reader) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(peer, %err, "channel read failed, treating peer as finished");
                break;
            }
        };

        match frame.tag {
            wire::CLOSE_TAG => break,

            wire::REQUEST_TAG => {
                if frame.payload.len() != HEADER_SIZE {
                    warn!(peer, size = frame.payload.len(), "malformed receive probe");
                    break;
                }
                let wanted = Header::decode(&mut frame.payload.as_slice());
                inbox.save_request(wanted.tag, wanted.size);
            }

            _ => inbox.save_message(frame.tag, frame.payload),
        }
    }

    // close our end before announcing the closure
    drop(reader);
    inbox.close();
    debug!(peer, "receiver finished");
}
