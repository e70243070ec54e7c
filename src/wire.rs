use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};

/// Tag a receive may pass to match a message of any tag. A message sent with
/// this tag likewise matches any posted receive.
pub const ANY_TAG: i32 = 0;

// tags below zero are reserved for the runtime itself
pub(crate) const GROUP_TAG: i32 = -1;
pub(crate) const CLOSE_TAG: i32 = -2;
pub(crate) const REQUEST_TAG: i32 = -3;

pub(crate) const PACKET_SIZE: usize = 512;
pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<u64>() + std::mem::size_of::<i32>();
pub(crate) const INLINE_CAPACITY: usize = PACKET_SIZE - HEADER_SIZE;

// prevent a corrupted length field from hogging the allocator
const MAX_PAYLOAD: usize = 64 * (1 << 20);

/// Leading fields of every packet: payload byte count and message tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub size: usize,
    pub tag: i32,
}

impl Header {
    pub(crate) fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u64(self.size as u64);
        dst.put_i32(self.tag);
    }

    pub(crate) fn decode(src: &mut impl Buf) -> Self {
        Self {
            size: src.get_u64() as usize,
            tag: src.get_i32(),
        }
    }

    pub(crate) fn to_bytes(self) -> BytesMut {
        let mut bytes = BytesMut::with_capacity(HEADER_SIZE);
        self.encode(&mut bytes);
        bytes
    }
}

/// One complete message off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub tag: i32,
    pub payload: Vec<u8>,
}

/// Encode a message as one zero-filled prefix packet plus, for payloads past
/// the inline capacity, the remainder streamed on the same writer.
pub(crate) fn write_frame<W: Write>(writer: &mut W, tag: i32, payload: &[u8]) -> io::Result<()> {
    let mut packet = BytesMut::with_capacity(PACKET_SIZE);
    Header {
        size: payload.len(),
        tag,
    }
    .encode(&mut packet);

    let inline = payload.len().min(INLINE_CAPACITY);
    packet.put_slice(&payload[..inline]);
    packet.resize(PACKET_SIZE, 0);

    writer.write_all(&packet)?;
    if payload.len() > INLINE_CAPACITY {
        writer.write_all(&payload[INLINE_CAPACITY..])?;
    }
    Ok(())
}

/// Read exactly one frame. Any short read is an error: a frame is
/// indivisible, so a stream that ends inside one is dead.
pub(crate) fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let mut packet = [0u8; PACKET_SIZE];
    reader.read_exact(&mut packet)?;

    let mut src = &packet[..];
    let header = Header::decode(&mut src);
    if header.size > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame announces {} payload bytes (cap {})", header.size, MAX_PAYLOAD),
        ));
    }

    let mut payload = vec![0u8; header.size];
    let inline = header.size.min(INLINE_CAPACITY);
    src.copy_to_slice(&mut payload[..inline]);
    if header.size > INLINE_CAPACITY {
        reader.read_exact(&mut payload[INLINE_CAPACITY..])?;
    }

    Ok(Frame {
        tag: header.tag,
        payload,
    })
}

/// Shared tag predicate of probe matching and receive matching: zero
/// wildcards either side, otherwise the tags must agree.
pub(crate) fn tags_match(wanted: i32, offered: i32) -> bool {
    wanted == ANY_TAG || offered == ANY_TAG || wanted == offered
}
