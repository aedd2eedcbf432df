//! NRP packet and message framing.
//!
//! A packet is a 4-byte header followed by `msgCount` messages. Every
//! message starts with its own 4-byte header whose `length` covers the
//! header and the content, so the only way to find the next message is to
//! add the current message's `length` to its offset. All multi-byte fields
//! are big-endian on the wire.
//!
//! Datagrams arrive from untrusted peers: every accessor here works on
//! checked slices and every walk is bounded by the declared packet length
//! and the buffer actually received.

use crate::entries::RejectEntry;
use crate::types::{
    Direction, MsgType, RejectReason, MAX_BYTE, MAX_REJECT_MESSAGE_SIZE,
    MAX_RESPONSE_MESSAGE_SIZE, MESSAGE_HEADER_SIZE, PACKET_HEADER_SIZE, REJECT_ENTRY_SIZE,
};
use thiserror::Error;

/// Errors produced while walking or generating packets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes were available than a field or record needs.
    #[error("truncated input: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes needed.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
    /// The output buffer cannot hold the record being generated.
    #[error("buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall {
        /// Bytes the record needs.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
    /// A declared length is smaller than the header it belongs to.
    #[error("declared length {0} is shorter than its header")]
    LengthUnderflow(usize),
    /// A count or size argument is zero or out of range.
    #[error("count {0} out of range")]
    InvalidCount(usize),
    /// The message type is not legal where it was used.
    #[error("unexpected message type {0}")]
    UnexpectedType(u8),
    /// Content is not a whole number of fixed-size entries.
    #[error("content of {len} bytes is not a multiple of {element}")]
    Misaligned {
        /// Content length.
        len: usize,
        /// Entry size.
        element: usize,
    },
    /// A reject entry names an unrejectable type or an unknown reason.
    #[error("invalid reject entry")]
    InvalidReject,
    /// A packet failed validation.
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
    /// A message inside a packet failed validation.
    #[error("invalid message at offset {0}")]
    InvalidMessage(usize),
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, CodecError> {
    let bytes = buf
        .get(offset..offset.saturating_add(2))
        .filter(|b| b.len() == 2)
        .ok_or(CodecError::Truncated {
            expected: offset.saturating_add(2),
            actual: buf.len(),
        })?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn reserve(buf: &[u8], offset: usize, needed: usize) -> Result<(), CodecError> {
    let available = buf.len().saturating_sub(offset);
    if needed > available {
        return Err(CodecError::BufferTooSmall { needed, available });
    }
    Ok(())
}

fn write_header(buf: &mut [u8], offset: usize, length: usize, tag: u8, count: u8) {
    // Callers reserve `length` bytes and bound it by u16 first.
    let len = u16::try_from(length).unwrap_or(u16::MAX);
    buf[offset..offset + 2].copy_from_slice(&len.to_be_bytes());
    buf[offset + 2] = tag;
    buf[offset + 3] = count;
}

/// Offset of the message following the one at `offset`.
///
/// Only the current message's header is read; the returned offset is not
/// checked against the buffer and must be bounds-checked by the caller.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if no header is present at `offset`
/// and [`CodecError::LengthUnderflow`] if the declared length is shorter
/// than a header (which would stall any walk).
pub fn next_message(buf: &[u8], offset: usize) -> Result<usize, CodecError> {
    let length = usize::from(read_u16(buf, offset)?);
    if length < MESSAGE_HEADER_SIZE {
        return Err(CodecError::LengthUnderflow(length));
    }
    Ok(offset + length)
}

/// Offset one past the last byte of the packet, as declared by its header.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if `buf` is shorter than a packet header.
pub fn end_of_packet(buf: &[u8]) -> Result<usize, CodecError> {
    if buf.len() < PACKET_HEADER_SIZE {
        return Err(CodecError::Truncated {
            expected: PACKET_HEADER_SIZE,
            actual: buf.len(),
        });
    }
    Ok(usize::from(read_u16(buf, 0)?))
}

fn size_matches(length: usize, count_or_size: u8, element_size: usize) -> bool {
    length - MESSAGE_HEADER_SIZE == usize::from(count_or_size) * element_size
}

/// Validates the header of the message at the start of `msg`.
///
/// `msg` must extend at least to the end of the enclosing packet; a message
/// whose declared length runs past it is invalid. Requests tolerate message
/// types newer than this build (their content cannot be size-checked and is
/// skipped), while responses accept only the types this build implements.
#[must_use]
pub fn validate_message_header(msg: &[u8], direction: Direction) -> bool {
    let Ok(length) = read_u16(msg, 0).map(usize::from) else {
        return false;
    };
    if msg.len() < MESSAGE_HEADER_SIZE
        || length >= MAX_RESPONSE_MESSAGE_SIZE
        || length < MESSAGE_HEADER_SIZE
        || length > msg.len()
    {
        return false;
    }

    let tag = msg[2];
    let count_or_size = msg[3];

    match direction {
        Direction::Request => {
            if tag < MsgType::REQUEST_MSG_MIN {
                return false;
            }
            match MsgType::from_u8(tag) {
                // Payload requests carry no content, only the header.
                Some(MsgType::Ip4Peers | MsgType::Entropy | MsgType::Ip6Peers) => {
                    size_matches(length, count_or_size, 0)
                }
                _ => true,
            }
        }
        Direction::Response => {
            if tag < MsgType::RESPONSE_MSG_MIN || tag >= MsgType::MAX {
                return false;
            }
            match MsgType::from_u8(tag)
                .filter(|t| t.is_implemented())
                .and_then(MsgType::response_element_size)
            {
                Some(element) => size_matches(length, count_or_size, element),
                None => false,
            }
        }
    }
}

/// Validates a reject message at the start of `msg`.
#[must_use]
pub fn validate_reject_message(msg: &[u8]) -> bool {
    let Ok(length) = read_u16(msg, 0).map(usize::from) else {
        return false;
    };
    if msg.len() < MESSAGE_HEADER_SIZE
        || length > MAX_REJECT_MESSAGE_SIZE
        || length < MESSAGE_HEADER_SIZE
        || length > msg.len()
    {
        return false;
    }
    if msg[2] != MsgType::Reject.as_u8() {
        return false;
    }
    let count = usize::from(msg[3]);
    if count == 0 {
        return false;
    }
    let content = &msg[MESSAGE_HEADER_SIZE..length];
    if content.len() % REJECT_ENTRY_SIZE != 0 || content.len() / REJECT_ENTRY_SIZE != count {
        return false;
    }
    content
        .chunks_exact(REJECT_ENTRY_SIZE)
        .all(|c| RejectEntry { msg_type: c[0], reason: c[1] }.is_valid())
}

/// Validates a whole packet, walking every message it claims to hold.
#[must_use]
pub fn validate_packet(buf: &[u8], direction: Direction) -> bool {
    Packet::parse(buf, direction).is_ok()
}

/// Validates a request packet.
#[must_use]
pub fn validate_request_packet(buf: &[u8]) -> bool {
    validate_packet(buf, Direction::Request)
}

/// Validates a response packet.
#[must_use]
pub fn validate_response_packet(buf: &[u8]) -> bool {
    validate_packet(buf, Direction::Response)
}

/// A borrowed view of one message, exactly `length` bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    bytes: &'a [u8],
}

impl<'a> Message<'a> {
    /// Views the message starting at `offset` of `buf`.
    ///
    /// Only framing is checked; use [`validate_message_header`] or
    /// [`Packet::parse`] before trusting the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is missing, the declared length is
    /// shorter than a header, or the message runs past `buf`.
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, CodecError> {
        let end = next_message(buf, offset)?;
        let bytes = buf.get(offset..end).ok_or(CodecError::Truncated {
            expected: end,
            actual: buf.len(),
        })?;
        Ok(Self { bytes })
    }

    /// Total length including the header.
    #[must_use]
    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    /// Raw type tag.
    #[must_use]
    pub fn msg_type_raw(&self) -> u8 {
        self.bytes[2]
    }

    /// Typed tag, `None` for tags newer than this build.
    #[must_use]
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u8(self.bytes[2])
    }

    /// Entry count for peers/reject messages, byte count for entropy.
    #[must_use]
    pub fn count_or_size(&self) -> u8 {
        self.bytes[3]
    }

    /// Content following the header.
    #[must_use]
    pub fn content(&self) -> &'a [u8] {
        &self.bytes[MESSAGE_HEADER_SIZE..]
    }

    /// Reject entries, if this is a valid reject message.
    #[must_use]
    pub fn reject_entries(&self) -> Option<Vec<RejectEntry>> {
        if !validate_reject_message(self.bytes) {
            return None;
        }
        RejectEntry::decode_all(self.content()).ok()
    }
}

/// A validated packet.
///
/// Constructed only through [`Packet::parse`], so iterating its messages
/// re-walks framing that has already been checked end to end.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    bytes: &'a [u8],
    direction: Direction,
    msg_count: u8,
}

impl<'a> Packet<'a> {
    /// Validates `buf` as a packet travelling in `direction`.
    ///
    /// Bytes past the declared packet length are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPacket`] or [`CodecError::InvalidMessage`]
    /// describing the first check that failed.
    pub fn parse(buf: &'a [u8], direction: Direction) -> Result<Self, CodecError> {
        let end = end_of_packet(buf)?;
        if end > direction.max_packet_size() {
            return Err(CodecError::InvalidPacket("packet too large"));
        }
        if end < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidPacket("length shorter than header"));
        }
        if end > buf.len() {
            return Err(CodecError::InvalidPacket("length exceeds datagram"));
        }
        if buf[2] != direction.packet_type().as_u8() {
            return Err(CodecError::InvalidPacket("wrong packet type"));
        }
        let msg_count = buf[3];
        if msg_count == 0 {
            return Err(CodecError::InvalidPacket("no messages"));
        }

        let bytes = &buf[..end];
        let mut offset = PACKET_HEADER_SIZE;
        let mut walked = 0usize;
        while offset < end {
            let msg = &bytes[offset..];
            if !validate_message_header(msg, direction) {
                return Err(CodecError::InvalidMessage(offset));
            }
            if direction == Direction::Response
                && msg[2] == MsgType::Reject.as_u8()
                && !validate_reject_message(msg)
            {
                return Err(CodecError::InvalidMessage(offset));
            }
            offset = next_message(bytes, offset)?;
            walked += 1;
            if walked > MAX_BYTE {
                return Err(CodecError::InvalidPacket("too many messages"));
            }
        }

        if walked != usize::from(msg_count) {
            return Err(CodecError::InvalidPacket("message count mismatch"));
        }
        if offset > end {
            return Err(CodecError::InvalidPacket("message overruns packet"));
        }

        Ok(Self {
            bytes,
            direction,
            msg_count,
        })
    }

    /// Declared (and verified) packet length.
    #[must_use]
    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    /// Number of messages in the packet.
    #[must_use]
    pub fn msg_count(&self) -> usize {
        usize::from(self.msg_count)
    }

    /// Direction the packet was validated for.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Iterates the packet's messages in wire order.
    #[must_use]
    pub fn messages(&self) -> Messages<'a> {
        Messages {
            bytes: self.bytes,
            offset: PACKET_HEADER_SIZE,
        }
    }
}

/// Iterator over the messages of a validated [`Packet`].
#[derive(Debug, Clone)]
pub struct Messages<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Messages<'a> {
    type Item = Message<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let msg = Message::at(self.bytes, self.offset).ok()?;
        self.offset += msg.length();
        Some(msg)
    }
}

/// Writes an entropy request asking for `requested` bytes (0 = server default).
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if the header does not fit.
pub fn generate_request_entropy_message(
    buf: &mut [u8],
    offset: usize,
    requested: u8,
) -> Result<usize, CodecError> {
    reserve(buf, offset, MESSAGE_HEADER_SIZE)?;
    write_header(buf, offset, MESSAGE_HEADER_SIZE, MsgType::Entropy.as_u8(), requested);
    Ok(offset + MESSAGE_HEADER_SIZE)
}

/// Writes a peers request asking for `count` peers (0 = as many as fit).
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedType`] unless `peer_type` is a peers
/// type, or [`CodecError::BufferTooSmall`].
pub fn generate_request_peers_message(
    buf: &mut [u8],
    offset: usize,
    peer_type: MsgType,
    count: u8,
) -> Result<usize, CodecError> {
    if !peer_type.is_peers() {
        return Err(CodecError::UnexpectedType(peer_type.as_u8()));
    }
    reserve(buf, offset, MESSAGE_HEADER_SIZE)?;
    write_header(buf, offset, MESSAGE_HEADER_SIZE, peer_type.as_u8(), count);
    Ok(offset + MESSAGE_HEADER_SIZE)
}

/// Writes an entropy response carrying `entropy`.
///
/// # Errors
///
/// Returns [`CodecError::InvalidCount`] if `entropy` is empty or longer than
/// 255 bytes, or [`CodecError::BufferTooSmall`].
pub fn generate_response_entropy_message(
    buf: &mut [u8],
    offset: usize,
    entropy: &[u8],
) -> Result<usize, CodecError> {
    let size = u8::try_from(entropy.len())
        .ok()
        .filter(|n| *n != 0)
        .ok_or(CodecError::InvalidCount(entropy.len()))?;
    let length = MESSAGE_HEADER_SIZE + entropy.len();
    reserve(buf, offset, length)?;
    write_header(buf, offset, length, MsgType::Entropy.as_u8(), size);
    buf[offset + MESSAGE_HEADER_SIZE..offset + length].copy_from_slice(entropy);
    Ok(offset + length)
}

/// Writes a peers response with `count` raw entries taken from `peers`.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedType`] unless `peer_type` is a peers
/// type, [`CodecError::InvalidCount`] for a zero count,
/// [`CodecError::Truncated`] if `peers` holds fewer than `count` entries,
/// or [`CodecError::BufferTooSmall`].
pub fn generate_response_peers_message(
    buf: &mut [u8],
    offset: usize,
    peer_type: MsgType,
    count: u8,
    peers: &[u8],
) -> Result<usize, CodecError> {
    let element = match peer_type {
        MsgType::Ip4Peers | MsgType::Ip6Peers => peer_type
            .response_element_size()
            .ok_or(CodecError::UnexpectedType(peer_type.as_u8()))?,
        other => return Err(CodecError::UnexpectedType(other.as_u8())),
    };
    if count == 0 {
        return Err(CodecError::InvalidCount(0));
    }
    let content = usize::from(count) * element;
    if peers.len() < content {
        return Err(CodecError::Truncated {
            expected: content,
            actual: peers.len(),
        });
    }
    let length = MESSAGE_HEADER_SIZE + content;
    reserve(buf, offset, length)?;
    write_header(buf, offset, length, peer_type.as_u8(), count);
    buf[offset + MESSAGE_HEADER_SIZE..offset + length].copy_from_slice(&peers[..content]);
    Ok(offset + length)
}

/// Writes a reject header announcing `count` entries and returns the offset
/// of the first entry.
///
/// Room for the header and all `count` entries is checked up front so a
/// short buffer never receives a partial reject message.
///
/// # Errors
///
/// Returns [`CodecError::InvalidCount`] for a zero count or
/// [`CodecError::BufferTooSmall`].
pub fn generate_reject_header(
    buf: &mut [u8],
    offset: usize,
    count: u8,
) -> Result<usize, CodecError> {
    if count == 0 {
        return Err(CodecError::InvalidCount(0));
    }
    let length = MESSAGE_HEADER_SIZE + usize::from(count) * REJECT_ENTRY_SIZE;
    reserve(buf, offset, length)?;
    write_header(buf, offset, length, MsgType::Reject.as_u8(), count);
    Ok(offset + MESSAGE_HEADER_SIZE)
}

/// Writes one reject entry at `offset` and returns the offset after it.
///
/// # Errors
///
/// Returns [`CodecError::InvalidReject`] if `msg_type` cannot be rejected
/// (entropy, control tags) or [`CodecError::BufferTooSmall`].
pub fn generate_reject_message(
    buf: &mut [u8],
    offset: usize,
    reason: RejectReason,
    msg_type: MsgType,
) -> Result<usize, CodecError> {
    if !msg_type.is_rejectable() {
        return Err(CodecError::InvalidReject);
    }
    reserve(buf, offset, REJECT_ENTRY_SIZE)?;
    let entry = RejectEntry::new(msg_type, reason).to_bytes();
    buf[offset..offset + REJECT_ENTRY_SIZE].copy_from_slice(&entry);
    Ok(offset + REJECT_ENTRY_SIZE)
}

/// Writes a complete reject message holding `entries`.
///
/// # Errors
///
/// Returns [`CodecError::InvalidCount`] for zero or more than 255 entries,
/// [`CodecError::InvalidReject`] for an invalid entry, or
/// [`CodecError::BufferTooSmall`].
pub fn generate_reject(
    buf: &mut [u8],
    offset: usize,
    entries: &[RejectEntry],
) -> Result<usize, CodecError> {
    let count = u8::try_from(entries.len()).map_err(|_| CodecError::InvalidCount(entries.len()))?;
    if entries.iter().any(|e| !e.is_valid()) {
        return Err(CodecError::InvalidReject);
    }
    let mut cursor = generate_reject_header(buf, offset, count)?;
    for entry in entries {
        buf[cursor..cursor + REJECT_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        cursor += REJECT_ENTRY_SIZE;
    }
    Ok(cursor)
}

/// Writes a packet header and returns the offset of its first message.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedType`] unless `packet_type` is request or
/// response, [`CodecError::InvalidCount`] for a zero message count or a
/// length outside the direction's bounds, or [`CodecError::BufferTooSmall`].
pub fn generate_packet_header(
    buf: &mut [u8],
    offset: usize,
    length: usize,
    packet_type: MsgType,
    msg_count: u8,
) -> Result<usize, CodecError> {
    let direction = match packet_type {
        MsgType::Request => Direction::Request,
        MsgType::Response => Direction::Response,
        other => return Err(CodecError::UnexpectedType(other.as_u8())),
    };
    if length > direction.max_packet_size() || length < PACKET_HEADER_SIZE {
        return Err(CodecError::InvalidCount(length));
    }
    if msg_count == 0 {
        return Err(CodecError::InvalidCount(0));
    }
    reserve(buf, offset, PACKET_HEADER_SIZE)?;
    write_header(buf, offset, length, packet_type.as_u8(), msg_count);
    Ok(offset + PACKET_HEADER_SIZE)
}

/// Assembles a packet message by message within a fixed capacity.
///
/// The packet header is written by [`PacketBuilder::finish`], which derives
/// `length` and `msgCount` from what was actually appended.
#[derive(Debug)]
pub struct PacketBuilder {
    buf: Vec<u8>,
    offset: usize,
    count: u8,
    direction: Direction,
}

impl PacketBuilder {
    /// Creates a builder whose finished packet will not exceed `capacity`
    /// bytes (nor the direction's maximum).
    #[must_use]
    pub fn new(direction: Direction, capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.min(direction.max_packet_size())],
            offset: PACKET_HEADER_SIZE,
            count: 0,
            direction,
        }
    }

    /// Bytes still available for messages.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    /// Messages appended so far.
    #[must_use]
    pub fn msg_count(&self) -> usize {
        usize::from(self.count)
    }

    /// Appends one message written by `generate` at the current offset.
    ///
    /// # Errors
    ///
    /// Propagates the generator's error, or [`CodecError::InvalidCount`] once
    /// 255 messages have been appended. Nothing is appended on error.
    pub fn push<F>(&mut self, generate: F) -> Result<(), CodecError>
    where
        F: FnOnce(&mut [u8], usize) -> Result<usize, CodecError>,
    {
        if usize::from(self.count) >= MAX_BYTE {
            return Err(CodecError::InvalidCount(MAX_BYTE + 1));
        }
        if self.offset > self.buf.len() {
            return Err(CodecError::BufferTooSmall {
                needed: self.offset,
                available: self.buf.len(),
            });
        }
        let end = generate(&mut self.buf, self.offset)?;
        self.offset = end;
        self.count += 1;
        Ok(())
    }

    /// Appends an entropy request.
    ///
    /// # Errors
    ///
    /// See [`generate_request_entropy_message`].
    pub fn entropy_request(&mut self, requested: u8) -> Result<(), CodecError> {
        self.push(|buf, off| generate_request_entropy_message(buf, off, requested))
    }

    /// Appends a peers request.
    ///
    /// # Errors
    ///
    /// See [`generate_request_peers_message`].
    pub fn peers_request(&mut self, peer_type: MsgType, count: u8) -> Result<(), CodecError> {
        self.push(|buf, off| generate_request_peers_message(buf, off, peer_type, count))
    }

    /// Appends an entropy response.
    ///
    /// # Errors
    ///
    /// See [`generate_response_entropy_message`].
    pub fn entropy_response(&mut self, entropy: &[u8]) -> Result<(), CodecError> {
        self.push(|buf, off| generate_response_entropy_message(buf, off, entropy))
    }

    /// Appends a peers response.
    ///
    /// # Errors
    ///
    /// See [`generate_response_peers_message`].
    pub fn peers_response(
        &mut self,
        peer_type: MsgType,
        count: u8,
        peers: &[u8],
    ) -> Result<(), CodecError> {
        self.push(|buf, off| generate_response_peers_message(buf, off, peer_type, count, peers))
    }

    /// Appends a reject message.
    ///
    /// # Errors
    ///
    /// See [`generate_reject`].
    pub fn reject(&mut self, entries: &[RejectEntry]) -> Result<(), CodecError> {
        self.push(|buf, off| generate_reject(buf, off, entries))
    }

    /// Writes the packet header and returns the finished packet.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidCount`] if no message was appended, or
    /// [`CodecError::BufferTooSmall`] if the capacity cannot hold a header.
    pub fn finish(mut self) -> Result<Vec<u8>, CodecError> {
        let length = self.offset;
        generate_packet_header(
            &mut self.buf,
            0,
            length,
            self.direction.packet_type(),
            self.count,
        )?;
        self.buf.truncate(length);
        Ok(self.buf)
    }
}
