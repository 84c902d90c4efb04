// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! The P2P packet object: a fixed wire-layout byte array with typed accessors, plus the
//! borrowed views handed out by the stream APIs.

use crate::p2p::wire::{
    self, FOOTER_LENGTH, HEADER_LENGTH, MAX_CONTENT_LENGTH, MAX_PACKET_LENGTH,
    OFFSET_IS_CONTINUATION, OFFSET_LENGTH, OFFSET_PRIORITY, OFFSET_SEQUENCE_NUMBER,
    SPECIAL_TOKEN, START_TOKEN,
};
use crate::status::{Status, StatusOr};

/// Transmission priority of a packet.
///
/// A higher level preempts transmission of the lower ones; within a level, delivery is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum P2pPriority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl P2pPriority {
    /// Number of priority levels.
    pub const NUM_LEVELS: usize = 3;

    /// Decodes a priority from its header byte. `None` for out-of-range values.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(P2pPriority::Low),
            1 => Some(P2pPriority::Medium),
            2 => Some(P2pPriority::High),
            _ => None,
        }
    }

    /// Index of this level in per-priority tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A P2P packet stored in its wire layout: header, content and footer in one byte array.
///
/// The content region holds *escaped* bytes between [`prepare_to_send`](Self::prepare_to_send)
/// and [`prepare_to_read`](Self::prepare_to_read); the length field always describes the
/// content region as currently stored.
#[derive(Clone, Copy)]
pub struct P2pPacket {
    data: [u8; MAX_PACKET_LENGTH],
}

impl Default for P2pPacket {
    fn default() -> Self {
        let mut data = [0u8; MAX_PACKET_LENGTH];
        data[0] = START_TOKEN;
        Self { data }
    }
}

impl P2pPacket {
    /// Content length in bytes, as currently stored.
    #[inline]
    pub fn length(&self) -> usize {
        u16::from_le_bytes([self.data[OFFSET_LENGTH], self.data[OFFSET_LENGTH + 1]]) as usize
    }

    #[inline]
    pub fn set_length(&mut self, length: usize) {
        let bytes = (length as u16).to_le_bytes();
        self.data[OFFSET_LENGTH] = bytes[0];
        self.data[OFFSET_LENGTH + 1] = bytes[1];
    }

    /// Priority level from the header. Valid for any packet built by this crate; incoming
    /// bytes are validated by the input stream before they reach a packet slot.
    #[inline]
    pub fn priority(&self) -> P2pPriority {
        P2pPriority::from_wire(self.data[OFFSET_PRIORITY]).unwrap_or(P2pPriority::Low)
    }

    #[inline]
    pub fn set_priority(&mut self, priority: P2pPriority) {
        self.data[OFFSET_PRIORITY] = priority as u8;
    }

    #[inline]
    pub fn is_continuation(&self) -> bool {
        self.data[OFFSET_IS_CONTINUATION] != 0
    }

    #[inline]
    pub fn set_is_continuation(&mut self, is_continuation: bool) {
        self.data[OFFSET_IS_CONTINUATION] = is_continuation as u8;
    }

    #[inline]
    pub fn sequence_number(&self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[OFFSET_SEQUENCE_NUMBER..OFFSET_SEQUENCE_NUMBER + 4]);
        u32::from_le_bytes(bytes)
    }

    #[inline]
    pub fn set_sequence_number(&mut self, sequence_number: u32) {
        self.data[OFFSET_SEQUENCE_NUMBER..OFFSET_SEQUENCE_NUMBER + 4]
            .copy_from_slice(&sequence_number.to_le_bytes());
    }

    /// Content region as currently stored (sized by the length field).
    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.data[HEADER_LENGTH..HEADER_LENGTH + self.length()]
    }

    /// The full writable content area. Fill it, then call
    /// [`set_length`](Self::set_length) with the number of bytes used.
    #[inline]
    pub fn content_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_LENGTH..HEADER_LENGTH + MAX_CONTENT_LENGTH]
    }

    /// Footer checksum, stored right after the content region.
    #[inline]
    pub fn checksum(&self) -> u16 {
        let offset = HEADER_LENGTH + self.length();
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    #[inline]
    pub fn set_checksum(&mut self, checksum: u16) {
        let offset = HEADER_LENGTH + self.length();
        self.data[offset..offset + FOOTER_LENGTH].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Whole packet storage in wire layout. The first `HEADER_LENGTH + length + FOOTER_LENGTH`
    /// bytes are the wire image of the packet.
    #[inline]
    pub(crate) fn raw(&self) -> &[u8; MAX_PACKET_LENGTH] {
        &self.data
    }

    #[inline]
    pub(crate) fn raw_mut(&mut self) -> &mut [u8; MAX_PACKET_LENGTH] {
        &mut self.data
    }

    /// Total number of bytes this packet occupies on the wire.
    #[inline]
    pub fn wire_length(&self) -> usize {
        HEADER_LENGTH + self.length() + FOOTER_LENGTH
    }

    fn calculate_checksum(&self) -> u16 {
        wire::checksum(&self.data[..HEADER_LENGTH + self.length()])
    }

    /// Escapes the content in place and writes the footer checksum.
    ///
    /// Fails with [`Status::Unavailable`] if the escaped content would exceed
    /// [`MAX_CONTENT_LENGTH`]; the packet is left untouched in that case.
    pub fn prepare_to_send(&mut self) -> StatusOr<()> {
        let length = self.length();
        let start_tokens = self.data[HEADER_LENGTH..HEADER_LENGTH + length]
            .iter()
            .filter(|&&byte| byte == START_TOKEN)
            .count();
        let escaped_length = length + start_tokens;
        if escaped_length > MAX_CONTENT_LENGTH {
            return Err(Status::Unavailable);
        }

        // Expand from the end so each source byte is read before it is overwritten.
        let content = &mut self.data[HEADER_LENGTH..HEADER_LENGTH + MAX_CONTENT_LENGTH];
        let mut destination = escaped_length;
        for source in (0..length).rev() {
            let byte = content[source];
            if byte == START_TOKEN {
                destination -= 1;
                content[destination] = SPECIAL_TOKEN;
            }
            destination -= 1;
            content[destination] = byte;
        }

        self.set_length(escaped_length);
        let checksum = self.calculate_checksum();
        self.set_checksum(checksum);
        Ok(())
    }

    /// Verifies the footer checksum, then collapses escape pairs in place and updates the
    /// length field accordingly.
    ///
    /// Fails with [`Status::Malformed`] on a checksum mismatch or on a content
    /// [`START_TOKEN`] not followed by [`SPECIAL_TOKEN`].
    pub fn prepare_to_read(&mut self) -> StatusOr<()> {
        if self.checksum() != self.calculate_checksum() {
            return Err(Status::Malformed);
        }

        let escaped_length = self.length();
        let content = &mut self.data[HEADER_LENGTH..HEADER_LENGTH + MAX_CONTENT_LENGTH];
        let mut destination = 0;
        let mut source = 0;
        while source < escaped_length {
            let byte = content[source];
            content[destination] = byte;
            destination += 1;
            source += 1;
            if byte == START_TOKEN {
                if source >= escaped_length || content[source] != SPECIAL_TOKEN {
                    return Err(Status::Malformed);
                }
                source += 1;
            }
        }
        self.set_length(destination);
        Ok(())
    }
}

/// Read-only view of a packet owned by a stream's ring buffer. Borrowed for the duration of
/// a single call; consume the packet to advance the stream.
#[derive(Clone, Copy)]
pub struct P2pPacketView<'a> {
    packet: &'a P2pPacket,
}

impl<'a> P2pPacketView<'a> {
    pub(crate) fn new(packet: &'a P2pPacket) -> Self {
        Self { packet }
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.packet.length()
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        self.packet.content()
    }

    #[inline]
    pub fn priority(&self) -> P2pPriority {
        self.packet.priority()
    }

    #[inline]
    pub fn sequence_number(&self) -> u32 {
        self.packet.sequence_number()
    }
}

/// Mutable view of a reserved packet slot. Fill the content, set the length, then commit the
/// packet on the stream that handed the view out.
pub struct P2pMutablePacketView<'a> {
    packet: &'a mut P2pPacket,
}

impl<'a> P2pMutablePacketView<'a> {
    pub(crate) fn new(packet: &'a mut P2pPacket) -> Self {
        Self { packet }
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.packet.length()
    }

    #[inline]
    pub fn set_length(&mut self, length: usize) {
        self.packet.set_length(length);
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        self.packet.content()
    }

    #[inline]
    pub fn content_mut(&mut self) -> &mut [u8] {
        self.packet.content_mut()
    }

    #[inline]
    pub fn priority(&self) -> P2pPriority {
        self.packet.priority()
    }
}
