// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Receiving state machine of the P2P packet stream.
//!
//! Bytes are pulled from the transport one at a time and assembled into packet slots of a
//! per-priority ring buffer. The machine resynchronizes on the start token after garbage,
//! link interruptions and preempted packets; a packet only becomes visible to the consumer
//! once its footer checksum verifies.

use crate::p2p::buffer::PriorityRingBuffer;
use crate::p2p::byte_stream::P2pByteStream;
use crate::p2p::packet::{P2pPacket, P2pPacketView, P2pPriority};
use crate::p2p::wire::{
    FOOTER_LENGTH, HEADER_LENGTH, MAX_CONTENT_LENGTH, OFFSET_IS_CONTINUATION, OFFSET_LENGTH,
    OFFSET_PRIORITY, OFFSET_SEQUENCE_NUMBER, SPECIAL_TOKEN, START_TOKEN,
};
use crate::status::{Status, StatusOr};

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingForPacket,
    ReadingHeader,
    ReadingContent,
    DisambiguatingStartTokenInContent,
    ReadingFooter,
}

/// Reassembles P2P packets from a byte transport into a bounded per-priority buffer.
///
/// `CAPACITY` is the number of packet slots per priority level. Drive the machine by calling
/// [`run`](Self::run) repeatedly; each call makes at most one byte of progress and never
/// blocks.
pub struct P2pPacketInputStream<ByteStream: P2pByteStream, const CAPACITY: usize> {
    packet_buffer: PriorityRingBuffer<P2pPacket, CAPACITY>,
    byte_stream: ByteStream,
    state: State,
    incoming_header: [u8; HEADER_LENGTH],
    current_field_read_bytes: usize,
}

impl<ByteStream: P2pByteStream, const CAPACITY: usize> P2pPacketInputStream<ByteStream, CAPACITY> {
    /// Takes ownership of the read side of the transport. Only one packet stream may be
    /// associated with a byte stream at a time.
    pub fn new(byte_stream: ByteStream) -> Self {
        Self {
            packet_buffer: PriorityRingBuffer::new(),
            byte_stream,
            state: State::WaitingForPacket,
            incoming_header: [0u8; HEADER_LENGTH],
            current_field_read_bytes: 0,
        }
    }

    /// Number of times [`consume`](Self::consume) can be called for packets at `priority`.
    pub fn num_available_packets(&self, priority: P2pPriority) -> usize {
        self.packet_buffer.size(priority)
    }

    /// A view of the oldest packet at the highest non-empty priority, or `Unavailable`.
    pub fn oldest_packet(&self) -> StatusOr<P2pPacketView<'_>> {
        match self.packet_buffer.oldest_value() {
            Some(packet) => Ok(P2pPacketView::new(packet)),
            None => Err(Status::Unavailable),
        }
    }

    /// Consumes the packet [`oldest_packet`](Self::oldest_packet) points at. Returns `false`
    /// if there is nothing to consume.
    pub fn consume(&mut self) -> bool {
        self.packet_buffer.consume()
    }

    /// Runs one step of the state machine: reads at most one byte from the transport and
    /// advances packet reassembly. All link errors are recovered here by resynchronizing on
    /// the next start token; nothing is surfaced to the caller.
    pub fn run(&mut self) {
        match self.state {
            State::WaitingForPacket => {
                let mut byte = [0u8; 1];
                if self.byte_stream.read(&mut byte) < 1 {
                    return;
                }
                if byte[0] == START_TOKEN {
                    self.restart_header();
                }
            }

            State::ReadingHeader => {
                if self.current_field_read_bytes >= HEADER_LENGTH {
                    self.finish_header();
                    return;
                }
                let mut byte = [0u8; 1];
                if self.byte_stream.read(&mut byte) < 1 {
                    return;
                }
                self.incoming_header[self.current_field_read_bytes] = byte[0];
                self.current_field_read_bytes += 1;
                if byte[0] == START_TOKEN {
                    // Must be a new packet after a link interruption; priority takeover is
                    // not legal mid-header.
                    self.restart_header();
                    return;
                }
                if byte[0] == SPECIAL_TOKEN {
                    // Malformed packet.
                    self.state = State::WaitingForPacket;
                }
            }

            State::ReadingContent => {
                let priority = self.incoming_priority();
                let length = self.packet_buffer.reserved_value(priority).length();
                if self.current_field_read_bytes >= length {
                    self.state = State::ReadingFooter;
                    self.current_field_read_bytes = 0;
                    return;
                }
                let mut byte = [0u8; 1];
                if self.byte_stream.read(&mut byte) < 1 {
                    return;
                }
                let packet = self.packet_buffer.reserved_value(priority);
                packet.raw_mut()[HEADER_LENGTH + self.current_field_read_bytes] = byte[0];
                self.current_field_read_bytes += 1;
                if byte[0] == START_TOKEN {
                    if self.current_field_read_bytes < length {
                        // It is a content byte if the next byte is a special token.
                        self.state = State::DisambiguatingStartTokenInContent;
                    } else {
                        // A last content byte equal to the start token cannot be escaped, so
                        // a well-formed sender never produces one: this must open a new
                        // packet, either after a link interruption or with higher priority.
                        self.restart_header();
                    }
                }
            }

            State::DisambiguatingStartTokenInContent => {
                let priority = self.incoming_priority();
                let mut byte = [0u8; 1];
                if self.byte_stream.read(&mut byte) < 1 {
                    return;
                }
                let packet = self.packet_buffer.reserved_value(priority);
                packet.raw_mut()[HEADER_LENGTH + self.current_field_read_bytes] = byte[0];
                self.current_field_read_bytes += 1;
                if byte[0] == SPECIAL_TOKEN {
                    // Not a start of frame: an escaped content byte. The pair is collapsed
                    // later, in prepare_to_read.
                    self.state = State::ReadingContent;
                } else if byte[0] == START_TOKEN {
                    // Either a packet after a link interruption or a higher-priority
                    // takeover. Assume a well-designed transmitter and try the latter.
                    self.restart_header();
                } else {
                    // The previous start token opened a new header and this is its second
                    // byte.
                    self.incoming_header[0] = START_TOKEN;
                    self.incoming_header[1] = byte[0];
                    self.current_field_read_bytes = 2;
                    self.state = State::ReadingHeader;
                }
            }

            State::ReadingFooter => {
                let priority = self.incoming_priority();
                let length = self.packet_buffer.reserved_value(priority).length();
                if self.current_field_read_bytes >= FOOTER_LENGTH {
                    self.state = State::WaitingForPacket;
                    return;
                }
                let mut byte = [0u8; 1];
                if self.byte_stream.read(&mut byte) < 1 {
                    return;
                }
                let packet = self.packet_buffer.reserved_value(priority);
                packet.raw_mut()[HEADER_LENGTH + length + self.current_field_read_bytes] = byte[0];
                self.current_field_read_bytes += 1;
                if byte[0] == START_TOKEN {
                    // New packet after an interruption; takeover is not legal mid-footer.
                    self.restart_header();
                    return;
                }
                if byte[0] == SPECIAL_TOKEN {
                    // Malformed packet.
                    self.state = State::WaitingForPacket;
                    return;
                }
                if self.current_field_read_bytes >= FOOTER_LENGTH {
                    let packet = self.packet_buffer.reserved_value(priority);
                    if packet.prepare_to_read().is_ok() {
                        self.packet_buffer.commit(priority);
                    }
                    self.state = State::WaitingForPacket;
                }
            }
        }
    }

    fn restart_header(&mut self) {
        self.incoming_header[0] = START_TOKEN;
        self.current_field_read_bytes = 1;
        self.state = State::ReadingHeader;
    }

    #[inline]
    fn incoming_priority(&self) -> P2pPriority {
        // finish_header only leaves the header states with a validated priority byte.
        P2pPriority::from_wire(self.incoming_header[OFFSET_PRIORITY]).unwrap_or(P2pPriority::Low)
    }

    /// Completes header reception: routes the header to a packet slot at its priority, either
    /// as a fresh packet or as the continuation of a stored partial one.
    fn finish_header(&mut self) {
        let Some(priority) = P2pPriority::from_wire(self.incoming_header[OFFSET_PRIORITY]) else {
            // Not a priority this side speaks; drop until the next frame.
            self.state = State::WaitingForPacket;
            return;
        };
        let is_continuation = self.incoming_header[OFFSET_IS_CONTINUATION] != 0;
        let incoming_length = u16::from_le_bytes([
            self.incoming_header[OFFSET_LENGTH],
            self.incoming_header[OFFSET_LENGTH + 1],
        ]) as usize;

        if incoming_length > MAX_CONTENT_LENGTH
            || self.packet_buffer.size(priority) >= self.packet_buffer.capacity()
        {
            // Oversized frame, or no slot to put it in: the receiver is best-effort.
            self.state = State::WaitingForPacket;
            return;
        }

        if !is_continuation {
            let packet = self.packet_buffer.reserved_value(priority);
            packet.raw_mut()[..HEADER_LENGTH].copy_from_slice(&self.incoming_header);
            self.current_field_read_bytes = 0;
            self.state = State::ReadingContent;
            return;
        }

        // The length field of a continuation is the remaining length. It belongs to the
        // stored partial packet only if the sequence numbers agree and it does not claim
        // more bytes than the packet has.
        let incoming_sequence_number = u32::from_le_bytes([
            self.incoming_header[OFFSET_SEQUENCE_NUMBER],
            self.incoming_header[OFFSET_SEQUENCE_NUMBER + 1],
            self.incoming_header[OFFSET_SEQUENCE_NUMBER + 2],
            self.incoming_header[OFFSET_SEQUENCE_NUMBER + 3],
        ]);
        let packet = self.packet_buffer.reserved_value(priority);
        if incoming_sequence_number != packet.sequence_number()
            || incoming_length > packet.length()
        {
            // This continuation does not belong to the packet in store. There must have
            // been a link interruption: resynchronize.
            self.state = State::WaitingForPacket;
            return;
        }
        // Keep receiving content where the packet left off.
        self.current_field_read_bytes = packet.length() - incoming_length;
        self.state = State::ReadingContent;
    }
}
