// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Transmitting state machine of the P2P packet stream.
//!
//! Committed packets are sent highest priority first, FIFO within a priority. Writes are
//! paced in bursts sized to what the peer can ingest at once; between bursts the machine may
//! suspend the packet in flight in favor of a newly committed higher-priority one, resuming
//! it later with a continuation frame. Suspension only ever happens at a content byte
//! boundary, never mid-header or mid-footer.

use crate::p2p::buffer::PriorityRingBuffer;
use crate::p2p::byte_stream::P2pByteStream;
use crate::p2p::packet::{P2pMutablePacketView, P2pPacket, P2pPriority};
use crate::p2p::wire::{
    next_sequence_number, FOOTER_LENGTH, HEADER_LENGTH, MAX_PACKET_LENGTH,
    OFFSET_IS_CONTINUATION, OFFSET_LENGTH, OFFSET_SEQUENCE_NUMBER,
};
use crate::status::{Status, StatusOr};

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    GettingNextPacket,
    SendingBurst,
    WaitingForBurstIngestion,
}

/// Serializes committed packets onto a byte transport, in priority order and paced in bursts.
///
/// `CAPACITY` is the number of packet slots per priority level. Drive the machine by calling
/// [`run`](Self::run) with the current monotonic time; the return value is the minimum number
/// of nanoseconds the caller may sleep before calling again (0 when more work is possible
/// right away).
pub struct P2pPacketOutputStream<ByteStream: P2pByteStream, const CAPACITY: usize> {
    packet_buffer: PriorityRingBuffer<P2pPacket, CAPACITY>,
    byte_stream: ByteStream,
    state: State,
    current_sequence_number: u32,
    // Wire image of the transmission in flight.
    transmission: [u8; MAX_PACKET_LENGTH],
    total_packet_length: usize,
    pending_packet_bytes: usize,
    pending_burst_bytes: usize,
    burst_end_timestamp_ns: u64,
    current_priority: P2pPriority,
    // Content bytes of the front packet of each level already on the wire; nonzero only for
    // packets suspended by a higher-priority takeover.
    content_bytes_sent: [usize; P2pPriority::NUM_LEVELS],
}

impl<ByteStream: P2pByteStream, const CAPACITY: usize>
    P2pPacketOutputStream<ByteStream, CAPACITY>
{
    /// Takes ownership of the write side of the transport. Only one packet stream may be
    /// associated with a byte stream at a time.
    pub fn new(byte_stream: ByteStream) -> Self {
        Self {
            packet_buffer: PriorityRingBuffer::new(),
            byte_stream,
            state: State::GettingNextPacket,
            current_sequence_number: 0,
            transmission: [0u8; MAX_PACKET_LENGTH],
            total_packet_length: 0,
            pending_packet_bytes: 0,
            pending_burst_bytes: 0,
            burst_end_timestamp_ns: 0,
            current_priority: P2pPriority::Low,
            content_bytes_sent: [0; P2pPriority::NUM_LEVELS],
        }
    }

    /// Number of packet slots still available for writing at `priority`.
    pub fn num_available_slots(&self, priority: P2pPriority) -> usize {
        self.packet_buffer.capacity() - self.packet_buffer.size(priority)
    }

    /// A mutable view of a new packet at `priority`, or `Unavailable` if the level is full.
    /// The packet is not sent until [`commit`](Self::commit) is called for the same priority.
    pub fn new_packet(&mut self, priority: P2pPriority) -> StatusOr<P2pMutablePacketView<'_>> {
        if self.num_available_slots(priority) == 0 {
            return Err(Status::Unavailable);
        }
        Ok(P2pMutablePacketView::new(
            self.packet_buffer.reserved_value(priority),
        ))
    }

    /// Finalizes the reserved packet at `priority`: assigns the stream's sequence number,
    /// escapes the content, writes the checksum and queues the packet for transmission.
    pub fn commit(&mut self, priority: P2pPriority) -> StatusOr<()> {
        let sequence_number = self.current_sequence_number;
        let packet = self.packet_buffer.reserved_value(priority);
        packet.set_priority(priority);
        packet.set_is_continuation(false);
        packet.set_sequence_number(sequence_number);
        packet.prepare_to_send()?;
        self.current_sequence_number = next_sequence_number(sequence_number);
        if !self.packet_buffer.commit(priority) {
            return Err(Status::Unavailable);
        }
        Ok(())
    }

    /// Runs the stream. Returns the minimum number of nanoseconds the caller may wait before
    /// calling again. Multi-threaded platforms can use the hint to yield time to other
    /// threads; polling sooner is always safe.
    pub fn run(&mut self, timestamp_ns: u64) -> u64 {
        match self.state {
            State::GettingNextPacket => {
                let Some(packet) = self.packet_buffer.oldest_value() else {
                    // No more packets to send: keep waiting for one.
                    return 0;
                };
                let priority = packet.priority();
                let image_length = Self::serialize_transmission(
                    &mut self.transmission,
                    packet,
                    self.content_bytes_sent[priority.index()],
                );
                self.current_priority = priority;
                self.total_packet_length = image_length;

                // The first write happens in the state transition so the ingestion deadline
                // is computed as close to it as possible.
                let burst_length = image_length.min(self.byte_stream.burst_max_length());
                let written_bytes = self.byte_stream.write(&self.transmission[..burst_length]);
                self.burst_end_timestamp_ns = timestamp_ns
                    + written_bytes as u64 * self.byte_stream.burst_ns_per_byte();
                self.pending_packet_bytes = image_length - written_bytes;
                self.pending_burst_bytes = burst_length - written_bytes;
                self.state = State::SendingBurst;
                0
            }

            State::SendingBurst => {
                if self.pending_burst_bytes == 0 {
                    // Burst fully handed to the transport: wait for the peer to ingest it.
                    self.state = State::WaitingForBurstIngestion;
                    return 0;
                }
                let offset = self.total_packet_length - self.pending_packet_bytes;
                let written_bytes = self
                    .byte_stream
                    .write(&self.transmission[offset..offset + self.pending_burst_bytes]);
                self.pending_packet_bytes -= written_bytes;
                self.pending_burst_bytes -= written_bytes;
                // The deadline tracks bytes actually written, so a short write never assumes
                // the peer ingested bytes that were not sent.
                self.burst_end_timestamp_ns +=
                    written_bytes as u64 * self.byte_stream.burst_ns_per_byte();
                0
            }

            State::WaitingForBurstIngestion => {
                if timestamp_ns < self.burst_end_timestamp_ns {
                    // Ingestion time not expired: keep waiting.
                    return self.burst_end_timestamp_ns - timestamp_ns;
                }

                if self.pending_packet_bytes == 0 {
                    // Packet fully ingested: release its slot and move on.
                    self.content_bytes_sent[self.current_priority.index()] = 0;
                    self.packet_buffer.consume_priority(self.current_priority);
                    self.state = State::GettingNextPacket;
                    return 0;
                }

                if self.should_yield_to_higher_priority() {
                    // Record how much content is already out so the packet can resume as a
                    // continuation, then let the next pick find the higher-priority packet.
                    let bytes_sent = self.total_packet_length - self.pending_packet_bytes;
                    self.content_bytes_sent[self.current_priority.index()] +=
                        bytes_sent - HEADER_LENGTH;
                    self.state = State::GettingNextPacket;
                    return 0;
                }

                // Send the next burst.
                self.state = State::SendingBurst;
                self.pending_burst_bytes = self
                    .pending_packet_bytes
                    .min(self.byte_stream.burst_max_length());
                let offset = self.total_packet_length - self.pending_packet_bytes;
                let written_bytes = self
                    .byte_stream
                    .write(&self.transmission[offset..offset + self.pending_burst_bytes]);
                self.burst_end_timestamp_ns = timestamp_ns
                    + written_bytes as u64 * self.byte_stream.burst_ns_per_byte();
                self.pending_packet_bytes -= written_bytes;
                self.pending_burst_bytes -= written_bytes;
                0
            }
        }
    }

    /// True when a strictly-higher-priority packet is pending and the transmission in flight
    /// can legally be cut here: the header is fully out and at least one content byte is not,
    /// so the cut lands on a content byte boundary.
    fn should_yield_to_higher_priority(&self) -> bool {
        let bytes_sent = self.total_packet_length - self.pending_packet_bytes;
        let content_end = self.total_packet_length - FOOTER_LENGTH;
        if bytes_sent < HEADER_LENGTH || bytes_sent >= content_end {
            return false;
        }
        match self.packet_buffer.oldest_value() {
            Some(packet) => packet.priority() > self.current_priority,
            None => false,
        }
    }

    /// Builds the wire image of the front packet's next transmission. With no content on the
    /// wire yet this is the packet as stored; otherwise it is a continuation frame: a header
    /// with the continuation flag and the remaining length, the remaining content, and the
    /// original footer.
    fn serialize_transmission(
        transmission: &mut [u8; MAX_PACKET_LENGTH],
        packet: &P2pPacket,
        content_bytes_sent: usize,
    ) -> usize {
        let length = packet.length();
        if content_bytes_sent == 0 {
            let image_length = packet.wire_length();
            transmission[..image_length].copy_from_slice(&packet.raw()[..image_length]);
            return image_length;
        }

        let remaining_length = length - content_bytes_sent;
        transmission[..HEADER_LENGTH].copy_from_slice(&packet.raw()[..HEADER_LENGTH]);
        transmission[OFFSET_LENGTH..OFFSET_LENGTH + 2]
            .copy_from_slice(&(remaining_length as u16).to_le_bytes());
        transmission[OFFSET_IS_CONTINUATION] = 1;
        transmission[OFFSET_SEQUENCE_NUMBER..OFFSET_SEQUENCE_NUMBER + 4]
            .copy_from_slice(&packet.sequence_number().to_le_bytes());
        let content_and_footer =
            &packet.raw()[HEADER_LENGTH + content_bytes_sent..HEADER_LENGTH + length + FOOTER_LENGTH];
        transmission[HEADER_LENGTH..HEADER_LENGTH + content_and_footer.len()]
            .copy_from_slice(content_and_footer);
        HEADER_LENGTH + content_and_footer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::wire::START_TOKEN;
    use std::cell::RefCell;
    use std::rc::Rc;

    const BURST_MAX_LENGTH: usize = 42;
    const BURST_NS_PER_BYTE: u64 = 250_000;

    /// Transport stub capturing everything written to it.
    #[derive(Clone, Default)]
    struct CaptureByteStream {
        written: Rc<RefCell<Vec<u8>>>,
        accept_per_write: Option<usize>,
    }

    impl P2pByteStream for CaptureByteStream {
        fn read(&mut self, _buffer: &mut [u8]) -> usize {
            0
        }

        fn write(&mut self, buffer: &[u8]) -> usize {
            let accepted = match self.accept_per_write {
                Some(limit) => buffer.len().min(limit),
                None => buffer.len(),
            };
            self.written.borrow_mut().extend_from_slice(&buffer[..accepted]);
            accepted
        }

        fn burst_max_length(&self) -> usize {
            BURST_MAX_LENGTH
        }

        fn burst_ns_per_byte(&self) -> u64 {
            BURST_NS_PER_BYTE
        }

        fn atomic_send_max_length(&self) -> usize {
            4
        }
    }

    fn commit_packet<const CAPACITY: usize>(
        stream: &mut P2pPacketOutputStream<CaptureByteStream, CAPACITY>,
        priority: P2pPriority,
        content: &[u8],
    ) {
        let mut packet = stream.new_packet(priority).unwrap();
        packet.content_mut()[..content.len()].copy_from_slice(content);
        packet.set_length(content.len());
        stream.commit(priority).unwrap();
    }

    #[test]
    fn no_packets_returns_immediately() {
        let mut stream = P2pPacketOutputStream::<_, 4>::new(CaptureByteStream::default());
        assert_eq!(stream.run(0), 0);
        assert!(stream.byte_stream.written.borrow().is_empty());
    }

    #[test]
    fn short_packet_is_one_burst() {
        let capture = CaptureByteStream::default();
        let mut stream = P2pPacketOutputStream::<_, 4>::new(capture.clone());
        commit_packet(&mut stream, P2pPriority::Medium, &[1, 2, 3, 4]);

        assert_eq!(stream.run(0), 0); // GettingNextPacket: writes the whole image
        let wire_length = HEADER_LENGTH + 4 + FOOTER_LENGTH;
        assert_eq!(capture.written.borrow().len(), wire_length);
        assert_eq!(stream.run(0), 0); // SendingBurst -> WaitingForBurstIngestion
        let expected_wait = wire_length as u64 * BURST_NS_PER_BYTE;
        assert_eq!(stream.run(0), expected_wait);
        assert_eq!(stream.run(expected_wait / 2), expected_wait - expected_wait / 2);
        assert_eq!(stream.run(expected_wait), 0); // consumed
        assert_eq!(stream.num_available_slots(P2pPriority::Medium), 4);
        assert_eq!(capture.written.borrow()[0], START_TOKEN);
    }

    #[test]
    fn long_packet_spans_bursts() {
        let capture = CaptureByteStream::default();
        let mut stream = P2pPacketOutputStream::<_, 4>::new(capture.clone());
        let content = [7u8; 100];
        commit_packet(&mut stream, P2pPriority::Low, &content);
        let wire_length = HEADER_LENGTH + 100 + FOOTER_LENGTH;

        let mut now_ns = 0u64;
        for _ in 0..64 {
            let wait_ns = stream.run(now_ns);
            now_ns += wait_ns.max(1);
            if stream.num_available_slots(P2pPriority::Low) == 4
                && capture.written.borrow().len() == wire_length
            {
                break;
            }
        }
        assert_eq!(capture.written.borrow().len(), wire_length);
        assert_eq!(stream.num_available_slots(P2pPriority::Low), 4);
    }

    #[test]
    fn short_writes_extend_the_deadline() {
        let capture = CaptureByteStream {
            accept_per_write: Some(10),
            ..Default::default()
        };
        let mut stream = P2pPacketOutputStream::<_, 4>::new(capture.clone());
        commit_packet(&mut stream, P2pPriority::Medium, &[0u8; 20]);

        assert_eq!(stream.run(0), 0); // first write: 10 of 31 bytes
        assert_eq!(capture.written.borrow().len(), 10);
        // The pacing deadline only covers what was written so far.
        assert_eq!(stream.burst_end_timestamp_ns, 10 * BURST_NS_PER_BYTE);
        assert_eq!(stream.run(0), 0); // 10 more
        assert_eq!(stream.burst_end_timestamp_ns, 20 * BURST_NS_PER_BYTE);
    }

    #[test]
    fn sequence_numbers_advance_per_commit() {
        let mut stream = P2pPacketOutputStream::<_, 4>::new(CaptureByteStream::default());
        commit_packet(&mut stream, P2pPriority::Low, &[1]);
        commit_packet(&mut stream, P2pPriority::Low, &[2]);
        assert_eq!(stream.current_sequence_number, 2);
        for _ in 0..200 {
            stream.current_sequence_number =
                next_sequence_number(stream.current_sequence_number);
        }
        for byte in stream.current_sequence_number.to_le_bytes() {
            assert!(byte < crate::p2p::wire::LOWEST_TOKEN);
        }
    }

    #[test]
    fn oversized_content_fails_commit() {
        let mut stream = P2pPacketOutputStream::<_, 4>::new(CaptureByteStream::default());
        let content = [START_TOKEN; 80]; // escapes to 160 > MAX_CONTENT_LENGTH
        let mut packet = stream.new_packet(P2pPriority::Low).unwrap();
        packet.content_mut()[..content.len()].copy_from_slice(&content);
        packet.set_length(content.len());
        assert_eq!(stream.commit(P2pPriority::Low), Err(Status::Unavailable));
        // Nothing was queued.
        assert_eq!(stream.num_available_slots(P2pPriority::Low), 4);
    }

    #[test]
    fn full_level_reports_unavailable() {
        let mut stream = P2pPacketOutputStream::<_, 1>::new(CaptureByteStream::default());
        commit_packet(&mut stream, P2pPriority::High, &[1]);
        assert!(stream.new_packet(P2pPriority::High).is_err());
        assert!(stream.new_packet(P2pPriority::Low).is_ok());
    }
}
