// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Application-level commands carried in P2P packet content.
//!
//! Each content payload starts with a one-byte command identifier. The only commands defined
//! so far implement clock synchronization between the MCU and the host: each side timestamps
//! a shared sync edge and exchanges the readings.

use crate::status::{Status, StatusOr};

/// Command identifier: time sync request (host -> MCU).
pub const COMMAND_TIME_SYNC_REQUEST: u8 = 1;
/// Command identifier: time sync reply (MCU -> host).
pub const COMMAND_TIME_SYNC_REPLY: u8 = 2;

const TIMESTAMP_LENGTH: usize = 8;

/// Wire size of an encoded command.
pub const COMMAND_LENGTH: usize = 1 + TIMESTAMP_LENGTH;

/// An application command, decoded from or encoded into packet content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    TimeSyncRequest { sync_edge_local_timestamp_ns: u64 },
    TimeSyncReply { sync_edge_local_timestamp_ns: u64 },
}

impl Command {
    /// Encodes the command at the start of `content`. Returns the number of bytes written,
    /// or `Unavailable` if the buffer is too small.
    pub fn encode(&self, content: &mut [u8]) -> StatusOr<usize> {
        if content.len() < COMMAND_LENGTH {
            return Err(Status::Unavailable);
        }
        let (command, timestamp_ns) = match *self {
            Command::TimeSyncRequest {
                sync_edge_local_timestamp_ns,
            } => (COMMAND_TIME_SYNC_REQUEST, sync_edge_local_timestamp_ns),
            Command::TimeSyncReply {
                sync_edge_local_timestamp_ns,
            } => (COMMAND_TIME_SYNC_REPLY, sync_edge_local_timestamp_ns),
        };
        content[0] = command;
        content[1..COMMAND_LENGTH].copy_from_slice(&timestamp_ns.to_le_bytes());
        Ok(COMMAND_LENGTH)
    }

    /// Decodes a command from packet content. `Malformed` on an unknown command identifier
    /// or a truncated payload.
    pub fn decode(content: &[u8]) -> StatusOr<Command> {
        if content.len() < COMMAND_LENGTH {
            return Err(Status::Malformed);
        }
        let mut timestamp_bytes = [0u8; TIMESTAMP_LENGTH];
        timestamp_bytes.copy_from_slice(&content[1..COMMAND_LENGTH]);
        let sync_edge_local_timestamp_ns = u64::from_le_bytes(timestamp_bytes);
        match content[0] {
            COMMAND_TIME_SYNC_REQUEST => Ok(Command::TimeSyncRequest {
                sync_edge_local_timestamp_ns,
            }),
            COMMAND_TIME_SYNC_REPLY => Ok(Command::TimeSyncReply {
                sync_edge_local_timestamp_ns,
            }),
            _ => Err(Status::Malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let command = Command::TimeSyncRequest {
            sync_edge_local_timestamp_ns: 0x0102_0304_0506_0708,
        };
        let mut content = [0u8; COMMAND_LENGTH];
        assert_eq!(command.encode(&mut content), Ok(COMMAND_LENGTH));
        assert_eq!(Command::decode(&content), Ok(command));
    }

    #[test]
    fn known_layout() {
        let command = Command::TimeSyncReply {
            sync_edge_local_timestamp_ns: 1,
        };
        let mut content = [0u8; COMMAND_LENGTH];
        command.encode(&mut content).unwrap();
        assert_eq!(content, [COMMAND_TIME_SYNC_REPLY, 1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn rejects_unknown_command() {
        let content = [0x7Fu8; COMMAND_LENGTH];
        assert_eq!(Command::decode(&content), Err(Status::Malformed));
    }

    #[test]
    fn rejects_truncated_payload() {
        assert_eq!(
            Command::decode(&[COMMAND_TIME_SYNC_REQUEST, 1, 2]),
            Err(Status::Malformed)
        );
    }
}
