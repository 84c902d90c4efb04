// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Result-or-error sum type shared by the packet stream APIs.

/// Error half of [`StatusOr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// No packet to read, no buffer space to write, or an idle transport.
    Unavailable,
    /// Escape violation, unexpected reserved token, or checksum mismatch.
    Malformed,
}

/// Outcome of an operation that produces a `ValueType` or fails with a [`Status`].
pub type StatusOr<ValueType> = Result<ValueType, Status>;
