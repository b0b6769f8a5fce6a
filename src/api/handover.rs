// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connection handover: moving a live connection into a freshly constructed instance, possibly in
//! another process.
//!
//! The state is only exported when [`HandoverReadiness::is_ready`], i.e. when nothing is in flight
//! and nothing is half-way through a protocol exchange. The snapshot is opaque to callers, which
//! may serialize it however they like.

use core::fmt;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandoverCapabilities {
    pub partial_reliability: bool,
    pub message_interleaving: bool,
    pub reconfig: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandoverTransmission {
    pub next_tsn: u32,
    pub next_reset_req_sn: u32,
    pub cwnd: u32,
    pub rwnd: u32,
    pub ssthresh: u32,
    pub partial_bytes_acked: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandoverOrderedStream {
    pub id: u16,
    /// The next MID to deliver, or the next SSN when message interleaving isn't negotiated.
    pub next_mid: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandoverUnorderedStream {
    pub id: u16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandoverReceive {
    pub seen_packet: bool,
    pub last_cumulative_acked_tsn: u32,
    pub last_assembled_tsn: u32,
    pub last_completed_reset_req_sn: u32,
    pub ordered_streams: Vec<HandoverOrderedStream>,
    pub unordered_streams: Vec<HandoverUnorderedStream>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionHandoverState {
    pub my_initial_tsn: u32,
    pub peer_initial_tsn: u32,
    pub capabilities: HandoverCapabilities,
    pub tx: HandoverTransmission,
    pub rx: HandoverReceive,
}

/// A set of reasons for not being ready for handover. Empty means ready.
#[derive(Clone, Copy, PartialEq)]
pub struct HandoverReadiness(pub u32);

impl HandoverReadiness {
    pub const READY: HandoverReadiness = HandoverReadiness(0);
    pub const PENDING_STREAM_RESET_REQUEST: HandoverReadiness = HandoverReadiness(1);
    pub const DATA_TRACKER_TSN_BLOCKS_PENDING: HandoverReadiness = HandoverReadiness(2);
    pub const STREAM_RESET_DEFERRED: HandoverReadiness = HandoverReadiness(4);
    pub const STREAM_HAS_UNASSEMBLED_CHUNKS: HandoverReadiness = HandoverReadiness(8);
    pub const RETRANSMISSION_QUEUE_OUTSTANDING_DATA: HandoverReadiness = HandoverReadiness(16);
    pub const RETRANSMISSION_QUEUE_FAST_RECOVERY: HandoverReadiness = HandoverReadiness(32);
    pub const RETRANSMISSION_QUEUE_NOT_EMPTY: HandoverReadiness = HandoverReadiness(64);

    const NAMES: &[(HandoverReadiness, &str)] = &[
        (Self::PENDING_STREAM_RESET_REQUEST, "pending_stream_reset_request"),
        (Self::DATA_TRACKER_TSN_BLOCKS_PENDING, "data_tracker_tsn_blocks_pending"),
        (Self::STREAM_RESET_DEFERRED, "stream_reset_deferred"),
        (Self::STREAM_HAS_UNASSEMBLED_CHUNKS, "stream_has_unassembled_chunks"),
        (Self::RETRANSMISSION_QUEUE_OUTSTANDING_DATA, "retransmission_queue_outstanding_data"),
        (Self::RETRANSMISSION_QUEUE_FAST_RECOVERY, "retransmission_queue_fast_recovery"),
        (Self::RETRANSMISSION_QUEUE_NOT_EMPTY, "retransmission_queue_not_empty"),
    ];

    pub fn is_ready(&self) -> bool {
        *self == Self::READY
    }

    pub fn contains(&self, reason: HandoverReadiness) -> bool {
        self.0 & reason.0 != 0
    }
}

impl fmt::Display for HandoverReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ready() {
            return write!(f, "ready");
        }
        let reasons: Vec<_> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", reasons.join(","))
    }
}

impl fmt::Debug for HandoverReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::ops::BitOr for HandoverReadiness {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// `reason & condition` is `reason` if the condition holds, and [`HandoverReadiness::READY`]
/// otherwise.
impl std::ops::BitAnd<bool> for HandoverReadiness {
    type Output = Self;

    fn bitand(self, rhs: bool) -> Self::Output {
        if rhs { self } else { HandoverReadiness::READY }
    }
}
