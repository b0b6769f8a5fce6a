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

use crate::api::Options;
use crate::api::SocketTime;
use crate::api::handover::ConnectionHandoverState;
use crate::api::handover::HandoverReadiness;
use crate::packet::sack_chunk;
use crate::packet::sack_chunk::GapAckBlock;
use crate::packet::sack_chunk::SackChunk;
use crate::timer::BackoffAlgorithm;
use crate::timer::Timer;
use crate::types::Tsn;
use crate::types::TsnUnwrapper;
use crate::types::UnwrappedTsn;
use std::cmp::max;
use std::cmp::min;
use std::time::Duration;

/// How far beyond the cumulative ack point received data may be. Anything further away is
/// dropped, which forces the peer to fill the gaps first.
const MAX_ACCEPTED_OUTSTANDING_FRAGMENTS: u64 = 100000;

const MAX_DUPLICATE_TSN_REPORTED: usize = 20;

const MAX_GAP_ACK_BLOCKS_REPORTED: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq)]
enum AckState {
    /// No need to send an ACK.
    Idle,

    /// Has received data chunks, but not yet the end of the packet.
    BecomingDelayed,

    /// Has received data chunks and the end of a packet. The delayed ack timer is running.
    Delayed,

    /// Send a SACK as soon as possible.
    Immediate,
}

/// A range of received TSNs, both ends included.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TsnBlock {
    first: UnwrappedTsn,
    last: UnwrappedTsn,
}

/// Keeps track of received DATA chunks and decides when SACKs are sent and what they contain.
///
/// It only looks at TSNs, never at streams. SACKs are sent for every second packet while there is
/// no packet loss, and for every packet while there are gaps. Otherwise a delayed ack timer of
/// RTO/2 (but at most [`Options::delayed_ack_max_timeout`]) makes sure all data gets acked.
pub(crate) struct DataTracker {
    seen_packet: bool,
    ack_state: AckState,
    tsn_unwrapper: TsnUnwrapper,

    /// All TSNs up to and including this one have been received.
    last_cumulative_acked_tsn: UnwrappedTsn,

    /// Sorted, and never adjacent to each other or to `last_cumulative_acked_tsn`.
    additional_tsn_blocks: Vec<TsnBlock>,

    duplicates: Vec<Tsn>,
    delayed_ack_timer: Timer,
    delayed_ack_max_timeout: Duration,
}

impl DataTracker {
    pub fn new(peer_initial_tsn: Tsn, options: &Options) -> DataTracker {
        let mut tsn_unwrapper = TsnUnwrapper::new();
        let last_cumulative_acked_tsn = tsn_unwrapper.unwrap(peer_initial_tsn - 1);
        DataTracker {
            seen_packet: false,
            ack_state: AckState::Idle,
            tsn_unwrapper,
            last_cumulative_acked_tsn,
            additional_tsn_blocks: Vec::new(),
            duplicates: Vec::new(),
            delayed_ack_timer: Timer::new(
                "delayed-ack",
                min(options.rto_initial / 2, options.delayed_ack_max_timeout),
                BackoffAlgorithm::Fixed,
                Some(0),
                None,
            ),
            delayed_ack_max_timeout: options.delayed_ack_max_timeout,
        }
    }

    pub fn update_rto(&mut self, rto: Duration) {
        self.delayed_ack_timer.set_duration(min(rto / 2, self.delayed_ack_max_timeout));
    }

    pub fn next_timeout(&self) -> Option<SocketTime> {
        self.delayed_ack_timer.next_expiry()
    }

    pub fn last_cumulative_acked_tsn(&self) -> Tsn {
        self.last_cumulative_acked_tsn.wrap()
    }

    /// Returns true if `tsn` is close enough to the cumulative ack point to be accepted.
    ///
    /// Old TSNs are valid too, as they must be reported as duplicates.
    pub fn is_tsn_valid(&self, tsn: Tsn) -> bool {
        let tsn = self.tsn_unwrapper.peek_without_update(tsn);
        self.last_cumulative_acked_tsn.difference(tsn).unsigned_abs()
            <= MAX_ACCEPTED_OUTSTANDING_FRAGMENTS
    }

    /// Returns true if `tsn` is later than the cumulative ack point, i.e. when there is data up
    /// to `tsn` that hasn't been received yet.
    pub fn is_later_than_cumulative_acked_tsn(&self, tsn: Tsn) -> bool {
        self.tsn_unwrapper.peek_without_update(tsn) > self.last_cumulative_acked_tsn
    }

    fn add_duplicate(&mut self, tsn: UnwrappedTsn) {
        if self.duplicates.len() < MAX_DUPLICATE_TSN_REPORTED {
            self.duplicates.push(tsn.wrap());
        }
    }

    /// Adds a TSN that isn't directly following the cumulative ack point. Returns false if it had
    /// already been received.
    fn add_additional_tsn(&mut self, tsn: UnwrappedTsn) -> bool {
        let blocks = &mut self.additional_tsn_blocks;
        let idx = blocks.partition_point(|b| b.last < tsn);
        if blocks.get(idx).is_some_and(|b| b.first <= tsn) {
            return false;
        }

        let extends_prev = idx > 0 && blocks[idx - 1].last.next_value() == tsn;
        let extends_next = blocks.get(idx).is_some_and(|b| b.first == tsn.next_value());
        match (extends_prev, extends_next) {
            (true, true) => {
                blocks[idx - 1].last = blocks[idx].last;
                blocks.remove(idx);
            }
            (true, false) => blocks[idx - 1].last = tsn,
            (false, true) => blocks[idx].first = tsn,
            (false, false) => blocks.insert(idx, TsnBlock { first: tsn, last: tsn }),
        }
        true
    }

    /// Moves the cumulative ack point over the first block, if it's now adjacent.
    fn merge_first_block(&mut self) {
        if let Some(first) = self.additional_tsn_blocks.first() {
            if first.first == self.last_cumulative_acked_tsn.next_value() {
                self.last_cumulative_acked_tsn = first.last;
                self.additional_tsn_blocks.remove(0);
            }
        }
    }

    /// Call for every incoming DATA chunk, after [`DataTracker::is_tsn_valid`]. Returns true if
    /// `tsn` is seen for the first time, and false for duplicates.
    pub fn observe(&mut self, now: SocketTime, tsn: Tsn) -> bool {
        debug_assert!(self.is_tsn_valid(tsn));
        let tsn = self.tsn_unwrapper.unwrap(tsn);

        let is_new = if tsn <= self.last_cumulative_acked_tsn {
            false
        } else if tsn == self.last_cumulative_acked_tsn.next_value() {
            self.last_cumulative_acked_tsn = tsn;
            self.merge_first_block();
            true
        } else {
            self.add_additional_tsn(tsn)
        };

        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2>:
        //
        //   When a packet arrives with duplicate DATA chunk(s) and with no new DATA chunk(s), the
        //   endpoint MUST immediately send a SACK with no delay.
        if !is_new {
            self.add_duplicate(tsn);
            self.update_ack_state(now, AckState::Immediate);
        }

        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.7>:
        //
        //   If the endpoint detects a gap in the received DATA chunk sequence, it SHOULD send a
        //   SACK with Gap Ack Blocks immediately.
        if !self.additional_tsn_blocks.is_empty() {
            self.update_ack_state(now, AckState::Immediate);
        }

        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.1-8>:
        //
        //   After the reception of the first DATA chunk in an association, the endpoint MUST
        //   immediately respond with a SACK chunk to acknowledge the DATA chunk.
        if !self.seen_packet {
            self.seen_packet = true;
            self.update_ack_state(now, AckState::Immediate);
        }

        self.ack_one_more_packet(now);
        is_new
    }

    // An acknowledgement SHOULD be generated for at least every second packet.
    fn ack_one_more_packet(&mut self, now: SocketTime) {
        match self.ack_state {
            AckState::Idle => self.update_ack_state(now, AckState::BecomingDelayed),
            AckState::Delayed => self.update_ack_state(now, AckState::Immediate),
            AckState::BecomingDelayed | AckState::Immediate => {}
        }
    }

    /// Called for incoming FORWARD-TSN and I-FORWARD-TSN chunks. Returns false if the chunk was
    /// out of date and had no effect.
    pub fn handle_forward_tsn(&mut self, now: SocketTime, new_cumulative_tsn: Tsn) -> bool {
        let new_cumulative_tsn = self.tsn_unwrapper.unwrap(new_cumulative_tsn);

        // From <https://datatracker.ietf.org/doc/html/rfc3758#section-3.6>:
        //
        //   If the "New Cumulative TSN" value carried in the arrived FORWARD TSN chunk is found to
        //   be behind or at the current cumulative TSN point, the data receiver MUST treat this
        //   FORWARD TSN as out-of-date and MUST NOT update its Cumulative TSN. The receiver SHOULD
        //   send a SACK to its peer.
        if new_cumulative_tsn <= self.last_cumulative_acked_tsn {
            self.update_ack_state(now, AckState::Immediate);
            return false;
        }

        self.last_cumulative_acked_tsn = new_cumulative_tsn;
        self.additional_tsn_blocks.retain_mut(|b| {
            b.first = max(b.first, new_cumulative_tsn.next_value());
            b.last > new_cumulative_tsn
        });
        self.merge_first_block();

        // Any time a FORWARD TSN chunk arrives, the delayed SACK rules apply as for DATA.
        self.ack_one_more_packet(now);
        true
    }

    /// Creates a SACK, which must be sent as the reported duplicates are forgotten.
    pub fn create_selective_ack(&mut self, a_rwnd: u32, max_size: usize) -> SackChunk {
        // Gap ack blocks and duplicate TSNs that don't fit are left out.
        let mut room = max_size.saturating_sub(sack_chunk::MIN_SIZE) / 4;
        let cumulative_tsn_ack = self.last_cumulative_acked_tsn;
        let gap_ack_blocks: Vec<GapAckBlock> = self
            .additional_tsn_blocks
            .iter()
            .take(min(MAX_GAP_ACK_BLOCKS_REPORTED, room))
            .filter_map(|b| {
                let start = u16::try_from(cumulative_tsn_ack.difference(b.first)).ok()?;
                let end = u16::try_from(cumulative_tsn_ack.difference(b.last)).ok()?;
                Some(GapAckBlock::new(start, end))
            })
            .collect();
        room -= gap_ack_blocks.len();

        let mut duplicate_tsns = std::mem::take(&mut self.duplicates);
        duplicate_tsns.truncate(room);

        SackChunk {
            cumulative_tsn_ack: cumulative_tsn_ack.wrap(),
            a_rwnd,
            gap_ack_blocks,
            duplicate_tsns,
        }
    }

    /// Returns true if a SACK should be sent now, and if so, expects it to be sent.
    ///
    /// With `also_if_delayed`, a SACK that would otherwise be delayed is sent as well, which is
    /// used when DATA is sent anyway.
    pub fn should_send_ack(&mut self, now: SocketTime, also_if_delayed: bool) -> bool {
        let send = match self.ack_state {
            AckState::Immediate => true,
            AckState::BecomingDelayed | AckState::Delayed => also_if_delayed,
            AckState::Idle => false,
        };
        if send {
            self.update_ack_state(now, AckState::Idle);
        }
        send
    }

    pub fn handle_timeout(&mut self, now: SocketTime) {
        if self.delayed_ack_timer.expire(now) {
            log::debug!("Delayed ack timer expired");
            self.update_ack_state(now, AckState::Immediate);
        }
    }

    /// Called when all chunks of a received packet have been handled.
    pub fn observe_packet_end(&mut self, now: SocketTime) {
        if self.ack_state == AckState::BecomingDelayed {
            self.update_ack_state(now, AckState::Delayed);
        }
    }

    fn update_ack_state(&mut self, now: SocketTime, new_state: AckState) {
        if self.ack_state == new_state {
            return;
        }
        if self.ack_state == AckState::Delayed {
            self.delayed_ack_timer.stop();
        } else if new_state == AckState::Delayed {
            self.delayed_ack_timer.start(now);
        }
        self.ack_state = new_state;
    }

    pub fn get_handover_readiness(&self) -> HandoverReadiness {
        HandoverReadiness::DATA_TRACKER_TSN_BLOCKS_PENDING & !self.additional_tsn_blocks.is_empty()
    }

    pub fn add_to_handover_state(&self, state: &mut ConnectionHandoverState) {
        state.rx.last_cumulative_acked_tsn = self.last_cumulative_acked_tsn.wrap().0;
        state.rx.seen_packet = self.seen_packet;
    }

    pub fn restore_from_state(&mut self, state: &ConnectionHandoverState) {
        debug_assert!(self.additional_tsn_blocks.is_empty());
        debug_assert!(!self.seen_packet);

        self.tsn_unwrapper.reset();
        self.last_cumulative_acked_tsn =
            self.tsn_unwrapper.unwrap(Tsn(state.rx.last_cumulative_acked_tsn));
        self.seen_packet = state.rx.seen_packet;
    }
}
