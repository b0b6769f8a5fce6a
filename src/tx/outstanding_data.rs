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

use crate::api::SocketTime;
use crate::api::StreamId;
use crate::math::round_up_to_4;
use crate::packet::SkippedStream;
use crate::packet::data::Data;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::iforward_tsn_chunk::IForwardTsnChunk;
use crate::packet::sack_chunk::GapAckBlock;
use crate::types::Mid;
use crate::types::OutgoingMessageId;
use crate::types::Ssn;
use crate::types::StreamKey;
use crate::types::Tsn;
use crate::types::UnwrappedTsn;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;

/// The number of miss indications before a chunk is considered lost, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.4-5.1.1>.
const NUMBER_OF_NACKS_FOR_RETRANSMISSION: u8 = 3;

/// The state of a sent DATA chunk, as seen by the sender.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChunkState {
    /// Sent, and not referenced by any SACK yet.
    InFlight,

    /// Reported missing by at least one SACK, but not often enough to be retransmitted.
    Nacked,

    /// Considered lost and waiting to be sent again.
    ToBeRetransmitted,

    /// Reported as received in a gap ack block. It may still be reneged.
    Acked,

    /// Expired or retransmitted too many times. It will never be sent again, and the peer is
    /// told to skip it with a FORWARD-TSN.
    Abandoned,
}

impl ChunkState {
    /// Counts against the congestion window.
    fn is_in_flight(self) -> bool {
        self == ChunkState::InFlight
    }

    /// Counts as outstanding: sent, and neither acked nor abandoned.
    fn is_outstanding(self) -> bool {
        matches!(self, ChunkState::InFlight | ChunkState::Nacked | ChunkState::ToBeRetransmitted)
    }
}

#[derive(Debug, PartialEq)]
enum NackAction {
    Nothing,
    Retransmit,
    Abandon,
}

/// What a SACK did to the outstanding data.
#[derive(Debug)]
pub(crate) struct AckInfo {
    /// Bytes newly acked, by the cumulative ack and by gap ack blocks.
    pub bytes_acked: usize,

    /// Set when a chunk was reported missing often enough to be considered lost.
    pub has_packet_loss: bool,

    /// Highest TSN Newly Acknowledged (HTNA).
    pub highest_tsn_acked: UnwrappedTsn,
}

/// A sent DATA chunk and its partial reliability parameters.
#[derive(Debug)]
struct TxData {
    message_id: OutgoingMessageId,
    data: Data,
    state: ChunkState,
    nack_count: u8,
    num_retransmissions: u16,
    max_retransmissions: Option<u16>,
    time_sent: SocketTime,
    expires_at: Option<SocketTime>,
    size: usize,
}

impl TxData {
    fn has_expired(&self, now: SocketTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    fn nack(&mut self, retransmit_now: bool) -> NackAction {
        match self.state {
            ChunkState::ToBeRetransmitted | ChunkState::Abandoned => return NackAction::Nothing,
            ChunkState::InFlight | ChunkState::Nacked | ChunkState::Acked => {}
        }
        self.state = ChunkState::Nacked;
        self.nack_count = self.nack_count.saturating_add(1);
        if !retransmit_now && self.nack_count < NUMBER_OF_NACKS_FOR_RETRANSMISSION {
            return NackAction::Nothing;
        }
        if self.max_retransmissions.is_none_or(|max| self.num_retransmissions < max) {
            self.state = ChunkState::ToBeRetransmitted;
            NackAction::Retransmit
        } else {
            self.state = ChunkState::Abandoned;
            NackAction::Abandon
        }
    }

    fn mark_as_retransmitted(&mut self) {
        self.state = ChunkState::InFlight;
        self.nack_count = 0;
        self.num_retransmissions = self.num_retransmissions.saturating_add(1);
    }
}

/// Byte and item counters, kept in sync with the chunk states.
#[derive(Debug, Default)]
struct Accounting {
    unacked_bytes: usize,
    unacked_items: usize,
    outstanding_bytes: usize,
}

impl Accounting {
    fn add(&mut self, state: ChunkState, size: usize) {
        if state.is_in_flight() {
            self.unacked_bytes += size;
            self.unacked_items += 1;
        }
        if state.is_outstanding() {
            self.outstanding_bytes += size;
        }
    }

    fn remove(&mut self, state: ChunkState, size: usize) {
        if state.is_in_flight() {
            debug_assert!(self.unacked_bytes >= size && self.unacked_items > 0);
            self.unacked_bytes = self.unacked_bytes.saturating_sub(size);
            self.unacked_items = self.unacked_items.saturating_sub(1);
        }
        if state.is_outstanding() {
            debug_assert!(self.outstanding_bytes >= size);
            self.outstanding_bytes = self.outstanding_bytes.saturating_sub(size);
        }
    }

    fn transition(&mut self, item: &mut TxData, state: ChunkState) {
        self.remove(item.state, item.size);
        item.state = state;
        self.add(state, item.size);
    }
}

/// Keeps track of sent DATA chunks until they are cumulatively acked, and handles acking,
/// nacking, scheduling retransmissions and abandoning.
///
/// Chunks are keyed by unwrapped TSN, and the keys are always the contiguous range following the
/// last cumulative acked TSN.
#[derive(Debug)]
pub(crate) struct OutstandingData {
    data_chunk_header_size: usize,
    last_cumulative_tsn_ack: UnwrappedTsn,
    next_tsn: UnwrappedTsn,
    items: BTreeMap<UnwrappedTsn, TxData>,
    accounting: Accounting,
    to_be_fast_retransmitted: BTreeSet<UnwrappedTsn>,
    to_be_retransmitted: BTreeSet<UnwrappedTsn>,
    stream_reset_breakpoint_tsns: BTreeSet<UnwrappedTsn>,
    messages_to_discard: Vec<(StreamId, OutgoingMessageId)>,
}

impl OutstandingData {
    pub fn new(data_chunk_header_size: usize, last_cumulative_tsn_ack: UnwrappedTsn) -> Self {
        OutstandingData {
            data_chunk_header_size,
            last_cumulative_tsn_ack,
            next_tsn: last_cumulative_tsn_ack.next_value(),
            items: BTreeMap::new(),
            accounting: Accounting::default(),
            to_be_fast_retransmitted: BTreeSet::new(),
            to_be_retransmitted: BTreeSet::new(),
            stream_reset_breakpoint_tsns: BTreeSet::new(),
            messages_to_discard: Vec::new(),
        }
    }

    fn chunk_size(&self, data: &Data) -> usize {
        round_up_to_4!(self.data_chunk_header_size + data.payload.len())
    }

    /// Recomputes all counters and sets from the chunks and compares them.
    pub(crate) fn is_consistent(&self) -> bool {
        let mut actual = Accounting::default();
        let mut actual_to_be_retransmitted = BTreeSet::new();
        for (tsn, item) in &self.items {
            actual.add(item.state, item.size);
            if item.state == ChunkState::ToBeRetransmitted {
                actual_to_be_retransmitted.insert(*tsn);
            }
        }
        let combined: BTreeSet<UnwrappedTsn> =
            self.to_be_retransmitted.union(&self.to_be_fast_retransmitted).copied().collect();
        let contiguous = self
            .items
            .keys()
            .zip(self.items.keys().skip(1))
            .all(|(a, b)| a.next_value() == *b);

        actual.unacked_bytes == self.accounting.unacked_bytes
            && actual.unacked_items == self.accounting.unacked_items
            && actual.outstanding_bytes == self.accounting.outstanding_bytes
            && actual_to_be_retransmitted == combined
            && contiguous
            && self
                .items
                .first_key_value()
                .is_none_or(|(tsn, _)| *tsn == self.last_cumulative_tsn_ack.next_value())
    }

    /// Processes the cumulative ack and gap ack blocks of a SACK, which must have been validated
    /// already.
    ///
    /// This may abandon messages that weren't fully sent; see [`Self::take_messages_to_discard`].
    pub fn handle_sack(
        &mut self,
        cumulative_tsn_ack: UnwrappedTsn,
        gap_ack_blocks: &[GapAckBlock],
        is_in_fast_recovery: bool,
    ) -> AckInfo {
        let mut ack_info = AckInfo {
            bytes_acked: 0,
            has_packet_loss: false,
            highest_tsn_acked: cumulative_tsn_ack,
        };
        let cumulative_tsn_advanced = cumulative_tsn_ack > self.last_cumulative_tsn_ack;

        self.remove_acked(cumulative_tsn_ack, &mut ack_info);
        self.ack_gap_blocks(cumulative_tsn_ack, gap_ack_blocks, &mut ack_info);
        self.nack_between_ack_blocks(
            cumulative_tsn_ack,
            gap_ack_blocks,
            is_in_fast_recovery,
            cumulative_tsn_advanced,
            &mut ack_info,
        );
        debug_assert!(self.is_consistent());
        ack_info
    }

    fn remove_acked(&mut self, cumulative_tsn_ack: UnwrappedTsn, ack_info: &mut AckInfo) {
        while let Some(entry) = self.items.first_entry() {
            if *entry.key() > cumulative_tsn_ack {
                break;
            }
            let (tsn, mut item) = entry.remove_entry();
            if !matches!(item.state, ChunkState::Acked | ChunkState::Abandoned) {
                ack_info.bytes_acked += item.size;
                ack_info.highest_tsn_acked = ack_info.highest_tsn_acked.max(tsn);
            }
            self.to_be_retransmitted.remove(&tsn);
            self.to_be_fast_retransmitted.remove(&tsn);
            self.accounting.transition(&mut item, ChunkState::Acked);
        }
        if cumulative_tsn_ack > self.last_cumulative_tsn_ack {
            self.last_cumulative_tsn_ack = cumulative_tsn_ack;
        }
        let first_unacked = self.last_cumulative_tsn_ack.next_value();
        self.stream_reset_breakpoint_tsns.retain(|b| *b > first_unacked);
    }

    fn ack_gap_blocks(
        &mut self,
        cumulative_tsn_ack: UnwrappedTsn,
        gap_ack_blocks: &[GapAckBlock],
        ack_info: &mut AckInfo,
    ) {
        // Gap ack blocks are advisory (RFC 9260 section 7.1), so acked chunks are kept until
        // they are cumulatively acked.
        for block in gap_ack_blocks {
            let start = cumulative_tsn_ack.add_to(u32::from(block.start));
            let end = cumulative_tsn_ack.add_to(u32::from(block.end));
            let tsns: Vec<UnwrappedTsn> =
                self.items.range(start..=end).map(|(tsn, _)| *tsn).collect();
            for tsn in tsns {
                self.ack_chunk(tsn, ack_info);
            }
        }
    }

    fn ack_chunk(&mut self, tsn: UnwrappedTsn, ack_info: &mut AckInfo) {
        let Some(item) = self.items.get_mut(&tsn) else {
            return;
        };
        if matches!(item.state, ChunkState::Acked | ChunkState::Abandoned) {
            return;
        }
        ack_info.bytes_acked += item.size;
        ack_info.highest_tsn_acked = ack_info.highest_tsn_acked.max(tsn);
        self.to_be_retransmitted.remove(&tsn);
        self.to_be_fast_retransmitted.remove(&tsn);
        self.accounting.transition(item, ChunkState::Acked);
    }

    fn nack_between_ack_blocks(
        &mut self,
        cumulative_tsn_ack: UnwrappedTsn,
        gap_ack_blocks: &[GapAckBlock],
        is_in_fast_recovery: bool,
        cumulative_tsn_advanced: bool,
        ack_info: &mut AckInfo,
    ) {
        // Miss indications are only counted for TSNs below the HTNA, except in fast recovery when
        // the cumulative ack advanced, where all reported missing TSNs count. See
        // <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.4>.
        let max_tsn_to_nack = if is_in_fast_recovery && cumulative_tsn_advanced {
            cumulative_tsn_ack.add_to(gap_ack_blocks.last().map_or(0, |b| u32::from(b.end)))
        } else {
            ack_info.highest_tsn_acked
        };

        let mut prev_block_last_acked = cumulative_tsn_ack;
        for block in gap_ack_blocks {
            let cur_block_first_acked = cumulative_tsn_ack.add_to(u32::from(block.start));
            let mut tsn = prev_block_last_acked.next_value();
            while tsn < cur_block_first_acked && tsn <= max_tsn_to_nack {
                ack_info.has_packet_loss |= self.nack_chunk(tsn, false, !is_in_fast_recovery);
                tsn = tsn.next_value();
            }
            prev_block_last_acked = cumulative_tsn_ack.add_to(u32::from(block.end));
        }
    }

    /// Returns true if the chunk is now considered lost.
    fn nack_chunk(
        &mut self,
        tsn: UnwrappedTsn,
        retransmit_now: bool,
        fast_retransmit: bool,
    ) -> bool {
        let Some(item) = self.items.get_mut(&tsn) else {
            return false;
        };
        let old_state = item.state;
        let action = item.nack(retransmit_now);
        let new_state = item.state;
        item.state = old_state;
        self.accounting.transition(item, new_state);

        match action {
            NackAction::Nothing => false,
            NackAction::Retransmit => {
                if fast_retransmit {
                    self.to_be_fast_retransmitted.insert(tsn);
                } else {
                    self.to_be_retransmitted.insert(tsn);
                }
                true
            }
            NackAction::Abandon => {
                log::debug!("Chunk {} reached its retransmission limit", tsn);
                self.abandon_all_for(tsn);
                true
            }
        }
    }

    /// Returns the unsent messages whose sent fragments have been abandoned. They must be
    /// discarded from the send queue before any more data is produced.
    pub fn take_messages_to_discard(&mut self) -> Vec<(StreamId, OutgoingMessageId)> {
        std::mem::take(&mut self.messages_to_discard)
    }

    fn extract_chunks_that_can_fit(
        &mut self,
        mut max_size: usize,
        max_chunks: usize,
        tsns: &mut BTreeSet<UnwrappedTsn>,
    ) -> Vec<(Tsn, Data)> {
        let mut result = Vec::new();
        let mut extracted = Vec::new();
        for tsn in tsns.iter() {
            let Some(item) = self.items.get_mut(tsn) else {
                continue;
            };
            debug_assert_eq!(item.state, ChunkState::ToBeRetransmitted);

            if item.size <= max_size {
                self.accounting.remove(item.state, item.size);
                item.mark_as_retransmitted();
                self.accounting.add(item.state, item.size);
                max_size -= item.size;
                result.push((tsn.wrap(), item.data.clone()));
                extracted.push(*tsn);
            }
            if max_size <= self.data_chunk_header_size || result.len() == max_chunks {
                break;
            }
        }
        for tsn in extracted {
            tsns.remove(&tsn);
        }
        result
    }

    /// Returns the fast retransmit chunks that fit in `max_size`. Those that don't fit are moved
    /// to normal retransmission, as they are no longer eligible for fast retransmit (RFC 9260
    /// section 7.2.4).
    pub fn get_chunks_to_be_fast_retransmitted(&mut self, max_size: usize) -> Vec<(Tsn, Data)> {
        let mut tsns = std::mem::take(&mut self.to_be_fast_retransmitted);
        let chunks = self.extract_chunks_that_can_fit(max_size, usize::MAX, &mut tsns);
        self.to_be_retransmitted.append(&mut tsns);
        debug_assert!(self.is_consistent());
        chunks
    }

    /// Returns the chunks to be retransmitted, in TSN order, that fit in `max_size`.
    pub fn get_chunks_to_be_retransmitted(&mut self, max_size: usize) -> Vec<(Tsn, Data)> {
        let mut tsns = std::mem::take(&mut self.to_be_retransmitted);
        let chunks = self.extract_chunks_that_can_fit(max_size, usize::MAX, &mut tsns);
        self.to_be_retransmitted = tsns;
        debug_assert!(self.is_consistent());
        chunks
    }

    /// Like [`Self::get_chunks_to_be_retransmitted`], but returns at most one chunk.
    pub fn get_chunk_to_be_retransmitted(&mut self, max_size: usize) -> Option<(Tsn, Data)> {
        let mut tsns = std::mem::take(&mut self.to_be_retransmitted);
        let chunk = self.extract_chunks_that_can_fit(max_size, 1, &mut tsns).pop();
        self.to_be_retransmitted = tsns;
        debug_assert!(self.is_consistent());
        chunk
    }

    /// Bytes of chunks in flight, which count against the congestion window.
    pub fn unacked_bytes(&self) -> usize {
        self.accounting.unacked_bytes
    }

    pub fn unacked_items(&self) -> usize {
        self.accounting.unacked_items
    }

    /// Bytes of chunks that are in flight, nacked or waiting to be retransmitted.
    pub fn outstanding_bytes(&self) -> usize {
        self.accounting.outstanding_bytes
    }

    /// Abandons messages whose lifetime has ended, starting from the front of the queue.
    ///
    /// Only chunks that have been reported missing are expired; one in flight may already have
    /// been received.
    pub fn expire_outstanding_chunks(&mut self, now: SocketTime) {
        let mut tsns_to_expire = Vec::new();
        for (tsn, item) in &self.items {
            match item.state {
                ChunkState::Abandoned => {}
                ChunkState::Nacked | ChunkState::ToBeRetransmitted if item.has_expired(now) => {
                    log::debug!(
                        "Marking nacked chunk {} and message {} as expired",
                        tsn,
                        item.data.mid
                    );
                    tsns_to_expire.push(*tsn);
                }
                _ => break,
            }
        }
        for tsn in tsns_to_expire {
            self.abandon_all_for(tsn);
        }
        debug_assert!(self.is_consistent());
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_data_to_be_fast_retransmitted(&self) -> bool {
        !self.to_be_fast_retransmitted.is_empty()
    }

    pub fn has_data_to_be_retransmitted(&self) -> bool {
        !self.to_be_retransmitted.is_empty() || !self.to_be_fast_retransmitted.is_empty()
    }

    pub fn last_cumulative_acked_tsn(&self) -> UnwrappedTsn {
        self.last_cumulative_tsn_ack
    }

    pub fn next_tsn(&self) -> UnwrappedTsn {
        self.next_tsn
    }

    pub fn highest_outstanding_tsn(&self) -> UnwrappedTsn {
        self.next_tsn.prev_value()
    }

    /// Returns true if any chunk of the given streams hasn't been cumulatively acked.
    pub fn has_unacked_data_for(&self, streams: &[StreamId]) -> bool {
        self.items.values().any(|item| streams.contains(&item.data.stream_key.id()))
    }

    /// Assigns a TSN to a freshly produced chunk. Returns `None` if its message has already
    /// expired, in which case it's abandoned without being sent.
    pub fn insert(
        &mut self,
        message_id: OutgoingMessageId,
        data: Data,
        now: SocketTime,
        max_retransmissions: Option<u16>,
        expires_at: Option<SocketTime>,
    ) -> Option<(Tsn, Data)> {
        debug_assert!(self.messages_to_discard.is_empty());

        let tsn = self.next_tsn;
        self.next_tsn = tsn.next_value();
        let item = TxData {
            message_id,
            size: self.chunk_size(&data),
            data,
            state: ChunkState::InFlight,
            nack_count: 0,
            num_retransmissions: 0,
            max_retransmissions,
            time_sent: now,
            expires_at,
        };
        self.accounting.add(item.state, item.size);

        if item.has_expired(now) {
            log::debug!(
                "Marking freshly produced chunk {} and message {} as expired",
                tsn,
                item.data.mid
            );
            self.items.insert(tsn, item);
            self.abandon_all_for(tsn);
            debug_assert!(self.is_consistent());
            return None;
        }

        let data = item.data.clone();
        self.items.insert(tsn, item);
        debug_assert!(self.is_consistent());
        Some((tsn.wrap(), data))
    }

    /// Abandons every chunk of the message that `tsn` belongs to. If the message's end fragment
    /// was never sent, a placeholder end fragment is added, already abandoned, and the rest of
    /// the message is queued to be discarded from the send queue.
    fn abandon_all_for(&mut self, tsn: UnwrappedTsn) {
        let Some(item) = self.items.get(&tsn) else {
            return;
        };
        let message_id = item.message_id;
        let stream_key = item.data.stream_key;
        let ssn = item.data.ssn;
        let mid = item.data.mid;

        let mut end_found = false;
        for (other_tsn, other) in self.items.iter_mut() {
            if other.message_id != message_id {
                continue;
            }
            end_found |= other.data.is_end;
            if other.state != ChunkState::Abandoned {
                self.to_be_retransmitted.remove(other_tsn);
                self.to_be_fast_retransmitted.remove(other_tsn);
                self.accounting.transition(other, ChunkState::Abandoned);
            }
        }
        if end_found {
            return;
        }

        // The peer may have received every fragment sent so far, so skipping only up to the last
        // sent fragment would make it see a new message before this one ended. A placeholder end
        // fragment, which is never sent, is what the FORWARD-TSN will point at.
        let placeholder_tsn = self.next_tsn;
        self.next_tsn = placeholder_tsn.next_value();
        log::debug!(
            "Adding placeholder end {} for abandoned message {} on {:?}",
            placeholder_tsn,
            mid,
            stream_key
        );
        self.items.insert(
            placeholder_tsn,
            TxData {
                message_id,
                data: Data { stream_key, ssn, mid, is_end: true, ..Default::default() },
                state: ChunkState::Abandoned,
                nack_count: 0,
                num_retransmissions: 0,
                max_retransmissions: Some(0),
                time_sent: SocketTime::zero(),
                expires_at: None,
                size: 0,
            },
        );
        self.messages_to_discard.push((stream_key.id(), message_id));
    }

    /// Schedules everything that isn't acked for retransmission.
    pub fn nack_all(&mut self) {
        let tsns: Vec<UnwrappedTsn> = self
            .items
            .iter()
            .filter(|(_, item)| !matches!(item.state, ChunkState::Acked | ChunkState::Abandoned))
            .map(|(tsn, _)| *tsn)
            .collect();
        for tsn in tsns {
            self.nack_chunk(tsn, true, false);
        }
        debug_assert!(self.is_consistent());
    }

    /// Iterates the abandoned chunks that a forward TSN may skip: the contiguous run following
    /// the cumulative ack, stopping at a stream reset breakpoint.
    fn skippable(&self) -> impl Iterator<Item = (&UnwrappedTsn, &TxData)> {
        self.items.iter().take_while(|(tsn, item)| {
            item.state == ChunkState::Abandoned && !self.stream_reset_breakpoint_tsns.contains(tsn)
        })
    }

    pub fn create_forward_tsn(&self) -> ForwardTsnChunk {
        let mut new_cumulative_tsn = self.last_cumulative_tsn_ack;
        let mut skipped_per_ordered_stream: BTreeMap<StreamId, Ssn> = BTreeMap::new();
        for (tsn, item) in self.skippable() {
            new_cumulative_tsn = *tsn;
            if item.data.stream_key.is_ordered() {
                let ssn = skipped_per_ordered_stream
                    .entry(item.data.stream_key.id())
                    .or_insert(item.data.ssn);
                *ssn = (*ssn).max(item.data.ssn);
            }
        }

        ForwardTsnChunk {
            new_cumulative_tsn: new_cumulative_tsn.wrap(),
            skipped_streams: skipped_per_ordered_stream
                .into_iter()
                .map(|(stream_id, ssn)| SkippedStream::ForwardTsn(stream_id, ssn))
                .collect(),
        }
    }

    pub fn create_iforward_tsn(&self) -> IForwardTsnChunk {
        let mut new_cumulative_tsn = self.last_cumulative_tsn_ack;
        let mut skipped_per_stream: BTreeMap<StreamKey, Mid> = BTreeMap::new();
        for (tsn, item) in self.skippable() {
            new_cumulative_tsn = *tsn;
            let mid = skipped_per_stream.entry(item.data.stream_key).or_insert(item.data.mid);
            *mid = (*mid).max(item.data.mid);
        }

        IForwardTsnChunk {
            new_cumulative_tsn: new_cumulative_tsn.wrap(),
            skipped_streams: skipped_per_stream
                .into_iter()
                .map(|(stream_key, mid)| SkippedStream::IForwardTsn(stream_key, mid))
                .collect(),
        }
    }

    /// Returns the time since `tsn` was sent, unless it has been retransmitted, in which case
    /// the sample would be ambiguous (Karn's algorithm), or was acked before.
    pub fn measure_rtt(&self, now: SocketTime, tsn: UnwrappedTsn) -> Option<Duration> {
        let item = self.items.get(&tsn)?;
        (item.num_retransmissions == 0 && item.state.is_outstanding()).then(|| now - item.time_sent)
    }

    /// Returns the state of every chunk, preceded by the last cumulative acked TSN.
    pub fn get_chunk_states(&self) -> Vec<(Tsn, ChunkState)> {
        std::iter::once((self.last_cumulative_tsn_ack.wrap(), ChunkState::Acked))
            .chain(self.items.iter().map(|(tsn, item)| (tsn.wrap(), item.state)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn nack_count(&self, tsn: UnwrappedTsn) -> Option<u8> {
        self.items.get(&tsn).map(|item| item.nack_count)
    }

    /// Returns true if the first chunk that isn't cumulatively acked has been abandoned, which
    /// means that the peer must be told to skip it.
    pub fn should_send_forward_tsn(&self) -> bool {
        self.skippable().next().is_some()
    }

    /// Restarts the TSN sequence, when restoring from a handover state.
    pub fn reset_sequence_numbers(&mut self, last_cumulative_tsn_ack: UnwrappedTsn) {
        debug_assert!(self.items.is_empty());
        self.last_cumulative_tsn_ack = last_cumulative_tsn_ack;
        self.next_tsn = last_cumulative_tsn_ack.next_value();
    }

    /// Marks the next TSN as a point that a FORWARD-TSN must not cross, as an outgoing stream
    /// reset request is sent with the current last assigned TSN.
    pub fn begin_reset_streams(&mut self) {
        self.stream_reset_breakpoint_tsns.insert(self.next_tsn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::data_generator::DataGenerator;
    use crate::types::TsnUnwrapper;

    const DATA_CHUNK_HEADER_SIZE: usize = 16;
    const STREAM: StreamId = StreamId(1);

    fn tsn(value: u32) -> UnwrappedTsn {
        TsnUnwrapper::new().unwrap(Tsn(value))
    }

    fn at_ms(ms: u64) -> SocketTime {
        SocketTime::from(Duration::from_millis(ms))
    }

    fn send(buf: &mut OutstandingData, message_id: u32, data: Data) -> Tsn {
        buf.insert(OutgoingMessageId(message_id), data, SocketTime::zero(), None, None)
            .map(|(tsn, _)| tsn)
            .unwrap()
    }

    fn send_limited(
        buf: &mut OutstandingData,
        message_id: u32,
        data: Data,
        max_retransmissions: Option<u16>,
        expires_at: Option<SocketTime>,
    ) -> Option<Tsn> {
        buf.insert(
            OutgoingMessageId(message_id),
            data,
            SocketTime::zero(),
            max_retransmissions,
            expires_at,
        )
        .map(|(tsn, _)| tsn)
    }

    fn states(buf: &OutstandingData) -> Vec<(u32, ChunkState)> {
        buf.get_chunk_states().into_iter().map(|(tsn, state)| (tsn.0, state)).collect()
    }

    #[test]
    fn has_initial_state() {
        let buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));

        assert!(buf.is_empty());
        assert_eq!(buf.unacked_bytes(), 0);
        assert_eq!(buf.outstanding_bytes(), 0);
        assert!(!buf.has_data_to_be_retransmitted());
        assert_eq!(buf.last_cumulative_acked_tsn(), tsn(9));
        assert_eq!(buf.next_tsn(), tsn(10));
        assert_eq!(buf.highest_outstanding_tsn(), tsn(9));
        assert_eq!(states(&buf), vec![(9, ChunkState::Acked)]);
        assert!(!buf.should_send_forward_tsn());
    }

    #[test]
    fn assigns_consecutive_tsns() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);

        assert_eq!(send(&mut buf, 1, seq.ordered("a", "BE")), Tsn(10));
        assert_eq!(send(&mut buf, 2, seq.ordered("bcdef", "BE")), Tsn(11));
        assert_eq!(buf.unacked_bytes(), 20 + 24);
        assert_eq!(buf.unacked_items(), 2);
        assert_eq!(buf.outstanding_bytes(), 20 + 24);
        assert_eq!(buf.highest_outstanding_tsn(), tsn(11));
        assert_eq!(
            states(&buf),
            vec![(9, ChunkState::Acked), (10, ChunkState::InFlight), (11, ChunkState::InFlight)]
        );
    }

    #[test]
    fn cumulative_ack_removes_chunks() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send(&mut buf, 1, seq.ordered("a", "BE"));

        let ack = buf.handle_sack(tsn(10), &[], false);
        assert_eq!(ack.bytes_acked, 20);
        assert_eq!(ack.highest_tsn_acked, tsn(10));
        assert!(!ack.has_packet_loss);
        assert!(buf.is_empty());
        assert_eq!(buf.unacked_bytes(), 0);
        assert_eq!(states(&buf), vec![(10, ChunkState::Acked)]);

        // Repeating the same SACK changes nothing.
        let ack = buf.handle_sack(tsn(10), &[], false);
        assert_eq!(ack.bytes_acked, 0);
    }

    #[test]
    fn acks_gap_blocks_and_nacks_between_them() {
        // TSNs 100-104, 100 bytes each, of which 100 and 102-104 are acked.
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(99));
        let mut seq = DataGenerator::new(STREAM);
        let payload = "x".repeat(84);
        for message_id in 0..5 {
            send(&mut buf, message_id, seq.ordered(&payload, "BE"));
        }
        assert_eq!(buf.outstanding_bytes(), 500);

        let ack = buf.handle_sack(tsn(100), &[GapAckBlock::new(2, 4)], false);

        assert_eq!(ack.bytes_acked, 400);
        assert_eq!(ack.highest_tsn_acked, tsn(104));
        assert!(!ack.has_packet_loss);
        assert_eq!(
            states(&buf),
            vec![
                (100, ChunkState::Acked),
                (101, ChunkState::Nacked),
                (102, ChunkState::Acked),
                (103, ChunkState::Acked),
                (104, ChunkState::Acked),
            ]
        );
        assert_eq!(buf.nack_count(tsn(101)), Some(1));
        assert_eq!(buf.outstanding_bytes(), 100);
        assert_eq!(buf.unacked_bytes(), 0);
    }

    #[test]
    fn repeated_sack_without_new_acks_does_not_nack() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send(&mut buf, 1, seq.ordered("a", "B"));
        send(&mut buf, 1, seq.ordered("b", "E"));

        for _ in 0..3 {
            assert!(!buf.handle_sack(tsn(9), &[GapAckBlock::new(2, 2)], false).has_packet_loss);
        }
        assert_eq!(buf.nack_count(tsn(10)), Some(1));
        assert_eq!(
            states(&buf),
            vec![(9, ChunkState::Acked), (10, ChunkState::Nacked), (11, ChunkState::Acked)]
        );
    }

    #[test]
    fn third_miss_indication_schedules_fast_retransmit() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send(&mut buf, 1, seq.ordered("a", "B"));
        send(&mut buf, 1, seq.ordered("b", ""));
        send(&mut buf, 1, seq.ordered("c", ""));
        send(&mut buf, 1, seq.ordered("d", "E"));

        assert!(!buf.handle_sack(tsn(9), &[GapAckBlock::new(2, 2)], false).has_packet_loss);
        assert!(!buf.handle_sack(tsn(9), &[GapAckBlock::new(2, 3)], false).has_packet_loss);
        assert!(buf.handle_sack(tsn(9), &[GapAckBlock::new(2, 4)], false).has_packet_loss);

        assert!(buf.has_data_to_be_fast_retransmitted());
        assert_eq!(buf.outstanding_bytes(), 20);
        assert_eq!(buf.unacked_bytes(), 0);

        let chunks = buf.get_chunks_to_be_fast_retransmitted(1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, Tsn(10));
        assert_eq!(chunks[0].1.payload, b"a");
        assert!(!buf.has_data_to_be_retransmitted());
        assert_eq!(states(&buf)[1], (10, ChunkState::InFlight));
        assert_eq!(buf.unacked_bytes(), 20);
        assert_eq!(buf.measure_rtt(at_ms(10), tsn(10)), None);
    }

    #[test]
    fn reneged_chunk_is_nacked_again() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send(&mut buf, 1, seq.ordered("a", "BE"));
        send(&mut buf, 2, seq.ordered("b", "BE"));
        send(&mut buf, 3, seq.ordered("c", "BE"));

        buf.handle_sack(tsn(9), &[GapAckBlock::new(2, 2)], false);
        assert_eq!(states(&buf)[2], (11, ChunkState::Acked));

        buf.handle_sack(tsn(9), &[GapAckBlock::new(3, 3)], false);
        assert_eq!(states(&buf)[2], (11, ChunkState::Nacked));
        assert_eq!(buf.outstanding_bytes(), 40);
    }

    #[test]
    fn abandons_message_when_retransmission_limit_reached() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send_limited(&mut buf, 1, seq.ordered("a", "B"), Some(0), None);
        send_limited(&mut buf, 1, seq.ordered("b", ""), Some(0), None);
        send_limited(&mut buf, 1, seq.ordered("c", "E"), Some(0), None);
        send(&mut buf, 2, seq.ordered("d", "BE"));

        buf.handle_sack(tsn(9), &[GapAckBlock::new(4, 4)], false);
        buf.handle_sack(tsn(9), &[GapAckBlock::new(4, 4)], false);
        assert!(!buf.should_send_forward_tsn());

        // Only explicit retransmission is left, and that's not allowed.
        buf.nack_all();
        assert_eq!(
            states(&buf),
            vec![
                (9, ChunkState::Acked),
                (10, ChunkState::Abandoned),
                (11, ChunkState::Abandoned),
                (12, ChunkState::Abandoned),
                (13, ChunkState::Acked),
            ]
        );
        assert!(buf.take_messages_to_discard().is_empty());
        assert_eq!(buf.outstanding_bytes(), 0);
        assert!(buf.should_send_forward_tsn());

        let forward_tsn = buf.create_forward_tsn();
        assert_eq!(forward_tsn.new_cumulative_tsn, Tsn(12));
        assert_eq!(forward_tsn.skipped_streams, vec![SkippedStream::ForwardTsn(STREAM, Ssn(0))]);
    }

    #[test]
    fn adds_placeholder_end_when_message_was_not_fully_sent() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send_limited(&mut buf, 1, seq.ordered("a", "B"), Some(0), None);
        send_limited(&mut buf, 1, seq.ordered("b", ""), Some(0), None);

        buf.nack_all();

        assert_eq!(
            states(&buf),
            vec![
                (9, ChunkState::Acked),
                (10, ChunkState::Abandoned),
                (11, ChunkState::Abandoned),
                (12, ChunkState::Abandoned),
            ]
        );
        assert_eq!(buf.next_tsn(), tsn(13));
        assert_eq!(buf.take_messages_to_discard(), vec![(STREAM, OutgoingMessageId(1))]);

        let iforward_tsn = buf.create_iforward_tsn();
        assert_eq!(iforward_tsn.new_cumulative_tsn, Tsn(12));
        assert_eq!(
            iforward_tsn.skipped_streams,
            vec![SkippedStream::IForwardTsn(StreamKey::Ordered(STREAM), Mid(0))]
        );
    }

    #[test]
    fn expires_only_chunks_reported_missing() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send_limited(&mut buf, 1, seq.ordered("a", "BE"), None, Some(at_ms(10)));
        send(&mut buf, 2, seq.ordered("b", "BE"));

        buf.expire_outstanding_chunks(at_ms(20));
        assert_eq!(states(&buf)[1], (10, ChunkState::InFlight));

        buf.handle_sack(tsn(9), &[GapAckBlock::new(2, 2)], false);
        buf.expire_outstanding_chunks(at_ms(5));
        assert_eq!(states(&buf)[1], (10, ChunkState::Nacked));

        buf.expire_outstanding_chunks(at_ms(20));
        assert_eq!(states(&buf)[1], (10, ChunkState::Abandoned));
        assert!(buf.should_send_forward_tsn());
        assert_eq!(buf.create_forward_tsn().new_cumulative_tsn, Tsn(10));
    }

    #[test]
    fn chunk_produced_after_expiry_is_not_sent() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);

        assert_eq!(
            send_limited(&mut buf, 1, seq.ordered("a", "B"), None, Some(SocketTime::zero())),
            None
        );
        assert_eq!(
            states(&buf),
            vec![(9, ChunkState::Acked), (10, ChunkState::Abandoned), (11, ChunkState::Abandoned)]
        );
        assert_eq!(buf.take_messages_to_discard(), vec![(STREAM, OutgoingMessageId(1))]);
        assert_eq!(buf.unacked_bytes(), 0);
    }

    #[test]
    fn forward_tsn_does_not_cross_stream_reset_breakpoint() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send(&mut buf, 1, seq.ordered("a", "BE"));
        send_limited(&mut buf, 2, seq.ordered("b", "BE"), Some(0), None);
        buf.begin_reset_streams();
        send_limited(&mut buf, 3, seq.ordered("c", "BE"), Some(0), None);

        buf.handle_sack(tsn(10), &[], false);
        buf.nack_all();
        assert_eq!(
            states(&buf),
            vec![(10, ChunkState::Acked), (11, ChunkState::Abandoned), (12, ChunkState::Abandoned)]
        );

        assert_eq!(buf.create_forward_tsn().new_cumulative_tsn, Tsn(11));

        // Once the peer has everything before the breakpoint, it no longer applies.
        buf.handle_sack(tsn(11), &[], false);
        assert_eq!(buf.create_forward_tsn().new_cumulative_tsn, Tsn(12));
    }

    #[test]
    fn measures_rtt_of_chunks_sent_once() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        buf.insert(OutgoingMessageId(1), seq.ordered("a", "BE"), at_ms(10), None, None);

        assert_eq!(buf.measure_rtt(at_ms(45), tsn(10)), Some(Duration::from_millis(35)));
        assert_eq!(buf.measure_rtt(at_ms(45), tsn(11)), None);

        buf.nack_all();
        buf.get_chunks_to_be_retransmitted(1000);
        assert_eq!(buf.measure_rtt(at_ms(45), tsn(10)), None);
    }

    #[test]
    fn retransmits_only_what_fits() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        let mut seq = DataGenerator::new(STREAM);
        send(&mut buf, 1, seq.ordered("a", "BE"));
        send(&mut buf, 2, seq.ordered("b", "BE"));
        send(&mut buf, 3, seq.ordered("c", "BE"));

        buf.nack_all();
        assert_eq!(buf.unacked_bytes(), 0);
        assert_eq!(buf.outstanding_bytes(), 60);

        let chunks = buf.get_chunks_to_be_retransmitted(40);
        assert_eq!(chunks.iter().map(|(tsn, _)| *tsn).collect::<Vec<_>>(), vec![Tsn(10), Tsn(11)]);
        assert_eq!(buf.unacked_bytes(), 40);
        assert!(buf.has_data_to_be_retransmitted());

        let chunks = buf.get_chunks_to_be_retransmitted(40);
        assert_eq!(chunks.iter().map(|(tsn, _)| *tsn).collect::<Vec<_>>(), vec![Tsn(12)]);
        assert!(!buf.has_data_to_be_retransmitted());
    }

    #[test]
    fn reports_unacked_data_per_stream() {
        let mut buf = OutstandingData::new(DATA_CHUNK_HEADER_SIZE, tsn(9));
        send(&mut buf, 1, DataGenerator::new(StreamId(1)).ordered("a", "BE"));
        send(&mut buf, 2, DataGenerator::new(StreamId(2)).ordered("b", "BE"));

        buf.handle_sack(tsn(10), &[], false);
        assert!(!buf.has_unacked_data_for(&[StreamId(1)]));
        assert!(buf.has_unacked_data_for(&[StreamId(1), StreamId(2)]));
    }
}
