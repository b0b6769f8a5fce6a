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

use crate::EventSink;
use crate::api::Options;
use crate::api::SocketEvent;
use crate::api::SocketTime;
use crate::api::StreamId;
use crate::api::handover::ConnectionHandoverState;
use crate::api::handover::HandoverReadiness;
use crate::connection::stream_reset::OutgoingStreamReset;
use crate::math::round_down_to_4;
use crate::math::round_up_to_4;
use crate::packet::Chunk;
use crate::packet::data::Data;
use crate::packet::data_chunk;
use crate::packet::idata_chunk;
use crate::packet::sack_chunk::SackChunk;
use crate::timer::BackoffAlgorithm;
use crate::timer::Timer;
use crate::tx::congestion_control::CongestionControl;
use crate::tx::outstanding_data::ChunkState;
use crate::tx::outstanding_data::OutstandingData;
use crate::tx::send_queue::SendQueue;
use crate::types::Tsn;
use crate::types::TsnUnwrapper;
use crate::types::UnwrappedTsn;
use std::cell::RefCell;
use std::cmp::min;
use std::rc::Rc;
use std::time::Duration;

/// The outcome of [`RetransmissionQueue::handle_sack`].
#[derive(Debug, PartialEq)]
pub enum HandleSackResult {
    /// The SACK was stale, or acknowledged data that was never sent. Nothing was changed.
    Invalid,

    /// The SACK was processed. `rtt` is set if an unambiguous round-trip time could be measured,
    /// and `reset_error_counter` if it acknowledged anything new.
    Valid { rtt: Option<Duration>, reset_error_counter: bool },
}

/// Sends data produced by a [`SendQueue`], keeps track of it until it's acknowledged and runs
/// congestion control (RFC 9260 section 7).
pub struct RetransmissionQueue<Q: SendQueue> {
    /// If the peer supports RFC 3758 - SCTP Partial Reliability Extension.
    partial_reliability: bool,

    /// If RFC 8260 message interleaving is active.
    use_message_interleaving: bool,

    /// The size of the data chunk (DATA/I-DATA) header that is used.
    data_chunk_header_size: usize,

    congestion: CongestionControl,

    /// Receive Window. Number of bytes available in the receiver's RX buffer.
    rwnd: usize,

    tsn_unwrapper: TsnUnwrapper,

    /// All the outstanding data chunks that are in-flight and that have not been cumulative acked.
    /// Note that it also contains chunks that have been acked in gap ack blocks.
    outstanding_data: OutstandingData,

    send_queue: Q,

    /// Set when the send queue ran out of data, so that it's only reported once.
    producer_exhausted: bool,

    t3_rtx: Timer,

    events: Rc<RefCell<dyn EventSink>>,
}

impl<Q: SendQueue> RetransmissionQueue<Q> {
    pub fn new(
        events: Rc<RefCell<dyn EventSink>>,
        my_initial_tsn: Tsn,
        a_rwnd: u32,
        send_queue: Q,
        options: &Options,
        supports_partial_reliability: bool,
        use_message_interleaving: bool,
    ) -> Self {
        let data_chunk_header_size = if use_message_interleaving {
            idata_chunk::HEADER_SIZE
        } else {
            data_chunk::HEADER_SIZE
        };
        let mut tsn_unwrapper = TsnUnwrapper::new();
        let last_cumulative_tsn_ack = tsn_unwrapper.unwrap(my_initial_tsn - 1);
        Self {
            partial_reliability: supports_partial_reliability,
            use_message_interleaving,
            data_chunk_header_size,
            congestion: CongestionControl::new(options, a_rwnd as usize),
            rwnd: a_rwnd as usize,
            tsn_unwrapper,
            outstanding_data: OutstandingData::new(data_chunk_header_size, last_cumulative_tsn_ack),
            send_queue,
            producer_exhausted: false,
            t3_rtx: Timer::new(
                "t3-rtx",
                options.rto_initial,
                BackoffAlgorithm::Exponential,
                None,
                options.max_timer_backoff_duration,
            ),
            events,
        }
    }

    pub fn send_queue(&self) -> &Q {
        &self.send_queue
    }

    pub fn send_queue_mut(&mut self) -> &mut Q {
        &mut self.send_queue
    }

    fn start_t3_rtx_if_outstanding_data(&mut self, now: SocketTime) {
        // Note: Can't use `unacked_bytes` as that one doesn't count chunks to be retransmitted.
        if !self.outstanding_data.is_empty() && !self.t3_rtx.is_running() {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.2>:
            //
            //   Whenever a SACK chunk is received missing a TSN that was previously acknowledged
            //   via a Gap Ack Block, start the T3-rtx for the destination address to which the DATA
            //   chunk was originally transmitted if it is not already running.
            self.t3_rtx.start(now);
        }
    }

    /// Removes what remains of abandoned messages from the send queue.
    fn discard_abandoned_messages(&mut self) {
        for (stream_id, message_id) in self.outstanding_data.take_messages_to_discard() {
            if self.send_queue.discard(stream_id, message_id) {
                log::debug!("Discarded the rest of message {} on stream {}", message_id, stream_id);
            }
        }
    }

    pub fn next_timeout(&self) -> Option<SocketTime> {
        self.t3_rtx.next_expiry()
    }

    pub fn update_rto(&mut self, rto: Duration) {
        self.t3_rtx.set_duration(rto);
    }

    /// Returns the cumulative TSN ack of `sack`, unwrapped, if it may be processed.
    ///
    /// Identical cumulative acks are accepted, as the gap ack blocks may have changed.
    fn validate_cumulative_tsn_ack(&self, sack: &SackChunk) -> Option<UnwrappedTsn> {
        let cumulative_tsn_ack = self.tsn_unwrapper.peek_without_update(sack.cumulative_tsn_ack);
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2.1-5.4.2.1.1>:
        //
        //   If Cumulative TSN Ack is less than the Cumulative TSN Ack Point, then drop the SACK
        //   chunk.
        (cumulative_tsn_ack >= self.outstanding_data.last_cumulative_acked_tsn()
            && cumulative_tsn_ack <= self.outstanding_data.highest_outstanding_tsn())
        .then_some(cumulative_tsn_ack)
    }

    pub fn is_sack_valid(&self, sack: &SackChunk) -> bool {
        self.validate_cumulative_tsn_ack(sack).is_some()
    }

    fn update_receiver_window(&mut self, a_rwnd: usize) {
        self.rwnd = a_rwnd.saturating_sub(self.outstanding_data.outstanding_bytes());
    }

    /// Handles a received SACK.
    pub fn handle_sack(&mut self, now: SocketTime, sack: &SackChunk) -> HandleSackResult {
        let Some(cumulative_tsn_ack) = self.validate_cumulative_tsn_ack(sack) else {
            log::debug!("Dropping SACK with cum_tsn_ack={}", sack.cumulative_tsn_ack);
            return HandleSackResult::Invalid;
        };
        self.tsn_unwrapper.unwrap(sack.cumulative_tsn_ack);

        let old_last_cumulative_tsn_ack = self.outstanding_data.last_cumulative_acked_tsn();
        let old_unacked_bytes = self.outstanding_data.unacked_bytes();
        let old_rwnd = self.rwnd;
        let cumulative_tsn_advanced = cumulative_tsn_ack > old_last_cumulative_tsn_ack;

        let rtt = if cumulative_tsn_advanced {
            self.outstanding_data.measure_rtt(now, cumulative_tsn_ack)
        } else {
            None
        };

        self.congestion.on_cumulative_tsn_ack(cumulative_tsn_ack);

        let ack_info = self.outstanding_data.handle_sack(
            cumulative_tsn_ack,
            &sack.gap_ack_blocks,
            self.congestion.is_in_fast_recovery(),
        );
        self.discard_abandoned_messages();

        self.update_receiver_window(sack.a_rwnd as usize);

        log::debug!(
            "Received SACK, cum_tsn_ack={} ({}), unacked_bytes={} ({}), rwnd={} ({})",
            cumulative_tsn_ack,
            old_last_cumulative_tsn_ack,
            self.outstanding_data.unacked_bytes(),
            old_unacked_bytes,
            self.rwnd,
            old_rwnd
        );

        if cumulative_tsn_advanced {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.2-2.3.1>:
            //
            //   Whenever a SACK chunk is received that acknowledges the DATA chunk with the
            //   earliest outstanding TSN for that address, restart the T3-rtx timer for that
            //   address with its current RTO (if there is still outstanding data on that address).
            self.t3_rtx.stop();

            self.congestion.on_cumulative_tsn_advanced(old_unacked_bytes, ack_info.bytes_acked);
        }

        if ack_info.has_packet_loss {
            self.congestion.on_packet_loss(self.outstanding_data.highest_outstanding_tsn());
        }

        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.2-3>:
        //
        //   When an outstanding TSN is acknowledged [...] the endpoint SHOULD clear the error
        //   counter [...].
        let reset_error_counter = ack_info.bytes_acked > 0;

        self.start_t3_rtx_if_outstanding_data(now);

        HandleSackResult::Valid { rtt, reset_error_counter }
    }

    /// Handles an expired retransmission timer and returns true if it has expired.
    pub fn handle_timeout(&mut self, now: SocketTime) -> bool {
        if !self.t3_rtx.expire(now) {
            return false;
        }

        let old_cwnd = self.congestion.cwnd();
        let old_unacked_bytes = self.unacked_bytes();
        self.congestion.on_retransmission_timeout();

        // The timer backs off by itself. Everything outstanding is marked for retransmission, and
        // sent as soon as cwnd allows.
        self.outstanding_data.nack_all();
        self.discard_abandoned_messages();

        log::debug!(
            "t3-rtx expired. new cwnd={} ({}), ssthresh={}, unacked_bytes {} ({})",
            self.congestion.cwnd(),
            old_cwnd,
            self.congestion.ssthresh(),
            self.unacked_bytes(),
            old_unacked_bytes
        );
        true
    }

    /// Returns true if a SACK reported loss and the lost chunks haven't been retransmitted yet.
    pub fn is_in_fast_retransmit(&self) -> bool {
        self.outstanding_data.has_data_to_be_fast_retransmitted()
    }

    fn get_chunks_for_fast_retransmit(
        &mut self,
        now: SocketTime,
        max_bytes: usize,
    ) -> Vec<(Tsn, Data)> {
        let to_be_sent = self.outstanding_data.get_chunks_to_be_fast_retransmitted(max_bytes);

        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.4-5.4.1>:
        //
        //   Restart the T3-rtx timer only if [...] the endpoint is retransmitting the first
        //   outstanding DATA chunk sent to that address.
        let first_outstanding =
            self.outstanding_data.last_cumulative_acked_tsn().next_value().wrap();
        if to_be_sent.first().is_some_and(|(tsn, _)| *tsn == first_outstanding) {
            self.t3_rtx.stop();
        }
        if !self.t3_rtx.is_running() {
            self.t3_rtx.start(now);
        }

        log::debug!(
            "Fast-retransmitting TSN {}. unacked_bytes={}",
            to_be_sent.iter().map(|(tsn, _)| tsn.to_string()).collect::<Vec<_>>().join(","),
            self.unacked_bytes()
        );
        to_be_sent
    }

    /// Returns the chunks to put in the next packet, with at most `bytes_remaining_in_packet`
    /// bytes of DATA or I-DATA chunks.
    ///
    /// Expired chunks are abandoned first. After a SACK has reported loss, the next packet holds
    /// only the chunks to fast retransmit, and isn't limited by the congestion window. Otherwise
    /// chunks to retransmit are sent first, and new data is produced from the send queue to fill
    /// up what the congestion and receiver windows allow.
    pub fn get_chunks_to_send(
        &mut self,
        now: SocketTime,
        bytes_remaining_in_packet: usize,
    ) -> Vec<(Tsn, Data)> {
        if self.partial_reliability {
            self.outstanding_data.expire_outstanding_chunks(now);
        }
        self.discard_abandoned_messages();

        if self.outstanding_data.has_data_to_be_fast_retransmitted() {
            return self
                .get_chunks_for_fast_retransmit(now, round_down_to_4!(bytes_remaining_in_packet));
        }

        let old_unacked_bytes = self.unacked_bytes();
        let old_rwnd = self.rwnd;

        let single_chunk = self.may_send_into_closed_window();
        let window =
            if single_chunk { self.congestion.available(0) } else { self.max_bytes_to_send() };
        let mut max_bytes = round_down_to_4!(min(window, bytes_remaining_in_packet));
        let mut to_be_sent = if single_chunk {
            self.outstanding_data.get_chunk_to_be_retransmitted(max_bytes).into_iter().collect()
        } else {
            self.outstanding_data.get_chunks_to_be_retransmitted(max_bytes)
        };
        let bytes_retransmitted: usize =
            to_be_sent.iter().map(|(_, data)| self.chunk_size(data)).sum();
        max_bytes -= bytes_retransmitted;

        while max_bytes > self.data_chunk_header_size && !(single_chunk && !to_be_sent.is_empty()) {
            let Some(chunk) = self.send_queue.produce(now, max_bytes - self.data_chunk_header_size)
            else {
                if !self.producer_exhausted {
                    self.producer_exhausted = true;
                    self.events.borrow_mut().add(SocketEvent::OnChunkProducerEmpty());
                }
                break;
            };
            self.producer_exhausted = false;

            let chunk_size = self.chunk_size(&chunk.data);
            let (max_retransmissions, expires_at) = if self.partial_reliability {
                (chunk.max_retransmissions, chunk.expires_at)
            } else {
                (None, None)
            };
            match self.outstanding_data.insert(
                chunk.message_id,
                chunk.data,
                now,
                max_retransmissions,
                expires_at,
            ) {
                Some(sent) => {
                    max_bytes = max_bytes.saturating_sub(chunk_size);
                    self.rwnd = self.rwnd.saturating_sub(chunk_size);
                    to_be_sent.push(sent);
                }
                // Expired while waiting in the send queue. It was never sent, so it doesn't use
                // any of the budget.
                None => self.discard_abandoned_messages(),
            }
        }

        if !to_be_sent.is_empty() {
            if !self.t3_rtx.is_running() {
                self.t3_rtx.start(now);
            }
            log::debug!(
                "Sending TSN {} - {} bytes ({} retransmitted). unacked_bytes={} ({}), cwnd={}, rwnd={} ({})",
                to_be_sent.iter().map(|(tsn, _)| tsn.to_string()).collect::<Vec<_>>().join(","),
                to_be_sent.iter().map(|(_, data)| self.chunk_size(data)).sum::<usize>(),
                bytes_retransmitted,
                self.unacked_bytes(),
                old_unacked_bytes,
                self.congestion.cwnd(),
                self.rwnd,
                old_rwnd
            );
        }

        to_be_sent
    }

    fn chunk_size(&self, data: &Data) -> usize {
        round_up_to_4!(self.data_chunk_header_size + data.payload.len())
    }

    /// Returns true if anything may be sent right now: something to retransmit, or new data that
    /// fits in the congestion window.
    pub fn can_send_data(&self) -> bool {
        self.outstanding_data.has_data_to_be_retransmitted()
            || (self.send_queue.has_data_to_send()
                && (self.max_bytes_to_send() > self.data_chunk_header_size
                    || self.may_send_into_closed_window()))
    }

    /// Returns the state of all outstanding chunks, preceded by the cumulative acked TSN.
    pub fn get_chunk_states(&self) -> Vec<(Tsn, ChunkState)> {
        self.outstanding_data.get_chunk_states()
    }

    /// Returns the next TSN that will be allocated for sent DATA chunks.
    pub fn next_tsn(&self) -> Tsn {
        self.outstanding_data.next_tsn().wrap()
    }

    /// Returns the size of the congestion window, in bytes. This is the number of bytes that may be
    /// in-flight.
    pub fn cwnd(&self) -> usize {
        self.congestion.cwnd()
    }

    /// Returns the current receiver window size.
    pub fn rwnd(&self) -> usize {
        self.rwnd
    }

    pub fn ssthresh(&self) -> usize {
        self.congestion.ssthresh()
    }

    /// Returns the number of bytes of packets that are in-flight.
    pub fn unacked_bytes(&self) -> usize {
        self.outstanding_data.unacked_bytes()
    }

    /// Returns the number of DATA chunks that are in-flight.
    pub fn unacked_items(&self) -> usize {
        self.outstanding_data.unacked_items()
    }

    /// Returns the number of bytes that are in flight, nacked or to be retransmitted.
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_data.outstanding_bytes()
    }

    /// Returns the number of bytes that may be sent in a single packet according to the congestion
    /// and receiver windows.
    fn max_bytes_to_send(&self) -> usize {
        min(self.rwnd, self.congestion.available(self.unacked_bytes()))
    }

    /// From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.1-2.2.1>:
    ///
    ///   However, regardless of the value of rwnd (including if it is 0), the data sender can
    ///   always have one DATA chunk in flight to the receiver if allowed by cwnd.
    ///
    /// Returns true if the receiver window can't hold any chunk, but nothing is in flight, so a
    /// single chunk may be sent anyway.
    fn may_send_into_closed_window(&self) -> bool {
        self.unacked_bytes() == 0
            && self.max_bytes_to_send() <= self.data_chunk_header_size
            && self.congestion.available(0) > self.data_chunk_header_size
    }

    pub fn should_send_forward_tsn(&mut self, now: SocketTime) -> bool {
        if !self.partial_reliability {
            return false;
        }
        self.outstanding_data.expire_outstanding_chunks(now);
        self.discard_abandoned_messages();
        self.outstanding_data.should_send_forward_tsn()
    }

    /// Creates a FORWARD-TSN, or an I-FORWARD-TSN if message interleaving is used.
    pub fn create_forward_tsn(&self) -> Chunk {
        debug_assert!(self.partial_reliability);
        if self.use_message_interleaving {
            Chunk::IForwardTsn(self.outstanding_data.create_iforward_tsn())
        } else {
            Chunk::ForwardTsn(self.outstanding_data.create_forward_tsn())
        }
    }

    pub(crate) fn get_handover_readiness(&self) -> HandoverReadiness {
        HandoverReadiness::RETRANSMISSION_QUEUE_OUTSTANDING_DATA & !self.outstanding_data.is_empty()
            | (HandoverReadiness::RETRANSMISSION_QUEUE_FAST_RECOVERY
                & self.congestion.is_in_fast_recovery())
            | (HandoverReadiness::RETRANSMISSION_QUEUE_NOT_EMPTY
                & self.outstanding_data.has_data_to_be_retransmitted())
    }

    pub(crate) fn add_to_handover_state(&self, state: &mut ConnectionHandoverState) {
        state.tx.next_tsn = self.next_tsn().0;
        state.tx.rwnd = self.rwnd as u32;
        self.congestion.add_to_handover_state(state);
    }

    pub(crate) fn restore_from_state(&mut self, state: &ConnectionHandoverState) {
        self.tsn_unwrapper.reset();
        let last_cumulative_tsn_ack =
            self.tsn_unwrapper.unwrap(Tsn(state.tx.next_tsn.wrapping_sub(1)));
        self.outstanding_data.reset_sequence_numbers(last_cumulative_tsn_ack);
        self.rwnd = state.tx.rwnd as usize;
        self.congestion.restore_from_state(state);
    }
}

impl<Q: SendQueue> OutgoingStreamReset for RetransmissionQueue<Q> {
    fn prepare_reset_streams(&mut self, streams: &[StreamId]) {
        self.send_queue.prepare_reset_streams(streams);
    }

    fn can_reset_streams(&self) -> bool {
        self.send_queue.has_streams_ready_to_be_reset()
            && !self
                .outstanding_data
                .has_unacked_data_for(&self.send_queue.streams_ready_to_be_reset())
    }

    fn last_assigned_tsn(&self) -> Tsn {
        self.outstanding_data.highest_outstanding_tsn().wrap()
    }

    fn begin_reset_streams(&mut self) -> Vec<StreamId> {
        self.outstanding_data.begin_reset_streams();
        self.send_queue.get_streams_ready_to_reset()
    }

    fn commit_reset_streams(&mut self) {
        self.send_queue.commit_reset_streams();
    }

    fn rollback_reset_streams(&mut self) {
        self.send_queue.rollback_reset_streams();
    }
}
