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

//! One association's reliable-delivery state, composed from the sending side
//! ([`RetransmissionQueue`]), the receiving side (data tracker and reassembly queue) and stream
//! reconfiguration.

use crate::EventSink;
use crate::api::ErrorKind;
use crate::api::Options;
use crate::api::ProtocolViolation;
use crate::api::ResetStreamsStatus;
use crate::api::SocketEvent;
use crate::api::SocketTime;
use crate::api::StreamId;
use crate::api::handover::ConnectionHandoverState;
use crate::api::handover::HandoverReadiness;
use crate::connection::capabilities::Capabilities;
use crate::connection::stream_reset::IncomingStreamReset;
use crate::connection::stream_reset::StreamResetHandler;
use crate::connection::tx_error_counter::TxErrorCounter;
use crate::packet::Chunk;
use crate::packet::SkippedStream;
use crate::packet::data::Data;
use crate::packet::data_chunk::DataChunk;
use crate::packet::idata_chunk::IDataChunk;
use crate::packet::re_config_chunk::ReConfigChunk;
use crate::packet::sack_chunk;
use crate::packet::sack_chunk::SackChunk;
use crate::rx::data_tracker::DataTracker;
use crate::rx::reassembly_queue::ReassemblyQueue;
use crate::tx::retransmission_queue::HandleSackResult;
use crate::tx::retransmission_queue::RetransmissionQueue;
use crate::tx::retransmission_timeout::RetransmissionTimeout;
use crate::tx::send_queue::SendQueue;
use crate::types::Tsn;
use anyhow::bail;
use anyhow::ensure;
use std::cell::RefCell;
use std::cmp::min;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

pub mod capabilities;
pub mod stream_reset;
pub(crate) mod tx_error_counter;


const MIN_INITIAL_TSN: u32 = u32::MIN;
const MAX_INITIAL_TSN: u32 = u32::MAX;

/// Upper bound of how often FORWARD-TSN may be sent, further limited by the smoothed RTT.
const MAX_FORWARD_TSN_INTERVAL: Duration = Duration::from_millis(200);

fn closest_timeout(a: Option<SocketTime>, b: Option<SocketTime>) -> Option<SocketTime> {
    match (a, b) {
        (None, None) => None,
        (None, Some(_)) => b,
        (Some(_), None) => a,
        (Some(t1), Some(t2)) => Some(min(t1, t2)),
    }
}

/// The receiving side, as seen by the stream reset handler.
struct ReceiveSide<'a> {
    data_tracker: &'a DataTracker,
    reassembly_queue: &'a mut ReassemblyQueue,
}

impl IncomingStreamReset for ReceiveSide<'_> {
    fn is_later_than_cumulative_acked_tsn(&self, tsn: Tsn) -> bool {
        self.data_tracker.is_later_than_cumulative_acked_tsn(tsn)
    }

    fn enter_deferred_reset(&mut self, sender_last_assigned_tsn: Tsn, streams: &[StreamId]) {
        self.reassembly_queue.enter_deferred_reset(sender_last_assigned_tsn, streams);
    }

    fn reset_streams(&mut self, streams: &[StreamId]) {
        self.reassembly_queue.reset_streams_and_leave_deferred_reset(streams);
    }
}

/// An established association, from the point of view of reliable delivery.
///
/// The connection doesn't do any I/O. Parsed chunks from the peer are given to
/// [`Connection::handle_packet`] (or the individual `handle_*` methods), chunks to send are pulled
/// with [`Connection::produce_chunks`], and timers are driven by calling
/// [`Connection::handle_timeout`] at [`Connection::next_timeout`]. Everything else is reported as
/// [`SocketEvent`]s.
///
/// Chunks that violate the protocol are refused with an [`anyhow::Error`] wrapping a
/// [`ProtocolViolation`]. It's up to the caller to decide whether to close the connection.
pub struct Connection<Q: SendQueue> {
    name: String,
    capabilities: Capabilities,
    my_initial_tsn: Tsn,
    peer_initial_tsn: Tsn,

    retransmission_queue: RetransmissionQueue<Q>,
    rto: RetransmissionTimeout,
    data_tracker: DataTracker,
    reassembly_queue: ReassemblyQueue,
    stream_reset_handler: StreamResetHandler,

    tx_error_counter: TxErrorCounter,
    too_many_retries_reported: bool,

    /// FORWARD-TSN isn't sent again before this time.
    limit_forward_tsn_until: SocketTime,

    /// RE-CONFIG chunks waiting to be sent: responses to the peer, and re-sent requests.
    reconfig_chunks: VecDeque<ReConfigChunk>,

    events: Rc<RefCell<dyn EventSink>>,
}

impl<Q: SendQueue> Connection<Q> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        options: &Options,
        capabilities: Capabilities,
        my_initial_tsn: Tsn,
        peer_initial_tsn: Tsn,
        peer_a_rwnd: u32,
        send_queue: Q,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        log::debug!(
            "{}: Creating connection, my_initial_tsn={}, peer_initial_tsn={}, capabilities={:?}",
            name,
            my_initial_tsn,
            peer_initial_tsn,
            capabilities
        );
        let rto = RetransmissionTimeout::new(options);
        let mut data_tracker = DataTracker::new(peer_initial_tsn, options);
        data_tracker.update_rto(rto.rto());
        Self {
            name: name.into(),
            capabilities,
            my_initial_tsn,
            peer_initial_tsn,
            retransmission_queue: RetransmissionQueue::new(
                Rc::clone(&events),
                my_initial_tsn,
                peer_a_rwnd,
                send_queue,
                options,
                capabilities.partial_reliability,
                capabilities.message_interleaving,
            ),
            rto,
            data_tracker,
            reassembly_queue: ReassemblyQueue::new(
                peer_initial_tsn,
                options.max_receiver_window_buffer_size,
                capabilities.message_interleaving,
                Rc::clone(&events),
            ),
            stream_reset_handler: StreamResetHandler::new(
                my_initial_tsn,
                peer_initial_tsn,
                Rc::clone(&events),
            ),
            tx_error_counter: TxErrorCounter::new(options.max_retransmissions),
            too_many_retries_reported: false,
            limit_forward_tsn_until: SocketTime::zero(),
            reconfig_chunks: VecDeque::new(),
            events,
        }
    }

    /// Returns a random initial TSN, to announce in the handshake.
    pub fn generate_initial_tsn() -> Tsn {
        Tsn(fastrand::u32(MIN_INITIAL_TSN..MAX_INITIAL_TSN))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn send_queue(&self) -> &Q {
        self.retransmission_queue.send_queue()
    }

    pub fn send_queue_mut(&mut self) -> &mut Q {
        self.retransmission_queue.send_queue_mut()
    }

    /// Handles all chunks of one received packet, stopping at the first one that is refused.
    pub fn handle_packet(&mut self, now: SocketTime, chunks: Vec<Chunk>) -> anyhow::Result<()> {
        let result = chunks.into_iter().try_for_each(|chunk| self.handle_chunk(now, chunk));
        self.data_tracker.observe_packet_end(now);
        result
    }

    fn handle_chunk(&mut self, now: SocketTime, chunk: Chunk) -> anyhow::Result<()> {
        match chunk {
            Chunk::Data(DataChunk { tsn, data }) | Chunk::IData(IDataChunk { tsn, data }) => {
                self.handle_data(now, tsn, data)
            }
            Chunk::Sack(sack) => self.handle_sack(now, &sack),
            Chunk::ForwardTsn(c) => {
                self.handle_forward_tsn(now, c.new_cumulative_tsn, &c.skipped_streams)
            }
            Chunk::IForwardTsn(c) => {
                self.handle_iforward_tsn(now, c.new_cumulative_tsn, &c.skipped_streams)
            }
            Chunk::ReConfig(c) => self.handle_reconfig(now, c),
        }
    }

    /// Handles a DATA or I-DATA chunk.
    pub fn handle_data(&mut self, now: SocketTime, tsn: Tsn, data: Data) -> anyhow::Result<()> {
        self.receive_data(now, tsn, data).inspect_err(|e| log::info!("{}: {}", self.name, e))
    }

    fn receive_data(&mut self, now: SocketTime, tsn: Tsn, data: Data) -> anyhow::Result<()> {
        ensure!(!data.payload.is_empty(), ProtocolViolation::EmptyData(tsn.0));
        ensure!(self.data_tracker.is_tsn_valid(tsn), ProtocolViolation::TsnOutOfWindow(tsn.0));

        if self.reassembly_queue.is_full() {
            // Nothing can be done. The peer will retransmit it, and hopefully messages have been
            // assembled by then.
            log::debug!("{}: Dropping TSN {} as the reassembly queue is full", self.name, tsn);
            self.events.borrow_mut().add(SocketEvent::OnError(
                ErrorKind::ResourceExhaustion,
                "Reassembly queue is full".into(),
            ));
            return Ok(());
        }
        let increases_cum_ack_tsn = tsn == self.data_tracker.last_cumulative_acked_tsn() + 1;
        if self.reassembly_queue.is_above_watermark() && !increases_cum_ack_tsn {
            // Above the watermark, only data that fills the first gap is accepted, as that's what
            // can make messages complete and free up space.
            log::debug!(
                "{}: Dropping TSN {} as the reassembly queue is above its watermark",
                self.name,
                tsn
            );
            return Ok(());
        }

        if self.data_tracker.observe(now, tsn) {
            self.reassembly_queue.add(tsn, data);
        }
        Ok(())
    }

    pub fn handle_sack(&mut self, now: SocketTime, sack: &SackChunk) -> anyhow::Result<()> {
        match self.retransmission_queue.handle_sack(now, sack) {
            HandleSackResult::Invalid => {
                let violation = ProtocolViolation::InvalidSack(sack.cumulative_tsn_ack.0);
                log::info!("{}: {}", self.name, violation);
                bail!(violation);
            }
            HandleSackResult::Valid { rtt, reset_error_counter } => {
                if let Some(rtt) = rtt {
                    self.rto.observe_rtt(rtt);
                    let rto = self.rto.rto();
                    self.retransmission_queue.update_rto(rto);
                    self.data_tracker.update_rto(rto);
                }
                if reset_error_counter {
                    self.tx_error_counter.reset();
                    self.too_many_retries_reported = false;
                }
            }
        }
        Ok(())
    }

    /// Handles a FORWARD-TSN chunk, which is only valid if partial reliability has been negotiated
    /// without message interleaving.
    pub fn handle_forward_tsn(
        &mut self,
        now: SocketTime,
        new_cumulative_tsn: Tsn,
        skipped_streams: &[SkippedStream],
    ) -> anyhow::Result<()> {
        self.check_forward_tsn_kind(false).inspect_err(|e| log::info!("{}: {}", self.name, e))?;
        self.skip_to(now, new_cumulative_tsn, skipped_streams);
        Ok(())
    }

    /// Handles an I-FORWARD-TSN chunk, which is only valid if partial reliability and message
    /// interleaving have been negotiated.
    pub fn handle_iforward_tsn(
        &mut self,
        now: SocketTime,
        new_cumulative_tsn: Tsn,
        skipped_streams: &[SkippedStream],
    ) -> anyhow::Result<()> {
        self.check_forward_tsn_kind(true).inspect_err(|e| log::info!("{}: {}", self.name, e))?;
        self.skip_to(now, new_cumulative_tsn, skipped_streams);
        Ok(())
    }

    fn check_forward_tsn_kind(&self, interleaved: bool) -> anyhow::Result<()> {
        ensure!(self.capabilities.partial_reliability, ProtocolViolation::UnexpectedForwardTsn);
        ensure!(
            self.capabilities.message_interleaving == interleaved,
            ProtocolViolation::WrongForwardTsnKind
        );
        Ok(())
    }

    fn skip_to(
        &mut self,
        now: SocketTime,
        new_cumulative_tsn: Tsn,
        skipped_streams: &[SkippedStream],
    ) {
        if self.data_tracker.handle_forward_tsn(now, new_cumulative_tsn) {
            self.reassembly_queue.handle_forward_tsn(new_cumulative_tsn, skipped_streams);
        }
    }

    /// Handles a RE-CONFIG chunk. Responses are sent with the next produced chunks, also when a
    /// request was out of sequence, in which case an error is returned as well.
    pub fn handle_reconfig(&mut self, now: SocketTime, chunk: ReConfigChunk) -> anyhow::Result<()> {
        if !self.capabilities.reconfig {
            let violation = ProtocolViolation::UnexpectedReconfig;
            log::info!("{}: {}", self.name, violation);
            bail!(violation);
        }
        let mut incoming = ReceiveSide {
            data_tracker: &self.data_tracker,
            reassembly_queue: &mut self.reassembly_queue,
        };
        let outcome = self
            .stream_reset_handler
            .handle_reconfig(
                now,
                self.rto.rto(),
                chunk,
                &mut self.retransmission_queue,
                &mut incoming,
            )
            .inspect_err(|e| log::info!("{}: {}", self.name, e))?;

        if let Some(response) = outcome.response {
            self.reconfig_chunks.push_back(response);
        }
        if let Some(violation) = outcome.protocol_violation {
            log::info!("{}: {}", self.name, violation);
            bail!(violation);
        }
        Ok(())
    }

    /// Resets the given outgoing streams. The request is sent once the streams have no message in
    /// flight, and the outcome is reported as [`SocketEvent::OnStreamsResetPerformed`] or
    /// [`SocketEvent::OnStreamsResetFailed`].
    pub fn reset_streams(&mut self, streams: &[StreamId]) -> ResetStreamsStatus {
        if !self.capabilities.reconfig {
            return ResetStreamsStatus::NotSupported;
        }
        self.stream_reset_handler.reset_streams(&mut self.retransmission_queue, streams);
        ResetStreamsStatus::Performed
    }

    /// Runs the timers that have expired.
    pub fn handle_timeout(&mut self, now: SocketTime) {
        self.data_tracker.handle_timeout(now);
        if self.retransmission_queue.handle_timeout(now) {
            self.tx_error_counter.increment();
        }
        let rto = self.rto.rto();
        if let Some(request) = self.stream_reset_handler.handle_timeout(
            now,
            rto,
            &mut self.tx_error_counter,
            &mut self.retransmission_queue,
        ) {
            self.reconfig_chunks.push_back(request);
        }

        if self.tx_error_counter.is_exhausted() && !self.too_many_retries_reported {
            log::info!(
                "{}: Too many retransmissions ({})",
                self.name,
                self.tx_error_counter.value()
            );
            self.too_many_retries_reported = true;
            self.events.borrow_mut().add(SocketEvent::OnError(
                ErrorKind::TooManyRetries,
                "Too many retransmissions".into(),
            ));
        }
    }

    pub fn next_timeout(&self) -> Option<SocketTime> {
        let mut timeout = self.retransmission_queue.next_timeout();
        timeout = closest_timeout(timeout, self.data_tracker.next_timeout());
        closest_timeout(timeout, self.stream_reset_handler.next_timeout())
    }

    /// Returns the chunks of the next packet to send, of at most `budget` bytes.
    ///
    /// Control chunks come first: a SACK, pending RE-CONFIG responses, FORWARD-TSN and a stream
    /// reset request. DATA fills up the rest, as allowed by the congestion and receiver windows.
    /// An empty result means there's nothing to send right now.
    pub fn produce_chunks(&mut self, now: SocketTime, budget: usize) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut remaining = budget;

        // Send a SACK right away if it's likely to be bundled with DATA.
        let also_if_delayed = self.retransmission_queue.send_queue().has_data_to_send()
            || self.retransmission_queue.can_send_data();
        if remaining >= sack_chunk::MIN_SIZE
            && self.data_tracker.should_send_ack(now, also_if_delayed)
        {
            let a_rwnd = u32::try_from(self.reassembly_queue.remaining_bytes()).unwrap_or(u32::MAX);
            let sack = Chunk::Sack(self.data_tracker.create_selective_ack(a_rwnd, remaining));
            remaining -= sack.serialized_size();
            chunks.push(sack);
        }

        while let Some(reconfig) = self.reconfig_chunks.front() {
            let chunk = Chunk::ReConfig(reconfig.clone());
            if chunk.serialized_size() > remaining {
                break;
            }
            self.reconfig_chunks.pop_front();
            remaining -= chunk.serialized_size();
            chunks.push(chunk);
        }

        if now >= self.limit_forward_tsn_until
            && self.retransmission_queue.should_send_forward_tsn(now)
        {
            let forward_tsn = self.retransmission_queue.create_forward_tsn();
            if forward_tsn.serialized_size() <= remaining {
                log::debug!("{}: Sending {}", self.name, forward_tsn);
                remaining -= forward_tsn.serialized_size();
                chunks.push(forward_tsn);
                // From <https://datatracker.ietf.org/doc/html/rfc3758#section-3.5>:
                //
                //   IMPLEMENTATION NOTE: An implementation may wish to limit the number of
                //   duplicate FORWARD TSN chunks it sends by either only sending a FORWARD TSN
                //   every other time it receives a SACK, or by limiting the rate at which it sends
                //   FORWARD TSN chunks.
                self.limit_forward_tsn_until = now + min(MAX_FORWARD_TSN_INTERVAL, self.rto.srtt());
            }
        }

        if self.capabilities.reconfig {
            let request = self.stream_reset_handler.make_stream_reset_request(
                now,
                self.rto.rto(),
                remaining,
                &mut self.retransmission_queue,
            );
            if let Some(request) = request {
                let chunk = Chunk::ReConfig(request);
                remaining -= chunk.serialized_size();
                chunks.push(chunk);
            }
        }

        for (tsn, data) in self.retransmission_queue.get_chunks_to_send(now, remaining) {
            chunks.push(self.make_data_chunk(tsn, data));
        }
        chunks
    }

    fn make_data_chunk(&self, tsn: Tsn, data: Data) -> Chunk {
        if self.capabilities.message_interleaving {
            Chunk::IData(IDataChunk { tsn, data })
        } else {
            Chunk::Data(DataChunk { tsn, data })
        }
    }

    pub fn cwnd(&self) -> usize {
        self.retransmission_queue.cwnd()
    }

    pub fn rwnd(&self) -> usize {
        self.retransmission_queue.rwnd()
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.retransmission_queue.outstanding_bytes()
    }

    pub fn rto(&self) -> Duration {
        self.rto.rto()
    }

    pub fn srtt(&self) -> Duration {
        self.rto.srtt()
    }

    /// Returns the number of bytes received but not yet delivered as messages.
    pub fn queued_bytes(&self) -> usize {
        self.reassembly_queue.queued_bytes()
    }

    pub fn handover_readiness(&self) -> HandoverReadiness {
        self.stream_reset_handler.get_handover_readiness()
            | self.data_tracker.get_handover_readiness()
            | self.reassembly_queue.get_handover_readiness()
            | self.retransmission_queue.get_handover_readiness()
    }

    /// Returns the state to restore the connection with [`Connection::restore_from_state`], or
    /// `None` if not [ready](Connection::handover_readiness).
    pub fn get_handover_state(&self) -> Option<ConnectionHandoverState> {
        let readiness = self.handover_readiness();
        if !readiness.is_ready() {
            log::debug!("{}: Not ready for handover: {}", self.name, readiness);
            return None;
        }
        let mut state = ConnectionHandoverState {
            my_initial_tsn: self.my_initial_tsn.0,
            peer_initial_tsn: self.peer_initial_tsn.0,
            capabilities: self.capabilities.into(),
            ..Default::default()
        };
        self.data_tracker.add_to_handover_state(&mut state);
        self.reassembly_queue.add_to_handover_state(&mut state);
        self.retransmission_queue.add_to_handover_state(&mut state);
        self.stream_reset_handler.add_to_handover_state(&mut state);
        Some(state)
    }

    /// Creates a connection that continues where the one that produced `state` left off.
    pub fn restore_from_state(
        name: &str,
        options: &Options,
        state: &ConnectionHandoverState,
        send_queue: Q,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        let mut connection = Self::new(
            name,
            options,
            Capabilities::from(&state.capabilities),
            Tsn(state.my_initial_tsn),
            Tsn(state.peer_initial_tsn),
            state.tx.rwnd,
            send_queue,
            events,
        );
        connection.data_tracker.restore_from_state(state);
        connection.reassembly_queue.restore_from_state(state);
        connection.retransmission_queue.restore_from_state(state);
        connection.stream_reset_handler.restore_from_state(state);
        connection
    }
}
