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

//! Stream reconfiguration, as described in RFC 6525: resetting outgoing streams on request of the
//! user, and responding to the peer's requests to reset its outgoing streams.

use crate::EventSink;
use crate::api::ProtocolViolation;
use crate::api::SocketEvent;
use crate::api::SocketTime;
use crate::api::StreamId;
use crate::api::handover::ConnectionHandoverState;
use crate::api::handover::HandoverReadiness;
use crate::connection::tx_error_counter::TxErrorCounter;
use crate::packet::Tlv;
use crate::packet::incoming_ssn_reset_request_parameter::IncomingSsnResetRequestParameter;
use crate::packet::outgoing_ssn_reset_request_parameter::OutgoingSsnResetRequestParameter;
use crate::packet::parameter::Parameter;
use crate::packet::re_config_chunk::ReConfigChunk;
use crate::packet::reconfiguration_response_parameter::ReconfigurationResponseParameter;
use crate::packet::reconfiguration_response_parameter::ReconfigurationResponseResult;
use crate::timer::BackoffAlgorithm;
use crate::timer::Timer;
use crate::types::Tsn;
use anyhow::ensure;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// The sending side's part in resetting outgoing streams.
pub trait OutgoingStreamReset {
    /// Marks the streams to be reset, pausing them once their current message has been sent.
    fn prepare_reset_streams(&mut self, streams: &[StreamId]);

    /// Whether there are paused streams that can be reset now, with none of their data
    /// outstanding.
    fn can_reset_streams(&self) -> bool;

    /// The last TSN that was assigned to a chunk.
    fn last_assigned_tsn(&self) -> Tsn;

    /// Starts resetting the streams that are ready, returning them. Data sent after this point
    /// is not skipped by FORWARD-TSN past what was sent before.
    fn begin_reset_streams(&mut self) -> Vec<StreamId>;

    fn commit_reset_streams(&mut self);

    fn rollback_reset_streams(&mut self);
}

/// The receiving side's part in resetting incoming streams.
pub trait IncomingStreamReset {
    /// Whether `tsn` is later than the cumulative ack TSN, i.e. it hasn't been received yet, or
    /// something before it hasn't.
    fn is_later_than_cumulative_acked_tsn(&self, tsn: Tsn) -> bool;

    /// Holds back data on `streams` that is later than `sender_last_assigned_tsn`, until the
    /// streams have been reset.
    fn enter_deferred_reset(&mut self, sender_last_assigned_tsn: Tsn, streams: &[StreamId]);

    /// Resets `streams` (all of them if empty) and replays data held back by a deferred reset.
    fn reset_streams(&mut self, streams: &[StreamId]);
}

#[derive(Clone, Debug, PartialEq)]
struct PreparedResetRequest {
    sender_last_assigned_tsn: Tsn,
    streams: Vec<StreamId>,
}

#[derive(Debug, PartialEq)]
struct InflightResetRequest {
    request_sequence_number: u32,
    request: PreparedResetRequest,
}

#[derive(Debug, PartialEq)]
enum CurrentResetRequest {
    None,

    /// Waiting to be sent, either for the first time or after the peer answered "in progress".
    Prepared(PreparedResetRequest),

    /// Sent, waiting for a response.
    Inflight(InflightResetRequest),
}

/// The result of processing a RE-CONFIG chunk from the peer.
#[derive(Debug, Default)]
pub(crate) struct ReconfigOutcome {
    /// Responses to send back to the peer.
    pub response: Option<ReConfigChunk>,

    /// Set if a request was out of sequence. It has still been answered.
    pub protocol_violation: Option<ProtocolViolation>,
}

pub(crate) struct StreamResetHandler {
    reconfig_timer: Timer,
    next_outgoing_req_seq_nbr: u32,
    current_request: CurrentResetRequest,
    last_processed_req_seq_nbr: u32,
    last_processed_req_result: ReconfigurationResponseResult,
    events: Rc<RefCell<dyn EventSink>>,
}

impl StreamResetHandler {
    pub fn new(
        my_initial_tsn: Tsn,
        peer_initial_tsn: Tsn,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        Self {
            // The duration is set to the current RTO whenever the timer is started.
            reconfig_timer: Timer::new(
                "re-config",
                Duration::ZERO,
                BackoffAlgorithm::Fixed,
                None,
                None,
            ),
            next_outgoing_req_seq_nbr: my_initial_tsn.0,
            current_request: CurrentResetRequest::None,
            last_processed_req_seq_nbr: (peer_initial_tsn - 1).0,
            last_processed_req_result: ReconfigurationResponseResult::SuccessNothingToDo,
            events,
        }
    }

    pub fn next_timeout(&self) -> Option<SocketTime> {
        self.reconfig_timer.next_expiry()
    }

    /// Whether a request is prepared or in flight. Only one can be at a time.
    pub fn has_current_request(&self) -> bool {
        self.current_request != CurrentResetRequest::None
    }

    pub fn reset_streams(&mut self, outgoing: &mut dyn OutgoingStreamReset, streams: &[StreamId]) {
        log::debug!("Preparing to reset streams {:?}", streams);
        outgoing.prepare_reset_streams(streams);
    }

    /// Starts a new request if there is none, and there are streams that can be reset. Returns
    /// the chunk to send, if it fits in `max_size`. A request that doesn't fit stays prepared
    /// and is sent by a later call.
    pub fn make_stream_reset_request(
        &mut self,
        now: SocketTime,
        rto: Duration,
        max_size: usize,
        outgoing: &mut dyn OutgoingStreamReset,
    ) -> Option<ReConfigChunk> {
        if self.current_request == CurrentResetRequest::None {
            if !outgoing.can_reset_streams() {
                return None;
            }
            let sender_last_assigned_tsn = outgoing.last_assigned_tsn();
            let streams = outgoing.begin_reset_streams();
            let request = PreparedResetRequest { sender_last_assigned_tsn, streams };
            self.current_request = CurrentResetRequest::Prepared(request);
        } else if self.reconfig_timer.is_running() {
            // Waiting for a response, or to be retried after the peer answered "in progress".
            return None;
        }

        let CurrentResetRequest::Prepared(request) = &self.current_request else {
            return None;
        };
        let size = outgoing_request(self.next_outgoing_req_seq_nbr, request).serialized_size();
        if size > max_size {
            log::debug!(
                "Reset request for {} streams ({} bytes) doesn't fit in {} bytes",
                request.streams.len(),
                size,
                max_size
            );
            return None;
        }
        self.reconfig_timer.set_duration(rto);
        self.reconfig_timer.start(now);
        self.send_prepared_request()
    }

    /// Moves a prepared request in flight with a new request sequence number.
    fn send_prepared_request(&mut self) -> Option<ReConfigChunk> {
        let current = std::mem::replace(&mut self.current_request, CurrentResetRequest::None);
        let request = match current {
            CurrentResetRequest::Prepared(request) => request,
            CurrentResetRequest::Inflight(inflight) => inflight.request,
            CurrentResetRequest::None => return None,
        };
        let request_sequence_number = self.next_outgoing_req_seq_nbr;
        self.next_outgoing_req_seq_nbr = self.next_outgoing_req_seq_nbr.wrapping_add(1);

        log::debug!(
            "Sending reset request {} for streams {:?}",
            request_sequence_number,
            request.streams
        );
        let chunk = outgoing_request(request_sequence_number, &request);
        let inflight = InflightResetRequest { request_sequence_number, request };
        self.current_request = CurrentResetRequest::Inflight(inflight);
        Some(chunk)
    }

    /// Gives up on the current request, making the streams available to be reset again.
    fn abandon_request(&mut self, outgoing: &mut dyn OutgoingStreamReset) {
        let request = match std::mem::replace(&mut self.current_request, CurrentResetRequest::None)
        {
            CurrentResetRequest::Prepared(request) => request,
            CurrentResetRequest::Inflight(inflight) => inflight.request,
            CurrentResetRequest::None => return,
        };
        log::debug!("Giving up resetting streams {:?}", request.streams);
        outgoing.rollback_reset_streams();
        self.events.borrow_mut().add(SocketEvent::OnStreamsResetFailed(request.streams));
    }

    /// Processes a RE-CONFIG chunk. A chunk that isn't well-formed is returned as an error and
    /// isn't answered.
    pub fn handle_reconfig(
        &mut self,
        now: SocketTime,
        rto: Duration,
        chunk: ReConfigChunk,
        outgoing: &mut dyn OutgoingStreamReset,
        incoming: &mut dyn IncomingStreamReset,
    ) -> anyhow::Result<ReconfigOutcome> {
        validate(&chunk)?;

        let mut outcome = ReconfigOutcome::default();
        let mut responses: Vec<Parameter> = Vec::new();
        for parameter in chunk.parameters {
            match parameter {
                Parameter::OutgoingSsnResetRequest(OutgoingSsnResetRequestParameter {
                    request_seq_nbr,
                    sender_last_assigned_tsn,
                    streams,
                    ..
                }) => {
                    if self.validate_req_seq_nbr(request_seq_nbr, &mut responses, &mut outcome) {
                        self.last_processed_req_seq_nbr = request_seq_nbr;
                        self.last_processed_req_result = if incoming
                            .is_later_than_cumulative_acked_tsn(sender_last_assigned_tsn)
                        {
                            // RFC 6525, E2: not everything the peer sent before the request has
                            // been received.
                            log::debug!(
                                "Deferring reset of incoming streams {:?} until TSN {}",
                                streams,
                                sender_last_assigned_tsn
                            );
                            incoming.enter_deferred_reset(sender_last_assigned_tsn, &streams);
                            ReconfigurationResponseResult::InProgress
                        } else {
                            log::debug!("Resetting incoming streams {:?}", streams);
                            incoming.reset_streams(&streams);
                            self.events
                                .borrow_mut()
                                .add(SocketEvent::OnIncomingStreamReset(streams));
                            ReconfigurationResponseResult::SuccessPerformed
                        };
                        responses.push(response(request_seq_nbr, self.last_processed_req_result));
                    }
                }
                Parameter::IncomingSsnResetRequest(IncomingSsnResetRequestParameter {
                    request_seq_nbr,
                    ..
                }) => {
                    if self.validate_req_seq_nbr(request_seq_nbr, &mut responses, &mut outcome) {
                        self.last_processed_req_seq_nbr = request_seq_nbr;
                        self.last_processed_req_result =
                            ReconfigurationResponseResult::SuccessNothingToDo;
                        responses.push(response(request_seq_nbr, self.last_processed_req_result));
                    }
                }
                Parameter::ReconfigurationResponse(ReconfigurationResponseParameter {
                    response_seq_nbr,
                    result,
                }) => {
                    self.handle_response(now, rto, response_seq_nbr, result, outgoing);
                }
            }
        }

        if !responses.is_empty() {
            outcome.response = Some(ReConfigChunk { parameters: responses });
        }
        Ok(outcome)
    }

    fn handle_response(
        &mut self,
        now: SocketTime,
        rto: Duration,
        response_seq_nbr: u32,
        result: ReconfigurationResponseResult,
        outgoing: &mut dyn OutgoingStreamReset,
    ) {
        let CurrentResetRequest::Inflight(inflight) = &self.current_request else {
            return;
        };
        if inflight.request_sequence_number != response_seq_nbr {
            log::debug!(
                "Ignoring response {} to reset request {}",
                response_seq_nbr,
                inflight.request_sequence_number
            );
            return;
        }
        self.reconfig_timer.stop();

        let CurrentResetRequest::Inflight(inflight) =
            std::mem::replace(&mut self.current_request, CurrentResetRequest::None)
        else {
            return;
        };
        let request = inflight.request;
        match result {
            ReconfigurationResponseResult::SuccessNothingToDo
            | ReconfigurationResponseResult::SuccessPerformed => {
                log::debug!("Reset of streams {:?} performed", request.streams);
                outgoing.commit_reset_streams();
                self.events.borrow_mut().add(SocketEvent::OnStreamsResetPerformed(request.streams));
            }
            ReconfigurationResponseResult::InProgress => {
                log::debug!("Reset of streams {:?} in progress, retrying later", request.streams);
                self.reconfig_timer.set_duration(rto);
                self.reconfig_timer.start(now);
                self.current_request = CurrentResetRequest::Prepared(request);
            }
            ReconfigurationResponseResult::Denied
            | ReconfigurationResponseResult::ErrorWrongSSN
            | ReconfigurationResponseResult::ErrorRequestAlreadyInProgress
            | ReconfigurationResponseResult::ErrorBadSequenceNumber => {
                log::debug!("Reset of streams {:?} failed: {:?}", request.streams, result);
                outgoing.rollback_reset_streams();
                self.events.borrow_mut().add(SocketEvent::OnStreamsResetFailed(request.streams));
            }
        }
    }

    /// Handles expiry of the reconfig timer, returning the request to re-send, if any.
    ///
    /// Once the error counter is exhausted, the current request is abandoned and reported as
    /// failed.
    pub fn handle_timeout(
        &mut self,
        now: SocketTime,
        rto: Duration,
        tx_error_counter: &mut TxErrorCounter,
        outgoing: &mut dyn OutgoingStreamReset,
    ) -> Option<ReConfigChunk> {
        if !self.reconfig_timer.expire(now) {
            return None;
        }

        match self.current_request {
            CurrentResetRequest::None => return None,
            // The peer answered "in progress" earlier; retry with a new request sequence number.
            CurrentResetRequest::Prepared(..) => {}
            CurrentResetRequest::Inflight(..) => {
                log::debug!("Reset request timed out");
                tx_error_counter.increment();
            }
        }
        if tx_error_counter.is_exhausted() {
            self.reconfig_timer.stop();
            self.abandon_request(outgoing);
            return None;
        }
        self.reconfig_timer.set_duration(rto);
        self.reconfig_timer.start(now);
        self.send_prepared_request()
    }

    /// Returns `true` if the request should be processed. Otherwise, the response has been added.
    fn validate_req_seq_nbr(
        &self,
        req_seq_nbr: u32,
        responses: &mut Vec<Parameter>,
        outcome: &mut ReconfigOutcome,
    ) -> bool {
        if req_seq_nbr == self.last_processed_req_seq_nbr {
            // RFC 6525, 5.2.1: a retransmitted request gets the same response as earlier.
            responses.push(response(req_seq_nbr, self.last_processed_req_result));
            return false;
        }
        if req_seq_nbr != self.last_processed_req_seq_nbr.wrapping_add(1) {
            log::debug!(
                "Request sequence number {} isn't the expected {}",
                req_seq_nbr,
                self.last_processed_req_seq_nbr.wrapping_add(1)
            );
            responses.push(response(
                req_seq_nbr,
                ReconfigurationResponseResult::ErrorBadSequenceNumber,
            ));
            outcome.protocol_violation =
                Some(ProtocolViolation::BadRequestSequenceNumber(req_seq_nbr));
            return false;
        }
        true
    }

    pub fn get_handover_readiness(&self) -> HandoverReadiness {
        HandoverReadiness::PENDING_STREAM_RESET_REQUEST & self.has_current_request()
    }

    pub fn add_to_handover_state(&self, state: &mut ConnectionHandoverState) {
        state.tx.next_reset_req_sn = self.next_outgoing_req_seq_nbr;
        state.rx.last_completed_reset_req_sn = self.last_processed_req_seq_nbr;
    }

    pub fn restore_from_state(&mut self, state: &ConnectionHandoverState) {
        self.next_outgoing_req_seq_nbr = state.tx.next_reset_req_sn;
        self.last_processed_req_seq_nbr = state.rx.last_completed_reset_req_sn;
        self.last_processed_req_result = ReconfigurationResponseResult::SuccessNothingToDo;
        self.current_request = CurrentResetRequest::None;
        self.reconfig_timer.stop();
    }
}

fn outgoing_request(request_seq_nbr: u32, request: &PreparedResetRequest) -> ReConfigChunk {
    let parameter = Parameter::OutgoingSsnResetRequest(OutgoingSsnResetRequestParameter {
        request_seq_nbr,
        response_seq_nbr: request_seq_nbr,
        sender_last_assigned_tsn: request.sender_last_assigned_tsn,
        streams: request.streams.clone(),
    });
    ReConfigChunk { parameters: vec![parameter] }
}

fn response(response_seq_nbr: u32, result: ReconfigurationResponseResult) -> Parameter {
    Parameter::ReconfigurationResponse(ReconfigurationResponseParameter {
        response_seq_nbr,
        result,
    })
}

/// A RE-CONFIG chunk holds one or two parameters, and not two of the same kind.
fn validate(chunk: &ReConfigChunk) -> anyhow::Result<()> {
    ensure!(matches!(chunk.parameters.len(), 1 | 2), ProtocolViolation::InvalidReconfig);
    if let [first, second] = chunk.parameters.as_slice() {
        ensure!(
            first.parameter_type() != second.parameter_type(),
            ProtocolViolation::InvalidReconfig
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Events;
    use crate::testing::event_helpers::expect_no_event;
    use crate::testing::event_helpers::expect_on_incoming_stream_reset;
    use crate::testing::event_helpers::expect_on_streams_reset_failed;
    use crate::testing::event_helpers::expect_on_streams_reset_performed;

    const MY_INITIAL_TSN: Tsn = Tsn(1000);
    const PEER_INITIAL_TSN: Tsn = Tsn(2000);
    const RTO: Duration = Duration::from_millis(100);
    const START_TIME: SocketTime = SocketTime::zero();

    #[derive(Default)]
    struct FakeOutgoing {
        pending: Vec<StreamId>,
        paused: Vec<StreamId>,
        resetting: Vec<StreamId>,
        committed: Vec<StreamId>,
        has_unacked_data: bool,
        last_assigned_tsn: u32,
    }

    impl OutgoingStreamReset for FakeOutgoing {
        fn prepare_reset_streams(&mut self, streams: &[StreamId]) {
            self.pending.extend_from_slice(streams);
            self.paused.append(&mut self.pending);
        }

        fn can_reset_streams(&self) -> bool {
            !self.paused.is_empty() && !self.has_unacked_data
        }

        fn last_assigned_tsn(&self) -> Tsn {
            Tsn(self.last_assigned_tsn)
        }

        fn begin_reset_streams(&mut self) -> Vec<StreamId> {
            self.resetting = std::mem::take(&mut self.paused);
            self.resetting.clone()
        }

        fn commit_reset_streams(&mut self) {
            self.committed.append(&mut self.resetting);
        }

        fn rollback_reset_streams(&mut self) {
            self.paused.append(&mut self.resetting);
        }
    }

    #[derive(Default)]
    struct FakeIncoming {
        cum_ack_tsn: u32,
        deferred: Option<(Tsn, Vec<StreamId>)>,
        reset: Vec<Vec<StreamId>>,
    }

    impl IncomingStreamReset for FakeIncoming {
        fn is_later_than_cumulative_acked_tsn(&self, tsn: Tsn) -> bool {
            tsn.0 > self.cum_ack_tsn
        }

        fn enter_deferred_reset(&mut self, sender_last_assigned_tsn: Tsn, streams: &[StreamId]) {
            self.deferred = Some((sender_last_assigned_tsn, streams.to_vec()));
        }

        fn reset_streams(&mut self, streams: &[StreamId]) {
            self.deferred = None;
            self.reset.push(streams.to_vec());
        }
    }

    struct Fixture {
        events: Rc<RefCell<Events>>,
        handler: StreamResetHandler,
        outgoing: FakeOutgoing,
        incoming: FakeIncoming,
    }

    impl Fixture {
        fn new() -> Self {
            let events = Rc::new(RefCell::new(Events::new()));
            let handler =
                StreamResetHandler::new(MY_INITIAL_TSN, PEER_INITIAL_TSN, events.clone());
            let incoming = FakeIncoming { cum_ack_tsn: 2010, ..Default::default() };
            Self { events, handler, outgoing: FakeOutgoing::default(), incoming }
        }

        fn reconfig(
            &mut self,
            now: SocketTime,
            parameters: Vec<Parameter>,
        ) -> anyhow::Result<ReconfigOutcome> {
            self.handler.handle_reconfig(
                now,
                RTO,
                ReConfigChunk { parameters },
                &mut self.outgoing,
                &mut self.incoming,
            )
        }

        /// The peer asks for stream 1 to be reset.
        fn peer_resets(&mut self, req_seq_nbr: u32, last_tsn: u32) -> ReconfigOutcome {
            self.reconfig(START_TIME, vec![outgoing_request(req_seq_nbr, last_tsn, &[StreamId(1)])])
                .unwrap()
        }

        fn peer_responds(
            &mut self,
            now: SocketTime,
            req_seq_nbr: u32,
            result: ReconfigurationResponseResult,
        ) -> ReconfigOutcome {
            self.reconfig(now, vec![response(req_seq_nbr, result)]).unwrap()
        }

        fn make_request(&mut self) -> Option<OutgoingSsnResetRequestParameter> {
            self.handler
                .make_stream_reset_request(START_TIME, RTO, usize::MAX, &mut self.outgoing)
                .map(only_outgoing_request)
        }

        fn request_reset(&mut self, streams: &[StreamId]) -> OutgoingSsnResetRequestParameter {
            self.handler.reset_streams(&mut self.outgoing, streams);
            self.make_request().unwrap()
        }
    }

    fn only_outgoing_request(chunk: ReConfigChunk) -> OutgoingSsnResetRequestParameter {
        match chunk.parameters.as_slice() {
            [Parameter::OutgoingSsnResetRequest(req)] => req.clone(),
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    fn outgoing_request(req_seq_nbr: u32, last_tsn: u32, streams: &[StreamId]) -> Parameter {
        Parameter::OutgoingSsnResetRequest(OutgoingSsnResetRequestParameter {
            request_seq_nbr: req_seq_nbr,
            response_seq_nbr: 0,
            sender_last_assigned_tsn: Tsn(last_tsn),
            streams: streams.to_vec(),
        })
    }

    fn violation(err: &anyhow::Error) -> Option<&ProtocolViolation> {
        err.downcast_ref::<ProtocolViolation>()
    }

    fn responses(outcome: &ReconfigOutcome) -> Vec<(u32, ReconfigurationResponseResult)> {
        outcome
            .response
            .iter()
            .flat_map(|c| c.parameters.iter())
            .map(|p| match p {
                Parameter::ReconfigurationResponse(r) => (r.response_seq_nbr, r.result),
                other => panic!("unexpected parameter {:?}", other),
            })
            .collect()
    }

    #[test]
    fn rejects_empty_chunk() {
        let mut t = Fixture::new();
        let err = t.reconfig(START_TIME, vec![]).unwrap_err();
        assert_eq!(violation(&err), Some(&ProtocolViolation::InvalidReconfig));
    }

    #[test]
    fn rejects_two_parameters_of_the_same_kind() {
        let mut t = Fixture::new();
        let parameters = vec![
            outgoing_request(2000, 2000, &[StreamId(1)]),
            outgoing_request(2001, 2000, &[StreamId(2)]),
        ];
        let err = t.reconfig(START_TIME, parameters).unwrap_err();
        assert_eq!(violation(&err), Some(&ProtocolViolation::InvalidReconfig));
        assert!(t.incoming.reset.is_empty());
    }

    #[test]
    fn resets_incoming_streams_when_all_data_is_received() {
        let mut t = Fixture::new();
        let outcome = t.peer_resets(2000, 2010);
        assert_eq!(
            responses(&outcome),
            vec![(2000, ReconfigurationResponseResult::SuccessPerformed)]
        );
        assert!(outcome.protocol_violation.is_none());
        assert_eq!(t.incoming.reset, vec![vec![StreamId(1)]]);
        let streams = expect_on_incoming_stream_reset!(t.events.borrow_mut().next_event());
        assert_eq!(streams, vec![StreamId(1)]);
    }

    #[test]
    fn defers_reset_until_all_data_is_received() {
        let mut t = Fixture::new();
        let outcome = t.peer_resets(2000, 2012);
        assert_eq!(responses(&outcome), vec![(2000, ReconfigurationResponseResult::InProgress)]);
        assert_eq!(t.incoming.deferred, Some((Tsn(2012), vec![StreamId(1)])));
        expect_no_event!(t.events.borrow_mut().next_event());

        // The peer retries with a new request sequence number once the data has arrived.
        t.incoming.cum_ack_tsn = 2012;
        let outcome = t.peer_resets(2001, 2012);
        assert_eq!(
            responses(&outcome),
            vec![(2001, ReconfigurationResponseResult::SuccessPerformed)]
        );
        assert_eq!(t.incoming.deferred, None);
        expect_on_incoming_stream_reset!(t.events.borrow_mut().next_event());
    }

    #[test]
    fn retransmitted_request_gets_identical_response() {
        let mut t = Fixture::new();
        let first = t.peer_resets(2000, 2010);
        expect_on_incoming_stream_reset!(t.events.borrow_mut().next_event());

        let second = t.peer_resets(2000, 2010);
        assert_eq!(first.response, second.response);
        assert_eq!(t.incoming.reset.len(), 1);
        expect_no_event!(t.events.borrow_mut().next_event());
    }

    #[test]
    fn out_of_sequence_request_is_answered_and_reported() {
        let mut t = Fixture::new();
        let outcome = t.peer_resets(2005, 2010);
        assert_eq!(
            responses(&outcome),
            vec![(2005, ReconfigurationResponseResult::ErrorBadSequenceNumber)]
        );
        assert_eq!(
            outcome.protocol_violation,
            Some(ProtocolViolation::BadRequestSequenceNumber(2005))
        );
        assert!(t.incoming.reset.is_empty());

        // The expected sequence number is unchanged.
        let outcome = t.peer_resets(2000, 2010);
        assert_eq!(
            responses(&outcome),
            vec![(2000, ReconfigurationResponseResult::SuccessPerformed)]
        );
    }

    #[test]
    fn answers_incoming_request_with_nothing_to_do() {
        let mut t = Fixture::new();
        let outcome = t
            .reconfig(
                START_TIME,
                vec![Parameter::IncomingSsnResetRequest(IncomingSsnResetRequestParameter {
                    request_seq_nbr: 2000,
                    streams: vec![StreamId(3)],
                })],
            )
            .unwrap();
        assert_eq!(
            responses(&outcome),
            vec![(2000, ReconfigurationResponseResult::SuccessNothingToDo)]
        );
    }

    #[test]
    fn answers_two_requests_in_one_chunk() {
        let mut t = Fixture::new();
        let outcome = t
            .reconfig(
                START_TIME,
                vec![
                    outgoing_request(2000, 2010, &[StreamId(1)]),
                    Parameter::IncomingSsnResetRequest(IncomingSsnResetRequestParameter {
                        request_seq_nbr: 2001,
                        streams: vec![],
                    }),
                ],
            )
            .unwrap();
        assert_eq!(
            responses(&outcome),
            vec![
                (2000, ReconfigurationResponseResult::SuccessPerformed),
                (2001, ReconfigurationResponseResult::SuccessNothingToDo)
            ]
        );
    }

    #[test]
    fn sends_request_when_streams_can_be_reset() {
        let mut t = Fixture::new();
        t.outgoing.last_assigned_tsn = 1005;
        t.outgoing.has_unacked_data = true;
        t.handler.reset_streams(&mut t.outgoing, &[StreamId(1), StreamId(2)]);
        assert!(t.make_request().is_none());

        t.outgoing.has_unacked_data = false;
        let req = t.make_request().unwrap();
        assert_eq!(req.request_seq_nbr, MY_INITIAL_TSN.0);
        assert_eq!(req.sender_last_assigned_tsn, Tsn(1005));
        assert_eq!(req.streams, vec![StreamId(1), StreamId(2)]);
        assert_eq!(t.handler.next_timeout(), Some(START_TIME + RTO));

        // Only one request at a time.
        t.handler.reset_streams(&mut t.outgoing, &[StreamId(3)]);
        assert!(t.make_request().is_none());
        assert!(!t.handler.get_handover_readiness().is_ready());
    }

    #[test]
    fn commits_on_success() {
        let mut t = Fixture::new();
        let req = t.request_reset(&[StreamId(1)]);
        let outcome = t.peer_responds(
            START_TIME,
            req.request_seq_nbr,
            ReconfigurationResponseResult::SuccessPerformed,
        );
        assert!(outcome.response.is_none());
        assert_eq!(t.outgoing.committed, vec![StreamId(1)]);
        let streams = expect_on_streams_reset_performed!(t.events.borrow_mut().next_event());
        assert_eq!(streams, vec![StreamId(1)]);
        assert!(t.handler.next_timeout().is_none());
        assert!(t.handler.get_handover_readiness().is_ready());
    }

    #[test]
    fn rolls_back_on_denied() {
        let mut t = Fixture::new();
        let req = t.request_reset(&[StreamId(1)]);
        t.peer_responds(START_TIME, req.request_seq_nbr, ReconfigurationResponseResult::Denied);
        assert!(t.outgoing.committed.is_empty());
        assert_eq!(t.outgoing.paused, vec![StreamId(1)]);
        let streams = expect_on_streams_reset_failed!(t.events.borrow_mut().next_event());
        assert_eq!(streams, vec![StreamId(1)]);

        // Retried on the next opportunity.
        let retry = t.make_request().unwrap();
        assert_eq!(retry.request_seq_nbr, req.request_seq_nbr + 1);
        assert_eq!(retry.streams, vec![StreamId(1)]);
    }

    #[test]
    fn ignores_response_to_other_request() {
        let mut t = Fixture::new();
        let req = t.request_reset(&[StreamId(1)]);
        t.peer_responds(
            START_TIME,
            req.request_seq_nbr + 7,
            ReconfigurationResponseResult::SuccessPerformed,
        );
        expect_no_event!(t.events.borrow_mut().next_event());
        assert!(t.handler.has_current_request());
        assert!(t.handler.next_timeout().is_some());
    }

    #[test]
    fn retries_with_new_sequence_number_when_in_progress() {
        let mut t = Fixture::new();
        let req = t.request_reset(&[StreamId(1)]);
        t.peer_responds(START_TIME, req.request_seq_nbr, ReconfigurationResponseResult::InProgress);
        expect_no_event!(t.events.borrow_mut().next_event());
        assert_eq!(t.handler.next_timeout(), Some(START_TIME + RTO));

        let mut tx_error_counter = TxErrorCounter::new(Some(2));
        let retry =
            t.handler.handle_timeout(START_TIME + RTO, RTO, &mut tx_error_counter, &mut t.outgoing);
        let retry = only_outgoing_request(retry.unwrap());
        assert_eq!(retry.request_seq_nbr, req.request_seq_nbr + 1);
        assert_eq!(retry.streams, req.streams);
        assert_eq!(retry.sender_last_assigned_tsn, req.sender_last_assigned_tsn);
        assert_eq!(tx_error_counter.value(), 0);

        t.peer_responds(
            START_TIME,
            retry.request_seq_nbr,
            ReconfigurationResponseResult::SuccessPerformed,
        );
        expect_on_streams_reset_performed!(t.events.borrow_mut().next_event());
    }

    #[test]
    fn timeout_of_inflight_request_counts_as_error() {
        let mut t = Fixture::new();
        let req = t.request_reset(&[StreamId(1)]);
        let mut tx_error_counter = TxErrorCounter::new(Some(1));

        let now = START_TIME + RTO;
        let retry = t.handler.handle_timeout(now, RTO, &mut tx_error_counter, &mut t.outgoing);
        let retry = only_outgoing_request(retry.unwrap());
        assert_eq!(retry.request_seq_nbr, req.request_seq_nbr + 1);
        assert_eq!(tx_error_counter.value(), 1);

        // A late response to the first request is no longer matched.
        t.peer_responds(now, req.request_seq_nbr, ReconfigurationResponseResult::SuccessPerformed);
        expect_no_event!(t.events.borrow_mut().next_event());

        let retry =
            t.handler.handle_timeout(now + RTO, RTO, &mut tx_error_counter, &mut t.outgoing);
        assert!(retry.is_none());
        assert!(tx_error_counter.is_exhausted());
        assert!(t.handler.next_timeout().is_none());
        expect_on_streams_reset_failed!(t.events.borrow_mut().next_event());
    }

    #[test]
    fn gives_up_request_when_retries_are_exhausted() {
        let mut t = Fixture::new();
        let req = t.request_reset(&[StreamId(1)]);
        let mut tx_error_counter = TxErrorCounter::new(Some(0));

        let retry =
            t.handler.handle_timeout(START_TIME + RTO, RTO, &mut tx_error_counter, &mut t.outgoing);
        assert!(retry.is_none());
        assert!(!t.handler.has_current_request());
        assert!(t.handler.next_timeout().is_none());
        assert!(t.handler.get_handover_readiness().is_ready());
        assert_eq!(t.outgoing.paused, vec![StreamId(1)]);
        let streams = expect_on_streams_reset_failed!(t.events.borrow_mut().next_event());
        assert_eq!(streams, vec![StreamId(1)]);

        // Later resets aren't stuck behind the abandoned request.
        t.handler.reset_streams(&mut t.outgoing, &[StreamId(2)]);
        let next = t.make_request().unwrap();
        assert_eq!(next.request_seq_nbr, req.request_seq_nbr + 1);
        assert_eq!(next.streams, vec![StreamId(1), StreamId(2)]);
    }

    #[test]
    fn keeps_request_that_does_not_fit_for_later() {
        let mut t = Fixture::new();
        t.handler.reset_streams(&mut t.outgoing, &[StreamId(1), StreamId(2)]);
        let request = t.handler.make_stream_reset_request(START_TIME, RTO, 20, &mut t.outgoing);
        assert!(request.is_none());
        assert!(t.handler.has_current_request());
        assert!(t.handler.next_timeout().is_none());

        let req = t.make_request().unwrap();
        assert_eq!(req.request_seq_nbr, MY_INITIAL_TSN.0);
        assert_eq!(req.streams, vec![StreamId(1), StreamId(2)]);
        assert_eq!(t.handler.next_timeout(), Some(START_TIME + RTO));
    }

    #[test]
    fn handover_state_carries_sequence_numbers() {
        let mut t = Fixture::new();
        t.peer_resets(2000, 2010);
        let req = t.request_reset(&[StreamId(1)]);
        t.peer_responds(
            START_TIME,
            req.request_seq_nbr,
            ReconfigurationResponseResult::SuccessPerformed,
        );

        let mut state = ConnectionHandoverState::default();
        t.handler.add_to_handover_state(&mut state);
        assert_eq!(state.tx.next_reset_req_sn, MY_INITIAL_TSN.0 + 1);
        assert_eq!(state.rx.last_completed_reset_req_sn, 2000);

        let events = Rc::new(RefCell::new(Events::new()));
        let mut restored = StreamResetHandler::new(Tsn(1), Tsn(1), events);
        restored.restore_from_state(&state);
        let mut incoming = FakeIncoming { cum_ack_tsn: 2010, ..Default::default() };
        let outcome = restored
            .handle_reconfig(
                START_TIME,
                RTO,
                ReConfigChunk { parameters: vec![outgoing_request(2001, 2010, &[StreamId(2)])] },
                &mut FakeOutgoing::default(),
                &mut incoming,
            )
            .unwrap();
        assert_eq!(
            responses(&outcome),
            vec![(2001, ReconfigurationResponseResult::SuccessPerformed)]
        );
    }
}
