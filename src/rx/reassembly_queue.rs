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
use crate::api::Message;
use crate::api::SocketEvent;
use crate::api::StreamId;
use crate::api::handover::ConnectionHandoverState;
use crate::api::handover::HandoverReadiness;
use crate::packet::SkippedStream;
use crate::packet::data::Data;
use crate::rx::interleaved_reassembly_streams::InterleavedReassemblyStreams;
use crate::rx::reassembly_streams::ReassemblyStreams;
use crate::rx::traditional_reassembly_streams::TraditionalReassemblyStreams;
use crate::types::Tsn;
use crate::types::TsnUnwrapper;
use crate::types::UnwrappedTsn;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::rc::Rc;

/// Fraction of the receive buffer above which new data is dropped, unless it can make progress.
pub const HIGH_WATERMARK_LIMIT: f32 = 0.9;

enum DeferredOperation {
    Data(UnwrappedTsn, Data),
    ForwardTsn(UnwrappedTsn, Vec<SkippedStream>),
}

struct DeferredResetStreams {
    sender_last_assigned_tsn: UnwrappedTsn,
    streams: HashSet<StreamId>,
    deferred_operations: Vec<DeferredOperation>,
}

/// Buffers received user data until messages can be delivered, and delivers them as
/// [`SocketEvent::OnMessage`].
///
/// While the peer's request to reset some of its outgoing streams can't be performed yet, because
/// data sent before the request is still missing, data received on those streams after the
/// request is held back. It's replayed once the streams have been reset.
pub(crate) struct ReassemblyQueue {
    max_size_bytes: usize,
    watermark_bytes: usize,
    queued_bytes: usize,
    tsn_unwrapper: TsnUnwrapper,

    /// All data up to and including this TSN has been delivered or skipped.
    last_assembled_tsn: UnwrappedTsn,

    /// Delivered TSNs following `last_assembled_tsn`, which can't advance past a gap.
    assembled_tsns: BTreeSet<UnwrappedTsn>,

    streams: Box<dyn ReassemblyStreams>,
    deferred_reset_streams: Option<DeferredResetStreams>,
    events: Rc<RefCell<dyn EventSink>>,
}

impl ReassemblyQueue {
    pub fn new(
        peer_initial_tsn: Tsn,
        max_size_bytes: usize,
        use_message_interleaving: bool,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        let mut tsn_unwrapper = TsnUnwrapper::new();
        let last_assembled_tsn = tsn_unwrapper.unwrap(peer_initial_tsn - 1);
        Self {
            max_size_bytes,
            watermark_bytes: (max_size_bytes as f32 * HIGH_WATERMARK_LIMIT) as usize,
            queued_bytes: 0,
            tsn_unwrapper,
            last_assembled_tsn,
            assembled_tsns: BTreeSet::new(),
            streams: if use_message_interleaving {
                Box::new(InterleavedReassemblyStreams::new())
            } else {
                Box::new(TraditionalReassemblyStreams::new())
            },
            deferred_reset_streams: None,
            events,
        }
    }

    pub fn add(&mut self, tsn: Tsn, data: Data) {
        let tsn = self.tsn_unwrapper.unwrap(tsn);
        if let Some(deferred) = &mut self.deferred_reset_streams {
            if tsn > deferred.sender_last_assigned_tsn
                && deferred.streams.contains(&data.stream_key.id())
            {
                log::debug!(
                    "Deferring {} on stream {} until the stream has been reset",
                    tsn,
                    data.stream_key.id()
                );
                self.queued_bytes += data.payload.len();
                deferred.deferred_operations.push(DeferredOperation::Data(tsn, data));
                return;
            }
        }
        self.add_unwrapped(tsn, data);
    }

    fn add_unwrapped(&mut self, tsn: UnwrappedTsn, data: Data) {
        let mut assembled = Vec::new();
        let added_bytes = self.streams.add(tsn, data, &mut |tsns, message| {
            assembled.push((tsns, message));
        });
        self.queued_bytes = self.queued_bytes.saturating_add_signed(added_bytes);
        self.deliver(assembled);
    }

    pub fn handle_forward_tsn(
        &mut self,
        new_cumulative_tsn: Tsn,
        skipped_streams: &[SkippedStream],
    ) {
        let new_cumulative_tsn = self.tsn_unwrapper.unwrap(new_cumulative_tsn);
        if let Some(deferred) = &mut self.deferred_reset_streams {
            if new_cumulative_tsn > deferred.sender_last_assigned_tsn {
                log::debug!(
                    "Deferring FORWARD-TSN to {} until streams have been reset",
                    new_cumulative_tsn
                );
                deferred.deferred_operations.push(DeferredOperation::ForwardTsn(
                    new_cumulative_tsn,
                    skipped_streams.to_vec(),
                ));
                return;
            }
        }
        self.handle_forward_tsn_unwrapped(new_cumulative_tsn, skipped_streams);
    }

    fn handle_forward_tsn_unwrapped(
        &mut self,
        new_cumulative_tsn: UnwrappedTsn,
        skipped_streams: &[SkippedStream],
    ) {
        let mut assembled = Vec::new();
        let released_bytes = self.streams.handle_forward_tsn(
            new_cumulative_tsn,
            skipped_streams,
            &mut |tsns, message| assembled.push((tsns, message)),
        );
        self.queued_bytes = self.queued_bytes.saturating_sub(released_bytes);

        if new_cumulative_tsn > self.last_assembled_tsn {
            self.last_assembled_tsn = new_cumulative_tsn;
            self.assembled_tsns = self.assembled_tsns.split_off(&new_cumulative_tsn.next_value());
        }
        self.deliver(assembled);
    }

    fn deliver(&mut self, assembled: Vec<(Vec<UnwrappedTsn>, Message)>) {
        for (tsns, message) in assembled {
            let last_assembled_tsn = self.last_assembled_tsn;
            self.assembled_tsns.extend(tsns.into_iter().filter(|tsn| *tsn > last_assembled_tsn));
            self.events.borrow_mut().add(SocketEvent::OnMessage(message));
        }
        while self.assembled_tsns.remove(&self.last_assembled_tsn.next_value()) {
            self.last_assembled_tsn = self.last_assembled_tsn.next_value();
        }
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn is_above_watermark(&self) -> bool {
        self.queued_bytes >= self.watermark_bytes
    }

    pub fn is_full(&self) -> bool {
        self.queued_bytes >= self.max_size_bytes
    }

    /// The remaining bytes until the queue has reached the watermark limit.
    pub fn remaining_bytes(&self) -> usize {
        self.watermark_bytes.saturating_sub(self.queued_bytes)
    }

    /// All data up to and including this TSN has been delivered as messages, or was skipped.
    pub fn last_assembled_tsn(&self) -> Tsn {
        self.last_assembled_tsn.wrap()
    }

    pub fn enter_deferred_reset(&mut self, sender_last_assigned_tsn: Tsn, streams: &[StreamId]) {
        let sender_last_assigned_tsn =
            self.tsn_unwrapper.peek_without_update(sender_last_assigned_tsn);
        self.deferred_reset_streams.get_or_insert_with(|| DeferredResetStreams {
            sender_last_assigned_tsn,
            streams: streams.iter().copied().collect(),
            deferred_operations: Vec::new(),
        });
    }

    pub fn reset_streams_and_leave_deferred_reset(&mut self, streams: &[StreamId]) {
        let released_bytes = self.streams.reset_streams(streams);
        self.queued_bytes = self.queued_bytes.saturating_sub(released_bytes);

        if let Some(deferred) = self.deferred_reset_streams.take() {
            log::debug!("Replaying {} deferred operations", deferred.deferred_operations.len());
            for operation in deferred.deferred_operations {
                match operation {
                    DeferredOperation::Data(tsn, data) => {
                        self.queued_bytes = self.queued_bytes.saturating_sub(data.payload.len());
                        self.add_unwrapped(tsn, data);
                    }
                    DeferredOperation::ForwardTsn(tsn, skipped_streams) => {
                        self.handle_forward_tsn_unwrapped(tsn, &skipped_streams);
                    }
                }
            }
        }
    }

    pub fn get_handover_readiness(&self) -> HandoverReadiness {
        (HandoverReadiness::STREAM_RESET_DEFERRED & self.deferred_reset_streams.is_some())
            | self.streams.get_handover_readiness()
    }

    pub fn add_to_handover_state(&self, state: &mut ConnectionHandoverState) {
        state.rx.last_assembled_tsn = self.last_assembled_tsn.wrap().0;
        self.streams.add_to_handover_state(state);
    }

    pub fn restore_from_state(&mut self, state: &ConnectionHandoverState) {
        self.tsn_unwrapper.reset();
        self.last_assembled_tsn = self.tsn_unwrapper.unwrap(Tsn(state.rx.last_assembled_tsn));
        self.assembled_tsns.clear();
        self.streams.restore_from_state(state);
    }
}
