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

use crate::api::Message;
use crate::api::StreamId;
use crate::api::handover::ConnectionHandoverState;
use crate::api::handover::HandoverReadiness;
use crate::packet::SkippedStream;
use crate::packet::data::Data;
use crate::types::UnwrappedTsn;

/// Receives assembled messages, together with the TSNs of the chunks they were assembled from.
pub(crate) type OnAssembledMessage<'a> = dyn FnMut(Vec<UnwrappedTsn>, Message) + 'a;

/// Per-stream reassembly of messages from received fragments.
///
/// All methods that change the amount of buffered data return by how much it changed, so that
/// the owner can enforce a limit on the receive buffer.
pub(crate) trait ReassemblyStreams {
    /// Adds a fragment, and delivers any message(s) it completes.
    ///
    /// Returns the number of bytes added to the buffer, which is negative when buffered fragments
    /// were delivered.
    fn add(
        &mut self,
        tsn: UnwrappedTsn,
        data: Data,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> isize;

    /// Skips the data up to `new_cumulative_tsn` and the messages named by a FORWARD-TSN or
    /// I-FORWARD-TSN, which may unblock delivery of later ordered messages.
    ///
    /// Returns the number of bytes removed from the buffer.
    fn handle_forward_tsn(
        &mut self,
        new_cumulative_tsn: UnwrappedTsn,
        skipped_streams: &[SkippedStream],
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> usize;

    /// Makes the given streams, or all streams if `streams` is empty, start over from their first
    /// message. Returns the number of bytes removed from the buffer.
    fn reset_streams(&mut self, streams: &[StreamId]) -> usize;

    fn get_handover_readiness(&self) -> HandoverReadiness;

    fn add_to_handover_state(&self, state: &mut ConnectionHandoverState);

    fn restore_from_state(&mut self, state: &ConnectionHandoverState);
}
