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

//! The seam between the retransmission queue and whatever holds the messages to be sent.

use crate::api::SocketTime;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::types::OutgoingMessageId;

/// A fragment produced by a [`SendQueue`], not yet assigned a TSN.
#[derive(Debug)]
pub struct DataToSend {
    /// Identifies the message that the fragment was carved from, unique across streams.
    pub message_id: OutgoingMessageId,
    pub data: Data,

    /// How many times the fragment may be retransmitted, if limited.
    pub max_retransmissions: Option<u16>,

    /// When the message expires, if it has a limited lifetime.
    pub expires_at: Option<SocketTime>,
}

/// A queue of outgoing messages, fragmented on demand.
///
/// Streams to be reset go through a two-phase protocol: they are paused by
/// [`SendQueue::prepare_reset_streams`], and once any partially sent message has been fully
/// produced they become ready. They are then picked up by
/// [`SendQueue::get_streams_ready_to_reset`], and are finally either committed or rolled back
/// when the peer has answered.
pub trait SendQueue {
    /// Produces the next fragment to send, with a payload of at most `max_size` bytes.
    fn produce(&mut self, now: SocketTime, max_size: usize) -> Option<DataToSend>;

    /// Discards the rest of a partially sent message. Returns true if anything was discarded.
    fn discard(&mut self, stream_id: StreamId, message_id: OutgoingMessageId) -> bool;

    fn has_data_to_send(&self) -> bool;

    /// Pauses the streams so that they can be reset. Messages that haven't started to be sent are
    /// dropped; a partially sent message is still completed.
    fn prepare_reset_streams(&mut self, streams: &[StreamId]);

    /// Returns true if any paused stream has no partially sent message left.
    fn has_streams_ready_to_be_reset(&self) -> bool;

    /// Returns the streams that are ready to be reset, without changing their state.
    fn streams_ready_to_be_reset(&self) -> Vec<StreamId>;

    /// Returns the streams that are ready to be reset and marks them as being reset.
    fn get_streams_ready_to_reset(&mut self) -> Vec<StreamId>;

    /// The streams being reset have been reset. Their message identifiers restart from zero and
    /// they are unpaused.
    fn commit_reset_streams(&mut self);

    /// The peer refused to reset the streams being reset. They go back to be ready to be reset,
    /// so that the request can be retried.
    fn rollback_reset_streams(&mut self);
}
