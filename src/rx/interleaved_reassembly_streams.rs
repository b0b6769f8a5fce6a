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
use crate::api::handover::HandoverOrderedStream;
use crate::api::handover::HandoverReadiness;
use crate::api::handover::HandoverUnorderedStream;
use crate::packet::SkippedStream;
use crate::packet::data::Data;
use crate::rx::reassembly_streams::OnAssembledMessage;
use crate::rx::reassembly_streams::ReassemblyStreams;
use crate::types::Fsn;
use crate::types::Mid;
use crate::types::MidUnwrapper;
use crate::types::StreamKey;
use crate::types::UnwrappedMid;
use crate::types::UnwrappedTsn;
use std::collections::BTreeMap;
use std::mem;

struct Stream {
    stream_key: StreamKey,
    mid_unwrapper: MidUnwrapper,
    chunks_by_mid: BTreeMap<UnwrappedMid, BTreeMap<Fsn, (UnwrappedTsn, Data)>>,

    /// Only used for ordered streams.
    next_mid: UnwrappedMid,
}

impl Stream {
    fn starting_at(stream_key: StreamKey, next_mid: Mid) -> Self {
        let mut mid_unwrapper = MidUnwrapper::new();
        let next_mid = mid_unwrapper.unwrap(next_mid);
        Self { stream_key, mid_unwrapper, chunks_by_mid: BTreeMap::new(), next_mid }
    }

    fn new(stream_key: StreamKey) -> Self {
        Self::starting_at(stream_key, Mid(0))
    }

    fn buffered_bytes(chunks: &BTreeMap<Fsn, (UnwrappedTsn, Data)>) -> usize {
        chunks.values().map(|(_, data)| data.payload.len()).sum()
    }

    /// Delivers message `mid` if all of its fragments have been received, and returns its size.
    fn try_to_assemble_message(
        &mut self,
        mid: UnwrappedMid,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> Option<usize> {
        let chunks = self.chunks_by_mid.get(&mid)?;
        let (first_fsn, (_, first)) = chunks.first_key_value()?;
        let (last_fsn, (_, last)) = chunks.last_key_value()?;
        if !first.is_beginning
            || !last.is_end
            || first_fsn.distance_to(*last_fsn) as usize != chunks.len() - 1
        {
            return None;
        }
        let ppid = first.ppid;

        let chunks = self.chunks_by_mid.remove(&mid)?;
        let mut tsns = Vec::with_capacity(chunks.len());
        let mut payload = Vec::new();
        for (tsn, mut data) in chunks.into_values() {
            tsns.push(tsn);
            payload.append(&mut data.payload);
        }
        let size = payload.len();
        on_assembled(tsns, Message::new(self.stream_key.id(), ppid, payload));
        Some(size)
    }

    /// Delivers ordered messages starting at `next_mid`, for as long as they are complete.
    fn try_to_assemble_messages(&mut self, on_assembled: &mut OnAssembledMessage<'_>) -> usize {
        let mut assembled_bytes = 0;
        while let Some(size) = self.try_to_assemble_message(self.next_mid, on_assembled) {
            assembled_bytes += size;
            self.next_mid = self.next_mid.next_value();
        }
        assembled_bytes
    }

    /// Forgets all messages up to and including `mid`, and returns the number of bytes released.
    fn erase_to(&mut self, mid: UnwrappedMid, on_assembled: &mut OnAssembledMessage<'_>) -> usize {
        let remaining = self.chunks_by_mid.split_off(&mid.next_value());
        let mut released_bytes: usize = mem::replace(&mut self.chunks_by_mid, remaining)
            .values()
            .map(Self::buffered_bytes)
            .sum();

        if self.stream_key.is_ordered() && mid >= self.next_mid {
            self.next_mid = mid.next_value();
            released_bytes += self.try_to_assemble_messages(on_assembled);
        }
        released_bytes
    }

    fn reset(&mut self) -> usize {
        let released_bytes = self.chunks_by_mid.values().map(Self::buffered_bytes).sum();
        *self = Self::new(self.stream_key);
        released_bytes
    }
}

/// Reassembles messages from I-DATA fragments, which may arrive in any order and which may be
/// interleaved with fragments of other messages, on the same stream or on others. Fragments are
/// identified by their MID and FSN.
pub(crate) struct InterleavedReassemblyStreams {
    streams: BTreeMap<StreamKey, Stream>,
}

impl InterleavedReassemblyStreams {
    pub fn new() -> Self {
        Self { streams: BTreeMap::new() }
    }

    fn get_or_create(&mut self, stream_key: StreamKey) -> &mut Stream {
        self.streams.entry(stream_key).or_insert_with(|| Stream::new(stream_key))
    }
}

impl ReassemblyStreams for InterleavedReassemblyStreams {
    fn add(
        &mut self,
        tsn: UnwrappedTsn,
        data: Data,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> isize {
        let stream_key = data.stream_key;
        let stream = self.get_or_create(stream_key);
        let mid = stream.mid_unwrapper.unwrap(data.mid);

        if stream_key.is_ordered() && mid < stream.next_mid {
            return 0;
        }
        let existing = stream.chunks_by_mid.get(&mid);
        if existing.is_some_and(|chunks| chunks.contains_key(&data.fsn)) {
            return 0;
        }

        let can_deliver = stream_key.is_unordered() || mid == stream.next_mid;
        if can_deliver && data.is_beginning && data.is_end && existing.is_none() {
            on_assembled(vec![tsn], Message::new(stream_key.id(), data.ppid, data.payload));
            if stream_key.is_unordered() {
                return 0;
            }
            stream.next_mid = stream.next_mid.next_value();
            return -(stream.try_to_assemble_messages(on_assembled) as isize);
        }

        let added_bytes = data.payload.len() as isize;
        stream.chunks_by_mid.entry(mid).or_default().insert(data.fsn, (tsn, data));
        let assembled_bytes = if stream_key.is_unordered() {
            stream.try_to_assemble_message(mid, on_assembled).unwrap_or(0)
        } else {
            stream.try_to_assemble_messages(on_assembled)
        };
        added_bytes - assembled_bytes as isize
    }

    /// Only I-FORWARD-TSN is used with message interleaving. It names unordered streams too, so
    /// the new cumulative TSN isn't needed.
    fn handle_forward_tsn(
        &mut self,
        _new_cumulative_tsn: UnwrappedTsn,
        skipped_streams: &[SkippedStream],
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> usize {
        let mut released_bytes = 0;
        for skipped in skipped_streams {
            if let SkippedStream::IForwardTsn(stream_key, mid) = *skipped {
                let stream = self.get_or_create(stream_key);
                let mid = stream.mid_unwrapper.unwrap(mid);
                released_bytes += stream.erase_to(mid, on_assembled);
            }
        }
        released_bytes
    }

    fn reset_streams(&mut self, streams: &[StreamId]) -> usize {
        self.streams
            .iter_mut()
            .filter(|(stream_key, _)| streams.is_empty() || streams.contains(&stream_key.id()))
            .map(|(_, stream)| stream.reset())
            .sum()
    }

    fn get_handover_readiness(&self) -> HandoverReadiness {
        let has_unassembled_chunks = self.streams.values().any(|s| !s.chunks_by_mid.is_empty());
        HandoverReadiness::STREAM_HAS_UNASSEMBLED_CHUNKS & has_unassembled_chunks
    }

    fn add_to_handover_state(&self, state: &mut ConnectionHandoverState) {
        for (stream_key, stream) in &self.streams {
            match stream_key {
                StreamKey::Ordered(id) => state.rx.ordered_streams.push(HandoverOrderedStream {
                    id: id.0,
                    next_mid: stream.next_mid.wrap().0,
                }),
                StreamKey::Unordered(id) => {
                    state.rx.unordered_streams.push(HandoverUnorderedStream { id: id.0 })
                }
            }
        }
    }

    fn restore_from_state(&mut self, state: &ConnectionHandoverState) {
        for ordered in &state.rx.ordered_streams {
            let stream_key = StreamKey::Ordered(StreamId(ordered.id));
            self.streams.insert(stream_key, Stream::starting_at(stream_key, Mid(ordered.next_mid)));
        }
        for unordered in &state.rx.unordered_streams {
            let stream_key = StreamKey::Unordered(StreamId(unordered.id));
            self.streams.insert(stream_key, Stream::new(stream_key));
        }
    }
}
