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
use crate::types::Ssn;
use crate::types::StreamKey;
use crate::types::UnwrappedTsn;
use std::collections::BTreeMap;
use std::mem;

type Fragments = BTreeMap<UnwrappedTsn, Data>;

fn buffered_bytes(fragments: &Fragments) -> usize {
    fragments.values().map(|data| data.payload.len()).sum()
}

/// Returns the TSN of the first fragment of the message that `tsn` belongs to, if there are no
/// gaps between the two.
fn find_beginning(fragments: &Fragments, tsn: UnwrappedTsn) -> Option<UnwrappedTsn> {
    let mut expected = tsn;
    for (tsn, data) in fragments.range(..=tsn).rev() {
        if *tsn != expected {
            return None;
        }
        if data.is_beginning {
            return Some(*tsn);
        }
        expected = tsn.prev_value();
    }
    None
}

/// Returns the TSN of the last fragment of the message that `tsn` belongs to, if there are no
/// gaps between the two.
fn find_end(fragments: &Fragments, tsn: UnwrappedTsn) -> Option<UnwrappedTsn> {
    let mut expected = tsn;
    for (tsn, data) in fragments.range(tsn..) {
        if *tsn != expected {
            return None;
        }
        if data.is_end {
            return Some(*tsn);
        }
        expected = tsn.next_value();
    }
    None
}

/// Joins the fragments of a complete message and delivers it. Returns its size.
fn assemble(fragments: Fragments, on_assembled: &mut OnAssembledMessage<'_>) -> usize {
    let Some((_, first)) = fragments.first_key_value() else {
        return 0;
    };
    let stream_id = first.stream_key.id();
    let ppid = first.ppid;
    let mut tsns = Vec::with_capacity(fragments.len());
    let mut payload = Vec::new();
    for (tsn, mut data) in fragments {
        tsns.push(tsn);
        payload.append(&mut data.payload);
    }
    let size = payload.len();
    on_assembled(tsns, Message::new(stream_id, ppid, payload));
    size
}

trait ReassemblyStream {
    fn add(
        &mut self,
        tsn: UnwrappedTsn,
        data: Data,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> isize;

    /// Forgets skipped data, returning the number of bytes released.
    fn erase_to(
        &mut self,
        new_cumulative_tsn: UnwrappedTsn,
        skipped_ssn: Option<Ssn>,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> usize;

    fn reset(&mut self) -> usize;

    fn has_unassembled_chunks(&self) -> bool;

    fn add_to_handover_state(&self, stream_id: StreamId, state: &mut ConnectionHandoverState);
}

/// Reassembles messages from DATA chunks, when message interleaving isn't used.
///
/// The fragments of a message are sent with consecutive TSNs, which is all that groups them
/// together. Ordered messages are delivered in SSN order, and unordered messages as soon as they
/// are complete.
pub(crate) struct TraditionalReassemblyStreams {
    streams: BTreeMap<StreamKey, Box<dyn ReassemblyStream>>,
}

impl TraditionalReassemblyStreams {
    pub fn new() -> Self {
        Self { streams: BTreeMap::new() }
    }

    fn get_or_create(&mut self, stream_key: StreamKey) -> &mut Box<dyn ReassemblyStream> {
        self.streams.entry(stream_key).or_insert_with(|| -> Box<dyn ReassemblyStream> {
            match stream_key {
                StreamKey::Ordered(_) => Box::new(OrderedStream::new()),
                StreamKey::Unordered(_) => Box::new(UnorderedStream::new()),
            }
        })
    }
}

impl ReassemblyStreams for TraditionalReassemblyStreams {
    fn add(
        &mut self,
        tsn: UnwrappedTsn,
        data: Data,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> isize {
        self.get_or_create(data.stream_key).add(tsn, data, on_assembled)
    }

    /// A FORWARD-TSN only lists ordered streams. Unordered fragments are skipped by TSN alone.
    fn handle_forward_tsn(
        &mut self,
        new_cumulative_tsn: UnwrappedTsn,
        skipped_streams: &[SkippedStream],
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> usize {
        let mut released_bytes = 0;
        for (stream_key, stream) in &mut self.streams {
            if stream_key.is_unordered() {
                released_bytes += stream.erase_to(new_cumulative_tsn, None, on_assembled);
            }
        }
        for skipped in skipped_streams {
            if let SkippedStream::ForwardTsn(stream_id, ssn) = *skipped {
                released_bytes += self.get_or_create(StreamKey::Ordered(stream_id)).erase_to(
                    new_cumulative_tsn,
                    Some(ssn),
                    on_assembled,
                );
            }
        }
        released_bytes
    }

    /// Unordered streams have no sequence number to reset.
    fn reset_streams(&mut self, streams: &[StreamId]) -> usize {
        self.streams
            .iter_mut()
            .filter(|(stream_key, _)| stream_key.is_ordered())
            .filter(|(stream_key, _)| streams.is_empty() || streams.contains(&stream_key.id()))
            .map(|(_, stream)| stream.reset())
            .sum()
    }

    fn get_handover_readiness(&self) -> HandoverReadiness {
        let has_unassembled_chunks = self.streams.values().any(|s| s.has_unassembled_chunks());
        HandoverReadiness::STREAM_HAS_UNASSEMBLED_CHUNKS & has_unassembled_chunks
    }

    fn add_to_handover_state(&self, state: &mut ConnectionHandoverState) {
        for (stream_key, stream) in &self.streams {
            stream.add_to_handover_state(stream_key.id(), state);
        }
    }

    fn restore_from_state(&mut self, state: &ConnectionHandoverState) {
        for ordered in &state.rx.ordered_streams {
            let stream =
                OrderedStream { next_ssn: Ssn(ordered.next_mid as u16), ..OrderedStream::new() };
            self.streams.insert(StreamKey::Ordered(StreamId(ordered.id)), Box::new(stream));
        }
        for unordered in &state.rx.unordered_streams {
            let stream_key = StreamKey::Unordered(StreamId(unordered.id));
            self.streams.insert(stream_key, Box::new(UnorderedStream::new()));
        }
    }
}

struct UnorderedStream {
    fragments: Fragments,
}

impl UnorderedStream {
    fn new() -> Self {
        Self { fragments: BTreeMap::new() }
    }

    /// Delivers the message that `tsn` belongs to, if all of its fragments have been received.
    fn try_to_assemble(
        &mut self,
        tsn: UnwrappedTsn,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> usize {
        let (Some(first), Some(last)) =
            (find_beginning(&self.fragments, tsn), find_end(&self.fragments, tsn))
        else {
            return 0;
        };
        let mut message = self.fragments.split_off(&first);
        let mut later = message.split_off(&last.next_value());
        self.fragments.append(&mut later);
        assemble(message, on_assembled)
    }
}

impl ReassemblyStream for UnorderedStream {
    fn add(
        &mut self,
        tsn: UnwrappedTsn,
        data: Data,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> isize {
        if data.is_beginning && data.is_end {
            on_assembled(vec![tsn], Message::new(data.stream_key.id(), data.ppid, data.payload));
            return 0;
        }
        let added_bytes = data.payload.len() as isize;
        self.fragments.insert(tsn, data);
        added_bytes - self.try_to_assemble(tsn, on_assembled) as isize
    }

    fn erase_to(
        &mut self,
        new_cumulative_tsn: UnwrappedTsn,
        _: Option<Ssn>,
        _: &mut OnAssembledMessage<'_>,
    ) -> usize {
        let remaining = self.fragments.split_off(&new_cumulative_tsn.next_value());
        buffered_bytes(&mem::replace(&mut self.fragments, remaining))
    }

    fn reset(&mut self) -> usize {
        0
    }

    fn has_unassembled_chunks(&self) -> bool {
        !self.fragments.is_empty()
    }

    fn add_to_handover_state(&self, stream_id: StreamId, state: &mut ConnectionHandoverState) {
        state.rx.unordered_streams.push(HandoverUnorderedStream { id: stream_id.0 });
    }
}

struct OrderedStream {
    fragments_by_ssn: BTreeMap<Ssn, Fragments>,
    next_ssn: Ssn,
}

impl OrderedStream {
    fn new() -> Self {
        Self { fragments_by_ssn: BTreeMap::new(), next_ssn: Ssn(0) }
    }

    /// Delivers messages starting at `next_ssn`, for as long as they are complete.
    fn try_to_assemble_messages(&mut self, on_assembled: &mut OnAssembledMessage<'_>) -> usize {
        let mut assembled_bytes = 0;
        while let Some(fragments) = self.fragments_by_ssn.get(&self.next_ssn) {
            let (Some((first_tsn, first)), Some((last_tsn, last))) =
                (fragments.first_key_value(), fragments.last_key_value())
            else {
                break;
            };
            if !first.is_beginning
                || !last.is_end
                || first_tsn.difference(*last_tsn) != fragments.len() as i64 - 1
            {
                break;
            }
            let Some(fragments) = self.fragments_by_ssn.remove(&self.next_ssn) else {
                break;
            };
            assembled_bytes += assemble(fragments, on_assembled);
            self.next_ssn += 1;
        }
        assembled_bytes
    }
}

impl ReassemblyStream for OrderedStream {
    fn add(
        &mut self,
        tsn: UnwrappedTsn,
        data: Data,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> isize {
        if data.ssn < self.next_ssn {
            return 0;
        }
        let can_assemble = data.ssn == self.next_ssn;
        if can_assemble && data.is_beginning && data.is_end {
            on_assembled(vec![tsn], Message::new(data.stream_key.id(), data.ppid, data.payload));
            self.next_ssn += 1;
            return -(self.try_to_assemble_messages(on_assembled) as isize);
        }

        let added_bytes = data.payload.len() as isize;
        self.fragments_by_ssn.entry(data.ssn).or_default().insert(tsn, data);
        if !can_assemble {
            return added_bytes;
        }
        added_bytes - self.try_to_assemble_messages(on_assembled) as isize
    }

    fn erase_to(
        &mut self,
        _: UnwrappedTsn,
        skipped_ssn: Option<Ssn>,
        on_assembled: &mut OnAssembledMessage<'_>,
    ) -> usize {
        let Some(ssn) = skipped_ssn else {
            return 0;
        };
        let mut released_bytes = 0;
        self.fragments_by_ssn.retain(|cur_ssn, fragments| {
            if *cur_ssn <= ssn {
                released_bytes += buffered_bytes(fragments);
                false
            } else {
                true
            }
        });
        if ssn >= self.next_ssn {
            self.next_ssn = ssn + 1;
        }
        released_bytes + self.try_to_assemble_messages(on_assembled)
    }

    fn reset(&mut self) -> usize {
        let released_bytes = self.fragments_by_ssn.values().map(buffered_bytes).sum();
        *self = Self::new();
        released_bytes
    }

    fn has_unassembled_chunks(&self) -> bool {
        !self.fragments_by_ssn.is_empty()
    }

    fn add_to_handover_state(&self, stream_id: StreamId, state: &mut ConnectionHandoverState) {
        state
            .rx
            .ordered_streams
            .push(HandoverOrderedStream { id: stream_id.0, next_mid: u32::from(self.next_ssn.0) });
    }
}
