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
use crate::api::SocketTime;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::tx::send_queue::DataToSend;
use crate::tx::send_queue::SendQueue;
use crate::types::Fsn;
use crate::types::Mid;
use crate::types::OutgoingMessageId;
use crate::types::Ssn;
use crate::types::StreamKey;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct MessageOptions {
    pub unordered: bool,
    pub max_retransmissions: Option<u16>,
    pub lifetime: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum PauseState {
    #[default]
    NotPaused,
    /// Pausing, but a partially sent message must be completed first.
    Pending,
    Paused,
    Resetting,
}

#[derive(Debug, Default)]
struct OutgoingStream {
    pause_state: PauseState,
    next_ordered_mid: Mid,
    next_unordered_mid: Mid,
}

impl OutgoingStream {
    fn may_produce(&self) -> bool {
        matches!(self.pause_state, PauseState::NotPaused | PauseState::Pending)
    }
}

#[derive(Debug)]
struct Item {
    message_id: OutgoingMessageId,
    message: Message,
    options: MessageOptions,
    expires_at: Option<SocketTime>,
    offset: usize,
    mid: Option<Mid>,
    next_fsn: Fsn,
}

/// A send queue that fragments messages in the order they were added, across all streams.
#[derive(Debug, Default)]
pub struct FifoSendQueue {
    next_message_id: OutgoingMessageId,
    items: VecDeque<Item>,
    streams: BTreeMap<StreamId, OutgoingStream>,
}

impl FifoSendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, now: SocketTime, message: Message, options: &MessageOptions) {
        self.streams.entry(message.stream_id).or_default();
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        self.items.push_back(Item {
            message_id,
            message,
            options: options.clone(),
            expires_at: options.lifetime.map(|lifetime| now + lifetime),
            offset: 0,
            mid: None,
            next_fsn: Fsn(0),
        });
    }

    fn stream_may_produce(&self, stream_id: StreamId) -> bool {
        self.streams.get(&stream_id).is_none_or(OutgoingStream::may_produce)
    }

    fn finish_item(&mut self, index: usize) {
        if let Some(item) = self.items.remove(index) {
            if let Some(stream) = self.streams.get_mut(&item.message.stream_id) {
                if stream.pause_state == PauseState::Pending {
                    stream.pause_state = PauseState::Paused;
                }
            }
        }
    }
}

impl SendQueue for FifoSendQueue {
    fn produce(&mut self, now: SocketTime, max_size: usize) -> Option<DataToSend> {
        if max_size == 0 {
            return None;
        }
        let mut index = 0;
        while index < self.items.len() {
            let item = &self.items[index];
            if !self.stream_may_produce(item.message.stream_id) {
                index += 1;
                continue;
            }
            if item.offset == 0 && item.expires_at.is_some_and(|expires_at| expires_at <= now) {
                self.items.remove(index);
                continue;
            }
            break;
        }

        let item = self.items.get_mut(index)?;
        let stream_id = item.message.stream_id;
        let stream = self.streams.entry(stream_id).or_default();
        let mid = *item.mid.get_or_insert_with(|| {
            let next_mid = if item.options.unordered {
                &mut stream.next_unordered_mid
            } else {
                &mut stream.next_ordered_mid
            };
            let mid = *next_mid;
            *next_mid += 1;
            mid
        });

        let remaining = item.message.payload.len() - item.offset;
        let size = remaining.min(max_size);
        let is_beginning = item.offset == 0;
        let is_end = size == remaining;
        let fsn = item.next_fsn;
        item.next_fsn += 1;
        let payload = item.message.payload[item.offset..item.offset + size].to_vec();
        item.offset += size;

        let data = Data {
            stream_key: StreamKey::from(item.options.unordered, stream_id),
            ssn: if item.options.unordered { Ssn(0) } else { Ssn(mid.0 as u16) },
            mid,
            fsn,
            ppid: item.message.ppid,
            payload,
            is_beginning,
            is_end,
        };
        let to_send = DataToSend {
            message_id: item.message_id,
            data,
            max_retransmissions: item.options.max_retransmissions,
            expires_at: item.expires_at,
        };
        if is_end {
            self.finish_item(index);
        }
        Some(to_send)
    }

    fn discard(&mut self, _stream_id: StreamId, message_id: OutgoingMessageId) -> bool {
        match self.items.iter().position(|item| item.message_id == message_id) {
            Some(index) => {
                self.finish_item(index);
                true
            }
            None => false,
        }
    }

    fn has_data_to_send(&self) -> bool {
        self.items.iter().any(|item| self.stream_may_produce(item.message.stream_id))
    }

    fn prepare_reset_streams(&mut self, streams: &[StreamId]) {
        for stream_id in streams {
            let stream = self.streams.entry(*stream_id).or_default();
            if stream.pause_state != PauseState::NotPaused {
                continue;
            }
            self.items.retain(|item| item.message.stream_id != *stream_id || item.offset > 0);
            let has_partial = self.items.iter().any(|item| item.message.stream_id == *stream_id);
            stream.pause_state = if has_partial { PauseState::Pending } else { PauseState::Paused };
        }
    }

    fn has_streams_ready_to_be_reset(&self) -> bool {
        self.streams.values().any(|stream| stream.pause_state == PauseState::Paused)
    }

    fn streams_ready_to_be_reset(&self) -> Vec<StreamId> {
        self.streams
            .iter()
            .filter(|(_, stream)| stream.pause_state == PauseState::Paused)
            .map(|(stream_id, _)| *stream_id)
            .collect()
    }

    fn get_streams_ready_to_reset(&mut self) -> Vec<StreamId> {
        let ready = self.streams_ready_to_be_reset();
        for stream_id in &ready {
            if let Some(stream) = self.streams.get_mut(stream_id) {
                stream.pause_state = PauseState::Resetting;
            }
        }
        ready
    }

    fn commit_reset_streams(&mut self) {
        for stream in self.streams.values_mut() {
            if stream.pause_state == PauseState::Resetting {
                *stream = OutgoingStream::default();
            }
        }
    }

    fn rollback_reset_streams(&mut self) {
        for stream in self.streams.values_mut() {
            if stream.pause_state == PauseState::Resetting {
                stream.pause_state = PauseState::Paused;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PpId;

    fn message(stream_id: u16, size: usize) -> Message {
        Message::new(StreamId(stream_id), PpId(53), vec![7; size])
    }

    #[test]
    fn fragments_messages_in_order() {
        let mut sq = FifoSendQueue::new();
        sq.add(SocketTime::zero(), message(1, 10), &MessageOptions::default());
        sq.add(SocketTime::zero(), message(1, 2), &MessageOptions::default());

        let first = sq.produce(SocketTime::zero(), 6).unwrap();
        assert!(first.data.is_beginning && !first.data.is_end);
        let second = sq.produce(SocketTime::zero(), 6).unwrap();
        assert!(!second.data.is_beginning && second.data.is_end);
        assert_eq!((second.data.mid, second.data.fsn), (Mid(0), Fsn(1)));
        assert_eq!(first.message_id, second.message_id);

        let third = sq.produce(SocketTime::zero(), 6).unwrap();
        assert_eq!(third.data.mid, Mid(1));
        assert!(sq.produce(SocketTime::zero(), 6).is_none());
    }

    #[test]
    fn drops_unsent_expired_messages() {
        let mut sq = FifoSendQueue::new();
        let options =
            MessageOptions { lifetime: Some(Duration::from_millis(10)), ..Default::default() };
        sq.add(SocketTime::zero(), message(1, 2), &options);
        assert!(sq.produce(SocketTime::from(Duration::from_millis(10)), 100).is_none());
        assert!(!sq.has_data_to_send());
    }

    #[test]
    fn pauses_after_partially_sent_message_and_restarts_mids() {
        let mut sq = FifoSendQueue::new();
        sq.add(SocketTime::zero(), message(1, 10), &MessageOptions::default());
        sq.add(SocketTime::zero(), message(1, 10), &MessageOptions::default());
        sq.produce(SocketTime::zero(), 5);

        sq.prepare_reset_streams(&[StreamId(1)]);
        assert!(!sq.has_streams_ready_to_be_reset());
        assert!(sq.produce(SocketTime::zero(), 5).unwrap().data.is_end);
        assert!(!sq.has_data_to_send());
        assert_eq!(sq.streams_ready_to_be_reset(), vec![StreamId(1)]);

        assert_eq!(sq.get_streams_ready_to_reset(), vec![StreamId(1)]);
        sq.rollback_reset_streams();
        assert_eq!(sq.get_streams_ready_to_reset(), vec![StreamId(1)]);
        sq.commit_reset_streams();

        sq.add(SocketTime::zero(), message(1, 1), &MessageOptions::default());
        assert_eq!(sq.produce(SocketTime::zero(), 5).unwrap().data.mid, Mid(0));
    }
}
