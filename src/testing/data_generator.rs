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

use crate::api::PpId;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::types::Fsn;
use crate::types::Mid;
use crate::types::Ssn;
use crate::types::StreamKey;

pub const PPID: PpId = PpId(53);

/// Builds the fragments of consecutive messages on one stream.
///
/// `flags` is a string containing "B" for the first fragment of a message and "E" for the last.
/// Fragments without "B" continue the current message, and the message id advances after "E".
pub struct DataGenerator {
    stream_id: StreamId,
    mid: Mid,
    fsn: Fsn,
}

impl DataGenerator {
    pub fn new(stream_id: StreamId) -> Self {
        DataGenerator { stream_id, mid: Mid(0), fsn: Fsn(0) }
    }

    pub fn starting_at(stream_id: StreamId, mid: Mid) -> Self {
        DataGenerator { stream_id, mid, fsn: Fsn(0) }
    }

    pub fn ordered(&mut self, payload: &str, flags: &str) -> Data {
        self.fragment(StreamKey::Ordered(self.stream_id), payload, flags)
    }

    pub fn unordered(&mut self, payload: &str, flags: &str) -> Data {
        self.fragment(StreamKey::Unordered(self.stream_id), payload, flags)
    }

    /// Skips the message id that the next "B" fragment would have used.
    pub fn skip_message(&mut self) {
        self.mid += 1;
    }

    fn fragment(&mut self, stream_key: StreamKey, payload: &str, flags: &str) -> Data {
        let is_beginning = flags.contains('B');
        let is_end = flags.contains('E');
        self.fsn = if is_beginning { Fsn(0) } else { self.fsn + 1 };
        let data = Data {
            stream_key,
            ssn: if stream_key.is_ordered() { Ssn(self.mid.0 as u16) } else { Ssn(0) },
            mid: self.mid,
            fsn: self.fsn,
            ppid: PPID,
            payload: payload.as_bytes().to_vec(),
            is_beginning,
            is_end,
        };
        if is_end {
            self.mid += 1;
        }
        data
    }
}
