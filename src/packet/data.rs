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
use crate::types::Fsn;
use crate::types::Mid;
use crate::types::Ssn;
use crate::types::StreamKey;

/// The user data carried by a DATA or I-DATA chunk, without its TSN.
///
/// Both chunk kinds are represented by this union of their fields, so that the send and receive
/// paths don't need to care about which one was negotiated. The TSN is assigned when the chunk is
/// sent, so it travels next to the data as `(Tsn, Data)`.
///
/// A DATA chunk only carries the `ssn`. The sender still numbers its messages by `mid` (of which
/// the `ssn` is the lower 16 bits), but `mid` and `fsn` are meaningless in received DATA chunks,
/// whose fragments are grouped by consecutive TSNs and ordered by SSN instead.
#[derive(Clone, Debug, PartialEq)]
pub struct Data {
    pub stream_key: StreamKey,
    pub ssn: Ssn,
    pub mid: Mid,
    pub fsn: Fsn,
    pub ppid: PpId,
    pub payload: Vec<u8>,
    pub is_beginning: bool,
    pub is_end: bool,
}

impl Default for Data {
    fn default() -> Self {
        Self {
            stream_key: StreamKey::Ordered(StreamId(0)),
            ssn: Ssn(0),
            mid: Mid(0),
            fsn: Fsn(0),
            ppid: PpId(0),
            payload: Vec::new(),
            is_beginning: false,
            is_end: false,
        }
    }
}

impl Data {
    pub(crate) fn fragment_kind(&self) -> &'static str {
        match (self.is_beginning, self.is_end) {
            (true, true) => "complete",
            (true, false) => "first",
            (false, true) => "last",
            (false, false) => "middle",
        }
    }

    pub(crate) fn ordering(&self) -> &'static str {
        if self.stream_key.is_ordered() { "ordered" } else { "unordered" }
    }
}
