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

use crate::api::StreamId;
use crate::packet::Tlv;
use crate::types::Tsn;
use core::fmt;

/// Outgoing SSN Reset Request parameter
///
/// Sent by the side that wants to reset its outgoing streams. Stream ids take two bytes each.
///
/// See <https://datatracker.ietf.org/doc/html/rfc6525#section-4.1>.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingSsnResetRequestParameter {
    pub request_seq_nbr: u32,
    pub response_seq_nbr: u32,
    pub sender_last_assigned_tsn: Tsn,
    pub streams: Vec<StreamId>,
}

impl Tlv for OutgoingSsnResetRequestParameter {
    fn value_size(&self) -> usize {
        12 + self.streams.len() * 2
    }
}

impl fmt::Display for OutgoingSsnResetRequestParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Outgoing SSN Reset Request, req_seq_nbr={}, resp_seq_nbr={}, sender_last_assigned_tsn={}, streams={:?}",
            self.request_seq_nbr, self.response_seq_nbr, self.sender_last_assigned_tsn, self.streams
        )
    }
}
