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
use core::fmt;

/// Incoming SSN Reset Request parameter
///
/// Sent to ask the peer to reset its outgoing streams, which are incoming on the sending side.
///
/// See <https://datatracker.ietf.org/doc/html/rfc6525#section-4.2>.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingSsnResetRequestParameter {
    pub request_seq_nbr: u32,
    pub streams: Vec<StreamId>,
}

impl Tlv for IncomingSsnResetRequestParameter {
    fn value_size(&self) -> usize {
        4 + self.streams.len() * 2
    }
}

impl fmt::Display for IncomingSsnResetRequestParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Incoming SSN Reset Request, req_seq_nbr={}, streams={:?}",
            self.request_seq_nbr, self.streams
        )
    }
}
