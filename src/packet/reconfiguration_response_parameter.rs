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

use crate::packet::ChunkValueError;
use crate::packet::Tlv;
use core::fmt;

/// The result of a stream reset request, numbered as in
/// <https://datatracker.ietf.org/doc/html/rfc6525#section-4.4>.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconfigurationResponseResult {
    SuccessNothingToDo = 0,
    SuccessPerformed = 1,
    Denied = 2,
    ErrorWrongSSN = 3,
    ErrorRequestAlreadyInProgress = 4,
    ErrorBadSequenceNumber = 5,
    InProgress = 6,
}

impl TryFrom<u32> for ReconfigurationResponseResult {
    type Error = ChunkValueError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::SuccessNothingToDo,
            1 => Self::SuccessPerformed,
            2 => Self::Denied,
            3 => Self::ErrorWrongSSN,
            4 => Self::ErrorRequestAlreadyInProgress,
            5 => Self::ErrorBadSequenceNumber,
            6 => Self::InProgress,
            _ => return Err(ChunkValueError::InvalidResponseResult(value)),
        })
    }
}

/// Re-configuration Response parameter
///
/// See <https://datatracker.ietf.org/doc/html/rfc6525#section-4.4>. The optional next-TSN fields
/// only apply to SSN/TSN reset requests, which aren't used, and are never present.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconfigurationResponseParameter {
    pub response_seq_nbr: u32,
    pub result: ReconfigurationResponseResult,
}

impl Tlv for ReconfigurationResponseParameter {
    fn value_size(&self) -> usize {
        8
    }
}

impl fmt::Display for ReconfigurationResponseParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Re-configuration Response, resp_seq_nbr={}, result={:?}",
            self.response_seq_nbr, self.result
        )
    }
}
