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

use crate::packet::SkippedStream;
use crate::packet::Tlv;
use crate::types::Tsn;
use std::fmt;

/// Forward TSN chunk
///
/// See <https://datatracker.ietf.org/doc/html/rfc3758#section-3.2>.
///
/// Only [`SkippedStream::ForwardTsn`] entries are valid in this chunk, each taking four bytes
/// (stream id and SSN).
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardTsnChunk {
    pub new_cumulative_tsn: Tsn,
    pub skipped_streams: Vec<SkippedStream>,
}

impl Tlv for ForwardTsnChunk {
    fn value_size(&self) -> usize {
        4 + self.skipped_streams.len() * 4
    }
}

impl fmt::Display for ForwardTsnChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FORWARD-TSN, new_cumulative_tsn={}", self.new_cumulative_tsn)?;
        for skipped in &self.skipped_streams {
            if let SkippedStream::ForwardTsn(stream_id, ssn) = skipped {
                write!(f, ", sid={stream_id}:ssn={ssn}")?;
            }
        }
        Ok(())
    }
}
