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
use crate::types::StreamKey;
use crate::types::Tsn;
use std::fmt;

/// I-FORWARD-TSN chunk
///
/// See <https://datatracker.ietf.org/doc/html/rfc8260#section-2.3.1>.
///
/// Only [`SkippedStream::IForwardTsn`] entries are valid in this chunk, each taking eight bytes
/// (stream id, U flag and MID).
#[derive(Clone, Debug, PartialEq)]
pub struct IForwardTsnChunk {
    pub new_cumulative_tsn: Tsn,
    pub skipped_streams: Vec<SkippedStream>,
}

impl Tlv for IForwardTsnChunk {
    fn value_size(&self) -> usize {
        4 + self.skipped_streams.len() * 8
    }
}

impl fmt::Display for IForwardTsnChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I-FORWARD-TSN, new_cumulative_tsn={}", self.new_cumulative_tsn)?;
        for skipped in &self.skipped_streams {
            if let SkippedStream::IForwardTsn(key, mid) = skipped {
                let u = if let StreamKey::Unordered(_) = key { "u" } else { "" };
                write!(f, ", sid={}{u}:mid={mid}", key.id())?;
            }
        }
        Ok(())
    }
}
