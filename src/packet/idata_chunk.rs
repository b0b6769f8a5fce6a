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

use crate::packet::Tlv;
use crate::packet::data::Data;
use crate::types::Tsn;
use std::fmt;

/// Size of the I-DATA chunk header, including the TLV header.
pub const HEADER_SIZE: usize = 20;

/// Interleaved Payload Data (I-DATA) chunk
///
/// See <https://datatracker.ietf.org/doc/html/rfc8260#section-2.1>.
#[derive(Debug, PartialEq)]
pub struct IDataChunk {
    pub tsn: Tsn,
    pub data: Data,
}

impl Tlv for IDataChunk {
    fn value_size(&self) -> usize {
        HEADER_SIZE - super::TLV_HEADER_SIZE + self.data.payload.len()
    }
}

impl fmt::Display for IDataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "I-DATA, type={}::{}, tsn={}, sid={}, mid={}, fsn={}, length={}",
            self.data.ordering(),
            self.data.fragment_kind(),
            self.tsn,
            self.data.stream_key.id(),
            self.data.mid,
            self.data.fsn,
            self.data.payload.len()
        )
    }
}
