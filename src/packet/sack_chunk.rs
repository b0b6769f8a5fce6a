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

use crate::packet::TLV_HEADER_SIZE;
use crate::packet::Tlv;
use crate::types::Tsn;
use std::fmt;

/// A range of TSNs that have been received, relative to the cumulative TSN ack.
///
/// Both `start` and `end` are inclusive offsets: a block `(2, 4)` with a cumulative TSN ack of 100
/// covers TSNs 102, 103 and 104.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GapAckBlock {
    pub start: u16,
    pub end: u16,
}

impl GapAckBlock {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }
}

/// Size of a SACK chunk without gap ack blocks or duplicate TSNs.
pub const MIN_SIZE: usize = 16;

/// Selective Acknowledgement (SACK) chunk. Gap ack blocks and duplicate TSNs take four bytes each.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.4>.
#[derive(Clone, Debug, PartialEq)]
pub struct SackChunk {
    pub cumulative_tsn_ack: Tsn,
    pub a_rwnd: u32,
    pub gap_ack_blocks: Vec<GapAckBlock>,
    pub duplicate_tsns: Vec<Tsn>,
}

impl Tlv for SackChunk {
    fn value_size(&self) -> usize {
        MIN_SIZE - TLV_HEADER_SIZE + (self.gap_ack_blocks.len() + self.duplicate_tsns.len()) * 4
    }
}

impl fmt::Display for SackChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SACK, cum_ack_tsn={}, a_rwnd={}", self.cumulative_tsn_ack, self.a_rwnd)?;
        for block in &self.gap_ack_blocks {
            write!(
                f,
                ", gap={}-{}",
                self.cumulative_tsn_ack + block.start as u32,
                self.cumulative_tsn_ack + block.end as u32
            )?;
        }
        if !self.duplicate_tsns.is_empty() {
            write!(f, ", dup_tsns={:?}", self.duplicate_tsns)?;
        }
        Ok(())
    }
}
