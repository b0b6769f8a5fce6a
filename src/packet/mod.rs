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

//! The chunks exchanged with the peer, as parsed values.
//!
//! Encoding and decoding is done by a separate codec layer. What's kept here are the logical
//! fields, and the encoded size of each chunk, which is needed to fill packets.

use crate::api::StreamId;
use crate::math::round_up_to_4;
use crate::packet::data_chunk::DataChunk;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::idata_chunk::IDataChunk;
use crate::packet::iforward_tsn_chunk::IForwardTsnChunk;
use crate::packet::re_config_chunk::ReConfigChunk;
use crate::packet::sack_chunk::SackChunk;
use crate::types::Mid;
use crate::types::Ssn;
use crate::types::StreamKey;
use std::fmt;
use thiserror::Error;

pub mod data;
pub mod data_chunk;
pub mod forward_tsn_chunk;
pub mod idata_chunk;
pub mod iforward_tsn_chunk;
pub mod incoming_ssn_reset_request_parameter;
pub mod outgoing_ssn_reset_request_parameter;
pub mod parameter;
pub mod re_config_chunk;
pub mod reconfiguration_response_parameter;
pub mod sack_chunk;

/// Size of the Type-Length-Value header, used by chunks and parameters.
pub(crate) const TLV_HEADER_SIZE: usize = 4;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ChunkValueError {
    #[error("Invalid reconfiguration response result: {0}")]
    InvalidResponseResult(u32),
}

/// A chunk or parameter with a Type-Length-Value encoding.
pub trait Tlv {
    /// Size of the value, excluding the TLV header and padding.
    fn value_size(&self) -> usize;

    /// Size when encoded, including header and padding.
    fn serialized_size(&self) -> usize {
        round_up_to_4!(TLV_HEADER_SIZE + self.value_size())
    }
}

/// A stream and message that a FORWARD-TSN or I-FORWARD-TSN allows the receiver to skip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SkippedStream {
    /// Skip ordered messages on the stream up to and including the SSN.
    ForwardTsn(StreamId, Ssn),
    /// Skip messages on the stream (ordered or unordered) up to and including the MID.
    IForwardTsn(StreamKey, Mid),
}

#[derive(Debug)]
pub enum Chunk {
    Data(DataChunk),
    IData(IDataChunk),
    Sack(SackChunk),
    ForwardTsn(ForwardTsnChunk),
    IForwardTsn(IForwardTsnChunk),
    ReConfig(ReConfigChunk),
}

impl Chunk {
    pub fn serialized_size(&self) -> usize {
        match self {
            Chunk::Data(c) => c.serialized_size(),
            Chunk::IData(c) => c.serialized_size(),
            Chunk::Sack(c) => c.serialized_size(),
            Chunk::ForwardTsn(c) => c.serialized_size(),
            Chunk::IForwardTsn(c) => c.serialized_size(),
            Chunk::ReConfig(c) => c.serialized_size(),
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Data(c) => fmt::Display::fmt(c, f),
            Chunk::IData(c) => fmt::Display::fmt(c, f),
            Chunk::Sack(c) => fmt::Display::fmt(c, f),
            Chunk::ForwardTsn(c) => fmt::Display::fmt(c, f),
            Chunk::IForwardTsn(c) => fmt::Display::fmt(c, f),
            Chunk::ReConfig(c) => fmt::Display::fmt(c, f),
        }
    }
}
