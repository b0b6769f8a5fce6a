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

//! The reliable-delivery core of an SCTP association.
//!
//! This crate doesn't do any I/O and doesn't encode packets. It consumes already parsed chunks
//! (see [`packet::Chunk`]), produces chunks to be sent and reports everything else through
//! [`api::SocketEvent`]s that are pulled from an [`EventSink`]. Time is always given by the caller
//! and timers are polled; see [`connection::Connection::next_timeout`].

pub mod api;
pub mod connection;
pub mod events;
pub mod packet;
pub mod tx;
pub mod types;

pub(crate) mod rx;
pub(crate) mod timer;

/// Receiver of the events produced by a connection and its components.
pub trait EventSink {
    fn add(&mut self, event: api::SocketEvent);
    fn next_event(&mut self) -> Option<api::SocketEvent>;
}

#[cfg(test)]
pub(crate) mod testing;

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub(crate) mod math {
    macro_rules! round_up_to_4 {
        ($a: expr) => {
            ($a + 3) & !3
        };
    }

    macro_rules! round_down_to_4 {
        ($a: expr) => {
            $a & !3
        };
    }

    pub(crate) use round_down_to_4;
    pub(crate) use round_up_to_4;
}
