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

//! Helpers for asserting on the events emitted by components under test.

#[macro_export]
macro_rules! expect_event_0 {
    ($event:expr, $event_type:ident) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match e {
                $crate::api::SocketEvent::$event_type() => {}
                _ => panic!("Expected {}, got {:?}", stringify!($event_type), e),
            },
        }
    };
}

#[macro_export]
macro_rules! expect_event_1 {
    ($event:expr, $event_type:ident) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match e {
                $crate::api::SocketEvent::$event_type(d) => d,
                _ => panic!("Expected {}, got {:?}", stringify!($event_type), e),
            },
        }
    };
}

macro_rules! expect_on_message {
    ($event:expr) => {
        crate::expect_event_1!($event, OnMessage)
    };
}

macro_rules! expect_on_chunk_producer_empty {
    ($event:expr) => {
        crate::expect_event_0!($event, OnChunkProducerEmpty)
    };
}

macro_rules! expect_on_error {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match e {
                $crate::api::SocketEvent::OnError(kind, _) => kind,
                _ => panic!("Expected OnError, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_on_streams_reset_performed {
    ($event:expr) => {
        crate::expect_event_1!($event, OnStreamsResetPerformed)
    };
}

macro_rules! expect_on_streams_reset_failed {
    ($event:expr) => {
        crate::expect_event_1!($event, OnStreamsResetFailed)
    };
}

macro_rules! expect_on_incoming_stream_reset {
    ($event:expr) => {
        crate::expect_event_1!($event, OnIncomingStreamReset)
    };
}

macro_rules! expect_no_event {
    ($event:expr) => {
        match $event {
            None => {}
            Some(e) => panic!("Expected no event, got {:?}", e),
        }
    };
}

pub(crate) use expect_no_event;
pub(crate) use expect_on_chunk_producer_empty;
pub(crate) use expect_on_error;
pub(crate) use expect_on_incoming_stream_reset;
pub(crate) use expect_on_message;
pub(crate) use expect_on_streams_reset_failed;
pub(crate) use expect_on_streams_reset_performed;
