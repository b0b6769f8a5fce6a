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

use std::fmt;
use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;
use thiserror::Error;

pub mod handover;

/// A point in time, relative to an arbitrary epoch chosen by the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SocketTime(Duration);

impl SocketTime {
    pub const fn zero() -> SocketTime {
        SocketTime(Duration::ZERO)
    }

    pub const fn infinite_future() -> SocketTime {
        SocketTime(Duration::MAX)
    }
}

impl Add<Duration> for SocketTime {
    type Output = SocketTime;
    fn add(self, rhs: Duration) -> SocketTime {
        SocketTime(self.0.saturating_add(rhs))
    }
}

impl Sub<Duration> for SocketTime {
    type Output = SocketTime;
    fn sub(self, rhs: Duration) -> SocketTime {
        SocketTime(self.0.saturating_sub(rhs))
    }
}

impl Sub<SocketTime> for SocketTime {
    type Output = Duration;
    fn sub(self, rhs: SocketTime) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<Duration> for SocketTime {
    fn from(value: Duration) -> Self {
        SocketTime(value)
    }
}

impl From<SocketTime> for Duration {
    fn from(value: SocketTime) -> Self {
        value.0
    }
}

/// Stream Identifier
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub u16);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload Protocol Identifier (PPID)
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct PpId(pub u32);

impl fmt::Debug for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message, sent and received as a whole on a stream.
#[derive(Debug, PartialEq)]
pub struct Message {
    pub stream_id: StreamId,
    pub ppid: PpId,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(stream_id: StreamId, ppid: PpId, payload: Vec<u8>) -> Self {
        Message { stream_id, ppid, payload }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ErrorKind {
    /// Too many retransmissions or timeouts without progress, which typically indicates a loss of
    /// connectivity to the peer.
    TooManyRetries,

    /// The peer sent something that this side can't accept.
    ProtocolViolation,

    /// A receive buffer is full and incoming data was dropped.
    ResourceExhaustion,
}

/// Reasons for refusing to process an incoming chunk.
///
/// Returned (wrapped in an [`anyhow::Error`]) from the `handle_*` methods of
/// [`crate::connection::Connection`]. It's up to the caller to decide if the connection should be
/// closed.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ProtocolViolation {
    #[error("SACK with cumulative TSN ack {0} is stale or acknowledges unsent data")]
    InvalidSack(u32),

    #[error("DATA chunk with TSN {0} is outside of the receive window")]
    TsnOutOfWindow(u32),

    #[error("DATA chunk with TSN {0} has no user data")]
    EmptyData(u32),

    #[error("FORWARD-TSN received but partial reliability was not negotiated")]
    UnexpectedForwardTsn,

    #[error("FORWARD-TSN kind does not match the negotiated message interleaving")]
    WrongForwardTsnKind,

    #[error("RE-CONFIG received but stream reconfiguration was not negotiated")]
    UnexpectedReconfig,

    #[error("RE-CONFIG must hold one or two parameters of different kinds")]
    InvalidReconfig,

    #[error("Stream reset request sequence number {0} is out of sequence")]
    BadRequestSequenceNumber(u32),
}

/// User configurable options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Maximum SCTP packet size. Used as segment size by congestion control.
    pub mtu: usize,

    /// Maximum received window buffer size. This should be a bit larger than the largest sized
    /// message you want to be able to receive. This limits the memory used for buffering
    /// incomplete or out-of-order messages.
    pub max_receiver_window_buffer_size: usize,

    /// Max allowed RTT value. Larger measurements are discarded.
    pub rtt_max: Duration,

    /// Initial RTO value.
    pub rto_initial: Duration,

    /// Maximum RTO value.
    pub rto_max: Duration,

    /// Minimum RTO value. This must be larger than an expected peer delayed ack timeout.
    pub rto_min: Duration,

    /// If set, the upper bound of how large the exponentially backed off T3-rtx timeout can
    /// become.
    pub max_timer_backoff_duration: Option<Duration>,

    /// The maximum time when a SACK will be sent from the arrival of an unacknowledged packet.
    /// Whatever is smallest of RTO/2 and this will be used.
    pub delayed_ack_max_timeout: Duration,

    /// The minimum limit for the measured RTT variance.
    ///
    /// Setting this below the expected delayed ack timeout (+ margin) of the peer might result in
    /// unnecessary retransmissions, as the time it takes to ACK a DATA chunk is typically RTT +
    /// ATO (delayed ack timeout). The default ATO is 200 ms in common implementations, and a 20 ms
    /// margin covers processing time and clock granularity.
    pub min_rtt_variance: Duration,

    /// The initial congestion window size, in number of MTUs.
    pub cwnd_mtus_initial: usize,

    /// The minimum congestion window size, in number of MTUs, upon detection of packet loss by
    /// SACK. If the retransmission timer expires, the congestion window will be as small as one
    /// MTU. See <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.3>.
    pub cwnd_mtus_min: usize,

    /// Maximum number of consecutive transmission errors (timeouts) before the connection is
    /// considered broken. Set to None for no limit.
    pub max_retransmissions: Option<u32>,

    /// RFC 3758 Partial Reliability Extension
    pub enable_partial_reliability: bool,

    /// RFC 8260 Stream Schedulers and User Message Interleaving
    pub enable_message_interleaving: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            // Derived from the minimum guaranteed IPv6 MTU (1280 bytes):
            //
            //   1280 (IPv6 MTU)
            //    -40 (IPv6 header)
            //     -8 (UDP header)
            //    -24 (GCM AEAD overhead)
            //    -13 (DTLS record header)
            //     -4 (TURN ChannelData header)
            //   = 1191 bytes
            mtu: 1191,
            max_receiver_window_buffer_size: 5 * 1024 * 1024,
            rtt_max: Duration::from_secs(60),
            rto_initial: Duration::from_millis(500),
            rto_max: Duration::from_secs(60),
            rto_min: Duration::from_millis(400),
            max_timer_backoff_duration: None,
            delayed_ack_max_timeout: Duration::from_millis(200),
            min_rtt_variance: Duration::from_millis(220),
            cwnd_mtus_initial: 10,
            cwnd_mtus_min: 4,
            max_retransmissions: Some(10),
            enable_partial_reliability: true,
            enable_message_interleaving: false,
        }
    }
}

/// Events generated by a connection, pulled from its [`crate::EventSink`].
#[derive(Debug)]
pub enum SocketEvent {
    /// A complete message has been received.
    OnMessage(Message),

    /// A non-fatal error, or a fatal one that the caller is expected to act on (like
    /// [`ErrorKind::TooManyRetries`]).
    OnError(ErrorKind, String),

    /// The send queue had nothing more to produce while there was room to send.
    OnChunkProducerEmpty(),

    /// The peer refused to reset the given outgoing streams.
    OnStreamsResetFailed(Vec<StreamId>),

    /// The outgoing streams have been reset and their message identifiers start over.
    OnStreamsResetPerformed(Vec<StreamId>),

    /// The peer has reset its outgoing streams, which are incoming on this side.
    OnIncomingStreamReset(Vec<StreamId>),
}

#[derive(Debug, PartialEq)]
pub enum ResetStreamsStatus {
    /// The reset has been queued and will be requested as soon as possible.
    Performed,

    /// The peer doesn't support stream reconfiguration.
    NotSupported,
}
