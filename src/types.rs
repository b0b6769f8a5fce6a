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
use std::cmp::Ordering;
use std::fmt;

/// Ordered/Unordered stream identifiers.
///
/// Ordered and unordered messages sent on the same [`StreamId`] have independent message
/// sequences, so internally they are kept apart by this key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StreamKey {
    Ordered(StreamId),
    Unordered(StreamId),
}

impl StreamKey {
    pub fn from(is_unordered: bool, id: StreamId) -> Self {
        if is_unordered { Self::Unordered(id) } else { Self::Ordered(id) }
    }

    pub fn id(&self) -> StreamId {
        match *self {
            StreamKey::Ordered(id) | StreamKey::Unordered(id) => id,
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Ordered(_))
    }

    pub fn is_unordered(&self) -> bool {
        matches!(self, Self::Unordered(_))
    }
}

/// Defines a wrapping sequence number with serial number arithmetic.
///
/// See <https://datatracker.ietf.org/doc/html/rfc1982#section-3.2>.
macro_rules! serial_number {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $signed:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
        pub struct $name(pub $raw);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                // Values exactly half the number space apart are undefined in serial arithmetic;
                // fall back to plain comparison to keep the relation total.
                match self.0.wrapping_sub(other.0) as $signed {
                    0 => Ordering::Equal,
                    d if d == <$signed>::MIN => self.0.cmp(&other.0),
                    d if d < 0 => Ordering::Less,
                    _ => Ordering::Greater,
                }
            }
        }

        impl std::ops::Add<$raw> for $name {
            type Output = $name;

            #[inline]
            fn add(self, rhs: $raw) -> $name {
                $name(self.0.wrapping_add(rhs))
            }
        }

        impl std::ops::Sub<$raw> for $name {
            type Output = $name;

            #[inline]
            fn sub(self, rhs: $raw) -> $name {
                $name(self.0.wrapping_sub(rhs))
            }
        }

        impl std::ops::AddAssign<$raw> for $name {
            fn add_assign(&mut self, rhs: $raw) {
                self.0 = self.0.wrapping_add(rhs);
            }
        }

        impl $name {
            /// Returns the (always positive) number of steps between `self` and `other`.
            pub fn distance_to(self, other: $name) -> $raw {
                if self > other {
                    self.0.wrapping_sub(other.0)
                } else {
                    other.0.wrapping_sub(self.0)
                }
            }
        }
    };
}

serial_number!(
    /// Stream Sequence Number (SSN), which orders messages sent in DATA chunks.
    Ssn, u16, i16
);
serial_number!(
    /// Message Identifier (MID)
    Mid, u32, i32
);
serial_number!(
    /// Fragment Sequence Number (FSN)
    Fsn, u32, i32
);
serial_number!(
    /// Transmission Sequence Number (TSN)
    Tsn, u32, i32
);

/// An ID for every outgoing message, to correlate outgoing data chunks with the message it was
/// carved from. It can only be compared by equality.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct OutgoingMessageId(pub u32);

impl fmt::Debug for OutgoingMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for OutgoingMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::AddAssign<u32> for OutgoingMessageId {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

/// Defines a monotonic 64-bit widening of a wrapping sequence number, and the unwrapper that
/// produces it.
macro_rules! unwrapped_sequence_number {
    ($(#[$meta:meta])* $unwrapped:ident, $unwrapper:ident, $wrapped:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $unwrapped(i64);

        impl $unwrapped {
            pub fn wrap(self) -> $wrapped {
                $wrapped(self.0 as u32)
            }

            pub fn next_value(self) -> Self {
                Self(self.0 + 1)
            }

            pub fn prev_value(self) -> Self {
                Self(self.0 - 1)
            }

            pub fn add_to(self, delta: u32) -> Self {
                Self(self.0 + i64::from(delta))
            }

            /// Returns `other - self`, which is negative if `other` precedes `self`.
            pub fn difference(self, other: Self) -> i64 {
                other.0 - self.0
            }
        }

        impl fmt::Debug for $unwrapped {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", self.wrap(), self.0)
            }
        }

        impl fmt::Display for $unwrapped {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.wrap(), f)
            }
        }

        /// Widens wrapping values relative to the largest value unwrapped so far. A value is
        /// interpreted as the closest one (in either direction) to that reference.
        #[derive(Clone, Debug, Default)]
        pub struct $unwrapper {
            largest: Option<$unwrapped>,
        }

        impl $unwrapper {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn unwrap(&mut self, value: $wrapped) -> $unwrapped {
                let unwrapped = self.peek_without_update(value);
                if self.largest.is_none_or(|largest| unwrapped > largest) {
                    self.largest = Some(unwrapped);
                }
                unwrapped
            }

            pub fn peek_without_update(&self, value: $wrapped) -> $unwrapped {
                match self.largest {
                    None => $unwrapped(i64::from(value.0)),
                    Some(largest) => {
                        let delta = value.0.wrapping_sub(largest.0 as u32) as i32;
                        $unwrapped(largest.0 + i64::from(delta))
                    }
                }
            }

            pub fn reset(&mut self) {
                self.largest = None;
            }
        }
    };
}

unwrapped_sequence_number!(
    /// A [`Tsn`] that never wraps, used as key wherever TSNs are stored.
    UnwrappedTsn, TsnUnwrapper, Tsn
);
unwrapped_sequence_number!(
    /// A [`Mid`] that never wraps.
    UnwrappedMid, MidUnwrapper, Mid
);
