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

use crate::api::SocketTime;
use std::cmp::min;
use std::time::Duration;

/// Upper bound of any timer duration, including backoff.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

// Doubling more often than this is pointless, as `MAX_DURATION` is reached anyway.
const MAX_BACKOFF_COUNT: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackoffAlgorithm {
    Fixed,
    Exponential,
}

/// A polled timer.
///
/// Nothing fires by itself: the owner asks [`Timer::next_expiry`] when to come back, and calls
/// [`Timer::expire`] with the current time. An expired timer restarts on its own, measured from
/// the previous expiry rather than from `now`, until `max_restarts` is reached. A timer with a zero
/// duration is never scheduled, so owners that only know the duration when starting the timer
/// (like the reconfig timer, which uses the current RTO) create it with [`Duration::ZERO`] and set
/// the duration before starting.
pub struct Timer {
    name: &'static str,
    base_duration: Duration,
    expiration_count: u32,
    backoff_algorithm: BackoffAlgorithm,
    max_restarts: Option<u32>,
    max_backoff_duration: Duration,
    next_expiry: Option<SocketTime>,
}

impl Timer {
    pub fn new(
        name: &'static str,
        duration: Duration,
        backoff_algorithm: BackoffAlgorithm,
        max_restarts: Option<u32>,
        max_backoff_duration: Option<Duration>,
    ) -> Self {
        Self {
            name,
            base_duration: duration,
            backoff_algorithm,
            expiration_count: 0,
            max_restarts,
            max_backoff_duration: min(max_backoff_duration.unwrap_or(MAX_DURATION), MAX_DURATION),
            next_expiry: None,
        }
    }

    fn backoff_duration(&self) -> Duration {
        let duration = match self.backoff_algorithm {
            BackoffAlgorithm::Fixed => self.base_duration,
            BackoffAlgorithm::Exponential => {
                let doublings = self.expiration_count.min(MAX_BACKOFF_COUNT);
                self.base_duration.saturating_mul(1 << doublings)
            }
        };
        min(duration, self.max_backoff_duration)
    }

    fn schedule_from(&self, from: SocketTime) -> Option<SocketTime> {
        (self.base_duration != Duration::ZERO).then(|| from + self.backoff_duration())
    }

    /// Returns true if the timer expired at or before `now`, in which case it's either rescheduled
    /// (with backoff applied) or stopped, if out of restarts.
    pub fn expire(&mut self, now: SocketTime) -> bool {
        match self.next_expiry {
            Some(expiry) if expiry <= now => {
                self.expiration_count = self.expiration_count.saturating_add(1);
                let may_restart = self.max_restarts.is_none_or(|max| self.expiration_count <= max);
                self.next_expiry = if may_restart { self.schedule_from(expiry) } else { None };
                log::trace!(
                    "{} timer expired (count={}), next={:?}",
                    self.name,
                    self.expiration_count,
                    self.next_expiry
                );
                true
            }
            _ => false,
        }
    }

    pub fn next_expiry(&self) -> Option<SocketTime> {
        self.next_expiry
    }

    pub fn is_running(&self) -> bool {
        self.next_expiry.is_some()
    }

    pub fn stop(&mut self) {
        self.next_expiry = None;
    }

    /// (Re)starts the timer from `now`, forgetting any previous backoff.
    pub fn start(&mut self, now: SocketTime) {
        self.expiration_count = 0;
        self.next_expiry = self.schedule_from(now);
    }

    /// Changes the base duration. A running timer keeps its current expiry.
    pub fn set_duration(&mut self, duration: Duration) {
        self.base_duration = min(duration, MAX_DURATION);
    }

    pub fn duration(&self) -> Duration {
        self.base_duration
    }

    pub fn expiration_count(&self) -> u32 {
        self.expiration_count
    }
}
