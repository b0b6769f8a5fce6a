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

//! Congestion control of a single path, as described in RFC 9260 section 7.2.

use crate::api::Options;
use crate::api::handover::ConnectionHandoverState;
use crate::types::UnwrappedTsn;
use std::cmp::max;

/// The congestion window and the state that decides how it grows and shrinks.
#[derive(Debug)]
pub(crate) struct CongestionControl {
    mtu: usize,

    /// The smallest window after a loss has been detected by a SACK.
    min_cwnd_after_loss: usize,

    /// Number of bytes that may be in flight.
    cwnd: usize,

    /// Slow start threshold.
    ssthresh: usize,

    partial_bytes_acked: usize,

    /// Fast recovery lasts until this TSN has been cumulatively acked.
    fast_recovery_exit_tsn: Option<UnwrappedTsn>,
}

impl CongestionControl {
    pub fn new(options: &Options, a_rwnd: usize) -> Self {
        Self {
            mtu: options.mtu,
            min_cwnd_after_loss: options.cwnd_mtus_min * options.mtu,
            cwnd: options.cwnd_mtus_initial * options.mtu,
            ssthresh: a_rwnd,
            partial_bytes_acked: 0,
            fast_recovery_exit_tsn: None,
        }
    }

    pub fn cwnd(&self) -> usize {
        self.cwnd
    }

    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    pub fn is_in_fast_recovery(&self) -> bool {
        self.fast_recovery_exit_tsn.is_some()
    }

    fn is_in_slow_start(&self) -> bool {
        self.cwnd <= self.ssthresh
    }

    /// Returns how many more bytes the window allows, given what's already in flight.
    pub fn available(&self, unacked_bytes: usize) -> usize {
        self.cwnd.saturating_sub(unacked_bytes)
    }

    /// Leaves fast recovery once its exit point has been cumulatively acked. Called before loss
    /// is evaluated for the same SACK, so that a new loss can start a new recovery.
    pub fn on_cumulative_tsn_ack(&mut self, cumulative_tsn_ack: UnwrappedTsn) {
        if self.fast_recovery_exit_tsn.is_some_and(|exit| cumulative_tsn_ack >= exit) {
            log::debug!("Leaving fast recovery at {}", cumulative_tsn_ack);
            self.fast_recovery_exit_tsn = None;
        }
    }

    /// Grows the window after the cumulative TSN ack advanced. `unacked_bytes` is what was in
    /// flight before the SACK.
    pub fn on_cumulative_tsn_advanced(&mut self, unacked_bytes: usize, bytes_acked: usize) {
        // The window only grows when it's actually used. One MTU of slack covers packets that
        // weren't filled completely.
        let is_fully_utilized = unacked_bytes + self.mtu >= self.cwnd;
        let old_cwnd = self.cwnd;

        if self.is_in_slow_start() {
            if is_fully_utilized && !self.is_in_fast_recovery() {
                self.cwnd += bytes_acked;
                log::debug!("Slow start: cwnd={} ({})", self.cwnd, old_cwnd);
            }
            return;
        }

        // RFC 9260 section 7.2.2, with the RFC 8540 section 3.12 errata applied.
        let old_pba = self.partial_bytes_acked;
        self.partial_bytes_acked += bytes_acked;
        if is_fully_utilized && self.partial_bytes_acked >= self.cwnd {
            self.partial_bytes_acked -= self.cwnd;
            self.cwnd += self.mtu;
        }
        log::debug!(
            "Congestion avoidance: cwnd={} ({}), ssthresh={}, pba={} ({})",
            self.cwnd,
            old_cwnd,
            self.ssthresh,
            self.partial_bytes_acked,
            old_pba
        );
    }

    /// Shrinks the window after a SACK reported loss, and enters fast recovery until
    /// `highest_outstanding_tsn` has been acked. Further losses during recovery change nothing.
    pub fn on_packet_loss(&mut self, highest_outstanding_tsn: UnwrappedTsn) {
        if self.is_in_fast_recovery() {
            log::debug!("Loss during fast recovery; cwnd stays at {}", self.cwnd);
            return;
        }
        let old_cwnd = self.cwnd;
        self.ssthresh = max(self.cwnd / 2, self.min_cwnd_after_loss);
        self.cwnd = self.ssthresh;
        self.partial_bytes_acked = 0;
        self.fast_recovery_exit_tsn = Some(highest_outstanding_tsn);
        log::debug!(
            "Loss detected: cwnd={} ({}), ssthresh={}, recovery until {}",
            self.cwnd,
            old_cwnd,
            self.ssthresh,
            highest_outstanding_tsn
        );
    }

    /// Collapses the window to one MTU after the retransmission timer expired (RFC 9260 section
    /// 6.3.3), and abandons any fast recovery.
    pub fn on_retransmission_timeout(&mut self) {
        self.ssthresh = max(self.cwnd / 2, 4 * self.mtu);
        self.cwnd = self.mtu;
        // RFC 8540 section 3.11.
        self.partial_bytes_acked = 0;
        self.fast_recovery_exit_tsn = None;
    }

    pub fn add_to_handover_state(&self, state: &mut ConnectionHandoverState) {
        state.tx.cwnd = self.cwnd as u32;
        state.tx.ssthresh = self.ssthresh as u32;
        state.tx.partial_bytes_acked = self.partial_bytes_acked as u32;
    }

    pub fn restore_from_state(&mut self, state: &ConnectionHandoverState) {
        self.cwnd = state.tx.cwnd as usize;
        self.ssthresh = state.tx.ssthresh as usize;
        self.partial_bytes_acked = state.tx.partial_bytes_acked as usize;
        self.fast_recovery_exit_tsn = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tsn;
    use crate::types::TsnUnwrapper;

    const MTU: usize = 1000;

    fn options() -> Options {
        Options { mtu: MTU, cwnd_mtus_initial: 10, cwnd_mtus_min: 4, ..Default::default() }
    }

    fn tsn(value: u32) -> UnwrappedTsn {
        TsnUnwrapper::new().unwrap(Tsn(value))
    }

    #[test]
    fn slow_start_grows_by_bytes_acked_when_fully_utilized() {
        let mut cc = CongestionControl::new(&options(), 100_000);
        cc.on_cumulative_tsn_advanced(10 * MTU, 3 * MTU);
        assert_eq!(cc.cwnd(), 13 * MTU);

        // Not using the window doesn't grow it.
        cc.on_cumulative_tsn_advanced(2 * MTU, 2 * MTU);
        assert_eq!(cc.cwnd(), 13 * MTU);
    }

    #[test]
    fn congestion_avoidance_grows_one_mtu_per_window() {
        let mut cc = CongestionControl::new(&options(), 5 * MTU);
        assert_eq!(cc.ssthresh(), 5 * MTU);

        cc.on_cumulative_tsn_advanced(10 * MTU, 6 * MTU);
        assert_eq!(cc.cwnd(), 10 * MTU);
        cc.on_cumulative_tsn_advanced(10 * MTU, 4 * MTU);
        assert_eq!(cc.cwnd(), 11 * MTU);
        assert_eq!(cc.partial_bytes_acked, 0);
    }

    #[test]
    fn loss_halves_window_once_per_recovery() {
        let mut cc = CongestionControl::new(&options(), 100_000);
        cc.on_packet_loss(tsn(20));
        assert_eq!(cc.cwnd(), 5 * MTU);
        assert_eq!(cc.ssthresh(), 5 * MTU);
        assert!(cc.is_in_fast_recovery());

        cc.on_packet_loss(tsn(25));
        assert_eq!(cc.cwnd(), 5 * MTU);

        cc.on_cumulative_tsn_ack(tsn(19));
        assert!(cc.is_in_fast_recovery());
        cc.on_cumulative_tsn_ack(tsn(20));
        assert!(!cc.is_in_fast_recovery());

        cc.on_packet_loss(tsn(30));
        assert_eq!(cc.cwnd(), 4 * MTU);
    }

    #[test]
    fn timeout_collapses_window_to_one_mtu() {
        let mut cc = CongestionControl::new(&options(), 100_000);
        cc.on_packet_loss(tsn(20));
        cc.on_retransmission_timeout();
        assert_eq!(cc.cwnd(), MTU);
        assert_eq!(cc.ssthresh(), 4 * MTU);
        assert!(!cc.is_in_fast_recovery());
        assert_eq!(cc.available(0), MTU);
        assert_eq!(cc.available(2 * MTU), 0);
    }
}
