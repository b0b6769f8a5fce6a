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

use crate::api::Options;
use std::time::Duration;

/// Smoothing factors from <https://datatracker.ietf.org/doc/html/rfc6298#section-2>.
const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;
const K: f64 = 4.0;

/// The configured minimum RTT variance is divided by this before being used as a floor.
const MIN_RTT_VARIANCE_DIVISOR: f64 = 8.0;

/// Estimates the retransmission timeout from round-trip time samples.
pub struct RetransmissionTimeout {
    min_rto: f64,
    max_rto: f64,
    max_rtt: Duration,
    min_rtt_variance: f64,
    srtt: f64,
    rtt_var: Option<f64>,
    rto: Duration,
}

impl RetransmissionTimeout {
    pub fn new(options: &Options) -> Self {
        Self {
            min_rto: options.rto_min.as_secs_f64(),
            max_rto: options.rto_max.as_secs_f64(),
            max_rtt: options.rtt_max,
            min_rtt_variance: options.min_rtt_variance.as_secs_f64() / MIN_RTT_VARIANCE_DIVISOR,
            srtt: options.rto_initial.as_secs_f64(),
            rtt_var: None,
            rto: options.rto_initial,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Duration {
        Duration::from_secs_f64(self.srtt)
    }

    /// Feeds a measured round-trip time. Samples above `rtt_max` are dropped.
    pub fn observe_rtt(&mut self, sample: Duration) {
        if sample > self.max_rtt {
            log::debug!("Ignoring RTT sample {:?} above {:?}", sample, self.max_rtt);
            return;
        }
        let rtt = sample.as_secs_f64();

        let rtt_var = match self.rtt_var {
            None => {
                self.srtt = rtt;
                rtt / 2.0
            }
            Some(rtt_var) => {
                let rtt_var = (1.0 - BETA) * rtt_var + BETA * (self.srtt - rtt).abs();
                self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
                rtt_var
            }
        };
        let rtt_var = rtt_var.max(self.min_rtt_variance);
        self.rtt_var = Some(rtt_var);

        self.rto =
            Duration::from_secs_f64((self.srtt + K * rtt_var).clamp(self.min_rto, self.max_rto));
    }
}
