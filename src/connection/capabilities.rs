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
use crate::api::handover::HandoverCapabilities;

/// Indicates what the connection supports, meaning that both parties support it and that feature
/// can be used.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Capabilities {
    /// RFC 3758 Partial Reliability Extension
    pub partial_reliability: bool,

    /// RFC 8260 Stream Schedulers and User Message Interleaving
    pub message_interleaving: bool,

    /// RFC 6525 Stream Reconfiguration
    pub reconfig: bool,
}

impl Capabilities {
    /// Combines what the peer announced during the handshake with what is enabled locally.
    /// Stream reconfiguration is always supported locally.
    pub fn negotiate(options: &Options, peer: &Capabilities) -> Self {
        Capabilities {
            partial_reliability: options.enable_partial_reliability && peer.partial_reliability,
            message_interleaving: options.enable_message_interleaving && peer.message_interleaving,
            reconfig: peer.reconfig,
        }
    }
}

impl From<&HandoverCapabilities> for Capabilities {
    fn from(value: &HandoverCapabilities) -> Self {
        Capabilities {
            partial_reliability: value.partial_reliability,
            message_interleaving: value.message_interleaving,
            reconfig: value.reconfig,
        }
    }
}

impl From<Capabilities> for HandoverCapabilities {
    fn from(value: Capabilities) -> Self {
        HandoverCapabilities {
            partial_reliability: value.partial_reliability,
            message_interleaving: value.message_interleaving,
            reconfig: value.reconfig,
        }
    }
}
