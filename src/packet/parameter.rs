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

use crate::packet::Tlv;
use crate::packet::incoming_ssn_reset_request_parameter::IncomingSsnResetRequestParameter;
use crate::packet::outgoing_ssn_reset_request_parameter::OutgoingSsnResetRequestParameter;
use crate::packet::reconfiguration_response_parameter::ReconfigurationResponseParameter;
use std::fmt;

/// A parameter carried in a RE-CONFIG chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    OutgoingSsnResetRequest(OutgoingSsnResetRequestParameter),
    IncomingSsnResetRequest(IncomingSsnResetRequestParameter),
    ReconfigurationResponse(ReconfigurationResponseParameter),
}

impl Parameter {
    /// The parameter type, as assigned in RFC 6525.
    pub fn parameter_type(&self) -> u16 {
        match self {
            Parameter::OutgoingSsnResetRequest(_) => 13,
            Parameter::IncomingSsnResetRequest(_) => 14,
            Parameter::ReconfigurationResponse(_) => 16,
        }
    }

    pub fn serialized_size(&self) -> usize {
        match self {
            Parameter::OutgoingSsnResetRequest(p) => p.serialized_size(),
            Parameter::IncomingSsnResetRequest(p) => p.serialized_size(),
            Parameter::ReconfigurationResponse(p) => p.serialized_size(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::OutgoingSsnResetRequest(p) => fmt::Display::fmt(p, f),
            Parameter::IncomingSsnResetRequest(p) => fmt::Display::fmt(p, f),
            Parameter::ReconfigurationResponse(p) => fmt::Display::fmt(p, f),
        }
    }
}
