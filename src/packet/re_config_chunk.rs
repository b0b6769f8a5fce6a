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
use crate::packet::parameter::Parameter;
use std::fmt;

/// Re-configuration Chunk (RE-CONFIG) chunk
///
/// See <https://datatracker.ietf.org/doc/html/rfc6525#section-3.1>.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReConfigChunk {
    pub parameters: Vec<Parameter>,
}

impl Tlv for ReConfigChunk {
    fn value_size(&self) -> usize {
        self.parameters.iter().map(Parameter::serialized_size).sum()
    }
}

impl fmt::Display for ReConfigChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RE-CONFIG")?;
        for parameter in &self.parameters {
            write!(f, ", [{parameter}]")?;
        }
        Ok(())
    }
}
