use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target machine revision; decides which opcodes the optimiser may introduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvmVersion {
    Homestead,
    Byzantium,
    Constantinople,
    Petersburg,
    #[default]
    Istanbul,
}

impl EvmVersion {
    pub const ALL: [EvmVersion; 5] = [
        EvmVersion::Homestead,
        EvmVersion::Byzantium,
        EvmVersion::Constantinople,
        EvmVersion::Petersburg,
        EvmVersion::Istanbul,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EvmVersion::Homestead => "homestead",
            EvmVersion::Byzantium => "byzantium",
            EvmVersion::Constantinople => "constantinople",
            EvmVersion::Petersburg => "petersburg",
            EvmVersion::Istanbul => "istanbul",
        }
    }

    #[inline]
    pub fn has_bitwise_shifting(self) -> bool {
        self >= EvmVersion::Constantinople
    }
}

impl fmt::Display for EvmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EvmVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvmVersion::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown EVM version '{s}'"))
    }
}
