//! Network selector and its per-network daemon parameters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// File name of the daemon configuration inside a data directory.
pub const CONF_FILE_NAME: &str = "zip.conf";

/// File name of the daemon pid file inside a network data directory.
pub const PID_FILE_NAME: &str = "zipd.pid";

/// Identifies which chain the supervised daemons run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// The production network.
    #[default]
    #[serde(alias = "mainnet")]
    Livenet,
    /// The public test network.
    Testnet,
    /// Local regression-test network.
    Regtest,
}

impl Network {
    /// Parse a user-supplied network name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "livenet" | "mainnet" | "main" => Some(Self::Livenet),
            "testnet" | "test" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Livenet => "livenet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    /// RPC port the daemon listens on when the conf does not set one.
    pub fn default_rpc_port(&self) -> u16 {
        match self {
            Self::Livenet => 9998,
            Self::Testnet | Self::Regtest => 19998,
        }
    }

    /// Sub-directory of the data directory the daemon uses for this network.
    pub fn data_subdir(&self) -> Option<&'static str> {
        match self {
            Self::Livenet => None,
            Self::Testnet => Some("testnet3"),
            Self::Regtest => Some("regtest"),
        }
    }

    /// Relative path of the network-specific conf, e.g. `testnet3/zip.conf`.
    pub fn network_config_path(&self) -> Option<String> {
        self.data_subdir()
            .map(|dir| format!("{dir}/{CONF_FILE_NAME}"))
    }

    /// Command-line flag that selects this network on the daemon.
    pub fn daemon_flag(&self) -> Option<&'static str> {
        match self {
            Self::Livenet => None,
            Self::Testnet => Some("--testnet"),
            Self::Regtest => Some("--regtest"),
        }
    }

    /// Base58 version byte of pay-to-pubkey-hash addresses.
    pub fn pubkey_hash_version(&self) -> u8 {
        match self {
            Self::Livenet => 0x4c,
            Self::Testnet | Self::Regtest => 0x8c,
        }
    }

    /// Base58 version byte of pay-to-script-hash addresses.
    pub fn script_hash_version(&self) -> u8 {
        match self {
            Self::Livenet => 0x10,
            Self::Testnet | Self::Regtest => 0x13,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
