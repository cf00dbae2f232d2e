//! The daemon's `zip.conf`: parsing, the default file, and the index checks
//! the service depends on.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use zipcore_rpc::RpcEndpoint;
use zipcore_types::network::CONF_FILE_NAME;
use zipcore_types::Network;

use crate::NodeError;

/// Contents written when the data directory has no `zip.conf`.
pub const DEFAULT_CONF: &str = "\
server=1
whitelist=127.0.0.1
txindex=1
addressindex=1
timestampindex=1
spentindex=1
zmqpubrawtx=tcp://127.0.0.1:28332
zmqpubhashblock=tcp://127.0.0.1:28332
zmqpubrawtxlock=tcp://127.0.0.1:28332
rpcallowip=127.0.0.1
rpcuser=zip
rpcpassword=local321
uacomment=zipcore
";

/// One conf value. Values made only of digits are integers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfValue {
    Int(i64),
    Text(String),
}

impl ConfValue {
    fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => ConfValue::Int(n),
            Err(_) => ConfValue::Text(raw.to_string()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfValue::Int(n) => Some(*n),
            ConfValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ConfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfValue::Int(n) => write!(f, "{n}"),
            ConfValue::Text(s) => f.write_str(s),
        }
    }
}

/// Parsed `key=value` daemon configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DaemonConf {
    values: BTreeMap<String, ConfValue>,
}

impl DaemonConf {
    /// Parse `key=value` lines. `#` starts a comment; lines without `=` are
    /// ignored. A repeated key keeps its last value.
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = match line.find('#') {
                Some(i) => &line[..i],
                None => line,
            };
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    values.insert(key.to_string(), ConfValue::parse(value.trim()));
                }
            }
        }
        Self { values }
    }

    /// Values of `other` override this conf's.
    pub fn merge(&mut self, other: DaemonConf) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&ConfValue> {
        self.values.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ConfValue::as_int)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(ConfValue::to_string)
    }

    pub fn set(&mut self, key: &str, value: ConfValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn rpc_port(&self, network: Network) -> u16 {
        self.get_int("rpcport")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or_else(|| network.default_rpc_port())
    }

    /// Local RPC endpoint of a spawned daemon.
    pub fn rpc_endpoint(&self, network: Network) -> RpcEndpoint {
        RpcEndpoint {
            protocol: "http".into(),
            host: "127.0.0.1".into(),
            port: self.rpc_port(network),
            user: self.get_string("rpcuser").unwrap_or_default(),
            password: self.get_string("rpcpassword").unwrap_or_default(),
        }
    }

    /// Verify the daemon runs with the indexes and notifications the service
    /// needs. Returns whether the daemon was asked to reindex.
    pub fn check_indexes(&self) -> Result<bool, NodeError> {
        if self.get_int("txindex") != Some(1) {
            return Err(NodeError::Config(
                "\"txindex\" option is required in order to use transaction query features \
                 (set txindex=1 in zip.conf and restart with -reindex)"
                    .into(),
            ));
        }
        for key in ["addressindex", "spentindex", "server"] {
            if self.get_int(key) != Some(1) {
                return Err(NodeError::Config(format!(
                    "\"{key}\" option is required (set {key}=1 in zip.conf)"
                )));
            }
        }
        for key in ["zmqpubrawtx", "zmqpubhashblock", "zmqpubrawtxlock"] {
            if self.get(key).is_none() {
                return Err(NodeError::Config(format!(
                    "\"{key}\" option is required to get event updates (for example {key}=tcp://127.0.0.1:<port>)"
                )));
            }
        }
        if self.get("zmqpubrawtx") != self.get("zmqpubhashblock") {
            return Err(NodeError::Config(
                "\"zmqpubrawtx\" and \"zmqpubhashblock\" are expected to be the same host and port in zip.conf"
                    .into(),
            ));
        }

        let reindex = self.get_int("reindex") == Some(1);
        if reindex {
            warn!(
                "reindex option is currently enabled, this means that zipd is undergoing a reindex; \
                 remove reindex=1 from zip.conf once it completes"
            );
        }
        Ok(reindex)
    }
}

/// A spawn section resolved against the filesystem.
#[derive(Clone, Debug)]
pub struct SpawnConfiguration {
    pub datadir: PathBuf,
    pub exec: PathBuf,
    pub config_path: PathBuf,
    pub conf: DaemonConf,
    pub reindex: bool,
}

impl SpawnConfiguration {
    /// Resolve the data directory, write the default conf if missing,
    /// parse and validate it.
    pub fn load(
        datadir: &Path,
        exec: &Path,
        service_config_path: Option<&Path>,
        network: Network,
    ) -> Result<Self, NodeError> {
        let datadir = expand_datadir(datadir, service_config_path);
        let config_path = datadir.join(CONF_FILE_NAME);

        if !config_path.exists() {
            std::fs::create_dir_all(&datadir)?;
            std::fs::write(&config_path, DEFAULT_CONF)?;
            info!(path = %config_path.display(), "wrote default zip.conf");
        }
        let mut conf = DaemonConf::parse(&std::fs::read_to_string(&config_path)?);

        if let Some(relative) = network.network_config_path() {
            let network_path = datadir.join(relative);
            if network_path.exists() {
                conf.merge(DaemonConf::parse(&std::fs::read_to_string(network_path)?));
            }
        }

        let reindex = conf.check_indexes()?;
        Ok(Self {
            datadir,
            exec: exec.to_path_buf(),
            config_path,
            conf,
            reindex,
        })
    }

    /// Arguments the daemon is launched with.
    pub fn args(&self, network: Network) -> Vec<String> {
        let mut args = vec![
            format!("--conf={}", self.config_path.display()),
            format!("--datadir={}", self.datadir.display()),
        ];
        if let Some(flag) = network.daemon_flag() {
            args.push(flag.to_string());
        }
        args
    }
}

/// Resolve a relative data directory against the directory holding the
/// service config file.
pub fn expand_datadir(datadir: &Path, service_config_path: Option<&Path>) -> PathBuf {
    if datadir.is_absolute() {
        return datadir.to_path_buf();
    }
    let base = service_config_path
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let joined = base.join(datadir);
    // Drop `.` components so `/a/b/./data` reads `/a/b/data`.
    joined
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}
