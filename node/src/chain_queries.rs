//! Block, transaction, network and governance queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;
use zipcore_rpc::error::RPC_INVALID_ADDRESS_OR_KEY;
use zipcore_rpc::responses::{SpentInfo, VerboseTransaction};
use zipcore_rpc::DaemonRpc;
use zipcore_types::{Block, Network, Transaction, TypesError};

use crate::model::{
    BlockHeaderInfo, BlockOverview, ChainInfo, DecodedTransaction, DetailedInput, DetailedOutput,
    DetailedTransaction, GovObject, MasternodeEntry, OutputRef, SporkList,
};
use crate::service::ZipService;
use crate::NodeError;

/// Default headers returned by [`ZipService::get_block_headers`].
pub const DEFAULT_HEADER_COUNT: usize = 25;

/// Fee-rate ceiling handed to `sendrawtransaction` unless overridden.
pub const DEFAULT_MAX_FEE_RATE: f64 = 0.1;

const MASTERNODE_LIST_KEY: &str = "list";

/// A block named by hash or by height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockRef {
    Hash(String),
    Height(u64),
}

impl From<u64> for BlockRef {
    fn from(height: u64) -> Self {
        BlockRef::Height(height)
    }
}

impl From<&str> for BlockRef {
    /// All-digit strings are heights; anything else is a hash.
    fn from(s: &str) -> Self {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(height) = s.parse() {
                return BlockRef::Height(height);
            }
        }
        BlockRef::Hash(s.to_string())
    }
}

impl From<String> for BlockRef {
    fn from(s: String) -> Self {
        BlockRef::from(s.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SendOptions {
    pub max_fee_rate: Option<f64>,
    /// Disable the fee-rate ceiling entirely.
    pub allow_absurd_fees: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GovObjectType {
    Proposal,
    Trigger,
}

impl GovObjectType {
    fn list_argument(&self) -> &'static str {
        match self {
            GovObjectType::Proposal => "proposals",
            GovObjectType::Trigger => "triggers",
        }
    }
}

/// Map a daemon "not found" answer to `None`.
pub(crate) fn none_if_not_found<T>(result: Result<T, NodeError>) -> Result<Option<T>, NodeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.rpc_code() == Some(RPC_INVALID_ADDRESS_OR_KEY) => Ok(None),
        Err(e) => Err(e),
    }
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, NodeError> {
    Ok(hex::decode(hex).map_err(TypesError::from)?)
}

impl ZipService {
    // ── Blocks ──────────────────────────────────────────────────────────

    /// Resolve a height to its block hash. Hashes pass through.
    pub async fn maybe_get_block_hash(&self, block: impl Into<BlockRef>) -> Result<String, NodeError> {
        match block.into() {
            BlockRef::Hash(hash) => Ok(hash),
            BlockRef::Height(height) => {
                self.pool
                    .try_all(|c| async move { c.get_block_hash(height).await })
                    .await
            }
        }
    }

    pub async fn get_raw_block(&self, block: impl Into<BlockRef>) -> Result<Vec<u8>, NodeError> {
        let hash = self.maybe_get_block_hash(block).await?;
        if let Some(raw) = self.caches.raw_block.get(&hash) {
            return Ok(raw);
        }
        let hex = self
            .pool
            .try_all(|c| {
                let hash = hash.clone();
                async move { c.get_block_raw(&hash).await }
            })
            .await?;
        let raw = decode_hex(&hex)?;
        self.caches.raw_block.put(hash, raw.clone());
        Ok(raw)
    }

    pub async fn get_block(&self, block: impl Into<BlockRef>) -> Result<Arc<Block>, NodeError> {
        let hash = self.maybe_get_block_hash(block).await?;
        if let Some(block) = self.caches.block.get(&hash) {
            return Ok(block);
        }
        let raw = self.get_raw_block(BlockRef::Hash(hash.clone())).await?;
        let block = Arc::new(Block::decode(&raw)?);
        self.caches.block.put(hash, block.clone());
        Ok(block)
    }

    pub async fn get_block_header(&self, block: impl Into<BlockRef>) -> Result<BlockHeaderInfo, NodeError> {
        let hash = self.maybe_get_block_hash(block).await?;
        if let Some(header) = self.caches.block_header.get(&hash) {
            return Ok(header);
        }
        let header: BlockHeaderInfo = self
            .pool
            .try_all(|c| {
                let hash = hash.clone();
                async move { c.get_block_header(&hash).await }
            })
            .await?
            .into();
        self.caches.block_header.put(hash, header.clone());
        Ok(header)
    }

    /// Up to `count` consecutive headers starting at `block`, stopping at
    /// the chain tip.
    pub async fn get_block_headers(
        &self,
        block: impl Into<BlockRef>,
        count: usize,
    ) -> Result<Vec<BlockHeaderInfo>, NodeError> {
        let mut headers = Vec::with_capacity(count.min(DEFAULT_HEADER_COUNT * 4));
        if count == 0 {
            return Ok(headers);
        }
        let mut next = Some(self.maybe_get_block_hash(block).await?);
        while let Some(hash) = next {
            let header = self.get_block_header(BlockRef::Hash(hash)).await?;
            next = header.next_hash.clone();
            headers.push(header);
            if headers.len() >= count {
                break;
            }
        }
        Ok(headers)
    }

    pub async fn get_block_overview(&self, block: impl Into<BlockRef>) -> Result<BlockOverview, NodeError> {
        let hash = self.maybe_get_block_hash(block).await?;
        if let Some(overview) = self.caches.block_overview.get(&hash) {
            return Ok(overview);
        }
        let overview: BlockOverview = self
            .pool
            .try_all(|c| {
                let hash = hash.clone();
                async move { c.get_block_verbose(&hash).await }
            })
            .await?
            .into();
        self.caches.block_overview.put(hash, overview.clone());
        Ok(overview)
    }

    /// Hashes of blocks with timestamps in `low..high`.
    pub async fn get_block_hashes_by_timestamp(&self, high: u64, low: u64) -> Result<Vec<String>, NodeError> {
        self.pool
            .try_all(|c| async move { c.get_block_hashes(high, low).await })
            .await
    }

    pub async fn get_best_block_hash(&self) -> Result<String, NodeError> {
        self.pool
            .try_all(|c| async move { c.get_best_block_hash().await })
            .await
    }

    pub async fn get_best_chain_lock(&self) -> Result<Value, NodeError> {
        self.pool
            .try_all(|c| async move { c.get_best_chain_lock().await })
            .await
    }

    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64, NodeError> {
        self.pool
            .try_all(|c| async move { c.estimate_fee(blocks).await })
            .await
    }

    pub async fn generate_block(&self, blocks: u32) -> Result<Vec<String>, NodeError> {
        self.pool
            .try_all(|c| async move { c.generate(blocks).await })
            .await
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Serialized transaction, or `None` if the daemon does not know it.
    pub async fn get_raw_transaction(&self, txid: &str) -> Result<Option<Vec<u8>>, NodeError> {
        if let Some(raw) = self.caches.raw_transaction.get(txid) {
            return Ok(Some(raw));
        }
        let hex = none_if_not_found(
            self.pool
                .try_all(|c| async move { c.get_raw_transaction(txid).await })
                .await,
        )?;
        let Some(hex) = hex else {
            return Ok(None);
        };
        let raw = decode_hex(&hex)?;
        self.caches.raw_transaction.put(txid, raw.clone());
        Ok(Some(raw))
    }

    /// Decoded transaction with the height of its block, or `None` if the
    /// daemon does not know it.
    pub async fn get_transaction(&self, txid: &str) -> Result<Option<DecodedTransaction>, NodeError> {
        if let Some(tx) = self.caches.transaction.get(txid) {
            return Ok(Some(tx));
        }
        let verbose = none_if_not_found(self.fetch_verbose_transaction(txid).await)?;
        let Some(verbose) = verbose else {
            return Ok(None);
        };
        let decoded = DecodedTransaction {
            tx: Transaction::from_hex(&verbose.hex)?,
            height: verbose.height.and_then(|h| u64::try_from(h).ok()),
        };
        self.caches.transaction.put(txid, decoded.clone());
        Ok(Some(decoded))
    }

    async fn fetch_verbose_transaction(&self, txid: &str) -> Result<VerboseTransaction, NodeError> {
        self.pool
            .try_all(|c| async move { c.get_raw_transaction_verbose(txid).await })
            .await
    }

    pub async fn get_detailed_transaction(&self, txid: &str) -> Result<DetailedTransaction, NodeError> {
        if let Some(tx) = self.caches.transaction_detailed.get(txid) {
            return Ok(tx);
        }
        let verbose = self.fetch_verbose_transaction(txid).await?;
        let detailed = detailed_transaction(txid, verbose);
        self.caches.transaction_detailed.put(txid, detailed.clone());
        Ok(detailed)
    }

    /// Confirmations of a transaction at `height`, 0 while unconfirmed.
    pub fn confirmations(&self, height: i64) -> u64 {
        let Ok(height) = u64::try_from(height) else {
            return 0;
        };
        let tip = self.height();
        if tip < height {
            warn!(tip, height, "transaction is above the tracked tip");
            return 0;
        }
        tip - height + 1
    }

    /// Broadcast a serialized transaction and return its txid.
    pub async fn send_transaction(&self, hex: &str, options: SendOptions) -> Result<String, NodeError> {
        let max_fee_rate = if options.allow_absurd_fees {
            0.0
        } else {
            options.max_fee_rate.unwrap_or(DEFAULT_MAX_FEE_RATE)
        };
        self.pool
            .try_all(|c| async move { c.send_raw_transaction(hex, max_fee_rate).await })
            .await
    }

    /// Which transaction spent `output`, if any.
    pub async fn get_spent_info(&self, output: &OutputRef) -> Result<Option<SpentInfo>, NodeError> {
        let (txid, index) = (output.txid.as_str(), output.index);
        none_if_not_found(
            self.pool
                .try_all(|c| async move { c.get_spent_info(txid, index).await })
                .await,
        )
    }

    // ── Network ─────────────────────────────────────────────────────────

    pub async fn get_info(&self) -> Result<ChainInfo, NodeError> {
        let (network_info, chain_info) = tokio::try_join!(
            self.pool
                .try_all(|c| async move { c.get_network_info().await }),
            self.pool
                .try_all(|c| async move { c.get_blockchain_info().await }),
        )?;
        let network = self.network();
        Ok(ChainInfo {
            version: network_info.version,
            protocol_version: network_info.protocolversion,
            blocks: chain_info.blocks,
            time_offset: network_info.timeoffset,
            connections: network_info.connections,
            difficulty: chain_info.difficulty,
            testnet: network != Network::Livenet,
            relay_fee: network_info.relayfee,
            errors: network_info.warnings,
            sub_version: network_info.subversion,
            network: network.to_string(),
            chain: chain_info.chain,
            best_block_hash: chain_info.bestblockhash,
        })
    }

    // ── Governance and masternodes ──────────────────────────────────────

    pub async fn gov_object_list(&self, kind: GovObjectType) -> Result<Vec<GovObject>, NodeError> {
        let result = self
            .pool
            .try_all(|c| async move {
                c.gobject(vec![json!("list"), json!("valid"), json!(kind.list_argument())])
                    .await
            })
            .await?;
        let entries: Vec<Value> = match result {
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            Value::Array(list) => list,
            _ => Vec::new(),
        };
        Ok(entries.iter().map(|entry| gov_object(entry, entry)).collect())
    }

    pub async fn gov_object_hash(&self, hash: &str) -> Result<Vec<GovObject>, NodeError> {
        let result = self
            .pool
            .try_all(|c| async move { c.gobject(vec![json!("get"), json!(hash)]).await })
            .await?;
        let counts = result.get("FundingResult").unwrap_or(&result);
        Ok(vec![gov_object(&result, counts)])
    }

    pub async fn get_spork(&self) -> Result<SporkList, NodeError> {
        let result = self
            .pool
            .try_all(|c| async move { c.spork("show").await })
            .await?;
        let sporks = match result {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Ok(SporkList { sporks })
    }

    /// Masternodes merged across the daemon's list modes, ordered by rank.
    pub async fn get_mn_list(&self) -> Result<Vec<MasternodeEntry>, NodeError> {
        if !self.is_synced().await? {
            return Err(NodeError::Other("Blockchain is not synced yet".into()));
        }
        if let Some(list) = self.caches.masternode_list.get(MASTERNODE_LIST_KEY) {
            return Ok(list);
        }

        let mut entries: BTreeMap<String, MasternodeEntry> = BTreeMap::new();
        for mode in ["rank", "protocol", "payee", "lastseen", "activeseconds", "addr", "status"] {
            let result = self
                .pool
                .try_all(|c| async move { c.masternode_list(mode).await })
                .await?;
            let Value::Object(map) = result else {
                continue;
            };
            for (vin, value) in map {
                let entry = entries.entry(vin.clone()).or_insert_with(|| MasternodeEntry {
                    vin,
                    ..Default::default()
                });
                match mode {
                    "rank" => entry.rank = as_u64(&value),
                    "protocol" => entry.protocol = as_u64(&value),
                    "payee" => entry.payee = as_text(&value),
                    "lastseen" => entry.lastseen = as_u64(&value),
                    "activeseconds" => entry.activeseconds = as_u64(&value),
                    "addr" => entry.ip = as_text(&value),
                    _ => entry.status = as_text(&value),
                }
            }
        }

        let mut list: Vec<MasternodeEntry> = entries.into_values().collect();
        list.sort_by_key(|e| e.rank);
        self.caches.masternode_list.put(MASTERNODE_LIST_KEY, list.clone());
        Ok(list)
    }
}

fn as_u64(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn count(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// The governance payload: `DataObject` when present, else `DataString`
/// parsed as JSON. The legacy `[[type, object]]` wrapping is unwrapped.
fn data_object(entry: &Value) -> Value {
    let parsed = match entry.get("DataObject") {
        Some(object) if object.is_object() => return object.clone(),
        _ => entry
            .get("DataString")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str::<Value>(s).ok())
            .unwrap_or(Value::Null),
    };
    match parsed.get(0).and_then(|pair| pair.get(1)) {
        Some(inner) if parsed.is_array() => inner.clone(),
        _ => parsed,
    }
}

fn gov_object(entry: &Value, counts: &Value) -> GovObject {
    GovObject {
        hash: entry.get("Hash").map(as_text).unwrap_or_default(),
        data_hex: entry.get("DataHex").map(as_text).unwrap_or_default(),
        data_object: data_object(entry),
        absolute_yes_count: count(counts, "AbsoluteYesCount"),
        yes_count: count(counts, "YesCount"),
        no_count: count(counts, "NoCount"),
        abstain_count: count(counts, "AbstainCount"),
    }
}

/// Normalize `getrawtransaction <txid> 1` into the detailed shape.
pub(crate) fn detailed_transaction(txid: &str, verbose: VerboseTransaction) -> DetailedTransaction {
    let coinbase = verbose
        .vin
        .first()
        .is_some_and(|input| input.coinbase.is_some());

    let inputs: Vec<DetailedInput> = verbose
        .vin
        .into_iter()
        .map(|input| DetailedInput {
            prev_tx_id: input.txid,
            output_index: input.vout,
            script: input.script_sig.as_ref().map(|s| s.hex.clone()),
            script_asm: input.script_sig.map(|s| s.asm),
            sequence: input.sequence,
            address: input.address,
            satoshis: input.value_sat,
        })
        .collect();

    let outputs: Vec<DetailedOutput> = verbose
        .vout
        .into_iter()
        .map(|output| {
            let spk = output.script_pub_key;
            let address = match spk.addresses {
                Some(addresses) if addresses.len() == 1 => addresses.into_iter().next(),
                _ => None,
            };
            DetailedOutput {
                satoshis: output.value_sat,
                script: spk.hex,
                script_asm: spk.asm,
                spent_tx_id: output.spent_tx_id,
                spent_index: output.spent_index,
                spent_height: output.spent_height,
                address,
            }
        })
        .collect();

    let input_satoshis: i64 = inputs.iter().filter_map(|i| i.satoshis).sum();
    let output_satoshis: i64 = outputs.iter().map(|o| o.satoshis).sum();
    let fee_satoshis = if coinbase {
        0
    } else {
        input_satoshis - output_satoshis
    };

    DetailedTransaction {
        hex: verbose.hex,
        block_hash: verbose.blockhash,
        height: verbose.height.unwrap_or(-1),
        block_timestamp: verbose.time,
        version: verbose.version,
        hash: txid.to_string(),
        locktime: verbose.locktime,
        coinbase,
        inputs,
        outputs,
        input_satoshis,
        output_satoshis,
        fee_satoshis,
    }
}
