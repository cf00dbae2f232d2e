//! Normalized shapes returned by the query façade.
//!
//! Field names serialize in camelCase, the form explorers and wallet
//! backends consume.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use zipcore_rpc::responses::{BlockHeaderVerbose, BlockVerbose};
use zipcore_types::Transaction;

/// An unspent output, confirmed (`height`) or pending (`timestamp`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub script: String,
    pub satoshis: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSummary {
    pub appearances: usize,
    pub total_received: i64,
    pub total_spent: i64,
    pub balance: i64,
    pub unconfirmed_appearances: usize,
    pub unconfirmed_balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txids: Option<Vec<String>>,
}

// ── Blocks ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeaderInfo {
    pub hash: String,
    pub version: u32,
    pub confirmations: i64,
    pub height: u64,
    pub chain_work: String,
    pub prev_hash: Option<String>,
    pub next_hash: Option<String>,
    pub merkle_root: String,
    pub time: u64,
    pub median_time: u64,
    pub nonce: u64,
    pub bits: String,
    pub difficulty: f64,
}

impl From<BlockHeaderVerbose> for BlockHeaderInfo {
    fn from(h: BlockHeaderVerbose) -> Self {
        Self {
            hash: h.hash,
            version: h.version,
            confirmations: h.confirmations,
            height: h.height,
            chain_work: h.chainwork,
            prev_hash: h.previousblockhash,
            next_hash: h.nextblockhash,
            merkle_root: h.merkleroot,
            time: h.time,
            median_time: h.mediantime,
            nonce: h.nonce,
            bits: h.bits,
            difficulty: h.difficulty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOverview {
    #[serde(flatten)]
    pub header: BlockHeaderInfo,
    pub txids: Vec<String>,
}

impl From<BlockVerbose> for BlockOverview {
    fn from(b: BlockVerbose) -> Self {
        Self {
            header: b.header.into(),
            txids: b.tx,
        }
    }
}

// ── Transactions ────────────────────────────────────────────────────────

/// A decoded transaction and the height of the block holding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub tx: Transaction,
    pub height: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedInput {
    pub prev_tx_id: Option<String>,
    pub output_index: Option<u32>,
    pub script: Option<String>,
    pub script_asm: Option<String>,
    pub sequence: u32,
    pub address: Option<String>,
    pub satoshis: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedOutput {
    pub satoshis: i64,
    pub script: String,
    pub script_asm: String,
    pub spent_tx_id: Option<String>,
    pub spent_index: Option<u32>,
    pub spent_height: Option<u64>,
    /// Set only when the output pays exactly one address.
    pub address: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedTransaction {
    pub hex: String,
    pub block_hash: Option<String>,
    /// -1 while unconfirmed.
    pub height: i64,
    pub block_timestamp: Option<u64>,
    pub version: u32,
    pub hash: String,
    pub locktime: u32,
    pub coinbase: bool,
    pub inputs: Vec<DetailedInput>,
    pub outputs: Vec<DetailedOutput>,
    pub input_satoshis: i64,
    pub output_satoshis: i64,
    pub fee_satoshis: i64,
}

/// Which inputs and outputs of a transaction touch one address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressIndexes {
    pub input_indexes: Vec<usize>,
    pub output_indexes: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AddressDetails {
    pub addresses: BTreeMap<String, AddressIndexes>,
    /// Net effect on the requested addresses: outputs minus inputs.
    pub satoshis: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AddressHistoryItem {
    pub tx: DetailedTransaction,
    pub satoshis: i64,
    pub confirmations: u64,
    pub addresses: BTreeMap<String, AddressIndexes>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressHistory {
    pub total_count: usize,
    pub items: Vec<AddressHistoryItem>,
}

// ── Chain and network information ──────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub version: u64,
    pub protocol_version: u64,
    pub blocks: u64,
    pub time_offset: i64,
    pub connections: u64,
    pub difficulty: f64,
    pub testnet: bool,
    pub relay_fee: f64,
    pub errors: String,
    pub sub_version: String,
    pub network: String,
    pub chain: String,
    pub best_block_hash: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GovObject {
    pub hash: String,
    pub data_hex: String,
    pub data_object: Value,
    pub absolute_yes_count: i64,
    pub yes_count: i64,
    pub no_count: i64,
    pub abstain_count: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SporkList {
    pub sporks: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MasternodeEntry {
    pub vin: String,
    pub status: String,
    pub rank: u64,
    pub ip: String,
    pub protocol: u64,
    pub payee: String,
    pub activeseconds: u64,
    pub lastseen: u64,
}

/// Outpoint looked up by `get_spent_info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRef {
    pub txid: String,
    pub index: u32,
}
