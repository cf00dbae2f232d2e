//! Typed shapes of daemon RPC results.
//!
//! Only the fields the service reads are declared; unknown fields are
//! ignored so newer daemons keep decoding.

use serde::{Deserialize, Deserializer, Serialize};

/// Accepts a JSON number or a numeric string.
pub fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s}"))),
    }
}

// ── Chain ───────────────────────────────────────────────────────────────

/// `getblockchaininfo`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockchainInfo {
    #[serde(default)]
    pub chain: String,
    #[serde(default)]
    pub blocks: u64,
    #[serde(default)]
    pub headers: u64,
    #[serde(default)]
    pub bestblockhash: String,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub verificationprogress: f64,
}

/// `getnetworkinfo`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub subversion: String,
    #[serde(default)]
    pub protocolversion: u64,
    #[serde(default)]
    pub timeoffset: i64,
    #[serde(default)]
    pub connections: u64,
    #[serde(default)]
    pub relayfee: f64,
    #[serde(default)]
    pub warnings: String,
}

/// `getblockheader <hash>` and the header part of `getblock <hash> true`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockHeaderVerbose {
    pub hash: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub confirmations: i64,
    pub height: u64,
    #[serde(default)]
    pub chainwork: String,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    #[serde(default)]
    pub nextblockhash: Option<String>,
    #[serde(default)]
    pub merkleroot: String,
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub mediantime: u64,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub bits: String,
    #[serde(default)]
    pub difficulty: f64,
}

/// `getblock <hash> true`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockVerbose {
    #[serde(flatten)]
    pub header: BlockHeaderVerbose,
    #[serde(default)]
    pub tx: Vec<String>,
}

// ── Address index ───────────────────────────────────────────────────────

/// `getaddressbalance`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AddressBalance {
    pub balance: i64,
    pub received: i64,
}

/// One entry of `getaddressutxos`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxo {
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub script: String,
    pub satoshis: i64,
    pub height: u64,
}

/// One entry of `getaddressmempool`. A delta carrying `prevtxid` and
/// `prevout` spends that output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MempoolDelta {
    pub address: String,
    pub txid: String,
    pub index: u32,
    pub satoshis: i64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub prevtxid: Option<String>,
    #[serde(default)]
    pub prevout: Option<u32>,
}

/// `getspentinfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SpentInfo {
    pub txid: String,
    pub index: u32,
    pub height: u64,
}

// ── Transactions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptSig {
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub asm: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptPubKey {
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub asm: String,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerboseInput {
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub script_sig: Option<ScriptSig>,
    #[serde(default)]
    pub sequence: u32,
    #[serde(default)]
    pub value_sat: Option<i64>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerboseOutput {
    #[serde(default)]
    pub value_sat: i64,
    #[serde(default)]
    pub n: u32,
    #[serde(default)]
    pub script_pub_key: ScriptPubKey,
    #[serde(default)]
    pub spent_tx_id: Option<String>,
    #[serde(default)]
    pub spent_index: Option<u32>,
    #[serde(default)]
    pub spent_height: Option<u64>,
}

/// `getrawtransaction <txid> 1`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerboseTransaction {
    pub hex: String,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub locktime: u32,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub time: Option<u64>,
    #[serde(default)]
    pub vin: Vec<VerboseInput>,
    #[serde(default)]
    pub vout: Vec<VerboseOutput>,
}
