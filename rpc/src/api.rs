//! The daemon RPC seam.
//!
//! Implementors provide [`DaemonRpc::call`]; the typed methods are layered
//! on top of it so a test double only has to script raw JSON results.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::responses::{
    AddressBalance, AddressUtxo, BlockHeaderVerbose, BlockVerbose, BlockchainInfo, MempoolDelta,
    NetworkInfo, SpentInfo, VerboseTransaction,
};
use crate::RpcError;

/// Decode an RPC result into a typed shape.
pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::InvalidResponse(format!("{method}: {e}")))
}

fn addresses_param(addresses: &[String]) -> Value {
    json!({ "addresses": addresses })
}

#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// Issue one JSON-RPC request and return its `result`.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;

    // ── Chain ───────────────────────────────────────────────────────────

    async fn get_best_block_hash(&self) -> Result<String, RpcError> {
        decode("getbestblockhash", self.call("getbestblockhash", vec![]).await?)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        decode("getblockhash", self.call("getblockhash", vec![json!(height)]).await?)
    }

    async fn get_block_verbose(&self, hash: &str) -> Result<BlockVerbose, RpcError> {
        let value = self.call("getblock", vec![json!(hash), json!(true)]).await?;
        decode("getblock", value)
    }

    /// Serialized block as hex.
    async fn get_block_raw(&self, hash: &str) -> Result<String, RpcError> {
        let value = self.call("getblock", vec![json!(hash), json!(false)]).await?;
        decode("getblock", value)
    }

    async fn get_block_header(&self, hash: &str) -> Result<BlockHeaderVerbose, RpcError> {
        decode("getblockheader", self.call("getblockheader", vec![json!(hash)]).await?)
    }

    async fn get_block_hashes(&self, high: u64, low: u64) -> Result<Vec<String>, RpcError> {
        let value = self
            .call("getblockhashes", vec![json!(high), json!(low)])
            .await?;
        decode("getblockhashes", value)
    }

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
        decode("getblockchaininfo", self.call("getblockchaininfo", vec![]).await?)
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, RpcError> {
        decode("getnetworkinfo", self.call("getnetworkinfo", vec![]).await?)
    }

    async fn get_best_chain_lock(&self) -> Result<Value, RpcError> {
        self.call("getbestchainlock", vec![]).await
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<f64, RpcError> {
        decode("estimatefee", self.call("estimatefee", vec![json!(blocks)]).await?)
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Serialized transaction as hex.
    async fn get_raw_transaction(&self, txid: &str) -> Result<String, RpcError> {
        let value = self.call("getrawtransaction", vec![json!(txid), json!(0)]).await?;
        decode("getrawtransaction", value)
    }

    async fn get_raw_transaction_verbose(&self, txid: &str) -> Result<VerboseTransaction, RpcError> {
        let value = self.call("getrawtransaction", vec![json!(txid), json!(1)]).await?;
        decode("getrawtransaction", value)
    }

    async fn send_raw_transaction(&self, hex: &str, max_fee_rate: f64) -> Result<String, RpcError> {
        let value = self
            .call("sendrawtransaction", vec![json!(hex), json!(max_fee_rate)])
            .await?;
        decode("sendrawtransaction", value)
    }

    async fn get_spent_info(&self, txid: &str, index: u32) -> Result<SpentInfo, RpcError> {
        let value = self
            .call("getspentinfo", vec![json!({ "txid": txid, "index": index })])
            .await?;
        decode("getspentinfo", value)
    }

    // ── Address index ───────────────────────────────────────────────────

    async fn get_address_balance(&self, addresses: &[String]) -> Result<AddressBalance, RpcError> {
        let value = self
            .call("getaddressbalance", vec![addresses_param(addresses)])
            .await?;
        decode("getaddressbalance", value)
    }

    async fn get_address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError> {
        let value = self
            .call("getaddressutxos", vec![addresses_param(addresses)])
            .await?;
        decode("getaddressutxos", value)
    }

    async fn get_address_mempool(&self, addresses: &[String]) -> Result<Vec<MempoolDelta>, RpcError> {
        let value = self
            .call("getaddressmempool", vec![addresses_param(addresses)])
            .await?;
        decode("getaddressmempool", value)
    }

    /// Confirmed txids touching `addresses`, optionally limited to a
    /// `(start, end)` height range with `start <= end`.
    async fn get_address_txids(
        &self,
        addresses: &[String],
        range: Option<(u64, u64)>,
    ) -> Result<Vec<String>, RpcError> {
        let mut param = addresses_param(addresses);
        if let (Some((start, end)), Some(obj)) = (range, param.as_object_mut()) {
            obj.insert("start".into(), json!(start));
            obj.insert("end".into(), json!(end));
        }
        decode("getaddresstxids", self.call("getaddresstxids", vec![param]).await?)
    }

    // ── Dash-specific ───────────────────────────────────────────────────

    async fn generate(&self, blocks: u32) -> Result<Vec<String>, RpcError> {
        decode("generate", self.call("generate", vec![json!(blocks)]).await?)
    }

    async fn gobject(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call("gobject", args).await
    }

    async fn spork(&self, command: &str) -> Result<Value, RpcError> {
        self.call("spork", vec![json!(command)]).await
    }

    async fn masternode_list(&self, mode: &str) -> Result<Value, RpcError> {
        self.call("masternodelist", vec![json!(mode)]).await
    }
}
