//! Address-index queries: balances, unspent outputs, txids, summaries and
//! paginated history.

use std::collections::HashSet;

use futures_util::{stream, StreamExt, TryStreamExt};
use zipcore_rpc::responses::{AddressBalance, MempoolDelta};

use crate::model::{AddressDetails, AddressHistory, AddressHistoryItem, AddressSummary, DetailedTransaction, Utxo};
use crate::pagination::{check_span, height_range, paginate};
use crate::service::ZipService;
use crate::utxo::reconcile;
use crate::NodeError;

#[derive(Clone, Copy, Debug)]
pub struct UtxoOptions {
    pub query_mempool: bool,
}

impl Default for UtxoOptions {
    fn default() -> Self {
        Self { query_mempool: true }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TxidsOptions {
    /// Upper height bound. Applies only together with `end`.
    pub start: Option<u64>,
    /// Lower height bound.
    pub end: Option<u64>,
    pub query_mempool: bool,
}

impl Default for TxidsOptions {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            query_mempool: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SummaryOptions {
    pub no_tx_list: bool,
    pub query_mempool: bool,
    pub from: Option<usize>,
    pub to: Option<usize>,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            no_tx_list: false,
            query_mempool: true,
            from: None,
            to: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct HistoryOptions {
    pub from: Option<usize>,
    pub to: Option<usize>,
    pub query_mempool: bool,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            query_mempool: true,
        }
    }
}

fn cache_key(addresses: &[String]) -> String {
    addresses.concat()
}

/// Unique txids of `deltas`, newest first.
fn mempool_txids(deltas: &[MempoolDelta]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut txids: Vec<String> = deltas
        .iter()
        .filter(|d| seen.insert(d.txid.as_str()))
        .map(|d| d.txid.clone())
        .collect();
    txids.reverse();
    txids
}

/// Inputs and outputs of `tx` that touch `addresses`, with their net value.
pub fn address_details(tx: &DetailedTransaction, addresses: &[String]) -> AddressDetails {
    let wanted: HashSet<&str> = addresses.iter().map(String::as_str).collect();
    let mut details = AddressDetails::default();

    for (index, input) in tx.inputs.iter().enumerate() {
        let Some(address) = input.address.as_deref().filter(|a| wanted.contains(a)) else {
            continue;
        };
        details
            .addresses
            .entry(address.to_string())
            .or_default()
            .input_indexes
            .push(index);
        details.satoshis -= input.satoshis.unwrap_or(0);
    }

    for (index, output) in tx.outputs.iter().enumerate() {
        let Some(address) = output.address.as_deref().filter(|a| wanted.contains(a)) else {
            continue;
        };
        details
            .addresses
            .entry(address.to_string())
            .or_default()
            .output_indexes
            .push(index);
        details.satoshis += output.satoshis;
    }

    details
}

impl ZipService {
    pub async fn get_address_balance(&self, addresses: &[String]) -> Result<AddressBalance, NodeError> {
        let key = cache_key(addresses);
        if let Some(balance) = self.caches.balance.get(&key) {
            return Ok(balance);
        }
        let balance = self
            .pool
            .try_all(|c| async move { c.get_address_balance(addresses).await })
            .await?;
        self.caches.balance.put(key, balance);
        Ok(balance)
    }

    async fn get_address_mempool(&self, addresses: &[String]) -> Result<Vec<MempoolDelta>, NodeError> {
        self.pool
            .try_all(|c| async move { c.get_address_mempool(addresses).await })
            .await
    }

    pub async fn get_address_unspent_outputs(
        &self,
        addresses: &[String],
        options: UtxoOptions,
    ) -> Result<Vec<Utxo>, NodeError> {
        let key = cache_key(addresses);
        let confirmed = match self.caches.utxos.get(&key) {
            Some(utxos) => utxos,
            None => {
                let utxos = self
                    .pool
                    .try_all(|c| async move { c.get_address_utxos(addresses).await })
                    .await?;
                self.caches.utxos.put(key, utxos.clone());
                utxos
            }
        };

        if !options.query_mempool {
            return Ok(confirmed.into_iter().map(Utxo::from).collect());
        }
        let deltas = self.get_address_mempool(addresses).await?;
        Ok(reconcile(confirmed, &deltas, self.network()))
    }

    /// Txids touching `addresses`, newest first: pending ones ahead of
    /// confirmed ones unless a height range is given.
    pub async fn get_address_txids(
        &self,
        addresses: &[String],
        options: TxidsOptions,
    ) -> Result<Vec<String>, NodeError> {
        let range = height_range(options.start, options.end)?;
        let key = cache_key(addresses);

        let cached = match range {
            None => self.caches.txids.get(&key),
            Some(_) => None,
        };
        let confirmed = match cached {
            Some(txids) => txids,
            None => {
                let mut txids = self
                    .pool
                    .try_all(|c| async move { c.get_address_txids(addresses, range).await })
                    .await?;
                txids.reverse();
                if range.is_none() {
                    self.caches.txids.put(key, txids.clone());
                }
                txids
            }
        };

        if range.is_some() || !options.query_mempool {
            return Ok(confirmed);
        }
        let mut txids = mempool_txids(&self.get_address_mempool(addresses).await?);
        txids.extend(confirmed);
        Ok(txids)
    }

    pub async fn get_address_summary(
        &self,
        addresses: &[String],
        options: SummaryOptions,
    ) -> Result<AddressSummary, NodeError> {
        let max = self.config.max_txids;
        let from = options.from.unwrap_or(0);
        let to = options.to.unwrap_or(max);
        check_span(from, to, max)?;

        let key = cache_key(addresses);
        let summary = match self.caches.summary.get(&key) {
            Some(summary) => summary,
            None => {
                let summary = self.build_summary(addresses, options.query_mempool).await?;
                if options.query_mempool {
                    self.caches.summary.put(key, summary.clone());
                }
                summary
            }
        };

        let txids = if options.no_tx_list {
            None
        } else {
            Some(paginate(summary.txids.as_deref().unwrap_or_default(), from, to)?)
        };
        Ok(AddressSummary { txids, ..summary })
    }

    async fn build_summary(&self, addresses: &[String], query_mempool: bool) -> Result<AddressSummary, NodeError> {
        let mempool = async {
            if query_mempool {
                self.get_address_mempool(addresses).await
            } else {
                Ok(Vec::new())
            }
        };
        let (confirmed, balance, deltas) = tokio::try_join!(
            self.get_address_txids(
                addresses,
                TxidsOptions {
                    query_mempool: false,
                    ..Default::default()
                }
            ),
            self.get_address_balance(addresses),
            mempool,
        )?;

        let pending = mempool_txids(&deltas);
        let unconfirmed_appearances = pending.len();
        let unconfirmed_balance = deltas.iter().map(|d| d.satoshis).sum();
        let appearances = confirmed.len();

        let mut txids = pending;
        txids.extend(confirmed);

        Ok(AddressSummary {
            appearances,
            total_received: balance.received,
            total_spent: balance.received - balance.balance,
            balance: balance.balance,
            unconfirmed_appearances,
            unconfirmed_balance,
            txids: Some(txids),
        })
    }

    /// One page of transactions touching `addresses`, each with its effect
    /// on them.
    pub async fn get_address_history(
        &self,
        addresses: &[String],
        options: HistoryOptions,
    ) -> Result<AddressHistory, NodeError> {
        let max_addresses = self.config.max_addresses_query;
        if addresses.len() > max_addresses {
            return Err(NodeError::Validation(format!(
                "Maximum number of addresses ({max_addresses}) exceeded"
            )));
        }
        let max = self.config.max_transaction_history;
        let from = options.from.unwrap_or(0);
        let to = options.to.unwrap_or(max);
        check_span(from, to, max)?;

        let txids = self
            .get_address_txids(
                addresses,
                TxidsOptions {
                    query_mempool: options.query_mempool,
                    ..Default::default()
                },
            )
            .await?;
        let total_count = txids.len();
        let page = paginate(&txids, from, to)?;

        let items = stream::iter(page)
            .map(|txid| async move { self.get_address_detailed_transaction(&txid, addresses).await })
            .buffered(self.config.transaction_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(AddressHistory { total_count, items })
    }

    pub async fn get_address_detailed_transaction(
        &self,
        txid: &str,
        addresses: &[String],
    ) -> Result<AddressHistoryItem, NodeError> {
        let tx = self.get_detailed_transaction(txid).await?;
        let details = address_details(&tx, addresses);
        let confirmations = self.confirmations(tx.height);
        Ok(AddressHistoryItem {
            tx,
            satoshis: details.satoshis,
            confirmations,
            addresses: details.addresses,
        })
    }
}
