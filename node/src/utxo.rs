//! Folds pending mempool deltas into a confirmed UTXO set.

use std::collections::{HashMap, HashSet};

use zipcore_rpc::responses::{AddressUtxo, MempoolDelta};
use zipcore_types::{Address, Network};

use crate::model::Utxo;

type OutputKey = (String, u32);

impl From<AddressUtxo> for Utxo {
    fn from(u: AddressUtxo) -> Self {
        Self {
            address: u.address,
            txid: u.txid,
            output_index: u.output_index,
            script: u.script,
            satoshis: u.satoshis,
            height: Some(u.height),
            timestamp: None,
        }
    }
}

/// Standard output script paying `address`, as hex. Empty when the address
/// does not parse for `network`.
fn script_for(address: &str, network: Network) -> String {
    Address::parse_for(address, network)
        .map(|a| hex::encode(a.script_pubkey()))
        .unwrap_or_default()
}

/// Apply `deltas` to `confirmed`.
///
/// Any delta that references a previous output removes that output, even at
/// zero value. Positive deltas become pending outputs, newest first, ahead
/// of the confirmed outputs in daemon order.
pub fn reconcile(confirmed: Vec<AddressUtxo>, deltas: &[MempoolDelta], network: Network) -> Vec<Utxo> {
    let spent: HashSet<OutputKey> = deltas
        .iter()
        .filter_map(|d| match (&d.prevtxid, d.prevout) {
            (Some(txid), Some(vout)) => Some((txid.clone(), vout)),
            _ => None,
        })
        .collect();

    let mut candidates: HashMap<OutputKey, Utxo> = HashMap::new();
    for delta in deltas.iter().filter(|d| d.satoshis > 0) {
        candidates.insert(
            (delta.txid.clone(), delta.index),
            Utxo {
                address: delta.address.clone(),
                txid: delta.txid.clone(),
                output_index: delta.index,
                script: script_for(&delta.address, network),
                satoshis: delta.satoshis,
                height: None,
                timestamp: Some(delta.timestamp),
            },
        );
    }

    let mut confirmed_out = Vec::with_capacity(confirmed.len());
    for utxo in confirmed {
        let key = (utxo.txid.clone(), utxo.output_index);
        candidates.remove(&key);
        if !spent.contains(&key) {
            confirmed_out.push(Utxo::from(utxo));
        }
    }

    let mut pending: Vec<Utxo> = candidates
        .into_iter()
        .filter(|(key, _)| !spent.contains(key))
        .map(|(_, utxo)| utxo)
        .collect();
    pending.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.txid.cmp(&b.txid))
            .then_with(|| a.output_index.cmp(&b.output_index))
    });

    pending.extend(confirmed_out);
    pending
}
