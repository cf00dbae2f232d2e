//! Raw transaction codec.
//!
//! The 32-bit version field carries the transaction version in its low 16
//! bits and a special-transaction type in its high 16 bits. Special
//! transactions (version 3 or later with a non-zero type) append a
//! length-prefixed extra payload after the lock time.

use crate::encoding::{write_var_bytes, write_varint, Reader};
use crate::hash::{reversed_hex, sha256d};
use crate::{Address, Network, TypesError};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Previous transaction id in internal byte order.
    pub txid: [u8; 32],
    pub vout: u32,
}

impl OutPoint {
    pub fn is_null(&self) -> bool {
        self.txid == [0u8; 32] && self.vout == u32::MAX
    }

    pub fn txid_hex(&self) -> String {
        reversed_hex(&self.txid)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u16,
    pub tx_type: u16,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    pub extra_payload: Option<Vec<u8>>,
}

impl Transaction {
    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        Self::decode(&hex::decode(s)?)
    }

    /// Decode a complete serialized transaction.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypesError> {
        let mut reader = Reader::new(bytes);
        let tx = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    /// Read one transaction from the cursor, leaving any following bytes.
    pub fn read(r: &mut Reader<'_>) -> Result<Self, TypesError> {
        let raw_version = r.u32()?;
        let version = (raw_version & 0xffff) as u16;
        let tx_type = (raw_version >> 16) as u16;

        let input_count = r.varint()?;
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            let txid = r.array::<32>()?;
            let vout = r.u32()?;
            let script_sig = r.var_bytes()?.to_vec();
            let sequence = r.u32()?;
            inputs.push(TxInput {
                prevout: OutPoint { txid, vout },
                script_sig,
                sequence,
            });
        }

        let output_count = r.varint()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            let value = r.i64()?;
            let script_pubkey = r.var_bytes()?.to_vec();
            outputs.push(TxOutput {
                value,
                script_pubkey,
            });
        }

        let lock_time = r.u32()?;
        let extra_payload = if version >= 3 && tx_type != 0 {
            Some(r.var_bytes()?.to_vec())
        } else {
            None
        };

        Ok(Self {
            version,
            tx_type,
            inputs,
            outputs,
            lock_time,
            extra_payload,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let raw_version = (self.version as u32) | ((self.tx_type as u32) << 16);
        out.extend_from_slice(&raw_version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.prevout.txid);
            out.extend_from_slice(&input.prevout.vout.to_le_bytes());
            write_var_bytes(&mut out, &input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_var_bytes(&mut out, &output.script_pubkey);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        if let Some(payload) = &self.extra_payload {
            write_var_bytes(&mut out, payload);
        }
        out
    }

    /// Transaction id in display (reversed hex) order.
    pub fn txid(&self) -> String {
        reversed_hex(&sha256d(&self.encode()))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Unique addresses touched by this transaction: inputs first, then
    /// outputs. Scripts with no standard address are skipped.
    pub fn addresses(&self, network: Network) -> Vec<Address> {
        let mut out: Vec<Address> = Vec::new();
        let from_inputs = self
            .inputs
            .iter()
            .filter(|_| !self.is_coinbase())
            .filter_map(|i| Address::from_script_sig(&i.script_sig, network));
        let from_outputs = self
            .outputs
            .iter()
            .filter_map(|o| Address::from_script_pubkey(&o.script_pubkey, network));
        for address in from_inputs.chain(from_outputs) {
            if !out.contains(&address) {
                out.push(address);
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::script::p2pkh_script;
    use crate::AddressKind;

    pub(crate) fn sample_tx() -> Transaction {
        let mut pubkey = vec![0x03];
        pubkey.extend_from_slice(&[0x22; 32]);
        let mut script_sig = vec![2, 0x30, 0x01, 33];
        script_sig.extend_from_slice(&pubkey);
        Transaction {
            version: 1,
            tx_type: 0,
            inputs: vec![TxInput {
                prevout: OutPoint {
                    txid: [0x44; 32],
                    vout: 1,
                },
                script_sig,
                sequence: u32::MAX,
            }],
            outputs: vec![
                TxOutput {
                    value: 50_000,
                    script_pubkey: p2pkh_script(&[0x01; 20]),
                },
                TxOutput {
                    value: 10,
                    script_pubkey: vec![0x6a, 0x01, 0x00],
                },
                TxOutput {
                    value: 20,
                    script_pubkey: p2pkh_script(&[0x01; 20]),
                },
            ],
            lock_time: 0,
            extra_payload: None,
        }
    }

    #[test]
    fn decodes_what_it_encodes() {
        let tx = sample_tx();
        let bytes = tx.encode();
        assert_eq!(Transaction::decode(&bytes).unwrap(), tx);
    }

    #[test]
    fn special_transaction_carries_payload() {
        let mut tx = sample_tx();
        tx.version = 3;
        tx.tx_type = 5;
        tx.extra_payload = Some(vec![1, 2, 3, 4]);
        let bytes = tx.encode();
        assert_eq!(&bytes[..4], &[3, 0, 5, 0]);
        assert_eq!(Transaction::decode(&bytes).unwrap(), tx);
    }

    #[test]
    fn version_three_with_type_zero_has_no_payload() {
        let mut tx = sample_tx();
        tx.version = 3;
        let mut bytes = tx.encode();
        bytes.push(0);
        assert_eq!(
            Transaction::decode(&bytes),
            Err(TypesError::TrailingBytes(1))
        );
    }

    #[test]
    fn txid_is_reversed_double_sha() {
        let tx = sample_tx();
        let mut expected = sha256d(&tx.encode());
        expected.reverse();
        assert_eq!(tx.txid(), hex::encode(expected));
    }

    #[test]
    fn addresses_are_unique_inputs_first() {
        let tx = sample_tx();
        let addresses = tx.addresses(Network::Livenet);
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].kind, AddressKind::PubkeyHash);
        assert_ne!(addresses[0].hash, [0x01; 20]);
        assert_eq!(addresses[1].hash, [0x01; 20]);
    }

    #[test]
    fn coinbase_inputs_have_no_address() {
        let mut tx = sample_tx();
        tx.inputs[0].prevout = OutPoint {
            txid: [0; 32],
            vout: u32::MAX,
        };
        assert!(tx.is_coinbase());
        assert_eq!(tx.addresses(Network::Livenet).len(), 1);
    }

    #[test]
    fn truncated_hex_fails() {
        let hex = hex::encode(sample_tx().encode());
        assert!(Transaction::from_hex(&hex[..hex.len() - 4]).is_err());
    }
}
