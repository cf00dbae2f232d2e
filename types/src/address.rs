//! Base58check addresses for pay-to-pubkey-hash and pay-to-script-hash.

use std::fmt;
use std::str::FromStr;

use crate::hash::hash160;
use crate::script::{self, OP_CHECKMULTISIG};
use crate::{Network, TypesError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    PubkeyHash,
    ScriptHash,
}

/// A decoded address: network, template and the 20-byte payload hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub network: Network,
    pub kind: AddressKind,
    pub hash: [u8; 20],
}

impl Address {
    pub fn new(network: Network, kind: AddressKind, hash: [u8; 20]) -> Self {
        Self { network, kind, hash }
    }

    /// Decode an address, inferring network and kind from its version byte.
    ///
    /// Testnet and regtest share version bytes; such addresses decode as
    /// testnet. Use [`Address::parse_for`] when the network is known.
    pub fn parse(s: &str) -> Result<Self, TypesError> {
        let (version, hash) = decode_payload(s)?;
        for network in [Network::Livenet, Network::Testnet] {
            if let Some(kind) = kind_for_version(network, version) {
                return Ok(Self::new(network, kind, hash));
            }
        }
        Err(TypesError::InvalidAddress(s.to_string()))
    }

    /// Decode an address that must belong to `network`.
    pub fn parse_for(s: &str, network: Network) -> Result<Self, TypesError> {
        let (version, hash) = decode_payload(s)?;
        match kind_for_version(network, version) {
            Some(kind) => Ok(Self::new(network, kind, hash)),
            None => Err(TypesError::WrongNetwork {
                address: s.to_string(),
                network: network.to_string(),
            }),
        }
    }

    pub fn version(&self) -> u8 {
        match self.kind {
            AddressKind::PubkeyHash => self.network.pubkey_hash_version(),
            AddressKind::ScriptHash => self.network.script_hash_version(),
        }
    }

    /// The output script that pays to this address.
    pub fn script_pubkey(&self) -> Vec<u8> {
        match self.kind {
            AddressKind::PubkeyHash => script::p2pkh_script(&self.hash),
            AddressKind::ScriptHash => script::p2sh_script(&self.hash),
        }
    }

    /// Address paid by a standard output script.
    pub fn from_script_pubkey(script: &[u8], network: Network) -> Option<Self> {
        if let Some(hash) = script::match_p2pkh(script) {
            return Some(Self::new(network, AddressKind::PubkeyHash, hash));
        }
        script::match_p2sh(script).map(|hash| Self::new(network, AddressKind::ScriptHash, hash))
    }

    /// Address spending from a standard input script.
    ///
    /// Recognizes `<sig> <pubkey>` (pay-to-pubkey-hash) and
    /// `OP_0 <sig>... <redeem script>` where the redeem script is a multisig.
    pub fn from_script_sig(script: &[u8], network: Network) -> Option<Self> {
        let pushes = script::push_only(script)?;
        match pushes.as_slice() {
            [sig, pubkey] if !sig.is_empty() && is_pubkey(pubkey) => Some(Self::new(
                network,
                AddressKind::PubkeyHash,
                hash160(pubkey),
            )),
            [first, .., redeem] if first.is_empty() && pushes.len() >= 3 => {
                if redeem.last() == Some(&OP_CHECKMULTISIG) {
                    Some(Self::new(network, AddressKind::ScriptHash, hash160(redeem)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

fn is_pubkey(data: &[u8]) -> bool {
    match data.len() {
        33 => matches!(data[0], 0x02 | 0x03),
        65 => data[0] == 0x04,
        _ => false,
    }
}

fn kind_for_version(network: Network, version: u8) -> Option<AddressKind> {
    if version == network.pubkey_hash_version() {
        Some(AddressKind::PubkeyHash)
    } else if version == network.script_hash_version() {
        Some(AddressKind::ScriptHash)
    } else {
        None
    }
}

fn decode_payload(s: &str) -> Result<(u8, [u8; 20]), TypesError> {
    let payload = bs58::decode(s)
        .with_check(None)
        .into_vec()
        .map_err(|e| TypesError::InvalidAddress(format!("{s}: {e}")))?;
    if payload.len() != 21 {
        return Err(TypesError::InvalidAddress(s.to_string()));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok((payload[0], hash))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(21);
        payload.push(self.version());
        payload.extend_from_slice(&self.hash);
        f.write_str(&bs58::encode(payload).with_check().into_string())
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVENET_ADDRESS: &str = "XnQuJpAgEDNtRwoXWLfuEs69cMgCYS8rgs";
    const LIVENET_SCRIPT: &str = "76a914809dc14496f99b6deb722cf46d89d22f4beb8efd88ac";

    #[test]
    fn livenet_address_to_script() {
        let address = Address::parse(LIVENET_ADDRESS).unwrap();
        assert_eq!(address.network, Network::Livenet);
        assert_eq!(address.kind, AddressKind::PubkeyHash);
        assert_eq!(hex::encode(address.script_pubkey()), LIVENET_SCRIPT);
        assert_eq!(address.to_string(), LIVENET_ADDRESS);
    }

    #[test]
    fn script_to_livenet_address() {
        let script = hex::decode(LIVENET_SCRIPT).unwrap();
        let address = Address::from_script_pubkey(&script, Network::Livenet).unwrap();
        assert_eq!(address.to_string(), LIVENET_ADDRESS);
    }

    #[test]
    fn version_prefixes() {
        let hash = [0u8; 20];
        let p2pkh = Address::new(Network::Livenet, AddressKind::PubkeyHash, hash).to_string();
        assert!(p2pkh.starts_with('X'));
        let p2sh = Address::new(Network::Livenet, AddressKind::ScriptHash, hash).to_string();
        assert!(p2sh.starts_with('7'));
        let test_p2pkh = Address::new(Network::Testnet, AddressKind::PubkeyHash, hash).to_string();
        assert!(test_p2pkh.starts_with('y'));
        let test_p2sh = Address::new(Network::Testnet, AddressKind::ScriptHash, hash).to_string();
        assert!(test_p2sh.starts_with('8'));
    }

    #[test]
    fn wrong_network_is_rejected() {
        assert!(matches!(
            Address::parse_for(LIVENET_ADDRESS, Network::Testnet),
            Err(TypesError::WrongNetwork { .. })
        ));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut s = LIVENET_ADDRESS.to_string();
        s.pop();
        s.push('t');
        assert!(Address::parse(&s).is_err());
    }

    #[test]
    fn pubkey_hash_from_script_sig() {
        let pubkey = {
            let mut k = vec![0x02];
            k.extend_from_slice(&[0x11; 32]);
            k
        };
        let mut script = vec![3, 0x30, 0x01, 0x02, 33];
        script.extend_from_slice(&pubkey);
        let address = Address::from_script_sig(&script, Network::Livenet).unwrap();
        assert_eq!(address.kind, AddressKind::PubkeyHash);
        assert_eq!(address.hash, hash160(&pubkey));
    }

    #[test]
    fn script_hash_from_multisig_script_sig() {
        let redeem = [0x51, 0x21, 0xae];
        let mut script = vec![0x00, 2, 0x30, 0x01];
        script.push(redeem.len() as u8);
        script.extend_from_slice(&redeem);
        let address = Address::from_script_sig(&script, Network::Testnet).unwrap();
        assert_eq!(address.kind, AddressKind::ScriptHash);
        assert_eq!(address.hash, hash160(&redeem));
    }

    #[test]
    fn nonstandard_script_sig_has_no_address() {
        assert!(Address::from_script_sig(&[0x51], Network::Livenet).is_none());
        assert!(Address::from_script_sig(&[], Network::Livenet).is_none());
    }
}
