//! Raw block codec. Block hashes are never computed locally; the daemon
//! reports them.

use crate::encoding::Reader;
use crate::hash::reversed_hex;
use crate::{Transaction, TypesError};

/// The fixed 80-byte block header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn read(r: &mut Reader<'_>) -> Result<Self, TypesError> {
        Ok(Self {
            version: r.u32()?,
            prev_hash: r.array()?,
            merkle_root: r.array()?,
            time: r.u32()?,
            bits: r.u32()?,
            nonce: r.u32()?,
        })
    }

    pub fn prev_hash_hex(&self) -> String {
        reversed_hex(&self.prev_hash)
    }

    pub fn merkle_root_hex(&self) -> String {
        reversed_hex(&self.merkle_root)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        Self::decode(&hex::decode(s)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TypesError> {
        let mut r = Reader::new(bytes);
        let header = BlockHeader::read(&mut r)?;
        let count = r.varint()?;
        let mut transactions = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            transactions.push(Transaction::read(&mut r)?);
        }
        r.finish()?;
        Ok(Self {
            header,
            transactions,
        })
    }
}
