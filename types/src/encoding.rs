//! Little-endian cursor over raw serialized chain data.

use crate::TypesError;

/// Sequential reader over a byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], TypesError> {
        if self.remaining() < n {
            return Err(TypesError::UnexpectedEof {
                needed: n,
                offset: self.pos,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], TypesError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, TypesError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, TypesError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, TypesError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, TypesError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, TypesError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Compact-size unsigned integer.
    pub fn varint(&mut self) -> Result<u64, TypesError> {
        match self.u8()? {
            0xfd => Ok(self.u16()? as u64),
            0xfe => Ok(self.u32()? as u64),
            0xff => self.u64(),
            n => Ok(n as u64),
        }
    }

    /// Length-prefixed byte string.
    pub fn var_bytes(&mut self) -> Result<&'a [u8], TypesError> {
        let len = self.varint()?;
        let len = usize::try_from(len).map_err(|_| TypesError::UnexpectedEof {
            needed: usize::MAX,
            offset: self.pos,
        })?;
        self.bytes(len)
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(self) -> Result<(), TypesError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(TypesError::TrailingBytes(n)),
        }
    }
}

pub fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}
