//! Standard script templates and a tolerant push-data parser.

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut s = Vec::with_capacity(25);
    s.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
    s.extend_from_slice(hash);
    s.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    s
}

/// `OP_HASH160 <20> OP_EQUAL`
pub fn p2sh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut s = Vec::with_capacity(23);
    s.extend_from_slice(&[OP_HASH160, 20]);
    s.extend_from_slice(hash);
    s.push(OP_EQUAL);
    s
}

pub fn match_p2pkh(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() == 25
        && script[..3] == [OP_DUP, OP_HASH160, 20]
        && script[23..] == [OP_EQUALVERIFY, OP_CHECKSIG]
    {
        script[3..23].try_into().ok()
    } else {
        None
    }
}

pub fn match_p2sh(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() == 23 && script[..2] == [OP_HASH160, 20] && script[22] == OP_EQUAL {
        script[2..22].try_into().ok()
    } else {
        None
    }
}

/// One element of a parsed script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction<'a> {
    Push(&'a [u8]),
    Op(u8),
}

/// Split a script into instructions. Returns `None` when a push runs past
/// the end of the script.
pub fn parse_instructions(script: &[u8]) -> Option<Vec<Instruction<'_>>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < script.len() {
        let op = script[i];
        i += 1;
        let len = match op {
            OP_0 => {
                out.push(Instruction::Push(&[]));
                continue;
            }
            0x01..=0x4b => op as usize,
            OP_PUSHDATA1 => {
                let n = *script.get(i)? as usize;
                i += 1;
                n
            }
            OP_PUSHDATA2 => {
                let n = u16::from_le_bytes(script.get(i..i + 2)?.try_into().ok()?) as usize;
                i += 2;
                n
            }
            OP_PUSHDATA4 => {
                let n = u32::from_le_bytes(script.get(i..i + 4)?.try_into().ok()?) as usize;
                i += 4;
                n
            }
            _ => {
                out.push(Instruction::Op(op));
                continue;
            }
        };
        out.push(Instruction::Push(script.get(i..i.checked_add(len)?)?));
        i += len;
    }
    Some(out)
}

/// Only push instructions, or `None` if the script contains other opcodes.
pub fn push_only(script: &[u8]) -> Option<Vec<&[u8]>> {
    parse_instructions(script)?
        .into_iter()
        .map(|ins| match ins {
            Instruction::Push(data) => Some(data),
            Instruction::Op(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_template_matches() {
        let hash = [7u8; 20];
        let script = p2pkh_script(&hash);
        assert_eq!(match_p2pkh(&script), Some(hash));
        assert_eq!(match_p2sh(&script), None);
    }

    #[test]
    fn p2sh_template_matches() {
        let hash = [9u8; 20];
        let script = p2sh_script(&hash);
        assert_eq!(match_p2sh(&script), Some(hash));
        assert_eq!(match_p2pkh(&script), None);
    }

    #[test]
    fn parses_pushdata_forms() {
        let mut script = vec![OP_0, 2, 0xaa, 0xbb, OP_PUSHDATA1, 1, 0xcc, OP_CHECKSIG];
        script.extend_from_slice(&[OP_PUSHDATA2, 1, 0, 0xdd]);
        let parsed = parse_instructions(&script).unwrap();
        assert_eq!(
            parsed,
            vec![
                Instruction::Push(&[]),
                Instruction::Push(&[0xaa, 0xbb]),
                Instruction::Push(&[0xcc]),
                Instruction::Op(OP_CHECKSIG),
                Instruction::Push(&[0xdd]),
            ]
        );
        assert!(push_only(&script).is_none());
    }

    #[test]
    fn truncated_push_is_rejected() {
        assert!(parse_instructions(&[5, 1, 2]).is_none());
        assert!(parse_instructions(&[OP_PUSHDATA1]).is_none());
    }
}
