//! Store key and value encoding.
//!
//! A cell lives under `escape(row) ++ [0x00, 0x01] ++ column`, where `escape`
//! rewrites every `0x00` of the row as `[0x00, 0xFF]`. Plain byte comparison
//! of two encoded keys then orders them by row first and column second, even
//! when one row key is a prefix of another. Values carry the write version as
//! a big-endian `u64` header.

use crate::error::KeyError;

const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;
const ROW_TERMINATOR: u8 = 0x01;
const VERSION_BYTES: usize = std::mem::size_of::<u64>();

pub fn encode_cell_key(row: &[u8], column: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(row.len() + column.len() + 4);
    for &b in row {
        key.push(b);
        if b == ESCAPE {
            key.push(ESCAPED_NUL);
        }
    }
    key.extend_from_slice(&[ESCAPE, ROW_TERMINATOR]);
    key.extend_from_slice(column);
    key
}

/// Smallest encoded key of `row`; every key of a greater row sorts after it.
pub fn encode_row_bound(row: &[u8]) -> Vec<u8> {
    encode_cell_key(row, b"")
}

pub fn decode_cell_key(key: &[u8]) -> Result<(Vec<u8>, &[u8]), KeyError> {
    let mut row = Vec::with_capacity(key.len());
    let mut i = 0;
    while i < key.len() {
        let b = key[i];
        if b != ESCAPE {
            row.push(b);
            i += 1;
            continue;
        }
        match key.get(i + 1) {
            Some(&ESCAPED_NUL) => {
                row.push(ESCAPE);
                i += 2;
            }
            Some(&ROW_TERMINATOR) => return Ok((row, &key[i + 2..])),
            Some(&other) => return Err(KeyError::InvalidEscape(other)),
            None => break,
        }
    }
    Err(KeyError::MissingTerminator)
}

pub fn encode_cell_value(version: u64, value: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(VERSION_BYTES + value.len());
    encoded.extend_from_slice(&version.to_be_bytes());
    encoded.extend_from_slice(value);
    encoded
}

pub fn decode_cell_value(encoded: &[u8]) -> Result<(u64, &[u8]), KeyError> {
    if encoded.len() < VERSION_BYTES {
        return Err(KeyError::TruncatedValue(encoded.len()));
    }
    let (header, value) = encoded.split_at(VERSION_BYTES);
    let mut version = [0u8; VERSION_BYTES];
    version.copy_from_slice(header);
    Ok((u64::from_be_bytes(version), value))
}
