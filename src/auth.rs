//! Authorization token derivation.
//!
//! The converter API wants a token built from the config table by a fixed
//! selection cipher:
//!
//! 1. decode the base64 source string, reversing it when `reverse > 0`
//! 2. for every binary literal `i` in the selector list take the source
//!    character at `i - offset`
//! 3. keep the first `truncate` characters when `truncate > 0`
//! 4. lowercase (`case_mode == 1`) or uppercase (`case_mode == 2`)
//! 5. append `_` and the hex decoded suffix, then base64 encode the lot
//!
//! Everything here is a pure function of the table.

use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;

use crate::{config::ConfigTable, error::Error, literal::BASE64};

/// Parses space separated binary literals such as `"101 110 111"`.
pub fn decode_binary_list(list: &str) -> Result<Vec<i64>, Error> {
    list.split_whitespace()
        .map(|b| {
            i64::from_str_radix(b, 2)
                .map_err(|_| Error::AuthDerivation(format!("'{}' is not a binary literal", b)))
        })
        .collect()
}

#[allow(clippy::expect_used)]
static HEX_BYTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)0x([0-9a-f]{2})").expect("hex byte regex is valid"));

/// Collects every `0xHH` token in `encoded` into bytes. Other text is ignored.
pub fn decode_hex_bytes(encoded: &str) -> Result<Vec<u8>, Error> {
    let digits: String = HEX_BYTE
        .captures_iter(encoded)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();
    hex::decode(digits).map_err(|e| Error::AuthDerivation(e.to_string()))
}

/// Decodes a `0xHH` sequence to text, one character per byte.
pub fn decode_hex_tuple(encoded: &str) -> Result<String, Error> {
    Ok(decode_hex_bytes(encoded)?
        .into_iter()
        .map(char::from)
        .collect())
}

pub fn encode_hex_tuple(bytes: &[u8]) -> String {
    hex::encode(bytes)
        .as_bytes()
        .chunks(2)
        .map(|pair| format!("0x{}", String::from_utf8_lossy(pair)))
        .collect()
}

/// The token before the suffix is appended.
pub fn derive_selection(table: &ConfigTable) -> Result<String, Error> {
    let selectors = decode_binary_list(&table.selectors)?;
    let params = &table.params;

    let decoded = BASE64
        .decode(table.source.trim())
        .map_err(|e| Error::AuthDerivation(format!("source is not base64: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| Error::AuthDerivation("source is not valid UTF-8".into()))?;

    let mut source: Vec<char> = decoded.chars().collect();
    if params.reverse > 0 {
        source.reverse();
    }

    let mut selected = selectors
        .iter()
        .map(|&i| {
            i.checked_sub(params.offset)
                .and_then(|idx| usize::try_from(idx).ok())
                .and_then(|idx| source.get(idx).copied())
                .ok_or_else(|| {
                    Error::AuthDerivation(format!(
                        "selector {} (offset {}) is outside the {} character source",
                        i,
                        params.offset,
                        source.len()
                    ))
                })
        })
        .collect::<Result<String, Error>>()?;

    if params.truncate > 0 {
        selected = selected.chars().take(params.truncate as usize).collect();
    }

    Ok(match params.case_mode {
        1 => selected.to_lowercase(),
        2 => selected.to_uppercase(),
        _ => selected,
    })
}

pub fn derive_token(table: &ConfigTable) -> Result<String, Error> {
    let selection = derive_selection(table)?;
    let suffix = decode_hex_tuple(&table.suffix)?;
    Ok(STANDARD.encode(format!("{}_{}", selection, suffix)))
}

/// Name of the query parameter that carries the token.
pub fn token_param(table: &ConfigTable) -> Result<String, Error> {
    let name = decode_hex_tuple(&table.param)?;
    if name.is_empty() {
        return Err(Error::AuthDerivation(
            "token parameter name is empty".into(),
        ));
    }
    Ok(name)
}
