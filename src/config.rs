use std::sync::Arc;

use base64::Engine;

use crate::{
    error::Error,
    literal::{self, Literal, LiteralError, BASE64},
    options::Options,
    page,
    transport::{resolve_location, RequestKind, Transport, TransportError},
};

/// Names the service has used for its key index table, newest last.
pub const KNOWN_INDEX_KEYS: [&str; 2] = ["AWF", "Zdy"];

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigParseError {
    #[error(transparent)]
    Literal(#[from] LiteralError),
    #[error("no key index table found in config object")]
    MissingIndex,
    #[error("config key '{0}' is not defined")]
    MissingKey(String),
    #[error("config key '{key}' is malformed, expected {expected}")]
    Malformed { key: String, expected: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherParams {
    pub reverse: i64,
    pub offset: i64,
    pub truncate: i64,
    pub case_mode: i64,
}

/// The decoded config object, validated for shape but not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTable {
    /// Key names listed by the index table, in slot order.
    pub keys: [String; 4],
    /// Space separated binary literals.
    pub selectors: String,
    /// Base64 encoded source string.
    pub source: String,
    pub params: CipherParams,
    /// `0xHH` sequence appended to the token.
    pub suffix: String,
    /// `0xHH` sequence naming the query parameter that carries the token.
    pub param: String,
}

type Entries = [(String, Literal)];

fn lookup<'a>(entries: &'a Entries, key: &str) -> Option<&'a Literal> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn decode_index(value: &Literal, key: &str) -> Result<[String; 4], ConfigParseError> {
    let malformed = || ConfigParseError::Malformed {
        key: key.to_string(),
        expected: "4 base64 key names",
    };
    let items = value.as_array().filter(|a| a.len() == 4).ok_or_else(malformed)?;

    let mut names: [String; 4] = Default::default();
    for (name, item) in names.iter_mut().zip(items) {
        let bytes = item
            .as_str()
            .and_then(|s| BASE64.decode(s).ok())
            .ok_or_else(malformed)?;
        *name = String::from_utf8(bytes).map_err(|_| malformed())?;
    }
    Ok(names)
}

fn index_keys(entries: &Entries) -> Result<[String; 4], ConfigParseError> {
    for key in KNOWN_INDEX_KEYS {
        if let Some(value) = lookup(entries, key) {
            return decode_index(value, key);
        }
    }

    // Renamed index: any 4-entry table that names only existing keys
    entries
        .iter()
        .filter_map(|(key, value)| decode_index(value, key).ok().map(|names| (key, names)))
        .find(|(key, names)| {
            names
                .iter()
                .all(|n| n != *key && lookup(entries, n).is_some())
        })
        .map(|(key, names)| {
            debug!("Using '{}' as config key index", key);
            names
        })
        .ok_or(ConfigParseError::MissingIndex)
}

fn string_pair<'a>(value: &'a Literal, key: &str) -> Result<(&'a str, &'a str), ConfigParseError> {
    match value.as_array() {
        Some([Literal::Str(a), Literal::Str(b)]) => Ok((a.as_str(), b.as_str())),
        _ => Err(ConfigParseError::Malformed {
            key: key.to_string(),
            expected: "a pair of strings",
        }),
    }
}

impl ConfigTable {
    pub fn from_entries(entries: &Entries) -> Result<Self, ConfigParseError> {
        let keys = index_keys(entries)?;
        let slot = |i: usize| {
            lookup(entries, &keys[i]).ok_or_else(|| ConfigParseError::MissingKey(keys[i].clone()))
        };

        // Slot 0 is not used by the cipher but must still resolve
        slot(0)?;
        let (selectors, source) = string_pair(slot(1)?, &keys[1])?;
        let params = match slot(2)?.as_array() {
            Some([a, b, c, d]) => match (a.as_int(), b.as_int(), c.as_int(), d.as_int()) {
                (Some(reverse), Some(offset), Some(truncate), Some(case_mode)) => Some(CipherParams {
                    reverse,
                    offset,
                    truncate,
                    case_mode,
                }),
                _ => None,
            },
            _ => None,
        }
        .ok_or_else(|| ConfigParseError::Malformed {
            key: keys[2].clone(),
            expected: "4 integers",
        })?;
        let (suffix, param) = string_pair(slot(3)?, &keys[3])?;

        Ok(ConfigTable {
            selectors: selectors.to_string(),
            source: source.to_string(),
            params,
            suffix: suffix.to_string(),
            param: param.to_string(),
            keys,
        })
    }
}

/// Fetches the converter page and extracts the config table from it.
pub struct ConfigLoader {
    transport: Arc<dyn Transport>,
    page_url: String,
    object_name: String,
    max_redirects: usize,
}

impl ConfigLoader {
    pub fn new(transport: Arc<dyn Transport>, options: &Options) -> Self {
        Self {
            transport,
            page_url: options.page_url.clone(),
            object_name: options.config_object.clone(),
            max_redirects: options.max_page_redirects,
        }
    }

    pub async fn fetch_page(&self) -> Result<String, Error> {
        let mut url = self.page_url.clone();

        for _ in 0..=self.max_redirects {
            let resp = self
                .transport
                .get(&url, RequestKind::Page)
                .await
                .map_err(Error::ConfigFetch)?;

            if let (true, Some(location)) = (resp.is_redirect(), resp.location.as_deref()) {
                let next = resolve_location(&url, location).map_err(Error::ConfigFetch)?;
                debug!("Config page redirected {} -> {}", url, next);
                url = next;
                continue;
            }

            if !resp.is_success() {
                return Err(Error::ConfigFetch(TransportError::Status {
                    status: resp.status,
                    url,
                }));
            }

            return Ok(resp.body);
        }

        Err(Error::ConfigFetch(TransportError::TooManyRedirects(
            self.max_redirects,
        )))
    }

    pub fn parse_page(&self, html: &str) -> Result<ConfigTable, Error> {
        let script =
            page::find_config_script(html, &self.object_name).ok_or(Error::ConfigNotFound)?;
        let entries = literal::extract_object(script, &self.object_name)
            .map_err(ConfigParseError::from)?;
        Ok(ConfigTable::from_entries(&entries)?)
    }

    pub async fn load(&self) -> Result<ConfigTable, Error> {
        info!("Loading converter config from {}", self.page_url);
        let html = self.fetch_page().await?;
        let table = self.parse_page(&html)?;
        debug!("Config keys: {:?}", table.keys);
        Ok(table)
    }
}
