//! Model metadata envelope.
//!
//! A model artifact starts with a schema-free attribute block:
//!
//! ```text
//! [count: u64 BE] ( [keylen: u64 BE][key: utf8] [vallen: u64 BE][val: utf8] ) * count
//! ```
//!
//! Every pair is kept verbatim, so unknown keys survive. The one reserved key,
//! [`USER_DEFINED_METADATA`], carries a JSON document whose nested `json` object holds the typed
//! schema the rest of the crate depends on (name, version, seed, feature order).
//!
//! Parsing is all-or-nothing: a truncated stream, invalid UTF-8, malformed JSON, or a schema with
//! a missing/mistyped required field rejects the whole blob.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};

use crate::{Error, Result};

/// Reserved attribute holding the JSON schema document.
pub const USER_DEFINED_METADATA: &str = "user_defined_metadata";

const JSON_KEY: &str = "json";
const MODEL_NAME_KEY: &str = "model_name";
const VERSION_KEY: &str = "version";
const MODEL_SEED_KEY: &str = "model_seed";
const FEATURE_NAMES_KEY: &str = "feature_names";
const STRING_TABLES_KEY: &str = "string_tables";

/// Typed schema promoted out of [`USER_DEFINED_METADATA`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub model_name: String,
    pub model_version: String,
    /// Seed for any randomized feature encoding.
    pub model_seed: u64,
    /// Column order of the encoded feature vector.
    pub feature_names: Vec<String>,
    /// Optional per-feature string tables (empty when the model ships none).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_tables: BTreeMap<String, Vec<u64>>,
    /// The full parsed [`USER_DEFINED_METADATA`] document.
    pub user_defined_metadata: Value,
}

/// Parsed metadata block of a model artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    attributes: BTreeMap<String, String>,
    schema: Option<ModelSchema>,
}

impl ModelMetadata {
    /// Parse a metadata block from the start of `bytes`.
    ///
    /// Returns the metadata and the number of bytes consumed; the model payload starts there.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = bytes;
        let meta = Self::read_from(&mut cursor)?;
        Ok((meta, bytes.len() - cursor.len()))
    }

    /// Read a metadata block, consuming exactly its bytes from `r`.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let count = read_u64(r, "attribute count")?;
        let mut attributes = BTreeMap::new();
        let mut schema = None;
        for i in 0..count {
            let key = read_string(r, &format!("key of attribute {i}"))?;
            let val = read_string(r, &format!("value of attribute `{key}`"))?;
            if key == USER_DEFINED_METADATA {
                schema = Some(parse_schema(&val)?);
            }
            attributes.insert(key, val);
        }
        Ok(Self { attributes, schema })
    }

    /// Typed schema, present iff the blob carried [`USER_DEFINED_METADATA`].
    pub fn schema(&self) -> Option<&ModelSchema> {
        self.schema.as_ref()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.schema.as_ref().map(|s| s.model_name.as_str())
    }

    pub fn model_version(&self) -> Option<&str> {
        self.schema.as_ref().map(|s| s.model_version.as_str())
    }

    pub fn model_seed(&self) -> Option<u64> {
        self.schema.as_ref().map(|s| s.model_seed)
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.schema.as_ref().map(|s| s.feature_names.as_slice())
    }

    pub fn user_defined_metadata(&self) -> Option<&Value> {
        self.schema.as_ref().map(|s| &s.user_defined_metadata)
    }

    /// Raw attribute value by key (including unknown keys).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Serialize the attribute block back into the envelope format.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_attributes(self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Encode `(key, value)` pairs into the envelope format.
pub fn encode_attributes<'a, I>(pairs: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
    let mut out = Vec::new();
    out.extend_from_slice(&(pairs.len() as u64).to_be_bytes());
    for (k, v) in pairs {
        for s in [k, v] {
            out.extend_from_slice(&(s.len() as u64).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
    }
    out
}

/// Whether a model built for `model_version` can be loaded by `sdk_version`.
///
/// Only major versions are compared. Versions are read as semver when possible, otherwise by
/// their leading dotted component (`"1.0"` has major `1`).
#[must_use]
pub fn can_parse_model(model_version: &str, sdk_version: &str) -> bool {
    match (major_of(model_version), major_of(sdk_version)) {
        (Some(m), Some(s)) => m == s,
        _ => leading_component(model_version) == leading_component(sdk_version),
    }
}

fn major_of(v: &str) -> Option<u64> {
    match semver::Version::parse(v.trim()) {
        Ok(parsed) => Some(parsed.major),
        Err(_) => leading_component(v).parse().ok(),
    }
}

fn leading_component(v: &str) -> &str {
    v.trim().split('.').next().unwrap_or("")
}

fn read_u64<R: Read>(r: &mut R, what: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => Error::Truncated(format!("{what}: length prefix")),
        _ => Error::Io(e),
    })?;
    Ok(u64::from_be_bytes(buf))
}

fn read_string<R: Read>(r: &mut R, what: &str) -> Result<String> {
    let len = read_u64(r, what)?;
    // Read through `take` so a bogus length cannot force a huge allocation up front.
    let mut buf = Vec::new();
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) != len {
        return Err(Error::Truncated(format!(
            "{what}: declared {len} bytes, found {}",
            buf.len()
        )));
    }
    String::from_utf8(buf).map_err(|e| Error::malformed(format!("{what}: {e}")))
}

fn parse_schema(raw: &str) -> Result<ModelSchema> {
    let root: Value = serde_json::from_str(raw)
        .map_err(|e| Error::malformed(format!("{USER_DEFINED_METADATA} is not JSON: {e}")))?;
    let json = root
        .get(JSON_KEY)
        .and_then(Value::as_object)
        .ok_or(Error::MissingField(JSON_KEY))?;

    let model_name = json
        .get(MODEL_NAME_KEY)
        .and_then(Value::as_str)
        .ok_or(Error::MissingField(MODEL_NAME_KEY))?
        .to_string();
    let model_version = json
        .get(VERSION_KEY)
        .and_then(Value::as_str)
        .ok_or(Error::MissingField(VERSION_KEY))?
        .to_string();
    let model_seed = json
        .get(MODEL_SEED_KEY)
        .and_then(Value::as_u64)
        .ok_or(Error::MissingField(MODEL_SEED_KEY))?;
    let feature_names = json
        .get(FEATURE_NAMES_KEY)
        .and_then(Value::as_array)
        .ok_or(Error::MissingField(FEATURE_NAMES_KEY))?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()
        .ok_or(Error::MissingField(FEATURE_NAMES_KEY))?;

    let string_tables = match json.get(STRING_TABLES_KEY) {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| Error::malformed(format!("{STRING_TABLES_KEY}: {e}")))?,
    };

    Ok(ModelSchema {
        model_name,
        model_version,
        model_seed,
        feature_names,
        string_tables,
        user_defined_metadata: root,
    })
}
