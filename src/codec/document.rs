//! Document payload
//!
//! A flat document: primary key plus named fields. Field names go through the
//! key dictionary, so each record stores small integer ids instead of strings.
//!
//! Formats:
//! - `2` (current): `Vec<(dictionary id, Value)>`, bincode
//! - `1` (legacy):  `BTreeMap<field name, Value>`, bincode

use std::collections::BTreeMap;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

use super::{read_bincode, write_bincode, DecodeFn, DictionarySnapshot, FormatId, KeyDictionary, Storable};

/// Field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// A document identified by a 64-bit primary key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    id: u64,
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Format 1 body: field names stored inline
    pub fn encode_legacy(&self, out: &mut BytesMut) -> Result<()> {
        write_bincode(&self.fields, out)
    }

    fn decode_legacy(body: &[u8], _keys: &DictionarySnapshot) -> Result<Self> {
        let fields: BTreeMap<String, Value> = read_bincode(body)?;
        Ok(Self { id: 0, fields })
    }
}

impl Storable for Document {
    const KIND: &'static str = "document";
    const FORMAT: FormatId = 2;

    fn part_id(&self) -> u64 {
        self.id
    }

    fn set_part_id(&mut self, id: u64) {
        self.id = id;
    }

    fn encode(&self, out: &mut BytesMut, keys: &KeyDictionary) -> Result<()> {
        let mut entries = Vec::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            entries.push((keys.intern(name)?, value));
        }
        write_bincode(&entries, out)
    }

    fn decode(body: &[u8], keys: &DictionarySnapshot) -> Result<Self> {
        let entries: Vec<(u32, Value)> = read_bincode(body)?;

        let mut fields = BTreeMap::new();
        for (id, value) in entries {
            let name = keys.resolve(id).ok_or_else(|| {
                StoreError::Serialization(format!(
                    "field id {} not in dictionary version {}",
                    id,
                    keys.version()
                ))
            })?;
            fields.insert(name.to_string(), value);
        }

        Ok(Self { id: 0, fields })
    }

    fn compatible_decoders() -> Vec<(FormatId, DecodeFn<Self>)> {
        vec![(1, Document::decode_legacy as DecodeFn<Self>)]
    }
}
