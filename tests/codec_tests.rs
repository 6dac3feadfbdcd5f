//! Tests for versioned record codecs
//!
//! These tests verify:
//! - Records written in an older format decode through a registered fallback
//! - Missing fallbacks fail with the requested and supported formats
//! - Key dictionary growth between writes and across reopen
//! - Decode failures on unflushed records surface as not-yet-durable

use bytes::BytesMut;
use offsetstore::codec::{
    read_bincode, supported_formats, write_bincode, DecodeFn, DictionarySnapshot, FormatId,
    KeyDictionary, Value,
};
use offsetstore::{Config, Document, OffsetIndex, Result, Storable, StoreError};
use tempfile::TempDir;

// =============================================================================
// Test Record Types
// =============================================================================

/// "note" as written by an old release: text only
#[derive(Debug, Clone, PartialEq)]
struct NoteV1 {
    id: u64,
    text: String,
}

impl Storable for NoteV1 {
    const KIND: &'static str = "note";
    const FORMAT: FormatId = 1;

    fn part_id(&self) -> u64 {
        self.id
    }

    fn set_part_id(&mut self, id: u64) {
        self.id = id;
    }

    fn encode(&self, out: &mut BytesMut, _keys: &KeyDictionary) -> Result<()> {
        write_bincode(&self.text, out)
    }

    fn decode(body: &[u8], _keys: &DictionarySnapshot) -> Result<Self> {
        Ok(Self {
            id: 0,
            text: read_bincode(body)?,
        })
    }
}

/// Current "note": text plus priority, still reads format 1
#[derive(Debug, Clone, PartialEq)]
struct Note {
    id: u64,
    text: String,
    priority: u32,
}

impl Note {
    fn decode_v1(body: &[u8], _keys: &DictionarySnapshot) -> Result<Self> {
        Ok(Self {
            id: 0,
            text: read_bincode(body)?,
            priority: 0,
        })
    }
}

impl Storable for Note {
    const KIND: &'static str = "note";
    const FORMAT: FormatId = 2;

    fn part_id(&self) -> u64 {
        self.id
    }

    fn set_part_id(&mut self, id: u64) {
        self.id = id;
    }

    fn encode(&self, out: &mut BytesMut, _keys: &KeyDictionary) -> Result<()> {
        write_bincode(&(&self.text, self.priority), out)
    }

    fn decode(body: &[u8], _keys: &DictionarySnapshot) -> Result<Self> {
        let (text, priority): (String, u32) = read_bincode(body)?;
        Ok(Self { id: 0, text, priority })
    }

    fn compatible_decoders() -> Vec<(FormatId, DecodeFn<Self>)> {
        vec![(1, Note::decode_v1 as DecodeFn<Self>)]
    }
}

/// A "note" release that dropped support for format 1
#[derive(Debug)]
struct StrictNote {
    id: u64,
}

impl Storable for StrictNote {
    const KIND: &'static str = "note";
    const FORMAT: FormatId = 3;

    fn part_id(&self) -> u64 {
        self.id
    }

    fn set_part_id(&mut self, id: u64) {
        self.id = id;
    }

    fn encode(&self, _out: &mut BytesMut, _keys: &KeyDictionary) -> Result<()> {
        Ok(())
    }

    fn decode(_body: &[u8], _keys: &DictionarySnapshot) -> Result<Self> {
        Ok(Self { id: 0 })
    }
}

/// Document written in the legacy inline-names format
struct LegacyDocument(Document);

impl Storable for LegacyDocument {
    const KIND: &'static str = "document";
    const FORMAT: FormatId = 1;

    fn part_id(&self) -> u64 {
        self.0.id()
    }

    fn set_part_id(&mut self, _id: u64) {}

    fn encode(&self, out: &mut BytesMut, _keys: &KeyDictionary) -> Result<()> {
        self.0.encode_legacy(out)
    }

    fn decode(_body: &[u8], _keys: &DictionarySnapshot) -> Result<Self> {
        Err(StoreError::Serialization("write-only".to_string()))
    }
}

/// Encodes fine, never decodes
struct Unreadable {
    id: u64,
}

impl Storable for Unreadable {
    const KIND: &'static str = "unreadable";
    const FORMAT: FormatId = 1;

    fn part_id(&self) -> u64 {
        self.id
    }

    fn set_part_id(&mut self, id: u64) {
        self.id = id;
    }

    fn encode(&self, out: &mut BytesMut, _keys: &KeyDictionary) -> Result<()> {
        write_bincode(&self.id, out)
    }

    fn decode(_body: &[u8], _keys: &DictionarySnapshot) -> Result<Self> {
        Err(StoreError::Serialization("unreadable body".to_string()))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_index() -> (TempDir, OffsetIndex) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    let index = OffsetIndex::open(config).unwrap();
    (temp_dir, index)
}

// =============================================================================
// Version Fallback Tests
// =============================================================================

#[test]
fn test_old_format_decodes_through_fallback() {
    let (_temp, index) = setup_temp_index();

    index
        .put(1, &NoteV1 {
            id: 4,
            text: "hello".to_string(),
        })
        .unwrap();
    index.flush(1).unwrap();

    let key = index.record_key::<Note>(4).unwrap();
    let note = index.get::<Note>(key).unwrap().unwrap();
    assert_eq!(
        note,
        Note {
            id: 4,
            text: "hello".to_string(),
            priority: 0
        }
    );
}

#[test]
fn test_current_and_old_formats_coexist() {
    let (_temp, index) = setup_temp_index();

    index
        .put(1, &NoteV1 {
            id: 1,
            text: "old".to_string(),
        })
        .unwrap();
    index
        .put(1, &Note {
            id: 2,
            text: "new".to_string(),
            priority: 7,
        })
        .unwrap();

    let old = index.get::<Note>(index.record_key::<Note>(1).unwrap()).unwrap().unwrap();
    let new = index.get::<Note>(index.record_key::<Note>(2).unwrap()).unwrap().unwrap();
    assert_eq!(old.priority, 0);
    assert_eq!(new.priority, 7);

    let raw = index.get_binary(index.record_key::<Note>(1).unwrap()).unwrap().unwrap();
    assert_eq!(raw.format, 1);
}

#[test]
fn test_missing_fallback_fails_with_supported_formats() {
    let (_temp, index) = setup_temp_index();

    index
        .put(1, &NoteV1 {
            id: 9,
            text: "x".to_string(),
        })
        .unwrap();
    index.flush(1).unwrap();

    let key = index.record_key::<StrictNote>(9).unwrap();
    match index.get::<StrictNote>(key) {
        Err(StoreError::VersionNotSupported {
            kind,
            requested,
            supported,
        }) => {
            assert_eq!(kind, "note");
            assert_eq!(requested, 1);
            assert_eq!(supported, vec![3]);
        }
        other => panic!("expected version not supported, got {:?}", other),
    }
}

#[test]
fn test_supported_formats_lists_current_first() {
    assert_eq!(supported_formats::<Note>(), vec![2, 1]);
    assert_eq!(supported_formats::<StrictNote>(), vec![3]);
    assert_eq!(supported_formats::<Document>(), vec![2, 1]);
}

#[test]
fn test_legacy_document_is_readable() {
    let (_temp, index) = setup_temp_index();

    let original = Document::new(12).with("city", "Oslo").with("zip", 150i64);
    index.put(1, &LegacyDocument(original.clone())).unwrap();
    index.flush(1).unwrap();

    let key = index.record_key::<Document>(12).unwrap();
    assert_eq!(index.get::<Document>(key).unwrap(), Some(original));
}

// =============================================================================
// Dictionary Tests
// =============================================================================

#[test]
fn test_new_field_names_after_reads() {
    let (_temp, index) = setup_temp_index();

    index.put(1, &Document::new(1).with("a", 1i64)).unwrap();
    let first = index.record_key::<Document>(1).unwrap();
    assert!(index.get::<Document>(first).unwrap().is_some());

    // grows the dictionary: pooled decoders from the first read are stale
    index.put(1, &Document::new(2).with("b", 2i64)).unwrap();
    let second = index.record_key::<Document>(2).unwrap();
    let found = index.get::<Document>(second).unwrap().unwrap();
    assert_eq!(found.get("b"), Some(&Value::Int(2)));

    let descriptor = index.flush(1).unwrap();
    assert_eq!(descriptor.dictionary().version(), 2);
}

#[test]
fn test_dictionary_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    {
        let index = OffsetIndex::open(config.clone()).unwrap();
        index
            .put(1, &Document::new(1).with("first", true).with("second", "two"))
            .unwrap();
        index.close().unwrap();
    }

    let index = OffsetIndex::open(config).unwrap();
    let descriptor = index.descriptor();
    assert_eq!(descriptor.dictionary().version(), 2);
    assert_eq!(descriptor.decoder().generation(), 2);
    assert_eq!(descriptor.decoder().keys().resolve(0), Some("first"));

    let key = index.record_key::<Document>(1).unwrap();
    let found = index.get::<Document>(key).unwrap().unwrap();
    assert_eq!(found.get("first"), Some(&Value::Bool(true)));
    assert_eq!(found.get("second"), Some(&Value::Text("two".to_string())));

    // ids keep counting after the restored names
    index.put(2, &Document::new(2).with("third", 3i64)).unwrap();
    let descriptor = index.flush(2).unwrap();
    assert_eq!(descriptor.dictionary().resolve(2), Some("third"));
}

// =============================================================================
// Error Wrapping Tests
// =============================================================================

#[test]
fn test_decode_failure_on_unflushed_record_is_not_yet_durable() {
    let (_temp, index) = setup_temp_index();

    let location = index.put(1, &Unreadable { id: 1 }).unwrap();
    let key = index.record_key::<Unreadable>(1).unwrap();

    match index.get::<Unreadable>(key) {
        Err(StoreError::NotYetDurable { offset, source }) => {
            assert_eq!(offset, location.offset);
            assert!(matches!(*source, StoreError::Serialization(_)));
        }
        other => panic!("expected not yet durable, got {:?}", other.map(|_| ())),
    }

    index.flush(1).unwrap();
    assert!(matches!(
        index.get::<Unreadable>(key),
        Err(StoreError::Serialization(_))
    ));
}
