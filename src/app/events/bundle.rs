use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::app::error::ParcelError;

use super::parcel::{Parcel, ParcelReader, Parcelable};

const TAG_STRING: i32 = 0;
const TAG_INT: i32 = 1;
const TAG_LONG: i32 = 2;
const TAG_BOOL: i32 = 3;
const TAG_BYTES: i32 = 4;
const TAG_STRING_LIST: i32 = 5;
const TAG_BUNDLE: i32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleValue {
    String(String),
    Int(i32),
    Long(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    StringList(Vec<String>),
    Bundle(Bundle),
}

impl From<&str> for BundleValue {
    fn from(value: &str) -> Self {
        BundleValue::String(value.to_string())
    }
}

impl From<String> for BundleValue {
    fn from(value: String) -> Self {
        BundleValue::String(value)
    }
}

impl From<i32> for BundleValue {
    fn from(value: i32) -> Self {
        BundleValue::Int(value)
    }
}

impl From<i64> for BundleValue {
    fn from(value: i64) -> Self {
        BundleValue::Long(value)
    }
}

impl From<bool> for BundleValue {
    fn from(value: bool) -> Self {
        BundleValue::Bool(value)
    }
}

impl From<Vec<u8>> for BundleValue {
    fn from(value: Vec<u8>) -> Self {
        BundleValue::Bytes(value)
    }
}

impl From<Vec<String>> for BundleValue {
    fn from(value: Vec<String>) -> Self {
        BundleValue::StringList(value)
    }
}

impl From<Bundle> for BundleValue {
    fn from(value: Bundle) -> Self {
        BundleValue::Bundle(value)
    }
}

/// Ordered string-keyed property map: intent extras, saved instance state and legacy messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    entries: BTreeMap<String, BundleValue>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<BundleValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put(key, BundleValue::String(value.into()));
    }

    pub fn put_int(&mut self, key: impl Into<String>, value: i32) {
        self.put(key, value);
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.put(key, value);
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) {
        self.put(key, value);
    }

    pub fn put_bytes(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.put(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<BundleValue> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&BundleValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(BundleValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(BundleValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(BundleValue::Long(value)) => Some(*value),
            Some(BundleValue::Int(value)) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(BundleValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key) {
            Some(BundleValue::Bytes(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_string_list(&self, key: &str) -> Option<&[String]> {
        match self.entries.get(key) {
            Some(BundleValue::StringList(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_bundle(&self, key: &str) -> Option<&Bundle> {
        match self.entries.get(key) {
            Some(BundleValue::Bundle(value)) => Some(value),
            _ => None,
        }
    }

    /// Stores `value` encoded as a parcel under `key`.
    pub fn put_parcelable<T: Parcelable>(&mut self, key: impl Into<String>, value: &T) {
        self.put_bytes(key, value.to_parcel());
    }

    pub fn get_parcelable<T: Parcelable>(&self, key: &str) -> Result<Option<T>, ParcelError> {
        self.get_bytes(key).map(T::from_parcel).transpose()
    }
}

impl Parcelable for Bundle {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_i32(i32::try_from(self.entries.len()).unwrap_or(i32::MAX));
        for (key, value) in &self.entries {
            parcel.write_str(key);
            match value {
                BundleValue::String(value) => {
                    parcel.write_i32(TAG_STRING);
                    parcel.write_str(value);
                }
                BundleValue::Int(value) => {
                    parcel.write_i32(TAG_INT);
                    parcel.write_i32(*value);
                }
                BundleValue::Long(value) => {
                    parcel.write_i32(TAG_LONG);
                    parcel.write_i64(*value);
                }
                BundleValue::Bool(value) => {
                    parcel.write_i32(TAG_BOOL);
                    parcel.write_bool(*value);
                }
                BundleValue::Bytes(value) => {
                    parcel.write_i32(TAG_BYTES);
                    parcel.write_bytes(value);
                }
                BundleValue::StringList(value) => {
                    parcel.write_i32(TAG_STRING_LIST);
                    parcel.write_str_list(value);
                }
                BundleValue::Bundle(value) => {
                    parcel.write_i32(TAG_BUNDLE);
                    value.write_to(parcel);
                }
            }
        }
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        let count = reader.read_i32("bundle size")?;
        if count < 0 {
            return Err(ParcelError::NegativeLength(count));
        }
        let mut bundle = Bundle::new();
        for _ in 0..count {
            let key = reader.read_string("bundle key")?;
            let value = match reader.read_i32("bundle value tag")? {
                TAG_STRING => BundleValue::String(reader.read_string("bundle string")?),
                TAG_INT => BundleValue::Int(reader.read_i32("bundle int")?),
                TAG_LONG => BundleValue::Long(reader.read_i64("bundle long")?),
                TAG_BOOL => BundleValue::Bool(reader.read_bool("bundle bool")?),
                TAG_BYTES => BundleValue::Bytes(reader.read_bytes("bundle bytes")?),
                TAG_STRING_LIST => BundleValue::StringList(reader.read_str_list("bundle list")?),
                TAG_BUNDLE => BundleValue::Bundle(Bundle::read_from(reader)?),
                other => return Err(ParcelError::UnknownValueTag(other)),
            };
            bundle.entries.insert(key, value);
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_only_match_their_type() {
        let mut bundle = Bundle::new();
        bundle.put_string("name", "scenario");
        bundle.put_int("count", 3);
        assert_eq!(bundle.get_string("name"), Some("scenario"));
        assert_eq!(bundle.get_int("name"), None);
        assert_eq!(bundle.get_long("count"), Some(3));
        assert_eq!(bundle.get_bool("missing"), None);
    }

    #[test]
    fn nested_bundles_survive_the_wire() {
        let mut inner = Bundle::new();
        inner.put_bool("flag", true);
        let mut bundle = Bundle::new();
        bundle.put_string("TestEvent", "TEST_STARTED");
        bundle.put_long("elapsed", 1_234_567_890_123);
        bundle.put_bytes("blob", vec![1, 2, 3]);
        bundle.put("tests", vec!["a#b".to_string(), "c#d".to_string()]);
        bundle.put("inner", inner);

        let decoded = Bundle::from_parcel(&bundle.to_parcel()).expect("decode");
        assert_eq!(decoded, bundle);
        assert_eq!(
            decoded.get_bundle("inner").and_then(|inner| inner.get_bool("flag")),
            Some(true)
        );
    }

    #[test]
    fn unknown_value_tag_is_fatal() {
        let mut parcel = Parcel::new();
        parcel.write_i32(1);
        parcel.write_str("key");
        parcel.write_i32(42);
        assert_eq!(
            Bundle::from_parcel(parcel.as_bytes()),
            Err(ParcelError::UnknownValueTag(42))
        );
    }
}
