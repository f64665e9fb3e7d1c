use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::app::error::ParcelError;

const NULL_LENGTH: i32 = -1;

/// Append-only binary record in the platform's parcel layout: little-endian scalars, strings as
/// a byte length (-1 for null) followed by UTF-8 bytes padded to a 4-byte boundary.
#[derive(Debug, Default, Clone)]
pub struct Parcel {
    buf: Vec<u8>,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_i32(&mut self, value: i32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_i32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_i64(&mut self, value: i64) {
        let mut bytes = [0u8; 8];
        LittleEndian::write_i64(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_i32(i32::from(value));
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_blob(value.as_bytes());
    }

    pub fn write_nullable_str(&mut self, value: Option<&str>) {
        match value {
            Some(value) => self.write_str(value),
            None => self.write_i32(NULL_LENGTH),
        }
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_blob(value);
    }

    pub fn write_str_list(&mut self, values: &[String]) {
        self.write_len(values.len());
        for value in values {
            self.write_str(value);
        }
    }

    pub fn write_parcelable<T: Parcelable>(&mut self, value: &T) {
        value.write_to(self);
    }

    pub fn write_list<T: Parcelable>(&mut self, values: &[T]) {
        self.write_len(values.len());
        for value in values {
            value.write_to(self);
        }
    }

    fn write_len(&mut self, len: usize) {
        self.write_i32(wire_len(len));
    }

    fn write_blob(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.buf.extend_from_slice(bytes);
        let padding = (4 - bytes.len() % 4) % 4;
        self.buf.extend(std::iter::repeat(0u8).take(padding));
    }
}

/// Length prefix for `len` items or bytes. Payloads past `i32::MAX` cannot be framed.
fn wire_len(len: usize) -> i32 {
    debug_assert!(
        i32::try_from(len).is_ok(),
        "parcel length {len} exceeds the i32 length prefix"
    );
    i32::try_from(len).unwrap_or(i32::MAX)
}

pub struct ParcelReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ParcelReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn remaining(&self) -> usize {
        let total = self.cursor.get_ref().len() as u64;
        total.saturating_sub(self.cursor.position()) as usize
    }

    pub fn read_i32(&mut self, what: &'static str) -> Result<i32, ParcelError> {
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| ParcelError::Truncated(what))
    }

    pub fn read_i64(&mut self, what: &'static str) -> Result<i64, ParcelError> {
        self.cursor
            .read_i64::<LittleEndian>()
            .map_err(|_| ParcelError::Truncated(what))
    }

    pub fn read_bool(&mut self, what: &'static str) -> Result<bool, ParcelError> {
        Ok(self.read_i32(what)? != 0)
    }

    pub fn read_string(&mut self, what: &'static str) -> Result<String, ParcelError> {
        self.read_nullable_string(what)?
            .ok_or(ParcelError::UnexpectedNull(what))
    }

    pub fn read_nullable_string(&mut self, what: &'static str) -> Result<Option<String>, ParcelError> {
        match self.read_blob(what)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| ParcelError::InvalidUtf8),
            None => Ok(None),
        }
    }

    pub fn read_bytes(&mut self, what: &'static str) -> Result<Vec<u8>, ParcelError> {
        self.read_blob(what)?.ok_or(ParcelError::UnexpectedNull(what))
    }

    pub fn read_str_list(&mut self, what: &'static str) -> Result<Vec<String>, ParcelError> {
        let count = self.read_len(what)?;
        (0..count).map(|_| self.read_string(what)).collect()
    }

    pub fn read_parcelable<T: Parcelable>(&mut self) -> Result<T, ParcelError> {
        T::read_from(self)
    }

    pub fn read_list<T: Parcelable>(&mut self, what: &'static str) -> Result<Vec<T>, ParcelError> {
        let count = self.read_len(what)?;
        let mut values = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            values.push(T::read_from(self)?);
        }
        Ok(values)
    }

    fn read_len(&mut self, what: &'static str) -> Result<usize, ParcelError> {
        let len = self.read_i32(what)?;
        usize::try_from(len).map_err(|_| ParcelError::NegativeLength(len))
    }

    fn read_blob(&mut self, what: &'static str) -> Result<Option<Vec<u8>>, ParcelError> {
        let len = self.read_i32(what)?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        let len = usize::try_from(len).map_err(|_| ParcelError::NegativeLength(len))?;
        if len > self.remaining() {
            return Err(ParcelError::Truncated(what));
        }
        let mut bytes = vec![0u8; len];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|_| ParcelError::Truncated(what))?;
        let padding = (4 - len % 4) % 4;
        if padding > self.remaining() {
            return Err(ParcelError::Truncated(what));
        }
        self.cursor.set_position(self.cursor.position() + padding as u64);
        Ok(Some(bytes))
    }
}

/// A record with a fixed field order on the wire. `read_from` consumes exactly what `write_to`
/// produced.
pub trait Parcelable: Sized {
    fn write_to(&self, parcel: &mut Parcel);

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError>;

    fn to_parcel(&self) -> Vec<u8> {
        let mut parcel = Parcel::new();
        self.write_to(&mut parcel);
        parcel.into_bytes()
    }

    fn from_parcel(bytes: &[u8]) -> Result<Self, ParcelError> {
        Self::read_from(&mut ParcelReader::new(bytes))
    }
}
