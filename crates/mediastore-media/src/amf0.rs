//! Minimal AMF0 support for FLV script data.
//!
//! Only what `onMetaData` needs: numbers, booleans, strings, objects, ECMA and
//! strict arrays, dates. References, XML and typed objects are rejected.
//!
//! ```text
//! 0x00 Number   0x01 Boolean   0x02 String   0x03 Object
//! 0x05 Null     0x06 Undefined 0x08 ECMA Array  0x09 Object End
//! 0x0A Strict Array  0x0B Date  0x0C Long String
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;

const MAX_NESTING_DEPTH: usize = 32;

/// A decoded AMF0 value. Object properties keep their wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, AmfValue)>),
    Array(Vec<AmfValue>),
    Date(f64),
    Null,
    Undefined,
}

impl AmfValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Property lookup on objects and ECMA arrays.
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        match self {
            Self::Object(props) => props.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(AmfValue::as_number)
    }
}

/// Decode one value from `buf`.
pub fn decode(buf: &mut Bytes) -> Result<AmfValue> {
    decode_at(buf, 0)
}

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::BufferUnderflow {
            need: n,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn decode_at(buf: &mut Bytes, depth: usize) -> Result<AmfValue> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::invalid_data("AMF0 nesting too deep"));
    }
    need(buf, 1)?;

    match buf.get_u8() {
        MARKER_NUMBER => {
            need(buf, 8)?;
            Ok(AmfValue::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            need(buf, 1)?;
            Ok(AmfValue::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
        MARKER_LONG_STRING => Ok(AmfValue::String(read_utf8_long(buf)?)),
        MARKER_OBJECT => Ok(AmfValue::Object(read_properties(buf, depth)?)),
        MARKER_ECMA_ARRAY => {
            need(buf, 4)?;
            // Count is only a hint
            let _count = buf.get_u32();
            Ok(AmfValue::Object(read_properties(buf, depth)?))
        }
        MARKER_STRICT_ARRAY => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_at(buf, depth + 1)?);
            }
            Ok(AmfValue::Array(items))
        }
        MARKER_DATE => {
            need(buf, 10)?;
            let millis = buf.get_f64();
            let _timezone = buf.get_i16();
            Ok(AmfValue::Date(millis))
        }
        MARKER_NULL => Ok(AmfValue::Null),
        MARKER_UNDEFINED => Ok(AmfValue::Undefined),
        marker => Err(Error::unsupported(format!("AMF0 marker 0x{marker:02x}"))),
    }
}

fn read_properties(buf: &mut Bytes, depth: usize) -> Result<Vec<(String, AmfValue)>> {
    let mut props = Vec::new();
    loop {
        // Some writers drop the end marker at the end of the tag
        if buf.remaining() == 0 {
            break;
        }
        let key = read_utf8(buf)?;
        if key.is_empty() {
            if buf.remaining() > 0 && buf[0] == MARKER_OBJECT_END {
                buf.advance(1);
            }
            break;
        }
        let value = decode_at(buf, depth + 1)?;
        props.push((key, value));
    }
    Ok(props)
}

fn read_utf8(buf: &mut Bytes) -> Result<String> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_utf8_bytes(buf, len)
}

fn read_utf8_long(buf: &mut Bytes) -> Result<String> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    read_utf8_bytes(buf, len)
}

fn read_utf8_bytes(buf: &mut Bytes, len: usize) -> Result<String> {
    need(buf, len)?;
    let raw = buf.split_to(len);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Encode `value` onto `buf`. Objects are written as ECMA arrays.
pub fn encode(buf: &mut BytesMut, value: &AmfValue) {
    match value {
        AmfValue::Number(n) => {
            buf.put_u8(MARKER_NUMBER);
            buf.put_f64(*n);
        }
        AmfValue::Boolean(b) => {
            buf.put_u8(MARKER_BOOLEAN);
            buf.put_u8(u8::from(*b));
        }
        AmfValue::String(s) => {
            if s.len() > u16::MAX as usize {
                buf.put_u8(MARKER_LONG_STRING);
                buf.put_u32(s.len() as u32);
            } else {
                buf.put_u8(MARKER_STRING);
                buf.put_u16(s.len() as u16);
            }
            buf.put_slice(s.as_bytes());
        }
        AmfValue::Object(props) => {
            buf.put_u8(MARKER_ECMA_ARRAY);
            buf.put_u32(props.len() as u32);
            for (key, value) in props {
                buf.put_u16(key.len() as u16);
                buf.put_slice(key.as_bytes());
                encode(buf, value);
            }
            buf.put_u16(0);
            buf.put_u8(MARKER_OBJECT_END);
        }
        AmfValue::Array(items) => {
            buf.put_u8(MARKER_STRICT_ARRAY);
            buf.put_u32(items.len() as u32);
            for item in items {
                encode(buf, item);
            }
        }
        AmfValue::Date(millis) => {
            buf.put_u8(MARKER_DATE);
            buf.put_f64(*millis);
            buf.put_i16(0);
        }
        AmfValue::Null => buf.put_u8(MARKER_NULL),
        AmfValue::Undefined => buf.put_u8(MARKER_UNDEFINED),
    }
}
