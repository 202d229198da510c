//! Minimal MessagePack reader/writer covering exactly the type codes the wire
//! format uses: positive/negative fixint, fixmap, fixstr, str8, uint8/16/32,
//! float64 and bin8/16/32.
//!
//! Integers that do not fit in 32 bits are written as float64, matching what
//! a JavaScript encoder produces, and the reader accepts any numeric code for
//! a numeric field.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PackError {
    #[error("unexpected end of input")]
    Truncated,

    #[error("unsupported type code: 0x{0:02x}")]
    UnsupportedType(u8),

    #[error("invalid UTF-8 in string")]
    InvalidString,

    #[error("map key must be a string")]
    NonStringKey,

    #[error("expected a map at the top level")]
    NotAMap,
}

/// A decoded MessagePack value from the supported subset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl Value {
    /// Numeric view of the value, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Uint(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Non-negative integer view. Floats are accepted when integral, the way
    /// a JavaScript writer may have encoded a large counter.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            Value::Float(f) if f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64 => {
                Some(*f as u64)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Write an unsigned integer using the smallest representation. Values above
/// `u32::MAX` fall back to float64.
pub fn write_uint(out: &mut Vec<u8>, value: u64) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value <= u8::MAX as u64 {
        out.push(0xcc);
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(0xcd);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(0xce);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        write_f64(out, value as f64);
    }
}

pub fn write_f64(out: &mut Vec<u8>, value: f64) {
    out.push(0xcb);
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write a UTF-8 string as fixstr or str8. Strings longer than 255 bytes are
/// cut at the last character boundary that fits; the wire format has no
/// longer string form and only ever carries short identifiers and messages.
pub fn write_str(out: &mut Vec<u8>, value: &str) {
    let mut bytes = value.as_bytes();
    if bytes.len() > u8::MAX as usize {
        let mut end = u8::MAX as usize;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        bytes = &bytes[..end];
    }

    if bytes.len() < 32 {
        out.push(0xa0 | bytes.len() as u8);
    } else {
        out.push(0xd9);
        out.push(bytes.len() as u8);
    }
    out.extend_from_slice(bytes);
}

pub fn write_bin(out: &mut Vec<u8>, value: &[u8]) {
    if value.len() <= u8::MAX as usize {
        out.push(0xc4);
        out.push(value.len() as u8);
    } else if value.len() <= u16::MAX as usize {
        out.push(0xc5);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    } else {
        out.push(0xc6);
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    }
    out.extend_from_slice(value);
}

/// Write a fixmap header. The wire format never needs more than 15 entries.
pub fn write_map_header(out: &mut Vec<u8>, entries: usize) {
    debug_assert!(entries < 16);
    out.push(0x80 | entries as u8);
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8], PackError> {
    if input.len() < len {
        return Err(PackError::Truncated);
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}

fn take_u8(input: &mut &[u8]) -> Result<u8, PackError> {
    Ok(take(input, 1)?[0])
}

fn read_str_body(input: &mut &[u8], len: usize) -> Result<String, PackError> {
    let bytes = take(input, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| PackError::InvalidString)
}

/// Read one value from the supported subset.
pub fn read_value(input: &mut &[u8]) -> Result<Value, PackError> {
    let code = take_u8(input)?;
    match code {
        0x00..=0x7f => Ok(Value::Uint(code as u64)),
        0xe0..=0xff => Ok(Value::Int(code as i8 as i64)),
        0xcc => Ok(Value::Uint(take_u8(input)? as u64)),
        0xcd => {
            let bytes = take(input, 2)?;
            Ok(Value::Uint(u16::from_be_bytes([bytes[0], bytes[1]]) as u64))
        }
        0xce => {
            let bytes = take(input, 4)?;
            Ok(Value::Uint(
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
            ))
        }
        0xcb => {
            let bytes = take(input, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(Value::Float(f64::from_be_bytes(raw)))
        }
        0xa0..=0xbf => {
            let len = (code & 0x1f) as usize;
            Ok(Value::Str(read_str_body(input, len)?))
        }
        0xd9 => {
            let len = take_u8(input)? as usize;
            Ok(Value::Str(read_str_body(input, len)?))
        }
        0xc4 => {
            let len = take_u8(input)? as usize;
            Ok(Value::Bin(take(input, len)?.to_vec()))
        }
        0xc5 => {
            let bytes = take(input, 2)?;
            let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
            Ok(Value::Bin(take(input, len)?.to_vec()))
        }
        0xc6 => {
            let bytes = take(input, 4)?;
            let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            Ok(Value::Bin(take(input, len)?.to_vec()))
        }
        other => Err(PackError::UnsupportedType(other)),
    }
}

/// Read a fixmap of string keys. Field values may arrive in any order, so the
/// caller looks entries up by name.
pub fn read_map(input: &mut &[u8]) -> Result<Vec<(String, Value)>, PackError> {
    let code = take_u8(input)?;
    if code & 0xf0 != 0x80 {
        return Err(PackError::NotAMap);
    }
    let entries = (code & 0x0f) as usize;

    let mut map = Vec::with_capacity(entries);
    for _ in 0..entries {
        let key = match read_value(input)? {
            Value::Str(key) => key,
            _ => return Err(PackError::NonStringKey),
        };
        let value = read_value(input)?;
        map.push((key, value));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &Value) -> Value {
        let mut out = Vec::new();
        match value {
            Value::Uint(v) => write_uint(&mut out, *v),
            Value::Float(v) => write_f64(&mut out, *v),
            Value::Str(v) => write_str(&mut out, v),
            Value::Bin(v) => write_bin(&mut out, v),
            Value::Int(_) => unreachable!("writer never emits negative fixint"),
        }
        let mut input = out.as_slice();
        let decoded = read_value(&mut input).expect("decode");
        assert!(input.is_empty(), "trailing bytes after decode");
        decoded
    }

    #[test]
    fn uint_boundaries_pick_smallest_code() {
        for v in [0u64, 1, 0x7f, 0x80, 0xff, 0x100, 0xffff, 0x1_0000, 0xffff_ffff] {
            assert_eq!(round_trip(&Value::Uint(v)), Value::Uint(v));
        }

        let mut out = Vec::new();
        write_uint(&mut out, 0x7f);
        assert_eq!(out, vec![0x7f]);
        out.clear();
        write_uint(&mut out, 0x80);
        assert_eq!(out, vec![0xcc, 0x80]);
        out.clear();
        write_uint(&mut out, 0x1234);
        assert_eq!(out, vec![0xcd, 0x12, 0x34]);
    }

    #[test]
    fn uint_above_u32_becomes_float64() {
        let v = (u32::MAX as u64) + 1;
        let mut out = Vec::new();
        write_uint(&mut out, v);
        assert_eq!(out[0], 0xcb);

        let mut input = out.as_slice();
        let decoded = read_value(&mut input).unwrap();
        assert_eq!(decoded.as_u64(), Some(v));
    }

    #[test]
    fn string_forms() {
        assert_eq!(
            round_trip(&Value::Str("hi".into())),
            Value::Str("hi".into())
        );
        let long = "x".repeat(200);
        assert_eq!(round_trip(&Value::Str(long.clone())), Value::Str(long));
    }

    #[test]
    fn overlong_string_is_cut_at_char_boundary() {
        let s = "é".repeat(200); // 400 bytes
        let mut out = Vec::new();
        write_str(&mut out, &s);
        let mut input = out.as_slice();
        match read_value(&mut input).unwrap() {
            Value::Str(decoded) => {
                assert!(decoded.len() <= 255);
                assert!(s.starts_with(&decoded));
            }
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn bin_forms() {
        for len in [0usize, 1, 255, 256, 70_000] {
            let data = vec![0xabu8; len];
            assert_eq!(round_trip(&Value::Bin(data.clone())), Value::Bin(data));
        }
    }

    #[test]
    fn negative_fixint_decodes() {
        let mut input: &[u8] = &[0xff];
        assert_eq!(read_value(&mut input).unwrap(), Value::Int(-1));
        let mut input: &[u8] = &[0xe0];
        assert_eq!(read_value(&mut input).unwrap(), Value::Int(-32));
    }

    #[test]
    fn truncated_inputs_error() {
        let mut out = Vec::new();
        write_bin(&mut out, &[1, 2, 3, 4]);
        for cut in 0..out.len() {
            let mut input = &out[..cut];
            assert_eq!(read_value(&mut input), Err(PackError::Truncated));
        }
    }

    #[test]
    fn unsupported_code_is_rejected() {
        // uint64 (0xcf) is outside the supported subset
        let mut input: &[u8] = &[0xcf, 0, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(
            read_value(&mut input),
            Err(PackError::UnsupportedType(0xcf))
        );
    }

    #[test]
    fn map_round_trip() {
        let mut out = Vec::new();
        write_map_header(&mut out, 2);
        write_str(&mut out, "a");
        write_uint(&mut out, 7);
        write_str(&mut out, "b");
        write_f64(&mut out, 1.5);

        let mut input = out.as_slice();
        let map = read_map(&mut input).unwrap();
        assert!(input.is_empty());
        assert_eq!(map[0], ("a".to_string(), Value::Uint(7)));
        assert_eq!(map[1], ("b".to_string(), Value::Float(1.5)));
    }

    #[test]
    fn map_rejects_non_string_keys() {
        let mut out = Vec::new();
        write_map_header(&mut out, 1);
        write_uint(&mut out, 1);
        write_uint(&mut out, 2);
        let mut input = out.as_slice();
        assert_eq!(read_map(&mut input), Err(PackError::NonStringKey));
    }
}
