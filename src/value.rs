//! Dynamic column values and parameter encoding.
//!
//! Result columns are decoded by type OID into [`Value`]. Parameters go out
//! through [`ToWireValue`] / [`ToParams`], which write the Bind message's
//! per-parameter format codes and length-prefixed bytes.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

/// A single decoded column value or query parameter.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL
    #[default]
    Null,
    /// `bool`
    Bool(bool),
    /// `int2`, `int4`, `int8`, `oid`
    Int(i64),
    /// `float4`, `float8`
    Float(f64),
    /// Text and every type without a native mapping (numeric, json, dates, ...)
    Text(String),
    /// `bytea`
    Bytes(Vec<u8>),
}

impl Value {
    /// Decode a column by type OID and format. `None` is SQL NULL.
    pub fn decode(type_oid: Oid, format: FormatCode, bytes: Option<&[u8]>) -> Result<Self> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        match format {
            FormatCode::Text => Self::decode_text(type_oid, bytes),
            FormatCode::Binary => Self::decode_binary(type_oid, bytes),
        }
    }

    /// Decode a non-NULL text-format column.
    pub fn decode_text(type_oid: Oid, bytes: &[u8]) -> Result<Self> {
        match type_oid {
            oid::BOOL => match bytes {
                b"t" | b"true" => Ok(Value::Bool(true)),
                b"f" | b"false" => Ok(Value::Bool(false)),
                _ => Err(Error::Decode(format!(
                    "invalid boolean: {:?}",
                    String::from_utf8_lossy(bytes)
                ))),
            },
            oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => {
                let s = utf8(bytes)?;
                s.parse()
                    .map(Value::Int)
                    .map_err(|e| Error::Decode(format!("invalid integer {:?}: {}", s, e)))
            }
            oid::FLOAT4 | oid::FLOAT8 => parse_float(utf8(bytes)?).map(Value::Float),
            oid::BYTEA => decode_bytea_text(bytes).map(Value::Bytes),
            _ => utf8(bytes).map(|s| Value::Text(s.to_string())),
        }
    }

    /// Decode a non-NULL binary-format column.
    pub fn decode_binary(type_oid: Oid, bytes: &[u8]) -> Result<Self> {
        match type_oid {
            oid::BOOL => match bytes {
                [b] => Ok(Value::Bool(*b != 0)),
                _ => Err(length_error("bool", bytes)),
            },
            oid::INT2 => fixed::<2>("int2", bytes).map(|b| Value::Int(i16::from_be_bytes(b).into())),
            oid::INT4 => fixed::<4>("int4", bytes).map(|b| Value::Int(i32::from_be_bytes(b).into())),
            oid::INT8 => fixed::<8>("int8", bytes).map(|b| Value::Int(i64::from_be_bytes(b))),
            oid::OID => fixed::<4>("oid", bytes).map(|b| Value::Int(u32::from_be_bytes(b).into())),
            oid::FLOAT4 => {
                fixed::<4>("float4", bytes).map(|b| Value::Float(f32::from_be_bytes(b).into()))
            }
            oid::FLOAT8 => fixed::<8>("float8", bytes).map(|b| Value::Float(f64::from_be_bytes(b))),
            oid::TEXT
            | oid::VARCHAR
            | oid::BPCHAR
            | oid::NAME
            | oid::CHAR
            | oid::JSON
            | oid::UNKNOWN => utf8(bytes).map(|s| Value::Text(s.to_string())),
            _ => Ok(Value::Bytes(bytes.to_vec())),
        }
    }

    /// The type OID this value is naturally sent as.
    pub fn natural_oid(&self) -> Oid {
        match self {
            Value::Null => 0,
            Value::Bool(_) => oid::BOOL,
            Value::Int(_) => oid::INT8,
            Value::Float(_) => oid::FLOAT8,
            Value::Text(_) => oid::TEXT,
            Value::Bytes(_) => oid::BYTEA,
        }
    }

    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float, if this is a `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The text, if this is a `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The bytes, if this is a `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

fn length_error(type_name: &str, bytes: &[u8]) -> Error {
    Error::Decode(format!("invalid {} length: {}", type_name, bytes.len()))
}

fn fixed<const N: usize>(type_name: &str, bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| length_error(type_name, bytes))
}

fn parse_float(s: &str) -> Result<f64> {
    match s {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => s
            .parse()
            .map_err(|e| Error::Decode(format!("invalid float {:?}: {}", s, e))),
    }
}

/// Decode bytea text output: hex (`\x0a0b`) or the legacy escape format.
fn decode_bytea_text(bytes: &[u8]) -> Result<Vec<u8>> {
    if let Some(hex) = bytes.strip_prefix(b"\\x") {
        if hex.len() % 2 != 0 {
            return Err(Error::Decode("invalid bytea hex length".into()));
        }
        return hex
            .chunks_exact(2)
            .map(|pair| -> Result<u8> { Ok((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?) })
            .collect();
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while let Some((&b, tail)) = rest.split_first() {
        if b != b'\\' {
            out.push(b);
            rest = tail;
            continue;
        }
        match tail {
            [b'\\', tail @ ..] => {
                out.push(b'\\');
                rest = tail;
            }
            [hi @ b'0'..=b'3', mid @ b'0'..=b'7', lo @ b'0'..=b'7', tail @ ..] => {
                out.push(((hi - b'0') << 6) | ((mid - b'0') << 3) | (lo - b'0'));
                rest = tail;
            }
            _ => return Err(Error::Decode("invalid bytea escape sequence".into())),
        }
    }
    Ok(out)
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}

/// Length field for a parameter value; the protocol caps it at `i32::MAX`.
fn wire_len(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| Error::InvalidUsage(format!("parameter too large: {} bytes", len)))
}

fn write_len_prefixed(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    buf.extend_from_slice(&wire_len(data.len())?.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

fn write_null(buf: &mut Vec<u8>) -> Result<()> {
    buf.extend_from_slice(&(-1_i32).to_be_bytes());
    Ok(())
}

/// Trait for encoding Rust values as Bind parameters.
///
/// Scalars and strings travel in text format and let the server infer the
/// parameter type; byte strings travel in binary format.
pub trait ToWireValue {
    /// Format code written into the Bind message for this parameter.
    fn format(&self) -> FormatCode {
        FormatCode::Text
    }

    /// Write the 4-byte length followed by the encoded bytes, or -1 for NULL.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()>;
}

impl ToWireValue for bool {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_len_prefixed(buf, if *self { b"t" } else { b"f" })
    }
}

macro_rules! impl_to_wire_int {
    ($($t:ty),+) => {
        $(
            impl ToWireValue for $t {
                fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
                    write_len_prefixed(buf, self.to_string().as_bytes())
                }
            }
        )+
    };
}

impl_to_wire_int!(i16, i32, i64, u32);

impl ToWireValue for f32 {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_len_prefixed(buf, format_float(f64::from(*self)).as_bytes())
    }
}

impl ToWireValue for f64 {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_len_prefixed(buf, format_float(*self).as_bytes())
    }
}

impl ToWireValue for str {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_len_prefixed(buf, self.as_bytes())
    }
}

impl ToWireValue for String {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.as_str().encode(buf)
    }
}

impl ToWireValue for [u8] {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_len_prefixed(buf, self)
    }
}

impl ToWireValue for Vec<u8> {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().encode(buf)
    }
}

impl<T: ToWireValue> ToWireValue for Option<T> {
    fn format(&self) -> FormatCode {
        match self {
            Some(v) => v.format(),
            None => FormatCode::Text,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(v) => v.encode(buf),
            None => write_null(buf),
        }
    }
}

impl<T: ToWireValue + ?Sized> ToWireValue for &T {
    fn format(&self) -> FormatCode {
        (*self).format()
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        (*self).encode(buf)
    }
}

impl ToWireValue for Value {
    fn format(&self) -> FormatCode {
        match self {
            Value::Bytes(_) => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Value::Null => write_null(buf),
            Value::Bool(b) => b.encode(buf),
            Value::Int(i) => i.encode(buf),
            Value::Float(f) => f.encode(buf),
            Value::Text(s) => s.encode(buf),
            Value::Bytes(b) => b.encode(buf),
        }
    }
}

/// Trait for a positional parameter list (`$1`, `$2`, ...).
pub trait ToParams {
    /// Number of parameters.
    fn param_count(&self) -> usize;

    /// Write one 2-byte format code per parameter.
    fn write_formats(&self, buf: &mut Vec<u8>);

    /// Write every parameter's length-prefixed value.
    fn write_values(&self, buf: &mut Vec<u8>) -> Result<()>;
}

impl ToParams for () {
    fn param_count(&self) -> usize {
        0
    }

    fn write_formats(&self, _buf: &mut Vec<u8>) {}

    fn write_values(&self, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn param_count(&self) -> usize {
        (*self).param_count()
    }

    fn write_formats(&self, buf: &mut Vec<u8>) {
        (*self).write_formats(buf)
    }

    fn write_values(&self, buf: &mut Vec<u8>) -> Result<()> {
        (*self).write_values(buf)
    }
}

impl<T: ToWireValue> ToParams for [T] {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn write_formats(&self, buf: &mut Vec<u8>) {
        for param in self {
            buf.extend_from_slice(&(param.format() as u16).to_be_bytes());
        }
    }

    fn write_values(&self, buf: &mut Vec<u8>) -> Result<()> {
        for param in self {
            param.encode(buf)?;
        }
        Ok(())
    }
}

impl<T: ToWireValue> ToParams for Vec<T> {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn write_formats(&self, buf: &mut Vec<u8>) {
        self.as_slice().write_formats(buf)
    }

    fn write_values(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().write_values(buf)
    }
}

impl<T: ToWireValue, const N: usize> ToParams for [T; N] {
    fn param_count(&self) -> usize {
        N
    }

    fn write_formats(&self, buf: &mut Vec<u8>) {
        self.as_slice().write_formats(buf)
    }

    fn write_values(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().write_values(buf)
    }
}

macro_rules! impl_to_params {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<$($T: ToWireValue),+> ToParams for ($($T,)+) {
            fn param_count(&self) -> usize {
                $count
            }

            fn write_formats(&self, buf: &mut Vec<u8>) {
                $(buf.extend_from_slice(&(self.$idx.format() as u16).to_be_bytes());)+
            }

            fn write_values(&self, buf: &mut Vec<u8>) -> Result<()> {
                $(self.$idx.encode(buf)?;)+
                Ok(())
            }
        }
    };
}

impl_to_params!(1, 0: T0);
impl_to_params!(2, 0: T0, 1: T1);
impl_to_params!(3, 0: T0, 1: T1, 2: T2);
impl_to_params!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_to_params!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_params!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_params!(7, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_params!(8, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_to_params!(9, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_to_params!(10, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_to_params!(11, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_to_params!(12, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);

/// Trait for converting a decoded [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Convert, failing with [`Error::Decode`] on a type mismatch.
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(value: &Value, target: &str) -> Error {
    Error::Decode(format!("cannot convert {} value to {}", value.kind(), target))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch(value, "bool"))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| mismatch(value, "i64"))
    }
}

macro_rules! impl_from_value_narrow_int {
    ($($t:ty),+) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self> {
                    let wide = value
                        .as_i64()
                        .ok_or_else(|| mismatch(value, stringify!($t)))?;
                    <$t>::try_from(wide).map_err(|e| {
                        Error::Decode(format!("{} out of range for {}: {}", wide, stringify!($t), e))
                    })
                }
            }
        )+
    };
}

impl_from_value_narrow_int!(i16, i32, u32);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            _ => Err(mismatch(value, "f64")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch(value, "String"))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch(value, "Vec<u8>"))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
