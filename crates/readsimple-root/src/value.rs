//! Decoded leaf values.

use std::fmt;

use crate::tree::LeafType;

/// A single decoded leaf element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// `Float_t`
    F32(f32),
    /// `Double_t`
    F64(f64),
    /// `Char_t`
    I8(i8),
    /// `UChar_t`
    U8(u8),
    /// `Short_t`
    I16(i16),
    /// `UShort_t`
    U16(u16),
    /// `Int_t`
    I32(i32),
    /// `UInt_t`
    U32(u32),
    /// `Long64_t`
    I64(i64),
    /// `ULong64_t`
    U64(u64),
    /// `Bool_t`
    Bool(bool),
}

impl Value {
    /// Decode one big-endian element of `leaf_type` from the start of `b`.
    ///
    /// `b` must hold at least `leaf_type.byte_size()` bytes.
    pub fn decode(b: &[u8], leaf_type: LeafType) -> Value {
        fn arr<const N: usize>(b: &[u8]) -> [u8; N] {
            let mut out = [0u8; N];
            out.copy_from_slice(&b[..N]);
            out
        }
        match leaf_type {
            LeafType::F32 => Value::F32(f32::from_be_bytes(arr(b))),
            LeafType::F64 => Value::F64(f64::from_be_bytes(arr(b))),
            LeafType::I8 => Value::I8(b[0] as i8),
            LeafType::U8 => Value::U8(b[0]),
            LeafType::I16 => Value::I16(i16::from_be_bytes(arr(b))),
            LeafType::U16 => Value::U16(u16::from_be_bytes(arr(b))),
            LeafType::I32 => Value::I32(i32::from_be_bytes(arr(b))),
            LeafType::U32 => Value::U32(u32::from_be_bytes(arr(b))),
            LeafType::I64 => Value::I64(i64::from_be_bytes(arr(b))),
            LeafType::U64 => Value::U64(u64::from_be_bytes(arr(b))),
            LeafType::Bool => Value::Bool(b[0] != 0),
        }
    }

    /// The leaf type this value was decoded as.
    pub fn leaf_type(&self) -> LeafType {
        match self {
            Value::F32(_) => LeafType::F32,
            Value::F64(_) => LeafType::F64,
            Value::I8(_) => LeafType::I8,
            Value::U8(_) => LeafType::U8,
            Value::I16(_) => LeafType::I16,
            Value::U16(_) => LeafType::U16,
            Value::I32(_) => LeafType::I32,
            Value::U32(_) => LeafType::U32,
            Value::I64(_) => LeafType::I64,
            Value::U64(_) => LeafType::U64,
            Value::Bool(_) => LeafType::Bool,
        }
    }

    /// Numeric value widened to `f64` (booleans map to 0/1).
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
            Value::I8(v) => v as f64,
            Value::U8(v) => v as f64,
            Value::I16(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::U64(v) => v as f64,
            Value::Bool(v) => v as u8 as f64,
        }
    }

    /// Integer value widened to `i64`, `None` for floats and out-of-range `u64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v as i64),
            Value::U8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U64(v) => i64::try_from(v).ok(),
            Value::Bool(v) => Some(v as i64),
            Value::F32(_) | Value::F64(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Rust types a bound scanner column can be read into.
///
/// Conversion is exact: an `f32` can only be read from a `TLeafF` column.
pub trait FromValue: Sized {
    /// The leaf type this Rust type corresponds to.
    const LEAF_TYPE: LeafType;

    /// Extract `Self` if `v` has exactly the matching type.
    fn from_value(v: &Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const LEAF_TYPE: LeafType = LeafType::$variant;

                fn from_value(v: &Value) -> Option<Self> {
                    match *v {
                        Value::$variant(x) => Some(x),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_value! {
    f32 => F32,
    f64 => F64,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    bool => Bool,
}
