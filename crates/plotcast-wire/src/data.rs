//! Data frame serialization.
//!
//! Each data object becomes a `(metadata, data)` frame pair. Numeric
//! arrays write `{"kind":"array","dtype":..,"shape":[..]}` followed by the
//! raw contiguous buffer in little-endian byte order, so a round trip is
//! bit-exact on every platform. Anything else writes `{"kind":"opaque"}`
//! followed by a JSON blob.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

const KIND_ARRAY: &str = "array";
const KIND_OPAQUE: &str = "opaque";

/// Element type of an [`NdArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Unsigned 64-bit integer.
    Uint64,
    /// IEEE 754 single precision.
    Float32,
    /// IEEE 754 double precision.
    Float64,
    /// One byte per element, zero is false.
    Bool,
}

impl DType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Bool => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }

    /// The name used in metadata frames.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
        }
    }
}

impl core::fmt::Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A Rust scalar that can live in an [`NdArray`].
pub trait Element: Copy {
    /// The dtype this element maps to.
    const DTYPE: DType;

    /// Append the little-endian encoding of `self`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one element from exactly `DTYPE.size()` bytes.
    fn read_le(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$ty>::from_le_bytes)
                }
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read_le(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b] => Some(*b != 0),
            _ => None,
        }
    }
}

/// A dense, row-major, little-endian numeric array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl NdArray {
    /// Wrap a raw little-endian buffer, checking it matches `dtype` and `shape`.
    pub fn new(dtype: DType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self, WireError> {
        let data = data.into();
        let expected = byte_len(dtype, &shape)?;
        if data.len() != expected {
            return Err(WireError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Build an array from typed values laid out in row-major order.
    pub fn from_slice<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self, WireError> {
        let mut data = Vec::with_capacity(values.len().saturating_mul(T::DTYPE.size()));
        for value in values {
            value.write_le(&mut data);
        }
        Self::new(T::DTYPE, shape, data)
    }

    /// The element type.
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    /// The dimensions, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The raw little-endian buffer.
    pub const fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len().checked_div(self.dtype.size()).unwrap_or(0)
    }

    /// Whether the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the buffer as `T`, which must match the array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, WireError> {
        if T::DTYPE != self.dtype {
            return Err(WireError::DTypeMismatch {
                actual: self.dtype,
                requested: T::DTYPE,
            });
        }
        self.data
            .chunks_exact(self.dtype.size())
            .map(|chunk| {
                T::read_le(chunk).ok_or(WireError::LengthMismatch {
                    expected: self.dtype.size(),
                    actual: chunk.len(),
                })
            })
            .collect()
    }
}

fn byte_len(dtype: DType, shape: &[usize]) -> Result<usize, WireError> {
    shape
        .iter()
        .try_fold(dtype.size(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| WireError::ShapeOverflow(shape.to_vec()))
}

/// One item carried in the data frames of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum DataObject {
    /// A numeric array sent as a raw buffer.
    Array(NdArray),
    /// Any other value, sent as a generic serialized blob.
    Opaque(serde_json::Value),
}

impl From<NdArray> for DataObject {
    fn from(array: NdArray) -> Self {
        Self::Array(array)
    }
}

impl From<serde_json::Value> for DataObject {
    fn from(value: serde_json::Value) -> Self {
        Self::Opaque(value)
    }
}

#[derive(Serialize)]
struct ArrayMetaOut<'a> {
    kind: &'static str,
    dtype: DType,
    shape: &'a [usize],
}

#[derive(Serialize)]
struct OpaqueMetaOut {
    kind: &'static str,
}

#[derive(Deserialize)]
struct MetaIn {
    kind: String,
    #[serde(default)]
    dtype: Option<DType>,
    #[serde(default)]
    shape: Option<Vec<usize>>,
}

/// Serialize data objects into a flat `(metadata, data)` frame sequence.
pub fn serialize_data(objects: &[DataObject]) -> Result<Vec<Bytes>, WireError> {
    let mut frames = Vec::with_capacity(objects.len().saturating_mul(2));
    for object in objects {
        match object {
            DataObject::Array(array) => {
                let meta = ArrayMetaOut {
                    kind: KIND_ARRAY,
                    dtype: array.dtype,
                    shape: &array.shape,
                };
                frames.push(Bytes::from(serde_json::to_vec(&meta)?));
                frames.push(array.data.clone());
            }
            DataObject::Opaque(value) => {
                let meta = OpaqueMetaOut { kind: KIND_OPAQUE };
                frames.push(Bytes::from(serde_json::to_vec(&meta)?));
                frames.push(Bytes::from(serde_json::to_vec(value)?));
            }
        }
    }
    Ok(frames)
}

/// Inverse of [`serialize_data`]. Dispatches on each metadata frame's `kind`.
pub fn deserialize_data(frames: &[Bytes]) -> Result<Vec<DataObject>, WireError> {
    let pairs = frames.chunks_exact(2);
    if !pairs.remainder().is_empty() {
        return Err(WireError::DanglingMetadata(frames.len().saturating_sub(1)));
    }
    pairs
        .map(|pair| match pair {
            [meta, data] => decode_one(meta, data),
            _ => Err(WireError::DanglingMetadata(0)),
        })
        .collect()
}

fn decode_one(meta: &Bytes, data: &Bytes) -> Result<DataObject, WireError> {
    let meta: MetaIn = serde_json::from_slice(meta)?;
    match meta.kind.as_str() {
        KIND_ARRAY => {
            let dtype = meta.dtype.ok_or(WireError::MissingField("dtype"))?;
            let shape = meta.shape.ok_or(WireError::MissingField("shape"))?;
            Ok(DataObject::Array(NdArray::new(dtype, shape, data.clone())?))
        }
        KIND_OPAQUE => Ok(DataObject::Opaque(serde_json::from_slice(data)?)),
        _ => Err(WireError::UnknownKind(meta.kind)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn array_metadata_names_kind_dtype_shape() {
        let array = NdArray::from_slice(vec![2], &[1_i32, 2]).unwrap();
        let frames = serialize_data(&[array.into()]).unwrap();
        assert_eq!(frames.len(), 2);
        let meta: serde_json::Value = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(meta, serde_json::json!({"kind": "array", "dtype": "int32", "shape": [2]}));
        assert_eq!(frames[1].as_ref(), &[1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn buffer_is_little_endian_regardless_of_host() {
        let array = NdArray::from_slice(vec![1], &[1.0_f64]).unwrap();
        assert_eq!(array.as_bytes().as_ref(), &1.0_f64.to_le_bytes());
    }

    #[test]
    fn opaque_values_round_trip() {
        let value = serde_json::json!({"columns": ["x", "y"], "n": 3});
        let frames = serialize_data(&[value.clone().into()]).unwrap();
        let meta: serde_json::Value = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(meta, serde_json::json!({"kind": "opaque"}));
        let decoded = deserialize_data(&frames).unwrap();
        assert_eq!(decoded, vec![DataObject::Opaque(value)]);
    }

    #[test]
    fn unknown_kind_is_a_hard_error() {
        let frames = vec![
            Bytes::from_static(br#"{"kind":"pickle"}"#),
            Bytes::from_static(b"\x80\x04"),
        ];
        let err = deserialize_data(&frames).unwrap_err();
        assert!(matches!(err, WireError::UnknownKind(kind) if kind == "pickle"));
    }

    #[test]
    fn odd_frame_count_is_dangling_metadata() {
        let frames = vec![Bytes::from_static(br#"{"kind":"opaque"}"#)];
        assert!(matches!(
            deserialize_data(&frames),
            Err(WireError::DanglingMetadata(0))
        ));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = NdArray::new(DType::Float64, vec![2, 2], vec![0_u8; 24]).unwrap_err();
        assert!(matches!(
            err,
            WireError::LengthMismatch {
                expected: 32,
                actual: 24
            }
        ));
    }

    #[test]
    fn array_metadata_without_dtype_is_rejected() {
        let frames = vec![
            Bytes::from_static(br#"{"kind":"array","shape":[1]}"#),
            Bytes::from_static(&[0]),
        ];
        assert!(matches!(
            deserialize_data(&frames),
            Err(WireError::MissingField("dtype"))
        ));
    }

    #[test]
    fn typed_view_checks_dtype() {
        let array = NdArray::from_slice(vec![3], &[1_u16, 2, 3]).unwrap();
        assert_eq!(array.to_vec::<u16>().unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            array.to_vec::<i16>(),
            Err(WireError::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn bool_arrays_use_one_byte_per_element() {
        let array = NdArray::from_slice(vec![3], &[true, false, true]).unwrap();
        assert_eq!(array.as_bytes().as_ref(), &[1, 0, 1]);
        assert_eq!(array.to_vec::<bool>().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn zero_dimension_array_is_empty() {
        let array = NdArray::from_slice::<f32>(vec![0, 5], &[]).unwrap();
        assert!(array.is_empty());
        assert_eq!(array.len(), 0);
    }
}
