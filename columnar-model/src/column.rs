//! Typed columnar storage.
//!
//! # Layout contract
//!
//! Fixed-width values are stored packed and little-endian:
//!
//! ```text
//! [  value[0]  |  value[1]  | ... |  value[n-1]  ]
//! ```
//!
//! Null slots hold zero bytes. Variable-width values use `n + 1` offsets into
//! a byte buffer; lists and maps use `n + 1` offsets into a child column;
//! structs hold one child per field, each with `n` rows. Only fixed-width
//! buffers are ever moved to device memory.

use gpu_memory_manager::{DeviceBuffer, DevicePool};
use rustc_hash::FxHasher;
use std::borrow::Cow;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::trace;

use crate::bitmap::Bitmap;
use crate::decimal;
use crate::error::{EngineError, Result};
use crate::types::LogicalType;
use crate::value::ScalarValue;

pub type ColumnRef = Arc<Column>;

/// Primitive element types with a fixed little-endian encoding.
pub trait NativeType: Copy + Send + Sync + 'static {
    const WIDTH: usize;

    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! native_le {
    ($t:ty) => {
        impl NativeType for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$t>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

native_le!(i32);
native_le!(i64);
native_le!(f64);
native_le!(i128);

impl NativeType for bool {
    const WIDTH: usize = 1;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }
}

pub fn decode_natives<T: NativeType>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::WIDTH).map(T::read_le).collect()
}

pub fn encode_natives<T: NativeType>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::WIDTH);
    for v in values {
        v.write_le(&mut out);
    }
    out
}

#[derive(Debug)]
pub enum FixedStorage {
    Host(Vec<u8>),
    Device(DeviceBuffer),
}

#[derive(Debug)]
pub enum ColumnData {
    Fixed(FixedStorage),
    /// Utf8 and Binary.
    Varlen { offsets: Vec<i32>, values: Vec<u8> },
    /// List and Map (child is the entry struct for maps).
    List { offsets: Vec<i32>, child: ColumnRef },
    Struct { children: Vec<ColumnRef> },
}

/// An immutable column. Shared through [`ColumnRef`]; never cloned, so a
/// device buffer always has exactly one owning column.
#[derive(Debug)]
pub struct Column {
    data_type: LogicalType,
    len: usize,
    /// `None` means every row is valid.
    validity: Option<Bitmap>,
    data: ColumnData,
}

fn out_of_range(i: usize, len: usize) -> EngineError {
    EngineError::InvalidArgument(format!("row {} out of range for column of {} rows", i, len))
}

fn check_offsets(offsets: &[i32], len: usize, target_len: usize) -> Result<()> {
    if offsets.len() != len + 1 {
        return Err(EngineError::InvalidArgument(format!(
            "expected {} offsets, got {}",
            len + 1,
            offsets.len()
        )));
    }
    if offsets[0] < 0
        || offsets.windows(2).any(|w| w[0] > w[1])
        || offsets[len] as usize > target_len
    {
        return Err(EngineError::InvalidArgument(
            "offsets are not monotonic or exceed the value buffer".into(),
        ));
    }
    Ok(())
}

fn to_offset(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| EngineError::InvalidArgument("offset exceeds i32 range".into()))
}

impl Column {
    /// Assemble a column from parts, validating every layout invariant.
    pub fn try_new(
        data_type: LogicalType,
        len: usize,
        validity: Option<Bitmap>,
        data: ColumnData,
    ) -> Result<Self> {
        if let Some(v) = &validity {
            if v.len() != len {
                return Err(EngineError::InvalidArgument(format!(
                    "validity covers {} rows, column has {}",
                    v.len(),
                    len
                )));
            }
        }
        match (&data_type, &data) {
            (t, ColumnData::Fixed(storage)) if t.is_fixed_width() => {
                let expected = len * t.byte_width().unwrap_or(0);
                let actual = match storage {
                    FixedStorage::Host(bytes) => bytes.len(),
                    FixedStorage::Device(buf) => buf.len(),
                };
                if actual != expected {
                    return Err(EngineError::InvalidArgument(format!(
                        "expected {} bytes for {} rows of {}, got {}",
                        expected, len, t, actual
                    )));
                }
            }
            (LogicalType::Utf8 | LogicalType::Binary, ColumnData::Varlen { offsets, values }) => {
                check_offsets(offsets, len, values.len())?;
            }
            (LogicalType::List(field), ColumnData::List { offsets, child }) => {
                check_offsets(offsets, len, child.len())?;
                if child.data_type != field.data_type {
                    return Err(EngineError::TypeMismatch(format!(
                        "list child is {}, declared {}",
                        child.data_type, field.data_type
                    )));
                }
            }
            (LogicalType::Map { key, value }, ColumnData::List { offsets, child }) => {
                check_offsets(offsets, len, child.len())?;
                if child.data_type != LogicalType::map_entries(key, value) {
                    return Err(EngineError::TypeMismatch(format!(
                        "map entries are {}",
                        child.data_type
                    )));
                }
            }
            (LogicalType::Struct(fields), ColumnData::Struct { children }) => {
                if fields.len() != children.len() {
                    return Err(EngineError::InvalidArgument(format!(
                        "struct has {} fields but {} children",
                        fields.len(),
                        children.len()
                    )));
                }
                for (f, c) in fields.iter().zip(children) {
                    if c.len != len || c.data_type != f.data_type {
                        return Err(EngineError::TypeMismatch(format!(
                            "struct child '{}' is {} with {} rows",
                            f.name, c.data_type, c.len
                        )));
                    }
                }
            }
            (t, _) => {
                return Err(EngineError::TypeMismatch(format!(
                    "storage layout does not match type {}",
                    t
                )))
            }
        }
        let validity = validity.filter(|v| !v.all_valid());
        Ok(Self {
            data_type,
            len,
            validity,
            data,
        })
    }

    /// Build a host column from boxed values. Nulls are respected.
    pub fn from_scalars(data_type: LogicalType, values: &[ScalarValue]) -> Result<Self> {
        if let LogicalType::Decimal { precision, scale } = &data_type {
            if let Some(v) = values
                .iter()
                .filter_map(ScalarValue::as_decimal)
                .find(|v| !decimal::fits_precision(*v, *precision))
            {
                return Err(EngineError::DecimalPrecisionOverflow(format!(
                    "{} does not fit decimal({}, {})",
                    decimal::format(v, *scale),
                    precision,
                    scale
                )));
            }
        }
        if let Some(bad) = values.iter().find(|v| !v.conforms_to(&data_type)) {
            return Err(EngineError::TypeMismatch(format!(
                "value {:?} cannot be stored as {}",
                bad, data_type
            )));
        }
        Self::build(data_type, values)
    }

    fn build(data_type: LogicalType, values: &[ScalarValue]) -> Result<Self> {
        let len = values.len();
        let validity = if values.iter().any(ScalarValue::is_null) {
            Some(Bitmap::from_bools(values.iter().map(|v| !v.is_null())))
        } else {
            None
        };
        let data = match &data_type {
            t if t.is_fixed_width() => {
                let width = t.byte_width().unwrap_or(0);
                let mut bytes = Vec::with_capacity(len * width);
                for v in values {
                    encode_fixed(v, width, &mut bytes);
                }
                ColumnData::Fixed(FixedStorage::Host(bytes))
            }
            LogicalType::Utf8 | LogicalType::Binary => {
                let mut offsets = Vec::with_capacity(len + 1);
                let mut bytes = Vec::new();
                offsets.push(0);
                for v in values {
                    match v {
                        ScalarValue::Utf8(s) => bytes.extend_from_slice(s.as_bytes()),
                        ScalarValue::Binary(b) => bytes.extend_from_slice(b),
                        _ => {}
                    }
                    offsets.push(to_offset(bytes.len())?);
                }
                ColumnData::Varlen {
                    offsets,
                    values: bytes,
                }
            }
            LogicalType::List(_) | LogicalType::Map { .. } => {
                let item_type = match &data_type {
                    LogicalType::List(field) => field.data_type.clone(),
                    LogicalType::Map { key, value } => LogicalType::map_entries(key, value),
                    _ => unreachable!("guarded by the outer match"),
                };
                let mut offsets = Vec::with_capacity(len + 1);
                let mut items = Vec::new();
                offsets.push(0);
                for v in values {
                    if let ScalarValue::List(xs) = v {
                        items.extend(xs.iter().cloned());
                    }
                    offsets.push(to_offset(items.len())?);
                }
                ColumnData::List {
                    offsets,
                    child: Arc::new(Self::build(item_type, &items)?),
                }
            }
            LogicalType::Struct(fields) => {
                let children = fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| {
                        let column: Vec<ScalarValue> = values
                            .iter()
                            .map(|v| match v {
                                ScalarValue::Struct(xs) => xs[i].clone(),
                                _ => ScalarValue::Null,
                            })
                            .collect();
                        Self::build(f.data_type.clone(), &column).map(Arc::new)
                    })
                    .collect::<Result<Vec<_>>>()?;
                ColumnData::Struct { children }
            }
            t => {
                return Err(EngineError::UnsupportedOperation(format!(
                    "cannot build column of {}",
                    t
                )))
            }
        };
        Self::try_new(data_type, len, validity, data)
    }

    pub fn new_null(data_type: LogicalType, len: usize) -> Result<Self> {
        Self::build(data_type, &vec![ScalarValue::Null; len])
    }

    /// Fixed-width host column from natives plus an optional validity mask.
    pub fn from_native_parts<T: NativeType>(
        data_type: LogicalType,
        values: &[T],
        validity: Option<Bitmap>,
    ) -> Result<Self> {
        if data_type.byte_width() != Some(T::WIDTH) {
            return Err(EngineError::TypeMismatch(format!(
                "{}-byte values cannot back {}",
                T::WIDTH,
                data_type
            )));
        }
        Self::try_new(
            data_type,
            values.len(),
            validity,
            ColumnData::Fixed(FixedStorage::Host(encode_natives(values))),
        )
    }

    fn from_options<T: NativeType + Default>(data_type: LogicalType, values: Vec<Option<T>>) -> Result<Self> {
        let validity = Bitmap::from_bools(values.iter().map(Option::is_some));
        let natives: Vec<T> = values.into_iter().map(Option::unwrap_or_default).collect();
        Self::from_native_parts(data_type, &natives, Some(validity))
    }

    pub fn boolean(values: Vec<Option<bool>>) -> Self {
        Self::infallible(Self::from_options(LogicalType::Boolean, values))
    }

    pub fn int32(values: Vec<Option<i32>>) -> Self {
        Self::infallible(Self::from_options(LogicalType::Int32, values))
    }

    pub fn int64(values: Vec<Option<i64>>) -> Self {
        Self::infallible(Self::from_options(LogicalType::Int64, values))
    }

    pub fn float64(values: Vec<Option<f64>>) -> Self {
        Self::infallible(Self::from_options(LogicalType::Float64, values))
    }

    pub fn date32(values: Vec<Option<i32>>) -> Self {
        Self::infallible(Self::from_options(LogicalType::Date32, values))
    }

    pub fn timestamp(values: Vec<Option<i64>>) -> Self {
        Self::infallible(Self::from_options(LogicalType::Timestamp, values))
    }

    pub fn decimal(precision: u8, scale: u8, values: Vec<Option<i128>>) -> Result<Self> {
        let data_type = LogicalType::decimal(precision, scale)?;
        let scalars: Vec<ScalarValue> = values
            .into_iter()
            .map(|v| v.map_or(ScalarValue::Null, ScalarValue::Decimal))
            .collect();
        Self::from_scalars(data_type, &scalars)
    }

    /// # Panics
    ///
    /// Panics if the values total more than `i32::MAX` bytes. Use
    /// [`Column::try_utf8`] for input of unbounded size.
    pub fn utf8(values: Vec<Option<&str>>) -> Self {
        Self::infallible(Self::try_utf8(values))
    }

    pub fn try_utf8(values: Vec<Option<&str>>) -> Result<Self> {
        let scalars: Vec<ScalarValue> = values.into_iter().map(ScalarValue::from).collect();
        Self::build(LogicalType::Utf8, &scalars)
    }

    /// # Panics
    ///
    /// Panics if the values total more than `i32::MAX` bytes. Use
    /// [`Column::try_binary`] for input of unbounded size.
    pub fn binary(values: Vec<Option<&[u8]>>) -> Self {
        Self::infallible(Self::try_binary(values))
    }

    pub fn try_binary(values: Vec<Option<&[u8]>>) -> Result<Self> {
        let scalars: Vec<ScalarValue> = values
            .into_iter()
            .map(|v| v.map_or(ScalarValue::Null, |b| ScalarValue::Binary(b.to_vec())))
            .collect();
        Self::build(LogicalType::Binary, &scalars)
    }

    /// Fixed-width constructors always succeed; variable-width ones fail
    /// only on offset overflow.
    fn infallible(result: Result<Self>) -> Self {
        match result {
            Ok(column) => column,
            Err(e) => panic!("column construction failed: {}", e),
        }
    }

    /// Wrap bytes produced by a device kernel. The data stays device-resident
    /// and no host transfer is counted.
    pub fn from_kernel_output(
        pool: &Arc<DevicePool>,
        data_type: LogicalType,
        validity: Option<Bitmap>,
        bytes: &[u8],
    ) -> Result<Self> {
        let width = data_type.byte_width().ok_or_else(|| {
            EngineError::UnsupportedOperation(format!("{} cannot live in device memory", data_type))
        })?;
        let len = bytes.len() / width;
        let buffer = DeviceBuffer::from_kernel(pool, bytes)?;
        Self::try_new(
            data_type,
            len,
            validity,
            ColumnData::Fixed(FixedStorage::Device(buffer)),
        )
    }

    /// Same layout, placed like `self`: device-resident outputs for
    /// device-resident inputs.
    pub fn fixed_like(
        &self,
        data_type: LogicalType,
        validity: Option<Bitmap>,
        bytes: Vec<u8>,
    ) -> Result<Self> {
        match self.device_pool() {
            Some(pool) => Self::from_kernel_output(&pool, data_type, validity, &bytes),
            None => {
                let width = data_type.byte_width().unwrap_or(1);
                Self::try_new(
                    data_type,
                    bytes.len() / width,
                    validity,
                    ColumnData::Fixed(FixedStorage::Host(bytes)),
                )
            }
        }
    }

    pub fn data_type(&self) -> &LogicalType {
        &self.data_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn validity(&self) -> Option<&Bitmap> {
        self.validity.as_ref()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn null_count(&self) -> usize {
        self.validity.as_ref().map_or(0, Bitmap::null_count)
    }

    pub fn is_valid(&self, i: usize) -> bool {
        i < self.len && self.validity.as_ref().map_or(true, |v| v.is_valid(i))
    }

    pub fn is_null(&self, i: usize) -> bool {
        !self.is_valid(i)
    }

    /// Children of nested columns (the entry struct for lists and maps).
    pub fn children(&self) -> Vec<ColumnRef> {
        match &self.data {
            ColumnData::List { child, .. } => vec![Arc::clone(child)],
            ColumnData::Struct { children } => children.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_device_resident(&self) -> bool {
        match &self.data {
            ColumnData::Fixed(FixedStorage::Device(buf)) => buf.is_resident(),
            _ => false,
        }
    }

    pub fn is_device_backed(&self) -> bool {
        matches!(&self.data, ColumnData::Fixed(FixedStorage::Device(_)))
    }

    pub fn device_buffer(&self) -> Option<&DeviceBuffer> {
        match &self.data {
            ColumnData::Fixed(FixedStorage::Device(buf)) => Some(buf),
            _ => None,
        }
    }

    fn device_pool(&self) -> Option<Arc<DevicePool>> {
        self.device_buffer().map(|b| Arc::clone(b.pool()))
    }

    /// Element `i`, in O(1) for flat types. Device-backed columns read only
    /// that element.
    pub fn value(&self, i: usize) -> Result<ScalarValue> {
        if i >= self.len {
            return Err(out_of_range(i, self.len));
        }
        if !self.is_valid(i) {
            return Ok(ScalarValue::Null);
        }
        match &self.data {
            ColumnData::Fixed(storage) => {
                let width = self.data_type.byte_width().unwrap_or(0);
                match storage {
                    FixedStorage::Host(bytes) => Ok(decode_fixed(
                        &self.data_type,
                        &bytes[i * width..(i + 1) * width],
                    )),
                    FixedStorage::Device(buf) => {
                        let mut raw = vec![0u8; width];
                        buf.read_range(i * width, &mut raw)?;
                        Ok(decode_fixed(&self.data_type, &raw))
                    }
                }
            }
            ColumnData::Varlen { offsets, values } => {
                let bytes = &values[offsets[i] as usize..offsets[i + 1] as usize];
                match self.data_type {
                    LogicalType::Utf8 => String::from_utf8(bytes.to_vec())
                        .map(ScalarValue::Utf8)
                        .map_err(|e| EngineError::Internal(format!("invalid utf8: {}", e))),
                    _ => Ok(ScalarValue::Binary(bytes.to_vec())),
                }
            }
            ColumnData::List { offsets, child } => {
                let items = (offsets[i] as usize..offsets[i + 1] as usize)
                    .map(|j| child.value(j))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ScalarValue::List(items))
            }
            ColumnData::Struct { children } => {
                let items = children
                    .iter()
                    .map(|c| c.value(i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ScalarValue::Struct(items))
            }
        }
    }

    /// All values as boxed scalars.
    pub fn values(&self) -> Result<Vec<ScalarValue>> {
        if let Some(width) = self.data_type.byte_width() {
            let bytes = self.fixed_bytes()?;
            return Ok((0..self.len)
                .map(|i| {
                    if self.is_valid(i) {
                        decode_fixed(&self.data_type, &bytes[i * width..(i + 1) * width])
                    } else {
                        ScalarValue::Null
                    }
                })
                .collect());
        }
        (0..self.len).map(|i| self.value(i)).collect()
    }

    /// Raw fixed-width bytes as seen by a kernel. Device-backed columns are
    /// read without counting a host transfer.
    pub fn fixed_bytes(&self) -> Result<Cow<'_, [u8]>> {
        match &self.data {
            ColumnData::Fixed(FixedStorage::Host(bytes)) => Ok(Cow::Borrowed(bytes)),
            ColumnData::Fixed(FixedStorage::Device(buf)) => Ok(Cow::Owned(buf.kernel_bytes()?)),
            _ => Err(EngineError::UnsupportedOperation(format!(
                "{} is not a fixed-width column",
                self.data_type
            ))),
        }
    }

    pub fn native_values<T: NativeType>(&self) -> Result<Vec<T>> {
        if self.data_type.byte_width() != Some(T::WIDTH) {
            return Err(EngineError::TypeMismatch(format!(
                "cannot read {} as {}-byte values",
                self.data_type,
                T::WIDTH
            )));
        }
        Ok(decode_natives(&self.fixed_bytes()?))
    }

    /// Host -> device copy of every fixed-width buffer. Counted as a transfer.
    pub fn to_device(self: &Arc<Self>, pool: &Arc<DevicePool>) -> Result<ColumnRef> {
        match &self.data {
            ColumnData::Fixed(FixedStorage::Device(_)) => Ok(Arc::clone(self)),
            ColumnData::Fixed(FixedStorage::Host(bytes)) => {
                trace!("Uploading {} column of {} rows", self.data_type, self.len);
                let buffer = DeviceBuffer::upload(pool, bytes)?;
                Ok(Arc::new(Column {
                    data_type: self.data_type.clone(),
                    len: self.len,
                    validity: self.validity.clone(),
                    data: ColumnData::Fixed(FixedStorage::Device(buffer)),
                }))
            }
            ColumnData::Varlen { .. } => Ok(Arc::clone(self)),
            ColumnData::List { offsets, child } => Ok(Arc::new(Column {
                data_type: self.data_type.clone(),
                len: self.len,
                validity: self.validity.clone(),
                data: ColumnData::List {
                    offsets: offsets.clone(),
                    child: child.to_device(pool)?,
                },
            })),
            ColumnData::Struct { children } => Ok(Arc::new(Column {
                data_type: self.data_type.clone(),
                len: self.len,
                validity: self.validity.clone(),
                data: ColumnData::Struct {
                    children: children
                        .iter()
                        .map(|c| c.to_device(pool))
                        .collect::<Result<Vec<_>>>()?,
                },
            })),
        }
    }

    /// Device -> host copy of every device buffer. Counted as a transfer.
    pub fn to_host(self: &Arc<Self>) -> Result<ColumnRef> {
        let data = match &self.data {
            ColumnData::Fixed(FixedStorage::Device(buf)) => {
                trace!("Downloading {} column of {} rows", self.data_type, self.len);
                ColumnData::Fixed(FixedStorage::Host(buf.download()?))
            }
            ColumnData::List { offsets, child } if child.has_device_data() => ColumnData::List {
                offsets: offsets.clone(),
                child: child.to_host()?,
            },
            ColumnData::Struct { children } if self.has_device_data() => ColumnData::Struct {
                children: children
                    .iter()
                    .map(|c| c.to_host())
                    .collect::<Result<Vec<_>>>()?,
            },
            _ => return Ok(Arc::clone(self)),
        };
        Ok(Arc::new(Column {
            data_type: self.data_type.clone(),
            len: self.len,
            validity: self.validity.clone(),
            data,
        }))
    }

    /// Whether any buffer of this column (or its children) is device-backed.
    pub fn has_device_data(&self) -> bool {
        match &self.data {
            ColumnData::Fixed(FixedStorage::Device(_)) => true,
            ColumnData::List { child, .. } => child.has_device_data(),
            ColumnData::Struct { children } => children.iter().any(|c| c.has_device_data()),
            _ => false,
        }
    }

    /// Approximate memory footprint in bytes.
    pub fn byte_size(&self) -> usize {
        let validity = self.validity.as_ref().map_or(0, |v| v.as_words().len() * 8);
        validity
            + match &self.data {
                ColumnData::Fixed(_) => self.len * self.data_type.byte_width().unwrap_or(0),
                ColumnData::Varlen { offsets, values } => offsets.len() * 4 + values.len(),
                ColumnData::List { offsets, child } => offsets.len() * 4 + child.byte_size(),
                ColumnData::Struct { children } => children.iter().map(|c| c.byte_size()).sum(),
            }
    }

    /// Rows `offset..offset + len`, keeping the residency of `self`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Column> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.len)
            .ok_or_else(|| out_of_range(offset.saturating_add(len), self.len))?;
        let validity = self.validity.as_ref().map(|v| v.slice(offset, len));
        match &self.data {
            ColumnData::Fixed(storage) => {
                let width = self.data_type.byte_width().unwrap_or(0);
                let bytes = match storage {
                    FixedStorage::Host(bytes) => bytes[offset * width..end * width].to_vec(),
                    FixedStorage::Device(buf) => {
                        let mut raw = vec![0u8; len * width];
                        buf.read_range(offset * width, &mut raw)?;
                        raw
                    }
                };
                self.fixed_like(self.data_type.clone(), validity, bytes)
            }
            ColumnData::Varlen { offsets, values } => {
                let base = offsets[offset];
                let new_offsets: Vec<i32> = offsets[offset..=end].iter().map(|o| o - base).collect();
                let bytes = values[base as usize..offsets[end] as usize].to_vec();
                Self::try_new(
                    self.data_type.clone(),
                    len,
                    validity,
                    ColumnData::Varlen {
                        offsets: new_offsets,
                        values: bytes,
                    },
                )
            }
            ColumnData::List { offsets, child } => {
                let base = offsets[offset];
                let new_offsets: Vec<i32> = offsets[offset..=end].iter().map(|o| o - base).collect();
                let child = child.slice(base as usize, (offsets[end] - base) as usize)?;
                Self::try_new(
                    self.data_type.clone(),
                    len,
                    validity,
                    ColumnData::List {
                        offsets: new_offsets,
                        child: Arc::new(child),
                    },
                )
            }
            ColumnData::Struct { children } => {
                let children = children
                    .iter()
                    .map(|c| c.slice(offset, len).map(Arc::new))
                    .collect::<Result<Vec<_>>>()?;
                Self::try_new(
                    self.data_type.clone(),
                    len,
                    validity,
                    ColumnData::Struct { children },
                )
            }
        }
    }

    /// Gather rows by index, keeping the residency of `self`.
    pub fn take(&self, indices: &[usize]) -> Result<Column> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len) {
            return Err(out_of_range(bad, self.len));
        }
        let validity = self
            .validity
            .as_ref()
            .map(|v| Bitmap::from_bools(indices.iter().map(|&i| v.is_valid(i))));
        if let Some(width) = self.data_type.byte_width() {
            let src = self.fixed_bytes()?;
            let mut bytes = Vec::with_capacity(indices.len() * width);
            for &i in indices {
                bytes.extend_from_slice(&src[i * width..(i + 1) * width]);
            }
            return self.fixed_like(self.data_type.clone(), validity, bytes);
        }
        let values = indices
            .iter()
            .map(|&i| self.value(i))
            .collect::<Result<Vec<_>>>()?;
        Self::build(self.data_type.clone(), &values)
    }

    /// Concatenate columns of one type. The result is placed like the first
    /// input.
    pub fn concat(columns: &[&Column]) -> Result<Column> {
        let first = columns.first().ok_or_else(|| {
            EngineError::InvalidArgument("concat needs at least one column".into())
        })?;
        if let Some(other) = columns.iter().find(|c| c.data_type != first.data_type) {
            return Err(EngineError::TypeMismatch(format!(
                "cannot concat {} with {}",
                first.data_type, other.data_type
            )));
        }
        let has_nulls = columns.iter().any(|c| c.validity.is_some());
        if first.data_type.is_fixed_width() {
            let mut bytes = Vec::new();
            let mut validity = Bitmap::new_null(0);
            for c in columns {
                bytes.extend_from_slice(&c.fixed_bytes()?);
                match &c.validity {
                    Some(v) => validity.extend_from(v),
                    None => validity.extend_from(&Bitmap::new_valid(c.len)),
                }
            }
            return first.fixed_like(
                first.data_type.clone(),
                has_nulls.then_some(validity),
                bytes,
            );
        }
        let mut values = Vec::with_capacity(columns.iter().map(|c| c.len).sum());
        for c in columns {
            values.extend(c.values()?);
        }
        Self::build(first.data_type.clone(), &values)
    }

    /// Exact equality: type, length, null pattern and bit-exact values.
    pub fn content_eq(&self, other: &Column) -> Result<bool> {
        if self.data_type != other.data_type || self.len != other.len {
            return Ok(false);
        }
        if (0..self.len).any(|i| self.is_valid(i) != other.is_valid(i)) {
            return Ok(false);
        }
        Ok(self.values()? == other.values()?)
    }

    /// Hash consistent with [`Column::content_eq`].
    pub fn content_hash(&self) -> Result<u64> {
        let mut hasher = FxHasher::default();
        self.data_type.hash(&mut hasher);
        self.len.hash(&mut hasher);
        for v in self.values()? {
            v.hash(&mut hasher);
        }
        Ok(hasher.finish())
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.content_eq(other).unwrap_or(false)
    }
}

fn encode_fixed(value: &ScalarValue, width: usize, out: &mut Vec<u8>) {
    match value {
        ScalarValue::Boolean(v) => v.write_le(out),
        ScalarValue::Int32(v) | ScalarValue::Date32(v) => v.write_le(out),
        ScalarValue::Int64(v) | ScalarValue::Timestamp(v) => v.write_le(out),
        ScalarValue::Float64(v) => v.write_le(out),
        ScalarValue::Decimal(v) => v.write_le(out),
        _ => out.extend(std::iter::repeat(0u8).take(width)),
    }
}

pub(crate) fn decode_fixed(data_type: &LogicalType, bytes: &[u8]) -> ScalarValue {
    match data_type {
        LogicalType::Boolean => ScalarValue::Boolean(bool::read_le(bytes)),
        LogicalType::Int32 => ScalarValue::Int32(i32::read_le(bytes)),
        LogicalType::Date32 => ScalarValue::Date32(i32::read_le(bytes)),
        LogicalType::Int64 => ScalarValue::Int64(i64::read_le(bytes)),
        LogicalType::Timestamp => ScalarValue::Timestamp(i64::read_le(bytes)),
        LogicalType::Float64 => ScalarValue::Float64(f64::read_le(bytes)),
        LogicalType::Decimal { .. } => ScalarValue::Decimal(i128::read_le(bytes)),
        _ => ScalarValue::Null,
    }
}
