//! Typed scalars with a lazily derived second representation.
//!
//! A scalar starts life either as a host value (literals) or as a
//! single-element device column (reduction outputs). The other
//! representation is derived on first request and cached, so each scalar
//! pays at most one copy per direction. Dropping the last `Arc<Scalar>`
//! releases the device block immediately.

use gpu_memory_manager::DevicePool;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::column::{Column, ColumnRef};
use crate::error::{EngineError, Result};
use crate::types::LogicalType;
use crate::value::ScalarValue;

pub struct Scalar {
    data_type: LogicalType,
    host: OnceLock<ScalarValue>,
    device: OnceLock<ColumnRef>,
    /// Serializes materialization so concurrent readers never copy twice.
    materialize: Mutex<()>,
}

impl Scalar {
    pub fn new(data_type: LogicalType, value: ScalarValue) -> Result<Self> {
        if !value.conforms_to(&data_type) {
            return Err(EngineError::TypeMismatch(format!(
                "scalar {:?} is not a {}",
                value, data_type
            )));
        }
        let host = OnceLock::new();
        let _ = host.set(value);
        Ok(Self {
            data_type,
            host,
            device: OnceLock::new(),
            materialize: Mutex::new(()),
        })
    }

    pub fn null(data_type: LogicalType) -> Self {
        let host = OnceLock::new();
        let _ = host.set(ScalarValue::Null);
        Self {
            data_type,
            host,
            device: OnceLock::new(),
            materialize: Mutex::new(()),
        }
    }

    /// Adopt a single-element device column produced by a kernel.
    pub fn from_device(column: ColumnRef) -> Result<Self> {
        if column.len() != 1 {
            return Err(EngineError::InvalidArgument(format!(
                "scalar needs a one-row column, got {} rows",
                column.len()
            )));
        }
        let device = OnceLock::new();
        let data_type = column.data_type().clone();
        let _ = device.set(column);
        Ok(Self {
            data_type,
            host: OnceLock::new(),
            device,
            materialize: Mutex::new(()),
        })
    }

    pub fn data_type(&self) -> &LogicalType {
        &self.data_type
    }

    pub fn has_host_value(&self) -> bool {
        self.host.get().is_some()
    }

    pub fn has_device_value(&self) -> bool {
        self.device.get().is_some()
    }

    /// Host view, downloading once if the scalar was produced on device.
    pub fn value(&self) -> Result<&ScalarValue> {
        if let Some(v) = self.host.get() {
            return Ok(v);
        }
        let _guard = self.materialize.lock();
        if let Some(v) = self.host.get() {
            return Ok(v);
        }
        let device = self
            .device
            .get()
            .ok_or_else(|| EngineError::Internal("scalar has no representation".into()))?;
        let value = device.to_host()?.value(0)?;
        Ok(self.host.get_or_init(|| value))
    }

    pub fn is_null(&self) -> Result<bool> {
        Ok(self.value()?.is_null())
    }

    /// Device view, uploading once if the scalar was produced on host.
    pub fn to_device(&self, pool: &Arc<DevicePool>) -> Result<ColumnRef> {
        if let Some(c) = self.device.get() {
            return Ok(Arc::clone(c));
        }
        let _guard = self.materialize.lock();
        if let Some(c) = self.device.get() {
            return Ok(Arc::clone(c));
        }
        let host = self
            .host
            .get()
            .ok_or_else(|| EngineError::Internal("scalar has no representation".into()))?;
        let column = Arc::new(Column::from_scalars(
            self.data_type.clone(),
            std::slice::from_ref(host),
        )?)
        .to_device(pool)?;
        Ok(Arc::clone(self.device.get_or_init(|| column)))
    }

    /// Host column repeating this value `len` times.
    pub fn to_column(&self, len: usize) -> Result<Column> {
        let value = self.value()?;
        Column::from_scalars(self.data_type.clone(), &vec![value.clone(); len])
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scalar")
            .field("data_type", &self.data_type)
            .field("host", &self.host.get())
            .field("on_device", &self.has_device_value())
            .finish()
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Ok(v) => write!(f, "{}", v.render(&self.data_type)),
            Err(e) => write!(f, "<{}>", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_memory_manager::PoolConfig;

    fn pool() -> Arc<DevicePool> {
        DevicePool::simulated(PoolConfig {
            budget_bytes: 1 << 20,
            arena_bytes: 64 << 10,
            ..PoolConfig::default()
        })
    }

    #[test]
    fn host_scalar_uploads_once() {
        let pool = pool();
        let s = Scalar::new(LogicalType::Int64, ScalarValue::Int64(7)).unwrap();
        let a = s.to_device(&pool).unwrap();
        let b = s.to_device(&pool).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.stats().host_to_device_copies, 1);
        assert_eq!(s.value().unwrap(), &ScalarValue::Int64(7));
        assert_eq!(pool.stats().device_to_host_copies, 0);
    }

    #[test]
    fn device_scalar_downloads_once() {
        let pool = pool();
        let col = Column::from_kernel_output(
            &pool,
            LogicalType::Float64,
            None,
            &2.5f64.to_le_bytes(),
        )
        .unwrap();
        let s = Scalar::from_device(Arc::new(col)).unwrap();
        assert!(!s.has_host_value());
        assert_eq!(s.value().unwrap(), &ScalarValue::Float64(2.5));
        assert_eq!(s.value().unwrap(), &ScalarValue::Float64(2.5));
        assert_eq!(pool.stats().device_to_host_copies, 1);
        assert_eq!(pool.stats().host_to_device_copies, 0);
    }

    #[test]
    fn drop_releases_device_memory() {
        let pool = pool();
        let s = Arc::new(Scalar::new(LogicalType::Int32, ScalarValue::Int32(1)).unwrap());
        s.to_device(&pool).unwrap();
        assert!(pool.stats().in_use_bytes > 0);
        drop(s);
        assert_eq!(pool.stats().in_use_bytes, 0);
    }

    #[test]
    fn type_checked() {
        assert!(Scalar::new(LogicalType::Int32, ScalarValue::Utf8("x".into())).is_err());
        let n = Scalar::null(LogicalType::Utf8);
        assert!(n.is_null().unwrap());
        assert_eq!(n.to_column(3).unwrap().null_count(), 3);
        assert_eq!(n.to_string(), "null");
    }
}
