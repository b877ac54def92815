//! Register interface class (Class ID: 3)
//!
//! The Register interface class represents a single measured value with
//! scaling factor and unit information.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code), read-only
//! - Attribute 2: value, read-write, any numeric type
//! - Attribute 3: scaler_unit, read-only `structure { integer, enum }`
//! - Attribute 4: status, read-write, unsigned (0-255)
//!
//! # Methods
//!
//! - Method 1: reset - sets value and status to 0
//!
//! # Usage
//!
//! ```rust
//! use dlms_interface::{Register, ScalerUnit, units};
//! use dlms_core::ObisCode;
//!
//! # tokio_test_block(async {
//! // Active energy import, raw value in 0.01 Wh
//! let obis = ObisCode::new(1, 0, 1, 8, 0, 255);
//! let register = Register::new(obis, 100.0, ScalerUnit::new(-2, units::WATT_HOUR), 0);
//! assert_eq!(register.scaled_value().await, 1.0);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use crate::object::{logical_name_value, ClassRegistry, CosemObject, ATTR_LOGICAL_NAME};
use crate::scaler_unit::ScalerUnit;
use async_trait::async_trait;
use dlms_core::{DataObject, DataType, DlmsError, DlmsResult, ObisCode};
use once_cell::sync::Lazy;
use tokio::sync::RwLock;

static REGISTER_CLASS: Lazy<ClassRegistry> = Lazy::new(|| {
    ClassRegistry::builder(Register::CLASS_ID)
        .attribute(Register::ATTR_VALUE, "value", DataType::Float64, true)
        .attribute(Register::ATTR_SCALER_UNIT, "scaler_unit", DataType::Structure, false)
        .attribute(Register::ATTR_STATUS, "status", DataType::Unsigned, true)
        .method(Register::METHOD_RESET, "reset")
        .build()
});

#[derive(Debug, Clone, Copy)]
struct RegisterState {
    value: f64,
    status: u8,
}

/// Register interface class (Class ID: 3)
#[derive(Debug)]
pub struct Register {
    logical_name: ObisCode,
    scaler_unit: ScalerUnit,
    state: RwLock<RegisterState>,
}

impl Register {
    pub const CLASS_ID: u16 = 3;

    pub const ATTR_VALUE: u8 = 2;
    pub const ATTR_SCALER_UNIT: u8 = 3;
    pub const ATTR_STATUS: u8 = 4;

    pub const METHOD_RESET: u8 = 1;

    /// Create a new Register object
    ///
    /// # Arguments
    /// * `logical_name` - OBIS code identifying this object
    /// * `value` - Initial raw (unscaled) value
    /// * `scaler_unit` - Fixed scaler and unit of the value
    /// * `status` - Initial status
    pub fn new(logical_name: ObisCode, value: f64, scaler_unit: ScalerUnit, status: u8) -> Self {
        Self {
            logical_name,
            scaler_unit,
            state: RwLock::new(RegisterState { value, status }),
        }
    }

    /// Get the raw value
    pub async fn value(&self) -> f64 {
        self.state.read().await.value
    }

    /// Set the raw value
    ///
    /// # Errors
    /// Returns a validation error for NaN or infinite values
    pub async fn set_value(&self, value: f64) -> DlmsResult<()> {
        if !value.is_finite() {
            return Err(DlmsError::validation(
                "value",
                format!("{} is not a finite number", value),
            ));
        }
        self.state.write().await.value = value;
        Ok(())
    }

    pub async fn status(&self) -> u8 {
        self.state.read().await.status
    }

    /// Set the status
    ///
    /// # Errors
    /// Returns a validation error if `status` is outside `0..=255`
    pub async fn set_status(&self, status: i64) -> DlmsResult<()> {
        let status = u8::try_from(status).map_err(|_| {
            DlmsError::validation("status", format!("{} is outside 0..=255", status))
        })?;
        self.state.write().await.status = status;
        Ok(())
    }

    pub fn scaler_unit(&self) -> ScalerUnit {
        self.scaler_unit
    }

    /// Get the value with the scaler applied (`value * 10^scaler`)
    pub async fn scaled_value(&self) -> f64 {
        self.scaler_unit.scale_value(self.value().await)
    }

    /// Method 1: set value and status to 0
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.value = 0.0;
        state.status = 0;
    }
}

#[async_trait]
impl CosemObject for Register {
    fn class_id(&self) -> u16 {
        Self::CLASS_ID
    }

    fn logical_name(&self) -> ObisCode {
        self.logical_name
    }

    fn registry(&self) -> &ClassRegistry {
        &REGISTER_CLASS
    }

    async fn read_attribute(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        match attribute_id {
            ATTR_LOGICAL_NAME => Ok(logical_name_value(&self.logical_name)),
            Self::ATTR_VALUE => Ok(DataObject::Float64(self.value().await)),
            Self::ATTR_SCALER_UNIT => Ok(self.scaler_unit.to_data_object()),
            Self::ATTR_STATUS => Ok(DataObject::Unsigned8(self.status().await)),
            _ => Err(DlmsError::UnknownAttribute {
                class_id: Self::CLASS_ID,
                attribute_id,
            }),
        }
    }

    async fn write_attribute(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_VALUE => self.set_value(value.as_f64()?).await,
            Self::ATTR_STATUS => self.set_status(value.as_i64()?).await,
            _ => Err(DlmsError::ReadOnlyAttribute {
                class_id: Self::CLASS_ID,
                attribute_id,
            }),
        }
    }

    async fn execute_method(
        &self,
        method_id: u8,
        _parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        match method_id {
            Self::METHOD_RESET => {
                self.reset().await;
                Ok(None)
            }
            _ => Err(DlmsError::UnknownMethod {
                class_id: Self::CLASS_ID,
                method_id,
            }),
        }
    }
}
