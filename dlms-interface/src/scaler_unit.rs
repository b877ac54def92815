//! Scaler Unit for Register interface class
//!
//! Scaler Unit is used in Register and its derived interface classes
//! to represent the scaling factor and unit of measurement for register values.
//!
//! # Structure
//!
//! Scaler Unit consists of:
//! - **scaler**: i8 (-128 to 127) - Scaling factor (10^scaler)
//! - **unit**: u8 - Unit code (e.g., 0x1B = W, 0x1E = Wh)
//!
//! On the wire it is `structure { integer scaler, enum unit }`.
//!
//! # Usage
//!
//! ```rust
//! use dlms_interface::{ScalerUnit, units};
//!
//! // Energy in kWh: raw value 12345 with scaler 3
//! let scaler_unit = ScalerUnit::new(3, units::WATT_HOUR);
//! assert_eq!(scaler_unit.scale_value(12345.0), 12_345_000.0);
//! ```

use dlms_core::{DataObject, DlmsError, DlmsResult};

/// Scaler Unit structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScalerUnit {
    /// Power-of-ten exponent applied to the raw value
    pub scaler: i8,
    /// Unit code (0x00 = no unit, 0x1B = W, 0x1E = Wh, etc.)
    pub unit: u8,
}

impl ScalerUnit {
    pub fn new(scaler: i8, unit: u8) -> Self {
        Self { scaler, unit }
    }

    /// No scaling and no unit
    pub fn none() -> Self {
        Self::default()
    }

    pub fn scaler(&self) -> i8 {
        self.scaler
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    /// Apply scaling: `value * 10^scaler`
    ///
    /// Negative scalers divide by the positive power so that e.g. `100` with
    /// scaler `-2` is exactly `1.0`.
    pub fn scale_value(&self, value: f64) -> f64 {
        let exponent = self.scaler as i32;
        if exponent >= 0 {
            value * 10_f64.powi(exponent)
        } else {
            value / 10_f64.powi(-exponent)
        }
    }

    /// Reverse scaling: `scaled_value / 10^scaler`
    pub fn unscale_value(&self, scaled_value: f64) -> f64 {
        let exponent = self.scaler as i32;
        if exponent >= 0 {
            scaled_value / 10_f64.powi(exponent)
        } else {
            scaled_value * 10_f64.powi(-exponent)
        }
    }

    /// Convert to DataObject (Structure)
    pub fn to_data_object(&self) -> DataObject {
        DataObject::Structure(vec![
            DataObject::Integer8(self.scaler),
            DataObject::Enumerate(self.unit),
        ])
    }

    /// Create from DataObject (Structure)
    ///
    /// The unit is accepted as either an enum or an unsigned value.
    pub fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        let elements = obj.as_structure()?;
        let [scaler, unit] = elements else {
            return Err(DlmsError::validation(
                "scaler_unit",
                format!("structure must have 2 elements, got {}", elements.len()),
            ));
        };

        let scaler = match scaler {
            DataObject::Integer8(v) => *v,
            other => {
                return Err(DlmsError::validation(
                    "scaler_unit.scaler",
                    format!("expected Integer, got {:?}", other.data_type()),
                ));
            }
        };
        let unit = match unit {
            DataObject::Enumerate(v) | DataObject::Unsigned8(v) => *v,
            other => {
                return Err(DlmsError::validation(
                    "scaler_unit.unit",
                    format!("expected Enumerate, got {:?}", other.data_type()),
                ));
            }
        };

        Ok(Self::new(scaler, unit))
    }
}

/// Common unit codes (from DLMS Green Book)
pub mod units {
    pub const NO_UNIT: u8 = 0x00;
    /// Watt (W)
    pub const WATT: u8 = 0x1B;
    /// Watt-hour (Wh)
    pub const WATT_HOUR: u8 = 0x1E;
    /// Volt (V)
    pub const VOLT: u8 = 0x23;
    /// Ampere (A)
    pub const AMPERE: u8 = 0x21;
    /// Hertz (Hz)
    pub const HERTZ: u8 = 0x2C;
    /// Degree Celsius (°C)
    pub const CELSIUS: u8 = 0x09;
}
