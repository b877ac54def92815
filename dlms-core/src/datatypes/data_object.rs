//! Data object types for DLMS/COSEM protocol

use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container holding an attribute value, a method parameter or a method result
///
/// Stores the subset of DLMS data types handled by the object model: numbers,
/// byte strings and nested arrays/structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataObject {
    /// Null data
    Null,
    Boolean(bool),
    Integer8(i8),
    Integer16(i16),
    Integer32(i32),
    Integer64(i64),
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    Float32(f32),
    Float64(f64),
    /// Enumeration (8-bit)
    Enumerate(u8),
    OctetString(Vec<u8>),
    VisibleString(Vec<u8>),
    /// Array of DataObjects
    Array(Vec<DataObject>),
    /// Structure (ordered list of DataObjects)
    Structure(Vec<DataObject>),
}

/// DLMS data type tag
///
/// The discriminant is the tag used on the wire by A-XDR. Used as attribute
/// metadata in interface class registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    NullData = 0,
    Array = 1,
    Structure = 2,
    Boolean = 3,
    /// Integer 32-bit
    DoubleLong = 5,
    /// Unsigned integer 32-bit
    DoubleLongUnsigned = 6,
    OctetString = 9,
    VisibleString = 10,
    /// Integer 8-bit
    Integer = 15,
    /// Integer 16-bit
    Long = 16,
    /// Unsigned integer 8-bit
    Unsigned = 17,
    /// Unsigned integer 16-bit
    LongUnsigned = 18,
    Long64 = 20,
    Long64Unsigned = 21,
    Enumerate = 22,
    Float32 = 23,
    Float64 = 24,
}

impl DataType {
    /// Check if this type is a number type
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            DataType::DoubleLong
                | DataType::DoubleLongUnsigned
                | DataType::Integer
                | DataType::Long
                | DataType::Unsigned
                | DataType::LongUnsigned
                | DataType::Long64
                | DataType::Long64Unsigned
                | DataType::Enumerate
                | DataType::Float32
                | DataType::Float64
        )
    }

    /// Wire tag of this type
    pub fn tag(&self) -> u8 {
        *self as u8
    }
}

impl DataObject {
    /// Get the type of this DataObject
    pub fn data_type(&self) -> DataType {
        match self {
            DataObject::Null => DataType::NullData,
            DataObject::Boolean(_) => DataType::Boolean,
            DataObject::Integer8(_) => DataType::Integer,
            DataObject::Integer16(_) => DataType::Long,
            DataObject::Integer32(_) => DataType::DoubleLong,
            DataObject::Integer64(_) => DataType::Long64,
            DataObject::Unsigned8(_) => DataType::Unsigned,
            DataObject::Unsigned16(_) => DataType::LongUnsigned,
            DataObject::Unsigned32(_) => DataType::DoubleLongUnsigned,
            DataObject::Unsigned64(_) => DataType::Long64Unsigned,
            DataObject::Float32(_) => DataType::Float32,
            DataObject::Float64(_) => DataType::Float64,
            DataObject::Enumerate(_) => DataType::Enumerate,
            DataObject::OctetString(_) => DataType::OctetString,
            DataObject::VisibleString(_) => DataType::VisibleString,
            DataObject::Array(_) => DataType::Array,
            DataObject::Structure(_) => DataType::Structure,
        }
    }

    /// Check if this DataObject is a number
    pub fn is_number(&self) -> bool {
        self.data_type().is_number()
    }

    /// Check if this DataObject is null
    pub fn is_null(&self) -> bool {
        matches!(self, DataObject::Null)
    }

    /// Get any numeric value as `f64`
    pub fn as_f64(&self) -> DlmsResult<f64> {
        Ok(match self {
            DataObject::Integer8(v) => *v as f64,
            DataObject::Integer16(v) => *v as f64,
            DataObject::Integer32(v) => *v as f64,
            DataObject::Integer64(v) => *v as f64,
            DataObject::Unsigned8(v) => *v as f64,
            DataObject::Unsigned16(v) => *v as f64,
            DataObject::Unsigned32(v) => *v as f64,
            DataObject::Unsigned64(v) => *v as f64,
            DataObject::Enumerate(v) => *v as f64,
            DataObject::Float32(v) => *v as f64,
            DataObject::Float64(v) => *v,
            other => return Err(Self::type_mismatch("number", other)),
        })
    }

    /// Get any integer value as `i64`
    ///
    /// Floats are rejected even when they hold an integral value.
    pub fn as_i64(&self) -> DlmsResult<i64> {
        match self {
            DataObject::Integer8(v) => Ok(*v as i64),
            DataObject::Integer16(v) => Ok(*v as i64),
            DataObject::Integer32(v) => Ok(*v as i64),
            DataObject::Integer64(v) => Ok(*v),
            DataObject::Unsigned8(v) => Ok(*v as i64),
            DataObject::Unsigned16(v) => Ok(*v as i64),
            DataObject::Unsigned32(v) => Ok(*v as i64),
            DataObject::Unsigned64(v) => i64::try_from(*v)
                .map_err(|_| DlmsError::validation("value", format!("{} does not fit in i64", v))),
            DataObject::Enumerate(v) => Ok(*v as i64),
            other => Err(Self::type_mismatch("integer", other)),
        }
    }

    /// Get the value as an octet string
    pub fn as_octet_string(&self) -> DlmsResult<&[u8]> {
        match self {
            DataObject::OctetString(s) => Ok(s),
            other => Err(Self::type_mismatch("octet-string", other)),
        }
    }

    /// Get the value as an array
    pub fn as_array(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Array(a) => Ok(a),
            other => Err(Self::type_mismatch("array", other)),
        }
    }

    /// Get the value as a structure
    pub fn as_structure(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Structure(s) => Ok(s),
            other => Err(Self::type_mismatch("structure", other)),
        }
    }

    fn type_mismatch(expected: &str, got: &DataObject) -> DlmsError {
        DlmsError::validation(
            "value",
            format!("expected {}, got {:?}", expected, got.data_type()),
        )
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataObject::Null => write!(f, "NULL_DATA"),
            DataObject::Boolean(b) => write!(f, "BOOLEAN: {}", b),
            DataObject::Integer8(i) => write!(f, "INTEGER: {}", i),
            DataObject::Integer16(i) => write!(f, "LONG_INTEGER: {}", i),
            DataObject::Integer32(i) => write!(f, "DOUBLE_LONG: {}", i),
            DataObject::Integer64(i) => write!(f, "LONG64: {}", i),
            DataObject::Unsigned8(u) => write!(f, "UNSIGNED: {}", u),
            DataObject::Unsigned16(u) => write!(f, "LONG_UNSIGNED: {}", u),
            DataObject::Unsigned32(u) => write!(f, "DOUBLE_LONG_UNSIGNED: {}", u),
            DataObject::Unsigned64(u) => write!(f, "LONG64_UNSIGNED: {}", u),
            DataObject::Float32(fl) => write!(f, "FLOAT32: {}", fl),
            DataObject::Float64(fl) => write!(f, "FLOAT64: {}", fl),
            DataObject::Enumerate(e) => write!(f, "ENUMERATE: {}", e),
            DataObject::OctetString(s) => {
                write!(f, "OCTET_STRING: ")?;
                for byte in s {
                    write!(f, "{:02X} ", byte)?;
                }
                Ok(())
            }
            DataObject::VisibleString(s) => {
                write!(f, "VISIBLE_STRING: {}", String::from_utf8_lossy(s))
            }
            DataObject::Array(arr) => {
                write!(f, "ARRAY: {} element(s)", arr.len())?;
                for (i, elem) in arr.iter().enumerate() {
                    write!(f, "\n  [{}]: {}", i, elem)?;
                }
                Ok(())
            }
            DataObject::Structure(s) => {
                write!(f, "STRUCTURE: {} element(s)", s.len())?;
                for (i, elem) in s.iter().enumerate() {
                    write!(f, "\n  [{}]: {}", i, elem)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_object_null() {
        let obj = DataObject::Null;
        assert!(obj.is_null());
        assert_eq!(obj.data_type(), DataType::NullData);
        assert_eq!(obj.data_type().tag(), 0);
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(DataObject::Unsigned16(1500).as_f64().unwrap(), 1500.0);
        assert_eq!(DataObject::Integer8(-3).as_i64().unwrap(), -3);
        assert_eq!(DataObject::Float32(0.5).as_f64().unwrap(), 0.5);
        assert!(DataObject::Float64(1.0).as_i64().is_err());
        assert!(DataObject::Unsigned64(u64::MAX).as_i64().is_err());
    }

    #[test]
    fn test_type_mismatch_is_validation() {
        let err = DataObject::OctetString(vec![1, 2]).as_f64().unwrap_err();
        assert!(err.is_validation());
        assert!(DataObject::Boolean(true).as_structure().is_err());
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(DataObject::Float64(1.0).data_type().tag(), 24);
        assert_eq!(DataObject::Unsigned8(1).data_type().tag(), 17);
        assert_eq!(DataObject::Structure(vec![]).data_type().tag(), 2);
        assert!(DataType::Enumerate.is_number());
        assert!(!DataType::OctetString.is_number());
    }
}
