//! Data types used in DLMS/COSEM protocol

pub mod data_object;

pub use data_object::{DataObject, DataType};
