//! COSEM interface classes module for DLMS/COSEM protocol
//!
//! This crate provides the COSEM object model: the [`CosemObject`]
//! capability with its per-class attribute/method tables, an in-memory
//! [`ObjectRegistry`] used to resolve object references, and the
//! interface classes implemented so far.
//!
//! # Interface classes
//!
//! - Register (Class ID: 3)
//! - Script Table (Class ID: 9)

pub mod directory;
pub mod object;
pub mod register;
pub mod scaler_unit;
pub mod script_table;

pub use directory::{ObjectDirectory, ObjectRegistry};
pub use object::{
    AttributeDescriptor, ClassRegistry, ClassRegistryBuilder, CosemObject, MethodDescriptor,
    ATTR_LOGICAL_NAME,
};
pub use register::Register;
pub use scaler_unit::{units, ScalerUnit};
pub use script_table::{
    ObjectReference, Script, ScriptAction, ScriptActionType, ScriptExecution, ScriptTable,
    MAX_NESTED_SCRIPTS,
};
