//! COSEM object capability and interface class metadata
//!
//! Every interface class implements [`CosemObject`]. A class declares its
//! attributes and methods once in a [`ClassRegistry`]; the provided
//! `get_attribute`/`set_attribute`/`invoke_method` methods validate ids and
//! access rights against that registry and then hand over to the class's own
//! `read_attribute`/`write_attribute`/`execute_method`, which branch on the
//! known ids explicitly.
//!
//! # Concurrency
//!
//! Objects are shared as `Arc<dyn CosemObject>` and mutate through interior
//! locks, but a session layer is still expected to keep at most one request
//! in flight per device.

use async_trait::async_trait;
use dlms_core::{DataObject, DataType, DlmsError, DlmsResult, ObisCode};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute id of `logical_name`, present on every interface class
pub const ATTR_LOGICAL_NAME: u8 = 1;

/// Metadata of one attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub id: u8,
    pub name: &'static str,
    pub data_type: DataType,
    pub writable: bool,
}

/// Metadata of one method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub id: u8,
    pub name: &'static str,
}

/// Attribute and method table of one interface class
///
/// Built once and never modified; only attribute values change at runtime.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    class_id: u16,
    attributes: BTreeMap<u8, AttributeDescriptor>,
    methods: BTreeMap<u8, MethodDescriptor>,
}

impl ClassRegistry {
    /// Start a registry for `class_id`
    ///
    /// Attribute 1 (`logical_name`, octet-string, read-only) is registered
    /// up front.
    pub fn builder(class_id: u16) -> ClassRegistryBuilder {
        ClassRegistryBuilder {
            registry: ClassRegistry {
                class_id,
                attributes: BTreeMap::new(),
                methods: BTreeMap::new(),
            },
        }
        .attribute(ATTR_LOGICAL_NAME, "logical_name", DataType::OctetString, false)
    }

    pub fn class_id(&self) -> u16 {
        self.class_id
    }

    /// Look up an attribute
    ///
    /// # Errors
    /// [`DlmsError::UnknownAttribute`] if `attribute_id` is not registered
    pub fn attribute(&self, attribute_id: u8) -> DlmsResult<&AttributeDescriptor> {
        self.attributes
            .get(&attribute_id)
            .ok_or(DlmsError::UnknownAttribute {
                class_id: self.class_id,
                attribute_id,
            })
    }

    /// Look up an attribute that is about to be written
    ///
    /// # Errors
    /// [`DlmsError::UnknownAttribute`] if not registered,
    /// [`DlmsError::ReadOnlyAttribute`] if registered read-only
    pub fn writable_attribute(&self, attribute_id: u8) -> DlmsResult<&AttributeDescriptor> {
        let descriptor = self.attribute(attribute_id)?;
        if !descriptor.writable {
            return Err(DlmsError::ReadOnlyAttribute {
                class_id: self.class_id,
                attribute_id,
            });
        }
        Ok(descriptor)
    }

    /// Look up a method
    ///
    /// # Errors
    /// [`DlmsError::UnknownMethod`] if `method_id` is not registered
    pub fn method(&self, method_id: u8) -> DlmsResult<&MethodDescriptor> {
        self.methods.get(&method_id).ok_or(DlmsError::UnknownMethod {
            class_id: self.class_id,
            method_id,
        })
    }

    /// All attributes in id order
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.values()
    }

    /// All methods in id order
    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }
}

/// Builder for [`ClassRegistry`]
#[derive(Debug)]
pub struct ClassRegistryBuilder {
    registry: ClassRegistry,
}

impl ClassRegistryBuilder {
    pub fn attribute(
        mut self,
        id: u8,
        name: &'static str,
        data_type: DataType,
        writable: bool,
    ) -> Self {
        self.registry.attributes.insert(
            id,
            AttributeDescriptor {
                id,
                name,
                data_type,
                writable,
            },
        );
        self
    }

    pub fn method(mut self, id: u8, name: &'static str) -> Self {
        self.registry.methods.insert(id, MethodDescriptor { id, name });
        self
    }

    pub fn build(self) -> ClassRegistry {
        self.registry
    }
}

/// A COSEM object: one instance of an interface class
#[async_trait]
pub trait CosemObject: Send + Sync + fmt::Debug {
    /// Interface class id (e.g. 3 for Register, 9 for Script Table)
    fn class_id(&self) -> u16;

    /// Logical name (OBIS code) of this object
    fn logical_name(&self) -> ObisCode;

    /// Attribute and method table of this object's class
    fn registry(&self) -> &ClassRegistry;

    /// Class-specific read of a registered attribute
    async fn read_attribute(&self, attribute_id: u8) -> DlmsResult<DataObject>;

    /// Class-specific write of a registered, writable attribute
    async fn write_attribute(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()>;

    /// Class-specific execution of a registered method
    async fn execute_method(
        &self,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>>;

    /// GET: read an attribute
    ///
    /// # Errors
    /// [`DlmsError::UnknownAttribute`] for an unregistered id
    async fn get_attribute(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        self.registry().attribute(attribute_id)?;
        self.read_attribute(attribute_id).await
    }

    /// SET: write an attribute
    ///
    /// # Errors
    /// [`DlmsError::UnknownAttribute`] for an unregistered id,
    /// [`DlmsError::ReadOnlyAttribute`] for a read-only one, and a validation
    /// error if `value` has the wrong type for the attribute
    async fn set_attribute(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        self.registry().writable_attribute(attribute_id)?;
        self.write_attribute(attribute_id, value).await
    }

    /// ACTION: invoke a method
    ///
    /// # Errors
    /// [`DlmsError::UnknownMethod`] for an unregistered id
    async fn invoke_method(
        &self,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        self.registry().method(method_id)?;
        self.execute_method(method_id, parameters).await
    }
}

/// Encode a logical name as the value of attribute 1
pub(crate) fn logical_name_value(logical_name: &ObisCode) -> DataObject {
    DataObject::OctetString(logical_name.to_bytes().to_vec())
}
