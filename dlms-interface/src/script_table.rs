//! Script Table interface class (Class ID: 9)
//!
//! The Script Table interface class stores scripts that can be executed
//! on the meter. Each script is an ordered list of actions; an action
//! either writes an attribute of another object or invokes one of its
//! methods.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code), read-only
//! - Attribute 2: scripts, read-write array of script structures
//!
//! # Methods
//!
//! - Method 1: execute_script(script_id) - run a script by id
//!
//! # Wire form of attribute 2
//!
//! ```text
//! array of structure {
//!     script_identifier: long-unsigned,
//!     actions: array of structure {
//!         service_id: enum (1 = write attribute, 2 = execute method),
//!         class_id: long-unsigned,
//!         logical_name: octet-string,
//!         index: unsigned,
//!         parameter: data
//!     }
//! }
//! ```
//!
//! Targets are resolved through an [`ObjectDirectory`] when a script runs.
//! The table only keeps a weak handle to the directory, so registering a
//! table inside the directory it resolves through does not leak.

use crate::directory::ObjectDirectory;
use crate::object::{logical_name_value, ClassRegistry, CosemObject, ATTR_LOGICAL_NAME};
use async_trait::async_trait;
use dlms_core::{DataObject, DataType, DlmsError, DlmsResult, ObisCode};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

/// Deepest chain of scripts that may run inside one another
pub const MAX_NESTED_SCRIPTS: usize = 8;

tokio::task_local! {
    /// Scripts currently running on this task, outermost first
    static ACTIVE_SCRIPTS: Vec<(ObisCode, u16)>;
}

static SCRIPT_TABLE_CLASS: Lazy<ClassRegistry> = Lazy::new(|| {
    ClassRegistry::builder(ScriptTable::CLASS_ID)
        .attribute(ScriptTable::ATTR_SCRIPTS, "scripts", DataType::Array, true)
        .method(ScriptTable::METHOD_EXECUTE, "execute_script")
        .build()
});

/// Kind of operation performed by a [`ScriptAction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScriptActionType {
    /// Write an attribute
    Write = 1,
    /// Invoke a method
    Execute = 2,
}

impl TryFrom<u8> for ScriptActionType {
    type Error = DlmsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ScriptActionType::Write),
            2 => Ok(ScriptActionType::Execute),
            other => Err(DlmsError::validation(
                "action.service_id",
                format!("unknown action type {}", other),
            )),
        }
    }
}

/// Reference to a COSEM object by class id and logical name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectReference {
    pub class_id: u16,
    pub logical_name: ObisCode,
}

impl ObjectReference {
    pub fn new(class_id: u16, logical_name: ObisCode) -> Self {
        Self {
            class_id,
            logical_name,
        }
    }
}

/// One step of a script
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptAction {
    pub action_type: ScriptActionType,
    pub target: ObjectReference,
    /// Attribute to write; required for [`ScriptActionType::Write`]
    pub attribute_id: Option<u8>,
    /// Method to invoke; required for [`ScriptActionType::Execute`]
    pub method_id: Option<u8>,
    /// Value passed to the target. When absent, the parameters given to
    /// the script execution are used instead.
    pub parameter: Option<DataObject>,
}

impl ScriptAction {
    /// Action writing `attribute_id` of `target`
    pub fn write(target: ObjectReference, attribute_id: u8, parameter: Option<DataObject>) -> Self {
        Self {
            action_type: ScriptActionType::Write,
            target,
            attribute_id: Some(attribute_id),
            method_id: None,
            parameter,
        }
    }

    /// Action invoking `method_id` of `target`
    pub fn execute(target: ObjectReference, method_id: u8, parameter: Option<DataObject>) -> Self {
        Self {
            action_type: ScriptActionType::Execute,
            target,
            attribute_id: None,
            method_id: Some(method_id),
            parameter,
        }
    }

    fn validate(&self, script_id: u16, index: usize) -> DlmsResult<()> {
        let field = |name: &str| format!("scripts[{}].actions[{}].{}", script_id, index, name);

        if self.target.class_id == 0 {
            return Err(DlmsError::validation(field("class_id"), "class id is missing"));
        }
        match self.action_type {
            ScriptActionType::Write => {
                if self.attribute_id.is_none() {
                    return Err(DlmsError::validation(
                        field("attribute_id"),
                        "write action requires an attribute id",
                    ));
                }
                if self.method_id.is_some() {
                    return Err(DlmsError::validation(
                        field("method_id"),
                        "write action cannot carry a method id",
                    ));
                }
            }
            ScriptActionType::Execute => {
                if self.attribute_id.is_some() {
                    return Err(DlmsError::validation(
                        field("attribute_id"),
                        "execute action cannot carry an attribute id",
                    ));
                }
                if self.method_id.is_none() {
                    return Err(DlmsError::validation(
                        field("method_id"),
                        "execute action requires a method id",
                    ));
                }
            }
        }
        Ok(())
    }

    fn to_data_object(&self) -> DataObject {
        let index = match self.action_type {
            ScriptActionType::Write => self.attribute_id,
            ScriptActionType::Execute => self.method_id,
        }
        .unwrap_or(0);

        DataObject::Structure(vec![
            DataObject::Enumerate(self.action_type as u8),
            DataObject::Unsigned16(self.target.class_id),
            logical_name_value(&self.target.logical_name),
            DataObject::Unsigned8(index),
            self.parameter.clone().unwrap_or(DataObject::Null),
        ])
    }

    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        let elements = obj.as_structure()?;
        let [service_id, class_id, logical_name, index, parameter] = elements else {
            return Err(DlmsError::validation(
                "action",
                format!("structure must have 5 elements, got {}", elements.len()),
            ));
        };

        let action_type = match service_id {
            DataObject::Enumerate(v) | DataObject::Unsigned8(v) => ScriptActionType::try_from(*v)?,
            other => {
                return Err(DlmsError::validation(
                    "action.service_id",
                    format!("expected Enumerate, got {:?}", other.data_type()),
                ));
            }
        };
        let class_id = u16::try_from(class_id.as_i64()?).map_err(|_| {
            DlmsError::validation("action.class_id", "class id is outside 0..=65535")
        })?;
        let logical_name = ObisCode::from_bytes(logical_name.as_octet_string()?)?;
        let index = u8::try_from(index.as_i64()?)
            .map_err(|_| DlmsError::validation("action.index", "index is outside 0..=255"))?;
        let parameter = (!parameter.is_null()).then(|| parameter.clone());

        let target = ObjectReference::new(class_id, logical_name);
        Ok(match action_type {
            ScriptActionType::Write => ScriptAction::write(target, index, parameter),
            ScriptActionType::Execute => ScriptAction::execute(target, index, parameter),
        })
    }
}

/// A stored script
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub id: u16,
    pub actions: Vec<ScriptAction>,
}

impl Script {
    pub fn new(id: u16, actions: Vec<ScriptAction>) -> Self {
        Self { id, actions }
    }

    /// Check the script on its own, without regard to other scripts in a table
    ///
    /// # Errors
    /// Returns a validation error for id 0, an empty action list, or a
    /// malformed action
    pub fn validate(&self) -> DlmsResult<()> {
        if self.id == 0 {
            return Err(DlmsError::validation("script.id", "script id 0 is reserved"));
        }
        if self.actions.is_empty() {
            return Err(DlmsError::validation(
                format!("scripts[{}].actions", self.id),
                "script must contain at least one action",
            ));
        }
        self.actions
            .iter()
            .enumerate()
            .try_for_each(|(index, action)| action.validate(self.id, index))
    }

    pub fn to_data_object(&self) -> DataObject {
        DataObject::Structure(vec![
            DataObject::Unsigned16(self.id),
            DataObject::Array(self.actions.iter().map(ScriptAction::to_data_object).collect()),
        ])
    }

    pub fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        let elements = obj.as_structure()?;
        let [id, actions] = elements else {
            return Err(DlmsError::validation(
                "script",
                format!("structure must have 2 elements, got {}", elements.len()),
            ));
        };
        let id = u16::try_from(id.as_i64()?)
            .map_err(|_| DlmsError::validation("script.id", "script id is outside 0..=65535"))?;
        let actions = actions
            .as_array()?
            .iter()
            .map(ScriptAction::from_data_object)
            .collect::<DlmsResult<Vec<_>>>()?;
        Ok(Self::new(id, actions))
    }
}

/// Outcome of a successful script run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptExecution {
    pub script_id: u16,
    pub actions_executed: usize,
}

/// Script Table interface class (Class ID: 9)
#[derive(Debug)]
pub struct ScriptTable {
    logical_name: ObisCode,
    scripts: RwLock<BTreeMap<u16, Script>>,
    directory: Weak<dyn ObjectDirectory>,
}

impl ScriptTable {
    pub const CLASS_ID: u16 = 9;

    /// Conventional logical name of the global meter reset script table
    pub const DEFAULT_LOGICAL_NAME: ObisCode = ObisCode::new(0, 0, 10, 0, 0, 255);

    pub const ATTR_SCRIPTS: u8 = 2;

    pub const METHOD_EXECUTE: u8 = 1;

    /// Create an empty Script Table
    ///
    /// # Arguments
    /// * `logical_name` - OBIS code identifying this object
    /// * `directory` - Where action targets are looked up at execution time
    pub fn new<D>(logical_name: ObisCode, directory: &Arc<D>) -> Self
    where
        D: ObjectDirectory + 'static,
    {
        let directory: Weak<D> = Arc::downgrade(directory);
        Self {
            logical_name,
            scripts: RwLock::new(BTreeMap::new()),
            directory: directory as Weak<dyn ObjectDirectory>,
        }
    }

    /// Add a new script
    ///
    /// # Errors
    /// Returns a validation error if the id is already taken or the script
    /// is malformed (see [`Script::validate`])
    pub async fn add_script(&self, script: Script) -> DlmsResult<()> {
        script.validate()?;
        let mut scripts = self.scripts.write().await;
        if scripts.contains_key(&script.id) {
            return Err(DlmsError::validation(
                "script.id",
                format!("script {} already exists", script.id),
            ));
        }
        scripts.insert(script.id, script);
        Ok(())
    }

    /// Replace an existing script with the same id
    ///
    /// # Errors
    /// Protocol error if no script has that id, validation error if the
    /// replacement is malformed
    pub async fn update_script(&self, script: Script) -> DlmsResult<()> {
        script.validate()?;
        let mut scripts = self.scripts.write().await;
        let slot = scripts.get_mut(&script.id).ok_or_else(|| missing(script.id))?;
        *slot = script;
        Ok(())
    }

    /// Remove a script, returning it
    ///
    /// # Errors
    /// Protocol error if no script has that id
    pub async fn remove_script(&self, script_id: u16) -> DlmsResult<Script> {
        self.scripts
            .write()
            .await
            .remove(&script_id)
            .ok_or_else(|| missing(script_id))
    }

    /// Get a copy of a script
    ///
    /// # Errors
    /// Protocol error if no script has that id
    pub async fn get_script(&self, script_id: u16) -> DlmsResult<Script> {
        self.scripts
            .read()
            .await
            .get(&script_id)
            .cloned()
            .ok_or_else(|| missing(script_id))
    }

    /// All scripts in id order
    pub async fn scripts(&self) -> Vec<Script> {
        self.scripts.read().await.values().cloned().collect()
    }

    pub async fn script_count(&self) -> usize {
        self.scripts.read().await.len()
    }

    /// Run a script's actions in order
    ///
    /// Each target is resolved through the object directory. The first
    /// failure stops the run; actions already performed are not undone.
    /// A script may run scripts of other tables (or other scripts of this
    /// one), but never one that is already running further up the chain,
    /// and chains are cut off at [`MAX_NESTED_SCRIPTS`].
    ///
    /// # Errors
    /// - Protocol error if the script does not exist, the directory has
    ///   been dropped, the script is already running, or the nesting limit
    ///   is reached
    /// - [`DlmsError::ObjectNotFound`] if an action's target is not registered
    /// - Whatever the target returns for the write or method call
    pub async fn execute_script(
        &self,
        script_id: u16,
        parameters: Option<DataObject>,
    ) -> DlmsResult<ScriptExecution> {
        let mut active = ACTIVE_SCRIPTS
            .try_with(|active| active.clone())
            .unwrap_or_default();
        let key = (self.logical_name, script_id);
        if active.contains(&key) {
            return Err(DlmsError::Protocol(format!(
                "script {} of {} re-entered while running",
                script_id, self.logical_name
            )));
        }
        if active.len() >= MAX_NESTED_SCRIPTS {
            return Err(DlmsError::Protocol(format!(
                "script {} of {} exceeds the nesting limit of {}",
                script_id, self.logical_name, MAX_NESTED_SCRIPTS
            )));
        }
        active.push(key);

        ACTIVE_SCRIPTS
            .scope(active, self.run_script(script_id, parameters))
            .await
    }

    async fn run_script(
        &self,
        script_id: u16,
        parameters: Option<DataObject>,
    ) -> DlmsResult<ScriptExecution> {
        // Snapshot so the lock is not held while targets run; a target may
        // be this table.
        let script = self.get_script(script_id).await?;
        let directory = self.directory.upgrade().ok_or_else(|| {
            DlmsError::Protocol("object directory is no longer available".to_string())
        })?;

        for (index, action) in script.actions.iter().enumerate() {
            let target = directory
                .require(action.target.class_id, &action.target.logical_name)
                .await?;
            let parameter = action.parameter.clone().or_else(|| parameters.clone());

            match action.action_type {
                ScriptActionType::Write => {
                    let attribute_id = action.attribute_id.unwrap_or_default();
                    log::debug!(
                        "Script {} action {}: write class {} {} attribute {}",
                        script_id,
                        index,
                        action.target.class_id,
                        action.target.logical_name,
                        attribute_id
                    );
                    target
                        .set_attribute(attribute_id, parameter.unwrap_or(DataObject::Null))
                        .await?;
                }
                ScriptActionType::Execute => {
                    let method_id = action.method_id.unwrap_or_default();
                    log::debug!(
                        "Script {} action {}: execute class {} {} method {}",
                        script_id,
                        index,
                        action.target.class_id,
                        action.target.logical_name,
                        method_id
                    );
                    target.invoke_method(method_id, parameter).await?;
                }
            }
        }

        Ok(ScriptExecution {
            script_id,
            actions_executed: script.actions.len(),
        })
    }

    async fn replace_scripts(&self, value: &DataObject) -> DlmsResult<()> {
        let mut replacement = BTreeMap::new();
        for entry in value.as_array()? {
            let script = Script::from_data_object(entry)?;
            script.validate()?;
            if replacement.contains_key(&script.id) {
                return Err(DlmsError::validation(
                    "script.id",
                    format!("script {} appears more than once", script.id),
                ));
            }
            replacement.insert(script.id, script);
        }
        *self.scripts.write().await = replacement;
        Ok(())
    }
}

fn missing(script_id: u16) -> DlmsError {
    DlmsError::Protocol(format!("script {} does not exist", script_id))
}

/// Script id carried by an execute_script invocation: either the bare id or
/// `structure { id, parameters }`
fn parse_execute_parameters(
    parameters: Option<DataObject>,
) -> DlmsResult<(u16, Option<DataObject>)> {
    let parameters = parameters.ok_or_else(|| {
        DlmsError::validation("script_id", "execute_script requires a script id")
    })?;
    let (id, rest) = match parameters {
        DataObject::Structure(mut elements) if elements.len() == 2 => {
            let rest = elements.pop();
            let id = elements.pop().unwrap_or(DataObject::Null);
            (id, rest.filter(|p| !p.is_null()))
        }
        other => (other, None),
    };
    let id = u16::try_from(id.as_i64()?)
        .map_err(|_| DlmsError::validation("script_id", "script id is outside 0..=65535"))?;
    Ok((id, rest))
}

#[async_trait]
impl CosemObject for ScriptTable {
    fn class_id(&self) -> u16 {
        Self::CLASS_ID
    }

    fn logical_name(&self) -> ObisCode {
        self.logical_name
    }

    fn registry(&self) -> &ClassRegistry {
        &SCRIPT_TABLE_CLASS
    }

    async fn read_attribute(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        match attribute_id {
            ATTR_LOGICAL_NAME => Ok(logical_name_value(&self.logical_name)),
            Self::ATTR_SCRIPTS => {
                let scripts = self.scripts.read().await;
                Ok(DataObject::Array(
                    scripts.values().map(Script::to_data_object).collect(),
                ))
            }
            _ => Err(DlmsError::UnknownAttribute {
                class_id: Self::CLASS_ID,
                attribute_id,
            }),
        }
    }

    async fn write_attribute(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_SCRIPTS => self.replace_scripts(&value).await,
            _ => Err(DlmsError::ReadOnlyAttribute {
                class_id: Self::CLASS_ID,
                attribute_id,
            }),
        }
    }

    async fn execute_method(
        &self,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        match method_id {
            Self::METHOD_EXECUTE => {
                let (script_id, parameters) = parse_execute_parameters(parameters)?;
                self.execute_script(script_id, parameters).await?;
                Ok(None)
            }
            _ => Err(DlmsError::UnknownMethod {
                class_id: Self::CLASS_ID,
                method_id,
            }),
        }
    }
}
