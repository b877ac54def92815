//! Object directory: resolves `(class_id, logical_name)` to a live object
//!
//! Script execution and request dispatch both need to find the object a
//! reference points at. [`ObjectDirectory`] is that lookup;
//! [`ObjectRegistry`] is an in-memory implementation holding the object
//! model of one logical device.

use crate::object::CosemObject;
use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult, ObisCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lookup of live COSEM objects
#[async_trait]
pub trait ObjectDirectory: Send + Sync {
    /// Find the object with the given class id and logical name
    async fn resolve(&self, class_id: u16, logical_name: &ObisCode) -> Option<Arc<dyn CosemObject>>;

    /// Like [`ObjectDirectory::resolve`], but a missing object is an error
    ///
    /// # Errors
    /// [`DlmsError::ObjectNotFound`] if nothing is registered under the reference
    async fn require(&self, class_id: u16, logical_name: &ObisCode) -> DlmsResult<Arc<dyn CosemObject>> {
        self.resolve(class_id, logical_name)
            .await
            .ok_or(DlmsError::ObjectNotFound {
                class_id,
                logical_name: *logical_name,
            })
    }
}

/// In-memory object directory keyed by `(class_id, logical_name)`
#[derive(Default)]
pub struct ObjectRegistry {
    objects: RwLock<HashMap<(u16, ObisCode), Arc<dyn CosemObject>>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object
    ///
    /// # Errors
    /// Returns a validation error if an object with the same class id and
    /// logical name is already registered
    pub async fn register(&self, object: Arc<dyn CosemObject>) -> DlmsResult<()> {
        let key = (object.class_id(), object.logical_name());
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(DlmsError::validation(
                "logical_name",
                format!("object {} of class {} is already registered", key.1, key.0),
            ));
        }
        log::debug!("Registered class {} object {}", key.0, key.1);
        objects.insert(key, object);
        Ok(())
    }

    /// Remove an object, returning it if it was registered
    pub async fn unregister(
        &self,
        class_id: u16,
        logical_name: &ObisCode,
    ) -> Option<Arc<dyn CosemObject>> {
        self.objects.write().await.remove(&(class_id, *logical_name))
    }

    /// All objects whose logical name matches `pattern`, ordered by class id
    /// then logical name
    pub async fn find_matching(&self, pattern: &ObisCode) -> Vec<Arc<dyn CosemObject>> {
        let objects = self.objects.read().await;
        let mut found: Vec<_> = objects
            .iter()
            .filter(|((_, logical_name), _)| logical_name.matches(pattern))
            .collect();
        found.sort_by_key(|(key, _)| **key);
        found.into_iter().map(|(_, object)| object.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectDirectory for ObjectRegistry {
    async fn resolve(&self, class_id: u16, logical_name: &ObisCode) -> Option<Arc<dyn CosemObject>> {
        self.objects.read().await.get(&(class_id, *logical_name)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::Register;
    use crate::scaler_unit::{units, ScalerUnit};

    fn energy_register(obis: ObisCode) -> Arc<dyn CosemObject> {
        Arc::new(Register::new(obis, 0.0, ScalerUnit::new(0, units::WATT_HOUR), 0))
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = ObjectRegistry::new();
        let obis = ObisCode::new(1, 0, 1, 8, 0, 255);
        registry.register(energy_register(obis)).await.unwrap();

        let found = registry.resolve(Register::CLASS_ID, &obis).await.unwrap();
        assert_eq!(found.logical_name(), obis);

        // Same logical name, different class: not found
        assert!(registry.resolve(9, &obis).await.is_none());
        assert!(matches!(
            registry.require(9, &obis).await,
            Err(DlmsError::ObjectNotFound { class_id: 9, .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = ObjectRegistry::new();
        let obis = ObisCode::new(1, 0, 1, 8, 0, 255);
        registry.register(energy_register(obis)).await.unwrap();
        let err = registry.register(energy_register(obis)).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ObjectRegistry::new();
        let obis = ObisCode::new(1, 0, 1, 8, 0, 255);
        registry.register(energy_register(obis)).await.unwrap();
        assert!(registry.unregister(Register::CLASS_ID, &obis).await.is_some());
        assert!(registry.is_empty().await);
        assert!(registry.unregister(Register::CLASS_ID, &obis).await.is_none());
    }

    #[tokio::test]
    async fn test_find_matching_wildcards() {
        let registry = ObjectRegistry::new();
        for obis in [
            ObisCode::new(1, 0, 1, 8, 0, 255),
            ObisCode::new(1, 0, 1, 8, 1, 255),
            ObisCode::new(1, 0, 2, 8, 0, 255),
        ] {
            registry.register(energy_register(obis)).await.unwrap();
        }

        let pattern = ObisCode::new(1, 255, 1, 8, 255, 255);
        let found: Vec<ObisCode> = registry
            .find_matching(&pattern)
            .await
            .iter()
            .map(|o| o.logical_name())
            .collect();
        assert_eq!(
            found,
            vec![ObisCode::new(1, 0, 1, 8, 0, 255), ObisCode::new(1, 0, 1, 8, 1, 255)]
        );
    }
}
