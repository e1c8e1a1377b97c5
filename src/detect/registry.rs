use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::Detector;

/// Builds a detector on demand. Backends that load models are only constructed
/// when selected.
pub type DetectorFactory = Box<dyn Fn() -> Result<Box<dyn Detector>> + Send>;

/// Registry of detector backends by name.
pub struct DetectorRegistry {
    factories: BTreeMap<String, DetectorFactory>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Register a backend factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn Detector>> + Send + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("detector backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the named backend.
    pub fn build(&self, name: &str) -> Result<Box<dyn Detector>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        factory()
    }

    /// Build the default backend.
    pub fn build_default(&self) -> Result<Box<dyn Detector>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backends registered"))?;
        self.build(name)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{MotionBackend, StubBackend};

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut registry = DetectorRegistry::new();
        registry.register("stub", || Ok(Box::new(StubBackend::new()) as Box<dyn Detector>));
        registry.register("motion", || Ok(Box::new(MotionBackend::default()) as Box<dyn Detector>));

        assert_eq!(registry.build_default()?.name(), "stub");
        registry.set_default("motion")?;
        assert_eq!(registry.build_default()?.name(), "motion");
        assert_eq!(registry.list(), vec!["motion", "stub"]);
        Ok(())
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut registry = DetectorRegistry::new();
        assert!(registry.build_default().is_err());
        assert!(registry.set_default("tract").is_err());
        registry.register("stub", || Ok(Box::new(StubBackend::new()) as Box<dyn Detector>));
        let err = registry.build("tract").err().expect("missing backend");
        assert!(err.to_string().contains("available: stub"));
    }
}
