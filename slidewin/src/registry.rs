//! Window name registry.
//!
//! Window names must be unique among live windows. Names are registered when a
//! window is constructed and released when it is dropped. The registry is an
//! injectable service: windows use [`WindowNameRegistry::global`] unless their
//! configuration supplies another instance, which lets tests run isolated.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{LifecycleError, Result};

/// A set of window names currently in use.
#[derive(Debug, Default)]
pub struct WindowNameRegistry {
    names: Mutex<HashSet<String>>,
}

impl WindowNameRegistry {
    /// Creates an empty, isolated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<WindowNameRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Registers `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NameAlreadyRegistered`] if the name is in use.
    pub fn register(&self, name: &str) -> Result<()> {
        let mut names = self.names.lock();
        if !names.insert(name.to_string()) {
            return Err(LifecycleError::NameAlreadyRegistered {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Releases `name`. Returns `true` if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.names.lock().remove(name)
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    /// Returns a sorted snapshot of registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.lock().iter().cloned().collect();
        names.sort();
        names
    }
}

/// Holds a name registration and releases it on drop.
#[derive(Debug)]
pub(crate) struct NameRegistration {
    registry: Arc<WindowNameRegistry>,
    name: String,
}

impl NameRegistration {
    pub(crate) fn acquire(registry: Arc<WindowNameRegistry>, name: &str) -> Result<Self> {
        registry.register(name)?;
        Ok(Self {
            registry,
            name: name.to_string(),
        })
    }
}

impl Drop for NameRegistration {
    fn drop(&mut self) {
        self.registry.unregister(&self.name);
    }
}
