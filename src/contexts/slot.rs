//! Set-once context cell.

use parking_lot::RwLock;

use crate::error::ContextError;

/// An optional context value that, once populated, is never cleared.
///
/// [`Slot::set`] refuses to overwrite an existing value; user-driven fields
/// go through [`Slot::replace`], which states the intent explicitly. Reads
/// clone the value out so no lock is held across an `.await`.
pub struct Slot<T> {
    field: &'static str,
    value: RwLock<Option<T>>,
}

impl<T: Clone> Slot<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            value: RwLock::new(None),
        }
    }

    /// Dotted field name, used in errors and logs.
    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn get(&self) -> Option<T> {
        self.value.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.value.read().is_some()
    }

    /// Like [`Slot::get`], but a missing value is an error.
    pub fn require(&self) -> Result<T, ContextError> {
        self.get().ok_or(ContextError::Missing { field: self.field })
    }

    /// Populate the slot. Fails if it already holds a value.
    pub fn set(&self, value: T) -> Result<(), ContextError> {
        let mut guard = self.value.write();
        if guard.is_some() {
            return Err(ContextError::AlreadySet { field: self.field });
        }
        *guard = Some(value);
        Ok(())
    }

    /// Overwrite the slot, returning the previous value.
    pub fn replace(&self, value: T) -> Option<T> {
        self.value.write().replace(value)
    }
}

impl<T> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("field", &self.field)
            .field("set", &self.value.read().is_some())
            .finish()
    }
}
