//! Label table shared by the assemblers.

use std::collections::HashMap;

use crate::errors::{AsmError, AsmErrorKind};

/// Label names mapped to absolute addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    addresses: HashMap<String, u32>,
}

impl SymbolTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines `name` at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::DuplicateLabel`] if `name` is already defined.
    pub fn define(&mut self, name: &str, address: u32) -> Result<(), AsmError> {
        if self.addresses.contains_key(name) {
            return Err(AsmErrorKind::DuplicateLabel {
                name: name.to_string(),
            }
            .into());
        }
        self.addresses.insert(name.to_string(), address);
        Ok(())
    }

    /// Looks up `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::UndefinedLabel`] if `name` was never defined.
    pub fn resolve(&self, name: &str) -> Result<u32, AsmError> {
        self.get(name).ok_or_else(|| {
            AsmErrorKind::UndefinedLabel {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Address of `name`, if defined.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u32> {
        self.addresses.get(name).copied()
    }

    /// Number of defined labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Returns `true` when no label is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Iterates over `(name, address)` pairs sorted by address, then name.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&str, u32)> {
        let mut entries: Vec<_> = self
            .addresses
            .iter()
            .map(|(name, address)| (name.as_str(), *address))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)));
        entries
    }
}
