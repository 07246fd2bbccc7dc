//! Preset table: named transformation rules applied to every source image.

use std::{collections::BTreeMap, sync::Arc};

use super::error::DomainError;

/// A named transformation rule. The rule is opaque to this crate and is
/// handed verbatim to the transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    name: String,
    rule: String,
}

impl Preset {
    pub fn new(name: impl Into<String>, rule: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        let rule = rule.into();

        if name.trim().is_empty() {
            return Err(DomainError::validation("preset name must not be empty"));
        }
        if name.contains('/') || name == "." || name == ".." {
            return Err(DomainError::validation(format!(
                "preset name `{name}` must be a single path segment"
            )));
        }
        if rule.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "preset `{name}` has an empty rule"
            )));
        }

        Ok(Self { name, rule })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }
}

/// Immutable, cheaply clonable set of presets, ordered by name.
#[derive(Debug, Clone)]
pub struct PresetTable {
    presets: Arc<[Preset]>,
}

impl PresetTable {
    pub fn new(entries: BTreeMap<String, String>) -> Result<Self, DomainError> {
        if entries.is_empty() {
            return Err(DomainError::validation("at least one preset is required"));
        }

        let presets = entries
            .into_iter()
            .map(|(name, rule)| Preset::new(name, rule))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            presets: presets.into(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets
            .binary_search_by(|preset| preset.name().cmp(name))
            .ok()
            .map(|index| &self.presets[index])
    }

    pub fn resolve(&self, name: &str) -> Result<&Preset, DomainError> {
        self.get(name).ok_or_else(|| DomainError::unknown_preset(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.iter().map(Preset::name)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
