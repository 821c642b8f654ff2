//! Capture targets known to the session, keyed by registry global name.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

/// Stable identity of a capture target: the compositor's registry global name
/// for the output. Names can collide or be missing; ids cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub u32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A target as presented to a host UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub id: TargetId,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug)]
pub struct OutputEntry<O> {
    pub handle: O,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Owned collection of outputs. Dropping an entry drops its handle, which is
/// where protocol-side release happens.
#[derive(Debug)]
pub struct OutputRegistry<O> {
    entries: BTreeMap<TargetId, OutputEntry<O>>,
}

impl<O> Default for OutputRegistry<O> {
    fn default() -> Self {
        Self { entries: BTreeMap::new() }
    }
}

impl<O> OutputRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TargetId, handle: O) {
        debug!("Output {} announced", id);
        let entry = OutputEntry { handle, name: None, description: None };
        if self.entries.insert(id, entry).is_some() {
            warn!("Output {} announced twice, replacing", id);
        }
    }

    /// Forget an output. Returns `true` if it was known.
    pub fn remove(&mut self, id: TargetId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                info!("Output {} ({}) removed", id, entry.name.as_deref().unwrap_or("unnamed"));
                true
            }
            None => false,
        }
    }

    pub fn set_name(&mut self, id: TargetId, name: String) {
        if let Some(entry) = self.entries.get_mut(&id) {
            info!("Output {} is '{}'", id, name);
            entry.name = Some(name);
        }
    }

    /// Set the name only if none is known yet (xdg-output names win over
    /// `wl_output.name`).
    pub fn set_fallback_name(&mut self, id: TargetId, name: String) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.name.get_or_insert(name);
        }
    }

    pub fn set_description(&mut self, id: TargetId, description: String) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.description = Some(description);
        }
    }

    pub fn contains(&self, id: TargetId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: TargetId) -> Option<&OutputEntry<O>> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: TargetId) -> Option<&mut OutputEntry<O>> {
        self.entries.get_mut(&id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TargetId, &mut OutputEntry<O>)> {
        self.entries.iter_mut().map(|(id, e)| (*id, e))
    }

    pub fn list(&self) -> Vec<TargetInfo> {
        self.entries
            .iter()
            .map(|(id, e)| TargetInfo {
                id: *id,
                name: e.name.clone(),
                description: e.description.clone(),
            })
            .collect()
    }

    /// First output (lowest id) whose name equals `name`.
    pub fn resolve(&self, name: &str) -> Option<TargetId> {
        let mut matches = self
            .entries
            .iter()
            .filter(|(_, e)| e.name.as_deref() == Some(name))
            .map(|(id, _)| *id);
        let first = matches.next()?;
        if matches.next().is_some() {
            warn!("Several outputs are named '{}', using {}", name, first);
        }
        Some(first)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
