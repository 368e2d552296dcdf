//! Compiled-in extension entry points and their registry.
//!
//! Extension code is linked into the host as discrete units; each one exposes
//! an `ExtensionEntry` registered under the extension's name. The loader
//! looks entries up by descriptor name, so no runtime reflection is needed.

use crate::extension::descriptor::{is_valid_extension_name, ExtensionDescriptor};
use crate::extension::panel::{Panel, PanelFactory};
use crate::fault::ExtensionResult;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Handler for one named action an extension contributes to the host.
pub type ActionHandler = Arc<dyn Fn() -> ExtensionResult + Send + Sync>;

/// Initialization contract every extension implements.
pub trait ExtensionEntry: Send + Sync {
    /// Runs once per session after all dependencies have initialized.
    fn init(&self, ctx: &mut LoadContext<'_>) -> ExtensionResult;
}

impl<F> ExtensionEntry for F
where
    F: Fn(&mut LoadContext<'_>) -> ExtensionResult + Send + Sync,
{
    fn init(&self, ctx: &mut LoadContext<'_>) -> ExtensionResult {
        self(ctx)
    }
}

/// Pins a closure to the `ExtensionEntry` signature so it can be registered.
pub fn entry_fn<F>(init: F) -> F
where
    F: Fn(&mut LoadContext<'_>) -> ExtensionResult + Send + Sync,
{
    init
}

/// View of the host handed to `ExtensionEntry::init`.
pub struct LoadContext<'a> {
    descriptor: &'a ExtensionDescriptor,
    active: &'a BTreeSet<String>,
    panels: BTreeMap<String, PanelFactory>,
    actions: BTreeMap<String, ActionHandler>,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(descriptor: &'a ExtensionDescriptor, active: &'a BTreeSet<String>) -> Self {
        Self {
            descriptor,
            active,
            panels: BTreeMap::new(),
            actions: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &ExtensionDescriptor {
        self.descriptor
    }

    /// Whether `name` finished loading earlier in this session.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.active.contains(name)
    }

    /// Registers a panel factory under `panel_id`.
    ///
    /// # Errors
    /// - Returns an error for an invalid or already registered id.
    pub fn register_panel<F>(&mut self, panel_id: &str, factory: F) -> ExtensionResult
    where
        F: Fn() -> ExtensionResult<Box<dyn Panel>> + Send + Sync + 'static,
    {
        let panel_id = checked_id("panel", panel_id, self.panels.contains_key(panel_id))?;
        self.panels.insert(panel_id, Arc::new(factory));
        Ok(())
    }

    /// Registers an action handler under `action_id`.
    ///
    /// # Errors
    /// - Returns an error for an invalid or already registered id.
    pub fn register_action<F>(&mut self, action_id: &str, handler: F) -> ExtensionResult
    where
        F: Fn() -> ExtensionResult + Send + Sync + 'static,
    {
        let action_id = checked_id("action", action_id, self.actions.contains_key(action_id))?;
        self.actions.insert(action_id, Arc::new(handler));
        Ok(())
    }

    pub(crate) fn into_registrations(
        self,
    ) -> (
        BTreeMap<String, PanelFactory>,
        BTreeMap<String, ActionHandler>,
    ) {
        (self.panels, self.actions)
    }
}

fn checked_id(kind: &str, id: &str, taken: bool) -> ExtensionResult<String> {
    if !is_valid_extension_name(id) {
        return Err(format!("{kind} id is invalid: `{id}`").into());
    }
    if taken {
        return Err(format!("{kind} id already registered: `{id}`").into());
    }
    Ok(id.to_string())
}

/// Name-indexed registry of compiled-in entry points.
#[derive(Default)]
pub struct EntryRegistry {
    entries: BTreeMap<String, Arc<dyn ExtensionEntry>>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the entry point for extension `name`.
    pub fn register(
        &mut self,
        name: &str,
        entry: impl ExtensionEntry + 'static,
    ) -> Result<(), EntryRegistryError> {
        let name = name.trim();
        if !is_valid_extension_name(name) {
            return Err(EntryRegistryError::InvalidName(name.to_string()));
        }
        if self.entries.contains_key(name) {
            return Err(EntryRegistryError::DuplicateName(name.to_string()));
        }
        self.entries.insert(name.to_string(), Arc::new(entry));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExtensionEntry>> {
        self.entries.get(name).cloned()
    }

    /// Returns sorted entry names.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

/// Entry registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRegistryError {
    InvalidName(String),
    DuplicateName(String),
}

impl Display for EntryRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(value) => write!(f, "extension name is invalid: {value}"),
            Self::DuplicateName(value) => {
                write!(f, "extension entry already registered: {value}")
            }
        }
    }
}

impl Error for EntryRegistryError {}
