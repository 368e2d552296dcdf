//! Extension host facade.
//!
//! # Responsibility
//! - Wire discovery, metadata, resolution and loading into one call.
//! - Hand the host application a `Supervisor` for the running session.
//!
//! # Invariants
//! - Disabled extensions are removed before resolution and recorded as
//!   `Disabled`, so their dependents are excluded as unsatisfied.
//! - Every cycle is recorded once in diagnostics before load records.

use crate::config::HostConfig;
use crate::diagnostics::Diagnostics;
use crate::extension::descriptor::{load_descriptors, DescriptorSource, ExtensionDescriptor};
use crate::extension::discovery::discover_sources;
use crate::extension::entry::{EntryRegistry, EntryRegistryError, ExtensionEntry};
use crate::extension::loader::{load_extensions, LoadRecord};
use crate::extension::resolver::{resolve, Resolution};
use crate::extension::supervisor::Supervisor;
use log::{info, warn};
use std::sync::Arc;

/// Owns config, compiled-in entry points and the session diagnostics.
pub struct ExtensionHost {
    config: HostConfig,
    entries: EntryRegistry,
    diagnostics: Arc<Diagnostics>,
}

impl ExtensionHost {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            entries: EntryRegistry::new(),
            diagnostics: Arc::new(Diagnostics::new()),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Registers the compiled-in entry point for extension `name`.
    pub fn register_entry(
        &mut self,
        name: &str,
        entry: impl ExtensionEntry + 'static,
    ) -> Result<(), EntryRegistryError> {
        self.entries.register(name, entry)
    }

    pub fn entries(&self) -> &EntryRegistry {
        &self.entries
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Scans the configured search paths.
    pub fn discover_sources(&self) -> Vec<DescriptorSource> {
        discover_sources(&self.config.extensions.search_paths)
    }

    /// Parses sources, recording metadata issues.
    pub fn load_metadata(&self, sources: &[DescriptorSource]) -> Vec<Arc<ExtensionDescriptor>> {
        load_descriptors(sources, &self.diagnostics)
    }

    /// Full pipeline over the configured search paths.
    pub fn start(&self) -> Supervisor {
        let sources = self.discover_sources();
        self.start_with_sources(&sources)
    }

    pub fn start_with_sources(&self, sources: &[DescriptorSource]) -> Supervisor {
        let descriptors = self.load_metadata(sources);
        self.start_with_descriptors(&descriptors)
    }

    /// Resolves and loads already-parsed descriptors, in declaration order.
    pub fn start_with_descriptors(&self, descriptors: &[Arc<ExtensionDescriptor>]) -> Supervisor {
        let resolution = self.resolve(descriptors);
        let summary = load_extensions(&resolution, &self.entries, &self.diagnostics);
        info!(
            "event=host_session module=host status=ok discovered={} active={} failed={}",
            descriptors.len(),
            summary.loaded.len(),
            summary
                .records
                .iter()
                .filter(|record| record.is_failure())
                .count()
        );
        Supervisor::new(summary.loaded, Arc::clone(&self.diagnostics))
    }

    /// Drops disabled extensions, resolves the rest and records cycles.
    pub fn resolve(&self, descriptors: &[Arc<ExtensionDescriptor>]) -> Resolution {
        let mut enabled = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if self.config.is_disabled(&descriptor.name) {
                info!(
                    "event=extension_load module=host status=ok extension={} outcome=disabled",
                    descriptor.name
                );
                self.diagnostics.record_load(LoadRecord::disabled(descriptor));
                continue;
            }
            enabled.push(Arc::clone(descriptor));
        }

        let resolution = resolve(&enabled);
        for cycle in &resolution.cycles {
            warn!(
                "event=dependency_cycle module=resolver status=warn members={}",
                cycle.join(",")
            );
            self.diagnostics.record_cycle(cycle.clone());
        }
        resolution
    }
}
