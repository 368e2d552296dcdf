//! Fault-isolated loading of resolved extensions.
//!
//! # Responsibility
//! - Run each extension's entry point in resolved order, one isolation
//!   boundary per extension.
//! - Produce exactly one `LoadRecord` per descriptor seen by the resolver.
//!
//! # Invariants
//! - A dependency is fully initialized before any dependent starts.
//! - A fault in one extension never stops the remaining loads.
//! - Registrations made by a failed `init` are discarded.

use crate::diagnostics::Diagnostics;
use crate::extension::descriptor::{ExtensionDescriptor, MetadataIssue};
use crate::extension::entry::{ActionHandler, EntryRegistry, LoadContext};
use crate::extension::panel::PanelFactory;
use crate::extension::resolver::{ExclusionReason, Resolution};
use crate::fault::isolate;
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const NO_ENTRY_POINT: &str = "no entry point registered";

/// Coarse outcome category, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadRecordKind {
    Loaded,
    MetadataFallback,
    DependencyFailed,
    LoadError,
    Disabled,
}

impl LoadRecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::MetadataFallback => "metadata_fallback",
            Self::DependencyFailed => "dependency_failed",
            Self::LoadError => "load_error",
            Self::Disabled => "disabled",
        }
    }
}

/// What happened to one extension during a load cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded,
    /// Loaded, but one or more descriptor fields were substituted.
    LoadedWithFallbacks { issues: Vec<MetadataIssue> },
    DependencyFailed { reason: ExclusionReason },
    /// Entry point returned an error or panicked.
    LoadError { detail: String },
    /// Switched off by host configuration.
    Disabled,
}

/// Per-extension load outcome retained for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadRecord {
    pub extension: String,
    pub title: String,
    pub version: String,
    pub origin: String,
    #[serde(flatten)]
    pub outcome: LoadOutcome,
    /// One-line description for list views.
    pub summary: String,
}

impl LoadRecord {
    fn new(descriptor: &ExtensionDescriptor, outcome: LoadOutcome, summary: String) -> Self {
        Self {
            extension: descriptor.name.clone(),
            title: descriptor.title.clone(),
            version: descriptor.version.clone(),
            origin: descriptor.origin.clone(),
            outcome,
            summary,
        }
    }

    fn loaded(descriptor: &ExtensionDescriptor) -> Self {
        if descriptor.has_fallbacks() {
            let count = descriptor.issues.len();
            return Self::new(
                descriptor,
                LoadOutcome::LoadedWithFallbacks {
                    issues: descriptor.issues.clone(),
                },
                format!("loaded with {count} metadata fallback(s)"),
            );
        }
        Self::new(descriptor, LoadOutcome::Loaded, "loaded".to_string())
    }

    fn dependency_failed(descriptor: &ExtensionDescriptor, reason: ExclusionReason) -> Self {
        let summary = reason.to_string();
        Self::new(descriptor, LoadOutcome::DependencyFailed { reason }, summary)
    }

    fn load_error(descriptor: &ExtensionDescriptor, summary: String, detail: String) -> Self {
        Self::new(descriptor, LoadOutcome::LoadError { detail }, summary)
    }

    /// Record for an extension removed by host configuration.
    pub fn disabled(descriptor: &ExtensionDescriptor) -> Self {
        Self::new(
            descriptor,
            LoadOutcome::Disabled,
            "disabled by host configuration".to_string(),
        )
    }

    pub fn kind(&self) -> LoadRecordKind {
        match self.outcome {
            LoadOutcome::Loaded => LoadRecordKind::Loaded,
            LoadOutcome::LoadedWithFallbacks { .. } => LoadRecordKind::MetadataFallback,
            LoadOutcome::DependencyFailed { .. } => LoadRecordKind::DependencyFailed,
            LoadOutcome::LoadError { .. } => LoadRecordKind::LoadError,
            LoadOutcome::Disabled => LoadRecordKind::Disabled,
        }
    }

    /// True when the extension is not running this session for a reason
    /// other than configuration.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind(),
            LoadRecordKind::DependencyFailed | LoadRecordKind::LoadError
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.kind(),
            LoadRecordKind::Loaded | LoadRecordKind::MetadataFallback
        )
    }

    /// Full detail text for the "Failed Extensions" drill-down.
    pub fn detail(&self) -> String {
        match &self.outcome {
            LoadOutcome::Loaded | LoadOutcome::Disabled => self.summary.clone(),
            LoadOutcome::LoadedWithFallbacks { issues } => issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
            LoadOutcome::DependencyFailed { reason } => reason.to_string(),
            LoadOutcome::LoadError { detail } => detail.clone(),
        }
    }
}

/// An extension whose `init` completed, with everything it registered.
#[derive(Clone)]
pub struct LoadedExtension {
    pub descriptor: Arc<ExtensionDescriptor>,
    pub panels: BTreeMap<String, PanelFactory>,
    pub actions: BTreeMap<String, ActionHandler>,
}

/// Result of one load cycle.
#[derive(Default)]
pub struct LoadSummary {
    /// One record per descriptor, exclusions first, then load order.
    pub records: Vec<LoadRecord>,
    /// Active extensions in load order.
    pub loaded: Vec<LoadedExtension>,
}

impl LoadSummary {
    pub fn loaded_names(&self) -> Vec<&str> {
        self.loaded
            .iter()
            .map(|extension| extension.descriptor.name.as_str())
            .collect()
    }

    pub fn record(&self, name: &str) -> Option<&LoadRecord> {
        self.records.iter().find(|record| record.extension == name)
    }
}

/// Loads every extension in `resolution.order`, recording each outcome.
///
/// Exclusions from resolution become `DependencyFailed` records. Every record
/// is also appended to `diagnostics`.
pub fn load_extensions(
    resolution: &Resolution,
    entries: &EntryRegistry,
    diagnostics: &Diagnostics,
) -> LoadSummary {
    let mut summary = LoadSummary::default();

    for exclusion in &resolution.excluded {
        let record = LoadRecord::dependency_failed(&exclusion.descriptor, exclusion.reason.clone());
        warn!(
            "event=extension_load module=loader status=warn extension={} outcome={} reason={}",
            record.extension,
            record.kind().as_str(),
            record.summary
        );
        push_record(&mut summary, diagnostics, record);
    }

    let mut active: BTreeSet<String> = BTreeSet::new();
    let mut failed: BTreeSet<String> = BTreeSet::new();

    for descriptor in &resolution.order {
        let failed_dependencies: Vec<String> = descriptor
            .dependencies
            .iter()
            .filter(|dependency| failed.contains(dependency.as_str()))
            .cloned()
            .collect();
        if !failed_dependencies.is_empty() {
            failed.insert(descriptor.name.clone());
            let record = LoadRecord::dependency_failed(
                descriptor,
                ExclusionReason::DependencyLoadFailed {
                    failed: failed_dependencies,
                },
            );
            warn!(
                "event=extension_load module=loader status=warn extension={} outcome={} reason={}",
                record.extension,
                record.kind().as_str(),
                record.summary
            );
            push_record(&mut summary, diagnostics, record);
            continue;
        }

        let Some(entry) = entries.get(&descriptor.name) else {
            failed.insert(descriptor.name.clone());
            let record = LoadRecord::load_error(
                descriptor,
                NO_ENTRY_POINT.to_string(),
                format!(
                    "extension `{}` declared by `{}` has no compiled-in entry point",
                    descriptor.name, descriptor.origin
                ),
            );
            warn!(
                "event=extension_load module=loader status=error extension={} outcome={} reason={}",
                record.extension,
                record.kind().as_str(),
                NO_ENTRY_POINT
            );
            push_record(&mut summary, diagnostics, record);
            continue;
        };

        let outcome = isolate(Some(&descriptor.name), || {
            let mut ctx = LoadContext::new(descriptor, &active);
            entry.init(&mut ctx)?;
            Ok(ctx.into_registrations())
        });

        match outcome {
            Ok((panels, actions)) => {
                let record = LoadRecord::loaded(descriptor);
                info!(
                    "event=extension_load module=loader status=ok extension={} outcome={} panels={} actions={}",
                    record.extension,
                    record.kind().as_str(),
                    panels.len(),
                    actions.len()
                );
                active.insert(descriptor.name.clone());
                summary.loaded.push(LoadedExtension {
                    descriptor: Arc::clone(descriptor),
                    panels,
                    actions,
                });
                push_record(&mut summary, diagnostics, record);
            }
            Err(fault) => {
                warn!(
                    "event=extension_load module=loader status=error extension={} outcome=load_error panicked={} reason={}",
                    descriptor.name, fault.panicked, fault.summary
                );
                failed.insert(descriptor.name.clone());
                let record = LoadRecord::load_error(descriptor, fault.summary, fault.detail);
                push_record(&mut summary, diagnostics, record);
            }
        }
    }

    info!(
        "event=load_cycle module=loader status=ok loaded={} records={}",
        summary.loaded.len(),
        summary.records.len()
    );
    summary
}

fn push_record(summary: &mut LoadSummary, diagnostics: &Diagnostics, record: LoadRecord) {
    diagnostics.record_load(record.clone());
    summary.records.push(record);
}

#[cfg(test)]
mod tests {
    use super::{load_extensions, LoadOutcome, LoadRecordKind};
    use crate::diagnostics::Diagnostics;
    use crate::extension::descriptor::{parse_descriptor, DescriptorSource, ExtensionDescriptor};
    use crate::extension::entry::{entry_fn, EntryRegistry, LoadContext};
    use crate::extension::resolver::{resolve, ExclusionReason};
    use crate::fault::ExtensionResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn ext(name: &str, dependencies: &[&str]) -> Arc<ExtensionDescriptor> {
        Arc::new(ExtensionDescriptor::new(name).with_dependencies(dependencies.iter().copied()))
    }

    fn noop(_ctx: &mut LoadContext<'_>) -> ExtensionResult {
        Ok(())
    }

    #[test]
    fn loads_in_resolved_order_and_sees_dependencies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut entries = EntryRegistry::new();
        for name in ["core", "editor"] {
            let seen = Arc::clone(&seen);
            entries
                .register(
                    name,
                    entry_fn(move |ctx: &mut LoadContext<'_>| {
                        let name = ctx.descriptor().name.clone();
                        let core_ready = ctx.is_loaded("core");
                        seen.lock().expect("seen lock").push((name, core_ready));
                        Ok(())
                    }),
                )
                .expect("register");
        }

        let resolution = resolve(&[ext("editor", &["core"]), ext("core", &[])]);
        let diagnostics = Diagnostics::new();
        let summary = load_extensions(&resolution, &entries, &diagnostics);

        assert_eq!(summary.loaded_names(), vec!["core", "editor"]);
        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec![("core".to_string(), false), ("editor".to_string(), true)]
        );
        assert_eq!(diagnostics.load_records().len(), 2);
    }

    #[test]
    fn failed_init_does_not_stop_later_loads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut entries = EntryRegistry::new();
        entries
            .register(
                "a",
                entry_fn(|ctx: &mut LoadContext<'_>| {
                    ctx.register_action("never", || Ok(()))?;
                    panic!("a cannot start")
                }),
            )
            .expect("register a");
        for name in ["b", "c"] {
            let calls = Arc::clone(&calls);
            entries
                .register(
                    name,
                    entry_fn(move |_ctx: &mut LoadContext<'_>| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                )
                .expect("register");
        }

        let resolution = resolve(&[ext("a", &[]), ext("b", &[]), ext("c", &[])]);
        let diagnostics = Diagnostics::new();
        let summary = load_extensions(&resolution, &entries, &diagnostics);

        assert_eq!(summary.loaded_names(), vec!["b", "c"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let record = summary.record("a").expect("record for a");
        assert_eq!(record.kind(), LoadRecordKind::LoadError);
        assert_eq!(record.summary, "panicked: a cannot start");
        assert!(record.detail().contains("stack backtrace"));
    }

    #[test]
    fn dependent_of_failed_extension_is_not_attempted() {
        let attempted = Arc::new(AtomicUsize::new(0));
        let mut entries = EntryRegistry::new();
        entries
            .register(
                "core",
                entry_fn(|_ctx: &mut LoadContext<'_>| Err("config missing".into())),
            )
            .expect("register core");
        let counter = Arc::clone(&attempted);
        entries
            .register(
                "editor",
                entry_fn(move |_ctx: &mut LoadContext<'_>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .expect("register editor");

        let resolution = resolve(&[ext("core", &[]), ext("editor", &["core"])]);
        let summary = load_extensions(&resolution, &entries, &Diagnostics::new());

        assert_eq!(attempted.load(Ordering::SeqCst), 0);
        let record = summary.record("editor").expect("record for editor");
        assert_eq!(
            record.outcome,
            LoadOutcome::DependencyFailed {
                reason: ExclusionReason::DependencyLoadFailed {
                    failed: vec!["core".to_string()],
                },
            }
        );
        assert!(record.is_failure());
    }

    #[test]
    fn missing_entry_point_is_a_load_error() {
        let resolution = resolve(&[ext("ghost", &[])]);
        let summary = load_extensions(&resolution, &EntryRegistry::new(), &Diagnostics::new());

        let record = summary.record("ghost").expect("record for ghost");
        assert_eq!(record.kind(), LoadRecordKind::LoadError);
        assert_eq!(record.summary, "no entry point registered");
    }

    #[test]
    fn exclusions_become_dependency_failed_records() {
        let mut entries = EntryRegistry::new();
        entries.register("a", noop).expect("register a");

        let resolution = resolve(&[ext("a", &["z"])]);
        let summary = load_extensions(&resolution, &entries, &Diagnostics::new());

        assert!(summary.loaded.is_empty());
        let record = summary.record("a").expect("record for a");
        assert_eq!(record.kind(), LoadRecordKind::DependencyFailed);
        assert!(record.summary.contains("`z`"));
    }

    #[test]
    fn metadata_fallbacks_are_reflected_in_record() {
        let descriptor = Arc::new(parse_descriptor(&DescriptorSource::from_text(
            "Lyrics Tools",
            "title = \"Lyrics\"\nversion = \"1.0\"",
        )));
        let mut entries = EntryRegistry::new();
        entries
            .register(&descriptor.name, noop)
            .expect("register derived name");

        let resolution = resolve(&[descriptor]);
        let summary = load_extensions(&resolution, &entries, &Diagnostics::new());

        let record = &summary.records[0];
        assert_eq!(record.kind(), LoadRecordKind::MetadataFallback);
        assert!(record.is_active());
        assert!(record.detail().contains("version"));
    }
}
