//! Runtime supervision of loaded extensions.
//!
//! # Responsibility
//! - Wrap every host-to-extension call (panel construction, panel methods,
//!   actions, arbitrary calls) in its own isolation boundary.
//! - Turn caught faults into attributed `RuntimeFault` diagnostics.
//!
//! # Invariants
//! - No extension fault unwinds into the caller.
//! - A failed panel construction or panel call yields a placeholder for that
//!   panel only.
//! - Attribution names a loaded extension or is `Indeterminate`.

use crate::diagnostics::Diagnostics;
use crate::extension::descriptor::{ExtensionDescriptor, MaintainerContact};
use crate::extension::loader::LoadedExtension;
use crate::extension::panel::{PanelHandle, PlaceholderPanel, SupervisedPanel};
use crate::extension::report::{Attribution, FaultSite, RuntimeFault};
use crate::fault::{isolate, CapturedFault, ExtensionResult};
use log::{info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Lookup failures and caught faults surfaced to host code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    UnknownExtension(String),
    UnknownPanel { extension: String, panel: String },
    UnknownAction { extension: String, action: String },
    /// Extension code faulted; the fault is already in diagnostics.
    Faulted(Box<RuntimeFault>),
}

impl Display for SupervisorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownExtension(name) => write!(f, "extension is not loaded: {name}"),
            Self::UnknownPanel { extension, panel } => {
                write!(f, "extension `{extension}` has no panel `{panel}`")
            }
            Self::UnknownAction { extension, action } => {
                write!(f, "extension `{extension}` has no action `{action}`")
            }
            Self::Faulted(fault) => write!(f, "extension fault: {fault}"),
        }
    }
}

impl Error for SupervisorError {}

/// Owns the active extensions of one session.
pub struct Supervisor {
    extensions: BTreeMap<String, LoadedExtension>,
    order: Vec<String>,
    recorder: FaultRecorder,
}

/// Attributes caught faults and records them; shared with live panels.
#[derive(Clone)]
pub(crate) struct FaultRecorder {
    contacts: Arc<BTreeMap<String, Option<MaintainerContact>>>,
    diagnostics: Arc<Diagnostics>,
}

impl FaultRecorder {
    fn new(extensions: &BTreeMap<String, LoadedExtension>, diagnostics: Arc<Diagnostics>) -> Self {
        let contacts = extensions
            .iter()
            .map(|(name, loaded)| (name.clone(), loaded.descriptor.maintainer.clone()))
            .collect();
        Self {
            contacts: Arc::new(contacts),
            diagnostics,
        }
    }

    fn attribute(&self, context: Option<String>) -> Attribution {
        match context {
            Some(name) => match self.contacts.get(&name) {
                Some(contact) => Attribution::Extension {
                    contact: contact.clone(),
                    name,
                },
                None => Attribution::Indeterminate { hint: Some(name) },
            },
            None => Attribution::Indeterminate { hint: None },
        }
    }

    pub(crate) fn record(&self, site: FaultSite, captured: CapturedFault) -> RuntimeFault {
        let fault = RuntimeFault {
            site,
            attribution: self.attribute(captured.context),
            summary: captured.summary,
            detail: captured.detail,
        };
        let seq = self.diagnostics.record_runtime(fault.clone());
        match fault.extension() {
            Some(name) => warn!(
                "event=runtime_fault module=supervisor status=error extension={} site={} panicked={} seq={} reason={}",
                name, fault.site, captured.panicked, seq, fault.summary
            ),
            None => warn!(
                "event=runtime_fault module=supervisor status=error attribution=indeterminate site={} panicked={} seq={} reason={}",
                fault.site, captured.panicked, seq, fault.summary
            ),
        }
        if let Some(contact) = fault.contact() {
            info!(
                "event=error_report module=supervisor status=ok extension={} recipient={}",
                fault.extension().unwrap_or_default(),
                contact.email
            );
        }
        fault
    }
}

impl Supervisor {
    /// Takes over loaded extensions, given in load order.
    pub fn new(loaded: Vec<LoadedExtension>, diagnostics: Arc<Diagnostics>) -> Self {
        let order = loaded
            .iter()
            .map(|extension| extension.descriptor.name.clone())
            .collect();
        let extensions = loaded
            .into_iter()
            .map(|extension| (extension.descriptor.name.clone(), extension))
            .collect();
        let recorder = FaultRecorder::new(&extensions, diagnostics);
        Self {
            extensions,
            order,
            recorder,
        }
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.recorder.diagnostics
    }

    pub fn is_active(&self, extension: &str) -> bool {
        self.extensions.contains_key(extension)
    }

    /// Active extension names in load order.
    pub fn active_extensions(&self) -> &[String] {
        &self.order
    }

    pub fn descriptor(&self, extension: &str) -> Option<&Arc<ExtensionDescriptor>> {
        self.extensions
            .get(extension)
            .map(|loaded| &loaded.descriptor)
    }

    pub fn panel_ids(&self, extension: &str) -> Vec<&str> {
        self.extensions
            .get(extension)
            .map(|loaded| loaded.panels.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn action_ids(&self, extension: &str) -> Vec<&str> {
        self.extensions
            .get(extension)
            .map(|loaded| loaded.actions.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Builds one panel, substituting a placeholder if construction faults.
    ///
    /// A live panel keeps running its methods inside a boundary and turns
    /// into a placeholder the first time one of them faults.
    ///
    /// # Errors
    /// - `UnknownExtension` / `UnknownPanel` when nothing is registered under
    ///   the given ids. Construction faults are never returned as errors.
    pub fn create_panel(
        &self,
        extension: &str,
        panel: &str,
    ) -> Result<PanelHandle, SupervisorError> {
        let loaded = self.loaded(extension)?;
        let factory = loaded
            .panels
            .get(panel)
            .ok_or_else(|| SupervisorError::UnknownPanel {
                extension: extension.to_string(),
                panel: panel.to_string(),
            })?;

        match isolate(Some(extension), || factory()) {
            Ok(live) => Ok(PanelHandle::Live(SupervisedPanel::new(
                extension,
                panel,
                live,
                self.recorder.clone(),
            ))),
            Err(captured) => {
                let site = FaultSite::PanelConstruction {
                    extension: extension.to_string(),
                    panel: panel.to_string(),
                };
                let fault = self.recorder.record(site, captured);
                Ok(PanelHandle::Placeholder(PlaceholderPanel::new(
                    extension,
                    panel,
                    &fault.summary,
                )))
            }
        }
    }

    /// Invokes one registered action.
    pub fn invoke_action(&self, extension: &str, action: &str) -> Result<(), SupervisorError> {
        let loaded = self.loaded(extension)?;
        let handler = loaded
            .actions
            .get(action)
            .ok_or_else(|| SupervisorError::UnknownAction {
                extension: extension.to_string(),
                action: action.to_string(),
            })?;

        isolate(Some(extension), || handler()).map_err(|captured| {
            let site = FaultSite::Action {
                extension: extension.to_string(),
                action: action.to_string(),
            };
            SupervisorError::Faulted(Box::new(self.recorder.record(site, captured)))
        })
    }

    /// Runs arbitrary code on behalf of `extension`.
    pub fn call<T>(
        &self,
        extension: &str,
        call: impl FnOnce() -> ExtensionResult<T>,
    ) -> Result<T, SupervisorError> {
        self.loaded(extension)?;
        isolate(Some(extension), call).map_err(|captured| {
            let site = FaultSite::Call {
                extension: extension.to_string(),
            };
            SupervisorError::Faulted(Box::new(self.recorder.record(site, captured)))
        })
    }

    /// Host-level boundary with no extension named up front.
    ///
    /// The fault is attributed to whichever extension was executing when it
    /// was raised (see [`enter_extension`](crate::fault::enter_extension)),
    /// or recorded as indeterminate.
    pub fn guard<T>(&self, call: impl FnOnce() -> ExtensionResult<T>) -> Result<T, SupervisorError> {
        isolate(None, call).map_err(|captured| {
            SupervisorError::Faulted(Box::new(self.recorder.record(FaultSite::Host, captured)))
        })
    }

    fn loaded(&self, extension: &str) -> Result<&LoadedExtension, SupervisorError> {
        self.extensions
            .get(extension)
            .ok_or_else(|| SupervisorError::UnknownExtension(extension.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Supervisor, SupervisorError};
    use crate::diagnostics::Diagnostics;
    use crate::extension::descriptor::{ExtensionDescriptor, MaintainerContact};
    use crate::extension::entry::{entry_fn, EntryRegistry, LoadContext};
    use crate::extension::loader::load_extensions;
    use crate::extension::panel::Panel;
    use crate::extension::report::{Attribution, FaultSite};
    use crate::extension::resolver::resolve;
    use crate::fault::{enter_extension, ExtensionResult};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    struct Staff;

    impl Panel for Staff {
        fn title(&self) -> String {
            "Staff".to_string()
        }
    }

    struct Ruler;

    impl Panel for Ruler {
        fn title(&self) -> String {
            panic!("ruler ticks overflowed")
        }
    }

    fn supervisor() -> Supervisor {
        let mut entries = EntryRegistry::new();
        entries
            .register(
                "notation",
                entry_fn(|ctx: &mut LoadContext<'_>| {
                    ctx.register_panel("staff", || Ok(Box::new(Staff) as Box<dyn Panel>))?;
                    ctx.register_panel("broken", || -> ExtensionResult<Box<dyn Panel>> {
                        panic!("font cache empty")
                    })?;
                    ctx.register_panel("ruler", || Ok(Box::new(Ruler) as Box<dyn Panel>))?;
                    ctx.register_action("fail", || Err("no selection".into()))?;
                    Ok(())
                }),
            )
            .expect("register notation");
        entries
            .register(
                "playback",
                entry_fn(|ctx: &mut LoadContext<'_>| {
                    ctx.register_panel("mixer", || Ok(Box::new(Staff) as Box<dyn Panel>))
                }),
            )
            .expect("register playback");

        let contact = MaintainerContact::parse("Ann <ann@example.org>").expect("contact");
        let descriptors = vec![
            Arc::new(ExtensionDescriptor::new("notation").with_maintainer(contact)),
            Arc::new(ExtensionDescriptor::new("playback")),
        ];
        let diagnostics = Arc::new(Diagnostics::new());
        let summary = load_extensions(&resolve(&descriptors), &entries, &diagnostics);
        Supervisor::new(summary.loaded, diagnostics)
    }

    #[test]
    fn broken_panel_becomes_placeholder_for_that_panel_only() {
        let supervisor = supervisor();

        let broken = supervisor
            .create_panel("notation", "broken")
            .expect("placeholder instead of error");
        assert!(broken.is_placeholder());
        assert!(broken
            .problem()
            .is_some_and(|problem| problem.contains("font cache empty")));

        let staff = supervisor.create_panel("notation", "staff").expect("staff");
        let mixer = supervisor.create_panel("playback", "mixer").expect("mixer");
        assert!(!staff.is_placeholder());
        assert!(!mixer.is_placeholder());

        let faults = supervisor.diagnostics().runtime_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].extension(), Some("notation"));
    }

    #[test]
    fn live_panel_fault_is_contained_and_turns_into_placeholder() {
        let supervisor = supervisor();
        let handle = supervisor.create_panel("notation", "ruler").expect("live panel");
        assert!(!handle.is_placeholder());

        let title = panic::catch_unwind(AssertUnwindSafe(|| handle.title()))
            .expect("panel fault must not reach the host");
        assert_eq!(title, "ruler (unavailable)");
        assert!(handle.is_placeholder());
        assert!(handle
            .problem()
            .is_some_and(|problem| problem.contains("ruler ticks overflowed")));

        // Later calls use the placeholder without faulting again.
        assert_eq!(handle.into_panel().title(), "ruler (unavailable)");
        let faults = supervisor.diagnostics().runtime_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(
            faults[0].site,
            FaultSite::PanelCall {
                extension: "notation".to_string(),
                panel: "ruler".to_string(),
            }
        );
        assert_eq!(
            faults[0].contact().map(|contact| contact.email.as_str()),
            Some("ann@example.org")
        );
    }

    #[test]
    fn action_fault_is_attributed_with_contact() {
        let supervisor = supervisor();

        let err = supervisor
            .invoke_action("notation", "fail")
            .expect_err("action should fault");
        let SupervisorError::Faulted(fault) = err else {
            panic!("expected a fault, got {err:?}");
        };
        assert_eq!(fault.extension(), Some("notation"));
        assert_eq!(
            fault.contact().map(|contact| contact.email.as_str()),
            Some("ann@example.org")
        );
        assert_eq!(fault.summary, "no selection");
    }

    #[test]
    fn lookups_fail_without_recording_faults() {
        let supervisor = supervisor();

        assert!(matches!(
            supervisor.create_panel("ghost", "staff"),
            Err(SupervisorError::UnknownExtension(_))
        ));
        assert!(matches!(
            supervisor.invoke_action("playback", "fail"),
            Err(SupervisorError::UnknownAction { .. })
        ));
        assert!(supervisor.diagnostics().runtime_faults().is_empty());
    }

    #[test]
    fn guard_without_active_extension_is_indeterminate() {
        let supervisor = supervisor();

        let err = supervisor
            .guard(|| -> ExtensionResult {
                supervisor
                    .call("playback", || -> ExtensionResult { Ok(()) })
                    .map_err(|err| err.to_string())?;
                Err("host bookkeeping failed".into())
            })
            .expect_err("guard should capture error");
        let SupervisorError::Faulted(fault) = err else {
            panic!("expected a fault, got {err:?}");
        };
        assert_eq!(fault.attribution, Attribution::Indeterminate { hint: None });
    }

    #[test]
    fn guard_attributes_panic_to_the_executing_extension() {
        let supervisor = supervisor();

        let err = supervisor
            .guard(|| -> ExtensionResult {
                let _scope = enter_extension("notation");
                panic!("layout callback failed")
            })
            .expect_err("guard should capture panic");
        let SupervisorError::Faulted(fault) = err else {
            panic!("expected a fault, got {err:?}");
        };
        assert_eq!(fault.site, FaultSite::Host);
        assert_eq!(fault.extension(), Some("notation"));
        assert_eq!(
            fault.contact().map(|contact| contact.email.as_str()),
            Some("ann@example.org")
        );

        let err = supervisor
            .guard(|| -> ExtensionResult {
                let _scope = enter_extension("ghost");
                panic!("unknown caller")
            })
            .expect_err("guard should capture panic");
        let SupervisorError::Faulted(fault) = err else {
            panic!("expected a fault, got {err:?}");
        };
        assert_eq!(
            fault.attribution,
            Attribution::Indeterminate {
                hint: Some("ghost".to_string())
            }
        );
    }

    #[test]
    fn supervisor_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Supervisor>();
    }
}
