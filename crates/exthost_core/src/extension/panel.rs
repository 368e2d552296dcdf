//! UI panel contracts between the host and extensions.
//!
//! The host UI layer renders panels; this module only defines what an
//! extension hands back, the supervised wrapper the host receives, and the
//! placeholder substituted when construction or a later panel call fails.

use crate::extension::report::FaultSite;
use crate::extension::supervisor::FaultRecorder;
use crate::fault::{isolate, ExtensionResult};
use serde::Serialize;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A UI panel built by extension code.
pub trait Panel: Send {
    /// Title shown in the host's panel chrome.
    fn title(&self) -> String;
}

/// Factory registered by an extension during `init`.
pub type PanelFactory = Arc<dyn Fn() -> ExtensionResult<Box<dyn Panel>> + Send + Sync>;

/// Stand-in panel returned when an extension's panel cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceholderPanel {
    pub extension: String,
    pub panel: String,
    /// Human-readable problem description shown in place of the panel.
    pub problem: String,
}

impl PlaceholderPanel {
    pub fn new(extension: &str, panel: &str, summary: &str) -> Self {
        Self {
            extension: extension.to_string(),
            panel: panel.to_string(),
            problem: format!(
                "The panel `{panel}` of extension `{extension}` could not be created: {summary}"
            ),
        }
    }

    fn failed_call(extension: &str, panel: &str, summary: &str) -> Self {
        Self {
            extension: extension.to_string(),
            panel: panel.to_string(),
            problem: format!(
                "The panel `{panel}` of extension `{extension}` stopped working: {summary}"
            ),
        }
    }
}

impl Panel for PlaceholderPanel {
    fn title(&self) -> String {
        format!("{} (unavailable)", self.panel)
    }
}

/// A successfully built panel whose methods run inside isolation boundaries.
///
/// The first fault is recorded as a runtime fault and the panel switches to
/// placeholder output for good; the extension's panel is not called again.
pub struct SupervisedPanel {
    extension: String,
    panel: String,
    inner: Box<dyn Panel>,
    recorder: FaultRecorder,
    failed: RefCell<Option<PlaceholderPanel>>,
}

impl SupervisedPanel {
    pub(crate) fn new(
        extension: &str,
        panel: &str,
        inner: Box<dyn Panel>,
        recorder: FaultRecorder,
    ) -> Self {
        Self {
            extension: extension.to_string(),
            panel: panel.to_string(),
            inner,
            recorder,
            failed: RefCell::new(None),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn panel_id(&self) -> &str {
        &self.panel
    }

    /// Problem description once a panel call has faulted.
    pub fn problem(&self) -> Option<String> {
        self.failed
            .borrow()
            .as_ref()
            .map(|placeholder| placeholder.problem.clone())
    }

    pub fn has_failed(&self) -> bool {
        self.failed.borrow().is_some()
    }

    fn run<T>(&self, call: impl Fn(&dyn Panel) -> T) -> T {
        if let Some(placeholder) = self.failed.borrow().as_ref() {
            return call(placeholder);
        }

        match isolate(Some(self.extension.as_str()), || Ok(call(self.inner.as_ref()))) {
            Ok(value) => value,
            Err(captured) => {
                let site = FaultSite::PanelCall {
                    extension: self.extension.clone(),
                    panel: self.panel.clone(),
                };
                let fault = self.recorder.record(site, captured);
                let placeholder =
                    PlaceholderPanel::failed_call(&self.extension, &self.panel, &fault.summary);
                *self.failed.borrow_mut() = Some(placeholder.clone());
                call(&placeholder)
            }
        }
    }
}

impl Panel for SupervisedPanel {
    fn title(&self) -> String {
        self.run(|panel| panel.title())
    }
}

impl Debug for SupervisedPanel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedPanel")
            .field("extension", &self.extension)
            .field("panel", &self.panel)
            .field("failed", &self.has_failed())
            .finish()
    }
}

/// What the supervisor returns to the host UI for one panel request.
#[derive(Debug)]
pub enum PanelHandle {
    Live(SupervisedPanel),
    Placeholder(PlaceholderPanel),
}

impl PanelHandle {
    /// True when the host is showing a placeholder, from the start or after
    /// a live panel faulted.
    pub fn is_placeholder(&self) -> bool {
        match self {
            Self::Live(panel) => panel.has_failed(),
            Self::Placeholder(_) => true,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::Live(panel) => panel.title(),
            Self::Placeholder(placeholder) => placeholder.title(),
        }
    }

    /// Problem description when a placeholder is being shown.
    pub fn problem(&self) -> Option<String> {
        match self {
            Self::Live(panel) => panel.problem(),
            Self::Placeholder(placeholder) => Some(placeholder.problem.clone()),
        }
    }

    /// Erases the distinction for hosts that only need something to show.
    ///
    /// A live panel stays supervised behind the returned box.
    pub fn into_panel(self) -> Box<dyn Panel> {
        match self {
            Self::Live(panel) => Box::new(panel),
            Self::Placeholder(placeholder) => Box::new(placeholder),
        }
    }
}
