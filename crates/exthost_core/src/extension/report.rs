//! Runtime fault records and the error-report envelope built from them.
//!
//! # Responsibility
//! - Describe one uncaught fault from extension code after load.
//! - Decide what an error report says and to whom it is addressed.
//!
//! # Invariants
//! - A fault whose origin cannot be tied to a loaded extension is recorded as
//!   `Attribution::Indeterminate`, never dropped.
//! - Composing and sending the report is left to the host.

use crate::extension::descriptor::MaintainerContact;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Where in the host/extension boundary a fault was caught.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultSite {
    PanelConstruction { extension: String, panel: String },
    /// A method call on a panel that was built successfully.
    PanelCall { extension: String, panel: String },
    Action { extension: String, action: String },
    Call { extension: String },
    /// A host-level guard with no extension named up front.
    Host,
}

impl Display for FaultSite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PanelConstruction { extension, panel } => {
                write!(f, "panel `{panel}` of `{extension}`")
            }
            Self::PanelCall { extension, panel } => {
                write!(f, "call into panel `{panel}` of `{extension}`")
            }
            Self::Action { extension, action } => write!(f, "action `{action}` of `{extension}`"),
            Self::Call { extension } => write!(f, "call into `{extension}`"),
            Self::Host => write!(f, "host boundary"),
        }
    }
}

/// Which extension a runtime fault is blamed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attribution {
    Extension {
        name: String,
        contact: Option<MaintainerContact>,
    },
    /// No loaded extension could be identified; `hint` keeps any context name
    /// that was active but does not match a loaded extension.
    Indeterminate { hint: Option<String> },
}

/// One uncaught fault raised by extension code after it loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeFault {
    pub site: FaultSite,
    pub attribution: Attribution,
    pub summary: String,
    pub detail: String,
}

impl RuntimeFault {
    pub fn extension(&self) -> Option<&str> {
        match &self.attribution {
            Attribution::Extension { name, .. } => Some(name.as_str()),
            Attribution::Indeterminate { .. } => None,
        }
    }

    pub fn contact(&self) -> Option<&MaintainerContact> {
        match &self.attribution {
            Attribution::Extension { contact, .. } => contact.as_ref(),
            Attribution::Indeterminate { .. } => None,
        }
    }

    pub fn is_attributed(&self) -> bool {
        matches!(self.attribution, Attribution::Extension { .. })
    }

    /// Builds the report an external mailer or dialog can pre-populate.
    pub fn error_report(&self) -> ErrorReport {
        let subject = match self.extension() {
            Some(name) => format!("Error in extension `{name}`: {}", self.summary),
            None => format!("Error in an extension of unknown origin: {}", self.summary),
        };
        let origin = match &self.attribution {
            Attribution::Extension { name, .. } => name.clone(),
            Attribution::Indeterminate { hint: Some(hint) } => {
                format!("indeterminate (last active context: `{hint}`)")
            }
            Attribution::Indeterminate { hint: None } => "indeterminate".to_string(),
        };
        let body = format!(
            "Extension: {origin}\nSite: {}\nSummary: {}\n\n{}",
            self.site, self.summary, self.detail
        );

        ErrorReport {
            extension: self.extension().map(str::to_string),
            recipient: self.contact().cloned(),
            subject,
            body,
        }
    }
}

impl Display for RuntimeFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.extension() {
            Some(name) => write!(f, "{name}: {} ({})", self.summary, self.site),
            None => write!(f, "unknown extension: {} ({})", self.summary, self.site),
        }
    }
}

/// Structured error report; `recipient` is `None` when no contact resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub extension: Option<String>,
    pub recipient: Option<MaintainerContact>,
    pub subject: String,
    pub body: String,
}
