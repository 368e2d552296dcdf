//! Core of the extension host.
//! Discovers, orders, loads and supervises extensions, keeping faults in
//! extension code away from the host.

pub mod config;
pub mod diagnostics;
pub mod extension;
pub mod fault;
pub mod host;
pub mod logging;

pub use config::{ConfigError, ExtensionsConfig, HostConfig, LoggingConfig};
pub use diagnostics::{DiagnosticEntry, DiagnosticKind, Diagnostics, FailedExtension};
pub use extension::descriptor::{
    load_descriptors, parse_descriptor, DescriptorSource, ExtensionDescriptor,
    MaintainerContact, MetadataIssue, DESCRIPTOR_FILENAME,
};
pub use extension::discovery::discover_sources;
pub use extension::entry::{entry_fn, EntryRegistry, EntryRegistryError, ExtensionEntry, LoadContext};
pub use extension::loader::{load_extensions, LoadOutcome, LoadRecord, LoadRecordKind};
pub use extension::panel::{Panel, PanelHandle, PlaceholderPanel, SupervisedPanel};
pub use extension::report::{Attribution, ErrorReport, FaultSite, RuntimeFault};
pub use extension::resolver::{resolve, ExclusionReason, Resolution};
pub use extension::supervisor::{Supervisor, SupervisorError};
pub use fault::{enter_extension, ExecutionScope, ExtensionError, ExtensionResult};
pub use host::ExtensionHost;
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, init_stderr_logging,
    logging_status, LogTarget,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
