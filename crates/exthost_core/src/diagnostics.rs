//! Append-only diagnostics report shared by every extension-host component.
//!
//! # Responsibility
//! - Collect metadata issues, cycle diagnoses, load records and runtime
//!   faults in insertion order.
//! - Serve read-only queries, including the "Failed Extensions" view.
//!
//! # Invariants
//! - Sequence numbers start at 1 and increase by one per entry.
//! - Entries are never evicted or modified for the lifetime of the value.
//! - Readers work on snapshots and never block writers.
//! - An append copies entry pointers only; recorded entries are shared, not
//!   cloned, between snapshots.

use crate::extension::descriptor::MetadataIssue;
use crate::extension::loader::LoadRecord;
use crate::extension::report::RuntimeFault;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Payload of one diagnostics entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    Metadata {
        extension: String,
        issue: MetadataIssue,
    },
    Cycle {
        members: Vec<String>,
    },
    Load(LoadRecord),
    Runtime(RuntimeFault),
}

impl DiagnosticKind {
    /// Whether this entry represents something that kept code from running.
    pub fn is_fault(&self) -> bool {
        match self {
            Self::Metadata { .. } => false,
            Self::Cycle { .. } | Self::Runtime(_) => true,
            Self::Load(record) => record.is_failure(),
        }
    }

    /// Extension the entry concerns, when there is exactly one.
    pub fn extension(&self) -> Option<&str> {
        match self {
            Self::Metadata { extension, .. } => Some(extension.as_str()),
            Self::Cycle { .. } => None,
            Self::Load(record) => Some(record.extension.as_str()),
            Self::Runtime(fault) => fault.extension(),
        }
    }

    fn summary(&self) -> String {
        match self {
            Self::Metadata { issue, .. } => issue.to_string(),
            Self::Cycle { members } => format!("circular dependency: {}", members.join(" -> ")),
            Self::Load(record) => record.summary.clone(),
            Self::Runtime(fault) => fault.summary.clone(),
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Metadata { .. } | Self::Cycle { .. } => self.summary(),
            Self::Load(record) => record.detail(),
            Self::Runtime(fault) => fault.error_report().body,
        }
    }
}

/// One recorded entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEntry {
    pub seq: u64,
    pub recorded_at_ms: i64,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
}

/// Row of the "Failed Extensions" view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedExtension {
    /// Sequence number to pass to `Diagnostics::detail`.
    pub seq: u64,
    /// `None` for cycles and indeterminate runtime faults.
    pub extension: Option<String>,
    pub summary: String,
}

/// Shared diagnostics store.
pub struct Diagnostics {
    entries: ArcSwap<Vec<Arc<DiagnosticEntry>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Appends one entry and returns its sequence number.
    pub fn record(&self, kind: DiagnosticKind) -> u64 {
        let recorded_at_ms = now_epoch_ms();
        let mut seq = 0;
        self.entries.rcu(|current| {
            seq = current.len() as u64 + 1;
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().map(Arc::clone));
            next.push(Arc::new(DiagnosticEntry {
                seq,
                recorded_at_ms,
                kind: kind.clone(),
            }));
            next
        });
        seq
    }

    pub fn record_metadata(&self, extension: &str, issue: MetadataIssue) -> u64 {
        self.record(DiagnosticKind::Metadata {
            extension: extension.to_string(),
            issue,
        })
    }

    pub fn record_cycle(&self, members: Vec<String>) -> u64 {
        self.record(DiagnosticKind::Cycle { members })
    }

    pub fn record_load(&self, record: LoadRecord) -> u64 {
        self.record(DiagnosticKind::Load(record))
    }

    pub fn record_runtime(&self, fault: RuntimeFault) -> u64 {
        self.record(DiagnosticKind::Runtime(fault))
    }

    /// Point-in-time view of every entry.
    pub fn snapshot(&self) -> Arc<Vec<Arc<DiagnosticEntry>>> {
        self.entries.load_full()
    }

    pub fn all(&self) -> Vec<Arc<DiagnosticEntry>> {
        self.snapshot().as_ref().clone()
    }

    pub fn faulted(&self) -> Vec<Arc<DiagnosticEntry>> {
        self.snapshot()
            .iter()
            .filter(|entry| entry.kind.is_fault())
            .map(Arc::clone)
            .collect()
    }

    pub fn load_records(&self) -> Vec<LoadRecord> {
        self.snapshot()
            .iter()
            .filter_map(|entry| match &entry.kind {
                DiagnosticKind::Load(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn load_record(&self, extension: &str) -> Option<LoadRecord> {
        self.load_records()
            .into_iter()
            .find(|record| record.extension == extension)
    }

    pub fn runtime_faults(&self) -> Vec<RuntimeFault> {
        self.snapshot()
            .iter()
            .filter_map(|entry| match &entry.kind {
                DiagnosticKind::Runtime(fault) => Some(fault.clone()),
                _ => None,
            })
            .collect()
    }

    /// Name and summary of every fault entry, in insertion order.
    pub fn failed_extensions(&self) -> Vec<FailedExtension> {
        self.snapshot()
            .iter()
            .filter(|entry| entry.kind.is_fault())
            .map(|entry| FailedExtension {
                seq: entry.seq,
                extension: entry.kind.extension().map(str::to_string),
                summary: entry.kind.summary(),
            })
            .collect()
    }

    pub fn entry(&self, seq: u64) -> Option<Arc<DiagnosticEntry>> {
        let index = usize::try_from(seq.checked_sub(1)?).ok()?;
        self.snapshot().get(index).map(Arc::clone)
    }

    /// Full detail text of one entry.
    pub fn detail(&self, seq: u64) -> Option<String> {
        self.entry(seq).map(|entry| entry.kind.detail())
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("entries", &self.len())
            .finish()
    }
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
