//! Extension contracts and the load pipeline.
//!
//! Descriptors are discovered and parsed (`discovery`, `descriptor`),
//! ordered (`resolver`), initialized in isolation (`entry`, `loader`) and
//! supervised at runtime (`supervisor`, `panel`, `report`). Sandboxing is out
//! of scope: extensions run with full host privileges.

pub mod descriptor;
pub mod discovery;
pub mod entry;
pub mod loader;
pub mod panel;
pub mod report;
pub mod resolver;
pub mod supervisor;
