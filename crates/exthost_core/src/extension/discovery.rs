//! Filesystem discovery of extension descriptors.
//!
//! Each search path is scanned for immediate subdirectories that contain an
//! `extension.toml`. Subdirectories are visited in lexical order so the
//! declaration order, and with it tie-breaking during resolution, is
//! reproducible across machines.

use crate::extension::descriptor::{DescriptorSource, DESCRIPTOR_FILENAME};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Collects descriptor sources from every search path, in order.
///
/// Missing or unreadable search paths are skipped. An unreadable descriptor
/// file still produces a source so it shows up in diagnostics.
pub fn discover_sources(search_paths: &[PathBuf]) -> Vec<DescriptorSource> {
    let mut sources = Vec::new();
    for root in search_paths {
        let found = scan_dir(root);
        debug!(
            "event=discovery_scan module=discovery status=ok path={} found={}",
            root.display(),
            found.len()
        );
        sources.extend(found);
    }
    sources
}

fn scan_dir(root: &Path) -> Vec<DescriptorSource> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut dirs: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if !path.is_dir() {
                return None;
            }
            let name = entry.file_name().to_str()?.to_string();
            if name.starts_with('.') {
                return None;
            }
            Some((name, path))
        })
        .collect();
    dirs.sort();

    dirs.into_iter()
        .filter_map(|(name, dir)| {
            let descriptor_path = dir.join(DESCRIPTOR_FILENAME);
            if !descriptor_path.is_file() {
                return None;
            }
            let source = match fs::read_to_string(&descriptor_path) {
                Ok(text) => DescriptorSource::from_text(name, text),
                Err(err) => {
                    warn!(
                        "event=discovery_read module=discovery status=error path={} error={}",
                        descriptor_path.display(),
                        err
                    );
                    DescriptorSource::unreadable(name, err.to_string())
                }
            };
            Some(source.with_path(descriptor_path))
        })
        .collect()
}
