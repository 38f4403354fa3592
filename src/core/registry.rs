//! Static service registry.
//!
//! Built once at startup from the ordered service list and shared read-only for the
//! lifetime of the process. Lookup is a linear first-prefix scan: with a handful of
//! services this beats any indexed structure and keeps the ordering rule obvious.
//!
//! When prefixes overlap, the first registered entry wins. That is documented
//! behaviour; the validator only warns about it.
use crate::config::models::ServiceEntry;

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    entries: Vec<ServiceEntry>,
}

impl ServiceRegistry {
    /// Register `entries` in order. The order is the match priority.
    pub fn new(entries: Vec<ServiceEntry>) -> Self {
        Self { entries }
    }

    /// First entry whose prefix is a leading substring of `request_path`.
    pub fn resolve(&self, request_path: &str) -> Option<&ServiceEntry> {
        self.entries
            .iter()
            .find(|entry| request_path.starts_with(entry.path_prefix.as_str()))
    }

    /// `request_path` with the entry's prefix removed (not replaced). A path equal to the
    /// prefix yields the empty string; the dispatcher forwards that as `/`.
    pub fn strip_prefix<'a>(request_path: &'a str, entry: &ServiceEntry) -> &'a str {
        request_path
            .strip_prefix(entry.path_prefix.as_str())
            .unwrap_or(request_path)
    }

    pub fn entries(&self) -> &[ServiceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Pairs `(earlier, later)` where one prefix is a prefix of the other.
    pub fn overlapping_prefixes(&self) -> Vec<(&ServiceEntry, &ServiceEntry)> {
        let mut overlaps = Vec::new();
        for (i, earlier) in self.entries.iter().enumerate() {
            for later in self.entries.iter().skip(i + 1) {
                if earlier.path_prefix.starts_with(later.path_prefix.as_str())
                    || later.path_prefix.starts_with(earlier.path_prefix.as_str())
                {
                    overlaps.push((earlier, later));
                }
            }
        }
        overlaps
    }
}
