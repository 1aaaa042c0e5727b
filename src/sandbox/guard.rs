//! Namespace isolation around one entry-point invocation.

use std::collections::HashSet;

use tracing::debug;

use crate::script::Namespace;

/// Snapshots a namespace's attribute names on creation and, when dropped,
/// deletes exactly the names added since. Dropping also happens while a
/// panic unwinds, so every exit path is covered.
///
/// Names that existed before are never removed, even if their values were
/// changed by the invocation.
pub struct NamespaceGuard<'a> {
    namespace: &'a Namespace,
    before: HashSet<String>,
}

impl<'a> NamespaceGuard<'a> {
    pub fn new(namespace: &'a Namespace) -> Self {
        Self {
            namespace,
            before: namespace.keys(),
        }
    }
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        let added: Vec<String> = self
            .namespace
            .keys()
            .difference(&self.before)
            .cloned()
            .collect();
        for key in &added {
            self.namespace.remove(key);
        }
        if !added.is_empty() {
            debug!(
                unit = %self.namespace.name(),
                "Removed {} attribute(s) added during invocation",
                added.len()
            );
        }
    }
}
