//! The deny-lists a script is filtered against.

use std::collections::HashSet;

use crate::config::{MatchMode, PolicyConfig};

/// Process-wide and read-only once built.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    match_mode: MatchMode,
    modules: HashSet<String>,
    callables: HashSet<String>,
    deny_relative_imports: bool,
}

impl CapabilityPolicy {
    pub fn new<M, C>(
        match_mode: MatchMode,
        modules: M,
        callables: C,
        deny_relative_imports: bool,
    ) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            match_mode,
            modules: modules.into_iter().map(Into::into).collect(),
            callables: callables.into_iter().map(Into::into).collect(),
            deny_relative_imports,
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(
            config.match_mode,
            config.disallowed_modules.iter().cloned(),
            config.disallowed_callables.iter().cloned(),
            config.deny_relative_imports,
        )
    }

    /// Denies nothing.
    #[cfg(test)]
    pub fn permissive() -> Self {
        Self::new(
            MatchMode::Exact,
            Vec::<String>::new(),
            Vec::<String>::new(),
            false,
        )
    }

    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    pub fn denies_relative_imports(&self) -> bool {
        self.deny_relative_imports
    }

    /// Whether a single dotted module name matches the deny-list.
    ///
    /// In prefix mode `os` matches `os` and `os.path` but not `osmosis`.
    pub fn denies_module(&self, name: &str) -> bool {
        match self.match_mode {
            MatchMode::Exact => self.modules.contains(name),
            MatchMode::Prefix => self.modules.iter().any(|denied| {
                name == denied
                    || name
                        .strip_prefix(denied.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }),
        }
    }

    /// Whether importing `dotted` is denied. The root package is checked as
    /// well, since `import a.b` binds `a` in the importing namespace.
    pub fn denies_import(&self, dotted: &str) -> bool {
        let root = dotted.split('.').next().unwrap_or(dotted);
        self.denies_module(dotted) || self.denies_module(root)
    }

    pub fn denies_callable(&self, name: &str) -> bool {
        self.callables.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: MatchMode) -> CapabilityPolicy {
        CapabilityPolicy::new(mode, ["os", "xml.dom"], ["open"], true)
    }

    #[test]
    fn test_prefix_matches_package_members_only() {
        let policy = policy(MatchMode::Prefix);
        assert!(policy.denies_module("os"));
        assert!(policy.denies_module("os.path"));
        assert!(!policy.denies_module("osmosis"));
        assert!(policy.denies_module("xml.dom.minidom"));
        assert!(!policy.denies_module("xml"));
    }

    #[test]
    fn test_exact_matches_whole_names_only() {
        let policy = policy(MatchMode::Exact);
        assert!(policy.denies_module("os"));
        assert!(!policy.denies_module("os.path"));
        assert!(policy.denies_module("xml.dom"));
        assert!(!policy.denies_module("xml.dom.minidom"));
    }

    #[test]
    fn test_import_checks_the_bound_root() {
        let policy = policy(MatchMode::Exact);
        assert!(policy.denies_import("os.path"));
        assert!(!policy.denies_import("math"));
    }

    #[test]
    fn test_callables_and_permissive() {
        assert!(policy(MatchMode::Prefix).denies_callable("open"));
        assert!(!policy(MatchMode::Prefix).denies_callable("print"));
        let open = CapabilityPolicy::permissive();
        assert!(!open.denies_import("os"));
        assert!(!open.denies_callable("open"));
        assert!(!open.denies_relative_imports());
    }

    #[test]
    fn test_from_config_defaults() {
        let policy = CapabilityPolicy::from_config(&PolicyConfig::default());
        assert_eq!(policy.match_mode(), MatchMode::Prefix);
        assert!(policy.denies_import("subprocess"));
        assert!(policy.denies_callable("eval"));
        assert!(policy.denies_relative_imports());
    }
}
