//! Per-context environment and global stubs
//!
//! Each execution context sees its own copy of the environment, taken from
//! explicit settings plus an allowlisted snapshot of the host. Tests mutate
//! that copy through stubs; the host process environment is never written.
//!
//! Every stub records the value it replaced the first time a key is stubbed,
//! so `unstub_all_*` restores exactly the state from before the first stub,
//! including "was not set".

use std::collections::BTreeMap;

use otter_test_mock::Value;
use parking_lot::Mutex;
use tracing::debug;

/// Patterns that are never copied from the host.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "AWS_*",
    "*_SECRET*",
    "*_TOKEN*",
    "*_PASSWORD",
    "*_API_KEY",
    "*_PRIVATE_*",
];

#[derive(Debug, Default)]
struct EnvState {
    vars: BTreeMap<String, String>,
    env_priors: BTreeMap<String, Option<String>>,
    globals: BTreeMap<String, Value>,
    global_priors: BTreeMap<String, Option<Value>>,
}

/// Environment variables and globals visible to one execution context.
#[derive(Debug, Default)]
pub struct EnvStore {
    state: Mutex<EnvState>,
}

impl EnvStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> EnvStoreBuilder {
        EnvStoreBuilder::new()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().vars.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().vars.contains_key(key)
    }

    /// All visible variables.
    pub fn vars(&self) -> BTreeMap<String, String> {
        self.state.lock().vars.clone()
    }

    /// Set or remove a base variable. Not recorded as a stub.
    pub fn set(&self, key: &str, value: Option<String>) {
        let mut state = self.state.lock();
        match value {
            Some(value) => state.vars.insert(key.to_string(), value),
            None => state.vars.remove(key),
        };
    }

    /// Override `key` until the next [`unstub_all_envs`](Self::unstub_all_envs).
    ///
    /// `None` removes the variable.
    pub fn stub_env(&self, key: &str, value: Option<&str>) {
        let mut state = self.state.lock();
        let prior = state.vars.get(key).cloned();
        state.env_priors.entry(key.to_string()).or_insert(prior);
        match value {
            Some(value) => state.vars.insert(key.to_string(), value.to_string()),
            None => state.vars.remove(key),
        };
    }

    /// Restore every stubbed variable. Calling it again is a no-op.
    pub fn unstub_all_envs(&self) {
        let mut state = self.state.lock();
        let priors = std::mem::take(&mut state.env_priors);
        if !priors.is_empty() {
            debug!(count = priors.len(), "restoring stubbed env vars");
        }
        for (key, prior) in priors {
            match prior {
                Some(value) => state.vars.insert(key, value),
                None => state.vars.remove(&key),
            };
        }
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.state.lock().globals.get(name).cloned()
    }

    /// Override global `name` until the next [`unstub_all_globals`](Self::unstub_all_globals).
    pub fn stub_global(&self, name: &str, value: Value) {
        let mut state = self.state.lock();
        let prior = state.globals.get(name).cloned();
        state.global_priors.entry(name.to_string()).or_insert(prior);
        state.globals.insert(name.to_string(), value);
    }

    /// Restore every stubbed global. Calling it again is a no-op.
    pub fn unstub_all_globals(&self) {
        let mut state = self.state.lock();
        let priors = std::mem::take(&mut state.global_priors);
        for (name, prior) in priors {
            match prior {
                Some(value) => state.globals.insert(name, value),
                None => state.globals.remove(&name),
            };
        }
    }

    /// Whether any stub is outstanding.
    pub fn has_stubs(&self) -> bool {
        let state = self.state.lock();
        !state.env_priors.is_empty() || !state.global_priors.is_empty()
    }
}

/// Builder for [`EnvStore`].
#[derive(Debug, Clone)]
pub struct EnvStoreBuilder {
    explicit: BTreeMap<String, String>,
    passthrough: Vec<String>,
    deny_patterns: Vec<String>,
}

impl Default for EnvStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvStoreBuilder {
    pub fn new() -> Self {
        Self {
            explicit: BTreeMap::new(),
            passthrough: Vec::new(),
            deny_patterns: DEFAULT_DENY_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Set an explicit variable. Explicit variables ignore deny patterns.
    pub fn explicit(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.explicit.insert(key.into(), value.into());
        self
    }

    pub fn explicit_vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.explicit.extend(vars);
        self
    }

    /// Copy host variables matching any of `patterns` (`*`, `PREFIX*`, `*SUFFIX`, `*INNER*`).
    pub fn passthrough(mut self, patterns: &[&str]) -> Self {
        self.passthrough
            .extend(patterns.iter().map(|s| s.to_string()));
        self
    }

    pub fn deny_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.deny_patterns.push(pattern.into());
        self
    }

    pub fn without_default_deny_patterns(mut self) -> Self {
        self.deny_patterns
            .retain(|p| !DEFAULT_DENY_PATTERNS.contains(&p.as_str()));
        self
    }

    pub fn build(self) -> EnvStore {
        self.build_from(std::env::vars())
    }

    /// Build against an explicit host snapshot.
    pub fn build_from(self, host: impl IntoIterator<Item = (String, String)>) -> EnvStore {
        let mut vars: BTreeMap<String, String> = host
            .into_iter()
            .filter(|(key, _)| {
                self.passthrough.iter().any(|p| matches_pattern(p, key))
                    && !self.deny_patterns.iter().any(|p| matches_pattern(p, key))
            })
            .collect();
        vars.extend(self.explicit);
        EnvStore {
            state: Mutex::new(EnvState {
                vars,
                ..Default::default()
            }),
        }
    }
}

/// Simple glob match: `*`, `FOO*`, `*FOO`, `*FOO*` or exact.
fn matches_pattern(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let starts_with_star = pattern.starts_with('*');
    let ends_with_star = pattern.len() > 1 && pattern.ends_with('*');

    match (starts_with_star, ends_with_star) {
        (true, true) => key.contains(&pattern[1..pattern.len() - 1]),
        (true, false) => key.ends_with(&pattern[1..]),
        (false, true) => key.starts_with(&pattern[..pattern.len() - 1]),
        (false, false) => pattern == key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Vec<(String, String)> {
        vec![
            ("HOME".to_string(), "/home/me".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
            ("GITHUB_TOKEN".to_string(), "secret".to_string()),
        ]
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("*", "ANY"));
        assert!(matches_pattern("AWS_*", "AWS_REGION"));
        assert!(matches_pattern("*_KEY", "API_KEY"));
        assert!(matches_pattern("*_SECRET*", "MY_SECRET_VALUE"));
        assert!(!matches_pattern("HOME", "HOMEBREW"));
    }

    #[test]
    fn test_passthrough_respects_deny() {
        let store = EnvStore::builder()
            .passthrough(&["*"])
            .explicit("NODE_ENV", "test")
            .build_from(host());
        assert_eq!(store.get("HOME").as_deref(), Some("/home/me"));
        assert_eq!(store.get("NODE_ENV").as_deref(), Some("test"));
        assert!(store.get("GITHUB_TOKEN").is_none());
    }

    #[test]
    fn test_stub_and_restore() {
        let store = EnvStore::builder()
            .passthrough(&["HOME"])
            .build_from(host());

        store.stub_env("HOME", Some("/tmp"));
        store.stub_env("HOME", Some("/tmp2"));
        store.stub_env("NEW_VAR", Some("1"));
        store.stub_env("PATH", None);
        assert_eq!(store.get("HOME").as_deref(), Some("/tmp2"));
        assert!(store.has_stubs());

        store.unstub_all_envs();
        assert_eq!(store.get("HOME").as_deref(), Some("/home/me"));
        assert!(!store.contains("NEW_VAR"));
        assert!(!store.contains("PATH"));

        // idempotent
        store.unstub_all_envs();
        assert_eq!(store.get("HOME").as_deref(), Some("/home/me"));
        assert!(!store.has_stubs());
    }

    #[test]
    fn test_stub_global() {
        let store = EnvStore::new();
        store.stub_global("fetch", Value::from("mocked"));
        assert_eq!(store.global("fetch"), Some(Value::from("mocked")));
        store.unstub_all_globals();
        assert!(store.global("fetch").is_none());
        store.unstub_all_globals();
        assert!(store.global("fetch").is_none());
    }
}
