//! Specifier resolution
//!
//! Maps an import specifier plus the importing module's path to the canonical
//! path used as the key for mock registrations and the module cache.

use std::collections::HashMap;

/// Resolution settings
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Exact or prefix aliases (`"@/"` -> `"/src/"`).
    pub import_map: HashMap<String, String>,

    /// Extensions probed when a specifier has none
    pub extensions: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            import_map: HashMap::new(),
            extensions: vec![
                ".ts".to_string(),
                ".tsx".to_string(),
                ".js".to_string(),
                ".mjs".to_string(),
                ".cjs".to_string(),
                ".jsx".to_string(),
                ".json".to_string(),
            ],
        }
    }
}

/// Resolves specifiers against a set of known module paths.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `specifier` imported from `referrer`.
    ///
    /// `exists` reports whether a candidate path names a known module. When no
    /// probe matches, the normalized candidate is returned so that mocks of
    /// modules that do not exist can still be registered and looked up.
    pub fn resolve(
        &self,
        specifier: &str,
        referrer: Option<&str>,
        exists: impl Fn(&str) -> bool,
    ) -> String {
        let specifier = self.apply_import_map(specifier);

        let candidate = if specifier.starts_with("./") || specifier.starts_with("../") {
            let base = referrer.map(parent_dir).unwrap_or("/");
            normalize(&format!("{base}/{specifier}"))
        } else if specifier.starts_with('/') {
            normalize(&specifier)
        } else {
            // Bare specifiers (packages, builtins) are their own key.
            return specifier;
        };

        if exists(&candidate) {
            return candidate;
        }
        for ext in &self.config.extensions {
            let with_ext = format!("{candidate}{ext}");
            if exists(&with_ext) {
                return with_ext;
            }
        }
        for ext in &self.config.extensions {
            let index = format!("{candidate}/index{ext}");
            if exists(&index) {
                return index;
            }
        }
        candidate
    }

    fn apply_import_map(&self, specifier: &str) -> String {
        if let Some(mapped) = self.config.import_map.get(specifier) {
            return mapped.clone();
        }
        // Longest prefix alias wins.
        let mut best: Option<(&String, &String)> = None;
        for (alias, target) in &self.config.import_map {
            if alias.ends_with('/')
                && specifier.starts_with(alias.as_str())
                && best.is_none_or(|(b, _)| alias.len() > b.len())
            {
                best = Some((alias, target));
            }
        }
        match best {
            Some((alias, target)) => format!("{target}{}", &specifier[alias.len()..]),
            None => specifier.to_string(),
        }
    }
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}

/// Collapse `.` and `..` segments and duplicate slashes.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if absolute { format!("/{joined}") } else { joined }
}
