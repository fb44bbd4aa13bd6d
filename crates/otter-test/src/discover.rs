//! Test file discovery

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::config::TestConfig;
use crate::error::ConfigError;

/// Compile an include pattern. Only the file-name part is matched:
/// `**/*.test.*` matches any file whose name looks like `x.test.js`.
fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    let name = pattern.rsplit('/').next().unwrap_or(pattern);
    let mut re = String::from("^");
    for ch in name.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Ok(Regex::new(&re)?)
}

fn is_hidden_or_vendored(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    entry.file_type().is_dir() && (name.starts_with('.') || name == "node_modules")
}

/// Find test files under `root`, sorted.
pub fn discover_test_files(root: &Path, config: &TestConfig) -> Result<Vec<PathBuf>, ConfigError> {
    let patterns = config
        .include
        .iter()
        .map(|p| compile(p))
        .collect::<Result<Vec<_>, _>>()?;

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_hidden_or_vendored(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            patterns.iter().any(|p| p.is_match(&name))
        })
        .filter(|e| {
            let relative = e.path().strip_prefix(root).unwrap_or(e.path());
            !config.is_excluded(&relative.to_string_lossy())
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();

    debug!(root = %root.display(), count = files.len(), "discovered test files");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_compile() {
        let re = compile("**/*.test.*").unwrap();
        assert!(re.is_match("math.test.ts"));
        assert!(!re.is_match("math.ts"));
        assert!(compile("*_test.?s").unwrap().is_match("a_test.js"));
    }

    #[test]
    fn test_discover() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for file in [
            "src/math.test.js",
            "src/math.js",
            "src/deep/api.spec.ts",
            "src/util_test.js",
            "node_modules/pkg/index.test.js",
            ".cache/x.test.js",
            "dist/out.test.js",
        ] {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "").unwrap();
        }

        let found = discover_test_files(root, &TestConfig::default()).unwrap();
        let relative: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(
            relative,
            vec!["src/deep/api.spec.ts", "src/math.test.js", "src/util_test.js"]
        );
    }
}
