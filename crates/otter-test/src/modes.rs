//! Mode interpretation: `.only`, skip/todo propagation, and the name filter
//!
//! Runs once per file after collection. Afterwards every node is `Run`,
//! `Skip`, or `Todo`; `Only` never survives.

use regex::Regex;

use crate::error::CollectionError;
use crate::tree::{Mode, Suite, Task};

/// Options that shape interpretation.
#[derive(Debug, Clone, Default)]
pub struct ModeOptions {
    /// Full-name filter; non-matching tests are skipped.
    pub name_filter: Option<Regex>,
    /// When false, any `.only` fails collection for the file.
    pub allow_only: bool,
}

/// Resolve the modes of a collected file in place.
pub fn interpret_modes(root: &mut Suite, options: &ModeOptions) -> Result<(), CollectionError> {
    let only_mode = root.has_only();
    if only_mode && !options.allow_only {
        let name = first_only(root).unwrap_or_default();
        return Err(CollectionError::OnlyNotAllowed { name });
    }
    traverse(root, false, only_mode, options);
    Ok(())
}

fn first_only(suite: &Suite) -> Option<String> {
    suite.children.iter().find_map(|child| match child {
        Task::Test(t) if t.mode == Mode::Only => Some(t.full_name.clone()),
        Task::Suite(s) if s.mode == Mode::Only => Some(s.full_name.clone()),
        Task::Suite(s) => first_only(s),
        Task::Test(_) => None,
    })
}

fn traverse(suite: &mut Suite, parent_is_only: bool, only_mode: bool, options: &ModeOptions) {
    let suite_is_only = parent_is_only || suite.mode == Mode::Only;

    for child in &mut suite.children {
        let include = suite_is_only || child.mode() == Mode::Only;

        if only_mode {
            let kept_suite = matches!(child, Task::Suite(s) if include || s.has_only());
            if kept_suite || child.mode() == Mode::Only {
                if child.mode() == Mode::Only {
                    child.set_mode(Mode::Run);
                }
            } else if child.mode() == Mode::Run && !include {
                child.set_mode(Mode::Skip);
            }
        }

        match child {
            Task::Test(test) => {
                if let Some(filter) = &options.name_filter
                    && !filter.is_match(&test.full_name)
                {
                    test.mode = Mode::Skip;
                }
            }
            Task::Suite(s) => match s.mode {
                Mode::Skip => mark_all(s, Mode::Skip),
                Mode::Todo => mark_all(s, Mode::Todo),
                _ => traverse(s, include, only_mode, options),
            },
        }
    }

    let runnable = suite.children.iter().any(|c| c.mode() == Mode::Run);
    if suite.mode == Mode::Run && !suite.children.is_empty() && !runnable {
        suite.mode = Mode::Skip;
    }
}

/// Push a skip or todo down to every runnable descendant.
fn mark_all(suite: &mut Suite, mode: Mode) {
    for child in &mut suite.children {
        if matches!(child.mode(), Mode::Run | Mode::Only) {
            child.set_mode(mode);
            if let Task::Suite(s) = child {
                mark_all(s, mode);
            }
        }
    }
}
