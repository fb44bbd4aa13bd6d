//! Name templates for parameterized tests and suites
//!
//! Supported placeholders:
//!
//! | placeholder | meaning |
//! |---|---|
//! | `%s` | value as a string |
//! | `%d`, `%i` | number, `%i` truncated to an integer |
//! | `%f` | floating point number |
//! | `%j`, `%o`, `%O` | JSON |
//! | `%#` | zero-based row index |
//! | `%$` | one-based row index |
//! | `%%` | a literal `%` |
//! | `$name`, `$a.b` | property of an object row |
//! | `$0`, `$1` | element of an array row |

use serde_json::Value as Json;

/// Arguments a row spreads into: array rows positionally, anything else as one argument.
pub fn row_args(row: &Json) -> Vec<Json> {
    match row {
        Json::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Interpolate `template` with `row`, the `index`-th row of the table.
///
/// One pass over the template: substituted values are never interpolated again.
pub fn format_name(template: &str, row: &Json, index: usize) -> String {
    let args = row_args(row);
    let mut next_arg = args.iter();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['%', '$']) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let consumed = if rest[pos..].starts_with('%') {
            placeholder(after, &mut next_arg, index, &mut out)
        } else {
            property(after, row, &args, &mut out)
        };
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}

/// Expand the `%` placeholder at the start of `after`. Returns bytes consumed.
fn placeholder(after: &str, args: &mut std::slice::Iter<'_, Json>, index: usize, out: &mut String) -> usize {
    let Some(spec) = after.chars().next() else {
        out.push('%');
        return 0;
    };
    match spec {
        '%' => out.push('%'),
        '#' => out.push_str(&index.to_string()),
        '$' => out.push_str(&(index + 1).to_string()),
        's' | 'd' | 'i' | 'f' | 'j' | 'o' | 'O' => match args.next() {
            Some(arg) => out.push_str(&format_arg(spec, arg)),
            None => {
                out.push('%');
                out.push(spec);
            }
        },
        _ => {
            out.push('%');
            return 0;
        }
    }
    spec.len_utf8()
}

fn format_arg(spec: char, arg: &Json) -> String {
    match spec {
        's' => match arg {
            Json::String(s) => s.clone(),
            other => display(other),
        },
        'd' => match arg.as_f64() {
            Some(n) => format_number(n),
            None => "NaN".to_string(),
        },
        'i' => match arg.as_f64() {
            Some(n) => format_number(n.trunc()),
            None => "NaN".to_string(),
        },
        'f' => match arg.as_f64() {
            Some(n) => n.to_string(),
            None => "NaN".to_string(),
        },
        _ => arg.to_string(),
    }
}

fn format_number(n: f64) -> String {
    otter_test_mock::value::format_number(n)
}

/// Display a value the way it appears inside a test name.
fn display(value: &Json) -> String {
    match value {
        Json::String(s) => format!("'{s}'"),
        Json::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

/// Expand the `$key` reference at the start of `after`. Returns bytes consumed.
fn property(after: &str, row: &Json, args: &[Json], out: &mut String) -> usize {
    let object_row = row.is_object();
    let key_len = after
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.' || c == '$'))
        .unwrap_or(after.len());
    let key = after[..key_len].trim_end_matches('.');

    let index_key = !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit());
    let value = if key.is_empty() || (!object_row && !index_key) {
        None
    } else if object_row {
        lookup(row, key)
    } else {
        key.parse::<usize>().ok().and_then(|i| args.get(i)).cloned()
    };

    match value {
        Some(value) => out.push_str(&display(&value)),
        None if key.is_empty() || !object_row => {
            out.push('$');
            out.push_str(key);
        }
        None => out.push_str("undefined"),
    }
    key.len()
}

fn lookup(value: &Json, path: &str) -> Option<Json> {
    path.split('.')
        .try_fold(value, |current, segment| match current {
            Json::Object(map) => map.get(segment),
            Json::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .cloned()
}
