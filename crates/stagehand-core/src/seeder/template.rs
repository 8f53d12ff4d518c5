//! `${NAME}` substitution for seeded files. `$$` renders a literal `$`.
use std::collections::BTreeMap;
use std::path::Path;

use crate::seeder::error::SeedError;

fn is_name(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Substitute every `${NAME}` in `input`; an unknown name is an error.
/// Text that merely looks similar (`${ not closed`, `${1x}`) is left as is.
pub fn render(input: &str, vars: &BTreeMap<String, String>, destination: &Path) -> Result<String, SeedError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        output.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$$") {
            output.push('$');
            rest = after;
            continue;
        }
        if let Some(body) = tail.strip_prefix("${") {
            if let Some(end) = body.find('}') {
                let name = &body[..end];
                if is_name(name) {
                    let value = vars.get(name).ok_or_else(|| SeedError::MissingVariable {
                        name: name.to_string(),
                        destination: destination.to_path_buf(),
                    })?;
                    output.push_str(value);
                    rest = &body[end + 1..];
                    continue;
                }
            }
        }
        output.push('$');
        rest = &tail[1..];
    }
    output.push_str(rest);
    Ok(output)
}
