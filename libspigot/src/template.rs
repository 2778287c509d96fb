//! Message templates
//!
//! A template is plain text with `%name%` placeholders, each replaced by the
//! first value of the entry field `name`. Unknown fields render as nothing.

use crate::types::RawEntry;

const MARKER: char = '%';

/// Render `template` against an entry's fields
pub fn render(template: &str, entry: &RawEntry) -> String {
    render_with(template, |name| entry.field(name))
}

/// Render `template`, resolving placeholder names with `lookup`
///
/// Substituted values are not scanned again, and any `%` that does not open a
/// well-formed placeholder is kept as-is.
pub fn render_with<'a, F>(template: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(MARKER) {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find(MARKER) {
            Some(end) if is_field_name(&after[..end]) => {
                out.push_str(lookup(&after[..end]).unwrap_or(""));
                rest = &after[end + 1..];
            }
            _ => {
                out.push(MARKER);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Names of all placeholders in a template, in order of appearance
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    render_with(template, |name| {
        names.push(name.to_string());
        None
    });
    names
}

fn is_field_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Rewrite pre-2.2 `$t` / `$l` placeholders to `%title%` / `%link%`
///
/// Returns `None` when the template has nothing to upgrade. A template that
/// already uses `%name%` placeholders is never rewritten, so a literal `$tax`
/// next to `%title%` survives.
pub fn upgrade_legacy_placeholders(template: &str) -> Option<String> {
    if !has_legacy_placeholders(template) {
        return None;
    }
    Some(template.replace("$t", "%title%").replace("$l", "%link%"))
}

/// True for templates written only in the pre-2.2 `$t` / `$l` style
pub fn has_legacy_placeholders(template: &str) -> bool {
    has_dollar_markers(template) && placeholders(template).is_empty()
}

/// True when `$t` / `$l` appear next to `%name%` placeholders
///
/// Such templates are left alone; the `$` text renders literally.
pub fn mixes_placeholder_styles(template: &str) -> bool {
    has_dollar_markers(template) && !placeholders(template).is_empty()
}

fn has_dollar_markers(template: &str) -> bool {
    template.contains("$t") || template.contains("$l")
}
