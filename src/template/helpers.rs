//! Helper functions exposed to every template.

use handlebars::{handlebars_helper, Handlebars, JsonValue};

handlebars_helper!(upper: |value: Json| display(value).to_uppercase());
handlebars_helper!(lower: |value: Json| display(value).to_lowercase());
handlebars_helper!(title: |value: Json| title_case(&display(value)));
handlebars_helper!(markdown: |value: Json| escape_markdown(&display(value)));
// Separator first, so `{{join ", " labels}}` reads like the call it makes.
handlebars_helper!(join: |sep: Json, items: Json| join_values(&display(sep), items));

/// Registers all helpers on `registry`.
pub fn register(registry: &mut Handlebars<'_>) {
    registry.register_helper("upper", Box::new(upper));
    registry.register_helper("lower", Box::new(lower));
    registry.register_helper("title", Box::new(title));
    registry.register_helper("markdown", Box::new(markdown));
    registry.register_helper("join", Box::new(join));
}

/// Renders a JSON value the way it appears in template output. Missing
/// values arrive as `null` and render as the empty string.
pub fn display(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn join_values(sep: &str, items: &JsonValue) -> String {
    match items {
        JsonValue::Array(values) => values
            .iter()
            .map(display)
            .collect::<Vec<_>>()
            .join(sep),
        JsonValue::Object(map) => map.values().map(display).collect::<Vec<_>>().join(sep),
        other => display(other),
    }
}

/// Upper-cases the first letter of every whitespace-separated word.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            at_word_start = false;
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Backslash-escapes `_`, `*` and backtick. Only ASCII characters are
/// considered; everything else passes through untouched.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '_' | '*' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
