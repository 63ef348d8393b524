//! Prompt templates.
//!
//! `{name}` is replaced by the binding of the same name; `{{` and `}}`
//! produce literal braces. Placeholders without a binding, and braces that
//! do not form a placeholder, are left as written.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
});

pub type Bindings<'a> = HashMap<&'a str, String>;

pub fn render(template: &str, bindings: &Bindings<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match &caps[0] {
            "{{" => "{".to_string(),
            "}}" => "}".to_string(),
            whole => bindings
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| whole.to_string()),
        })
        .into_owned()
}
