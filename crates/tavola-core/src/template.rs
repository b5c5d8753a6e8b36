//! Template rendering
//!
//! Placeholders are `{{key}}` tokens (whitespace inside the braces is
//! allowed) replaced by an exact key match from the data bag. There are no
//! nested paths or filters, and placeholders without a value are left in the
//! output verbatim.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tavola_storage::models::EmailTemplate;

/// Rendered subject and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Placeholder substitution renderer
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRenderer;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a stored template's subject and body
    pub fn render(&self, template: &EmailTemplate, data: &Map<String, Value>) -> RenderedEmail {
        RenderedEmail {
            subject: self.render_str(&template.subject, data),
            html: self.render_str(&template.html_content, data),
        }
    }

    /// Substitute placeholders in a single string
    pub fn render_str(&self, text: &str, data: &Map<String, Value>) -> String {
        placeholder()
            .replace_all(text, |caps: &Captures| match data.get(&caps[1]) {
                Some(value) => value_to_string(value),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_exact_keys() {
        let renderer = TemplateRenderer::new();
        let template = EmailTemplate::new(
            "booking_confirmation",
            "Booking at {{restaurant_name}}",
            "<p>Hi {{ recipient_name }}, table for {{guest_text}} ({{party_size}}).</p>",
        );
        let rendered = renderer.render(
            &template,
            &data(json!({
                "restaurant_name": "Trattoria",
                "recipient_name": "Ada",
                "guest_text": "4 guests",
                "party_size": 4
            })),
        );

        assert_eq!(rendered.subject, "Booking at Trattoria");
        assert_eq!(
            rendered.html,
            "<p>Hi Ada, table for 4 guests (4).</p>"
        );
    }

    #[test]
    fn test_unresolved_placeholders_stay_verbatim() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render_str(
            "{{known}} {{unknown}} {{booking.date}}",
            &data(json!({ "known": "yes", "booking": { "date": "today" } })),
        );
        assert_eq!(out, "yes {{unknown}} {{booking.date}}");
    }

    #[test]
    fn test_null_and_bool_values() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render_str(
            "[{{notes}}] {{deposit}}",
            &data(json!({ "notes": null, "deposit": false })),
        );
        assert_eq!(out, "[] false");
    }
}
