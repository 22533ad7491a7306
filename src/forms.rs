use crate::settings::{CODE_FIELD, Site};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

pub const SITE_FIELDSET: &str = "libnamic_googleanalytics";
pub const SITE_FIELDSET_LABEL: &str = "Libnamic Google Analytics";
pub const SITE_FIELD_LABEL: &str = "Google Analytics tracking code for this site. Input \"-\" if none should be used (not even the global code)";
pub const GLOBAL_FIELD_LABEL: &str = "Google Analytics tracking code";

#[derive(Debug, Error)]
pub enum FormError {
    #[error("form invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Module configuration form carrying the global tracking code.
pub struct ConfigForm;

impl ConfigForm {
    pub fn render(record: &Map<String, Value>, action: &str, errors: &[String]) -> String {
        let value = record
            .get(CODE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut html = String::from("<form method=\"post\" action=\"");
        html.push_str(&escape_attr(action));
        html.push_str("\">\n");
        push_errors(&mut html, errors);
        push_text_field(&mut html, CODE_FIELD, CODE_FIELD, GLOBAL_FIELD_LABEL, value);
        html.push_str("<button type=\"submit\">Save</button>\n</form>\n");
        html
    }

    /// Validates posted params into the record stored under the global key.
    pub fn handle(params: &HashMap<String, String>) -> Result<Map<String, Value>, FormError> {
        let Some(code) = params.get(CODE_FIELD) else {
            return Err(FormError::Invalid(vec![format!(
                "{CODE_FIELD}: value is required"
            )]));
        };
        let mut record = Map::new();
        record.insert(CODE_FIELD.to_string(), Value::String(code.clone()));
        Ok(record)
    }
}

/// Per-site fieldset appended to the site settings form.
pub struct SiteSettingsFieldset;

impl SiteSettingsFieldset {
    pub fn field_name() -> String {
        format!("{SITE_FIELDSET}[{CODE_FIELD}]")
    }

    pub fn render(site: &Site, current_code: &str, action: &str) -> String {
        let mut html = String::from("<form method=\"post\" action=\"");
        html.push_str(&escape_attr(action));
        html.push_str("\">\n");
        html.push_str(&format!(
            "<fieldset name=\"{SITE_FIELDSET}\" action=\"{SITE_FIELDSET}/settings\">\n<legend>{SITE_FIELDSET_LABEL}</legend>\n<p class=\"site\">{}</p>\n",
            escape_attr(if site.title.is_empty() {
                &site.slug
            } else {
                &site.title
            })
        ));
        push_text_field(
            &mut html,
            &Self::field_name(),
            CODE_FIELD,
            SITE_FIELD_LABEL,
            current_code,
        );
        html.push_str("</fieldset>\n<button type=\"submit\">Save</button>\n</form>\n");
        html
    }

    /// Empty values are allowed and a missing field reads as empty.
    pub fn filter(params: &HashMap<String, String>) -> String {
        params
            .get(&Self::field_name())
            .or_else(|| params.get(CODE_FIELD))
            .cloned()
            .unwrap_or_default()
    }
}

fn push_errors(html: &mut String, errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    html.push_str("<ul class=\"errors\">\n");
    for err in errors {
        html.push_str(&format!("<li>{}</li>\n", escape_attr(err)));
    }
    html.push_str("</ul>\n");
}

fn push_text_field(html: &mut String, name: &str, id: &str, label: &str, value: &str) {
    html.push_str(&format!(
        "<label for=\"{id}\">{}</label>\n<input type=\"text\" id=\"{id}\" name=\"{}\" value=\"{}\">\n",
        escape_attr(label),
        escape_attr(name),
        escape_attr(value),
    ));
}

fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
