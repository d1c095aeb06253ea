use serde_json::{Map, Value};

pub const NO_PROPERTIES_HTML: &str = "<em>No properties</em>";

/// Escape text for insertion into popup markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

/// Build the popup body listing every property of a feature.
pub fn build_popup_html(properties: Option<&Map<String, Value>>) -> String {
    let properties = match properties {
        Some(p) if !p.is_empty() => p,
        _ => return NO_PROPERTIES_HTML.to_string(),
    };

    properties
        .iter()
        .map(|(key, value)| {
            let body = escape_html(&display_value(value));
            let body = if matches!(value, Value::Object(_) | Value::Array(_)) {
                format!("<pre>{}</pre>", body)
            } else {
                body
            };
            format!(
                "<div class=\"overlay-popup-entry\"><strong>{}</strong><br>{}</div>",
                escape_html(key),
                body
            )
        })
        .collect::<Vec<_>>()
        .join("<div class=\"overlay-popup-spacer\" style=\"height:6px\"></div>")
}
