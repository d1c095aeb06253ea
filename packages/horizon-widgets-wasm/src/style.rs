// Style resolution for loaded overlay features.
//
// Every style attribute is looked up through an ordered list of property aliases.
// The first alias holding a value decides the attribute, its converter turns
// the raw value into the typed style field.
use lazy_static::lazy_static;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const DEFAULT_STROKE_COLOR: &str = "#808080";
pub const DEFAULT_FILL_COLOR: &str = "#800080";
pub const FILL_ONLY_STROKE_COLOR: &str = "#D3D3D3";
pub const DEFAULT_WEIGHT: f64 = 2.0;
pub const DEFAULT_OPACITY: f64 = 1.0;
pub const DEFAULT_FILL_OPACITY: f64 = 0.2;
pub const DEFAULT_POINT_OPACITY: f64 = 1.0;
pub const DEFAULT_POINT_FILL_OPACITY: f64 = 1.0;
pub const DEFAULT_RADIUS: f64 = 4.0;

// SimpleStyle marker-size keywords
const MARKER_SIZE_SMALL: f64 = 3.0;
const MARKER_SIZE_MEDIUM: f64 = 5.0;
const MARKER_SIZE_LARGE: f64 = 7.0;

lazy_static! {
    static ref NAMED_COLORS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("red", "#FF0000");
        m.insert("green", "#008000");
        m.insert("blue", "#0000FF");
        m.insert("yellow", "#FFFF00");
        m.insert("orange", "#FFA500");
        m.insert("purple", "#800080");
        m.insert("black", "#000000");
        m.insert("white", "#FFFFFF");
        m.insert("gray", "#808080");
        m.insert("grey", "#808080");
        m.insert("pink", "#FFC0CB");
        m.insert("brown", "#A52A2A");
        m.insert("cyan", "#00FFFF");
        m.insert("magenta", "#FF00FF");
        m
    };
}

/// Style options handed to the map layer, named after the Leaflet path options.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyledFeature {
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
    pub fill_color: String,
    pub fill_opacity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dash_array: Option<String>,
    pub radius: f64,
}

type Converter<T> = fn(&Value) -> Option<T>;

/// A property lookup: `style.<key>` reads from the nested `style` object.
#[derive(Clone, Copy)]
enum Alias {
    Top(&'static str),
    Nested(&'static str),
}

const STROKE_COLOR: &[(Alias, Converter<String>)] = &[
    (Alias::Nested("color"), color_value),
    (Alias::Nested("stroke"), color_value),
    (Alias::Top("stroke"), color_value),
    (Alias::Top("stroke-color"), color_value),
    (Alias::Top("color"), color_value),
    (Alias::Top("outline-color"), color_value),
    (Alias::Top("outlineColor"), color_value),
    (Alias::Top("border-color"), color_value),
    (Alias::Top("borderColor"), color_value),
    (Alias::Top("line-color"), color_value),
    (Alias::Top("lineColor"), color_value),
];

const STROKE_WIDTH: &[(Alias, Converter<f64>)] = &[
    (Alias::Nested("weight"), number_value),
    (Alias::Nested("width"), number_value),
    (Alias::Top("stroke-width"), number_value),
    (Alias::Top("strokeWidth"), number_value),
    (Alias::Top("weight"), number_value),
    (Alias::Top("width"), number_value),
    (Alias::Top("line-width"), number_value),
    (Alias::Top("lineWidth"), number_value),
    (Alias::Top("border-width"), number_value),
    (Alias::Top("borderWidth"), number_value),
];

const STROKE_OPACITY: &[(Alias, Converter<f64>)] = &[
    (Alias::Nested("opacity"), number_value),
    (Alias::Top("stroke-opacity"), number_value),
    (Alias::Top("strokeOpacity"), number_value),
    (Alias::Top("opacity"), number_value),
    (Alias::Top("line-opacity"), number_value),
    (Alias::Top("lineOpacity"), number_value),
];

const FILL_COLOR: &[(Alias, Converter<String>)] = &[
    (Alias::Nested("fillColor"), color_value),
    (Alias::Nested("fill"), color_value),
    (Alias::Top("fill"), color_value),
    (Alias::Top("fill-color"), color_value),
    (Alias::Top("fillColor"), color_value),
    (Alias::Top("background-color"), color_value),
    (Alias::Top("backgroundColor"), color_value),
];

const FILL_OPACITY: &[(Alias, Converter<f64>)] = &[
    (Alias::Nested("fillOpacity"), number_value),
    (Alias::Top("fill-opacity"), number_value),
    (Alias::Top("fillOpacity"), number_value),
];

const DASH_PATTERN: &[(Alias, Converter<String>)] = &[
    (Alias::Nested("dashArray"), dash_value),
    (Alias::Top("dashArray"), dash_value),
    (Alias::Top("dash-array"), dash_value),
    (Alias::Top("stroke-dasharray"), dash_value),
    (Alias::Top("strokeDasharray"), dash_value),
];

const POINT_RADIUS: &[(Alias, Converter<f64>)] = &[
    (Alias::Nested("radius"), number_value),
    (Alias::Top("marker-size"), marker_size_value),
    (Alias::Top("markerSize"), marker_size_value),
    (Alias::Top("radius"), number_value),
    (Alias::Top("point-radius"), number_value),
    (Alias::Top("pointRadius"), number_value),
    (Alias::Top("size"), marker_size_value),
];

// Marker colours take precedence over the generic aliases for point features
const MARKER_COLOR: &[(Alias, Converter<String>)] = &[
    (Alias::Top("marker-color"), color_value),
    (Alias::Top("markerColor"), color_value),
];

fn lookup<'a>(properties: &'a Map<String, Value>, alias: Alias) -> Option<&'a Value> {
    let value = match alias {
        Alias::Top(key) => properties.get(key),
        Alias::Nested(key) => properties
            .get("style")
            .and_then(|style| style.as_object())
            .and_then(|style| style.get(key)),
    };
    value.filter(|v| !v.is_null())
}

/// Outer `None`: no alias holds a value. Inner `None`: the winning value did not convert.
fn first_alias<T>(properties: &Map<String, Value>, aliases: &[(Alias, Converter<T>)]) -> Option<Option<T>> {
    aliases
        .iter()
        .find_map(|(alias, convert)| lookup(properties, *alias).map(|value| convert(value)))
}

fn lookup_chain<T>(
    properties: &Map<String, Value>,
    chain: &[&[(Alias, Converter<T>)]],
) -> Option<Option<T>> {
    chain.iter().find_map(|aliases| first_alias(properties, aliases))
}

fn color_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(normalize_color(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float(s),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn marker_size_value(value: &Value) -> Option<f64> {
    if let Value::String(s) = value {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => return Some(MARKER_SIZE_SMALL),
            "medium" => return Some(MARKER_SIZE_MEDIUM),
            "large" => return Some(MARKER_SIZE_LARGE),
            _ => {}
        }
    }
    number_value(value)
}

fn dash_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(parts) => {
            let parts: Vec<String> = parts
                .iter()
                .filter_map(number_value)
                .map(|n| n.to_string())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(","))
            }
        }
        _ => None,
    }
}

/// Parse the leading decimal number of a string, ignoring trailing units ("3px" -> 3).
pub fn parse_float(input: &str) -> Option<f64> {
    let s = input.trim_start();
    let mut end = 0;
    let mut best = None;
    for (i, c) in s.char_indices() {
        if !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')) {
            break;
        }
        end = i + c.len_utf8();
        if let Ok(v) = s[..end].parse::<f64>() {
            best = Some(v);
        }
    }
    best
}

/// Normalize a colour string.
///
/// 6- or 8-digit hex (with or without `#`) becomes `#RRGGBB` with the alpha
/// channel dropped; known colour names map to their hex value regardless of
/// case. Anything else is returned unchanged.
pub fn normalize_color(input: &str) -> String {
    let trimmed = input.trim();
    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if (hex.len() == 6 || hex.len() == 8) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return format!("#{}", &hex[..6]);
    }
    if let Some(named) = NAMED_COLORS.get(trimmed.to_ascii_lowercase().as_str()) {
        return (*named).to_string();
    }
    input.to_string()
}

struct Resolved {
    stroke: Option<String>,
    fill: Option<String>,
}

fn resolve_colors(properties: &Map<String, Value>, point: bool) -> Resolved {
    let (stroke, fill) = if point {
        (
            lookup_chain(properties, &[MARKER_COLOR, STROKE_COLOR]),
            lookup_chain(properties, &[MARKER_COLOR, FILL_COLOR]),
        )
    } else {
        (first_alias(properties, STROKE_COLOR), first_alias(properties, FILL_COLOR))
    };
    Resolved {
        stroke: stroke.flatten(),
        fill: fill.flatten(),
    }
}

fn resolve(properties: &Map<String, Value>, point: bool) -> StyledFeature {
    let colors = resolve_colors(properties, point);
    let (default_opacity, default_fill_opacity) = if point {
        (DEFAULT_POINT_OPACITY, DEFAULT_POINT_FILL_OPACITY)
    } else {
        (DEFAULT_OPACITY, DEFAULT_FILL_OPACITY)
    };

    // Fill-only features get a light outline instead of the default stroke
    let color = match (&colors.stroke, &colors.fill) {
        (Some(stroke), _) => stroke.clone(),
        (None, Some(_)) => FILL_ONLY_STROKE_COLOR.to_string(),
        (None, None) => DEFAULT_STROKE_COLOR.to_string(),
    };

    StyledFeature {
        color,
        weight: first_alias(properties, STROKE_WIDTH).flatten().unwrap_or(DEFAULT_WEIGHT),
        opacity: first_alias(properties, STROKE_OPACITY)
            .flatten()
            .unwrap_or(default_opacity),
        fill_color: colors.fill.unwrap_or_else(|| DEFAULT_FILL_COLOR.to_string()),
        fill_opacity: first_alias(properties, FILL_OPACITY)
            .flatten()
            .unwrap_or(default_fill_opacity),
        dash_array: first_alias(properties, DASH_PATTERN).flatten(),
        radius: first_alias(properties, POINT_RADIUS).flatten().unwrap_or(DEFAULT_RADIUS),
    }
}

/// Resolve the path style (lines and polygons) of a feature.
pub fn resolve_style(properties: &Map<String, Value>) -> StyledFeature {
    resolve(properties, false)
}

/// Resolve the circle-marker style of a point feature.
pub fn resolve_point_style(properties: &Map<String, Value>) -> StyledFeature {
    resolve(properties, true)
}
