// Full 360° panorama export.
//
// The on-screen panorama only shows part of the horizon. The exporter
// redraws the whole profile at a fixed detail floor, places rise/set markers
// and their labels, and hands the drawing calls to a `PanoramaSurface`.
// Everything here is plain coordinate math; the browser canvas lives in
// `panorama_bindings`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::style::normalize_color;

pub const MIN_EXPORT_WIDTH: u32 = 3600;

/// Vertical window of the on-screen view, in degrees.
pub const VIEW_WINDOW_DEGREES: f64 = 10.0;
pub const GROUND_DEGREES: f64 = 10.0;
pub const LABEL_CLEARANCE_DEGREES: f64 = 2.0;
pub const SKY_MARGIN_DEGREES: f64 = 2.0;

pub const SOLAR_DIAMETER_DEGREES: f64 = 0.533;
pub const LUNAR_DIAMETER_DEGREES: f64 = 0.518;
pub const MIN_MARKER_RADIUS: f64 = 3.0;
pub const MARKER_FILL_ALPHA: f64 = 0.7;
const MARKER_STROKE_RATIO: f64 = 0.15;

/// Hillshade columns overlap slightly so neighbouring columns leave no seams.
pub const HILLSHADE_COLUMN_WIDTH: f64 = 1.5;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No panorama profile data available. Calculate a panorama first.")]
    EmptyProfile,

    #[error("Panorama canvas '{0}' not found")]
    MissingCanvas(String),

    #[error("Unknown panorama kind '{0}'")]
    UnknownKind(String),

    #[error("Failed to render panorama: {0}")]
    Render(String),

    #[error("Invalid {what}: {reason}")]
    InvalidInput { what: &'static str, reason: String },

    #[error("Failed to create PNG image")]
    Blob,

    #[error("Failed to start download: {0}")]
    Download(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Silhouette,
    Hillshade,
}

impl FromStr for SourceKind {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silhouette" => Ok(SourceKind::Silhouette),
            "hillshade" => Ok(SourceKind::Hillshade),
            other => Err(ExportError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AltitudeSegment {
    pub top: f64,
    pub bottom: f64,
    pub color: String,
}

/// One horizon sample; `y` is the altitude in degrees above the horizon.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfilePoint {
    pub y: f64,
    #[serde(default)]
    pub segments: Option<Vec<AltitudeSegment>>,
}

impl ProfilePoint {
    pub fn new(y: f64) -> Self {
        Self { y, segments: None }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiseSetLocation {
    pub label: String,
    #[serde(default)]
    pub azimuth: Option<f64>,
    pub color: String,
    #[serde(default)]
    pub display_label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportOptions {
    pub silhouette_canvas_id: String,
    pub hillshade_canvas_id: String,
    pub min_width: u32,
    pub sky_color: String,
    pub horizon_color: String,
    pub ground_color: String,
    pub label_color: String,
    pub label_font: String,
    pub revoke_delay_ms: i32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            silhouette_canvas_id: "silhouette-canvas".to_string(),
            hillshade_canvas_id: "hillshade-canvas".to_string(),
            min_width: MIN_EXPORT_WIDTH,
            sky_color: "#cfe3f3".to_string(),
            horizon_color: "#55624f".to_string(),
            ground_color: "#26301f".to_string(),
            label_color: "#1a1a1a".to_string(),
            label_font: "bold 14px sans-serif".to_string(),
            revoke_delay_ms: 100,
        }
    }
}

impl ExportOptions {
    pub fn canvas_id(&self, kind: SourceKind) -> &str {
        match kind {
            SourceKind::Silhouette => &self.silhouette_canvas_id,
            SourceKind::Hillshade => &self.hillshade_canvas_id,
        }
    }
}

/// Size and coordinate mapping of the exported image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanoramaLayout {
    pub width: u32,
    pub height: u32,
    pub px_per_deg_x: f64,
    pub px_per_deg_y: f64,
    pub max_altitude: f64,
    pub azimuth_step: f64,
    pub sample_count: usize,
}

/// Highest sample altitude or segment top across the profile.
pub fn max_profile_altitude(profile: &[ProfilePoint]) -> f64 {
    let max = profile
        .iter()
        .flat_map(|p| {
            std::iter::once(p.y).chain(
                p.segments
                    .iter()
                    .flatten()
                    .map(|segment| segment.top),
            )
        })
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if max.is_finite() {
        max
    } else {
        0.0
    }
}

impl PanoramaLayout {
    pub fn new(
        profile: &[ProfilePoint],
        reference_height: f64,
        min_width: u32,
    ) -> Result<Self, ExportError> {
        if profile.is_empty() {
            return Err(ExportError::EmptyProfile);
        }
        Self::from_parts(profile.len(), max_profile_altitude(profile), reference_height, min_width)
    }

    pub fn from_parts(
        sample_count: usize,
        max_altitude: f64,
        reference_height: f64,
        min_width: u32,
    ) -> Result<Self, ExportError> {
        if sample_count == 0 {
            return Err(ExportError::EmptyProfile);
        }
        if !(reference_height.is_finite() && reference_height > 0.0) {
            return Err(ExportError::Render(format!(
                "invalid reference height {}",
                reference_height
            )));
        }

        let width = (sample_count.min(u32::MAX as usize) as u32).max(min_width);
        let px_per_deg_x = width as f64 / 360.0;
        let px_per_deg_y = reference_height / VIEW_WINDOW_DEGREES;
        let required_degrees =
            GROUND_DEGREES + max_altitude + LABEL_CLEARANCE_DEGREES + SKY_MARGIN_DEGREES;
        let height = (required_degrees * px_per_deg_y).ceil().max(1.0) as u32;

        Ok(PanoramaLayout {
            width,
            height,
            px_per_deg_x,
            px_per_deg_y,
            max_altitude,
            azimuth_step: 360.0 / sample_count as f64,
            sample_count,
        })
    }

    /// Altitude shown at the top edge of the image.
    pub fn top_altitude(&self) -> f64 {
        self.max_altitude + LABEL_CLEARANCE_DEGREES + SKY_MARGIN_DEGREES
    }

    pub fn y_for_altitude(&self, altitude: f64) -> f64 {
        (self.top_altitude() - altitude) * self.px_per_deg_y
    }

    pub fn ground_y(&self) -> f64 {
        self.height as f64
    }

    /// Azimuth 360 lands on `width`, the wrap-around column of azimuth 0.
    pub fn x_for_azimuth(&self, azimuth: f64) -> f64 {
        azimuth * self.px_per_deg_x
    }

    pub fn column_azimuth(&self, column: u32) -> f64 {
        column as f64 / self.px_per_deg_x
    }

    /// Nearest profile sample for an azimuth.
    pub fn sample_index_for_azimuth(&self, azimuth: f64) -> usize {
        let azimuth = azimuth.rem_euclid(360.0);
        let index = (azimuth / self.azimuth_step).round() as usize;
        index % self.sample_count
    }

    pub fn terrain_altitude_at(&self, profile: &[ProfilePoint], azimuth: f64) -> f64 {
        profile
            .get(self.sample_index_for_azimuth(azimuth))
            .map(|p| p.y)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CelestialBody {
    Sun,
    Moon,
}

impl CelestialBody {
    pub fn angular_diameter(self) -> f64 {
        match self {
            CelestialBody::Sun => SOLAR_DIAMETER_DEGREES,
            CelestialBody::Moon => LUNAR_DIAMETER_DEGREES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizonEvent {
    Rise,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limb {
    Center,
    Upper,
    Lower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerKind {
    pub body: CelestialBody,
    pub event: HorizonEvent,
    pub limb: Limb,
    /// The label names the disk centre explicitly.
    pub labeled: bool,
}

impl MarkerKind {
    pub fn classify(label: &str) -> Self {
        let lower = label.to_lowercase();
        let body = if lower.contains("moon") || lower.contains("lunar") {
            CelestialBody::Moon
        } else {
            CelestialBody::Sun
        };
        let event = if lower.contains("rise") {
            HorizonEvent::Rise
        } else if lower.contains("set") {
            HorizonEvent::Set
        } else {
            HorizonEvent::Rise
        };
        let limb = if lower.contains("upper") {
            Limb::Upper
        } else if lower.contains("lower") {
            Limb::Lower
        } else {
            Limb::Center
        };
        MarkerKind {
            body,
            event,
            limb,
            labeled: limb == Limb::Center && lower.contains("center"),
        }
    }

    /// Offset of the disk centre from the terrain point, positive = down the image.
    pub fn vertical_offset(&self, radius: f64) -> f64 {
        match (self.event, self.limb) {
            (HorizonEvent::Rise, Limb::Upper) => radius,
            (HorizonEvent::Rise, Limb::Center) => 0.0,
            (HorizonEvent::Rise, Limb::Lower) => -radius,
            (HorizonEvent::Set, Limb::Lower) => -radius,
            (HorizonEvent::Set, Limb::Center) => 0.0,
            (HorizonEvent::Set, Limb::Upper) => radius,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMarker {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub fill: String,
    /// Extra opacity for fills `color_with_alpha` could not convert.
    pub fill_opacity: f64,
    pub stroke_width: f64,
    pub kind: MarkerKind,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLabel {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub guide_top: f64,
    pub guide_bottom: f64,
}

pub fn marker_radius(body: CelestialBody, px_per_deg_y: f64) -> f64 {
    (body.angular_diameter() / 2.0 * px_per_deg_y).max(MIN_MARKER_RADIUS)
}

pub fn label_text(location: &RiseSetLocation) -> String {
    match location.display_label.as_deref().map(str::trim) {
        Some(display) if !display.is_empty() => display.to_string(),
        _ => location
            .label
            .replace("Center", "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Place one marker per location that has an azimuth.
pub fn place_markers(
    layout: &PanoramaLayout,
    profile: &[ProfilePoint],
    locations: &[RiseSetLocation],
) -> Vec<PlacedMarker> {
    locations
        .iter()
        .filter_map(|location| {
            let azimuth = location.azimuth.filter(|a| a.is_finite())?;
            let kind = MarkerKind::classify(&location.label);
            let radius = marker_radius(kind.body, layout.px_per_deg_y);
            let terrain_y = layout.y_for_altitude(layout.terrain_altitude_at(profile, azimuth));

            let fill = color_with_alpha(&location.color, MARKER_FILL_ALPHA);
            let fill_opacity = if fill.starts_with("rgba(") { 1.0 } else { MARKER_FILL_ALPHA };

            Some(PlacedMarker {
                x: layout.x_for_azimuth(azimuth.rem_euclid(360.0)),
                y: terrain_y + kind.vertical_offset(radius),
                radius,
                fill,
                fill_opacity,
                stroke_width: (radius * MARKER_STROKE_RATIO).max(1.0),
                kind,
                label: kind.labeled.then(|| label_text(location)),
            })
        })
        .collect()
}

/// Labels sit above the highest terrain point, with a guide line down to their marker.
pub fn place_labels(layout: &PanoramaLayout, markers: &[PlacedMarker]) -> Vec<PlacedLabel> {
    let label_y = layout.y_for_altitude(layout.max_altitude + LABEL_CLEARANCE_DEGREES);
    markers
        .iter()
        .filter_map(|marker| {
            let text = marker.label.clone()?;
            Some(PlacedLabel {
                text,
                x: marker.x,
                y: label_y,
                guide_top: label_y,
                guide_bottom: marker.y - marker.radius,
            })
        })
        .collect()
}

fn parse_hex_channel(hex: &str) -> Option<u8> {
    u8::from_str_radix(hex, 16).ok()
}

/// Convert a CSS colour to `rgba(r, g, b, alpha)`. Named colours go through the
/// style table first; unknown formats are returned unchanged.
pub fn color_with_alpha(color: &str, alpha: f64) -> String {
    let resolved = normalize_color(color.trim());
    let trimmed = resolved.as_str();
    if let Some(hex) = trimmed.strip_prefix('#') {
        if !hex.is_ascii() {
            return color.to_string();
        }
        let rgb = match hex.len() {
            3 | 4 => {
                let channel = |i: usize| parse_hex_channel(&hex[i..i + 1].repeat(2));
                channel(0).zip(channel(1)).zip(channel(2))
            }
            6 | 8 => {
                let channel = |i: usize| parse_hex_channel(&hex[i..i + 2]);
                channel(0).zip(channel(2)).zip(channel(4))
            }
            _ => None,
        };
        return match rgb {
            Some(((r, g), b)) => format!("rgba({}, {}, {}, {})", r, g, b, alpha),
            None => color.to_string(),
        };
    }

    let lower = trimmed.to_ascii_lowercase();
    let body = lower
        .strip_prefix("rgba(")
        .or_else(|| lower.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'));
    if let Some(body) = body {
        let channels: Vec<&str> = body.split(',').map(str::trim).take(3).collect();
        if channels.len() == 3 {
            return format!(
                "rgba({}, {}, {}, {})",
                channels[0], channels[1], channels[2], alpha
            );
        }
    }
    color.to_string()
}

/// Wrap a failed decode of host input.
pub fn invalid_input<T, E: std::fmt::Display>(
    what: &'static str,
    decoded: Result<T, E>,
) -> Result<T, ExportError> {
    decoded.map_err(|e| ExportError::InvalidInput {
        what,
        reason: e.to_string(),
    })
}

/// Download name: `<prefix>-<YYYY-MM-DD>-<epoch-ms>.png`.
pub fn export_file_name(prefix: &str, iso_date: &str, epoch_ms: u64) -> String {
    let date = iso_date.get(..10).unwrap_or(iso_date);
    format!("{}-{}-{}.png", prefix, date, epoch_ms)
}

/// Drawing calls the renderer needs. Text is centred horizontally on `x`.
pub trait PanoramaSurface {
    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: &str) -> Result<(), ExportError>;

    /// Fill a closed polygon with a vertical gradient from `top_color` at
    /// `top_y` to `bottom_color` at `bottom_y`.
    fn fill_gradient_path(
        &mut self,
        points: &[(f64, f64)],
        top_y: f64,
        bottom_y: f64,
        top_color: &str,
        bottom_color: &str,
    ) -> Result<(), ExportError>;

    fn fill_circle(
        &mut self,
        x: f64,
        y: f64,
        radius: f64,
        fill: &str,
        fill_opacity: f64,
        stroke: &str,
        stroke_width: f64,
    ) -> Result<(), ExportError>;

    fn stroke_line(
        &mut self,
        from: (f64, f64),
        to: (f64, f64),
        color: &str,
        width: f64,
    ) -> Result<(), ExportError>;

    fn fill_text(&mut self, text: &str, x: f64, y: f64, color: &str, font: &str)
        -> Result<(), ExportError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub markers: usize,
    pub labels: usize,
}

/// Closed outline from ground at azimuth 0, along the horizon, to ground at azimuth 360.
pub fn silhouette_outline(layout: &PanoramaLayout, profile: &[ProfilePoint]) -> Vec<(f64, f64)> {
    let ground = layout.ground_y();
    let mut points = Vec::with_capacity(profile.len() + 3);
    points.push((0.0, ground));
    for (i, point) in profile.iter().enumerate() {
        let azimuth = i as f64 * layout.azimuth_step;
        points.push((layout.x_for_azimuth(azimuth), layout.y_for_altitude(point.y)));
    }
    if let Some(first) = profile.first() {
        points.push((layout.x_for_azimuth(360.0), layout.y_for_altitude(first.y)));
    }
    points.push((layout.x_for_azimuth(360.0), ground));
    points
}

fn render_silhouette<S: PanoramaSurface>(
    surface: &mut S,
    layout: &PanoramaLayout,
    profile: &[ProfilePoint],
    options: &ExportOptions,
) -> Result<(), ExportError> {
    let outline = silhouette_outline(layout, profile);
    surface.fill_gradient_path(
        &outline,
        layout.y_for_altitude(layout.max_altitude),
        layout.ground_y(),
        &options.horizon_color,
        &options.ground_color,
    )
}

fn render_hillshade<S: PanoramaSurface>(
    surface: &mut S,
    layout: &PanoramaLayout,
    profile: &[ProfilePoint],
    options: &ExportOptions,
) -> Result<(), ExportError> {
    let ground = layout.ground_y();
    for column in 0..layout.width {
        let azimuth = layout.column_azimuth(column);
        let sample = match profile.get(layout.sample_index_for_azimuth(azimuth)) {
            Some(sample) => sample,
            None => continue,
        };
        let x = column as f64;

        match sample.segments.as_deref() {
            Some(segments) if !segments.is_empty() => {
                for segment in segments {
                    let top = layout.y_for_altitude(segment.top);
                    let bottom = layout.y_for_altitude(segment.bottom);
                    let height = (bottom - top).abs().max(1.0);
                    surface.fill_rect(x, top.min(bottom), HILLSHADE_COLUMN_WIDTH, height, &segment.color)?;
                }
            }
            _ => {
                let top = layout.y_for_altitude(sample.y);
                surface.fill_rect(
                    x,
                    top,
                    HILLSHADE_COLUMN_WIDTH,
                    (ground - top).max(0.0),
                    &options.ground_color,
                )?;
            }
        }
    }
    Ok(())
}

/// Draw the whole panorama with markers and labels.
pub fn render_panorama<S: PanoramaSurface>(
    surface: &mut S,
    layout: &PanoramaLayout,
    profile: &[ProfilePoint],
    locations: &[RiseSetLocation],
    kind: SourceKind,
    options: &ExportOptions,
) -> Result<RenderSummary, ExportError> {
    if profile.is_empty() {
        return Err(ExportError::EmptyProfile);
    }
    if layout.sample_count != profile.len() {
        return Err(ExportError::Render(format!(
            "layout expects {} samples, profile has {}",
            layout.sample_count,
            profile.len()
        )));
    }

    surface.fill_rect(
        0.0,
        0.0,
        layout.width as f64,
        layout.height as f64,
        &options.sky_color,
    )?;

    match kind {
        SourceKind::Silhouette => render_silhouette(surface, layout, profile, options)?,
        SourceKind::Hillshade => render_hillshade(surface, layout, profile, options)?,
    }

    let markers = place_markers(layout, profile, locations);
    for marker in &markers {
        surface.fill_circle(
            marker.x,
            marker.y,
            marker.radius,
            &marker.fill,
            marker.fill_opacity,
            "#000000",
            marker.stroke_width,
        )?;
    }

    let labels = place_labels(layout, &markers);
    for label in &labels {
        surface.stroke_line(
            (label.x, label.guide_top),
            (label.x, label.guide_bottom),
            &options.label_color,
            1.0,
        )?;
        surface.fill_text(&label.text, label.x, label.y, &options.label_color, &options.label_font)?;
    }

    Ok(RenderSummary {
        markers: markers.len(),
        labels: labels.len(),
    })
}
