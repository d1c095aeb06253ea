// Overlay file ingestion: GeoJSON, KML and GPX files become styled map layers.
//
// The pipeline is host independent. The map, the overlay registry, the layer
// switcher and the KML/GPX converter are injected through `LoaderContext`;
// the browser implementations live in `overlay_bindings`.

use geo::BoundingRect;
use geo_types::{coord, Rect};
use geozero::geojson::GeoJson;
use geozero::ToGeo;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::popup::build_popup_html;
use crate::style::{resolve_point_style, resolve_style, StyledFeature};

const DRAWING_TOOLS_EXPORT: &str = "DrawingToolsExport";
const PLACEHOLDER_NAME_RANGE: u128 = 10_001;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Invalid GeoJSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid XML document: {0}")]
    InvalidXml(String),

    #[error("KML/GPX converter is not available")]
    ConverterUnavailable,

    #[error("Failed to convert {format} file: {reason}")]
    ConversionFailed { format: &'static str, reason: String },

    #[error("Failed to read file '{0}'")]
    FileRead(String),

    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),

    #[error("Map rejected the overlay layer: {0}")]
    Host(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayFormat {
    GeoJson,
    Kml,
    Gpx,
    Unsupported,
}

impl OverlayFormat {
    /// Detect the format from the file extension.
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        match lower.rsplit_once('.').map(|(_, ext)| ext) {
            Some("kml") => OverlayFormat::Kml,
            Some("gpx") => OverlayFormat::Gpx,
            Some("geojson") | Some("json") => OverlayFormat::GeoJson,
            _ => OverlayFormat::Unsupported,
        }
    }

    /// Formats the drag/drop handler accepts. The file picker hands every
    /// other name to the GeoJSON parser.
    pub fn is_droppable(self) -> bool {
        self != OverlayFormat::Unsupported
    }

    pub fn label(self) -> &'static str {
        match self {
            OverlayFormat::GeoJson => "GeoJSON",
            OverlayFormat::Kml => "KML",
            OverlayFormat::Gpx => "GPX",
            OverlayFormat::Unsupported => "unsupported",
        }
    }
}

pub const DEFAULT_ACCEPT: &str = ".geojson,.json,.kml,.gpx";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverlayLoaderOptions {
    /// `accept` filter of the file picker. Only a hint to the browser dialog.
    pub accept: String,
    pub input_id: String,
    pub alert_on_error: bool,
}

impl Default for OverlayLoaderOptions {
    fn default() -> Self {
        Self {
            accept: DEFAULT_ACCEPT.to_string(),
            input_id: "overlay-file-input".to_string(),
            alert_on_error: true,
        }
    }
}

/// Converts XML overlay formats into GeoJSON.
pub trait XmlConverter {
    fn kml_to_geojson(&self, text: &str) -> Result<Value, LoadError>;
    fn gpx_to_geojson(&self, text: &str) -> Result<Value, LoadError>;
}

/// The map the overlay is added to.
pub trait OverlayHost {
    /// Host-side handle of an added layer.
    type Layer;

    fn add_overlay(&mut self, layer: &OverlayLayer) -> Result<Self::Layer, LoadError>;
    fn fit_bounds(&mut self, bounds: &LayerBounds);
}

/// Named registry of loaded overlays owned by the page.
pub trait OverlayRegistry<L> {
    fn insert(&mut self, name: &str, layer: &L);
}

/// Layer switcher control listing toggleable overlays.
pub trait LayerSwitcher<L> {
    fn add_overlay(&mut self, name: &str, layer: &L);
}

pub struct LoaderContext<'a, H: OverlayHost> {
    pub host: &'a mut H,
    pub registry: Option<&'a mut dyn OverlayRegistry<H::Layer>>,
    pub switcher: Option<&'a mut dyn LayerSwitcher<H::Layer>>,
    pub converter: Option<&'a dyn XmlConverter>,
}

impl<'a, H: OverlayHost> LoaderContext<'a, H> {
    pub fn new(host: &'a mut H) -> Self {
        Self {
            host,
            registry: None,
            switcher: None,
            converter: None,
        }
    }
}

/// Geographic extent of a layer in Leaflet order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayerBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl LayerBounds {
    fn from_rect(rect: Rect<f64>) -> Self {
        LayerBounds {
            south: rect.min().y,
            west: rect.min().x,
            north: rect.max().y,
            east: rect.max().x,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.south, self.west, self.north, self.east]
            .iter()
            .all(|v| v.is_finite())
            && self.south <= self.north
            && self.west <= self.east
    }

    /// `[[south, west], [north, east]]`, the shape `map.fitBounds` takes.
    pub fn to_lat_lng_pairs(&self) -> [[f64; 2]; 2] {
        [[self.south, self.west], [self.north, self.east]]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FeatureSymbol {
    CircleMarker { radius: f64, style: StyledFeature },
    Path { style: StyledFeature },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyledOverlayFeature {
    pub geometry: Value,
    pub properties: Map<String, Value>,
    pub symbol: FeatureSymbol,
    pub popup_html: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayLayer {
    pub name: String,
    pub features: Vec<StyledOverlayFeature>,
    pub bounds: Option<LayerBounds>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub name: String,
    pub feature_count: usize,
    pub fitted: bool,
}

/// Parse file content into a normalized FeatureCollection.
pub fn parse_overlay_document(
    format: OverlayFormat,
    text: &str,
    converter: Option<&dyn XmlConverter>,
) -> Result<Value, LoadError> {
    let document = match format {
        OverlayFormat::Kml => converter
            .ok_or(LoadError::ConverterUnavailable)?
            .kml_to_geojson(text)?,
        OverlayFormat::Gpx => converter
            .ok_or(LoadError::ConverterUnavailable)?
            .gpx_to_geojson(text)?,
        OverlayFormat::GeoJson | OverlayFormat::Unsupported => serde_json::from_str(text)?,
    };
    normalize_document(document)
}

/// Unwrap DrawingToolsExport documents and wrap single features or geometries.
pub fn normalize_document(document: Value) -> Result<Value, LoadError> {
    let kind = document
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "FeatureCollection" => Ok(document),
        DRAWING_TOOLS_EXPORT => {
            let features = document
                .get("features")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            Ok(json!({ "type": "FeatureCollection", "features": features }))
        }
        "Feature" => Ok(json!({ "type": "FeatureCollection", "features": [document] })),
        "Point" | "MultiPoint" | "LineString" | "MultiLineString" | "Polygon"
        | "MultiPolygon" | "GeometryCollection" => Ok(json!({
            "type": "FeatureCollection",
            "features": [{ "type": "Feature", "geometry": document, "properties": {} }]
        })),
        "" => Err(LoadError::UnsupportedDocument(
            "missing top-level 'type'".to_string(),
        )),
        other => Err(LoadError::UnsupportedDocument(format!(
            "unexpected type '{}'",
            other
        ))),
    }
}

fn collection_features(collection: &Value) -> &[Value] {
    collection
        .get("features")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn value_to_name(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Derive the registry name of a layer from its first feature's properties.
///
/// `placeholder` supplies the number used for `Feature_<n>` when no property
/// yields a name.
pub fn derive_layer_name(collection: &Value, placeholder: impl FnOnce() -> u32) -> String {
    let properties = collection_features(collection)
        .first()
        .and_then(|f| f.get("properties"))
        .and_then(Value::as_object);

    let named = properties.and_then(|p| {
        ["name", "Name", "NAME"]
            .iter()
            .find_map(|key| p.get(*key).and_then(value_to_name))
            .or_else(|| p.values().next().and_then(value_to_name))
    });

    named.unwrap_or_else(|| format!("Feature_{}", placeholder()))
}

fn random_placeholder() -> u32 {
    (uuid::Uuid::new_v4().as_u128() % PLACEHOLDER_NAME_RANGE) as u32
}

fn is_point_geometry(geometry: &Value) -> bool {
    matches!(
        geometry.get("type").and_then(Value::as_str),
        Some("Point") | Some("MultiPoint")
    )
}

fn geometry_bounds(geometry: &Value) -> Option<Rect<f64>> {
    let text = serde_json::to_string(geometry).ok()?;
    let geo = GeoJson(&text).to_geo().ok()?;
    geo.bounding_rect()
}

fn merge_rects(a: Option<Rect<f64>>, b: Rect<f64>) -> Rect<f64> {
    match a {
        None => b,
        Some(a) => Rect::new(
            coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
            coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
        ),
    }
}

/// Style every feature of a FeatureCollection and compute the layer extent.
pub fn build_overlay_layer(collection: &Value, name: String) -> OverlayLayer {
    let mut extent: Option<Rect<f64>> = None;
    let mut features = Vec::new();

    for feature in collection_features(collection) {
        let geometry = match feature.get("geometry") {
            Some(g) if !g.is_null() => g.clone(),
            _ => continue,
        };
        let properties = feature
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let symbol = if is_point_geometry(&geometry) {
            let style = resolve_point_style(&properties);
            FeatureSymbol::CircleMarker {
                radius: style.radius,
                style,
            }
        } else {
            FeatureSymbol::Path {
                style: resolve_style(&properties),
            }
        };

        if let Some(rect) = geometry_bounds(&geometry) {
            extent = Some(merge_rects(extent, rect));
        }

        let popup_html = build_popup_html(Some(&properties));
        features.push(StyledOverlayFeature {
            geometry,
            properties,
            symbol,
            popup_html,
        });
    }

    OverlayLayer {
        name,
        features,
        bounds: extent.map(LayerBounds::from_rect),
    }
}

pub struct OverlayLoader {
    placeholder: fn() -> u32,
}

impl Default for OverlayLoader {
    fn default() -> Self {
        Self {
            placeholder: random_placeholder,
        }
    }
}

impl OverlayLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placeholder(placeholder: fn() -> u32) -> Self {
        Self { placeholder }
    }

    /// Parse, style and add one file to the map.
    pub fn load<H: OverlayHost>(
        &self,
        file_name: &str,
        text: &str,
        ctx: &mut LoaderContext<'_, H>,
    ) -> Result<LoadOutcome, LoadError> {
        let format = OverlayFormat::from_file_name(file_name);
        crate::console_log!("Loading {} overlay from '{}'", format.label(), file_name);

        let collection = parse_overlay_document(format, text, ctx.converter)?;
        let name = derive_layer_name(&collection, self.placeholder);
        let layer = build_overlay_layer(&collection, name);

        let handle = ctx.host.add_overlay(&layer)?;

        // Both collaborators are optional, a page without them still gets the layer
        if let Some(registry) = ctx.registry.as_deref_mut() {
            registry.insert(&layer.name, &handle);
        }
        if let Some(switcher) = ctx.switcher.as_deref_mut() {
            switcher.add_overlay(&layer.name, &handle);
        }

        let fitted = match layer.bounds {
            Some(bounds) if bounds.is_valid() => {
                ctx.host.fit_bounds(&bounds);
                true
            }
            _ => false,
        };

        crate::console_log!(
            "Added overlay '{}' with {} features",
            layer.name,
            layer.features.len()
        );

        Ok(LoadOutcome {
            name: layer.name,
            feature_count: layer.features.len(),
            fitted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeHost {
        layers: Vec<OverlayLayer>,
        fitted: Vec<LayerBounds>,
    }

    impl OverlayHost for FakeHost {
        type Layer = usize;

        fn add_overlay(&mut self, layer: &OverlayLayer) -> Result<usize, LoadError> {
            self.layers.push(layer.clone());
            Ok(self.layers.len() - 1)
        }

        fn fit_bounds(&mut self, bounds: &LayerBounds) {
            self.fitted.push(*bounds);
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        names: Vec<(String, usize)>,
    }

    impl OverlayRegistry<usize> for FakeRegistry {
        fn insert(&mut self, name: &str, layer: &usize) {
            self.names.push((name.to_string(), *layer));
        }
    }

    impl LayerSwitcher<usize> for FakeRegistry {
        fn add_overlay(&mut self, name: &str, layer: &usize) {
            self.names.push((name.to_string(), *layer));
        }
    }

    struct FakeConverter;

    impl XmlConverter for FakeConverter {
        fn kml_to_geojson(&self, text: &str) -> Result<Value, LoadError> {
            if !text.contains("<kml") {
                return Err(LoadError::InvalidXml("not a kml document".to_string()));
            }
            Ok(json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [7.0, 46.0] },
                    "properties": { "name": "From KML" }
                }]
            }))
        }

        fn gpx_to_geojson(&self, _text: &str) -> Result<Value, LoadError> {
            Ok(json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": { "type": "LineString", "coordinates": [[7.0, 46.0], [7.5, 46.5]] },
                    "properties": { "name": "Track" }
                }]
            }))
        }
    }

    fn fixed_placeholder() -> u32 {
        42
    }

    #[test]
    fn detects_formats_by_extension() {
        assert_eq!(OverlayFormat::from_file_name("route.KML"), OverlayFormat::Kml);
        assert_eq!(OverlayFormat::from_file_name("track.gpx"), OverlayFormat::Gpx);
        assert_eq!(OverlayFormat::from_file_name("a.geojson"), OverlayFormat::GeoJson);
        assert_eq!(OverlayFormat::from_file_name("a.json"), OverlayFormat::GeoJson);
        assert_eq!(OverlayFormat::from_file_name("notes.txt"), OverlayFormat::Unsupported);
        assert_eq!(OverlayFormat::from_file_name("noext"), OverlayFormat::Unsupported);
        assert!(!OverlayFormat::Unsupported.is_droppable());
    }

    #[test]
    fn drawing_tools_export_matches_plain_collection() {
        let features = json!([
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [1.0, 2.0] }, "properties": { "name": "a" } },
            { "type": "Feature", "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] }, "properties": { "stroke": "red" } }
        ]);
        let wrapped = json!({ "type": "DrawingToolsExport", "features": features.clone() });
        let plain = json!({ "type": "FeatureCollection", "features": features });

        let a = parse_overlay_document(OverlayFormat::GeoJson, &wrapped.to_string(), None).unwrap();
        let b = parse_overlay_document(OverlayFormat::GeoJson, &plain.to_string(), None).unwrap();
        assert_eq!(a, b);

        let layer_a = build_overlay_layer(&a, "x".to_string());
        let layer_b = build_overlay_layer(&b, "x".to_string());
        assert_eq!(layer_a.features.len(), 2);
        assert_eq!(layer_a.features.len(), layer_b.features.len());
        for (fa, fb) in layer_a.features.iter().zip(layer_b.features.iter()) {
            assert_eq!(fa.properties, fb.properties);
        }
    }

    #[test]
    fn wraps_bare_feature_and_geometry() {
        let feature = json!({ "type": "Feature", "geometry": null, "properties": {} });
        let normalized = normalize_document(feature).unwrap();
        assert_eq!(collection_features(&normalized).len(), 1);

        let geometry = json!({ "type": "Point", "coordinates": [1.0, 1.0] });
        let normalized = normalize_document(geometry).unwrap();
        assert_eq!(normalized["features"][0]["geometry"]["type"], "Point");

        assert!(matches!(
            normalize_document(json!({ "foo": 1 })),
            Err(LoadError::UnsupportedDocument(_))
        ));
    }

    #[test]
    fn layer_name_preference() {
        let named = json!({ "type": "FeatureCollection", "features": [
            { "type": "Feature", "geometry": null, "properties": { "title": "T", "NAME": "Upper" } }
        ]});
        assert_eq!(derive_layer_name(&named, fixed_placeholder), "Upper");

        let first = json!({ "type": "FeatureCollection", "features": [
            { "type": "Feature", "geometry": null, "properties": { "id": 17 } }
        ]});
        assert_eq!(derive_layer_name(&first, fixed_placeholder), "17");

        let empty = json!({ "type": "FeatureCollection", "features": [] });
        assert_eq!(derive_layer_name(&empty, fixed_placeholder), "Feature_42");
    }

    #[test]
    fn loader_options_default_missing_fields() {
        let options: OverlayLoaderOptions =
            serde_json::from_str(r#"{ "inputId": "picker" }"#).unwrap();
        assert_eq!(options.input_id, "picker");
        assert_eq!(options.accept, DEFAULT_ACCEPT);
        assert!(options.alert_on_error);
    }

    #[test]
    fn random_placeholder_stays_in_range() {
        for _ in 0..50 {
            assert!(random_placeholder() <= 10_000);
        }
    }

    #[test]
    fn red_large_point_marker() {
        let doc = json!({ "type": "FeatureCollection", "features": [{
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [8.0, 47.0] },
            "properties": { "marker-color": "#FF0000", "marker-size": "large" }
        }]});

        let mut host = FakeHost::default();
        let mut ctx = LoaderContext::new(&mut host);
        let outcome = OverlayLoader::with_placeholder(fixed_placeholder)
            .load("marker.geojson", &doc.to_string(), &mut ctx)
            .unwrap();
        assert_eq!(outcome.feature_count, 1);

        match &host.layers[0].features[0].symbol {
            FeatureSymbol::CircleMarker { radius, style } => {
                assert_eq!(*radius, 7.0);
                assert_eq!(style.color, "#FF0000");
                assert_eq!(style.fill_color, "#FF0000");
            }
            other => panic!("expected circle marker, got {:?}", other),
        }
    }

    #[test]
    fn registers_with_optional_collaborators_and_fits_bounds() {
        let doc = json!({ "type": "FeatureCollection", "features": [
            { "type": "Feature", "geometry": { "type": "LineString", "coordinates": [[6.0, 45.0], [8.0, 47.0]] }, "properties": { "name": "Ridge" } }
        ]});

        let mut host = FakeHost::default();
        let mut registry = FakeRegistry::default();
        let mut switcher = FakeRegistry::default();
        {
            let mut ctx = LoaderContext::new(&mut host);
            ctx.registry = Some(&mut registry);
            ctx.switcher = Some(&mut switcher);
            let outcome = OverlayLoader::new()
                .load("ridge.json", &doc.to_string(), &mut ctx)
                .unwrap();
            assert!(outcome.fitted);
        }

        assert_eq!(registry.names, vec![("Ridge".to_string(), 0)]);
        assert_eq!(switcher.names, vec![("Ridge".to_string(), 0)]);
        assert_eq!(
            host.fitted,
            vec![LayerBounds { south: 45.0, west: 6.0, north: 47.0, east: 8.0 }]
        );
    }

    #[test]
    fn empty_collection_does_not_fit() {
        let doc = json!({ "type": "FeatureCollection", "features": [] });
        let mut host = FakeHost::default();
        let mut ctx = LoaderContext::new(&mut host);
        let outcome = OverlayLoader::with_placeholder(fixed_placeholder)
            .load("empty.geojson", &doc.to_string(), &mut ctx)
            .unwrap();
        assert!(!outcome.fitted);
        assert_eq!(outcome.name, "Feature_42");
        assert_eq!(host.layers.len(), 1);
        assert!(host.fitted.is_empty());
    }

    #[test]
    fn xml_formats_need_a_converter() {
        let mut host = FakeHost::default();
        let mut ctx = LoaderContext::new(&mut host);
        let err = OverlayLoader::new()
            .load("route.kml", "<kml></kml>", &mut ctx)
            .unwrap_err();
        assert!(matches!(err, LoadError::ConverterUnavailable));
        assert!(host.layers.is_empty());
    }

    #[test]
    fn converts_kml_and_gpx() {
        let converter = FakeConverter;
        let mut host = FakeHost::default();
        {
            let mut ctx = LoaderContext::new(&mut host);
            ctx.converter = Some(&converter);
            let kml = OverlayLoader::new().load("a.kml", "<kml/>", &mut ctx).unwrap();
            assert_eq!(kml.name, "From KML");
            let gpx = OverlayLoader::new().load("b.gpx", "<gpx/>", &mut ctx).unwrap();
            assert_eq!(gpx.name, "Track");
            let bad = OverlayLoader::new().load("c.kml", "garbage", &mut ctx);
            assert!(matches!(bad, Err(LoadError::InvalidXml(_))));
        }
        assert_eq!(host.layers.len(), 2);
    }

    #[test]
    fn malformed_json_is_reported() {
        let mut host = FakeHost::default();
        let mut ctx = LoaderContext::new(&mut host);
        let err = OverlayLoader::new()
            .load("broken.geojson", "{ not json", &mut ctx)
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidJson(_)));
        assert!(err.to_string().starts_with("Invalid GeoJSON"));
    }

    #[test]
    fn polygons_get_path_symbols_with_popups() {
        let doc = json!({ "type": "FeatureCollection", "features": [{
            "type": "Feature",
            "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]] },
            "properties": { "fill": "#00ff00", "name": "Field" }
        }]});
        let layer = build_overlay_layer(&doc, "Field".to_string());
        let feature = &layer.features[0];
        match &feature.symbol {
            FeatureSymbol::Path { style } => {
                assert_eq!(style.fill_color, "#00ff00");
                assert_eq!(style.color, crate::style::FILL_ONLY_STROKE_COLOR);
            }
            other => panic!("expected path, got {:?}", other),
        }
        assert!(feature.popup_html.contains("Field"));
        assert!(layer.bounds.map(|b| b.is_valid()).unwrap_or(false));
    }
}
