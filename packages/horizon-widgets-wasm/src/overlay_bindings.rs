// Browser glue for the overlay loader: hidden file input, drag/drop on the map
// container, file reads and the Leaflet/toGeoJSON collaborators.
use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Function, Reflect};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{Document, DomParser, DragEvent, Element, Event, File, FileList, HtmlInputElement, SupportedType};

use crate::overlay_loader::{
    LayerBounds, LayerSwitcher, LoadError, LoadOutcome, LoaderContext, OverlayFormat,
    OverlayHost, OverlayLayer, OverlayLoader, OverlayLoaderOptions, OverlayRegistry,
    XmlConverter,
};
use crate::{console_error, console_log, console_warn};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = toGeoJSON, js_name = kml, catch)]
    fn to_geojson_kml(doc: &Document) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(js_namespace = toGeoJSON, js_name = gpx, catch)]
    fn to_geojson_gpx(doc: &Document) -> Result<JsValue, JsValue>;
}

fn js_message(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            Reflect::get(value, &"message".into())
                .ok()
                .and_then(|m| m.as_string())
        })
        .unwrap_or_else(|| format!("{:?}", value))
}

fn is_present(value: &JsValue) -> bool {
    !(value.is_undefined() || value.is_null())
}

/// KML/GPX conversion through the page's `toGeoJSON` global.
pub struct ToGeoJsonConverter;

impl ToGeoJsonConverter {
    fn available() -> bool {
        Reflect::get(&js_sys::global(), &"toGeoJSON".into())
            .map(|v| is_present(&v))
            .unwrap_or(false)
    }

    fn parse_xml(text: &str) -> Result<Document, LoadError> {
        let parser = DomParser::new().map_err(|e| LoadError::InvalidXml(js_message(&e)))?;
        let doc = parser
            .parse_from_string(text, SupportedType::TextXml)
            .map_err(|e| LoadError::InvalidXml(js_message(&e)))?;
        // DOMParser reports malformed XML in-band
        if doc.get_elements_by_tag_name("parsererror").length() > 0 {
            return Err(LoadError::InvalidXml("document is not well-formed".to_string()));
        }
        Ok(doc)
    }

    fn convert(
        format: OverlayFormat,
        text: &str,
        convert: fn(&Document) -> Result<JsValue, JsValue>,
    ) -> Result<Value, LoadError> {
        if !Self::available() {
            return Err(LoadError::ConverterUnavailable);
        }
        let doc = Self::parse_xml(text)?;
        let converted = convert(&doc).map_err(|e| LoadError::ConversionFailed {
            format: format.label(),
            reason: js_message(&e),
        })?;
        serde_wasm_bindgen::from_value(converted).map_err(|e| LoadError::ConversionFailed {
            format: format.label(),
            reason: e.to_string(),
        })
    }
}

impl XmlConverter for ToGeoJsonConverter {
    fn kml_to_geojson(&self, text: &str) -> Result<Value, LoadError> {
        Self::convert(OverlayFormat::Kml, text, to_geojson_kml)
    }

    fn gpx_to_geojson(&self, text: &str) -> Result<Value, LoadError> {
        Self::convert(OverlayFormat::Gpx, text, to_geojson_gpx)
    }
}

/// A Leaflet map; layers are built by `horizonJsHelpers.addOverlayLayer`.
pub struct LeafletOverlayHost {
    map: JsValue,
}

impl OverlayHost for LeafletOverlayHost {
    type Layer = JsValue;

    fn add_overlay(&mut self, layer: &OverlayLayer) -> Result<JsValue, LoadError> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let layer_js = layer
            .serialize(&serializer)
            .map_err(|e| LoadError::Host(e.to_string()))?;
        crate::add_overlay_layer(&self.map, &layer_js).map_err(|e| LoadError::Host(js_message(&e)))
    }

    fn fit_bounds(&mut self, bounds: &LayerBounds) {
        let result = serde_wasm_bindgen::to_value(&bounds.to_lat_lng_pairs())
            .map_err(JsValue::from)
            .and_then(|pairs| {
                let fit: Function = Reflect::get(&self.map, &"fitBounds".into())?.dyn_into()?;
                fit.call1(&self.map, &pairs)
            });
        if let Err(e) = result {
            console_warn!("Could not fit map to overlay bounds: {}", js_message(&e));
        }
    }
}

/// Plain JS object keyed by overlay name.
struct JsOverlayRegistry(JsValue);

impl OverlayRegistry<JsValue> for JsOverlayRegistry {
    fn insert(&mut self, name: &str, layer: &JsValue) {
        if let Err(e) = Reflect::set(&self.0, &JsValue::from_str(name), layer) {
            console_warn!("Could not register overlay '{}': {}", name, js_message(&e));
        }
    }
}

/// Leaflet `L.control.layers` instance.
struct JsLayerSwitcher(JsValue);

impl LayerSwitcher<JsValue> for JsLayerSwitcher {
    fn add_overlay(&mut self, name: &str, layer: &JsValue) {
        let result = Reflect::get(&self.0, &"addOverlay".into())
            .and_then(|f| f.dyn_into::<Function>().map_err(JsValue::from))
            .and_then(|f| f.call2(&self.0, layer, &JsValue::from_str(name)));
        if let Err(e) = result {
            console_warn!("Could not add '{}' to the layer switcher: {}", name, js_message(&e));
        }
    }
}

/// Everything a load needs, shared by the input and drop listeners.
struct LoaderTargets {
    map: JsValue,
    overlays: JsValue,
    layer_control: JsValue,
    options: OverlayLoaderOptions,
}

impl LoaderTargets {
    fn load_text(&self, file_name: &str, text: &str) -> Result<LoadOutcome, LoadError> {
        let mut host = LeafletOverlayHost {
            map: self.map.clone(),
        };
        let mut registry = JsOverlayRegistry(self.overlays.clone());
        let mut switcher = JsLayerSwitcher(self.layer_control.clone());
        let converter = ToGeoJsonConverter;

        let mut ctx = LoaderContext::new(&mut host);
        if is_present(&self.overlays) {
            ctx.registry = Some(&mut registry);
        }
        if is_present(&self.layer_control) {
            ctx.switcher = Some(&mut switcher);
        }
        ctx.converter = Some(&converter);

        OverlayLoader::new().load(file_name, text, &mut ctx)
    }

    fn report(&self, file_name: &str, error: &LoadError) {
        let message = format!("Error loading {}: {}", file_name, error);
        console_error!("{}", message);
        if self.options.alert_on_error {
            if let Some(window) = web_sys::window() {
                let _ = window.alert_with_message(&message);
            }
        }
    }

    /// Read one file and load it. Every file gets its own task so one failure
    /// leaves the others alone.
    fn spawn_file(self: &Rc<Self>, file: File) {
        let targets = Rc::clone(self);
        spawn_local(async move {
            let name = file.name();
            let result = match read_file_text(&file).await {
                Ok(text) => targets.load_text(&name, &text),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                targets.report(&name, &e);
            }
        });
    }
}

async fn read_file_text(file: &File) -> Result<String, LoadError> {
    let text = JsFuture::from(file.text())
        .await
        .map_err(|_| LoadError::FileRead(file.name()))?;
    text.as_string().ok_or_else(|| LoadError::FileRead(file.name()))
}

fn files_of(list: Option<FileList>) -> Vec<File> {
    match list {
        Some(list) => (0..list.length()).filter_map(|i| list.get(i)).collect(),
        None => Vec::new(),
    }
}

struct Listener {
    target: web_sys::EventTarget,
    event: &'static str,
    closure: Closure<dyn FnMut(Event)>,
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self
            .target
            .remove_event_listener_with_callback(self.event, self.closure.as_ref().unchecked_ref());
    }
}

struct InstalledLoader {
    input: HtmlInputElement,
    _listeners: Vec<Listener>,
}

impl Drop for InstalledLoader {
    fn drop(&mut self) {
        self.input.remove();
    }
}

thread_local! {
    static INSTALLED: RefCell<Option<InstalledLoader>> = RefCell::new(None);
}

fn listen<F>(target: &web_sys::EventTarget, event: &'static str, handler: F) -> Result<Listener, JsValue>
where
    F: FnMut(Event) + 'static,
{
    let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
    target.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())?;
    Ok(Listener {
        target: target.clone(),
        event,
        closure,
    })
}

fn map_container(map: &JsValue) -> Result<Element, JsValue> {
    let get_container: Function = Reflect::get(map, &"getContainer".into())?.dyn_into()?;
    get_container.call0(map)?.dyn_into::<Element>().map_err(JsValue::from)
}

/// Wire the hidden file input and drag/drop on the map container.
///
/// `overlays` (a plain object) and `layer_control` (an `L.control.layers`)
/// are optional; each loaded layer is registered with whichever is given.
/// Installing again replaces the previous input and listeners.
#[wasm_bindgen]
pub fn install_overlay_loader(
    map: JsValue,
    options: JsValue,
    overlays: JsValue,
    layer_control: JsValue,
) -> Result<(), JsValue> {
    let options: OverlayLoaderOptions = if is_present(&options) {
        serde_wasm_bindgen::from_value(options)?
    } else {
        OverlayLoaderOptions::default()
    };

    let document = web_sys::window()
        .and_then(|w| w.document())
        .ok_or_else(|| JsValue::from_str("No document available"))?;
    let body = document
        .body()
        .ok_or_else(|| JsValue::from_str("Document has no body"))?;
    let container = map_container(&map)?;

    // Drop the previous installation first so the input id stays unique
    INSTALLED.with(|slot| slot.borrow_mut().take());

    let input: HtmlInputElement = document.create_element("input")?.dyn_into()?;
    input.set_type("file");
    input.set_id(&options.input_id);
    input.set_accept(&options.accept);
    input.set_multiple(true);
    input.style().set_property("display", "none")?;
    body.append_child(&input)?;

    let targets = Rc::new(LoaderTargets {
        map,
        overlays,
        layer_control,
        options,
    });

    let mut listeners = Vec::new();

    let on_change = {
        let targets = Rc::clone(&targets);
        let input = input.clone();
        move |_: Event| {
            // The picker's accept list is only a hint: every chosen file is loaded
            for file in files_of(input.files()) {
                targets.spawn_file(file);
            }
            // Allow picking the same file again
            input.set_value("");
        }
    };
    listeners.push(listen(&input, "change", on_change)?);

    listeners.push(listen(&container, "dragover", |event: Event| {
        event.prevent_default();
    })?);

    let on_drop = {
        let targets = Rc::clone(&targets);
        move |event: Event| {
            event.prevent_default();
            let files = event
                .dyn_ref::<DragEvent>()
                .and_then(|e| e.data_transfer())
                .map(|t| files_of(t.files()))
                .unwrap_or_default();
            for file in files {
                if OverlayFormat::from_file_name(&file.name()).is_droppable() {
                    targets.spawn_file(file);
                } else {
                    console_warn!("Ignoring dropped file '{}'", file.name());
                }
            }
        }
    };
    listeners.push(listen(&container, "drop", on_drop)?);

    console_log!("Overlay loader installed (input #{})", targets.options.input_id);
    INSTALLED.with(|slot| {
        *slot.borrow_mut() = Some(InstalledLoader {
            input,
            _listeners: listeners,
        })
    });
    Ok(())
}

/// Open the file dialog of the installed loader.
#[wasm_bindgen]
pub fn open_overlay_file_picker() -> Result<(), JsValue> {
    INSTALLED.with(|slot| match slot.borrow().as_ref() {
        Some(installed) => {
            installed.input.click();
            Ok(())
        }
        None => Err(JsValue::from_str("Overlay loader is not installed")),
    })
}

/// Load already-read file content onto `map` and return the layer name.
#[wasm_bindgen]
pub fn load_overlay_text(
    map: JsValue,
    file_name: &str,
    text: &str,
    overlays: JsValue,
    layer_control: JsValue,
) -> Result<String, JsValue> {
    let targets = LoaderTargets {
        map,
        overlays,
        layer_control,
        options: OverlayLoaderOptions::default(),
    };
    match targets.load_text(file_name, text) {
        Ok(outcome) => Ok(outcome.name),
        Err(e) => {
            console_error!("Error loading {}: {}", file_name, e);
            Err(JsValue::from_str(&format!("Error loading {}: {}", file_name, e)))
        }
    }
}
