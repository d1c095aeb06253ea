use wasm_bindgen::prelude::*;

// Create a console module for logging
pub mod console;
// Import our feature style resolution
pub mod style;
// Import our popup markup builder
pub mod popup;
// Import our overlay file loader
pub mod overlay_loader;
mod overlay_bindings;
// Import our zoom box control
pub mod zoom_box;
mod zoom_box_bindings;
// Import our panorama exporter
pub mod panorama;
mod panorama_bindings;

pub use overlay_bindings::{install_overlay_loader, load_overlay_text, open_overlay_file_picker};
pub use panorama_bindings::{export_panorama, panorama_dimensions};
pub use zoom_box_bindings::{add_zoom_box_control, WasmZoomBoxControl};

// Enable better panic messages in console during development
#[cfg(feature = "console_error_panic_hook")]
pub use console_error_panic_hook::set_once as set_panic_hook;

#[wasm_bindgen]
extern "C" {
    // JavaScript helper that turns pre-styled features into an L.geoJSON layer,
    // adds it to the map and returns it
    #[wasm_bindgen(js_namespace = horizonJsHelpers, js_name = addOverlayLayer, catch)]
    pub fn add_overlay_layer(map: &JsValue, layer: &JsValue) -> Result<JsValue, JsValue>;

    // Wraps a ZoomBoxControl in an L.Control at `position` and adds it to the map
    #[wasm_bindgen(js_namespace = horizonJsHelpers, js_name = addZoomBoxControl, catch)]
    pub fn add_zoom_box_control_to_map(
        map: &JsValue,
        control: JsValue,
        position: &str,
    ) -> Result<JsValue, JsValue>;
}

// Use the macros from our console module
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::console::log(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_warn {
    ($($t:tt)*) => ($crate::console::warn(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_error {
    ($($t:tt)*) => ($crate::console::error(&format!($($t)*)))
}

use std::sync::Once;
static INIT: Once = Once::new();

// This sets up the wasm_bindgen start functionality
#[wasm_bindgen(start)]
pub fn start() {
    INIT.call_once(|| {
        // Set the panic hook for better error messages
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        console_log!("Horizon widgets initialized");
    });
}
