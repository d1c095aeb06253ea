// Browser checks for the exported bindings. Run with `wasm-pack test --headless --firefox`.
#![cfg(target_arch = "wasm32")]

use horizon_widgets_wasm::{open_overlay_file_picker, panorama_dimensions};
use js_sys::Reflect;
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn number(value: &JsValue, key: &str) -> f64 {
    Reflect::get(value, &JsValue::from_str(key))
        .ok()
        .and_then(|v| v.as_f64())
        .unwrap_or(f64::NAN)
}

#[wasm_bindgen_test]
fn dimensions_apply_the_width_floor() {
    let layout = panorama_dimensions(720, 4.0, 300.0).unwrap();
    assert_eq!(number(&layout, "width"), 3600.0);
    // (10 + 4 + 2 + 2) degrees at 30 px per degree
    assert_eq!(number(&layout, "height"), 540.0);
    assert_eq!(number(&layout, "pxPerDegY"), 30.0);
}

#[wasm_bindgen_test]
fn dimensions_reject_an_empty_profile() {
    assert!(panorama_dimensions(0, 4.0, 300.0).is_err());
}

#[wasm_bindgen_test]
fn file_picker_needs_an_installed_loader() {
    assert!(open_overlay_file_picker().is_err());
}
