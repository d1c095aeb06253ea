// Leaflet glue for the zoom box control.
//
// The Leaflet map is reached through `js_sys::Reflect`. Its box-zoom handler
// keeps calling `_onMouseDown`; we install a single closure there that asks the
// currently selected `GestureTrigger` whether to start, and forwards the
// (possibly synthesized) event to Leaflet's original handler.
use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Element, HtmlElement, MouseEvent};

use crate::console_log;
use crate::zoom_box::{
    BoxZoomGesture, ButtonPlacement, ClassList, GestureTrigger, MapHandle, ModifierRequired,
    PointerDown, ZoomBoxControl, ZoomBoxOptions, BAR_CLASS,
};

fn get(target: &JsValue, key: &str) -> Result<JsValue, JsValue> {
    Reflect::get(target, &JsValue::from_str(key))
}

fn call0(target: &JsValue, method: &str) -> Result<JsValue, JsValue> {
    let f: Function = get(target, method)?.dyn_into()?;
    f.call0(target)
}

fn call2(target: &JsValue, method: &str, a: &JsValue, b: &JsValue) -> Result<JsValue, JsValue> {
    let f: Function = get(target, method)?.dyn_into()?;
    f.call2(target, a, b)
}

fn log_js_error(context: &str, result: Result<JsValue, JsValue>) {
    if let Err(e) = result {
        crate::console_error!("{}: {:?}", context, e);
    }
}

impl ClassList for Element {
    fn set_class(&self, class: &str, on: bool) {
        let list = self.class_list();
        let result = if on { list.add_1(class) } else { list.remove_1(class) };
        if let Err(e) = result {
            crate::console_error!("Failed to toggle class '{}': {:?}", class, e);
        }
    }

    fn has_class(&self, class: &str) -> bool {
        self.class_list().contains(class)
    }
}

/// Tracks whether Leaflet's container listener may point at our closure.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct HookState {
    ours_bound: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Restore {
    remove_hooks: bool,
    add_hooks: bool,
}

impl HookState {
    fn bound(&mut self) {
        self.ours_bound = true;
    }

    /// Steps to put the native `_onMouseDown` back. `enabled()` only reflects
    /// `enable()`, so hooks added directly are unhooked from our record.
    fn restore(self, host_enabled: bool) -> Restore {
        Restore {
            remove_hooks: self.ours_bound || host_enabled,
            add_hooks: host_enabled,
        }
    }
}

/// Leaflet's `map.boxZoom` with the trigger slot kept on the Rust side.
pub struct LeafletBoxZoom {
    handler: JsValue,
    native: Function,
    trigger: Rc<RefCell<Rc<dyn GestureTrigger>>>,
    hooks: HookState,
    _on_mouse_down: Closure<dyn FnMut(MouseEvent)>,
}

impl LeafletBoxZoom {
    fn install(handler: JsValue) -> Result<Self, JsValue> {
        let native: Function = get(&handler, "_onMouseDown")?.dyn_into()?;
        let trigger: Rc<RefCell<Rc<dyn GestureTrigger>>> =
            Rc::new(RefCell::new(Rc::new(ModifierRequired)));

        let slot = Rc::clone(&trigger);
        let this = handler.clone();
        let forward = native.clone();
        let on_mouse_down = Closure::wrap(Box::new(move |event: MouseEvent| {
            let pointer = PointerDown {
                client_x: event.client_x() as f64,
                client_y: event.client_y() as f64,
                button: event.button(),
                shift_key: event.shift_key(),
            };
            let current = Rc::clone(&*slot.borrow());
            if let Some(start) = current.pointer_down(&pointer) {
                // Leaflet reads clientX/clientY, shiftKey and which/button
                let synthesized = Object::new();
                let _ = Reflect::set(&synthesized, &"clientX".into(), &start.client_x.into());
                let _ = Reflect::set(&synthesized, &"clientY".into(), &start.client_y.into());
                let _ = Reflect::set(&synthesized, &"shiftKey".into(), &start.shift_key.into());
                let _ = Reflect::set(&synthesized, &"button".into(), &start.button.into());
                let _ = Reflect::set(&synthesized, &"which".into(), &(start.button + 1).into());
                log_js_error(
                    "Box zoom mouse-down failed",
                    forward.call1(&this, &synthesized),
                );
            }
        }) as Box<dyn FnMut(MouseEvent)>);

        let mut hooks = HookState::default();
        if swap_mouse_down(&handler, on_mouse_down.as_ref())? {
            hooks.bound();
        }
        Ok(Self {
            handler,
            native,
            trigger,
            hooks,
            _on_mouse_down: on_mouse_down,
        })
    }
}

// Leaflet binds _onMouseDown when hooks are added, re-add them after the swap.
// Returns whether the new listener ended up hooked.
fn swap_mouse_down(handler: &JsValue, listener: &JsValue) -> Result<bool, JsValue> {
    let hooked = call0(handler, "enabled")?.is_truthy();
    if hooked {
        call0(handler, "removeHooks")?;
    }
    Reflect::set(handler, &"_onMouseDown".into(), listener)?;
    if hooked {
        call0(handler, "addHooks")?;
    }
    Ok(hooked)
}

impl LeafletBoxZoom {
    fn restore_native(&self) -> Result<(), JsValue> {
        let host_enabled = call0(&self.handler, "enabled")?.is_truthy();
        let steps = self.hooks.restore(host_enabled);
        if steps.remove_hooks {
            call0(&self.handler, "removeHooks")?;
        }
        Reflect::set(&self.handler, &"_onMouseDown".into(), self.native.as_ref())?;
        if steps.add_hooks {
            call0(&self.handler, "addHooks")?;
        }
        Ok(())
    }
}

impl Drop for LeafletBoxZoom {
    fn drop(&mut self) {
        if let Err(e) = self.restore_native() {
            crate::console_error!("Failed to restore box zoom handler: {:?}", e);
        }
    }
}

impl BoxZoomGesture for LeafletBoxZoom {
    fn enabled(&self) -> bool {
        call0(&self.handler, "enabled")
            .map(|v| v.is_truthy())
            .unwrap_or(false)
    }

    fn add_hooks(&mut self) {
        match call0(&self.handler, "addHooks") {
            Ok(_) => self.hooks.bound(),
            Err(e) => crate::console_error!("Failed to add box zoom hooks: {:?}", e),
        }
    }

    fn trigger(&self) -> Rc<dyn GestureTrigger> {
        Rc::clone(&*self.trigger.borrow())
    }

    fn set_trigger(&mut self, trigger: Rc<dyn GestureTrigger>) {
        *self.trigger.borrow_mut() = trigger;
    }
}

pub struct LeafletMap {
    map: JsValue,
    box_zoom: LeafletBoxZoom,
}

impl LeafletMap {
    pub fn new(map: JsValue) -> Result<Self, JsValue> {
        let handler = get(&map, "boxZoom")?;
        if handler.is_undefined() {
            return Err(JsValue::from_str("Map has no boxZoom handler"));
        }
        let box_zoom = LeafletBoxZoom::install(handler)?;
        Ok(Self { map, box_zoom })
    }

    fn number(&self, method: &str) -> f64 {
        call0(&self.map, method)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::NAN)
    }

    fn container(&self) -> Option<Element> {
        call0(&self.map, "getContainer").ok()?.dyn_into().ok()
    }

    fn zoom_control_container(&self) -> Option<Element> {
        let control = get(&self.map, "zoomControl").ok()?;
        if control.is_undefined() || control.is_null() {
            return None;
        }
        get(&control, "_container").ok()?.dyn_into().ok()
    }
}

impl MapHandle for LeafletMap {
    type Element = Element;
    type BoxZoom = LeafletBoxZoom;

    fn zoom(&self) -> f64 {
        self.number("getZoom")
    }

    fn max_zoom(&self) -> f64 {
        self.number("getMaxZoom")
    }

    fn has_zoom_control(&self) -> bool {
        self.zoom_control_container().is_some()
    }

    fn set_dragging(&mut self, enabled: bool) {
        if let Ok(dragging) = get(&self.map, "dragging") {
            let method = if enabled { "enable" } else { "disable" };
            log_js_error("Failed to toggle map dragging", call0(&dragging, method));
        }
    }

    fn set_container_class(&mut self, class: &str, on: bool) {
        if let Some(container) = self.container() {
            container.set_class(class, on);
        }
    }

    fn box_zoom(&mut self) -> &mut LeafletBoxZoom {
        &mut self.box_zoom
    }

    fn create_button(
        &mut self,
        placement: ButtonPlacement,
        options: &ZoomBoxOptions,
    ) -> (Element, Element) {
        let document = web_sys::window().and_then(|w| w.document());
        let create = |tag: &str| -> Option<Element> { document.as_ref()?.create_element(tag).ok() };

        let existing = match placement {
            ButtonPlacement::ExistingZoomControl => self.zoom_control_container(),
            ButtonPlacement::StandaloneBar => None,
        };
        let container = existing.or_else(|| {
            let bar = create("div")?;
            bar.set_class_name(&format!("{} {}", BAR_CLASS, options.css_class));
            Some(bar)
        });
        let button = create("a");

        match (container, button) {
            (Some(container), Some(button)) => {
                button.set_class_name(&options.css_class);
                button.set_inner_html(&options.content);
                let _ = button.set_attribute("href", "#");
                let _ = button.set_attribute("title", &options.title);
                let _ = button.set_attribute("role", "button");
                let _ = container.append_child(&button);
                (container, button)
            }
            _ => {
                // No DOM to attach to; hand back detached placeholders
                let empty = Object::new().unchecked_into::<Element>();
                (empty.clone(), empty)
            }
        }
    }
}

/// Zoom box toolbar control for a Leaflet map.
#[wasm_bindgen(js_name = ZoomBoxControl)]
pub struct WasmZoomBoxControl {
    control: Rc<RefCell<ZoomBoxControl<LeafletMap>>>,
    map: JsValue,
    container: Option<Element>,
    listeners: Vec<(&'static str, Closure<dyn FnMut(JsValue)>)>,
    _on_click: Option<Closure<dyn FnMut(MouseEvent)>>,
}

#[wasm_bindgen(js_class = ZoomBoxControl)]
impl WasmZoomBoxControl {
    #[wasm_bindgen(constructor)]
    pub fn new(map: JsValue, options: JsValue) -> Result<WasmZoomBoxControl, JsValue> {
        let options: ZoomBoxOptions = if options.is_undefined() || options.is_null() {
            ZoomBoxOptions::default()
        } else {
            serde_wasm_bindgen::from_value(options)?
        };
        let leaflet = LeafletMap::new(map.clone())?;
        Ok(WasmZoomBoxControl {
            control: Rc::new(RefCell::new(ZoomBoxControl::new(leaflet, options))),
            map,
            container: None,
            listeners: Vec::new(),
            _on_click: None,
        })
    }

    /// Build the button, wire map listeners and return the control container.
    pub fn mount(&mut self) -> Result<Element, JsValue> {
        let container = self.control.borrow_mut().mount();

        let button = self.control.borrow().button().cloned();
        if let Some(button) = button {
            let control = Rc::clone(&self.control);
            let on_click = Closure::wrap(Box::new(move |event: MouseEvent| {
                event.prevent_default();
                event.stop_propagation();
                control.borrow_mut().click();
            }) as Box<dyn FnMut(MouseEvent)>);
            button.add_event_listener_with_callback("click", on_click.as_ref().unchecked_ref())?;
            self._on_click = Some(on_click);
        }

        let control = Rc::clone(&self.control);
        self.listen("zoomend", move |_| control.borrow_mut().on_zoom_changed())?;
        let control = Rc::clone(&self.control);
        self.listen("boxzoomend", move |_| control.borrow_mut().on_box_zoom_end())?;

        if let Some(html) = container.dyn_ref::<HtmlElement>() {
            html.set_title(&self.control.borrow().options().title);
        }
        console_log!("Zoom box control mounted ({})", self.control.borrow().options().position);
        self.container = Some(container.clone());
        Ok(container)
    }

    pub fn activate(&mut self) {
        self.control.borrow_mut().activate();
    }

    pub fn deactivate(&mut self) {
        self.control.borrow_mut().deactivate();
    }

    #[wasm_bindgen(getter)]
    pub fn active(&self) -> bool {
        self.control.borrow().is_active()
    }

    #[wasm_bindgen(getter)]
    pub fn position(&self) -> String {
        self.control.borrow().options().corner().to_string()
    }

    /// Deactivate and detach all map listeners.
    pub fn unmount(&mut self) {
        self.control.borrow_mut().unmount();
        for (event, listener) in self.listeners.drain(..) {
            log_js_error(
                "Failed to remove map listener",
                call2(&self.map, "off", &JsValue::from_str(event), listener.as_ref()),
            );
        }
        self._on_click = None;
        if let Some(container) = self.container.take() {
            container.remove();
        }
    }
}

/// Create a zoom box control and add it to `map` at its configured corner.
/// Returns the `L.Control` wrapping it.
#[wasm_bindgen]
pub fn add_zoom_box_control(map: JsValue, options: JsValue) -> Result<JsValue, JsValue> {
    let control = WasmZoomBoxControl::new(map.clone(), options)?;
    let position = control.position();
    let leaflet_control = crate::add_zoom_box_control_to_map(&map, JsValue::from(control), &position)?;
    console_log!("Zoom box control added at {}", position);
    Ok(leaflet_control)
}

impl WasmZoomBoxControl {
    fn listen<F>(&mut self, event: &'static str, handler: F) -> Result<(), JsValue>
    where
        F: FnMut(JsValue) + 'static,
    {
        let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(JsValue)>);
        call2(&self.map, "on", &JsValue::from_str(event), closure.as_ref())?;
        self.listeners.push((event, closure));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_disabled_handler_is_left_alone() {
        let steps = HookState::default().restore(false);
        assert_eq!(steps, Restore { remove_hooks: false, add_hooks: false });
    }

    #[test]
    fn hooks_added_while_disabled_are_removed() {
        let mut hooks = HookState::default();
        hooks.bound();
        let steps = hooks.restore(false);
        assert!(steps.remove_hooks);
        assert!(!steps.add_hooks);
    }

    #[test]
    fn enabled_handler_is_rehooked_with_the_native_listener() {
        let steps = HookState::default().restore(true);
        assert_eq!(steps, Restore { remove_hooks: true, add_hooks: true });

        let mut hooks = HookState::default();
        hooks.bound();
        assert_eq!(hooks.restore(true), steps);
    }
}
