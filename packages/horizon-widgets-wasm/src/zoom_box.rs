// Toolbar control that arms the map's box-zoom gesture without a held modifier key.
//
// The host map only starts a box zoom when shift is held. While the control
// is active the box-zoom gesture delegates pointer-down events to a
// `ModifierSynthesized` trigger that wraps the host's own trigger; on
// deactivation the exact original trigger is handed back.

use std::rc::Rc;

use serde::Deserialize;

pub const ACTIVE_CLASS: &str = "active";
pub const DISABLED_CLASS: &str = "leaflet-disabled";
pub const CROSSHAIR_CLASS: &str = "leaflet-crosshair";
pub const BAR_CLASS: &str = "leaflet-bar";

const PRIMARY_BUTTON: i16 = 0;
const RIGHT_BUTTON: i16 = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ZoomBoxOptions {
    pub position: String,
    pub add_to_existing_control: bool,
    pub content: String,
    pub css_class: String,
    pub modal: bool,
    pub title: String,
}

impl Default for ZoomBoxOptions {
    fn default() -> Self {
        Self {
            position: "topleft".to_string(),
            add_to_existing_control: false,
            content: "&#128269;".to_string(),
            css_class: "leaflet-zoom-box-control".to_string(),
            modal: false,
            title: "Zoom to specific area".to_string(),
        }
    }
}

const CORNERS: [&str; 4] = ["topleft", "topright", "bottomleft", "bottomright"];

impl ZoomBoxOptions {
    /// Leaflet control corner for `position`; unknown values fall back to `topleft`.
    pub fn corner(&self) -> &str {
        let position = self.position.trim();
        CORNERS
            .iter()
            .find(|corner| corner.eq_ignore_ascii_case(position))
            .copied()
            .unwrap_or(CORNERS[0])
    }
}

/// The parts of a pointer-down event the box-zoom gesture looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerDown {
    pub client_x: f64,
    pub client_y: f64,
    pub button: i16,
    pub shift_key: bool,
}

/// Decides whether a pointer-down starts a box zoom, and with which event.
pub trait GestureTrigger {
    /// Returns the event the box zoom should start from, or `None` to ignore it.
    fn pointer_down(&self, event: &PointerDown) -> Option<PointerDown>;
}

/// The host's native rule: shift held and the primary button pressed.
#[derive(Debug, Default)]
pub struct ModifierRequired;

impl GestureTrigger for ModifierRequired {
    fn pointer_down(&self, event: &PointerDown) -> Option<PointerDown> {
        if event.shift_key && event.button == PRIMARY_BUTTON {
            Some(*event)
        } else {
            None
        }
    }
}

/// Re-issues plain pointer-downs as shift-held primary presses and hands them
/// to the wrapped trigger. Right-button presses are dropped.
pub struct ModifierSynthesized {
    inner: Rc<dyn GestureTrigger>,
}

impl ModifierSynthesized {
    pub fn wrap(inner: Rc<dyn GestureTrigger>) -> Self {
        Self { inner }
    }
}

impl GestureTrigger for ModifierSynthesized {
    fn pointer_down(&self, event: &PointerDown) -> Option<PointerDown> {
        if event.button == RIGHT_BUTTON {
            return None;
        }
        let synthesized = PointerDown {
            client_x: event.client_x,
            client_y: event.client_y,
            button: PRIMARY_BUTTON,
            shift_key: true,
        };
        self.inner.pointer_down(&synthesized)
    }
}

/// Class toggles on a DOM element.
pub trait ClassList {
    fn set_class(&self, class: &str, on: bool);
    fn has_class(&self, class: &str) -> bool;
}

/// The host map's box-zoom handler.
pub trait BoxZoomGesture {
    fn enabled(&self) -> bool;
    fn add_hooks(&mut self);
    fn trigger(&self) -> Rc<dyn GestureTrigger>;
    fn set_trigger(&mut self, trigger: Rc<dyn GestureTrigger>);
}

/// Where the control button is placed on mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPlacement {
    StandaloneBar,
    ExistingZoomControl,
}

/// The host map as seen by the control.
pub trait MapHandle {
    type Element: ClassList;
    type BoxZoom: BoxZoomGesture;

    fn zoom(&self) -> f64;
    fn max_zoom(&self) -> f64;
    fn has_zoom_control(&self) -> bool;
    fn set_dragging(&mut self, enabled: bool);
    fn set_container_class(&mut self, class: &str, on: bool);
    fn box_zoom(&mut self) -> &mut Self::BoxZoom;

    /// Create the control container and its button. Returns `(container, button)`.
    fn create_button(
        &mut self,
        placement: ButtonPlacement,
        options: &ZoomBoxOptions,
    ) -> (Self::Element, Self::Element);
}

pub struct ZoomBoxControl<M: MapHandle> {
    map: M,
    options: ZoomBoxOptions,
    button: Option<M::Element>,
    original_trigger: Option<Rc<dyn GestureTrigger>>,
    active: bool,
}

impl<M: MapHandle> ZoomBoxControl<M> {
    pub fn new(map: M, options: ZoomBoxOptions) -> Self {
        Self {
            map,
            options,
            button: None,
            original_trigger: None,
            active: false,
        }
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    pub fn options(&self) -> &ZoomBoxOptions {
        &self.options
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn button(&self) -> Option<&M::Element> {
        self.button.as_ref()
    }

    /// Build the button and remember the host's own box-zoom trigger.
    pub fn mount(&mut self) -> M::Element {
        let placement = if self.options.add_to_existing_control && self.map.has_zoom_control() {
            ButtonPlacement::ExistingZoomControl
        } else {
            ButtonPlacement::StandaloneBar
        };
        let (container, button) = self.map.create_button(placement, &self.options);
        self.button = Some(button);
        self.original_trigger = Some(self.map.box_zoom().trigger());
        self.on_zoom_changed();
        container
    }

    /// Button click: toggle, but only arm the gesture below max zoom.
    pub fn click(&mut self) {
        self.active = !self.active;
        if self.active && self.map.zoom() != self.map.max_zoom() {
            self.activate();
        } else {
            self.deactivate();
        }
    }

    pub fn activate(&mut self) {
        if let Some(button) = &self.button {
            button.set_class(ACTIVE_CLASS, true);
        }
        self.map.set_dragging(false);

        let box_zoom = self.map.box_zoom();
        if !box_zoom.enabled() {
            box_zoom.add_hooks();
        }
        let original = match self.original_trigger.clone() {
            Some(original) => original,
            None => {
                let current = box_zoom.trigger();
                self.original_trigger = Some(Rc::clone(&current));
                current
            }
        };
        box_zoom.set_trigger(Rc::new(ModifierSynthesized::wrap(original)));
        crate::console_log!("Zoom box armed");
    }

    pub fn deactivate(&mut self) {
        if let Some(button) = &self.button {
            button.set_class(ACTIVE_CLASS, false);
        }
        self.map.set_dragging(true);
        if let Some(original) = &self.original_trigger {
            self.map.box_zoom().set_trigger(Rc::clone(original));
        }
        self.map.set_container_class(CROSSHAIR_CLASS, false);
        self.active = false;
    }

    /// Zoom level listener: box zoom is pointless at max zoom.
    pub fn on_zoom_changed(&mut self) {
        let at_max = self.map.zoom() == self.map.max_zoom();
        if let Some(button) = &self.button {
            button.set_class(DISABLED_CLASS, at_max);
        }
    }

    /// Box zoom finished. Modal controls are left for external code to reset.
    pub fn on_box_zoom_end(&mut self) {
        if !self.options.modal {
            self.deactivate();
        }
    }

    pub fn unmount(&mut self) {
        self.deactivate();
        self.button = None;
        self.original_trigger = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Clone, Default)]
    struct FakeElement(Rc<RefCell<HashSet<String>>>);

    impl ClassList for FakeElement {
        fn set_class(&self, class: &str, on: bool) {
            if on {
                self.0.borrow_mut().insert(class.to_string());
            } else {
                self.0.borrow_mut().remove(class);
            }
        }

        fn has_class(&self, class: &str) -> bool {
            self.0.borrow().contains(class)
        }
    }

    struct FakeBoxZoom {
        enabled: bool,
        hooks_added: usize,
        trigger: Rc<dyn GestureTrigger>,
    }

    impl BoxZoomGesture for FakeBoxZoom {
        fn enabled(&self) -> bool {
            self.enabled
        }

        fn add_hooks(&mut self) {
            self.hooks_added += 1;
            self.enabled = true;
        }

        fn trigger(&self) -> Rc<dyn GestureTrigger> {
            Rc::clone(&self.trigger)
        }

        fn set_trigger(&mut self, trigger: Rc<dyn GestureTrigger>) {
            self.trigger = trigger;
        }
    }

    struct FakeMap {
        zoom: f64,
        max_zoom: f64,
        zoom_control: bool,
        dragging: bool,
        container: FakeElement,
        placement: Option<ButtonPlacement>,
        box_zoom: FakeBoxZoom,
    }

    impl FakeMap {
        fn new(zoom: f64) -> Self {
            Self {
                zoom,
                max_zoom: 18.0,
                zoom_control: true,
                dragging: true,
                container: FakeElement::default(),
                placement: None,
                box_zoom: FakeBoxZoom {
                    enabled: false,
                    hooks_added: 0,
                    trigger: Rc::new(ModifierRequired),
                },
            }
        }
    }

    impl MapHandle for FakeMap {
        type Element = FakeElement;
        type BoxZoom = FakeBoxZoom;

        fn zoom(&self) -> f64 {
            self.zoom
        }

        fn max_zoom(&self) -> f64 {
            self.max_zoom
        }

        fn has_zoom_control(&self) -> bool {
            self.zoom_control
        }

        fn set_dragging(&mut self, enabled: bool) {
            self.dragging = enabled;
        }

        fn set_container_class(&mut self, class: &str, on: bool) {
            self.container.set_class(class, on);
        }

        fn box_zoom(&mut self) -> &mut FakeBoxZoom {
            &mut self.box_zoom
        }

        fn create_button(
            &mut self,
            placement: ButtonPlacement,
            _options: &ZoomBoxOptions,
        ) -> (FakeElement, FakeElement) {
            self.placement = Some(placement);
            (FakeElement::default(), FakeElement::default())
        }
    }

    fn plain_press() -> PointerDown {
        PointerDown {
            client_x: 10.0,
            client_y: 20.0,
            button: 0,
            shift_key: false,
        }
    }

    fn mounted(zoom: f64, options: ZoomBoxOptions) -> ZoomBoxControl<FakeMap> {
        let mut control = ZoomBoxControl::new(FakeMap::new(zoom), options);
        control.mount();
        control
    }

    #[test]
    fn native_trigger_requires_shift() {
        let trigger = ModifierRequired;
        assert!(trigger.pointer_down(&plain_press()).is_none());
        let shifted = PointerDown { shift_key: true, ..plain_press() };
        assert_eq!(trigger.pointer_down(&shifted), Some(shifted));
    }

    #[test]
    fn synthesized_trigger_adds_shift_and_drops_right_button() {
        let trigger = ModifierSynthesized::wrap(Rc::new(ModifierRequired));
        let started = trigger.pointer_down(&plain_press()).expect("box zoom starts");
        assert!(started.shift_key);
        assert_eq!(started.button, 0);
        assert_eq!((started.client_x, started.client_y), (10.0, 20.0));

        let right = PointerDown { button: 2, ..plain_press() };
        assert!(trigger.pointer_down(&right).is_none());
    }

    #[test]
    fn placement_follows_options_and_existing_control() {
        let standalone = mounted(5.0, ZoomBoxOptions::default());
        assert_eq!(standalone.map().placement, Some(ButtonPlacement::StandaloneBar));

        let options = ZoomBoxOptions {
            add_to_existing_control: true,
            ..ZoomBoxOptions::default()
        };
        let attached = mounted(5.0, options.clone());
        assert_eq!(attached.map().placement, Some(ButtonPlacement::ExistingZoomControl));

        let mut map = FakeMap::new(5.0);
        map.zoom_control = false;
        let mut control = ZoomBoxControl::new(map, options);
        control.mount();
        assert_eq!(control.map().placement, Some(ButtonPlacement::StandaloneBar));
    }

    #[test]
    fn click_arms_gesture_and_disables_panning() {
        let mut control = mounted(5.0, ZoomBoxOptions::default());
        control.click();

        assert!(control.is_active());
        assert!(!control.map().dragging);
        assert_eq!(control.map().box_zoom.hooks_added, 1);
        assert!(control.button().unwrap().has_class(ACTIVE_CLASS));

        let trigger = control.map_mut().box_zoom().trigger();
        assert!(trigger.pointer_down(&plain_press()).is_some());
    }

    #[test]
    fn click_at_max_zoom_stays_inactive() {
        let mut control = mounted(18.0, ZoomBoxOptions::default());
        assert!(control.button().unwrap().has_class(DISABLED_CLASS));

        control.click();
        assert!(!control.is_active());
        assert!(control.map().dragging);
        assert!(!control.button().unwrap().has_class(ACTIVE_CLASS));
    }

    #[test]
    fn deactivate_restores_exact_original_trigger() {
        let mut control = mounted(5.0, ZoomBoxOptions::default());
        let original = control.map_mut().box_zoom().trigger();

        control.click();
        let armed = control.map_mut().box_zoom().trigger();
        assert!(!Rc::ptr_eq(&original, &armed));

        control.map_mut().set_container_class(CROSSHAIR_CLASS, true);
        control.click();
        let restored = control.map_mut().box_zoom().trigger();
        assert!(Rc::ptr_eq(&original, &restored));
        assert!(!control.is_active());
        assert!(control.map().dragging);
        assert!(!control.map().container.has_class(CROSSHAIR_CLASS));
        assert!(restored.pointer_down(&plain_press()).is_none());
    }

    #[test]
    fn box_zoom_end_deactivates_unless_modal() {
        let mut control = mounted(5.0, ZoomBoxOptions::default());
        control.click();
        control.on_box_zoom_end();
        assert!(!control.is_active());

        let modal = ZoomBoxOptions {
            modal: true,
            ..ZoomBoxOptions::default()
        };
        let mut control = mounted(5.0, modal);
        control.click();
        control.on_box_zoom_end();
        assert!(control.is_active());
    }

    #[test]
    fn zoom_changes_toggle_disabled_state() {
        let mut control = mounted(5.0, ZoomBoxOptions::default());
        assert!(!control.button().unwrap().has_class(DISABLED_CLASS));
        control.map_mut().zoom = 18.0;
        control.on_zoom_changed();
        assert!(control.button().unwrap().has_class(DISABLED_CLASS));
        control.map_mut().zoom = 17.0;
        control.on_zoom_changed();
        assert!(!control.button().unwrap().has_class(DISABLED_CLASS));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: ZoomBoxOptions =
            serde_json::from_str(r#"{ "modal": true, "addToExistingControl": true }"#).unwrap();
        assert!(options.modal);
        assert!(options.add_to_existing_control);
        assert_eq!(options.position, "topleft");
        assert_eq!(options.css_class, "leaflet-zoom-box-control");
    }

    #[test]
    fn position_maps_to_a_control_corner() {
        let mut options = ZoomBoxOptions::default();
        assert_eq!(options.corner(), "topleft");
        options.position = "BottomRight".to_string();
        assert_eq!(options.corner(), "bottomright");
        options.position = "middle".to_string();
        assert_eq!(options.corner(), "topleft");
    }

    #[test]
    fn css_class_option_is_read() {
        let options: ZoomBoxOptions =
            serde_json::from_str(r#"{ "cssClass": "my-zoom", "position": "topright" }"#).unwrap();
        assert_eq!(options.css_class, "my-zoom");
        assert_eq!(options.position, "topright");
    }
}
