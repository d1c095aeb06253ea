// Canvas and download glue for the panorama exporter.
use std::f64::consts::PI;

use futures::channel::oneshot;
use js_sys::Date;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Blob, CanvasRenderingContext2d, Document, HtmlAnchorElement, HtmlCanvasElement, Url, Window,
};

use crate::panorama::{
    export_file_name, invalid_input, render_panorama, ExportError, ExportOptions, PanoramaLayout,
    PanoramaSurface, ProfilePoint, RiseSetLocation, SourceKind, MIN_EXPORT_WIDTH,
};
use crate::{console_error, console_log};

fn render_error(e: JsValue) -> ExportError {
    ExportError::Render(format!("{:?}", e))
}

/// [`PanoramaSurface`] over a 2D canvas context.
pub struct CanvasSurface {
    ctx: CanvasRenderingContext2d,
}

impl CanvasSurface {
    pub fn new(ctx: CanvasRenderingContext2d) -> Self {
        Self { ctx }
    }

    fn trace(&self, points: &[(f64, f64)]) {
        self.ctx.begin_path();
        for (i, &(x, y)) in points.iter().enumerate() {
            if i == 0 {
                self.ctx.move_to(x, y);
            } else {
                self.ctx.line_to(x, y);
            }
        }
        self.ctx.close_path();
    }
}

impl PanoramaSurface for CanvasSurface {
    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: &str) -> Result<(), ExportError> {
        self.ctx.set_fill_style_str(color);
        self.ctx.fill_rect(x, y, w, h);
        Ok(())
    }

    fn fill_gradient_path(
        &mut self,
        points: &[(f64, f64)],
        top_y: f64,
        bottom_y: f64,
        top_color: &str,
        bottom_color: &str,
    ) -> Result<(), ExportError> {
        let gradient = self.ctx.create_linear_gradient(0.0, top_y, 0.0, bottom_y);
        gradient.add_color_stop(0.0, top_color).map_err(render_error)?;
        gradient.add_color_stop(1.0, bottom_color).map_err(render_error)?;
        self.ctx.set_fill_style_canvas_gradient(&gradient);
        self.trace(points);
        self.ctx.fill();
        Ok(())
    }

    fn fill_circle(
        &mut self,
        x: f64,
        y: f64,
        radius: f64,
        fill: &str,
        fill_opacity: f64,
        stroke: &str,
        stroke_width: f64,
    ) -> Result<(), ExportError> {
        self.ctx.begin_path();
        self.ctx.arc(x, y, radius, 0.0, 2.0 * PI).map_err(render_error)?;
        self.ctx.set_fill_style_str(fill);
        self.ctx.set_global_alpha(fill_opacity);
        self.ctx.fill();
        self.ctx.set_global_alpha(1.0);
        self.ctx.set_stroke_style_str(stroke);
        self.ctx.set_line_width(stroke_width);
        self.ctx.stroke();
        Ok(())
    }

    fn stroke_line(
        &mut self,
        from: (f64, f64),
        to: (f64, f64),
        color: &str,
        width: f64,
    ) -> Result<(), ExportError> {
        self.ctx.begin_path();
        self.ctx.move_to(from.0, from.1);
        self.ctx.line_to(to.0, to.1);
        self.ctx.set_stroke_style_str(color);
        self.ctx.set_line_width(width);
        self.ctx.stroke();
        Ok(())
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, color: &str, font: &str) -> Result<(), ExportError> {
        self.ctx.set_font(font);
        self.ctx.set_text_align("center");
        self.ctx.set_fill_style_str(color);
        self.ctx.fill_text(text, x, y).map_err(render_error)
    }
}

fn window_and_document() -> Result<(Window, Document), ExportError> {
    let window = web_sys::window().ok_or_else(|| ExportError::Render("no window".to_string()))?;
    let document = window
        .document()
        .ok_or_else(|| ExportError::Render("no document".to_string()))?;
    Ok((window, document))
}

fn create_canvas(document: &Document, layout: &PanoramaLayout) -> Result<(HtmlCanvasElement, CanvasRenderingContext2d), ExportError> {
    let canvas: HtmlCanvasElement = document
        .create_element("canvas")
        .map_err(render_error)?
        .dyn_into()
        .map_err(|_| ExportError::Render("not a canvas element".to_string()))?;
    canvas.set_width(layout.width);
    canvas.set_height(layout.height);
    let ctx = canvas
        .get_context("2d")
        .map_err(render_error)?
        .ok_or_else(|| ExportError::Render("2d context unavailable".to_string()))?
        .dyn_into::<CanvasRenderingContext2d>()
        .map_err(|_| ExportError::Render("2d context unavailable".to_string()))?;
    Ok((canvas, ctx))
}

async fn canvas_to_png(canvas: &HtmlCanvasElement) -> Result<Blob, ExportError> {
    let (tx, rx) = oneshot::channel::<JsValue>();
    let callback = Closure::once(move |blob: JsValue| {
        let _ = tx.send(blob);
    });
    canvas
        .to_blob_with_type(callback.as_ref().unchecked_ref(), "image/png")
        .map_err(|_| ExportError::Blob)?;
    let blob = rx.await.map_err(|_| ExportError::Blob)?;
    // toBlob hands back null when encoding fails
    blob.dyn_into::<Blob>().map_err(|_| ExportError::Blob)
}

fn download(window: &Window, document: &Document, blob: &Blob, file_name: &str, revoke_delay_ms: i32) -> Result<(), ExportError> {
    let download_error = |e: JsValue| ExportError::Download(format!("{:?}", e));
    let url = Url::create_object_url_with_blob(blob).map_err(download_error)?;

    let anchor: HtmlAnchorElement = document
        .create_element("a")
        .map_err(download_error)?
        .dyn_into()
        .map_err(|_| ExportError::Download("not an anchor element".to_string()))?;
    anchor.set_href(&url);
    anchor.set_download(file_name);
    let body = document
        .body()
        .ok_or_else(|| ExportError::Download("document has no body".to_string()))?;
    body.append_child(&anchor).map_err(download_error)?;
    anchor.click();
    anchor.remove();

    // Revoking right away can cancel the download in some browsers
    let revoke = Closure::once_into_js(move || {
        let _ = Url::revoke_object_url(&url);
    });
    window
        .set_timeout_with_callback_and_timeout_and_arguments_0(revoke.unchecked_ref(), revoke_delay_ms)
        .map_err(download_error)?;
    Ok(())
}

async fn export(
    kind: SourceKind,
    prefix: &str,
    profile: &[ProfilePoint],
    locations: &[RiseSetLocation],
    options: &ExportOptions,
) -> Result<String, ExportError> {
    if profile.is_empty() {
        return Err(ExportError::EmptyProfile);
    }

    let (window, document) = window_and_document()?;
    let canvas_id = options.canvas_id(kind);
    let source: HtmlCanvasElement = document
        .get_element_by_id(canvas_id)
        .and_then(|e| e.dyn_into().ok())
        .ok_or_else(|| ExportError::MissingCanvas(canvas_id.to_string()))?;

    let layout = PanoramaLayout::new(profile, source.height() as f64, options.min_width)?;
    console_log!(
        "Exporting {}x{} panorama from {} samples",
        layout.width,
        layout.height,
        layout.sample_count
    );

    let (canvas, ctx) = create_canvas(&document, &layout)?;
    let mut surface = CanvasSurface::new(ctx);
    let summary = render_panorama(&mut surface, &layout, profile, locations, kind, options)?;

    let blob = canvas_to_png(&canvas).await?;
    let iso_date: String = Date::new_0().to_iso_string().into();
    let file_name = export_file_name(prefix, &iso_date, Date::now() as u64);
    download(&window, &document, &blob, &file_name, options.revoke_delay_ms)?;

    console_log!(
        "Panorama exported as {} ({} markers, {} labels)",
        file_name,
        summary.markers,
        summary.labels
    );
    Ok(file_name)
}

fn decode_list<T: serde::de::DeserializeOwned>(
    what: &'static str,
    value: JsValue,
) -> Result<Vec<T>, ExportError> {
    if value.is_undefined() || value.is_null() {
        Ok(Vec::new())
    } else {
        invalid_input(what, serde_wasm_bindgen::from_value(value))
    }
}

fn decode_options(value: JsValue) -> Result<ExportOptions, ExportError> {
    if value.is_undefined() || value.is_null() {
        Ok(ExportOptions::default())
    } else {
        invalid_input("options", serde_wasm_bindgen::from_value(value))
    }
}

async fn decode_and_export(
    kind: &str,
    prefix: &str,
    profile: JsValue,
    locations: JsValue,
    options: JsValue,
) -> Result<String, ExportError> {
    let options = decode_options(options)?;
    let profile: Vec<ProfilePoint> = decode_list("profile", profile)?;
    let locations: Vec<RiseSetLocation> = decode_list("locations", locations)?;
    let kind = kind.parse::<SourceKind>()?;
    export(kind, prefix, &profile, &locations, &options).await
}

fn alert(message: &str) {
    if let Some(window) = web_sys::window() {
        let _ = window.alert_with_message(message);
    }
}

/// Render the full 360° panorama and download it as a PNG.
///
/// `kind` is `"silhouette"` or `"hillshade"`. Resolves to the file name once
/// the download has been triggered. Every failure, bad input included, is
/// logged, alerted and rejected.
#[wasm_bindgen]
pub async fn export_panorama(
    kind: String,
    prefix: String,
    profile: JsValue,
    locations: JsValue,
    options: JsValue,
) -> Result<String, JsValue> {
    let result = decode_and_export(&kind, &prefix, profile, locations, options).await;

    result.map_err(|e| {
        console_error!("Panorama export failed: {}", e);
        let message = match e {
            ExportError::EmptyProfile => e.to_string(),
            _ => format!("Failed to export panorama: {}", e),
        };
        alert(&message);
        JsValue::from_str(&message)
    })
}

/// Output size for a profile without rendering it.
#[wasm_bindgen]
pub fn panorama_dimensions(
    sample_count: usize,
    max_altitude: f64,
    reference_height: f64,
) -> Result<JsValue, JsValue> {
    let layout = PanoramaLayout::from_parts(sample_count, max_altitude, reference_height, MIN_EXPORT_WIDTH)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(serde_wasm_bindgen::to_value(&layout)?)
}
