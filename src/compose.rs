use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, RgbImage};
use resvg::tiny_skia;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::Canvas;
use crate::wrap::{wrap, WrapError};

pub const BODY_FONT_SIZE: u32 = 24;
pub const WATERMARK_FONT_SIZE: u32 = 18;
pub const LINE_HEIGHT: u32 = 28;
/// Chars per line that fit a 600px wide canvas at `BODY_FONT_SIZE`.
const CHARS_PER_600PX: u32 = 40;
const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("background is {actual_width}x{actual_height}, canvas is {width}x{height}")]
    DimensionMismatch { width: u32, height: u32, actual_width: u32, actual_height: u32 },
    #[error("decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("overlay error: {0}")]
    Overlay(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error(transparent)]
    Wrap(#[from] WrapError),
    #[error("cannot load font file: {0}")]
    FontFile(#[source] std::io::Error),
    #[error("no usable font face, text would not render")]
    NoFonts,
}

/// Chars per body line for a given canvas width, never below one.
pub fn max_chars_per_line(canvas: Canvas) -> usize {
    ((canvas.width * CHARS_PER_600PX) / 600).max(1) as usize
}

fn escape(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

/// SVG document for the overlay: darkening rect, centered body block starting
/// at 30% height, watermark at 90% height.
pub fn build_overlay_svg(canvas: Canvas, font_family: &str, body_lines: &[String], watermark: &str) -> String {
    let Canvas { width, height } = canvas;
    let center_x = width as f32 / 2.0;
    let body_y = height * 3 / 10;
    let watermark_y = height * 9 / 10;
    let family = html_escape::encode_double_quoted_attribute(font_family);

    let mut body = String::new();
    if !body_lines.is_empty() {
        let spans: String = body_lines.iter().enumerate().map(|(index, line)| {
            let dy = if index == 0 { 0 } else { LINE_HEIGHT };
            format!(r#"<tspan x="{center_x}" dy="{dy}" text-anchor="middle">{}</tspan>"#, escape(line))
        }).collect();
        body = format!(
            r#"<text x="{center_x}" y="{body_y}" font-size="{BODY_FONT_SIZE}" fill="white" text-anchor="middle" font-family="{family}">{spans}</text>"#
        );
    }

    format!(
        r#"<svg width="{width}" height="{height}" viewBox="0 0 {width} {height}" xmlns="http://www.w3.org/2000/svg">
<rect x="0" y="0" width="{width}" height="{height}" fill="black" fill-opacity="0.5"/>
{body}
<text x="{center_x}" y="{watermark_y}" font-size="{WATERMARK_FONT_SIZE}" fill="white" text-anchor="middle" font-family="{family}">{}</text>
</svg>"#,
        escape(watermark)
    )
}

/// Decodes `bytes` and, if needed, scales and center-crops them to `canvas`.
pub fn fit_background(bytes: &[u8], canvas: Canvas) -> Result<DynamicImage, ComposeError> {
    let img = image::load_from_memory(bytes)?;
    if img.width() == canvas.width && img.height() == canvas.height {
        return Ok(img);
    }
    debug!(from_w = img.width(), from_h = img.height(), to_w = canvas.width, to_h = canvas.height, "resizing background");
    Ok(img.resize_to_fill(canvas.width, canvas.height, FilterType::Triangle))
}

/// Renders text overlays onto backgrounds. Owns the font database; build one
/// at startup and share it.
pub struct Compositor {
    options: usvg::Options<'static>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("font_family", &self.options.font_family)
            .field("faces", &self.options.fontdb.faces().count())
            .finish()
    }
}

impl Compositor {
    pub fn new(font_file: Option<&Path>) -> Result<Self, ComposeError> {
        let mut fonts = usvg::fontdb::Database::new();
        fonts.load_system_fonts();
        if let Some(path) = font_file {
            fonts.load_font_file(path).map_err(ComposeError::FontFile)?;
        }
        Self::with_fonts(fonts)
    }

    /// An empty database is `NoFonts`: usvg drops text nodes it cannot shape.
    pub fn with_fonts(mut fonts: usvg::fontdb::Database) -> Result<Self, ComposeError> {
        let has_family = |name: &str| fonts.faces().any(|face| face.families.iter().any(|(f, _)| f == name));
        // Common sans families first, then whatever face is installed.
        let family = ["Arial", "Liberation Sans", "DejaVu Sans"]
            .into_iter()
            .find(|name| has_family(*name))
            .map(str::to_string)
            .or_else(|| fonts.faces().find_map(|face| face.families.first().map(|(f, _)| f.clone())))
            .ok_or(ComposeError::NoFonts)?;
        fonts.set_sans_serif_family(family.as_str());
        info!("🔤 Compositor ready with {} font faces (family: {})", fonts.faces().count(), family);

        let mut options = usvg::Options::default();
        options.font_family = family;
        options.fontdb = Arc::new(fonts);
        Ok(Self { options })
    }

    /// Merges the overlay on top of `background` and encodes the result as JPEG.
    pub fn compose(&self, background: &DynamicImage, canvas: Canvas, body_text: &str, watermark_text: &str) -> Result<Vec<u8>, ComposeError> {
        if background.width() != canvas.width || background.height() != canvas.height {
            return Err(ComposeError::DimensionMismatch {
                width: canvas.width,
                height: canvas.height,
                actual_width: background.width(),
                actual_height: background.height(),
            });
        }

        let lines = wrap(body_text, max_chars_per_line(canvas))?;
        let svg = build_overlay_svg(canvas, &self.options.font_family, &lines, watermark_text);
        let tree = usvg::Tree::from_str(&svg, &self.options)
            .map_err(|e| ComposeError::Overlay(e.to_string()))?;

        let mut rgba = background.to_rgba8().into_raw();
        premultiply_rgba8_in_place(&mut rgba);
        let size = tiny_skia::IntSize::from_wh(canvas.width, canvas.height)
            .ok_or_else(|| ComposeError::Overlay("canvas has zero area".into()))?;
        let mut pixmap = tiny_skia::Pixmap::from_vec(rgba, size)
            .ok_or_else(|| ComposeError::Overlay("background buffer does not match canvas".into()))?;

        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        // Premultiplied RGB is the image flattened over black.
        let rgb: Vec<u8> = pixmap.data().chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect();
        let merged = RgbImage::from_raw(canvas.width, canvas.height, rgb)
            .ok_or_else(|| ComposeError::Encode("merged buffer has wrong length".into()))?;

        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), JPEG_QUALITY);
        DynamicImage::ImageRgb8(merged)
            .write_with_encoder(encoder)
            .map_err(|e| ComposeError::Encode(e.to_string()))?;
        debug!(lines = lines.len(), bytes = out.len(), "composed image");
        Ok(out)
    }
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 255 {
            continue;
        }
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}
