//! Vector scene assembled by the renderers and handed to the rasterizer
//!
//! Numbers are written with fixed precision so identical inputs always produce
//! byte-identical documents.

use quick_xml::escape::escape;
use std::fmt::Write;

use super::PressTransform;

const FONT_FAMILY: &str = "'Roboto Condensed', RobotoCnd, sans-serif";

/// Drawing calls collected for one bitmap
#[derive(Debug, Default)]
pub struct Scene {
    body: String,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rect(&mut self, x: f32, y: f32, width: f32, height: f32, fill: &str) {
        let _ = writeln!(
            self.body,
            r#"<rect x="{:.3}" y="{:.3}" width="{:.3}" height="{:.3}" fill="{}"/>"#,
            x,
            y,
            width.max(0.0),
            height.max(0.0),
            escape(fill)
        );
    }

    pub fn rounded_rect(&mut self, x: f32, y: f32, width: f32, height: f32, radius: f32, fill: &str) {
        let _ = writeln!(
            self.body,
            r#"<rect x="{:.3}" y="{:.3}" width="{:.3}" height="{:.3}" rx="{:.3}" fill="{}"/>"#,
            x,
            y,
            width.max(0.0),
            height.max(0.0),
            radius,
            escape(fill)
        );
    }

    /// Horizontally centred text block, vertically centred on `center_y`
    pub fn text_block(
        &mut self,
        text: &str,
        center_x: f32,
        center_y: f32,
        font_size: f32,
        fill: &str,
        weight: &str,
    ) {
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            return;
        }

        let line_height = font_size * 1.15;
        let first_baseline =
            center_y - (lines.len() - 1) as f32 * line_height / 2.0 + font_size * 0.35;

        let _ = writeln!(
            self.body,
            r#"<text font-family="{}" font-size="{:.3}" font-weight="{}" fill="{}" text-anchor="middle">"#,
            FONT_FAMILY,
            font_size,
            escape(weight),
            escape(fill)
        );
        for (i, line) in lines.iter().enumerate() {
            let _ = writeln!(
                self.body,
                r#"<tspan x="{:.3}" y="{:.3}">{}</tspan>"#,
                center_x,
                first_baseline + i as f32 * line_height,
                escape(*line)
            );
        }
        self.body.push_str("</text>\n");
    }

    pub fn image(&mut self, href: &str, x: f32, y: f32, width: f32, height: f32) {
        let _ = writeln!(
            self.body,
            r#"<image x="{:.3}" y="{:.3}" width="{:.3}" height="{:.3}" preserveAspectRatio="xMidYMid meet" xlink:href="{}"/>"#,
            x,
            y,
            width,
            height,
            escape(href)
        );
    }

    /// Wrap the drawing calls in a document: black background, then the
    /// (possibly pressed) transform around everything the renderer drew.
    pub fn into_document(self, width: u32, height: u32, transform: &PressTransform) -> String {
        let mut doc = String::with_capacity(self.body.len() + 256);
        let _ = writeln!(
            doc,
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = width,
            h = height
        );
        let _ = writeln!(
            doc,
            r#"<rect x="0" y="0" width="{}" height="{}" fill="black"/>"#,
            width, height
        );
        let _ = writeln!(doc, r#"<g transform="{}">"#, transform.to_svg());
        doc.push_str(&self.body);
        doc.push_str("</g>\n</svg>\n");
        doc
    }
}
