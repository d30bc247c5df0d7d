//! Bitmap rendering pipeline
//!
//! Turns a feedback value into the raw RGBA buffer a control's display expects:
//!
//! 1. black background
//! 2. pressed controls get a fixed inset (translate 5%, scale 0.9)
//! 3. scale factor = height / 72 so all renderers size things alike
//! 4. the renderer for the feedback kind draws into a vector scene
//! 5. the scene is rasterized to exactly width x height pixels

pub mod renderers;
pub mod scene;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use resvg::{tiny_skia, usvg};
use tracing::{debug, trace, warn};

use crate::error::GatewayError;
use crate::feedback::Feedback;
use renderers::renderer_for;
use scene::Scene;

/// Reference display height the renderers are designed for
pub const REFERENCE_HEIGHT: f32 = 72.0;

const PRESSED_OFFSET: f32 = 0.05;
const PRESSED_SCALE: f32 = 0.9;

/// Bundled fonts looked up at startup
const FONT_FILES: [&str; 2] = ["roboto-condensed-regular.ttf", "roboto-condensed-700.ttf"];

/// Raw RGBA pixels, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Bytes,
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y * self.width + x) * 4) as usize;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Write the buffer as a PNG (used by `--preview`)
    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        let img = image::RgbaImage::from_raw(self.width, self.height, self.data.to_vec())
            .context("pixel buffer size does not match its dimensions")?;
        img.save(path)
            .with_context(|| format!("Failed to write PNG: {}", path.display()))?;
        Ok(())
    }
}

/// Pressed-state transform applied around everything a renderer draws
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressTransform {
    pub translate_x: f32,
    pub translate_y: f32,
    pub scale: f32,
}

impl PressTransform {
    pub fn identity() -> Self {
        Self {
            translate_x: 0.0,
            translate_y: 0.0,
            scale: 1.0,
        }
    }

    pub fn for_state(width: u32, height: u32, is_pressed: bool) -> Self {
        if !is_pressed {
            return Self::identity();
        }
        Self {
            translate_x: width as f32 * PRESSED_OFFSET,
            translate_y: height as f32 * PRESSED_OFFSET,
            scale: PRESSED_SCALE,
        }
    }

    pub fn to_svg(&self) -> String {
        format!(
            "translate({:.3} {:.3}) scale({:.3})",
            self.translate_x, self.translate_y, self.scale
        )
    }
}

/// Parameters every renderer is invoked with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    pub width: f32,
    pub height: f32,
    pub scale_factor: f32,
    pub transform: PressTransform,
}

impl RenderContext {
    pub fn new(width: u32, height: u32, is_pressed: bool) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
            scale_factor: height as f32 / REFERENCE_HEIGHT,
            transform: PressTransform::for_state(width, height, is_pressed),
        }
    }
}

/// Shared renderer state (font database). Cheap to clone.
#[derive(Clone)]
pub struct RenderPipeline {
    options: Arc<usvg::Options<'static>>,
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPipeline {
    /// Pipeline without any fonts loaded (text draws nothing)
    pub fn new() -> Self {
        Self {
            options: Arc::new(usvg::Options::default()),
        }
    }

    /// Boot the pipeline: load system fonts plus the bundled fonts found in
    /// `<exe dir>/assets`, `<cwd>/assets`, `<cwd>` and `extra_paths`.
    pub async fn init(extra_paths: &[PathBuf]) -> Self {
        let mut options = usvg::Options::default();
        options.font_family = "Roboto Condensed".to_string();

        let fontdb = options.fontdb_mut();
        fontdb.load_system_fonts();

        let found = find_files(&FONT_FILES, &font_search_paths(extra_paths)).await;
        debug!("Found {} bundled fonts to be loaded", found.len());
        for path in &found {
            if let Err(e) = fontdb.load_font_file(path) {
                warn!("Failed to load font {}: {}", path.display(), e);
            }
        }
        debug!("Renderer initialized with {} font faces", fontdb.len());

        Self {
            options: Arc::new(options),
        }
    }

    /// Build the vector scene for a feedback (deterministic)
    pub fn compose(
        &self,
        feedback: Option<&Feedback>,
        width: u32,
        height: u32,
        is_pressed: bool,
    ) -> Result<String, GatewayError> {
        let ctx = RenderContext::new(width, height, is_pressed);
        let mut scene = Scene::new();

        if let Some(feedback) = feedback {
            renderer_for(&feedback.content).render(feedback, &ctx, &mut scene)?;
        }

        Ok(scene.into_document(width, height, &ctx.transform))
    }

    /// Render a feedback (or blank) to an RGBA buffer of exactly width x height
    pub fn render(
        &self,
        feedback: Option<&Feedback>,
        width: u32,
        height: u32,
        is_pressed: bool,
    ) -> Result<PixelBuffer, GatewayError> {
        let document = self.compose(feedback, width, height, is_pressed)?;
        trace!("Rendering {}x{} scene ({} bytes)", width, height, document.len());

        let tree = usvg::Tree::from_str(&document, &self.options)
            .map_err(|e| GatewayError::render(format!("scene rejected: {}", e)))?;
        let mut pixmap = tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| GatewayError::render(format!("invalid bitmap size {}x{}", width, height)))?;

        resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        let data: Vec<u8> = pixmap
            .pixels()
            .iter()
            .flat_map(|px| {
                let c = px.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            })
            .collect();

        Ok(PixelBuffer {
            width,
            height,
            data: Bytes::from(data),
        })
    }
}

fn font_search_paths(extra_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        paths.push(exe_dir.join("assets"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("assets"));
        paths.push(cwd);
    }
    paths.extend(extra_paths.iter().cloned());
    paths
}

/// First readable location of each file, in search order
async fn find_files(files: &[&str], search_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut result = Vec::new();
    for file in files {
        for dir in search_paths {
            let candidate = dir.join(file);
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                result.push(candidate);
                break;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackContent, Tally};

    fn indicator(color: &str) -> Feedback {
        Feedback::from_content(FeedbackContent::Indicator {
            color: color.to_string(),
            label: None,
        })
    }

    #[test]
    fn test_blank_is_black() {
        let buf = RenderPipeline::new().render(None, 72, 72, false).unwrap();
        assert_eq!(buf.as_bytes().len(), 72 * 72 * 4);
        assert_eq!(buf.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(buf.pixel(71, 71), Some([0, 0, 0, 255]));
        assert_eq!(buf.pixel(72, 0), None);
    }

    #[test]
    fn test_exact_dimensions() {
        let buf = RenderPipeline::new()
            .render(Some(&indicator("#ff0000")), 200, 100, false)
            .unwrap();
        assert_eq!((buf.width(), buf.height()), (200, 100));
        assert_eq!(buf.as_bytes().len(), 200 * 100 * 4);
        assert_eq!(buf.pixel(100, 50), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_render_is_deterministic() {
        let pipeline = RenderPipeline::new();
        let fb = Feedback::from_content(FeedbackContent::Gauge {
            value: 0.4,
            label: Some("VOL".into()),
        })
        .with_tally(Tally::ACTIVE);

        let a = pipeline.render(Some(&fb), 96, 96, true).unwrap();
        let b = pipeline.render(Some(&fb), 96, 96, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pressed_context_differs_only_by_transform() {
        let up = RenderContext::new(120, 80, false);
        let down = RenderContext::new(120, 80, true);

        assert_eq!(up.width, down.width);
        assert_eq!(up.height, down.height);
        assert_eq!(up.scale_factor, down.scale_factor);
        assert_eq!(up.transform, PressTransform::identity());
        assert_eq!(
            down.transform,
            PressTransform {
                translate_x: 6.0,
                translate_y: 4.0,
                scale: 0.9
            }
        );
    }

    #[test]
    fn test_pressed_scene_differs_only_in_group_transform() {
        let pipeline = RenderPipeline::new();
        let fb = Feedback::text("REC").with_tally(Tally::ACTIVE);

        let up = pipeline.compose(Some(&fb), 72, 72, false).unwrap();
        let down = pipeline.compose(Some(&fb), 72, 72, true).unwrap();

        let differing: Vec<(&str, &str)> = up
            .lines()
            .zip(down.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(
            differing,
            vec![(
                r#"<g transform="translate(0.000 0.000) scale(1.000)">"#,
                r#"<g transform="translate(3.600 3.600) scale(0.900)">"#
            )]
        );
    }

    #[test]
    fn test_pressed_insets_the_drawing() {
        let pipeline = RenderPipeline::new();
        let fb = Feedback::from_content(FeedbackContent::Text { text: String::new() })
            .with_tally(Tally::ACTIVE);

        let up = pipeline.render(Some(&fb), 100, 100, false).unwrap();
        let down = pipeline.render(Some(&fb), 100, 100, true).unwrap();

        // Unpressed tally background reaches the corner, pressed leaves a black border
        assert_eq!(up.pixel(1, 1), Some([192, 0, 0, 255]));
        assert_eq!(down.pixel(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(down.pixel(50, 50), Some([192, 0, 0, 255]));
    }

    #[test]
    fn test_zero_size_is_render_error() {
        let err = RenderPipeline::new().render(None, 0, 72, false).unwrap_err();
        assert!(matches!(err, GatewayError::Render(_)));
    }

    #[tokio::test]
    async fn test_find_files_first_match_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("a.ttf"), b"x").unwrap();
        std::fs::write(first.path().join("b.ttf"), b"x").unwrap();
        std::fs::write(second.path().join("b.ttf"), b"x").unwrap();

        let found = find_files(
            &["a.ttf", "b.ttf", "missing.ttf"],
            &[first.path().to_path_buf(), second.path().to_path_buf()],
        )
        .await;

        assert_eq!(
            found,
            vec![second.path().join("a.ttf"), first.path().join("b.ttf")]
        );
    }
}
