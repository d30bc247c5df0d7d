//! Per-kind drawing strategies

use std::path::Path;

use super::scene::Scene;
use super::RenderContext;
use crate::error::GatewayError;
use crate::feedback::{Feedback, FeedbackContent, StylePreset, Tally};

/// Font size in reference units when the style does not set one
const DEFAULT_FONT_SIZE: f32 = 16.0;
const DEFAULT_TEXT_COLOR: &str = "#ffffff";
const ACTIVE_TALLY_COLOR: &str = "#c00000";
const NEXT_TALLY_COLOR: &str = "#00a000";
const GAUGE_TRACK_COLOR: &str = "#333333";
const GAUGE_FILL_COLOR: &str = "#e0e0e0";

/// Draws one feedback kind into a scene
pub trait TypeRenderer: Send + Sync {
    fn render(
        &self,
        feedback: &Feedback,
        ctx: &RenderContext,
        scene: &mut Scene,
    ) -> Result<(), GatewayError>;
}

/// Pick the renderer for a feedback kind
pub fn renderer_for(content: &FeedbackContent) -> &'static dyn TypeRenderer {
    match content {
        FeedbackContent::Text { .. } => &TextRenderer,
        FeedbackContent::Indicator { .. } => &IndicatorRenderer,
        FeedbackContent::Gauge { .. } => &GaugeRenderer,
        FeedbackContent::Image { .. } => &ImageRenderer,
    }
}

fn style_of(feedback: &Feedback) -> StylePreset {
    feedback.style.clone().unwrap_or_default()
}

/// Background from the style, else from the tally
fn background_color(feedback: &Feedback, style: &StylePreset) -> Option<String> {
    if let Some(color) = &style.background_color {
        return Some(color.clone());
    }
    let tally = feedback.tally_bits();
    if tally.contains(Tally::ACTIVE) {
        Some(ACTIVE_TALLY_COLOR.to_string())
    } else if tally.contains(Tally::NEXT) {
        Some(NEXT_TALLY_COLOR.to_string())
    } else {
        None
    }
}

fn draw_background(feedback: &Feedback, style: &StylePreset, ctx: &RenderContext, scene: &mut Scene) {
    if let Some(color) = background_color(feedback, style) {
        scene.rect(0.0, 0.0, ctx.width, ctx.height, &color);
    }
}

fn draw_label(label: &str, center_y: f32, style: &StylePreset, ctx: &RenderContext, scene: &mut Scene) {
    let font_size = style.font_size.unwrap_or(DEFAULT_FONT_SIZE) * ctx.scale_factor;
    scene.text_block(
        label,
        ctx.width / 2.0,
        center_y,
        font_size,
        style.text_color.as_deref().unwrap_or(DEFAULT_TEXT_COLOR),
        style.font_weight.as_deref().unwrap_or("normal"),
    );
}

pub struct TextRenderer;

impl TypeRenderer for TextRenderer {
    fn render(&self, feedback: &Feedback, ctx: &RenderContext, scene: &mut Scene) -> Result<(), GatewayError> {
        let FeedbackContent::Text { text } = &feedback.content else {
            return Err(GatewayError::render("text renderer got non-text feedback"));
        };
        let style = style_of(feedback);
        draw_background(feedback, &style, ctx, scene);
        draw_label(text, ctx.height / 2.0, &style, ctx, scene);
        Ok(())
    }
}

pub struct IndicatorRenderer;

impl TypeRenderer for IndicatorRenderer {
    fn render(&self, feedback: &Feedback, ctx: &RenderContext, scene: &mut Scene) -> Result<(), GatewayError> {
        let FeedbackContent::Indicator { color, label } = &feedback.content else {
            return Err(GatewayError::render("indicator renderer got non-indicator feedback"));
        };
        let style = style_of(feedback);
        let inset = 4.0 * ctx.scale_factor;
        scene.rounded_rect(
            inset,
            inset,
            ctx.width - 2.0 * inset,
            ctx.height - 2.0 * inset,
            6.0 * ctx.scale_factor,
            color,
        );
        if let Some(label) = label {
            draw_label(label, ctx.height / 2.0, &style, ctx, scene);
        }
        Ok(())
    }
}

pub struct GaugeRenderer;

impl TypeRenderer for GaugeRenderer {
    fn render(&self, feedback: &Feedback, ctx: &RenderContext, scene: &mut Scene) -> Result<(), GatewayError> {
        let FeedbackContent::Gauge { value, label } = &feedback.content else {
            return Err(GatewayError::render("gauge renderer got non-gauge feedback"));
        };
        let style = style_of(feedback);
        draw_background(feedback, &style, ctx, scene);

        let margin = 6.0 * ctx.scale_factor;
        let bar_height = 12.0 * ctx.scale_factor;
        let track_width = ctx.width - 2.0 * margin;
        let bar_y = ctx.height - margin - bar_height;
        let level = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };

        scene.rect(margin, bar_y, track_width, bar_height, GAUGE_TRACK_COLOR);
        scene.rect(
            margin,
            bar_y,
            track_width * level,
            bar_height,
            style.text_color.as_deref().unwrap_or(GAUGE_FILL_COLOR),
        );

        if let Some(label) = label {
            draw_label(label, bar_y / 2.0, &style, ctx, scene);
        }
        Ok(())
    }
}

pub struct ImageRenderer;

impl TypeRenderer for ImageRenderer {
    fn render(&self, feedback: &Feedback, ctx: &RenderContext, scene: &mut Scene) -> Result<(), GatewayError> {
        let FeedbackContent::Image { path } = &feedback.content else {
            return Err(GatewayError::render("image renderer got non-image feedback"));
        };
        if !Path::new(path).is_file() {
            return Err(GatewayError::render(format!("image not found: {}", path)));
        }
        let style = style_of(feedback);
        draw_background(feedback, &style, ctx, scene);
        scene.image(path, 0.0, 0.0, ctx.width, ctx.height);
        Ok(())
    }
}
