//! Pure drawing functions for the annotated video stream and preview assets.
//!
//! Every function takes an image plus display values and returns a new
//! image; none of them look at session state directly. Text is drawn only
//! when a font was loaded. Without one the background panels are still
//! drawn so the layout stays recognisable.

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use crate::gesture::Gesture;
use crate::session::VerificationState;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);

const TIMER_SIZE: f32 = 40.0;
const GESTURE_SIZE: f32 = 30.0;
const BADGE_SIZE: f32 = 40.0;
const DIAGNOSTIC_SIZE: f32 = 26.0;

/// Fonts tried when no explicit font path is configured.
pub const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
];

pub fn timer_text(remaining_secs: f32) -> String {
    format!("Time: {:.1}s", remaining_secs.max(0.0))
}

pub fn gesture_text(name: &str) -> String {
    format!("Gesture: {name}")
}

/// Badge label and colour for a verification state.
pub fn badge(state: VerificationState) -> (&'static str, Rgb<u8>) {
    match state {
        VerificationState::Waiting => ("Verifying...", YELLOW),
        VerificationState::Success => ("\u{2713} Verified", GREEN),
        VerificationState::Failure => ("\u{2717} Failed", RED),
    }
}

/// Draws overlays and preview cards with an optional TrueType font.
#[derive(Clone)]
pub struct OverlayRenderer {
    font: Option<FontArc>,
}

impl std::fmt::Debug for OverlayRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayRenderer")
            .field("has_font", &self.font.is_some())
            .finish()
    }
}

impl OverlayRenderer {
    pub fn new(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Renderer that draws panels and shapes only.
    pub fn without_font() -> Self {
        Self { font: None }
    }

    /// Load the configured font, falling back to common system fonts.
    pub fn load(configured: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = configured
            .map(|p| vec![p.to_path_buf()])
            .unwrap_or_else(|| FALLBACK_FONTS.iter().map(PathBuf::from).collect());

        for path in candidates {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            match FontArc::try_from_vec(bytes) {
                Ok(font) => {
                    tracing::info!(path = %path.display(), "overlay font loaded");
                    return Self::new(font);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid font file");
                }
            }
        }

        tracing::warn!("no overlay font available; stream overlays will omit text");
        Self::without_font()
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Remaining-time panel in the top-left corner.
    pub fn draw_timer(&self, frame: &RgbImage, remaining_secs: f32) -> RgbImage {
        let mut out = frame.clone();
        let text = timer_text(remaining_secs);
        let (tw, th) = self.measure(&text, TIMER_SIZE);
        shade(&mut out, 10, 10, tw + 20, th + 20);
        self.text(&mut out, &text, 20, 20, TIMER_SIZE, WHITE);
        out
    }

    /// Target gesture panel in the bottom-left corner.
    pub fn draw_gesture_name(&self, frame: &RgbImage, name: &str) -> RgbImage {
        let mut out = frame.clone();
        let text = gesture_text(name);
        let (tw, th) = self.measure(&text, GESTURE_SIZE);
        let h = out.height() as i32;
        shade(&mut out, 10, h - th as i32 - 30, tw + 20, th + 20);
        self.text(&mut out, &text, 20, h - th as i32 - 20, GESTURE_SIZE, WHITE);
        out
    }

    /// Tri-state verification badge in the top-right corner.
    pub fn draw_badge(&self, frame: &RgbImage, state: VerificationState) -> RgbImage {
        let mut out = frame.clone();
        let (text, color) = badge(state);
        let (tw, th) = self.measure(text, BADGE_SIZE);
        let w = out.width() as i32;
        shade(&mut out, w - tw as i32 - 30, 10, tw + 20, th + 20);
        self.text(&mut out, text, w - tw as i32 - 20, 20, BADGE_SIZE, color);
        out
    }

    /// Stacked diagnostic lines in green, starting at the top-left.
    pub fn draw_diagnostics(&self, frame: &RgbImage, lines: &[String]) -> RgbImage {
        let mut out = frame.clone();
        for (i, line) in lines.iter().enumerate() {
            self.text(&mut out, line, 10, 10 + 30 * i as i32, DIAGNOSTIC_SIZE, GREEN);
        }
        out
    }

    /// White 500x300 card naming the gesture and describing it.
    pub fn description_card(&self, gesture: &Gesture) -> RgbImage {
        let mut card = RgbImage::from_pixel(500, 300, WHITE);
        self.text(&mut card, &gesture_text(gesture.name), 50, 30, 32.0, BLACK);
        for (i, line) in wrap(gesture.description, 36).iter().enumerate() {
            self.text(&mut card, line, 50, 90 + 32 * i as i32, 24.0, BLACK);
        }
        card
    }

    /// Schematic 400x400 reference drawing: hand outline plus red key points.
    pub fn reference_image(gesture: &Gesture) -> RgbImage {
        let mut img = RgbImage::from_pixel(400, 400, WHITE);
        draw_hollow_rect_mut(&mut img, Rect::at(50, 50).of_size(300, 300), BLACK);
        draw_hollow_rect_mut(&mut img, Rect::at(51, 51).of_size(298, 298), BLACK);
        for &(x, y) in gesture.keypoints {
            draw_filled_circle_mut(&mut img, (x, y), 10, RED);
        }
        img
    }

    fn measure(&self, text: &str, size: f32) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(PxScale::from(size), font, text),
            // Rough advance of a proportional sans face
            None => (
                (text.chars().count() as f32 * size * 0.55) as u32,
                size as u32,
            ),
        }
    }

    fn text(&self, img: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(img, color, x, y, PxScale::from(size), font, text);
        }
    }
}

/// Darken a rectangle to half brightness, clipped to the image.
fn shade(img: &mut RgbImage, x: i32, y: i32, w: u32, h: u32) {
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = ((x + w as i32).max(0) as u32).min(img.width());
    let y1 = ((y + h as i32).max(0) as u32).min(img.height());
    for py in y0..y1 {
        for px in x0..x1 {
            let p = img.get_pixel_mut(px, py);
            for c in p.0.iter_mut() {
                *c /= 2;
            }
        }
    }
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture;

    #[test]
    fn timer_text_one_decimal() {
        assert_eq!(timer_text(4.26), "Time: 4.3s");
        assert_eq!(timer_text(0.04), "Time: 0.0s");
        assert_eq!(timer_text(-1.0), "Time: 0.0s");
    }

    #[test]
    fn badge_labels_and_colors() {
        assert_eq!(badge(VerificationState::Waiting), ("Verifying...", YELLOW));
        assert_eq!(badge(VerificationState::Success), ("✓ Verified", GREEN));
        assert_eq!(badge(VerificationState::Failure), ("✗ Failed", RED));
    }

    #[test]
    fn overlays_return_new_frame_same_size() {
        let frame = RgbImage::from_pixel(640, 480, WHITE);
        let r = OverlayRenderer::without_font();
        let out = r.draw_badge(&r.draw_timer(&frame, 3.0), VerificationState::Waiting);
        assert_eq!(out.dimensions(), (640, 480));
        // Input untouched, timer panel shaded
        assert_eq!(*frame.get_pixel(15, 15), WHITE);
        assert_eq!(*out.get_pixel(15, 15), Rgb([127, 127, 127]));
    }

    #[test]
    fn gesture_panel_at_bottom() {
        let frame = RgbImage::from_pixel(640, 480, WHITE);
        let out = OverlayRenderer::without_font().draw_gesture_name(&frame, "peace");
        assert_eq!(*out.get_pixel(15, 460), Rgb([127, 127, 127]));
        assert_eq!(*out.get_pixel(15, 15), WHITE);
    }

    #[test]
    fn shade_clips_to_bounds() {
        let mut img = RgbImage::from_pixel(20, 20, WHITE);
        shade(&mut img, -5, 15, 100, 100);
        assert_eq!(*img.get_pixel(0, 19), Rgb([127, 127, 127]));
        assert_eq!(*img.get_pixel(0, 0), WHITE);
    }

    #[test]
    fn reference_image_marks_keypoints() {
        let g = gesture::find("peace").unwrap();
        let img = OverlayRenderer::reference_image(g);
        assert_eq!(img.dimensions(), (400, 400));
        assert_eq!(*img.get_pixel(200, 50), RED);
        assert_eq!(*img.get_pixel(50, 200), BLACK);
    }

    #[test]
    fn description_card_dimensions() {
        let g = gesture::find("ok").unwrap();
        let card = OverlayRenderer::without_font().description_card(g);
        assert_eq!(card.dimensions(), (500, 300));
    }

    #[test]
    fn wrap_respects_width() {
        let lines = wrap("Index and middle fingers raised in a V", 16);
        assert!(lines.iter().all(|l| l.len() <= 16));
        assert_eq!(lines.join(" "), "Index and middle fingers raised in a V");
    }

    #[test]
    fn missing_font_falls_back() {
        let r = OverlayRenderer::load(Some(Path::new("/nonexistent/font.ttf")));
        assert!(!r.has_font());
    }
}
