/*
 *  canvas.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Composes the full display bitmap: theme gradient, transport icons,
 *  album art, "Playing from" line and track text. Always composes in
 *  portrait; rotates at the end when the panel's native geometry is
 *  landscape.
 */

use std::path::Path;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_polygon_mut, draw_text_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use log::debug;
use thiserror::Error;

use crate::artwork::{ArtworkError, ArtworkFetcher};
use crate::models::{PlaybackContext, Track};
use crate::themecache::ThemeColourCache;

const GRADIENT_POWER: f32 = 1.5;
const BUTTON_SPACING: i32 = 120;
const ICON_SIZE: i32 = 48;
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const SIZE_SM: f32 = 14.0;
const SIZE_BASE: f32 = 16.0;
const SIZE_LG: f32 = 18.0;
const SIZE_XXL: f32 = 24.0;

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("artwork error: {0}")]
    Artwork(#[from] ArtworkError),
    #[error("font file {0} unreadable: {1}")]
    FontRead(String, std::io::Error),
    #[error("font file {0} unparsable")]
    FontParse(String),
}

/// The four faces used on screen, loaded once at startup.
pub struct Fonts {
    pub regular: FontVec,
    pub bold: FontVec,
    pub semibold: FontVec,
    pub italic: FontVec,
}

impl Fonts {
    pub fn load(dir: &Path) -> Result<Self, CanvasError> {
        let face = |file: &str| -> Result<FontVec, CanvasError> {
            let path = dir.join(file);
            let data = std::fs::read(&path)
                .map_err(|e| CanvasError::FontRead(path.display().to_string(), e))?;
            FontVec::try_from_vec(data)
                .map_err(|_| CanvasError::FontParse(path.display().to_string()))
        };
        Ok(Fonts {
            regular: face("Roboto-Regular.ttf")?,
            bold: face("Roboto-Bold.ttf")?,
            semibold: face("Roboto-SemiBold.ttf")?,
            italic: face("Roboto-Italic.ttf")?,
        })
    }
}

/// Fixed element positions. Composition is always portrait; only the
/// art block and text width depend on the geometry.
#[derive(Debug, Clone)]
struct Layout {
    x_centre: i32,
    margin: u32,
    max_text_width: f32,
    controls_y: i32,
    playing_from_y: i32,
    playing_from_title_y: i32,
    album_art_y: u32,
    album_art_size: u32,
    title_y: i32,
    artist_y: i32,
    album_y: i32,
}

impl Layout {
    fn for_shape(width: u32, height: u32, margin: u32) -> Self {
        let max_text_width = (width - 2 * margin) as f32;
        let album_art_size = width - 2 * margin;
        Layout {
            x_centre: width as i32 / 2,
            margin,
            max_text_width,
            controls_y: 0,
            playing_from_y: 62,
            playing_from_title_y: 80,
            album_art_y: (height - album_art_size) / 2,
            album_art_size,
            title_y: 650,
            artist_y: 686,
            album_y: 730,
        }
    }
}

/// Advance-sum text width for `text` at `scale`.
pub fn measure_width(font: &FontVec, scale: PxScale, text: &str) -> f32 {
    let scaled = font.as_scaled(scale);
    text.chars()
        .map(|ch| scaled.h_advance(font.glyph_id(ch)))
        .sum()
}

/// Width-truncates `text` to `max_width`, appending an ellipsis.
///
/// Estimate-then-correct: slice to a rough character count, then drop
/// trailing characters until `text + "..."` fits. Converges because the
/// empty string plus ellipsis always fits a non-degenerate width.
pub fn truncate_to_width(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> String {
    let measured = measure(text);
    if measured <= max_width {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let keep = ((chars.len() as f32 * (max_width / measured)).floor() as i64 - 4).max(0) as usize;
    let mut truncated: String = chars[..keep.min(chars.len())].iter().collect();
    while measure(&format!("{truncated}...")) > max_width && !truncated.is_empty() {
        truncated.pop();
    }
    format!("{truncated}...")
}

/// Vertical gradient from `top` to black with a power-curve ramp; the
/// curve keeps the colour pure for longer instead of washing through a
/// muddy grey midpoint.
pub fn vertical_gradient(top: (u8, u8, u8), width: u32, height: u32, power: f32) -> RgbImage {
    let denom = height.saturating_sub(1).max(1) as f32;
    RgbImage::from_fn(width, height, |_x, y| {
        let ramp = (1.0 - y as f32 / denom).max(0.0).powf(power);
        Rgb([
            (top.0 as f32 * ramp) as u8,
            (top.1 as f32 * ramp) as u8,
            (top.2 as f32 * ramp) as u8,
        ])
    })
}

// -- transport icons, drawn procedurally in white -------------------------

fn draw_heart(img: &mut RgbImage, x: i32, y: i32) {
    draw_filled_circle_mut(img, (x + 14, y + 16), 10, WHITE);
    draw_filled_circle_mut(img, (x + 34, y + 16), 10, WHITE);
    draw_polygon_mut(
        img,
        &[
            Point::new(x + 5, y + 21),
            Point::new(x + 43, y + 21),
            Point::new(x + 24, y + 42),
        ],
        WHITE,
    );
}

fn draw_previous(img: &mut RgbImage, x: i32, y: i32) {
    draw_filled_rect_mut(img, Rect::at(x + 8, y + 8).of_size(6, 32), WHITE);
    draw_polygon_mut(
        img,
        &[
            Point::new(x + 40, y + 8),
            Point::new(x + 40, y + 40),
            Point::new(x + 16, y + 24),
        ],
        WHITE,
    );
}

fn draw_pause(img: &mut RgbImage, x: i32, y: i32) {
    draw_filled_rect_mut(img, Rect::at(x + 13, y + 8).of_size(8, 32), WHITE);
    draw_filled_rect_mut(img, Rect::at(x + 27, y + 8).of_size(8, 32), WHITE);
}

fn draw_next(img: &mut RgbImage, x: i32, y: i32) {
    draw_polygon_mut(
        img,
        &[
            Point::new(x + 8, y + 8),
            Point::new(x + 8, y + 40),
            Point::new(x + 32, y + 24),
        ],
        WHITE,
    );
    draw_filled_rect_mut(img, Rect::at(x + 34, y + 8).of_size(6, 32), WHITE);
}

/// Generates the full UI bitmap for one track.
pub struct Canvas {
    width: u32,
    height: u32,
    rotate: bool,
    layout: Layout,
    fonts: Fonts,
    artwork: ArtworkFetcher,
    themes: ThemeColourCache,
}

impl Canvas {
    pub fn new(
        resolution: (u32, u32),
        margin: u32,
        fonts: Fonts,
        artwork: ArtworkFetcher,
        themes: ThemeColourCache,
    ) -> Self {
        let (mut width, mut height) = resolution;
        // Landscape panels still get a portrait composition, rotated at
        // the very end.
        let rotate = width > height;
        if rotate {
            std::mem::swap(&mut width, &mut height);
        }
        let layout = Layout::for_shape(width, height, margin);
        Canvas {
            width,
            height,
            rotate,
            layout,
            fonts,
            artwork,
            themes,
        }
    }

    fn draw_text_centred(&self, img: &mut RgbImage, text: &str, font: &FontVec, size: f32, y: i32) {
        let scale = PxScale::from(size);
        let fitted = truncate_to_width(text, self.layout.max_text_width, |t| {
            measure_width(font, scale, t)
        });
        let width = measure_width(font, scale, &fitted);
        let x = self.layout.x_centre - (width / 2.0) as i32;
        draw_text_mut(img, WHITE, x, y, scale, font, &fitted);
    }

    fn draw_controls(&self, img: &mut RgbImage) {
        let y = self.layout.controls_y;
        let centre = self.layout.x_centre;
        draw_heart(img, centre - 3 * BUTTON_SPACING / 2 - ICON_SIZE / 2, y);
        draw_previous(img, centre - BUTTON_SPACING / 2 - ICON_SIZE / 2, y);
        draw_pause(img, centre + BUTTON_SPACING / 2 - ICON_SIZE / 2, y);
        draw_next(img, centre + 3 * BUTTON_SPACING / 2 - ICON_SIZE / 2, y);
    }

    fn draw_playing_from(&self, img: &mut RgbImage, context: &PlaybackContext) {
        // Colon only when there is a title to introduce.
        let line = if context.title.is_empty() {
            format!("PLAYING FROM {}", context.kind.to_string().to_uppercase())
        } else {
            format!("PLAYING FROM {}:", context.kind.to_string().to_uppercase())
        };
        self.draw_text_centred(img, &line, &self.fonts.semibold, SIZE_SM, self.layout.playing_from_y);
        self.draw_text_centred(
            img,
            &context.title,
            &self.fonts.semibold,
            SIZE_BASE,
            self.layout.playing_from_title_y,
        );
    }

    fn draw_track_info(&self, img: &mut RgbImage, track: &Track) {
        self.draw_text_centred(img, &track.title, &self.fonts.bold, SIZE_XXL, self.layout.title_y);
        self.draw_text_centred(
            img,
            &track.artists.join(", "),
            &self.fonts.regular,
            SIZE_LG,
            self.layout.artist_y,
        );
        self.draw_text_centred(img, &track.album, &self.fonts.italic, SIZE_SM, self.layout.album_y);
    }

    async fn album_art(&mut self, track: &Track) -> Result<RgbImage, CanvasError> {
        if track.album_image_url.is_empty() {
            debug!("track {} carries no artwork URL, using placeholder", track.id);
            let s = self.layout.album_art_size;
            return Ok(RgbImage::from_pixel(s, s, Rgb([40, 40, 40])));
        }
        Ok(self.artwork.image(&track.album_image_url).await?)
    }

    /// Renders the display bitmap for `track` playing from `context`.
    pub async fn render(
        &mut self,
        track: &Track,
        context: &PlaybackContext,
    ) -> Result<RgbImage, CanvasError> {
        let art = self.album_art(track).await?;
        let theme = self.themes.get(&art);

        let mut img = vertical_gradient(theme, self.width, self.height, GRADIENT_POWER);
        self.draw_controls(&mut img);
        self.draw_playing_from(&mut img, context);

        let size = self.layout.album_art_size;
        let resized = imageops::resize(&art, size, size, FilterType::Lanczos3);
        imageops::overlay(
            &mut img,
            &resized,
            self.layout.margin as i64,
            self.layout.album_art_y as i64,
        );

        self.draw_track_info(&mut img, track);

        if self.rotate {
            img = imageops::rotate90(&img);
        }
        Ok(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ten pixels per character, a stand-in for a monospace face.
    fn fixed_measure(text: &str) -> f32 {
        text.chars().count() as f32 * 10.0
    }

    #[test]
    fn test_truncate_noop_when_text_fits() {
        assert_eq!(truncate_to_width("short", 100.0, fixed_measure), "short");
    }

    #[test]
    fn test_truncate_appends_ellipsis_within_width() {
        let out = truncate_to_width("a rather long line of text", 100.0, fixed_measure);
        assert!(out.ends_with("..."));
        assert!(fixed_measure(&out) <= 100.0);
    }

    #[test]
    fn test_truncate_converges_on_tight_width() {
        let out = truncate_to_width("hello world!", 50.0, fixed_measure);
        assert!(out.ends_with("..."));
        assert!(fixed_measure(&out) <= 50.0);
    }

    #[test]
    fn test_gradient_endpoints_and_power_curve() {
        let img = vertical_gradient((200, 100, 50), 4, 101, 1.5);
        assert_eq!(img.get_pixel(0, 0), &Rgb([200, 100, 50]));
        assert_eq!(img.get_pixel(0, 100), &Rgb([0, 0, 0]));
        // The power curve dips below the linear midpoint.
        let mid = img.get_pixel(0, 50).0[0] as f32;
        assert!(mid < 200.0 * 0.5);
        assert!(mid > 0.0);
    }

    #[test]
    fn test_icons_paint_pixels() {
        let mut img = RgbImage::new(64, 64);
        draw_heart(&mut img, 8, 8);
        let heart_px = img.pixels().filter(|p| p.0 == [255, 255, 255]).count();
        assert!(heart_px > 100);

        let mut img = RgbImage::new(64, 64);
        draw_pause(&mut img, 8, 8);
        // Two 8x32 bars.
        let pause_px = img.pixels().filter(|p| p.0 == [255, 255, 255]).count();
        assert!(pause_px >= 2 * 8 * 32);
    }
}
