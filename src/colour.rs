/*
 *  colour.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Theme colour extraction: cluster the album art in CIELAB, score the
 *  cluster centres for suitability as a background, then darken the pick
 *  until white text reads against it. Deterministic for identical input
 *  bytes (fixed k-means seed), so results are cacheable by image hash.
 */

use std::collections::HashSet;

use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KMEANS_SEED: u64 = 42;
const MAX_CLUSTERS: usize = 8;
const MAX_KMEANS_ITERATIONS: usize = 50;
const THUMB_MAX_DIM: u32 = 128;
const MIN_CONTRAST: f64 = 3.0;

/// A colour in CIELAB space (D65 reference white).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl Lab {
    pub fn chroma(&self) -> f64 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

fn srgb_to_linear(c: f64) -> f64 {
    if c > 0.04045 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    }
}

fn linear_to_srgb(c: f64) -> f64 {
    if c > 0.003_130_8 {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    } else {
        c * 12.92
    }
}

/// Normalised sRGB (0..1) to CIELAB via linear RGB and XYZ.
pub fn rgb_to_lab(r: f64, g: f64, b: f64) -> Lab {
    let rl = srgb_to_linear(r);
    let gl = srgb_to_linear(g);
    let bl = srgb_to_linear(b);

    // sRGB to XYZ, then normalise to the D65 white point.
    let x = (0.4124 * rl + 0.3576 * gl + 0.1805 * bl) / 0.95047;
    let y = 0.2126 * rl + 0.7152 * gl + 0.0722 * bl;
    let z = (0.0193 * rl + 0.1192 * gl + 0.9505 * bl) / 1.08883;

    let f = |t: f64| {
        if t > 0.008856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    };
    let fx = f(x);
    let fy = f(y);
    let fz = f(z);

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

/// CIELAB back to normalised sRGB (0..1, clipped).
pub fn lab_to_rgb(lab: Lab) -> (f64, f64, f64) {
    let fy = (lab.l + 16.0) / 116.0;
    let fx = lab.a / 500.0 + fy;
    let fz = fy - lab.b / 200.0;

    let inv = |t: f64| {
        if t > 0.20689 {
            t * t * t
        } else {
            (t - 16.0 / 116.0) / 7.787
        }
    };
    let x = inv(fx) * 0.95047;
    let y = inv(fy);
    let z = inv(fz) * 1.08883;

    let rl = 3.2406 * x - 1.5372 * y - 0.4986 * z;
    let gl = -0.9689 * x + 1.8758 * y + 0.0415 * z;
    let bl = 0.0557 * x - 0.2040 * y + 1.0570 * z;

    (
        linear_to_srgb(rl).clamp(0.0, 1.0),
        linear_to_srgb(gl).clamp(0.0, 1.0),
        linear_to_srgb(bl).clamp(0.0, 1.0),
    )
}

/// WCAG relative luminance of a normalised sRGB triple.
pub fn relative_luminance(r: f64, g: f64, b: f64) -> f64 {
    0.2126 * srgb_to_linear(r) + 0.7152 * srgb_to_linear(g) + 0.0722 * srgb_to_linear(b)
}

/// Contrast ratio of the given colour against white overlay text.
pub fn contrast_with_white(r: f64, g: f64, b: f64) -> f64 {
    (1.0 + 0.05) / (relative_luminance(r, g, b) + 0.05)
}

/// Suitability score for a candidate theme colour: prevalent, chromatic,
/// and neither near-white nor near-black.
fn score_colour(lab: Lab, prevalence: f64) -> f64 {
    let mut lightness_penalty = 1.0;
    if lab.l > 85.0 {
        lightness_penalty = ((100.0 - lab.l) / 15.0).max(0.25);
    } else if lab.l < 20.0 {
        lightness_penalty = (lab.l / 20.0).max(0.1);
    }

    let chroma_weight = (lab.chroma() / 40.0).clamp(0.05, 1.5);

    prevalence.sqrt() * chroma_weight * lightness_penalty
}

/// Walks L* downward (a*, b* held) until white text meets the contrast
/// threshold. A colour that already complies is returned untouched.
fn darken_for_contrast(lab: Lab, min_contrast: f64) -> Lab {
    let mut l = lab.l;
    for _ in 0..200 {
        let candidate = Lab { l, ..lab };
        let (r, g, b) = lab_to_rgb(candidate);
        if contrast_with_white(r, g, b) >= min_contrast {
            return candidate;
        }
        l = (l - 1.0).max(0.0);
        if l <= 0.0 {
            break;
        }
    }
    Lab { l, ..lab }
}

/// Bounded thumbnail so clustering cost is independent of the source size.
fn downsample(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    if w <= THUMB_MAX_DIM && h <= THUMB_MAX_DIM {
        return image.clone();
    }
    let scale = (THUMB_MAX_DIM as f64 / w as f64).min(THUMB_MAX_DIM as f64 / h as f64);
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(image, nw, nh, FilterType::Triangle)
}

fn squared_distance(a: Lab, b: Lab) -> f64 {
    let dl = a.l - b.l;
    let da = a.a - b.a;
    let db = a.b - b.b;
    dl * dl + da * da + db * db
}

/// Plain Lloyd's k-means with a fixed seed and bounded iterations.
/// Returns the cluster centres and the pixel count assigned to each.
fn kmeans(pixels: &[Lab], k: usize) -> (Vec<Lab>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let mut centres: Vec<Lab> = (0..k)
        .map(|_| pixels[rng.random_range(0..pixels.len())])
        .collect();
    let mut counts = vec![0usize; k];
    let mut assignment = vec![0usize; pixels.len()];

    for _ in 0..MAX_KMEANS_ITERATIONS {
        let mut moved = false;
        for (i, px) in pixels.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f64::INFINITY;
            for (c, centre) in centres.iter().enumerate() {
                let dist = squared_distance(*px, *centre);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            if assignment[i] != best {
                assignment[i] = best;
                moved = true;
            }
        }

        let mut sums = vec![(0.0f64, 0.0f64, 0.0f64); k];
        counts = vec![0usize; k];
        for (i, px) in pixels.iter().enumerate() {
            let c = assignment[i];
            sums[c].0 += px.l;
            sums[c].1 += px.a;
            sums[c].2 += px.b;
            counts[c] += 1;
        }
        for c in 0..k {
            // An emptied cluster keeps its previous centre.
            if counts[c] > 0 {
                let n = counts[c] as f64;
                centres[c] = Lab {
                    l: sums[c].0 / n,
                    a: sums[c].1 / n,
                    b: sums[c].2 / n,
                };
            }
        }

        if !moved {
            break;
        }
    }

    (centres, counts)
}

/// Extracts the theme colour of `image` as an 8-bit sRGB triple.
///
/// Picks a prevalent, chromatic Lab cluster and darkens it until white
/// text reads at a contrast ratio of at least 3.0. Degenerate inputs
/// (empty image, flat colour, fully monochrome art) resolve through the
/// explicit fallbacks below rather than failing.
pub fn theme_colour(image: &RgbImage) -> (u8, u8, u8) {
    let thumb = downsample(image);
    let raw: Vec<[u8; 3]> = thumb.pixels().map(|p| p.0).collect();
    if raw.is_empty() {
        return (0, 0, 0);
    }

    let pixels: Vec<Lab> = raw
        .iter()
        .map(|p| {
            rgb_to_lab(
                p[0] as f64 / 255.0,
                p[1] as f64 / 255.0,
                p[2] as f64 / 255.0,
            )
        })
        .collect();

    // k-means degenerates when asked for more clusters than distinct
    // colours, common in flat artwork.
    let distinct = raw.iter().collect::<HashSet<_>>().len();
    let k = distinct.clamp(1, MAX_CLUSTERS);

    let (centres, counts) = kmeans(&pixels, k);
    let total: usize = counts.iter().sum();
    let prevalence: Vec<f64> = counts.iter().map(|&c| c as f64 / total as f64).collect();

    let mut best = 0usize;
    let mut best_score = f64::NEG_INFINITY;
    for (i, centre) in centres.iter().enumerate() {
        let s = score_colour(*centre, prevalence[i]);
        if s > best_score {
            best_score = s;
            best = i;
        }
    }

    // Monochrome override: with no chromatic cluster anywhere the scored
    // pick is meaningless. Prefer the most prevalent centre that is not a
    // near-black void; failing that, the lightest centre available.
    let max_chroma = centres
        .iter()
        .map(|c| c.chroma())
        .fold(f64::NEG_INFINITY, f64::max);
    if max_chroma < 8.0 {
        let visible: Vec<usize> = (0..centres.len()).filter(|&i| centres[i].l > 15.0).collect();
        best = if !visible.is_empty() {
            *visible
                .iter()
                .max_by(|&&a, &&b| prevalence[a].total_cmp(&prevalence[b]))
                .unwrap()
        } else {
            (0..centres.len())
                .max_by(|&a, &b| centres[a].l.total_cmp(&centres[b].l))
                .unwrap()
        };
    }

    let final_lab = darken_for_contrast(centres[best], MIN_CONTRAST);
    let (r, g, b) = lab_to_rgb(final_lab);
    (
        (r * 255.0 + 0.5).floor().clamp(0.0, 255.0) as u8,
        (g * 255.0 + 0.5).floor().clamp(0.0, 255.0) as u8,
        (b * 255.0 + 0.5).floor().clamp(0.0, 255.0) as u8,
    )
}
