//! Template matching by normalized cross-correlation.
//!
//! Large searches run coarse-to-fine: both images are downscaled, candidate
//! positions are scored on the small images, then each candidate is refined
//! at full resolution in a small neighbourhood.

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde_json::{json, Value};
use std::str::FromStr;

pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Smallest template side kept when downscaling.
const MIN_COARSE_SIDE: u32 = 12;
const MAX_FACTOR: u32 = 4;
/// Coarse scores are noisier; candidates this far below the threshold are still refined.
const COARSE_SLACK: f64 = 0.2;
const MAX_CANDIDATES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMethod {
    #[default]
    CcoeffNormed,
    SqdiffNormed,
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "ccoeff_normed" | "tm_ccoeff_normed" | "ccoeff" => Ok(Self::CcoeffNormed),
            "sqdiff_normed" | "tm_sqdiff_normed" | "sqdiff" => Ok(Self::SqdiffNormed),
            other => Err(format!(
                "Unknown matching method '{other}'; expected ccoeff_normed or sqdiff_normed"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    pub confidence: f64,
}

impl Match {
    pub fn center(&self) -> (i64, i64) {
        (
            self.x + i64::from(self.width / 2),
            self.y + i64::from(self.height / 2),
        )
    }

    pub fn offset(mut self, dx: i64, dy: i64) -> Self {
        self.x += dx;
        self.y += dy;
        self
    }

    fn overlaps(&self, other: &Match) -> bool {
        let (cx, cy) = other.center();
        cx >= self.x
            && cx < self.x + i64::from(self.width)
            && cy >= self.y
            && cy < self.y + i64::from(self.height)
    }

    pub fn to_value(&self) -> Value {
        let (cx, cy) = self.center();
        json!({
            "x": self.x,
            "y": self.y,
            "width": self.width,
            "height": self.height,
            "center_x": cx,
            "center_y": cy,
            "confidence": (self.confidence * 10000.0).round() / 10000.0,
        })
    }
}

/// Summed-area tables of a grayscale image and its squares.
struct Integral {
    width: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let (mut row, mut row_sq) = (0.0, 0.0);
            for x in 0..w {
                let v = f64::from(image.get_pixel(x as u32, y as u32).0[0]);
                row += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row;
                sq[i] = sq[i - stride] + row_sq;
            }
        }
        Self { width: w, sum, sq }
    }

    fn window(&self, table: &[f64], x: usize, y: usize, w: usize, h: usize) -> f64 {
        let stride = self.width + 1;
        table[(y + h) * stride + x + w] - table[y * stride + x + w] - table[(y + h) * stride + x]
            + table[y * stride + x]
    }
}

struct Prepared<'a> {
    haystack: &'a GrayImage,
    integral: Integral,
    needle: Vec<f64>,
    needle_centered: Vec<f64>,
    needle_sq: f64,
    needle_norm: f64,
    nw: usize,
    nh: usize,
    method: MatchMethod,
}

impl<'a> Prepared<'a> {
    fn new(haystack: &'a GrayImage, needle: &GrayImage, method: MatchMethod) -> Self {
        let values: Vec<f64> = needle.pixels().map(|p| f64::from(p.0[0])).collect();
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        let centered: Vec<f64> = values.iter().map(|v| v - mean).collect();
        let needle_sq = values.iter().map(|v| v * v).sum();
        let needle_norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
        Self {
            haystack,
            integral: Integral::new(haystack),
            needle: values,
            needle_centered: centered,
            needle_sq,
            needle_norm,
            nw: needle.width() as usize,
            nh: needle.height() as usize,
            method,
        }
    }

    fn positions(&self) -> (usize, usize) {
        (
            self.haystack.width() as usize - self.nw + 1,
            self.haystack.height() as usize - self.nh + 1,
        )
    }

    fn dot(&self, weights: &[f64], x: usize, y: usize) -> f64 {
        let raw = self.haystack.as_raw();
        let stride = self.haystack.width() as usize;
        let mut total = 0.0;
        for row in 0..self.nh {
            let start = (y + row) * stride + x;
            let pixels = &raw[start..start + self.nw];
            let w = &weights[row * self.nw..(row + 1) * self.nw];
            total += pixels
                .iter()
                .zip(w)
                .map(|(p, t)| f64::from(*p) * t)
                .sum::<f64>();
        }
        total
    }

    /// Similarity in [0, 1] (ccoeff is clamped at 0), higher is better.
    fn score(&self, x: usize, y: usize) -> f64 {
        let n = (self.nw * self.nh) as f64;
        let sum = self.integral.window(&self.integral.sum, x, y, self.nw, self.nh);
        let sq = self.integral.window(&self.integral.sq, x, y, self.nw, self.nh);
        match self.method {
            MatchMethod::CcoeffNormed => {
                let window_norm = (sq - sum * sum / n).max(0.0).sqrt();
                let denom = window_norm * self.needle_norm;
                if denom < 1e-6 {
                    // Flat window or flat template.
                    let flat_both = window_norm < 1e-3 && self.needle_norm < 1e-3;
                    return if flat_both { 1.0 } else { 0.0 };
                }
                (self.dot(&self.needle_centered, x, y) / denom).clamp(0.0, 1.0)
            }
            MatchMethod::SqdiffNormed => {
                let denom = (sq * self.needle_sq).sqrt();
                let diff = (sq - 2.0 * self.dot(&self.needle, x, y) + self.needle_sq).max(0.0);
                if denom < 1e-6 {
                    return if diff < 1e-6 { 1.0 } else { 0.0 };
                }
                (1.0 - diff / denom).clamp(0.0, 1.0)
            }
        }
    }

    fn best_near(&self, cx: usize, cy: usize, radius: usize) -> Match {
        let (px, py) = self.positions();
        let mut best = Match {
            x: cx as i64,
            y: cy as i64,
            width: self.nw as u32,
            height: self.nh as u32,
            confidence: f64::MIN,
        };
        for y in cy.saturating_sub(radius)..(cy + radius + 1).min(py) {
            for x in cx.saturating_sub(radius)..(cx + radius + 1).min(px) {
                let confidence = self.score(x, y);
                if confidence > best.confidence {
                    best = Match {
                        x: x as i64,
                        y: y as i64,
                        confidence,
                        ..best
                    };
                }
            }
        }
        best
    }

    /// Every position scoring at least `threshold`, strongest first.
    fn scan(&self, threshold: f64) -> Vec<Match> {
        let (px, py) = self.positions();
        let mut found = Vec::new();
        for y in 0..py {
            for x in 0..px {
                let confidence = self.score(x, y);
                if confidence >= threshold {
                    found.push(Match {
                        x: x as i64,
                        y: y as i64,
                        width: self.nw as u32,
                        height: self.nh as u32,
                        confidence,
                    });
                }
            }
        }
        sort_by_confidence(&mut found);
        found
    }
}

fn sort_by_confidence(matches: &mut [Match]) {
    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

/// Keeps the strongest match of each overlapping cluster.
fn suppress_overlaps(sorted: Vec<Match>) -> Vec<Match> {
    let mut kept: Vec<Match> = Vec::new();
    for candidate in sorted {
        if !kept.iter().any(|k| k.overlaps(&candidate)) {
            kept.push(candidate);
        }
    }
    kept
}

fn downscale_factor(needle: &GrayImage) -> u32 {
    (needle.width().min(needle.height()) / MIN_COARSE_SIDE).clamp(1, MAX_FACTOR)
}

/// All non-overlapping matches scoring at least `threshold`, strongest first.
pub fn find_all(
    haystack: &GrayImage,
    needle: &GrayImage,
    method: MatchMethod,
    threshold: f64,
) -> Vec<Match> {
    if needle.width() == 0
        || needle.height() == 0
        || needle.width() > haystack.width()
        || needle.height() > haystack.height()
    {
        return Vec::new();
    }

    let full = Prepared::new(haystack, needle, method);
    let factor = downscale_factor(needle);
    if factor == 1 {
        return suppress_overlaps(full.scan(threshold));
    }

    let small_hay = imageops::resize(
        haystack,
        haystack.width() / factor,
        haystack.height() / factor,
        FilterType::Triangle,
    );
    let small_needle = imageops::resize(
        needle,
        needle.width() / factor,
        needle.height() / factor,
        FilterType::Triangle,
    );
    let coarse = Prepared::new(&small_hay, &small_needle, method);
    let candidates = suppress_overlaps(coarse.scan((threshold - COARSE_SLACK).max(0.0)));

    let radius = factor as usize;
    let mut refined: Vec<Match> = candidates
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(|c| full.best_near(c.x as usize * radius, c.y as usize * radius, radius))
        .filter(|m| m.confidence >= threshold)
        .collect();
    sort_by_confidence(&mut refined);
    suppress_overlaps(refined)
}

/// The strongest match.
pub fn find_best(
    haystack: &GrayImage,
    needle: &GrayImage,
    method: MatchMethod,
    threshold: f64,
) -> Option<Match> {
    find_all(haystack, needle, method, threshold).into_iter().next()
}

/// The match nearest the top-left corner, in reading order.
pub fn find_first(
    haystack: &GrayImage,
    needle: &GrayImage,
    method: MatchMethod,
    threshold: f64,
) -> Option<Match> {
    find_all(haystack, needle, method, threshold)
        .into_iter()
        .min_by_key(|m| (m.y, m.x))
}
