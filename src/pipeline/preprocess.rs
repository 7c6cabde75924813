//! OCR preprocessing: grayscale → Gaussian adaptive threshold → non-local-means denoise.
//!
//! The chain exists only to raise OCR recall on noisy scans. It is
//! deterministic for fixed [`PreprocessOptions`] and always returns an image
//! with the input's dimensions.

use crate::config::PreprocessOptions;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;
use tracing::debug;

/// Run the full chain on a colour bitmap.
pub fn preprocess(image: &DynamicImage, opts: &PreprocessOptions) -> GrayImage {
    let gray = image.to_luma8();
    let binary = adaptive_threshold_gaussian(&gray, opts.threshold_block_size, opts.threshold_c);
    let denoised = non_local_means(
        &binary,
        opts.denoise_h,
        opts.denoise_template_window,
        opts.denoise_search_window,
    );
    debug!(
        "Preprocessed {}x{} bitmap",
        denoised.width(),
        denoised.height()
    );
    denoised
}

/// Binary threshold against a Gaussian-weighted local mean minus `c`.
///
/// A pixel becomes white when it is brighter than its neighbourhood mean
/// minus `c`, black otherwise. `block_size` is forced odd and at least 3.
pub fn adaptive_threshold_gaussian(gray: &GrayImage, block_size: u32, c: f32) -> GrayImage {
    let block = block_size.max(3) | 1;
    // Sigma the classic implementation derives from the kernel size.
    let sigma = 0.3 * ((block as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let mean = gaussian_blur_f32(gray, sigma);

    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, px) in gray.enumerate_pixels() {
        let threshold = mean.get_pixel(x, y).0[0] as f32 - c;
        let v = if px.0[0] as f32 > threshold { 255 } else { 0 };
        out.put_pixel(x, y, Luma([v]));
    }
    out
}

/// Output rows handled by one parallel task.
const BAND_ROWS: usize = 16;

/// Non-local-means denoising of a single-channel image.
///
/// Each output pixel is the weighted mean of the pixels in a
/// `search_window`² area, weighted by `exp(-d² / h²)` where `d²` is the mean
/// squared difference of the surrounding `template_window`² patches. Borders
/// replicate the edge pixel.
///
/// Patch distances are running box sums, one pass per search offset, so the
/// cost is O(pixels × search_window²) spread over the rayon pool in bands of
/// rows. Pixels whose whole search area is one value keep it without being
/// visited. A binary (0/255) input, which is what the threshold step
/// produces, makes every patch distance a count of differing pixels, and
/// the weights come from a table indexed by that count.
pub fn non_local_means(
    src: &GrayImage,
    h: f32,
    template_window: u32,
    search_window: u32,
) -> GrayImage {
    let (width, height) = src.dimensions();
    if width == 0 || height == 0 || h <= 0.0 {
        return src.clone();
    }

    let t = (template_window.max(1) / 2) as usize;
    let s = (search_window.max(1) / 2) as usize;
    let cells = (2 * t + 1) * (2 * t + 1);
    let area = cells as f32;
    let inv_h2 = 1.0 / (h * h);

    if src.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255) {
        let step = 255.0 * 255.0 / area;
        let table: Vec<f32> = (0..=cells)
            .map(|k| (-(k as f32 * step) * inv_h2).exp())
            .collect();
        denoise(src, t, s, |a, b| u64::from(a != b), |k| table[k as usize])
    } else {
        denoise(
            src,
            t,
            s,
            |a, b| {
                let d = i64::from(a) - i64::from(b);
                (d * d) as u64
            },
            |sum| (-(sum as f32 / area) * inv_h2).exp(),
        )
    }
}

/// Source image with replicated borders wide enough for every lookup the
/// filter makes.
struct Padded {
    data: Vec<u8>,
    stride: usize,
    pad: isize,
}

impl Padded {
    fn new(src: &GrayImage, pad: usize) -> Self {
        let (w, h) = (src.width() as usize, src.height() as usize);
        let raw = src.as_raw();
        let stride = w + 2 * pad;
        let mut data = Vec::with_capacity(stride * (h + 2 * pad));
        for py in 0..h + 2 * pad {
            let y = py.saturating_sub(pad).min(h - 1);
            for px in 0..stride {
                let x = px.saturating_sub(pad).min(w - 1);
                data.push(raw[y * w + x]);
            }
        }
        Self {
            data,
            stride,
            pad: pad as isize,
        }
    }

    #[inline]
    fn at(&self, x: isize, y: isize) -> u8 {
        self.data[(y + self.pad) as usize * self.stride + (x + self.pad) as usize]
    }
}

fn denoise<D, W>(src: &GrayImage, t: usize, s: usize, dist: D, weight: W) -> GrayImage
where
    D: Fn(u8, u8) -> u64 + Sync,
    W: Fn(u64) -> f32 + Sync,
{
    let (width, height) = (src.width() as usize, src.height() as usize);
    let padded = Padded::new(src, s + t + 1);
    let mut out = src.as_raw().clone();

    out.par_chunks_mut(BAND_ROWS * width)
        .enumerate()
        .for_each(|(band, rows)| {
            let y0 = band * BAND_ROWS;
            denoise_band(&padded, width, y0, rows, t, s, &dist, &weight);
        });

    GrayImage::from_raw(width as u32, height as u32, out).unwrap_or_else(|| src.clone())
}

/// Filter output rows `y0..` into `rows`, which arrives holding the source
/// values.
#[allow(clippy::too_many_arguments)]
fn denoise_band<D, W>(
    p: &Padded,
    width: usize,
    y0: usize,
    rows: &mut [u8],
    t: usize,
    s: usize,
    dist: &D,
    weight: &W,
) where
    D: Fn(u8, u8) -> u64,
    W: Fn(u64) -> f32,
{
    let band_h = rows.len() / width;

    // An edge inside the search area is what makes a pixel worth filtering.
    let mut active = vec![false; rows.len()];
    box_sums(
        width,
        y0,
        band_h,
        s,
        |x, y| {
            let v = p.at(x, y);
            u64::from(v != p.at(x + 1, y) || v != p.at(x, y + 1))
        },
        |row, x, edges| active[row * width + x] = edges > 0,
    );
    if !active.contains(&true) {
        return;
    }

    let mut weight_sum = vec![0f32; rows.len()];
    let mut value_sum = vec![0f32; rows.len()];
    let si = s as isize;
    for dy in -si..=si {
        for dx in -si..=si {
            box_sums(
                width,
                y0,
                band_h,
                t,
                |x, y| dist(p.at(x, y), p.at(x + dx, y + dy)),
                |row, x, patch| {
                    let i = row * width + x;
                    if active[i] {
                        let w = weight(patch);
                        let y = (y0 + row) as isize;
                        weight_sum[i] += w;
                        value_sum[i] += w * f32::from(p.at(x as isize + dx, y + dy));
                    }
                },
            );
        }
    }

    for (i, px) in rows.iter_mut().enumerate() {
        if active[i] {
            *px = (value_sum[i] / weight_sum[i]).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Sum `cell` over the (2r+1)² window around every pixel of `band_h` rows
/// starting at `y0`, handing each sum to `visit(row, x, sum)`.
fn box_sums(
    width: usize,
    y0: usize,
    band_h: usize,
    r: usize,
    cell: impl Fn(isize, isize) -> u64,
    mut visit: impl FnMut(usize, usize, u64),
) {
    let ri = r as isize;
    let span = 2 * r + 1;
    let cols = width + 2 * r;
    let top = y0 as isize;

    let mut column: Vec<u64> = (0..cols)
        .map(|c| {
            let x = c as isize - ri;
            (-ri..=ri).map(|j| cell(x, top + j)).sum()
        })
        .collect();

    for row in 0..band_h {
        let y = top + row as isize;
        if row > 0 {
            for (c, sum) in column.iter_mut().enumerate() {
                let x = c as isize - ri;
                *sum = *sum + cell(x, y + ri) - cell(x, y - ri - 1);
            }
        }
        let mut acc: u64 = column[..span].iter().sum();
        for x in 0..width {
            visit(row, x, acc);
            if x + span < cols {
                acc = acc + column[x + span] - column[x];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::{Duration, Instant};

    /// Direct per-pixel evaluation, used to check the banded filter.
    fn reference_nlm(src: &GrayImage, h: f32, template: u32, search: u32) -> GrayImage {
        let (w, hgt) = (src.width() as i64, src.height() as i64);
        let px = |x: i64, y: i64| {
            let (x, y) = (x.clamp(0, w - 1) as u32, y.clamp(0, hgt - 1) as u32);
            f32::from(src.get_pixel(x, y).0[0])
        };
        let (t, s) = (i64::from(template / 2), i64::from(search / 2));
        let area = ((2 * t + 1) * (2 * t + 1)) as f32;
        GrayImage::from_fn(src.width(), src.height(), |x, y| {
            let (x, y) = (i64::from(x), i64::from(y));
            let (mut wsum, mut vsum) = (0f32, 0f32);
            for dy in -s..=s {
                for dx in -s..=s {
                    let mut d2 = 0f32;
                    for j in -t..=t {
                        for i in -t..=t {
                            let d = px(x + i, y + j) - px(x + dx + i, y + dy + j);
                            d2 += d * d;
                        }
                    }
                    let weight = (-(d2 / area) / (h * h)).exp();
                    wsum += weight;
                    vsum += weight * px(x + dx, y + dy);
                }
            }
            Luma([(vsum / wsum).round().clamp(0.0, 255.0) as u8])
        })
    }

    /// Deterministic scatter of values, spanning several row bands.
    fn scattered(w: u32, h: u32, levels: &[u8]) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let k = (x * 7 + y * 13 + x * y) % 11;
            Luma([levels[k as usize % levels.len()]])
        })
    }

    fn assert_close(a: &GrayImage, b: &GrayImage) {
        assert_eq!(a.dimensions(), b.dimensions());
        for (p, q) in a.pixels().zip(b.pixels()) {
            assert!(p.0[0].abs_diff(q.0[0]) <= 1, "{} vs {}", p.0[0], q.0[0]);
        }
    }

    /// Text-like strokes on white, roughly the density of a typed page.
    fn typed_page(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::from_pixel(w, h, Rgb([245, 245, 240]));
        for line in (h / 10..h - h / 10).step_by(60) {
            for word in (w / 12..w - w / 12).step_by(110) {
                for x in word..(word + 70).min(w) {
                    for y in line..line + 28 {
                        if x % 9 < 2 || y == line || y == line + 27 {
                            img.put_pixel(x, y, Rgb([20, 20, 30]));
                        }
                    }
                }
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn output_keeps_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(23, 17, Rgb([200, 180, 160])));
        let opts = PreprocessOptions {
            denoise_search_window: 5,
            denoise_template_window: 3,
            ..PreprocessOptions::default()
        };
        let out = preprocess(&img, &opts);
        assert_eq!(out.dimensions(), (23, 17));
    }

    #[test]
    fn threshold_marks_dark_strokes_black() {
        let mut gray = GrayImage::from_pixel(31, 31, Luma([220]));
        for x in 10..21 {
            gray.put_pixel(x, 15, Luma([30]));
        }
        let out = adaptive_threshold_gaussian(&gray, 11, 2.0);
        assert_eq!(out.get_pixel(15, 15).0[0], 0);
        assert_eq!(out.get_pixel(2, 2).0[0], 255);
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn threshold_forces_odd_block() {
        let gray = GrayImage::from_pixel(8, 8, Luma([128]));
        let out = adaptive_threshold_gaussian(&gray, 4, 2.0);
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn nlm_leaves_flat_image_unchanged() {
        let flat = GrayImage::from_pixel(12, 9, Luma([255]));
        assert_eq!(non_local_means(&flat, 30.0, 7, 21), flat);
    }

    #[test]
    fn nlm_is_deterministic() {
        let mut img = GrayImage::from_pixel(16, 16, Luma([255]));
        img.put_pixel(4, 4, Luma([0]));
        img.put_pixel(11, 7, Luma([0]));
        let a = non_local_means(&img, 30.0, 3, 7);
        let b = non_local_means(&img, 30.0, 3, 7);
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), (16, 16));
    }

    #[test]
    fn nlm_pulls_isolated_speck_toward_background() {
        let mut img = GrayImage::from_pixel(15, 15, Luma([0]));
        img.put_pixel(7, 7, Luma([255]));
        let out = non_local_means(&img, 200.0, 3, 7);
        assert!(out.get_pixel(7, 7).0[0] < 255);
    }

    #[test]
    fn nlm_binary_input_matches_direct_evaluation() {
        let img = scattered(21, 40, &[0, 255, 255]);
        assert_close(&non_local_means(&img, 120.0, 3, 7), &reference_nlm(&img, 120.0, 3, 7));
    }

    #[test]
    fn nlm_gray_input_matches_direct_evaluation() {
        let img = scattered(19, 35, &[10, 90, 170, 250]);
        assert_close(&non_local_means(&img, 60.0, 3, 5), &reference_nlm(&img, 60.0, 3, 5));
    }

    #[test]
    fn nlm_keeps_pixels_far_from_any_edge() {
        let mut img = GrayImage::from_pixel(60, 60, Luma([255]));
        img.put_pixel(5, 5, Luma([0]));
        let out = non_local_means(&img, 200.0, 3, 7);
        assert_eq!(out.get_pixel(40, 40).0[0], 255);
        assert_eq!(out.get_pixel(59, 59).0[0], 255);
        assert!(out.get_pixel(5, 5).0[0] > 0);
    }

    #[test]
    #[cfg_attr(debug_assertions, ignore = "timing bound is for optimised builds")]
    fn letter_page_at_defaults_finishes_in_bounded_time() {
        let page = typed_page(2550, 3300);
        let start = Instant::now();
        let out = preprocess(&page, &PreprocessOptions::default());
        let elapsed = start.elapsed();
        assert_eq!(out.dimensions(), (2550, 3300));
        assert!(elapsed < Duration::from_secs(20), "preprocess took {elapsed:?}");
    }
}
