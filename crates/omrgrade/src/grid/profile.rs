//! 1-D darkness projections and peak helpers for grid inference.

use image::GrayImage;

use crate::geometry::PixelRect;

/// Column sums of `255 - gray` over `rect` (one value per column).
pub fn column_darkness(img: &GrayImage, rect: PixelRect) -> Vec<f64> {
    let mut out = vec![0.0f64; rect.width as usize];
    for y in rect.y..rect.y + rect.height {
        for (i, x) in (rect.x..rect.x + rect.width).enumerate() {
            out[i] += f64::from(255 - img.get_pixel(x, y)[0]);
        }
    }
    out
}

/// Row sums of `255 - gray` over `rect` (one value per row).
pub fn row_darkness(img: &GrayImage, rect: PixelRect) -> Vec<f64> {
    (rect.y..rect.y + rect.height)
        .map(|y| {
            (rect.x..rect.x + rect.width)
                .map(|x| f64::from(255 - img.get_pixel(x, y)[0]))
                .sum()
        })
        .collect()
}

/// Centered moving average; the window shrinks at the ends.
pub fn smooth_moving_average(values: &[f64], half_width: usize) -> Vec<f64> {
    let n = values.len();
    if half_width == 0 || n == 0 {
        return values.to_vec();
    }
    let mut prefix = vec![0.0f64; n + 1];
    for (i, v) in values.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v;
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half_width);
            let hi = (i + half_width + 1).min(n);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Interior local maxima strictly above `floor`.
///
/// A run of equal values counts as one peak, reported at the run's middle,
/// when both neighbours of the run are lower. Samples at either end are never
/// peaks.
pub fn find_peaks(values: &[f64], floor: f64) -> Vec<f64> {
    let n = values.len();
    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        let v = values[i];
        if v <= floor || values[i - 1] >= v {
            i += 1;
            continue;
        }
        let mut j = i;
        while j + 1 < n && values[j + 1] == v {
            j += 1;
        }
        if j + 1 < n && values[j + 1] < v {
            peaks.push(0.5 * (i + j) as f64);
        }
        i = j + 1;
    }
    peaks
}

/// Merge sorted peak positions whose gap to the previous peak is at most
/// `tolerance`; each cluster is replaced by its mean position.
pub fn merge_close_peaks(peaks: &[f64], tolerance: f64) -> Vec<f64> {
    let mut out = Vec::new();
    let mut cluster: Vec<f64> = Vec::new();
    for &p in peaks {
        if let Some(&last) = cluster.last() {
            if p - last > tolerance {
                out.push(cluster.iter().sum::<f64>() / cluster.len() as f64);
                cluster.clear();
            }
        }
        cluster.push(p);
    }
    if !cluster.is_empty() {
        out.push(cluster.iter().sum::<f64>() / cluster.len() as f64);
    }
    out
}

/// Peak-picking settings resolved to pixels.
#[derive(Debug, Clone, Copy)]
pub struct PeakParams {
    pub smoothing_half_width: usize,
    pub noise_floor_multiplier: f64,
    pub merge_tolerance_px: f64,
}

/// Smooth, threshold at `mean * multiplier`, pick and merge peaks.
pub fn detect_peaks(profile: &[f64], params: &PeakParams) -> Vec<f64> {
    if profile.is_empty() {
        return Vec::new();
    }
    let smoothed = smooth_moving_average(profile, params.smoothing_half_width);
    let mean = smoothed.iter().sum::<f64>() / smoothed.len() as f64;
    let floor = mean * params.noise_floor_multiplier;
    let peaks = find_peaks(&smoothed, floor);
    merge_close_peaks(&peaks, params.merge_tolerance_px)
}
