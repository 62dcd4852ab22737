//! Single-channel depth raster and the filters applied to it.

/// Inclusive pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl Window {
    fn expand(self, by: usize, height: usize, width: usize) -> Self {
        Self {
            top: self.top.saturating_sub(by),
            left: self.left.saturating_sub(by),
            bottom: (self.bottom + by).min(height - 1),
            right: (self.right + by).min(width - 1),
        }
    }

    fn rows(&self) -> usize {
        self.bottom - self.top + 1
    }

    fn cols(&self) -> usize {
        self.right - self.left + 1
    }
}

/// Row-major `f32` depth image. Zero means no data.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthRaster {
    width: usize,
    height: usize,
    data: Vec<f32>,
    /// Bounds of every pixel written since the last clear.
    touched: Option<Window>,
}

impl DepthRaster {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
            touched: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.width + col] = value;
        self.touched = Some(match self.touched {
            None => Window {
                top: row,
                left: col,
                bottom: row,
                right: col,
            },
            Some(w) => Window {
                top: w.top.min(row),
                left: w.left.min(col),
                bottom: w.bottom.max(row),
                right: w.right.max(col),
            },
        });
    }

    pub fn pixels(&self) -> &[f32] {
        &self.data
    }

    /// Bounds of the pixels written since the last [`DepthRaster::clear`].
    pub fn touched(&self) -> Option<Window> {
        self.touched
    }

    pub fn clear(&mut self) {
        if let Some(w) = self.touched.take() {
            for row in w.top..=w.bottom {
                let start = row * self.width;
                self.data[start + w.left..=start + w.right].fill(0.0);
            }
        }
    }

    pub fn non_zero(&self) -> usize {
        self.data.iter().filter(|&&d| d > 0.0).count()
    }

    /// Copy every positive pixel of `other` inside `window` onto `self`.
    pub fn merge_from(&mut self, other: &DepthRaster, window: Window) {
        for row in window.top..=window.bottom {
            for col in window.left..=window.right {
                let d = other.get(row, col);
                if d > 0.0 {
                    self.set(row, col, d);
                }
            }
        }
    }

    /// Morphological closing with a `size`×`size` square kernel applied
    /// `iterations` times, restricted to the written area. Pixels outside the
    /// image do not take part in either extremum.
    pub fn close_square(&mut self, size: usize, iterations: usize) {
        let radius = (size / 2) * iterations;
        let Some(window) = self.touched else {
            return;
        };
        if radius == 0 {
            return;
        }

        // Closing never grows past the bounding box of the input, so the
        // dilation only needs the box plus one radius and the erosion only
        // needs the box itself.
        let outer = window.expand(radius, self.height, self.width);
        let dilated = self.extremum(outer, radius, Extremum::Max);

        let mut eroded = vec![0.0f32; outer.rows() * outer.cols()];
        sliding_2d(&dilated, &mut eroded, outer.rows(), outer.cols(), radius, Extremum::Min);

        for row in window.top..=window.bottom {
            for col in window.left..=window.right {
                let v = eroded[(row - outer.top) * outer.cols() + (col - outer.left)];
                self.data[row * self.width + col] = v;
            }
        }
    }

    fn extremum(&self, window: Window, radius: usize, kind: Extremum) -> Vec<f32> {
        let (rows, cols) = (window.rows(), window.cols());
        let mut src = Vec::with_capacity(rows * cols);
        for row in window.top..=window.bottom {
            let start = row * self.width;
            src.extend_from_slice(&self.data[start + window.left..=start + window.right]);
        }
        let mut dst = vec![0.0f32; rows * cols];
        sliding_2d(&src, &mut dst, rows, cols, radius, kind);
        dst
    }

    /// 3×3 median with replicated borders.
    pub fn median3(&self) -> DepthRaster {
        let mut out = DepthRaster::new(self.width, self.height);
        let mut window = [0.0f32; 9];
        for row in 0..self.height {
            for col in 0..self.width {
                let mut k = 0;
                for dr in [-1isize, 0, 1] {
                    let r = clamp_index(row as isize + dr, self.height);
                    for dc in [-1isize, 0, 1] {
                        let c = clamp_index(col as isize + dc, self.width);
                        window[k] = self.get(r, c);
                        k += 1;
                    }
                }
                window.sort_unstable_by(f32::total_cmp);
                out.data[row * self.width + col] = window[4];
            }
        }
        out
    }

    /// Edge-preserving bilateral smoothing over a circular neighbourhood of
    /// `diameter` pixels. Borders reflect without repeating the edge pixel.
    pub fn bilateral(&self, diameter: usize, sigma_color: f32, sigma_space: f32) -> DepthRaster {
        let radius = (diameter / 2) as isize;
        let color_coeff = -0.5 / (sigma_color * sigma_color);
        let space_coeff = -0.5 / (sigma_space * sigma_space);
        // exp(-18) is below f32 resolution next to the centre weight of 1.
        let color_cutoff = (6.0 * sigma_color) * (6.0 * sigma_color);

        let mut offsets = Vec::new();
        for dr in -radius..=radius {
            for dc in -radius..=radius {
                let dist2 = (dr * dr + dc * dc) as f32;
                if dist2.sqrt() > radius as f32 {
                    continue;
                }
                offsets.push((dr, dc, (dist2 * space_coeff).exp()));
            }
        }

        let mut out = DepthRaster::new(self.width, self.height);
        for row in 0..self.height {
            for col in 0..self.width {
                let center = self.get(row, col);
                let mut sum = 0.0f32;
                let mut weights = 0.0f32;
                for &(dr, dc, space_weight) in &offsets {
                    let r = reflect101(row as isize + dr, self.height);
                    let c = reflect101(col as isize + dc, self.width);
                    let value = self.get(r, c);
                    let diff2 = (value - center) * (value - center);
                    if diff2 > color_cutoff {
                        continue;
                    }
                    let w = space_weight * (diff2 * color_coeff).exp();
                    sum += value * w;
                    weights += w;
                }
                out.data[row * self.width + col] = if weights > 0.0 { sum / weights } else { center };
            }
        }
        out
    }
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

fn reflect101(mut i: isize, len: usize) -> usize {
    let len = len as isize;
    if len == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= len {
            i = 2 * (len - 1) - i;
        } else {
            return i as usize;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Extremum {
    Max,
    Min,
}

impl Extremum {
    fn pick(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Max => a.max(b),
            Self::Min => a.min(b),
        }
    }

    /// Value that never wins, used for pixels outside the image.
    fn neutral(self) -> f32 {
        match self {
            Self::Max => f32::NEG_INFINITY,
            Self::Min => f32::INFINITY,
        }
    }
}

/// Separable sliding-window extremum over a `rows`×`cols` buffer.
fn sliding_2d(src: &[f32], dst: &mut [f32], rows: usize, cols: usize, radius: usize, kind: Extremum) {
    let mut tmp = vec![0.0f32; rows * cols];
    for r in 0..rows {
        sliding_1d(&src[r * cols..(r + 1) * cols], &mut tmp[r * cols..(r + 1) * cols], radius, kind);
    }

    let mut line = vec![0.0f32; rows];
    let mut out = vec![0.0f32; rows];
    for c in 0..cols {
        for r in 0..rows {
            line[r] = tmp[r * cols + c];
        }
        sliding_1d(&line, &mut out, radius, kind);
        for r in 0..rows {
            dst[r * cols + c] = out[r];
        }
    }
}

/// Van Herk/Gil-Werman running extremum. The line is padded with the neutral
/// value so every window has the full `2 * radius + 1` width and spans at
/// most two blocks.
fn sliding_1d(src: &[f32], dst: &mut [f32], radius: usize, kind: Extremum) {
    let block = 2 * radius + 1;
    let mut padded = vec![kind.neutral(); src.len() + 2 * radius];
    padded[radius..radius + src.len()].copy_from_slice(src);

    let n = padded.len();
    let mut prefix = padded.clone();
    let mut suffix = padded.clone();
    for i in 1..n {
        if i % block != 0 {
            prefix[i] = kind.pick(prefix[i - 1], padded[i]);
        }
    }
    for i in (0..n.saturating_sub(1)).rev() {
        if (i + 1) % block != 0 {
            suffix[i] = kind.pick(suffix[i + 1], padded[i]);
        }
    }
    for (i, out) in dst.iter_mut().enumerate().take(src.len()) {
        *out = kind.pick(suffix[i], prefix[i + 2 * radius]);
    }
}
