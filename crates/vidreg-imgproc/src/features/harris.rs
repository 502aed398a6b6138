use rayon::prelude::*;
use vidreg_image::{Image, ImageError};

/// The Harris sensitivity constant in `det(G) - k * trace(G)^2`.
pub const HARRIS_K: f32 = 0.06;

/// Taps of the unnormalized binomial smoothing kernel, applied separably.
pub const BINOMIAL_KERNEL: [i32; 5] = [1, 4, 6, 4, 1];

/// Distance from the image edge to the first cell with a valid strength value.
pub const STRENGTH_BORDER: usize = 3;

/// Smallest image side with at least one valid strength cell.
pub const MIN_STRENGTH_SIZE: usize = 2 * STRENGTH_BORDER + 1;

/// One plane per entry of the symmetric structure tensor.
#[derive(Clone, Debug, Default)]
struct TensorPlanes {
    xx: Vec<i32>,
    xy: Vec<i32>,
    yy: Vec<i32>,
}

impl TensorPlanes {
    fn resize(&mut self, len: usize) {
        self.xx.resize(len, 0);
        self.xy.resize(len, 0);
        self.yy.resize(len, 0);
    }
}

/// Reusable intermediate buffers of the Harris strength computation.
///
/// Buffers grow on demand and keep their allocation across calls with the same geometry.
#[derive(Clone, Debug, Default)]
pub struct HarrisScratch {
    products: TensorPlanes,
    smoothed: TensorPlanes,
}

impl HarrisScratch {
    /// Scratch buffers preallocated for images with `len` pixels.
    pub fn with_len(len: usize) -> Self {
        let mut scratch = Self::default();
        scratch.resize(len);
        scratch
    }

    fn resize(&mut self, len: usize) {
        self.products.resize(len);
        self.smoothed.resize(len);
    }
}

/// Compute the Harris corner strength of an 8-bit image.
///
/// Gradients are halved central differences, the structure tensor is smoothed with the
/// separable [`BINOMIAL_KERNEL`] and the response is `det(G) - HARRIS_K * trace(G)^2`.
///
/// Only cells at least [`STRENGTH_BORDER`] pixels away from every edge carry a response. All
/// other cells of `dst` are set to zero. Images smaller than [`MIN_STRENGTH_SIZE`] in either
/// dimension produce an all-zero map.
///
/// # Arguments
///
/// * `src` - The source grayscale image.
/// * `dst` - The destination strength map with the same size as `src`.
///
/// # Errors
///
/// Returns [`ImageError::InvalidImageSize`] if `src` and `dst` differ in size.
///
/// # Example
///
/// ```
/// use vidreg_image::{Image, ImageSize};
/// use vidreg_imgproc::features::harris_strength;
///
/// let size = ImageSize { width: 16, height: 16 };
/// let src = Image::<u8, 1>::from_size_val(size, 128).unwrap();
/// let mut dst = Image::<f32, 1>::from_size_val(size, 0.0).unwrap();
/// harris_strength(&src, &mut dst).unwrap();
/// assert!(dst.as_slice().iter().all(|&s| s == 0.0));
/// ```
pub fn harris_strength(src: &Image<u8, 1>, dst: &mut Image<f32, 1>) -> Result<(), ImageError> {
    let mut scratch = HarrisScratch::default();
    harris_strength_with_scratch(src, dst, &mut scratch)
}

/// Same as [`harris_strength`] but reusing caller owned intermediate buffers.
pub fn harris_strength_with_scratch(
    src: &Image<u8, 1>,
    dst: &mut Image<f32, 1>,
    scratch: &mut HarrisScratch,
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    dst.fill(0.0);

    let (cols, rows) = (src.cols(), src.rows());
    if cols < MIN_STRENGTH_SIZE || rows < MIN_STRENGTH_SIZE {
        return Ok(());
    }

    scratch.resize(cols * rows);
    gradient_products(src.as_slice(), cols, rows, &mut scratch.products);
    smooth_vertical(&scratch.products, cols, rows, &mut scratch.smoothed);
    response_rows(&scratch.smoothed, cols, rows, dst.as_slice_mut());

    Ok(())
}

/// The Harris response of a smoothed structure tensor.
#[inline]
pub fn harris_response(gxx: f32, gxy: f32, gyy: f32) -> f32 {
    let trace = gxx + gyy;
    gxx * gyy - gxy * gxy - HARRIS_K * trace * trace
}

// Ix^2, Ix*Iy and Iy^2 for every pixel except the outermost ring.
fn gradient_products(src: &[u8], cols: usize, rows: usize, out: &mut TensorPlanes) {
    out.xx
        .par_chunks_exact_mut(cols)
        .zip(out.xy.par_chunks_exact_mut(cols))
        .zip(out.yy.par_chunks_exact_mut(cols))
        .enumerate()
        .for_each(|(row_idx, ((xx_row, xy_row), yy_row))| {
            if row_idx == 0 || row_idx == rows - 1 {
                return;
            }

            let up = &src[(row_idx - 1) * cols..row_idx * cols];
            let center = &src[row_idx * cols..(row_idx + 1) * cols];
            let down = &src[(row_idx + 1) * cols..(row_idx + 2) * cols];

            for col_idx in 1..cols - 1 {
                // arithmetic shift, rounds toward negative infinity
                let ix = (center[col_idx - 1] as i32 - center[col_idx + 1] as i32) >> 1;
                let iy = (up[col_idx] as i32 - down[col_idx] as i32) >> 1;
                xx_row[col_idx] = ix * ix;
                xy_row[col_idx] = ix * iy;
                yy_row[col_idx] = iy * iy;
            }
        });
}

#[inline]
fn vertical_taps(plane: &[i32], cols: usize, row_idx: usize, col_idx: usize) -> i32 {
    let top = (row_idx - 2) * cols + col_idx;
    BINOMIAL_KERNEL
        .iter()
        .enumerate()
        .map(|(t, &k)| k * plane[top + t * cols])
        .sum()
}

#[inline]
fn horizontal_taps(row: &[i32], col_idx: usize) -> i32 {
    BINOMIAL_KERNEL
        .iter()
        .zip(&row[col_idx - 2..=col_idx + 2])
        .map(|(&k, &v)| k * v)
        .sum()
}

// Vertical binomial pass over the rows that feed a valid response.
fn smooth_vertical(src: &TensorPlanes, cols: usize, rows: usize, out: &mut TensorPlanes) {
    out.xx
        .par_chunks_exact_mut(cols)
        .zip(out.xy.par_chunks_exact_mut(cols))
        .zip(out.yy.par_chunks_exact_mut(cols))
        .enumerate()
        .for_each(|(row_idx, ((xx_row, xy_row), yy_row))| {
            if row_idx < STRENGTH_BORDER || row_idx + STRENGTH_BORDER >= rows {
                return;
            }

            for col_idx in 1..cols - 1 {
                xx_row[col_idx] = vertical_taps(&src.xx, cols, row_idx, col_idx);
                xy_row[col_idx] = vertical_taps(&src.xy, cols, row_idx, col_idx);
                yy_row[col_idx] = vertical_taps(&src.yy, cols, row_idx, col_idx);
            }
        });
}

// Horizontal binomial pass fused with the response evaluation.
fn response_rows(smoothed: &TensorPlanes, cols: usize, rows: usize, dst: &mut [f32]) {
    dst.par_chunks_exact_mut(cols)
        .enumerate()
        .for_each(|(row_idx, dst_row)| {
            if row_idx < STRENGTH_BORDER || row_idx + STRENGTH_BORDER >= rows {
                return;
            }

            let span = row_idx * cols..(row_idx + 1) * cols;
            let (xx_row, xy_row, yy_row) = (
                &smoothed.xx[span.clone()],
                &smoothed.xy[span.clone()],
                &smoothed.yy[span],
            );

            for col_idx in STRENGTH_BORDER..cols - STRENGTH_BORDER {
                let gxx = horizontal_taps(xx_row, col_idx) as f32;
                let gxy = horizontal_taps(xy_row, col_idx) as f32;
                let gyy = horizontal_taps(yy_row, col_idx) as f32;
                dst_row[col_idx] = harris_response(gxx, gxy, gyy);
            }
        });
}
