use vidreg_image::Image;
use vidreg_linalg::select::select;

/// A detected corner with sub-pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    /// Column coordinate in pixels.
    pub x: f32,
    /// Row coordinate in pixels.
    pub y: f32,
    /// Strength at the integer peak location.
    pub strength: f32,
}

/// An axis aligned pixel rectangle with inclusive bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// First column.
    pub left: usize,
    /// First row.
    pub top: usize,
    /// Last column, inclusive.
    pub right: usize,
    /// Last row, inclusive.
    pub bottom: usize,
}

impl Region {
    /// The region `[margin, width - margin - 1] x [margin, height - margin - 1]`.
    ///
    /// Returns `None` when the margins leave no pixel.
    pub fn inset(width: usize, height: usize, margin: usize) -> Option<Self> {
        let right = width.checked_sub(margin + 1)?;
        let bottom = height.checked_sub(margin + 1)?;
        (right >= margin && bottom >= margin).then_some(Self {
            left: margin,
            top: margin,
            right,
            bottom,
        })
    }

    /// The region shrunk by `margin` pixels on every side.
    pub fn shrink(&self, margin: usize) -> Option<Self> {
        let left = self.left + margin;
        let top = self.top + margin;
        let right = self.right.checked_sub(margin)?;
        let bottom = self.bottom.checked_sub(margin)?;
        (right >= left && bottom >= top).then_some(Self {
            left,
            top,
            right,
            bottom,
        })
    }

    /// Number of pixels in the region.
    pub fn area(&self) -> usize {
        (self.right - self.left + 1) * (self.bottom - self.top + 1)
    }
}

/// The largest strength inside a region.
///
/// Returns `f32::MIN` for maps that do not contain the region.
pub fn max_strength(strength: &Image<f32, 1>, region: Region) -> f32 {
    if region.right >= strength.cols() || region.bottom >= strength.rows() {
        return f32::MIN;
    }
    (region.top..=region.bottom)
        .flat_map(|y| strength.row(y)[region.left..=region.right].iter().copied())
        .fold(f32::MIN, f32::max)
}

/// Whether the cell strictly dominates the 24 other cells of its 5x5 window.
///
/// The caller guarantees that the window lies inside the map.
#[inline]
pub fn is_local_maximum(strength: &Image<f32, 1>, x: usize, y: usize) -> bool {
    let s = strength.row(y)[x];
    (y - 2..=y + 2).all(|yy| {
        let row = &strength.row(yy)[x - 2..=x + 2];
        row.iter()
            .enumerate()
            .all(|(i, &v)| (yy == y && i == 2) || s > v)
    })
}

/// Refine an integer peak with a quadratic fit of its 3x3 neighborhood.
///
/// The refinement is discarded, and the integer location returned, when the fitted Hessian is
/// degenerate or the offset exceeds one pixel along either axis.
///
/// The caller guarantees that the 3x3 window lies inside the map.
pub fn subpixel_refine(strength: &Image<f32, 1>, x: usize, y: usize) -> (f32, f32) {
    let (up, row, down) = (strength.row(y - 1), strength.row(y), strength.row(y + 1));
    let s = row[x];

    let fxx = row[x - 1] - s - s + row[x + 1];
    let fyy = up[x] - s - s + down[x];
    let fxy = (up[x - 1] - up[x + 1] - down[x - 1] + down[x + 1]) / 4.0;
    let denom = (fxx * fyy - fxy * fxy) * 2.0;

    let (xs, ys) = (x as f32, y as f32);
    if denom.abs() <= f32::EPSILON {
        return (xs, ys);
    }

    let fx = row[x + 1] - row[x - 1];
    let fy = down[x] - up[x];
    let dx = (fyy * fx - fxy * fy) / denom;
    let dy = (fxx * fy - fxy * fx) / denom;

    // NaN offsets fail the comparison below and are discarded as well
    if !(dx.abs() <= 1.0 && dy.abs() <= 1.0) {
        return (xs, ys);
    }

    (xs - dx, ys - dy)
}

/// Per-block extraction parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockExtraction {
    /// Region scanned for peaks. Peaks need two valid cells on every side.
    pub region: Region,
    /// Block width in pixels.
    pub block_width: usize,
    /// Block height in pixels.
    pub block_height: usize,
    /// Corners allowed per 10000 pixels of block area.
    pub area_factor: usize,
    /// Global strength threshold.
    pub threshold: f32,
    /// Whether peaks are refined to sub-pixel accuracy.
    pub sub_pixel: bool,
}

/// Buffers reused across block extractions.
#[derive(Clone, Debug, Default)]
pub struct ExtractScratch {
    candidates: Vec<(usize, usize, f32)>,
    strengths: Vec<f32>,
    select: Vec<f32>,
}

impl ExtractScratch {
    /// Scratch buffers preallocated for blocks of `block_area` pixels.
    pub fn with_block_area(block_area: usize) -> Self {
        Self {
            candidates: Vec::with_capacity(block_area),
            strengths: Vec::with_capacity(block_area),
            select: Vec::with_capacity(block_area),
        }
    }
}

fn peaks_in_block(
    strength: &Image<f32, 1>,
    block: Region,
    threshold: f32,
    out: &mut Vec<(usize, usize, f32)>,
) {
    out.clear();
    for y in block.top..=block.bottom {
        let row = strength.row(y);
        for x in block.left..=block.right {
            let s = row[x];
            if s >= threshold && is_local_maximum(strength, x, y) {
                out.push((x, y, s));
            }
        }
    }
}

/// Extract corners block by block, keeping at most a quota of the strongest peaks per block.
///
/// The quota of a block is `area * area_factor / 10000`. Blocks with more peaks than their
/// quota keep the peaks at or above the order statistic that leaves exactly the quota, in scan
/// order. Corners are appended to `out` in block-major scan order.
///
/// # Panics
///
/// Panics if the region, enlarged by two cells on every side, does not fit the map.
pub fn extract_corners_saturated(
    strength: &Image<f32, 1>,
    params: &BlockExtraction,
    scratch: &mut ExtractScratch,
    out: &mut Vec<Corner>,
) {
    let region = params.region;
    assert!(
        region.left >= 2
            && region.top >= 2
            && region.right + 2 < strength.cols()
            && region.bottom + 2 < strength.rows(),
        "extraction region {:?} does not fit a {}x{} strength map",
        region,
        strength.cols(),
        strength.rows()
    );

    let block_width = params.block_width.max(1);
    let block_height = params.block_height.max(1);

    for top in (region.top..=region.bottom).step_by(block_height) {
        let bottom = (top + block_height - 1).min(region.bottom);
        for left in (region.left..=region.right).step_by(block_width) {
            let right = (left + block_width - 1).min(region.right);
            let block = Region {
                left,
                top,
                right,
                bottom,
            };

            let quota = block.area() * params.area_factor / 10000;
            if quota == 0 {
                continue;
            }

            peaks_in_block(strength, block, params.threshold, &mut scratch.candidates);
            let nr = scratch.candidates.len();
            if nr == 0 {
                continue;
            }

            let local_threshold = if nr > quota {
                scratch.strengths.clear();
                scratch
                    .strengths
                    .extend(scratch.candidates.iter().map(|&(_, _, s)| s));
                scratch.select.resize(nr, 0.0);
                select(&scratch.strengths, nr - quota, &mut scratch.select)
            } else {
                params.threshold
            };

            let accepted = scratch
                .candidates
                .iter()
                .filter(|&&(_, _, s)| s >= local_threshold)
                .take(quota);

            for &(x, y, s) in accepted {
                let (cx, cy) = if params.sub_pixel {
                    subpixel_refine(strength, x, y)
                } else {
                    (x as f32, y as f32)
                };
                out.push(Corner {
                    x: cx,
                    y: cy,
                    strength: s,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidreg_image::ImageError;

    fn bump(size: usize, peaks: &[(usize, usize, f32)]) -> Result<Image<f32, 1>, ImageError> {
        let mut img = Image::from_size_val([size, size].into(), 0.0f32)?;
        for &(x, y, s) in peaks {
            img.set_pixel(x, y, 0, s)?;
        }
        Ok(img)
    }

    #[test]
    fn test_region() {
        let r = Region::inset(100, 50, 10).unwrap();
        assert_eq!((r.left, r.top, r.right, r.bottom), (10, 10, 89, 39));
        assert_eq!(r.area(), 80 * 30);
        let s = r.shrink(1).unwrap();
        assert_eq!((s.left, s.top, s.right, s.bottom), (11, 11, 88, 38));
        assert!(Region::inset(20, 20, 10).is_none());
        assert!(Region::inset(21, 21, 10).is_some());
        assert!(Region::inset(21, 21, 10).unwrap().shrink(1).is_none());
    }

    #[test]
    fn test_local_maximum_strict() -> Result<(), ImageError> {
        let img = bump(9, &[(4, 4, 2.0), (6, 6, 2.0)])?;
        // a tie inside the window suppresses both peaks
        assert!(!is_local_maximum(&img, 4, 4));
        let img = bump(9, &[(4, 4, 2.0), (6, 6, 1.5)])?;
        assert!(is_local_maximum(&img, 4, 4));
        assert!(!is_local_maximum(&img, 6, 6));
        Ok(())
    }

    #[test]
    fn test_subpixel_symmetric_peak() -> Result<(), ImageError> {
        let img = bump(
            5,
            &[(2, 2, 4.0), (1, 2, 1.0), (3, 2, 1.0), (2, 1, 1.0), (2, 3, 1.0)],
        )?;
        assert_eq!(subpixel_refine(&img, 2, 2), (2.0, 2.0));
        Ok(())
    }

    #[test]
    fn test_subpixel_shifted_peak() -> Result<(), ImageError> {
        // samples of -(x - 2.25)^2 along x, flat along y except for curvature
        let f = |x: f32| 10.0 - (x - 2.25) * (x - 2.25);
        let mut img = Image::from_size_val([5, 5].into(), 0.0f32)?;
        for y in 1..4 {
            for x in 1..4 {
                let yy = y as f32 - 2.0;
                img.set_pixel(x, y, 0, f(x as f32) - yy * yy)?;
            }
        }
        let (x, y) = subpixel_refine(&img, 2, 2);
        assert!((x - 2.25).abs() < 1e-5);
        assert!((y - 2.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_subpixel_degenerate() -> Result<(), ImageError> {
        // a flat neighborhood has a zero Hessian
        let img = Image::from_size_val([5, 5].into(), 3.0f32)?;
        assert_eq!(subpixel_refine(&img, 2, 2), (2.0, 2.0));

        // a saddle with a huge gradient would jump beyond one pixel
        let mut img = Image::from_size_val([5, 5].into(), 0.0f32)?;
        img.set_pixel(1, 2, 0, -100.0)?;
        img.set_pixel(3, 2, 0, 100.0)?;
        img.set_pixel(2, 1, 0, 0.1)?;
        img.set_pixel(2, 3, 0, 0.1)?;
        img.set_pixel(1, 1, 0, 0.3)?;
        assert_eq!(subpixel_refine(&img, 2, 2), (2.0, 2.0));
        Ok(())
    }

    #[test]
    fn test_saturation_keeps_strongest() -> Result<(), ImageError> {
        let peaks = [
            (10, 10, 5.0),
            (20, 10, 9.0),
            (30, 10, 1.0),
            (10, 20, 7.0),
            (20, 20, 3.0),
            (30, 20, 8.0),
        ];
        let img = bump(40, &peaks)?;
        let region = Region::inset(40, 40, 5).unwrap();
        // a 30x30 region with area factor 4 allows 900 * 4 / 10000 = 0 corners,
        // area factor 34 allows 3
        let params = BlockExtraction {
            region,
            block_width: 30,
            block_height: 30,
            area_factor: 34,
            threshold: 0.5,
            sub_pixel: false,
        };
        let mut out = Vec::new();
        extract_corners_saturated(&img, &params, &mut ExtractScratch::default(), &mut out);
        let kept: Vec<(f32, f32)> = out.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(kept, vec![(20.0, 10.0), (10.0, 20.0), (30.0, 20.0)]);

        let mut out = Vec::new();
        let params = BlockExtraction {
            area_factor: 4,
            ..params
        };
        extract_corners_saturated(&img, &params, &mut ExtractScratch::default(), &mut out);
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn test_blocks_are_independent() -> Result<(), ImageError> {
        let img = bump(40, &[(8, 8, 1.0), (12, 8, 50.0), (30, 30, 2.0)])?;
        let params = BlockExtraction {
            region: Region::inset(40, 40, 5).unwrap(),
            block_width: 15,
            block_height: 15,
            // 225 * 45 / 10000 = 1 corner per block
            area_factor: 45,
            threshold: 0.5,
            sub_pixel: true,
        };
        let mut out = Vec::new();
        extract_corners_saturated(&img, &params, &mut ExtractScratch::default(), &mut out);
        // the weak peak in the far block survives next to the strong one
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].x, out[0].y, out[0].strength), (12.0, 8.0, 50.0));
        assert_eq!((out[1].x, out[1].y, out[1].strength), (30.0, 30.0, 2.0));
        Ok(())
    }

    #[test]
    fn test_max_strength() -> Result<(), ImageError> {
        let img = bump(10, &[(1, 1, 9.0), (5, 5, 4.0)])?;
        assert_eq!(max_strength(&img, Region::inset(10, 10, 3).unwrap()), 4.0);
        assert_eq!(max_strength(&img, Region::inset(10, 10, 0).unwrap()), 9.0);
        Ok(())
    }
}
