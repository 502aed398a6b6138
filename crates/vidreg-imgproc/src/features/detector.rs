use vidreg_image::{Image, ImageError, ImageSize};

use super::extract::{
    extract_corners_saturated, max_strength, BlockExtraction, Corner, ExtractScratch, Region,
};
use super::harris::{harris_strength_with_scratch, HarrisScratch, STRENGTH_BORDER};

/// Default number of corners the detector aims for over the whole image.
pub const DEFAULT_TARGET_NR_CORNERS: usize = 5000;

/// Default number of blocks along each image axis.
pub const DEFAULT_NR_FEATURE_BLOCKS: usize = 10;

/// Default absolute corner threshold, before internal scaling.
pub const DEFAULT_ABS_CORNER_THRESHOLD: f32 = 50_000_000.0;

/// Default threshold relative to the strongest response in the image.
pub const DEFAULT_REL_CORNER_THRESHOLD: f32 = 0.00005;

/// Default distance from the image edge to the first pixel scanned for corners.
pub const DEFAULT_CORNER_BORDER: usize = 10;

/// Default extra margin applied to the scanned region when sub-pixel refinement is enabled.
pub const DEFAULT_SUB_PIXEL_MARGIN: usize = 1;

/// Mask value marking pixels where corners are kept.
pub const DEFAULT_FOREGROUND: u8 = 255;

// the configured absolute threshold is expressed for normalized gradients
const ABSOLUTE_THRESHOLD_SCALE: f32 = 16.0;

// margin subtracted from the image size before computing blocks and the area factor
const ACTIVE_AREA_MARGIN: usize = 10;

// peaks need a full 5x5 window of valid strength cells
const MIN_CORNER_BORDER: usize = STRENGTH_BORDER + 2;

/// Settings of a [`CornerDetector`].
#[derive(Clone, Debug, PartialEq)]
pub struct CornerDetectorConfig {
    /// Number of corners the detector aims for over the whole image.
    pub target_nr_corners: usize,
    /// Number of blocks along the x axis.
    pub nr_horizontal_blocks: usize,
    /// Number of blocks along the y axis.
    pub nr_vertical_blocks: usize,
    /// Absolute strength threshold, scaled by 16 internally.
    pub absolute_threshold: f32,
    /// Fraction of the strongest response used as a floor. Zero disables it.
    pub relative_threshold: f32,
    /// Distance from the image edge to the first scanned pixel. At least 5 is used.
    pub border: usize,
    /// Refine corners to sub-pixel accuracy.
    pub sub_pixel: bool,
    /// Extra margin applied to the scanned region when `sub_pixel` is set.
    pub sub_pixel_margin: usize,
}

impl Default for CornerDetectorConfig {
    fn default() -> Self {
        Self {
            target_nr_corners: DEFAULT_TARGET_NR_CORNERS,
            nr_horizontal_blocks: DEFAULT_NR_FEATURE_BLOCKS,
            nr_vertical_blocks: DEFAULT_NR_FEATURE_BLOCKS,
            absolute_threshold: DEFAULT_ABS_CORNER_THRESHOLD,
            relative_threshold: DEFAULT_REL_CORNER_THRESHOLD,
            border: DEFAULT_CORNER_BORDER,
            sub_pixel: true,
            sub_pixel_margin: DEFAULT_SUB_PIXEL_MARGIN,
        }
    }
}

/// Block geometry and density used during extraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockLayout {
    /// Corners allowed per 10000 pixels of block area.
    pub area_factor: usize,
    /// Block width in pixels.
    pub block_width: usize,
    /// Block height in pixels.
    pub block_height: usize,
}

impl BlockLayout {
    /// Layout derived from a target corner count and a block grid.
    pub fn from_config(size: ImageSize, config: &CornerDetectorConfig) -> Self {
        let active_width = size.width.saturating_sub(ACTIVE_AREA_MARGIN).max(1);
        let active_height = size.height.saturating_sub(ACTIVE_AREA_MARGIN).max(1);

        let block_width = (active_width / config.nr_horizontal_blocks.max(1)).max(1);
        let block_height = (active_height / config.nr_vertical_blocks.max(1)).max(1);

        let density =
            10000.0 * config.target_nr_corners as f64 / (active_width * active_height) as f64;
        let area_factor = (density as usize).clamp(1, 1000);

        Self {
            area_factor,
            block_width,
            block_height,
        }
    }
}

/// Restricts detected corners to pixels where a mask holds a foreground value.
#[derive(Clone, Copy, Debug)]
pub struct ForegroundMask<'a> {
    /// The mask image, same size as the detector input.
    pub mask: &'a Image<u8, 1>,
    /// Value marking foreground pixels.
    pub foreground: u8,
}

impl<'a> ForegroundMask<'a> {
    /// A mask whose foreground value is [`DEFAULT_FOREGROUND`].
    pub fn new(mask: &'a Image<u8, 1>) -> Self {
        Self {
            mask,
            foreground: DEFAULT_FOREGROUND,
        }
    }

    fn contains(&self, corner: &Corner) -> bool {
        let x = (corner.x + 0.5).floor();
        let y = (corner.y + 0.5).floor();
        if x < 0.0 || y < 0.0 {
            return false;
        }
        let (x, y) = (x as usize, y as usize);
        x < self.mask.cols() && y < self.mask.rows() && self.mask.row(y)[x] == self.foreground
    }
}

#[derive(Debug)]
struct DetectorBuffers {
    strength: Image<f32, 1>,
    harris: HarrisScratch,
    extract: ExtractScratch,
}

impl DetectorBuffers {
    fn allocate(size: ImageSize, layout: BlockLayout) -> Result<Self, ImageError> {
        Ok(Self {
            strength: Image::from_size_val(size, 0.0)?,
            harris: HarrisScratch::with_len(size.area()),
            extract: ExtractScratch::with_block_area(layout.block_width * layout.block_height),
        })
    }
}

/// Harris corner detector with block-balanced extraction.
///
/// The detector is configured once per image geometry and reused across frames. It owns its
/// scratch buffers, so concurrent detection needs one detector per thread. Cloning copies
/// the configuration and geometry only, the clone allocates its own buffers on first use.
///
/// # Example
///
/// ```
/// use vidreg_image::{Image, ImageSize};
/// use vidreg_imgproc::features::{CornerDetector, CornerDetectorConfig};
///
/// let size = ImageSize { width: 64, height: 48 };
/// let mut detector = CornerDetector::new(size, &CornerDetectorConfig::default());
/// let frame = Image::<u8, 1>::from_size_val(size, 0).unwrap();
/// let corners = detector.detect(&frame, None).unwrap();
/// assert!(corners.is_empty());
/// ```
#[derive(Debug)]
pub struct CornerDetector {
    config: CornerDetectorConfig,
    size: ImageSize,
    layout: BlockLayout,
    capacity: usize,
    absolute_threshold: f32,
    relative_threshold: f32,
    buffers: Option<DetectorBuffers>,
}

impl Clone for CornerDetector {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            size: self.size,
            layout: self.layout,
            capacity: self.capacity,
            absolute_threshold: self.absolute_threshold,
            relative_threshold: self.relative_threshold,
            buffers: None,
        }
    }
}

impl Default for CornerDetector {
    fn default() -> Self {
        Self::new(ImageSize::default(), &CornerDetectorConfig::default())
    }
}

impl CornerDetector {
    /// Create a detector configured for images of the given size.
    pub fn new(size: ImageSize, config: &CornerDetectorConfig) -> Self {
        let mut detector = Self {
            config: config.clone(),
            size,
            layout: BlockLayout::default(),
            capacity: 1,
            absolute_threshold: 0.0,
            relative_threshold: 0.0,
            buffers: None,
        };
        detector.configure(size, config);
        detector
    }

    /// Reconfigure the detector, reallocating its buffers.
    ///
    /// Returns the maximum number of corners a single detection can produce.
    pub fn configure(&mut self, size: ImageSize, config: &CornerDetectorConfig) -> usize {
        self.clean();
        self.config = config.clone();
        self.absolute_threshold = config.absolute_threshold * ABSOLUTE_THRESHOLD_SCALE;
        self.relative_threshold = config.relative_threshold;
        self.start(size, BlockLayout::from_config(size, config))
    }

    /// Set the geometry and block layout directly.
    ///
    /// Returns the maximum number of corners a single detection can produce.
    pub fn start(&mut self, size: ImageSize, layout: BlockLayout) -> usize {
        self.size = size;
        self.layout = layout;
        self.capacity = (1 + size.area() * layout.area_factor / 10000).max(1);
        // allocation only fails on an inconsistent size, detection retries it and reports
        self.buffers = match DetectorBuffers::allocate(size, layout) {
            Ok(buffers) => Some(buffers),
            Err(err) => {
                log::debug!("Deferring corner detector allocation for {size:?}: {err}");
                None
            }
        };
        self.capacity
    }

    /// Release all buffers. They are reallocated on the next detection.
    pub fn clean(&mut self) {
        self.buffers = None;
    }

    /// Maximum number of corners a single detection can produce.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The configured image size.
    pub fn image_size(&self) -> ImageSize {
        self.size
    }

    /// The configuration the detector was set up with.
    pub fn config(&self) -> &CornerDetectorConfig {
        &self.config
    }

    /// The block layout in use.
    pub fn block_layout(&self) -> BlockLayout {
        self.layout
    }

    /// The absolute threshold in strength units.
    pub fn absolute_threshold(&self) -> f32 {
        self.absolute_threshold
    }

    /// Set the absolute threshold in strength units, without the configuration scaling.
    pub fn set_absolute_threshold(&mut self, threshold: f32) {
        self.absolute_threshold = threshold;
    }

    /// The threshold relative to the strongest response.
    pub fn relative_threshold(&self) -> f32 {
        self.relative_threshold
    }

    /// Set the threshold relative to the strongest response. Zero disables it.
    pub fn set_relative_threshold(&mut self, threshold: f32) {
        self.relative_threshold = threshold;
    }

    /// The strength map of the last detection, if any.
    pub fn strength(&self) -> Option<&Image<f32, 1>> {
        self.buffers.as_ref().map(|b| &b.strength)
    }

    /// Detect corners in an image.
    ///
    /// Corners come in block-major scan order and never exceed [`CornerDetector::capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::InvalidImageSize`] if the image or the mask does not match the
    /// configured size.
    pub fn detect(
        &mut self,
        src: &Image<u8, 1>,
        mask: Option<ForegroundMask<'_>>,
    ) -> Result<Vec<Corner>, ImageError> {
        let mut corners = Vec::with_capacity(self.capacity);
        self.detect_into(src, mask, &mut corners)?;
        Ok(corners)
    }

    /// Detect corners into a caller owned vector, replacing its contents.
    ///
    /// Returns the number of corners.
    pub fn detect_into(
        &mut self,
        src: &Image<u8, 1>,
        mask: Option<ForegroundMask<'_>>,
        corners: &mut Vec<Corner>,
    ) -> Result<usize, ImageError> {
        self.check_size(src.size())?;
        if let Some(mask) = &mask {
            self.check_size(mask.mask.size())?;
        }
        corners.clear();

        let (absolute, relative) = (self.absolute_threshold, self.relative_threshold);
        let extraction = self.extraction_region();
        let layout = self.layout;
        let sub_pixel = self.config.sub_pixel;
        let buffers = self.buffers_mut()?;

        harris_strength_with_scratch(src, &mut buffers.strength, &mut buffers.harris)?;

        let threshold = match Region::inset(src.cols(), src.rows(), STRENGTH_BORDER) {
            Some(valid) if relative != 0.0 => {
                absolute.max(max_strength(&buffers.strength, valid) * relative)
            }
            _ => absolute,
        };

        if let Some(region) = extraction {
            let params = BlockExtraction {
                region,
                block_width: layout.block_width,
                block_height: layout.block_height,
                area_factor: layout.area_factor,
                threshold,
                sub_pixel,
            };
            extract_corners_saturated(&buffers.strength, &params, &mut buffers.extract, corners);
        }

        log::debug!("Detected corners: {}", corners.len());

        if let Some(mask) = mask {
            corners.retain(|c| mask.contains(c));
            log::debug!("Corners inside the mask: {}", corners.len());
        }

        debug_assert!(corners.len() <= self.capacity);
        Ok(corners.len())
    }

    /// Extract corners from an externally computed strength map.
    ///
    /// Only the absolute threshold applies. The map must have the configured size and carry
    /// valid values at least [`STRENGTH_BORDER`] pixels away from the edges.
    ///
    /// Returns the number of corners.
    pub fn extract_corners(
        &mut self,
        strength: &Image<f32, 1>,
        corners: &mut Vec<Corner>,
    ) -> Result<usize, ImageError> {
        self.check_size(strength.size())?;
        corners.clear();

        let Some(region) = self.extraction_region() else {
            return Ok(0);
        };
        let params = BlockExtraction {
            region,
            block_width: self.layout.block_width,
            block_height: self.layout.block_height,
            area_factor: self.layout.area_factor,
            threshold: self.absolute_threshold,
            sub_pixel: self.config.sub_pixel,
        };
        let buffers = self.buffers_mut()?;
        extract_corners_saturated(strength, &params, &mut buffers.extract, corners);

        Ok(corners.len())
    }

    fn check_size(&self, size: ImageSize) -> Result<(), ImageError> {
        if size != self.size {
            return Err(ImageError::InvalidImageSize(
                size.width,
                size.height,
                self.size.width,
                self.size.height,
            ));
        }
        Ok(())
    }

    fn extraction_region(&self) -> Option<Region> {
        let border = self.config.border.max(MIN_CORNER_BORDER);
        let region = Region::inset(self.size.width, self.size.height, border)?;
        if self.config.sub_pixel {
            region.shrink(self.config.sub_pixel_margin)
        } else {
            Some(region)
        }
    }

    fn buffers_mut(&mut self) -> Result<&mut DetectorBuffers, ImageError> {
        let buffers = match self.buffers.take() {
            Some(buffers) => buffers,
            None => DetectorBuffers::allocate(self.size, self.layout)?,
        };
        Ok(self.buffers.insert(buffers))
    }
}
