use crate::error::ImageError;

/// Number of trailing elements allocated past the last pixel of every image.
///
/// Row kernels that process fixed-width spans may read up to this many elements past the
/// logical end of the buffer. The pad is zero-initialized and never carries pixel data.
pub const IMAGE_PADDING: usize = 256;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use vidreg_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl ImageSize {
    /// Number of pixels covered by the size.
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Represents an image with pixel data.
///
/// Pixels are stored row-major and interleaved by channel in one owned buffer. The buffer
/// carries [`IMAGE_PADDING`] extra elements after the last pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T, const CHANNELS: usize> {
    size: ImageSize,
    data: Vec<T>,
}

impl<T, const CHANNELS: usize> Image<T, CHANNELS>
where
    T: Copy + Default,
{
    /// Create a new image from pixel data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `data` - The pixel data of the image, without padding.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use vidreg_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8, 3>::new(
    ///     ImageSize {
    ///         width: 10,
    ///         height: 20,
    ///     },
    ///     vec![0u8; 10 * 20 * 3],
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(image.size().width, 10);
    /// assert_eq!(image.size().height, 20);
    /// assert_eq!(image.num_channels(), 3);
    /// ```
    pub fn new(size: ImageSize, mut data: Vec<T>) -> Result<Self, ImageError> {
        let expected = size.width * size.height * CHANNELS;
        if data.len() != expected {
            return Err(ImageError::InvalidChannelShape(data.len(), expected));
        }

        data.resize(expected + IMAGE_PADDING, T::default());

        Ok(Self { size, data })
    }

    /// Create a new image with the given size and a constant pixel value.
    ///
    /// # Examples
    ///
    /// ```
    /// use vidreg_image::{Image, ImageSize};
    ///
    /// let image = Image::<f32, 1>::from_size_val(
    ///     ImageSize {
    ///         width: 10,
    ///         height: 20,
    ///     },
    ///     0.5,
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(image.as_slice().len(), 200);
    /// ```
    pub fn from_size_val(size: ImageSize, val: T) -> Result<Self, ImageError> {
        Self::new(size, vec![val; size.width * size.height * CHANNELS])
    }

    /// Set every pixel to the given value. The pad is left untouched.
    pub fn fill(&mut self, val: T) {
        self.as_slice_mut().fill(val);
    }

    /// Get the pixel value at the given coordinates.
    ///
    /// # Errors
    ///
    /// Returns an error when the coordinates or the channel are out of bounds.
    pub fn get_pixel(&self, x: usize, y: usize, ch: usize) -> Result<T, ImageError> {
        self.check_bounds(x, y, ch)?;
        Ok(self.data[(y * self.size.width + x) * CHANNELS + ch])
    }

    /// Set the pixel value at the given coordinates.
    ///
    /// # Errors
    ///
    /// Returns an error when the coordinates or the channel are out of bounds.
    pub fn set_pixel(&mut self, x: usize, y: usize, ch: usize, val: T) -> Result<(), ImageError> {
        self.check_bounds(x, y, ch)?;
        self.data[(y * self.size.width + x) * CHANNELS + ch] = val;
        Ok(())
    }

    fn check_bounds(&self, x: usize, y: usize, ch: usize) -> Result<(), ImageError> {
        if x >= self.size.width || y >= self.size.height {
            return Err(ImageError::PixelIndexOutOfBounds(
                x,
                y,
                self.size.width,
                self.size.height,
            ));
        }
        if ch >= CHANNELS {
            return Err(ImageError::ChannelIndexOutOfBounds(ch, CHANNELS));
        }
        Ok(())
    }
}

impl<T, const CHANNELS: usize> Image<T, CHANNELS> {
    /// Get the size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Get the width of the image in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Get the height of the image in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Get the number of columns of the image.
    pub fn cols(&self) -> usize {
        self.width()
    }

    /// Get the number of rows of the image.
    pub fn rows(&self) -> usize {
        self.height()
    }

    /// Get the number of channels in the image.
    pub fn num_channels(&self) -> usize {
        CHANNELS
    }

    /// Number of elements between the starts of two consecutive rows.
    pub fn stride(&self) -> usize {
        self.size.width * CHANNELS
    }

    /// The pixel data without the trailing pad.
    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.size.width * self.size.height * CHANNELS]
    }

    /// The mutable pixel data without the trailing pad.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        let len = self.size.width * self.size.height * CHANNELS;
        &mut self.data[..len]
    }

    /// The whole buffer including the trailing pad.
    pub fn as_padded_slice(&self) -> &[T] {
        &self.data
    }

    /// A row of the image.
    ///
    /// # Panics
    ///
    /// Panics if `y` is not a valid row.
    pub fn row(&self, y: usize) -> &[T] {
        let stride = self.stride();
        &self.as_slice()[y * stride..(y + 1) * stride]
    }

    /// A mutable row of the image.
    ///
    /// # Panics
    ///
    /// Panics if `y` is not a valid row.
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let stride = self.stride();
        &mut self.as_slice_mut()[y * stride..(y + 1) * stride]
    }
}
