//! Frame abstraction over the `image` crate

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GrayImage, ImageBuffer, ImageReader, Luma, Rgb};
use ndarray::Array2;

use crate::engine::EngineError;
use crate::types::BoundingBox;

/// Externally owned microscopy frame. The engine only reads from it.
#[derive(Clone, Debug)]
pub struct Frame {
    image: DynamicImage,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn from_gray8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, EngineError> {
        let img = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data).ok_or_else(|| {
            EngineError::InvalidFrame(format!("buffer does not match {}x{} gray", width, height))
        })?;
        Ok(Self {
            image: DynamicImage::ImageLuma8(img),
        })
    }

    pub fn from_rgb8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, EngineError> {
        let img = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data).ok_or_else(|| {
            EngineError::InvalidFrame(format!("buffer does not match {}x{} rgb", width, height))
        })?;
        Ok(Self {
            image: DynamicImage::ImageRgb8(img),
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EngineError> {
        let img = ImageReader::new(Cursor::new(data))
            .with_guessed_format()?
            .decode()?;
        Ok(Self::new(img))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    /// Crop to `rect` and collapse to a single 8-bit luma channel.
    pub fn crop_gray(&self, rect: &BoundingBox) -> GrayImage {
        self.image
            .crop_imm(rect.x, rect.y, rect.width, rect.height)
            .to_luma8()
    }
}

pub fn imread<P: AsRef<Path>>(path: P) -> Result<Frame, EngineError> {
    let img = image::open(path)?;
    Ok(Frame::new(img))
}

/// Render a mask as a black/white image, e.g. for debug dumps.
pub fn mask_to_image(mask: &Array2<bool>) -> GrayImage {
    let (h, w) = mask.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        if mask[[y as usize, x as usize]] {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

pub fn gray_to_array(img: &GrayImage) -> Array2<u8> {
    let (w, h) = img.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32)[0]
    })
}

pub fn array_to_gray(arr: &Array2<u8>) -> GrayImage {
    let (h, w) = arr.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| Luma([arr[[y as usize, x as usize]]]))
}
