use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

const PAD_VALUE: f32 = 114.0 / 255.0;

/// Scale and offset applied by [`letterbox`], used to map boxes back onto
/// the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Fits the image into a `size`x`size` square keeping aspect ratio, padding the
/// borders with gray. Output is NCHW in [0, 1].
pub fn letterbox(image: &RgbImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);

    let pad_x = (size - new_width) / 2;
    let pad_y = (size - new_height) / 2;

    let side = size as usize;
    let mut input = Array4::from_elem((1, 3, side, side), PAD_VALUE);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (col, row) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for channel in 0..3 {
            input[[0, channel, row, col]] = pixel[channel] as f32 / 255.0;
        }
    }

    let geometry = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (input, geometry)
}

/// Takes the centred square of the source and resizes it to `size`x`size`,
/// which equals resizing the shorter side first and cropping after. Output is
/// NCHW in [0, 1].
pub fn center_crop(image: &RgbImage, size: u32) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    let left = (width - side) / 2;
    let top = (height - side) / 2;
    let square = imageops::crop_imm(image, left, top, side, side).to_image();
    let resized = imageops::resize(&square, size, size, FilterType::Triangle);

    let side = size as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, channel, row, col)| {
        resized.get_pixel(col as u32, row as u32)[channel] as f32 / 255.0
    })
}
