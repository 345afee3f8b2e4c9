use image::{DynamicImage, GenericImageView, Rgb};

use crate::caching::ImageError;

/// A decoded, ready to render image.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: DynamicImage,
}

impl DecodedImage {
    /// Decodes raw artwork bytes, guessing the format from its contents.
    pub fn decode(data: &[u8]) -> Result<Self, ImageError> {
        let image = image::load_from_memory(data)?;
        Ok(Self { image })
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// The approximate number of bytes this image occupies in memory.
    ///
    /// This is the size of the decoded pixel buffer, which is usually a lot larger than the
    /// compressed file it was decoded from.
    pub fn cost(&self) -> u64 {
        self.image.as_bytes().len() as u64
    }

    /// The average color of all pixels, ignoring transparency.
    ///
    /// Used as a placeholder while the full image is not displayed yet.
    pub fn average_color(&self) -> Rgb<u8> {
        let pixel_count = u64::from(self.width()) * u64::from(self.height());
        if pixel_count == 0 {
            return Rgb([0, 0, 0]);
        }

        let mut sums = [0u64; 3];
        for (_, _, pixel) in self.image.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                *sum += u64::from(channel);
            }
        }

        Rgb(sums.map(|sum| (sum / pixel_count) as u8))
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, RgbImage};

    use super::*;

    fn encode(image: RgbImage) -> Vec<u8> {
        let mut data = std::io::Cursor::new(Vec::new());
        image.write_to(&mut data, ImageFormat::Png).unwrap();
        data.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let data = encode(RgbImage::from_pixel(4, 3, Rgb([10, 20, 30])));
        let decoded = DecodedImage::decode(&data).unwrap();

        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        // 4 * 3 pixels with 3 bytes each
        assert_eq!(decoded.cost(), 36);
    }

    #[test]
    fn test_decode_garbage() {
        let err = DecodedImage::decode(b"definitely not a poster").unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));

        let err = DecodedImage::decode(b"").unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[test]
    fn test_average_color() {
        let mut image = RgbImage::from_pixel(2, 1, Rgb([0, 100, 200]));
        image.put_pixel(1, 0, Rgb([100, 200, 0]));
        let decoded = DecodedImage::decode(&encode(image)).unwrap();

        assert_eq!(decoded.average_color(), Rgb([50, 150, 100]));
    }
}
