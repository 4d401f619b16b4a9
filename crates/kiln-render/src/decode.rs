// SPDX-License-Identifier: CEPL-1.0
use crate::AssetError;
use std::path::Path;

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    /// 1x1 image of a single colour.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            pixels: rgba.to_vec(),
            width: 1,
            height: 1,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Decode any supported image file into RGBA8.
pub fn decode_rgba(path: &Path) -> Result<DecodedImage, AssetError> {
    let img = image::open(path)
        .map_err(|source| AssetError::Decode {
            path: path.to_owned(),
            source,
        })?
        .into_rgba8();
    let (width, height) = img.dimensions();
    tracing::debug!("decoded {} ({}x{})", path.display(), width, height);
    Ok(DecodedImage {
        pixels: img.into_raw(),
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln-decode-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn png_round_trips_to_rgba() {
        let path = scratch("checker.png");
        let img = image::RgbImage::from_fn(3, 2, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        img.save(&path).unwrap();

        let decoded = decode_rgba(&path).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.pixels.len(), decoded.byte_len());
        assert_eq!(&decoded.pixels[0..4], &[255, 0, 0, 255]);
        assert_eq!(&decoded.pixels[4..8], &[0, 0, 255, 255]);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let path = scratch("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = decode_rgba(&path).unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
        assert!(err.to_string().contains("broken.png"));
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = decode_rgba(Path::new("/nonexistent/kiln/nothing.png")).unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
    }

    #[test]
    fn solid_is_one_pixel() {
        let white = DecodedImage::solid([255; 4]);
        assert_eq!(white.byte_len(), 4);
        assert_eq!(white.pixels, vec![255; 4]);
    }
}
