use anyhow::Result;
use zune_jpeg::zune_core::bytestream::ZCursor;
use zune_jpeg::JpegDecoder;

/// Turns the raw bytes of one record into an image.
///
/// Decoders are shared across threads: a loaded cache is read concurrently by every
/// pipeline that holds it.
pub trait ImageDecoder: Send + Sync + 'static {
    type Image;

    fn decode(&self, raw: &[u8]) -> Result<Self::Image>;
}

/// Interleaved (HWC) 8-bit pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn pixel(&self, y: usize, x: usize, c: usize) -> u8 {
        self.pixels[(y * self.width + x) * self.channels + c]
    }
}

/// JPEG to 3-channel RGB using `zune-jpeg`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegRgbDecoder;

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xD8
}

impl ImageDecoder for JpegRgbDecoder {
    type Image = DecodedImage;

    fn decode(&self, raw: &[u8]) -> Result<DecodedImage> {
        anyhow::ensure!(looks_like_jpeg(raw), "missing JPEG SOI marker");
        let cursor = ZCursor::new(raw);
        let mut decoder = JpegDecoder::new(cursor);
        let pixels = decoder
            .decode()
            .map_err(|e| anyhow::anyhow!("jpeg decode failed: {e}"))?;
        let info = decoder
            .info()
            .ok_or_else(|| anyhow::anyhow!("jpeg decode missing image info"))?;
        let width = u32::from(info.width) as usize;
        let height = u32::from(info.height) as usize;
        let expected_len = width
            .checked_mul(height)
            .and_then(|px| px.checked_mul(3))
            .ok_or_else(|| anyhow::anyhow!("decoded shape overflow ({width}x{height})"))?;
        anyhow::ensure!(
            pixels.len() == expected_len,
            "decoded unexpected channel count (len={}, expected_rgb_len={expected_len})",
            pixels.len()
        );
        Ok(DecodedImage {
            width,
            height,
            channels: 3,
            pixels,
        })
    }
}
