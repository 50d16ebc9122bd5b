use anyhow::Result;
use imgfeed_store::{DecodedImage, ImageDecoder};

use crate::PipelineError;

/// Decode plus augmentation of one raw record into a fixed-size `f32` tensor.
pub trait Transform: Send + Sync + 'static {
    /// Values written per item; every call fills exactly this many.
    fn sample_len(&self) -> usize;

    fn transform(&self, raw: &[u8], out: &mut [f32]) -> Result<()>;
}

/// Deterministic center crop with per-channel mean subtraction, written CHW.
#[derive(Debug, Clone)]
pub struct CenterCropTransform<D> {
    decoder: D,
    crop: usize,
    channels: usize,
    mean: Vec<f32>,
    scale: f32,
}

impl<D> CenterCropTransform<D>
where
    D: ImageDecoder<Image = DecodedImage>,
{
    pub fn new(decoder: D, crop: usize, mean: Vec<f32>, scale: f32) -> Result<Self, PipelineError> {
        if crop == 0 {
            return Err(PipelineError::InvalidInput(
                "crop size must be > 0".to_string(),
            ));
        }
        if mean.is_empty() {
            return Err(PipelineError::InvalidInput(
                "mean must name at least one channel".to_string(),
            ));
        }
        Ok(Self {
            decoder,
            crop,
            channels: mean.len(),
            mean,
            scale,
        })
    }
}

impl<D> Transform for CenterCropTransform<D>
where
    D: ImageDecoder<Image = DecodedImage>,
{
    fn sample_len(&self) -> usize {
        self.channels * self.crop * self.crop
    }

    fn transform(&self, raw: &[u8], out: &mut [f32]) -> Result<()> {
        let img = self.decoder.decode(raw)?;
        anyhow::ensure!(
            img.channels == self.channels,
            "image has {} channels, expected {}",
            img.channels,
            self.channels
        );
        anyhow::ensure!(
            img.height >= self.crop && img.width >= self.crop,
            "image {}x{} smaller than crop {}",
            img.width,
            img.height,
            self.crop
        );
        anyhow::ensure!(out.len() == self.sample_len(), "output slot size mismatch");

        let h_off = (img.height - self.crop) / 2;
        let w_off = (img.width - self.crop) / 2;
        for c in 0..self.channels {
            for y in 0..self.crop {
                for x in 0..self.crop {
                    let v = f32::from(img.pixel(y + h_off, x + w_off, c));
                    out[(c * self.crop + y) * self.crop + x] = (v - self.mean[c]) * self.scale;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Raw bytes are `[width, height, pixels...]` with one channel.
    struct GrayDecoder;

    impl ImageDecoder for GrayDecoder {
        type Image = DecodedImage;

        fn decode(&self, raw: &[u8]) -> Result<DecodedImage> {
            anyhow::ensure!(raw.len() >= 2, "short image");
            let (w, h) = (raw[0] as usize, raw[1] as usize);
            anyhow::ensure!(raw.len() == 2 + w * h, "bad pixel count");
            Ok(DecodedImage {
                width: w,
                height: h,
                channels: 1,
                pixels: raw[2..].to_vec(),
            })
        }
    }

    #[test]
    fn center_crop_subtracts_mean() -> anyhow::Result<()> {
        let t = CenterCropTransform::new(GrayDecoder, 2, vec![1.0], 0.5)?;
        // 4x4 image with values 0..16 row-major; the center 2x2 is 5,6,9,10.
        let mut raw = vec![4u8, 4];
        raw.extend(0u8..16);
        let mut out = vec![0.0; t.sample_len()];
        t.transform(&raw, &mut out)?;
        assert_eq!(out, vec![2.0, 2.5, 4.0, 4.5]);
        Ok(())
    }

    #[test]
    fn too_small_image_is_rejected() -> anyhow::Result<()> {
        let t = CenterCropTransform::new(GrayDecoder, 3, vec![0.0], 1.0)?;
        let raw = vec![2u8, 2, 0, 0, 0, 0];
        let mut out = vec![0.0; t.sample_len()];
        assert!(t.transform(&raw, &mut out).is_err());
        Ok(())
    }
}
