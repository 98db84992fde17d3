use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, DynamicImage};

use crate::DeviceMap;

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            {
                tracing::warn!(
                    "running on CPU, to run on GPU(metal), build with `--features metal`"
                );
            }
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            {
                tracing::warn!("running on CPU, to run on GPU, build with `--features cuda`");
            }
            Ok(Device::Cpu)
        }
    }
}

/// Short name reported by `/api-status`.
pub fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

/// Seeds the device RNG. The CPU backend has no seedable generator, so it is left alone.
pub fn seed_device(device: &Device, seed: u64) -> Result<()> {
    if device.is_cpu() {
        tracing::debug!(seed, "cpu rng cannot be seeded, output will vary between runs");
        return Ok(());
    }
    device.set_seed(seed)?;
    Ok(())
}

/// Converts a tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| candle_core::Error::msg("error converting tensor to image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

/// Converts an image into a (1, 3, height, width) tensor scaled to [-1, 1].
pub fn image_to_tensor(img: &DynamicImage, device: &Device, dtype: DType) -> Result<Tensor> {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let tensor = Tensor::from_vec(rgb.into_raw(), (height, width, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2. / 255., -1.)?
        .unsqueeze(0)?
        .to_dtype(dtype)?;
    Ok(tensor)
}

/// Downsamples a mask to (1, 1, height, width) with 1.0 where the image should be repainted.
///
/// Any pixel brighter than mid-grey counts as masked.
pub fn mask_to_tensor(
    mask: &DynamicImage,
    height: usize,
    width: usize,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    let luma = mask
        .resize_exact(width as u32, height as u32, FilterType::Triangle)
        .to_luma8();
    let values: Vec<f32> = luma
        .pixels()
        .map(|p| if p.0[0] > 127 { 1.0 } else { 0.0 })
        .collect();
    let tensor = Tensor::from_vec(values, (1, 1, height, width), device)?.to_dtype(dtype)?;
    Ok(tensor)
}
