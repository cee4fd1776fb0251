//! Raster and tile file I/O through the `image` crate
//!
//! GeoTIFF files additionally carry their georeferencing in the
//! ModelPixelScale and ModelTiepoint tags, which are read and written
//! directly with the `tiff` crate.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use tiff::decoder::Decoder as TiffDecoder;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use super::{GeoTransform, PixelDepth, Raster};
use crate::utils::error::{Result, SentinelError};

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

fn tiff_error(path: &Path, e: tiff::TiffError) -> SentinelError {
    SentinelError::Image(format!("georeferencing of {}: {}", path.display(), e))
}

/// Georeferencing from the GeoTIFF tags, if both are present
pub fn read_geo_transform(path: &Path) -> Result<Option<GeoTransform>> {
    let file = File::open(path)?;
    let mut decoder = TiffDecoder::new(file).map_err(|e| tiff_error(path, e))?;

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)
        .map_err(|e| tiff_error(path, e))?
        .map(|v| v.into_f64_vec())
        .transpose()
        .map_err(|e| tiff_error(path, e))?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)
        .map_err(|e| tiff_error(path, e))?
        .map(|v| v.into_f64_vec())
        .transpose()
        .map_err(|e| tiff_error(path, e))?;

    match (scale, tiepoint) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            // Tiepoint maps raster (i, j) to model (x, y); rows grow southward.
            let (sx, sy) = (scale[0], scale[1]);
            Ok(Some(GeoTransform {
                origin_x: tie[3] - tie[0] * sx,
                origin_y: tie[4] + tie[1] * sy,
                pixel_width: sx,
                pixel_height: -sy,
            }))
        }
        _ => Ok(None),
    }
}

/// Interleaved HWC samples to band-major CHW
fn deinterleave<T: Copy + Into<f32>>(samples: &[T], bands: usize, h: usize, w: usize) -> Vec<f32> {
    let mut data = vec![0.0f32; bands * h * w];
    let plane = h * w;
    for (i, px) in samples.chunks_exact(bands).enumerate() {
        for (b, &v) in px.iter().enumerate() {
            data[b * plane + i] = v.into();
        }
    }
    data
}

fn interleave<T>(raster: &Raster, convert: impl Fn(f32) -> T) -> Vec<T> {
    let plane = raster.height() * raster.width();
    let bands = raster.bands();
    let data = raster.data();
    let mut out = Vec::with_capacity(bands * plane);
    for i in 0..plane {
        for b in 0..bands {
            out.push(convert(data[b * plane + i]));
        }
    }
    out
}

/// Decode an image file into a raster.
///
/// 8-bit files become [`PixelDepth::U8`], 16-bit files become
/// [`PixelDepth::U16`] and 32-bit float files become [`PixelDepth::Float`].
pub fn read_raster(path: &Path) -> Result<Raster> {
    let img = image::open(path).map_err(|e| {
        SentinelError::Image(format!("failed to read {}: {}", path.display(), e))
    })?;
    let raster = raster_from_image(img)?;

    if is_tiff(path) {
        if let Some(geo) = read_geo_transform(path)? {
            return Ok(raster.with_geo(geo));
        }
    }
    Ok(raster)
}

/// Convert an already-decoded image into a raster
pub fn raster_from_image(img: DynamicImage) -> Result<Raster> {
    let (w, h) = (img.width() as usize, img.height() as usize);

    let (bands, data, depth) = match img {
        DynamicImage::ImageLuma8(b) => (1, deinterleave(b.as_raw(), 1, h, w), PixelDepth::U8),
        DynamicImage::ImageLumaA8(b) => (2, deinterleave(b.as_raw(), 2, h, w), PixelDepth::U8),
        DynamicImage::ImageRgb8(b) => (3, deinterleave(b.as_raw(), 3, h, w), PixelDepth::U8),
        DynamicImage::ImageRgba8(b) => (4, deinterleave(b.as_raw(), 4, h, w), PixelDepth::U8),
        DynamicImage::ImageLuma16(b) => (1, deinterleave(b.as_raw(), 1, h, w), PixelDepth::U16),
        DynamicImage::ImageLumaA16(b) => (2, deinterleave(b.as_raw(), 2, h, w), PixelDepth::U16),
        DynamicImage::ImageRgb16(b) => (3, deinterleave(b.as_raw(), 3, h, w), PixelDepth::U16),
        DynamicImage::ImageRgba16(b) => (4, deinterleave(b.as_raw(), 4, h, w), PixelDepth::U16),
        DynamicImage::ImageRgb32F(b) => (3, deinterleave(b.as_raw(), 3, h, w), PixelDepth::Float),
        DynamicImage::ImageRgba32F(b) => {
            (4, deinterleave(b.as_raw(), 4, h, w), PixelDepth::Float)
        }
        other => {
            let rgb = other.to_rgb8();
            (3, deinterleave(rgb.as_raw(), 3, h, w), PixelDepth::U8)
        }
    };

    Raster::new(bands, h, w, data, depth)
}

fn unsupported(raster: &Raster) -> SentinelError {
    SentinelError::Data(format!(
        "cannot encode a {}-band {:?} raster",
        raster.bands(),
        raster.depth()
    ))
}

/// Encode a raster into an image, keeping its native depth
pub fn raster_to_image(raster: &Raster) -> Result<DynamicImage> {
    let (w, h) = (raster.width() as u32, raster.height() as u32);
    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    let to_u16 = |v: f32| v.round().clamp(0.0, 65_535.0) as u16;

    let img: Option<DynamicImage> = match (raster.depth(), raster.bands()) {
        (PixelDepth::U8, 1) => {
            ImageBuffer::<Luma<u8>, _>::from_raw(w, h, interleave(raster, to_u8)).map(Into::into)
        }
        (PixelDepth::U8, 2) => {
            ImageBuffer::<LumaA<u8>, _>::from_raw(w, h, interleave(raster, to_u8)).map(Into::into)
        }
        (PixelDepth::U8, 3) => {
            ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, interleave(raster, to_u8)).map(Into::into)
        }
        (PixelDepth::U8, 4) => {
            ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, interleave(raster, to_u8)).map(Into::into)
        }
        (PixelDepth::U16, 1) => {
            ImageBuffer::<Luma<u16>, _>::from_raw(w, h, interleave(raster, to_u16)).map(Into::into)
        }
        (PixelDepth::U16, 2) => ImageBuffer::<LumaA<u16>, _>::from_raw(w, h, interleave(raster, to_u16))
            .map(Into::into),
        (PixelDepth::U16, 3) => {
            ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, interleave(raster, to_u16)).map(Into::into)
        }
        (PixelDepth::U16, 4) => {
            ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, interleave(raster, to_u16)).map(Into::into)
        }
        (PixelDepth::Float, 3) => {
            ImageBuffer::<Rgb<f32>, _>::from_raw(w, h, interleave(raster, |v| v)).map(Into::into)
        }
        (PixelDepth::Float, 4) => {
            ImageBuffer::<Rgba<f32>, _>::from_raw(w, h, interleave(raster, |v| v)).map(Into::into)
        }
        _ => return Err(unsupported(raster)),
    };

    img.ok_or_else(|| unsupported(raster))
}

/// Write a raster to disk; the format follows the path's extension.
///
/// A georeferenced raster written to `.tif` keeps its transform.
pub fn write_raster(raster: &Raster, path: &Path) -> Result<()> {
    if let (Some(geo), true) = (raster.geo(), is_tiff(path)) {
        return write_geotiff(raster, geo, path);
    }
    raster_to_image(raster)?
        .save(path)
        .map_err(|e| SentinelError::Image(format!("failed to write {}: {}", path.display(), e)))
}

fn write_geotiff(raster: &Raster, geo: &GeoTransform, path: &Path) -> Result<()> {
    let (w, h) = (raster.width() as u32, raster.height() as u32);
    let scale = [geo.pixel_width, -geo.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, geo.origin_x, geo.origin_y, 0.0];
    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    let to_u16 = |v: f32| v.round().clamp(0.0, 65_535.0) as u16;

    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file).map_err(|e| tiff_error(path, e))?;

    macro_rules! encode {
        ($color:ty, $samples:expr) => {{
            let mut image = encoder
                .new_image::<$color>(w, h)
                .map_err(|e| tiff_error(path, e))?;
            image
                .encoder()
                .write_tag(Tag::ModelPixelScaleTag, &scale[..])
                .map_err(|e| tiff_error(path, e))?;
            image
                .encoder()
                .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
                .map_err(|e| tiff_error(path, e))?;
            image.write_data(&$samples).map_err(|e| tiff_error(path, e))
        }};
    }

    match (raster.depth(), raster.bands()) {
        (PixelDepth::U8, 1) => encode!(colortype::Gray8, interleave(raster, to_u8)),
        (PixelDepth::U8, 3) => encode!(colortype::RGB8, interleave(raster, to_u8)),
        (PixelDepth::U8, 4) => encode!(colortype::RGBA8, interleave(raster, to_u8)),
        (PixelDepth::U16, 1) => encode!(colortype::Gray16, interleave(raster, to_u16)),
        (PixelDepth::U16, 3) => encode!(colortype::RGB16, interleave(raster, to_u16)),
        (PixelDepth::U16, 4) => encode!(colortype::RGBA16, interleave(raster, to_u16)),
        (PixelDepth::Float, 3) => encode!(colortype::RGB32Float, interleave(raster, |v| v)),
        (PixelDepth::Float, 4) => encode!(colortype::RGBA32Float, interleave(raster, |v| v)),
        _ => Err(unsupported(raster)),
    }
}

/// Write a binary mask as a single-band 8-bit image (0 / 255)
pub fn write_mask(mask: &[bool], height: usize, width: usize, path: &Path) -> Result<()> {
    let pixels: Vec<u8> = mask.iter().map(|&m| if m { 255 } else { 0 }).collect();
    let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| {
            SentinelError::Data(format!(
                "mask holds {} pixels, expected {}x{}",
                mask.len(),
                height,
                width
            ))
        })?;
    buffer
        .save(path)
        .map_err(|e| SentinelError::Image(format!("failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rgb_png_keeps_band_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scene.png");

        let mut r = Raster::zeros(3, 2, 3, PixelDepth::U8);
        r.set(0, 0, 0, 10.0);
        r.set(1, 1, 2, 200.0);
        r.set(2, 0, 1, 255.0);
        write_raster(&r, &path).unwrap();

        let back = read_raster(&path).unwrap();
        assert_eq!(back.depth(), PixelDepth::U8);
        assert_eq!(back.bands(), 3);
        assert_eq!(back, r);
    }

    #[test]
    fn test_sixteen_bit_png_is_reflectance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refl.png");

        let data = vec![0.0, 1234.0, 9999.0, 10_000.0];
        let r = Raster::new(1, 2, 2, data, PixelDepth::U16).unwrap();
        write_raster(&r, &path).unwrap();

        let back = read_raster(&path).unwrap();
        assert_eq!(back.depth(), PixelDepth::U16);
        assert_eq!(back.data(), r.data());
    }

    #[test]
    fn test_mask_written_as_0_255() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.png");
        write_mask(&[true, false, false, true], 2, 2, &path).unwrap();

        let back = read_raster(&path).unwrap();
        assert_eq!(back.data(), &[255.0, 0.0, 0.0, 255.0]);
        assert_eq!(back.binarized_mask(), vec![true, false, false, true]);
    }

    #[test]
    fn test_single_band_float_is_rejected() {
        let r = Raster::zeros(1, 2, 2, PixelDepth::Float);
        assert!(matches!(raster_to_image(&r), Err(SentinelError::Data(_))));
    }

    #[test]
    fn test_geotiff_keeps_transform() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scene.tif");
        let geo = GeoTransform {
            origin_x: 500_000.0,
            origin_y: 4_600_000.0,
            pixel_width: 10.0,
            pixel_height: -10.0,
        };

        let data = (0..3 * 4 * 4).map(|i| (i * 100) as f32).collect();
        let scene = Raster::new(3, 4, 4, data, PixelDepth::U16).unwrap().with_geo(geo);
        write_raster(&scene, &path).unwrap();

        let back = read_raster(&path).unwrap();
        assert_eq!(back.depth(), PixelDepth::U16);
        assert_eq!(back.data(), scene.data());
        assert_eq!(back.geo(), Some(&geo));

        // A chip cut from the reloaded scene is located by its window offset.
        let chip = back.window(2, 1, 2, 2).unwrap();
        let chip_path = dir.path().join("chip.tif");
        write_raster(&chip, &chip_path).unwrap();
        let chip_geo = read_raster(&chip_path).unwrap().geo().copied().unwrap();
        assert_eq!(chip_geo.origin_x, 500_010.0);
        assert_eq!(chip_geo.origin_y, 4_599_980.0);
    }

    #[test]
    fn test_plain_tiff_has_no_transform() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.tif");
        write_raster(&Raster::zeros(3, 2, 2, PixelDepth::U8), &path).unwrap();
        assert_eq!(read_raster(&path).unwrap().geo(), None);
    }
}
