//! Writes accumulated radiance to disk: linear EXR, or clamped sRGB PNG.

use std::path::Path;

use exr::prelude::write_rgba_file;
use log::info;

use crate::error::{RenderError, Result};

fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// 8-bit sRGB with full alpha
pub fn encode_srgb8(texels: &[[f32; 4]]) -> Vec<u8> {
    texels
        .iter()
        .flat_map(|t| {
            let encode = |c: f32| (linear_to_srgb(c) * 255.0 + 0.5) as u8;
            [encode(t[0]), encode(t[1]), encode(t[2]), 255]
        })
        .collect()
}

/// Chooses the format from the extension; anything but `.png` is written as EXR
pub fn save_image(path: impl AsRef<Path>, width: u32, height: u32, texels: &[[f32; 4]]) -> Result<()> {
    let path = path.as_ref();
    if texels.len() != width as usize * height as usize {
        return Err(RenderError::backend(format!(
            "{} texels for a {width}x{height} image",
            texels.len()
        )));
    }

    let is_png = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"));
    if is_png {
        let bytes = encode_srgb8(texels);
        image::save_buffer(path, &bytes, width, height, image::ColorType::Rgba8)?;
    } else {
        let w = width as usize;
        write_rgba_file(path, w, height as usize, |x, y| {
            let t = texels[y * w + x];
            (t[0], t[1], t[2], t[3])
        })?;
    }
    info!("Wrote {width}x{height} image to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_encoding_clamps_and_curves() {
        let bytes = encode_srgb8(&[[0.0, 1.0, 4.0, 0.2], [0.5, -1.0, f32::NAN, 1.0]]);
        assert_eq!(&bytes[..4], &[0, 255, 255, 255]);
        // Mid grey lands well above 128 after the transfer curve
        assert_eq!(bytes[4], 188);
        assert_eq!(bytes[5], 0);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let dir = std::env::temp_dir();
        let result = save_image(dir.join("vivid_mismatch.exr"), 2, 2, &[[0.0; 4]; 3]);
        assert!(matches!(result, Err(RenderError::Backend(_))));
    }

    #[test]
    fn writes_png_and_exr() {
        let dir = std::env::temp_dir();
        let texels = vec![[0.25, 0.5, 1.0, 1.0]; 6];
        let png = dir.join("vivid_output_test.png");
        let exr = dir.join("vivid_output_test.exr");
        save_image(&png, 3, 2, &texels).unwrap();
        save_image(&exr, 3, 2, &texels).unwrap();

        let decoded = image::open(&png).unwrap().into_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0).0[2], 255);
        assert!(std::fs::metadata(&exr).unwrap().len() > 0);
        let _ = std::fs::remove_file(png);
        let _ = std::fs::remove_file(exr);
    }
}
