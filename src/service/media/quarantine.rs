// =============================================================================
// Mediaron Federated Media Repository - Quarantine Artifact Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Generates the replacement image served instead of quarantined media when
//   substitution is enabled. The artifact is a framed, struck-through tile so
//   it reads as synthetic even at thumbnail sizes.
//
// =============================================================================

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};

use crate::{Error, Result};

const BACKGROUND: Rgba<u8> = Rgba([0x18, 0x1b, 0x21, 0xff]);
const ACCENT: Rgba<u8> = Rgba([0xb3, 0x3b, 0x3b, 0xff]);

/// Renders the quarantine replacement artifact at the requested dimensions.
/// Dimensions are clamped to at least one pixel.
pub fn generate(width: u32, height: u32) -> Result<RgbaImage> {
    let width = width.max(1);
    let height = height.max(1);

    let mut image = RgbaImage::from_pixel(width, height, BACKGROUND);

    // Single-pixel frame.
    for x in 0..width {
        image.put_pixel(x, 0, ACCENT);
        image.put_pixel(x, height - 1, ACCENT);
    }
    for y in 0..height {
        image.put_pixel(0, y, ACCENT);
        image.put_pixel(width - 1, y, ACCENT);
    }

    // Diagonal strike-through.
    let steps = width.max(height);
    let span = (steps - 1).max(1);
    for i in 0..steps {
        let x = i * (width - 1) / span;
        let y = i * (height - 1) / span;
        image.put_pixel(x, y, ACCENT);
    }

    Ok(image)
}

/// Encodes the artifact as PNG.
pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| Error::Internal(format!("failed to encode quarantine artifact: {err}")))?;
    Ok(buffer.into_inner())
}
