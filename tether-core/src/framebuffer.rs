//! Raw framebuffer capture (`framebuffer:`).
//!
//! # Wire Protocol
//!
//! ```text
//! version: u32 LE, then a version-dependent header of u32 LE fields:
//!   1  → bpp, size, width, height, 4×(offset,length) for R/B/G/A
//!   2  → bpp, colorspace, size, width, height, 4×(offset,length)
//!   16 → size, width, height  (compatibility: implied RGB565)
//! ```
//!
//! After the header the client writes one acknowledgement byte, then
//! reads exactly `size` bytes of pixel payload. The version set is a
//! strict enumeration — an unknown version is an error, not a
//! best-effort parse.

use async_trait::async_trait;
use bytes::Buf;

use crate::error::{Result, TetherError};
use crate::request::{ComplexRequest, Request, encode_command};
use crate::transport::Connection;

// ── ColorSpace ───────────────────────────────────────────────────

/// Color space id carried by version-2 headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Unknown,
    Srgb,
    DisplayP3,
}

impl ColorSpace {
    pub fn from_id(value: u32) -> Self {
        match value {
            1 => ColorSpace::Srgb,
            2 => ColorSpace::DisplayP3,
            _ => ColorSpace::Unknown,
        }
    }
}

// ── RawImage ─────────────────────────────────────────────────────

/// One captured frame: the parsed header plus the raw pixel blob.
/// Color-model conversion is the consumer's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub version: u32,
    pub bits_per_pixel: u32,
    pub color_space: Option<ColorSpace>,
    pub size: u32,
    pub width: u32,
    pub height: u32,
    pub red_offset: u32,
    pub red_length: u32,
    pub blue_offset: u32,
    pub blue_length: u32,
    pub green_offset: u32,
    pub green_length: u32,
    pub alpha_offset: u32,
    pub alpha_length: u32,
    pub buffer: Vec<u8>,
}

// ── ScreenCaptureRequest ─────────────────────────────────────────

pub struct ScreenCaptureRequest;

impl ScreenCaptureRequest {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScreenCaptureRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Request for ScreenCaptureRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target(), "framebuffer:")
    }
}

#[async_trait]
impl ComplexRequest for ScreenCaptureRequest {
    type Output = RawImage;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<RawImage> {
        let version = conn.read_u32_le().await?;
        let header_fields = match version {
            1 => 12,
            2 => 13,
            16 => 3,
            other => return Err(TetherError::UnsupportedImageProtocol(other)),
        };

        let mut header = vec![0u8; header_fields * 4];
        conn.read_exact(&mut header).await?;
        // Acknowledge the header before the pixel payload starts.
        conn.write_u8(0).await?;

        let mut fields = header.as_slice();
        let mut image = match version {
            16 => RawImage {
                version,
                bits_per_pixel: 16,
                color_space: None,
                size: fields.get_u32_le(),
                width: fields.get_u32_le(),
                height: fields.get_u32_le(),
                red_offset: 11,
                red_length: 5,
                green_offset: 5,
                green_length: 6,
                blue_offset: 0,
                blue_length: 5,
                alpha_offset: 0,
                alpha_length: 0,
                buffer: Vec::new(),
            },
            1 | 2 => {
                let bits_per_pixel = fields.get_u32_le();
                let color_space = if version == 2 {
                    Some(ColorSpace::from_id(fields.get_u32_le()))
                } else {
                    None
                };
                RawImage {
                    version,
                    bits_per_pixel,
                    color_space,
                    size: fields.get_u32_le(),
                    width: fields.get_u32_le(),
                    height: fields.get_u32_le(),
                    red_offset: fields.get_u32_le(),
                    red_length: fields.get_u32_le(),
                    blue_offset: fields.get_u32_le(),
                    blue_length: fields.get_u32_le(),
                    green_offset: fields.get_u32_le(),
                    green_length: fields.get_u32_le(),
                    alpha_offset: fields.get_u32_le(),
                    alpha_length: fields.get_u32_le(),
                    buffer: Vec::new(),
                }
            }
            _ => unreachable!("version checked above"),
        };

        let mut pixels = vec![0u8; image.size as usize];
        conn.read_exact(&mut pixels).await?;
        image.buffer = pixels;
        Ok(image)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_targets_the_framebuffer_service() {
        assert_eq!(ScreenCaptureRequest::new().serialize(), b"000Cframebuffer:");
    }

    #[test]
    fn color_space_mapping() {
        assert_eq!(ColorSpace::from_id(1), ColorSpace::Srgb);
        assert_eq!(ColorSpace::from_id(2), ColorSpace::DisplayP3);
        assert_eq!(ColorSpace::from_id(99), ColorSpace::Unknown);
    }
}
