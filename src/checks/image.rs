// Image check: decode the body as an image and compare format,
// dimensions and an optional perceptual fingerprint.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::errors::CheckError;
use crate::report::Response;

/// The body decodes as an image of the expected shape.
///
/// `fingerprint` is a 64-bit average hash in hex (16 digits); the check
/// passes when the Hamming distance to the decoded image's hash is at
/// most `max_distance` (0 when omitted).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<u32>,
}

impl ImageCheck {
    pub(crate) fn prepare(&self) -> Result<(), CheckError> {
        if let Some(fp) = &self.fingerprint {
            if fp.len() != 16 || !fp.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(CheckError::MalformedCheck(format!(
                    "fingerprint '{}' is not 16 hex digits",
                    fp
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let format = image::guess_format(&resp.body).map_err(|_| CheckError::CantCheck {
            cause: "body is not a known image format".to_string(),
        })?;

        if let Some(want) = &self.format {
            let got = format_name(format);
            if !want.eq_ignore_ascii_case(got) && !(want.eq_ignore_ascii_case("jpg") && got == "jpeg")
            {
                return Err(CheckError::Failed(format!(
                    "image format is {}, want {}",
                    got, want
                )));
            }
        }

        let img = image::load_from_memory(&resp.body).map_err(|e| CheckError::CantCheck {
            cause: format!("cannot decode image: {}", e),
        })?;

        if let Some(w) = self.width {
            if img.width() != w {
                return Err(CheckError::Failed(format!(
                    "image is {} pixels wide, want {}",
                    img.width(),
                    w
                )));
            }
        }
        if let Some(h) = self.height {
            if img.height() != h {
                return Err(CheckError::Failed(format!(
                    "image is {} pixels high, want {}",
                    img.height(),
                    h
                )));
            }
        }

        if let Some(fp) = &self.fingerprint {
            let want = u64::from_str_radix(fp, 16).map_err(|_| {
                CheckError::MalformedCheck(format!("fingerprint '{}' is not 16 hex digits", fp))
            })?;
            let got = average_hash(&img);
            let distance = (got ^ want).count_ones();
            let limit = self.max_distance.unwrap_or(0);
            if distance > limit {
                return Err(CheckError::Failed(format!(
                    "fingerprint distance {} exceeds {} (got {:016x})",
                    distance, limit, got
                )));
            }
        }

        Ok(())
    }
}

fn format_name(format: image::ImageFormat) -> &'static str {
    use image::ImageFormat::*;
    match format {
        Png => "png",
        Jpeg => "jpeg",
        Gif => "gif",
        Bmp => "bmp",
        WebP => "webp",
        Tiff => "tiff",
        Ico => "ico",
        _ => "unknown",
    }
}

/// 64-bit average hash: grayscale 8×8 downscale, one bit per pixel
/// above the mean. Row-major, most significant bit first.
pub fn average_hash(img: &DynamicImage) -> u64 {
    let small = img.resize_exact(8, 8, FilterType::Triangle).to_luma8();
    let pixels: Vec<u64> = small.pixels().map(|p| p.0[0] as u64).collect();
    let mean = pixels.iter().sum::<u64>() / 64;
    let mut hash = 0u64;
    for (i, p) in pixels.iter().enumerate() {
        if *p > mean {
            hash |= 1 << (63 - i);
        }
    }
    hash
}
