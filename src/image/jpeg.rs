use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail};
use image::ImageBuffer;

use super::Image;

/// Supported JPEG decoding backends, selected with `POSE_JPEG_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JpegBackend {
    /// Uses the `jpeg-decoder` crate through `image`. Robust, but slow.
    #[default]
    JpegDecoder,
    /// Uses the `zune-jpeg` crate, a faster pure-Rust JPEG decoder.
    ZuneJpeg,
}

impl FromStr for JpegBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim() {
            "jpeg-decoder" => Ok(JpegBackend::JpegDecoder),
            "zune-jpeg" => Ok(JpegBackend::ZuneJpeg),
            other => bail!("unknown JPEG backend '{other}' (expected jpeg-decoder or zune-jpeg)"),
        }
    }
}

impl fmt::Display for JpegBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JpegBackend::JpegDecoder => "jpeg-decoder",
            JpegBackend::ZuneJpeg => "zune-jpeg",
        })
    }
}

pub(super) fn decode_jpeg(data: &[u8], backend: JpegBackend) -> anyhow::Result<Image> {
    log::trace!("decoding JPEG with {backend}");
    let buf = match backend {
        JpegBackend::JpegDecoder => {
            image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgba8()
        }
        JpegBackend::ZuneJpeg => {
            use zune_jpeg::zune_core::colorspace::ColorSpace;
            use zune_jpeg::zune_core::options::DecoderOptions;

            let mut decomp = zune_jpeg::JpegDecoder::new_with_options(
                DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA),
                data,
            );
            decomp
                .decode_headers()
                .map_err(|e| anyhow!("failed to decode JPEG headers: {e:?}"))?;
            let colorspace = decomp.get_output_colorspace();
            if colorspace != Some(ColorSpace::RGBA) {
                bail!("unsupported colorspace {colorspace:?} (expected RGBA)");
            }

            let size = decomp
                .output_buffer_size()
                .ok_or_else(|| anyhow!("JPEG headers did not specify an image size"))?;
            let mut buf = vec![0; size];
            decomp
                .decode_into(&mut buf)
                .map_err(|e| anyhow!("failed to decode JPEG: {e:?}"))?;
            let (width, height) = decomp
                .dimensions()
                .ok_or_else(|| anyhow!("JPEG headers did not specify an image size"))?;
            ImageBuffer::from_raw(width.into(), height.into(), buf)
                .ok_or_else(|| anyhow!("decoded JPEG buffer does not match its dimensions"))?
        }
    };

    Ok(Image { buf })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names() {
        assert_eq!(
            "jpeg-decoder".parse::<JpegBackend>().unwrap(),
            JpegBackend::JpegDecoder
        );
        assert_eq!(
            "zune-jpeg".parse::<JpegBackend>().unwrap(),
            JpegBackend::ZuneJpeg
        );
        assert!("mozjpeg".parse::<JpegBackend>().is_err());
        assert_eq!(JpegBackend::default(), JpegBackend::JpegDecoder);
        assert_eq!(JpegBackend::ZuneJpeg.to_string(), "zune-jpeg");
    }
}
