//! Re-encoding of embedded raster images.

use crate::references;
use crate::stage::PackageTransform;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use slimmer_core::{EntryRole, Error, ImageSettings, Result, StageKind, StageReport};
use slimmer_package::WorkbookPackage;
use std::io::Cursor;

const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// A re-encoded asset that is smaller than its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reencoded {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// Downscales and re-encodes embedded images.
#[derive(Debug, Clone)]
pub struct ImageReencoder {
    settings: ImageSettings,
    /// Convert opaque images to JPEG.
    aggressive: bool,
}

fn is_raster(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::Tiff
    )
}

/// The raster format of a media asset, or `None` for formats left alone
/// (GIF, EMF, WMF, ...).
///
/// Content is sniffed first; the extension only decides for bytes with no
/// recognizable signature.
pub fn asset_format(path: &str, bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(format) => Some(format).filter(|f| is_raster(*f)),
        Err(_) => ImageFormat::from_path(path).ok().filter(|f| is_raster(*f)),
    }
}

/// Whether any pixel is not fully opaque.
fn has_translucency(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    match img {
        DynamicImage::ImageRgba8(buf) => buf.pixels().any(|p| p.0[3] < u8::MAX),
        DynamicImage::ImageLumaA8(buf) => buf.pixels().any(|p| p.0[1] < u8::MAX),
        other => other.to_rgba16().pixels().any(|p| p.0[3] < u16::MAX),
    }
}

fn undecodable(path: &str, err: impl std::fmt::Display) -> Error {
    Error::UndecodableAsset {
        path: path.to_string(),
        message: err.to_string(),
    }
}

/// A free `<stem>.jpeg` (or `<stem>_<n>.jpeg`) next to `path`.
fn jpeg_sibling(package: &WorkbookPackage, path: &str) -> String {
    let stem = match path.rsplit_once('.') {
        Some((stem, _)) if !stem.ends_with('/') => stem,
        _ => path,
    };
    let candidate = format!("{}.jpeg", stem);
    if !package.contains(&candidate) {
        return candidate;
    }
    (1..)
        .map(|n| format!("{}_{}.jpeg", stem, n))
        .find(|c| !package.contains(c))
        .unwrap_or(candidate)
}

impl ImageReencoder {
    pub fn new(settings: ImageSettings, aggressive: bool) -> Self {
        Self {
            settings,
            aggressive,
        }
    }

    fn encode(&self, img: &DynamicImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
        let mut out = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut out, self.settings.quality);
                rgb.write_with_encoder(encoder)?;
            }
            ImageFormat::Png => {
                img.write_with_encoder(PngEncoder::new_with_quality(
                    &mut out,
                    CompressionType::Best,
                    PngFilter::Adaptive,
                ))?;
            }
            other => img.write_to(&mut Cursor::new(&mut out), other)?,
        }
        Ok(out)
    }

    /// Re-encode one asset.
    ///
    /// Returns `None` when the result would not be strictly smaller than the
    /// source. Decode and encode failures are [`Error::UndecodableAsset`].
    pub fn reencode(
        &self,
        path: &str,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<Option<Reencoded>> {
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| undecodable(path, e))?;

        let target = if self.aggressive && format != ImageFormat::Jpeg && !has_translucency(&img) {
            ImageFormat::Jpeg
        } else {
            format
        };

        let max_edge = self.settings.max_edge;
        let img = if img.width().max(img.height()) > max_edge {
            log::debug!(
                "Downscaling {} from {}x{} to fit {}",
                path,
                img.width(),
                img.height(),
                max_edge
            );
            img.resize(max_edge, max_edge, FilterType::Lanczos3)
        } else {
            img
        };

        let encoded = self.encode(&img, target).map_err(|e| undecodable(path, e))?;
        if encoded.len() >= bytes.len() {
            log::debug!(
                "Keeping {}: re-encoded size {} is not below {}",
                path,
                encoded.len(),
                bytes.len()
            );
            return Ok(None);
        }

        Ok(Some(Reencoded {
            bytes: encoded,
            format: target,
            width: img.width(),
            height: img.height(),
        }))
    }
}

impl PackageTransform for ImageReencoder {
    fn kind(&self) -> StageKind {
        StageKind::Images
    }

    fn apply(&self, package: &mut WorkbookPackage) -> Result<StageReport> {
        let mut report = StageReport::new(self.kind());

        for path in package.paths_with_role(EntryRole::Media) {
            let bytes = package.read_entry(&path)?.to_vec();
            let format = match asset_format(&path, &bytes) {
                Some(format) => format,
                None => {
                    log::debug!("Leaving non-raster media {} as is", path);
                    continue;
                }
            };

            let reencoded = match self.reencode(&path, &bytes, format) {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) if e.is_recoverable() => {
                    log::warn!("Skipping {}", e);
                    report.skipped_assets.push(path);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let saved = (bytes.len() - reencoded.bytes.len()) as u64;
            let target_path = if reencoded.format != format {
                let renamed = jpeg_sibling(package, &path);
                package.rename_entry(&path, &renamed)?;
                let touched =
                    references::retarget_part(package, &path, &renamed, JPEG_CONTENT_TYPE)?;
                log::debug!("Retargeted {} -> {} in {:?}", path, renamed, touched);
                report.rewritten_entries.push(format!("{} -> {}", path, renamed));
                renamed
            } else {
                report.rewritten_entries.push(path.clone());
                path
            };

            package.replace_entry(&target_path, reencoded.bytes)?;
            report.bytes_saved += saved;
        }

        log::info!(
            "Re-encoded {} image(s), saved {} bytes",
            report.rewritten_entries.len(),
            report.bytes_saved
        );
        Ok(report)
    }
}
