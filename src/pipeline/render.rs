//! PDF rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto a dedicated
//! thread pool thread designed for blocking operations, preventing the
//! Tokio worker threads from stalling during CPU-heavy rendering.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 sheet at 200 DPI would produce a
//! 13,000 × 18,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and matching the
//! image-size sweet spot for vision models (around 1,024–2,048 px).
//!
//! A page that fails to rasterise produces a [`PageRender::Failed`] for
//! that page only; the document keeps going. Only a document that cannot
//! be opened at all (corrupt, encrypted without password) is fatal.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::record::DocumentMetadata;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// One page rendered to pixels, 0-based index within the document.
pub struct RenderedPage {
    pub index: usize,
    pub image: DynamicImage,
}

/// Per-page render result; a failed page does not abort its siblings.
pub enum PageRender {
    Ok(RenderedPage),
    Failed { index: usize, detail: String },
}

/// Rasterise every page of a PDF into images.
///
/// Runs inside `spawn_blocking` since pdfium operations are CPU-bound.
/// Results arrive in page order.
pub async fn render_pages(
    pdf_path: &Path,
    config: &ExtractionConfig,
) -> Result<Vec<PageRender>, ExtractError> {
    let path = pdf_path.to_path_buf();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&path, dpi, max_pixels, password.as_deref())
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
}

/// Bind to the pdfium library.
///
/// `PDFIUM_LIB_PATH` (pointing at an existing libpdfium) wins; otherwise the
/// system library search path is used. Locating or installing pdfium is the
/// host environment's job — a missing library surfaces as a typed error.
fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(lib_path) if !lib_path.is_empty() => Pdfium::bind_to_library(&lib_path),
        _ => Pdfium::bind_to_system_library(),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{:?}", e)))
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<PageRender>, ExtractError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                ExtractError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                ExtractError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            ExtractError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    // Letter/A4 width at the requested DPI, hard-capped by max_pixels so an
    // oversized page can never exhaust memory.
    let target_width = ((dpi as f32 * 8.5) as u32).min(max_pixels);
    let render_config = PdfRenderConfig::new()
        .set_target_width(target_width as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        let rendered = (|| -> Result<DynamicImage, PdfiumError> {
            let page = pages.get(idx as u16)?;
            let bitmap = page.render_with_config(&render_config)?;
            Ok(bitmap.as_image())
        })();

        match rendered {
            Ok(image) => {
                debug!(
                    "Rendered page {} → {}x{} px",
                    idx + 1,
                    image.width(),
                    image.height()
                );
                results.push(PageRender::Ok(RenderedPage { index: idx, image }));
            }
            Err(e) => {
                warn!("Page {} failed to rasterise: {:?}", idx + 1, e);
                results.push(PageRender::Failed {
                    index: idx,
                    detail: format!("{:?}", e),
                });
            }
        }
    }

    Ok(results)
}

/// Extract document metadata from a PDF without rendering pages.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, ExtractError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| ExtractError::Internal(format!("Metadata task panicked: {}", e)))?
}

/// Blocking implementation of metadata extraction.
fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, ExtractError> {
    let pdfium = bind_pdfium()?;

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, password)
            .map_err(|e| ExtractError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

    let metadata = document.metadata();
    let pages = document.pages();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
        page_count: pages.len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}

/// Standard deviation of the page's luma channel.
///
/// A uniform page (scanned blank sheet, double-fed separator) sits near 0;
/// anything with print sits well above. Used to skip blank pages before
/// they cost an OCR pass or an AI call.
pub fn pixel_stddev(image: &DynamicImage) -> f64 {
    let luma = image.to_luma8();
    let n = luma.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    let sum: u64 = luma.as_raw().iter().map(|&p| p as u64).sum();
    let mean = sum as f64 / n as f64;
    let var: f64 = luma
        .as_raw()
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    var.sqrt()
}

/// Threshold below which a page is treated as blank.
pub const BLANK_STDDEV: f64 = 5.0;

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    #[test]
    fn uniform_image_has_zero_stddev() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            32,
            32,
            Rgba([255, 255, 255, 255]),
        ));
        assert!(pixel_stddev(&img) < f64::EPSILON);
        assert!(pixel_stddev(&img) < BLANK_STDDEV);
    }

    #[test]
    fn printed_image_is_not_blank() {
        // Half black, half white: stddev is far above the blank threshold.
        let img = image::GrayImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        });
        let std = pixel_stddev(&DynamicImage::ImageLuma8(img));
        assert!(std > 100.0, "got {std}");
    }
}
