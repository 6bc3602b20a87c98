//! pdfium access: read the text layer or rasterise selected pages.
//!
//! ## spawn_blocking
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks for the whole document. Every entry point here moves the
//! work onto the blocking pool with `tokio::task::spawn_blocking`.
//!
//! Per-page failures (a page whose text layer cannot be read, a page that
//! fails to render) are returned next to the page number so the caller can
//! report them without losing the rest of the document. Only problems with
//! the document itself are fatal.

use crate::config::PageSelection;
use crate::error::{DirectoryError, PageError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The text layer of every selected page, as `(page_num, text)`.
pub async fn extract_text(
    pdf_path: &Path,
    password: Option<&str>,
    selection: &PageSelection,
) -> Result<Vec<(usize, Result<String, PageError>)>, DirectoryError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);
    let selection = selection.clone();

    tokio::task::spawn_blocking(move || extract_text_blocking(&path, password.as_deref(), &selection))
        .await
        .map_err(|e| DirectoryError::Internal(format!("Text extraction task panicked: {}", e)))?
}

fn extract_text_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    selection: &PageSelection,
) -> Result<Vec<(usize, Result<String, PageError>)>, DirectoryError> {
    let pdfium = bind()?;
    let document = open_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let indices = selected_indices(selection, pages.len() as usize)?;

    let mut out = Vec::with_capacity(indices.len());
    for idx in indices {
        let page_num = idx + 1;
        let text = page_text(&pages, idx).map_err(|e| PageError::PageUnavailable {
                page: page_num,
                detail: format!("{:?}", e),
            });
        if let Ok(ref t) = text {
            debug!("Page {}: {} chars of text", page_num, t.len());
        }
        out.push((page_num, text));
    }
    Ok(out)
}

/// Rasterise every selected page, longest edge capped at `max_pixels`.
pub async fn render_pages(
    pdf_path: &Path,
    password: Option<&str>,
    selection: &PageSelection,
    max_pixels: u32,
) -> Result<Vec<(usize, Result<DynamicImage, PageError>)>, DirectoryError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);
    let selection = selection.clone();

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&path, password.as_deref(), &selection, max_pixels)
    })
    .await
    .map_err(|e| DirectoryError::Internal(format!("Render task panicked: {}", e)))?
}

fn render_pages_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    selection: &PageSelection,
    max_pixels: u32,
) -> Result<Vec<(usize, Result<DynamicImage, PageError>)>, DirectoryError> {
    let pdfium = bind()?;
    let document = open_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let indices = selected_indices(selection, pages.len() as usize)?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut out = Vec::with_capacity(indices.len());
    for idx in indices {
        let page_num = idx + 1;
        let image = render_page(&pages, idx, &render_config).map_err(|e| PageError::PageUnavailable {
                page: page_num,
                detail: format!("render failed: {:?}", e),
            });
        if let Ok(ref img) = image {
            debug!("Rendered page {} → {}x{} px", page_num, img.width(), img.height());
        }
        out.push((page_num, image));
    }
    Ok(out)
}

fn page_text(pages: &PdfPages<'_>, idx: usize) -> Result<String, PdfiumError> {
    let page = pages.get(idx as u16)?;
    let text = page.text()?;
    Ok(text.all())
}

/// The bitmap borrows the page, so it is converted before the page drops.
fn render_page(pages: &PdfPages<'_>, idx: usize, config: &PdfRenderConfig) -> Result<DynamicImage, PdfiumError> {
    let page = pages.get(idx as u16)?;
    let bitmap = page.render_with_config(config)?;
    Ok(bitmap.as_image())
}

/// Encode a rendered page as a base64 PNG image attachment.
///
/// PNG keeps small print legible; `detail: "high"` keeps the full tile
/// budget on OpenAI-style vision models.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

fn bind() -> Result<Pdfium, DirectoryError> {
    pdfium_auto::bind_pdfium_silent().map_err(|e| DirectoryError::PdfiumBindingFailed(e.to_string()))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, DirectoryError> {
    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        let path: PathBuf = pdf_path.to_path_buf();
        if err_str.to_lowercase().contains("password") {
            if password.is_some() {
                DirectoryError::WrongPassword { path }
            } else {
                DirectoryError::PasswordRequired { path }
            }
        } else {
            DirectoryError::CorruptPdf {
                path,
                detail: err_str,
            }
        }
    })?;
    info!("PDF loaded: {} pages", document.pages().len());
    Ok(document)
}

/// 0-based indices of the selected pages; fatal when nothing is in range.
fn selected_indices(selection: &PageSelection, total: usize) -> Result<Vec<usize>, DirectoryError> {
    let indices = selection.to_indices(total);
    if indices.is_empty() && total > 0 {
        return Err(DirectoryError::PageOutOfRange { total });
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn selection_outside_document_is_fatal() {
        let err = selected_indices(&PageSelection::Single(9), 4).unwrap_err();
        assert!(matches!(err, DirectoryError::PageOutOfRange { total: 4 }));
        assert_eq!(selected_indices(&PageSelection::Range(2, 9), 4).unwrap(), vec![1, 2, 3]);
    }
}
