//! Input resolution: turn a user-supplied path or URL into a local file.
//!
//! URLs are downloaded into a `TempDir` that lives as long as the returned
//! [`ResolvedInput`], so pdfium can open a real path and the file is removed
//! when the run ends. PDFs are checked for the `%PDF` magic before anything
//! else touches them; text dumps are only checked for readability.

use crate::error::DirectoryError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A local path, or a downloaded file plus the temp directory holding it.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a readable local file.
///
/// `expect_pdf` enables the `%PDF` magic-byte check.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
    expect_pdf: bool,
) -> Result<ResolvedInput, DirectoryError> {
    if is_url(input) {
        download_url(input, timeout_secs, expect_pdf).await
    } else {
        resolve_local(input, expect_pdf)
    }
}

fn resolve_local(path_str: &str, expect_pdf: bool) -> Result<ResolvedInput, DirectoryError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(DirectoryError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            if expect_pdf {
                let mut magic = [0u8; 4];
                if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                    return Err(DirectoryError::NotAPdf { path, magic });
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DirectoryError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(DirectoryError::FileNotFound { path });
        }
    }

    debug!("Resolved local input: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(
    url: &str,
    timeout_secs: u64,
    expect_pdf: bool,
) -> Result<ResolvedInput, DirectoryError> {
    info!("Downloading directory from: {}", url);

    let failed = |reason: String| DirectoryError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DirectoryError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let filename = filename_from_url(url, expect_pdf);
    let temp_dir = TempDir::new().map_err(|e| DirectoryError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    if expect_pdf && bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(DirectoryError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| DirectoryError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment when it has an extension, else a generic name.
fn filename_from_url(url: &str, expect_pdf: bool) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    if expect_pdf {
        "downloaded.pdf".to_string()
    } else {
        "downloaded.md".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/directory.pdf"));
        assert!(is_url("http://example.com/directory.pdf"));
        assert!(!is_url("/tmp/directory.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_comes_from_url_path() {
        assert_eq!(
            filename_from_url("https://example.com/files/ca_la.pdf?x=1", true),
            "ca_la.pdf"
        );
        assert_eq!(filename_from_url("https://example.com/", true), "downloaded.pdf");
        assert_eq!(filename_from_url("https://example.com/", false), "downloaded.md");
    }

    #[tokio::test]
    async fn missing_file_is_fatal() {
        let err = resolve_input("/definitely/not/here.pdf", 5, true).await.unwrap_err();
        assert!(matches!(err, DirectoryError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected_only_when_a_pdf_is_expected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "## Page 1\nKim, Ann MD").expect("write");
        let path = file.path().to_string_lossy().to_string();

        let err = resolve_input(&path, 5, true).await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotAPdf { magic, .. } if &magic == b"## P"));

        let ok = resolve_input(&path, 5, false).await.expect("text input");
        assert_eq!(ok.path(), file.path());
    }
}
