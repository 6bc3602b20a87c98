//! Pipeline stages for directory-to-records extraction.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ segment ──▶ backend ──▶ extract
//! (URL/path) (pages)   (blocks)    (JSON)      (ProviderRecord)
//! ```
//!
//! 1. [`input`]   canonicalise the user-supplied path or URL to a local file
//! 2. [`source`]  produce raw page text: pdfium text layer, vision-LLM
//!    transcription of rendered pages ([`render`]), or a markdown dump
//! 3. [`clean`]   deterministic text normalisation shared by every source
//! 4. [`segment`] split a page into provider blocks and read its headings
//! 5. [`backend`] one LLM call per block, with retry and timeout; the only
//!    stage with network I/O besides vision transcription
//! 6. [`extract`] decode and validate backend JSON into records

pub mod backend;
pub mod clean;
pub mod extract;
pub mod input;
pub mod render;
pub mod segment;
pub mod source;
