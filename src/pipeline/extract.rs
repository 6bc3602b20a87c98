//! Record extraction: one page of text in, validated provider records out.
//!
//! ```text
//! page text ──▶ segment ──▶ backend (per block) ──▶ decode ──▶ validate
//!                (blocks)     (JSON)                (entries)  (ProviderRecord)
//! ```
//!
//! Failures are absorbed at the smallest level that contains them: an entry
//! that fails validation is dropped, a block whose response is unusable is
//! skipped, and only an unreachable backend fails the page.

use crate::config::ExtractionConfig;
use crate::error::{BlockError, PageError};
use crate::output::PageResult;
use crate::pipeline::backend::{BackendError, ExtractionBackend};
use crate::pipeline::segment::{segment_page, DirectoryLayout};
use crate::record::{PageDefaults, RawProvider, ValidationError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Extracts [`crate::ProviderRecord`]s from page text.
#[derive(Clone)]
pub struct RecordExtractor {
    backend: Arc<dyn ExtractionBackend>,
    layout: DirectoryLayout,
    chunk_words: usize,
}

impl RecordExtractor {
    pub fn new(backend: Arc<dyn ExtractionBackend>, config: &ExtractionConfig) -> Self {
        Self {
            backend,
            layout: config.layout,
            chunk_words: config.chunk_words,
        }
    }

    /// Extract every valid record on one page.
    ///
    /// Blocks are sent to the backend one after another, so the returned
    /// records follow block order. A page with no blocks returns an empty
    /// result without calling the backend.
    pub async fn extract_page(&self, page_num: usize, text: &str) -> Result<PageResult, PageError> {
        let start = Instant::now();
        let segmented = segment_page(text, self.layout, self.chunk_words);
        let mut result = PageResult {
            page_num,
            blocks: segmented.blocks.len(),
            ..Default::default()
        };

        if segmented.blocks.is_empty() {
            debug!("Page {}: no provider blocks", page_num);
            return Ok(result);
        }

        let county = segmented.county.as_deref();
        let specialty = segmented.specialty.as_deref();
        let mut entries: Vec<RawProvider> = Vec::new();

        for block in &segmented.blocks {
            let response = match self.backend.extract(&block.text, county, specialty).await {
                Ok(v) => v,
                Err(BackendError::Unavailable(detail)) => {
                    return Err(PageError::BackendUnavailable {
                        page: page_num,
                        detail,
                    });
                }
                Err(source @ BackendError::Malformed(_)) => {
                    let err = BlockError::Rejected {
                        page: page_num,
                        block: block.index,
                        source,
                    };
                    warn!("{}", err);
                    result.skipped_blocks += 1;
                    continue;
                }
            };

            match decode_entries(response) {
                Ok(values) => {
                    for value in values {
                        match serde_json::from_value::<RawProvider>(value) {
                            Ok(raw) => entries.push(raw),
                            Err(e) => {
                                debug!("Page {} block {}: undecodable entry: {}", page_num, block.index, e);
                                result.dropped_entries += 1;
                            }
                        }
                    }
                }
                Err(detail) => {
                    let err = BlockError::UnexpectedShape {
                        page: page_num,
                        block: block.index,
                        detail,
                    };
                    warn!("{}", err);
                    result.skipped_blocks += 1;
                }
            }
        }

        propagate_organization_phones(&mut entries);

        let defaults = PageDefaults {
            page_num,
            county: segmented.county.clone(),
            specialty: segmented.specialty.clone(),
        };
        for raw in entries {
            match raw.validate(&defaults) {
                Ok(record) => result.records.push(record),
                Err(ValidationError::OrganizationOnly { practice_name }) => {
                    debug!("Page {}: organization entry '{}' skipped", page_num, practice_name);
                }
                Err(e) => {
                    warn!("Page {}: dropped entry: {}", page_num, e);
                    result.dropped_entries += 1;
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Page {}: {} records from {} blocks ({} skipped, {} dropped)",
            page_num,
            result.records.len(),
            result.blocks,
            result.skipped_blocks,
            result.dropped_entries
        );
        Ok(result)
    }
}

/// Flatten the accepted response shapes into a list of entries.
///
/// `{"providers": [...]}`, a bare array, or a single entry object.
fn decode_entries(response: Value) -> Result<Vec<Value>, String> {
    match response {
        Value::Object(mut map) => match map.remove("providers") {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Err(format!("'providers' is not an array: {other}")),
            None => Ok(vec![Value::Object(map)]),
        },
        Value::Array(items) => Ok(items),
        other => Err(format!("expected an object or array, got {other}")),
    }
}

/// Copy an organization's phone to its providers that lack one.
///
/// Directories print the practice phone once under the organization name;
/// entries match on practice name and street line.
fn propagate_organization_phones(entries: &mut [RawProvider]) {
    let phones: HashMap<(String, String), String> = entries
        .iter()
        .filter(|e| e.name_str().is_none())
        .filter_map(|e| {
            let key = (e.practice_str()?.to_lowercase(), e.street_str()?.to_lowercase());
            Some((key, e.phone_str()?.to_string()))
        })
        .collect();

    if phones.is_empty() {
        return;
    }

    for entry in entries.iter_mut().filter(|e| e.phone_str().is_none()) {
        let key = match (entry.practice_str(), entry.street_str()) {
            (Some(p), Some(s)) => (p.to_lowercase(), s.to_lowercase()),
            _ => continue,
        };
        if let Some(phone) = phones.get(&key) {
            entry.phone = Some(Value::String(phone.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers by the first line of the block.
    struct StubBackend {
        calls: AtomicUsize,
        respond: fn(&str) -> Result<Value, BackendError>,
    }

    impl StubBackend {
        fn new(respond: fn(&str) -> Result<Value, BackendError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                respond,
            })
        }
    }

    #[async_trait]
    impl ExtractionBackend for StubBackend {
        async fn extract(
            &self,
            block: &str,
            _county: Option<&str>,
            _specialty: Option<&str>,
        ) -> Result<Value, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(block.lines().next().unwrap_or_default())
        }
    }

    fn extractor(backend: Arc<StubBackend>) -> RecordExtractor {
        RecordExtractor::new(backend, &ExtractionConfig::default())
    }

    const PAGE: &str = "## COOK COUNTY\n#### Internal Medicine\n\
Kim, Ann MD\nPCP# 1\n100 Main St\n\
Lopez, Raul DO\nPCP# 2\n\
Nguyen, Bao NP\nPCP# 3\n";

    fn by_name(first_line: &str) -> Result<Value, BackendError> {
        Ok(json!({"providers": [{"identifier": first_line.len().to_string(), "name": first_line}]}))
    }

    #[tokio::test]
    async fn empty_page_yields_nothing_without_backend_calls() {
        let backend = StubBackend::new(by_name);
        let result = extractor(backend.clone()).extract_page(3, "  \n12\n---\n").await.unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.blocks, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn records_follow_block_order_and_page_defaults() {
        let result = extractor(StubBackend::new(by_name)).extract_page(5, PAGE).await.unwrap();
        let names: Vec<&str> = result.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Kim, Ann MD", "Lopez, Raul DO", "Nguyen, Bao NP"]);
        let first = &result.records[0];
        assert_eq!(first.source_page, 5);
        assert_eq!(first.county.as_deref(), Some("Cook County"));
        assert_eq!(first.specialties, ["Internal Medicine"]);
        assert_eq!(first.credentials.as_deref(), Some("MD"));
    }

    #[tokio::test]
    async fn entry_missing_name_is_dropped_siblings_survive() {
        fn respond(first: &str) -> Result<Value, BackendError> {
            if first.starts_with("Lopez") {
                Ok(json!([{"identifier": "2", "phone": "(312) 555-0100"}]))
            } else {
                by_name(first)
            }
        }
        let result = extractor(StubBackend::new(respond)).extract_page(1, PAGE).await.unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.dropped_entries, 1);
        assert!(result.records.iter().all(|r| r.name != "Lopez, Raul DO"));
    }

    #[tokio::test]
    async fn malformed_block_is_skipped() {
        fn respond(first: &str) -> Result<Value, BackendError> {
            match first {
                f if f.starts_with("Kim") => Err(BackendError::Malformed("no JSON".into())),
                f if f.starts_with("Lopez") => Ok(json!("just a string")),
                f => by_name(f),
            }
        }
        let result = extractor(StubBackend::new(respond)).extract_page(1, PAGE).await.unwrap();
        assert_eq!(result.skipped_blocks, 2);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].name, "Nguyen, Bao NP");
    }

    #[tokio::test]
    async fn unavailable_backend_fails_the_page() {
        fn respond(first: &str) -> Result<Value, BackendError> {
            if first.starts_with("Lopez") {
                Err(BackendError::Unavailable("connection refused".into()))
            } else {
                by_name(first)
            }
        }
        let err = extractor(StubBackend::new(respond)).extract_page(9, PAGE).await.unwrap_err();
        assert_eq!(
            err,
            PageError::BackendUnavailable {
                page: 9,
                detail: "connection refused".into()
            }
        );
    }

    #[tokio::test]
    async fn extraction_is_repeatable() {
        let ex = extractor(StubBackend::new(by_name));
        let a = ex.extract_page(2, PAGE).await.unwrap();
        let b = ex.extract_page(2, PAGE).await.unwrap();
        assert_eq!(a.records, b.records);
    }

    #[tokio::test]
    async fn organization_phone_reaches_its_providers() {
        fn respond(_first: &str) -> Result<Value, BackendError> {
            Ok(json!({"providers": [
                {"name": null, "practice_name": "Advocate Medical Group",
                 "address_line1": "1234 W Madison St", "phone": "(312) 555-0200"},
                {"name": "Jarava, Abelardo MD", "practice_name": "Advocate Medical Group",
                 "address_line1": "1234 W Madison St"},
                {"name": "Ortiz, Eva MD", "practice_name": "Advocate Medical Group",
                 "address_line1": "99 Other Rd"}
            ]}))
        }
        let page = "Advocate Medical Group\n1234 W Madison St\n(312) 555-0200\n";
        let result = extractor(StubBackend::new(respond)).extract_page(1, page).await.unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.dropped_entries, 0, "organization entries are not drops");
        assert_eq!(result.records[0].phone.as_deref(), Some("(312) 555-0200"));
        assert_eq!(result.records[1].phone, None);
    }

    #[test]
    fn decode_accepted_shapes() {
        assert_eq!(decode_entries(json!({"providers": [{}, {}]})).unwrap().len(), 2);
        assert_eq!(decode_entries(json!([{}])).unwrap().len(), 1);
        assert_eq!(decode_entries(json!({"name": "A"})).unwrap().len(), 1);
        assert!(decode_entries(json!({"providers": null})).unwrap().is_empty());
        assert!(decode_entries(json!({"providers": "none"})).is_err());
        assert!(decode_entries(json!(42)).is_err());
    }
}
