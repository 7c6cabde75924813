//! Dispatch: public URLs, routed field extraction and webhook delivery.
//!
//! Dispatch runs after the document is archived. Nothing here can undo that:
//! extraction and webhook failures are logged, collected as
//! `DispatchFailed` messages and returned alongside whatever did succeed.

use crate::config::RoutingTable;
use crate::error::{DispatchStage, IntakeError, Result};
use crate::extract::FieldExtractor;
use crate::output::{CompanyIdentity, ExtractionRecord};
use crate::webhook::WebhookSink;
use reqwest::Url;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Keys the pipeline owns in a record; extractor output never overrides them.
const RESERVED_KEYS: [&str; 2] = ["file_path", "annotated_image_url"];

// ── Public URLs ──────────────────────────────────────────────────────────

/// URL under which `path` is served, given the store is mounted at `base`.
///
/// Each path segment relative to `store_root` is percent-encoded.
pub fn public_url(base: &str, store_root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(store_root).map_err(|_| {
        IntakeError::Internal(format!(
            "'{}' is not under the store root '{}'",
            path.display(),
            store_root.display()
        ))
    })?;

    let mut url = Url::parse(base)
        .map_err(|e| IntakeError::InvalidConfig(format!("public_base_url '{}': {}", base, e)))?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            IntakeError::InvalidConfig(format!("public_base_url '{}' cannot be a base", base))
        })?;
        segments.pop_if_empty();
        for component in relative.components() {
            match component {
                Component::Normal(seg) => {
                    segments.push(&seg.to_string_lossy());
                }
                Component::CurDir => {}
                other => {
                    return Err(IntakeError::Internal(format!(
                        "unexpected path component {:?} in '{}'",
                        other,
                        relative.display()
                    )))
                }
            }
        }
    }
    Ok(url.to_string())
}

/// Map a URL produced by [`public_url`] back to a path under `store_root`.
///
/// Rejects URLs on another origin, outside the base path, or with a `.`/`..`
/// or separator-bearing segment after decoding.
pub fn resolve_public_url(base: &str, store_root: &Path, url: &str) -> Result<PathBuf> {
    let reject = |why: &str| IntakeError::InvalidUpload {
        reason: format!("URL '{}' {}", url, why),
    };
    let base = Url::parse(base)
        .map_err(|e| IntakeError::InvalidConfig(format!("public_base_url: {}", e)))?;
    let parsed = Url::parse(url).map_err(|_| reject("is not a valid URL"))?;
    if parsed.origin() != base.origin() {
        return Err(reject("is not served by this store"));
    }

    let non_empty = |u: &Url| -> Vec<String> {
        u.path_segments()
            .map(|s| s.filter(|x| !x.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    };
    let base_segments = non_empty(&base);
    let segments = non_empty(&parsed);
    if !segments.starts_with(&base_segments) || segments.len() == base_segments.len() {
        return Err(reject("is outside the store"));
    }

    let mut path = store_root.to_path_buf();
    for raw in &segments[base_segments.len()..] {
        let decoded = urlencoding::decode(raw).map_err(|_| reject("is not valid UTF-8"))?;
        if decoded == "." || decoded == ".." || decoded.contains(['/', '\\', '\0']) {
            return Err(reject("escapes the store"));
        }
        path.push(decoded.as_ref());
    }
    Ok(path)
}

// ── Extraction + webhook ─────────────────────────────────────────────────

/// Inputs for one dispatch.
pub struct DispatchRequest<'a> {
    pub company: &'a CompanyIdentity,
    /// OCR texts in order; joined with newlines for the extractor.
    pub texts: &'a [String],
    pub file_url: &'a str,
    pub annotated_image_url: Option<&'a str>,
}

/// What dispatch produced. `errors` holds one message per failed step.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub record: Option<ExtractionRecord>,
    pub webhook_response: Option<Value>,
    pub errors: Vec<String>,
}

/// Run routed extraction, then deliver the record to the webhook.
///
/// The webhook is skipped when there is no record to send.
pub async fn dispatch(
    extractor: Option<&dyn FieldExtractor>,
    webhook: Option<&dyn WebhookSink>,
    routing: &RoutingTable,
    request: DispatchRequest<'_>,
    timeout_secs: u64,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    let limit = Duration::from_secs(timeout_secs);

    let Some(extractor) = extractor else {
        record_failure(
            &mut report,
            IntakeError::DispatchFailed {
                stage: DispatchStage::Extraction,
                detail: "no field extractor configured".into(),
            },
        );
        return report;
    };

    let endpoint = routing.endpoint_for(request.company.as_str());
    let text = request.texts.join("\n");
    info!(
        "Extracting fields for {} via '{}' ({} chars)",
        request.company,
        endpoint,
        text.len()
    );

    let extracted = tokio::time::timeout(limit, extractor.extract(endpoint, &text))
        .await
        .unwrap_or_else(|_| {
            Err(IntakeError::DispatchFailed {
                stage: DispatchStage::Extraction,
                detail: format!("'{}' exceeded {}s", endpoint, timeout_secs),
            })
        });
    let mut fields = match extracted {
        Ok(fields) => fields,
        Err(e) => {
            record_failure(&mut report, e);
            return report;
        }
    };
    for key in RESERVED_KEYS {
        fields.remove(key);
    }
    let record = ExtractionRecord {
        fields,
        file_path: request.file_url.to_string(),
        annotated_image_url: request.annotated_image_url.map(str::to_string),
    };

    if let Some(webhook) = webhook {
        match post_record(webhook, &record, limit).await {
            Ok(reply) => report.webhook_response = Some(reply),
            Err(e) => record_failure(&mut report, e),
        }
    }
    report.record = Some(record);
    report
}

async fn post_record(
    webhook: &dyn WebhookSink,
    record: &ExtractionRecord,
    limit: Duration,
) -> Result<Value> {
    let payload = serde_json::to_value(record).map_err(|e| IntakeError::DispatchFailed {
        stage: DispatchStage::Webhook,
        detail: format!("cannot serialise record: {}", e),
    })?;
    tokio::time::timeout(limit, webhook.post(&payload))
        .await
        .map_err(|_| IntakeError::DispatchFailed {
            stage: DispatchStage::Webhook,
            detail: format!("exceeded {}s", limit.as_secs()),
        })?
}

fn record_failure(report: &mut DispatchReport, err: IntakeError) {
    warn!("{}", err);
    report.errors.push(err.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    const BASE: &str = "http://localhost:8000/temporary/";

    #[test]
    fn url_is_base_plus_relative_path() {
        let root = Path::new("/srv/static/temporary");
        let url = public_url(BASE, root, &root.join("CBRE/CBRE_processed_v1.pdf")).unwrap();
        assert_eq!(url, "http://localhost:8000/temporary/CBRE/CBRE_processed_v1.pdf");
    }

    #[test]
    fn url_segments_are_percent_encoded() {
        let root = Path::new("/s");
        let url = public_url(BASE, root, &root.join("Images/job 1#a.png")).unwrap();
        assert_eq!(url, "http://localhost:8000/temporary/Images/job%201%23a.png");
    }

    #[test]
    fn url_outside_store_is_rejected() {
        assert!(public_url(BASE, Path::new("/s"), Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn base_without_trailing_slash_still_joins() {
        let root = Path::new("/s");
        let url = public_url("http://h/files", root, &root.join("a/b.png")).unwrap();
        assert_eq!(url, "http://h/files/a/b.png");
    }

    #[test]
    fn resolve_inverts_public_url() {
        let root = Path::new("/s");
        let path = root.join("Images").join("job 1#a.png");
        let url = public_url(BASE, root, &path).unwrap();
        assert_eq!(resolve_public_url(BASE, root, &url).unwrap(), path);
    }

    #[test]
    fn resolve_rejects_escapes_and_foreign_urls() {
        let root = Path::new("/s");
        for url in [
            "http://evil:8000/temporary/a.pdf",
            "http://localhost:8000/other/a.pdf",
            "http://localhost:8000/temporary/",
            "http://localhost:8000/temporary/a%2F..%2Fb",
            "not a url",
        ] {
            assert!(resolve_public_url(BASE, root, url).is_err(), "{url}");
        }
    }

    struct FixedExtractor(Map<String, Value>);

    #[async_trait]
    impl FieldExtractor for FixedExtractor {
        async fn extract(&self, _endpoint: &str, _text: &str) -> Result<Map<String, Value>> {
            Ok(self.0.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl FieldExtractor for FailingExtractor {
        async fn extract(&self, endpoint: &str, _text: &str) -> Result<Map<String, Value>> {
            Err(IntakeError::DispatchFailed {
                stage: DispatchStage::Extraction,
                detail: format!("{endpoint} is down"),
            })
        }
    }

    #[derive(Default)]
    struct CapturingWebhook(Mutex<Vec<Value>>);

    #[async_trait]
    impl WebhookSink for CapturingWebhook {
        async fn post(&self, payload: &Value) -> Result<Value> {
            self.0.lock().unwrap().push(payload.clone());
            Ok(json!({"ok": true}))
        }
    }

    fn request<'a>(
        company: &'a CompanyIdentity,
        texts: &'a [String],
    ) -> DispatchRequest<'a> {
        DispatchRequest {
            company,
            texts,
            file_url: "http://h/temporary/CBRE/CBRE_processed.pdf",
            annotated_image_url: Some("http://h/temporary/AnnotatedImages/x_annotated.png"),
        }
    }

    #[tokio::test]
    async fn record_reaches_webhook_with_urls() {
        let company = CompanyIdentity::new("CBRE".into());
        let texts = vec!["PO-77".to_string()];
        let mut fields = Map::new();
        fields.insert("paymentponumber".into(), json!("PO-77"));
        fields.insert("file_path".into(), json!("spoofed"));
        let webhook = CapturingWebhook::default();

        let report = dispatch(
            Some(&FixedExtractor(fields)),
            Some(&webhook),
            &RoutingTable::default(),
            request(&company, &texts),
            5,
        )
        .await;

        assert!(report.errors.is_empty());
        assert_eq!(report.webhook_response, Some(json!({"ok": true})));
        let sent = webhook.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["paymentponumber"], "PO-77");
        assert_eq!(sent[0]["file_path"], "http://h/temporary/CBRE/CBRE_processed.pdf");
        assert!(sent[0]["annotated_image_url"].is_string());
    }

    #[tokio::test]
    async fn extraction_failure_is_reported_and_webhook_skipped() {
        let company = CompanyIdentity::new("Foxtons".into());
        let texts = Vec::new();
        let webhook = CapturingWebhook::default();

        let report = dispatch(
            Some(&FailingExtractor),
            Some(&webhook),
            &RoutingTable::default(),
            request(&company, &texts),
            5,
        )
        .await;

        assert!(report.record.is_none());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("default_repair is down"));
        assert!(webhook.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_extractor_is_reported() {
        let company = CompanyIdentity::new("KFH".into());
        let report = dispatch(None, None, &RoutingTable::default(), request(&company, &[]), 5).await;
        assert!(report.record.is_none());
        assert!(report.errors[0].contains("no field extractor"));
    }
}
