//! Boundary to the external tagging service.
//!
//! The organizer never talks to the classifier directly. It goes through a
//! [`ClassifierGateway`], which batches requests, bounds every call with a
//! timeout and retries a failed batch a bounded number of times. A batch that
//! still fails is reported back so its files fall back to rule-based
//! categorization; the gateway never fails a whole organize run.

use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::{ClassifierSettings, MAX_CLASSIFIER_BATCH};
use crate::error::GatewayError;

/// Tags too broad to be useful as folder names.
const GENERIC_TAGS: &[&str] = &["image", "video", "audio", "file", "misc", "other", "document"];

/// One file as sent to the classifier. Content never leaves the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassifyResponse {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A tagging backend. One response per request, in request order.
pub trait Classifier: Send + Sync {
    fn classify(&self, batch: &[ClassifyRequest]) -> Result<Vec<ClassifyResponse>, GatewayError>;
}

/// Classifier reached over HTTP.
///
/// Posts `{"files": [...]}` and expects `{"results": [{"tags": [...]}, ...]}`.
pub struct HttpClassifier {
    endpoint: String,
    agent: ureq::Agent,
}

#[derive(Serialize)]
struct HttpRequest<'a> {
    files: &'a [ClassifyRequest],
}

#[derive(Deserialize)]
struct HttpResponse {
    results: Vec<ClassifyResponse>,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            endpoint: endpoint.into(),
            agent,
        }
    }
}

impl Classifier for HttpClassifier {
    fn classify(&self, batch: &[ClassifyRequest]) -> Result<Vec<ClassifyResponse>, GatewayError> {
        let body = serde_json::to_value(HttpRequest { files: batch })
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let response = self
            .agent
            .post(&self.endpoint)
            .send_json(body)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => {
                    GatewayError::Transport(format!("HTTP status {}", code))
                }
                ureq::Error::Transport(t) => GatewayError::Transport(t.to_string()),
            })?;
        let parsed: HttpResponse = response
            .into_json()
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        Ok(parsed.results)
    }
}

/// A batch that ended in rule fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub files: usize,
    pub attempts: u32,
    pub error: GatewayError,
}

/// Tags for every requested file, index-aligned with the input.
///
/// `None` means the file's batch failed and it must be organized by rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaggingOutcome {
    pub tags: Vec<Option<Vec<String>>>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Clone)]
pub struct ClassifierGateway {
    classifier: Arc<dyn Classifier>,
    batch_size: usize,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ClassifierGateway {
    pub fn new(classifier: Arc<dyn Classifier>, settings: &ClassifierSettings) -> Self {
        Self {
            classifier,
            batch_size: settings.batch_size.clamp(1, MAX_CLASSIFIER_BATCH),
            timeout: settings.timeout(),
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff(),
        }
    }

    /// HTTP gateway for an enabled, configured classifier; `None` otherwise.
    pub fn from_settings(settings: &ClassifierSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        let endpoint = settings.endpoint.as_deref()?;
        let classifier = HttpClassifier::new(endpoint, settings.timeout());
        Some(Self::new(Arc::new(classifier), settings))
    }

    /// Overrides the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Tags `requests` batch by batch.
    ///
    /// Batches not yet sent when `cancel` fires are left untagged.
    pub fn tag_all(&self, requests: &[ClassifyRequest], cancel: &CancellationToken) -> TaggingOutcome {
        let mut outcome = TaggingOutcome {
            tags: Vec::with_capacity(requests.len()),
            failures: Vec::new(),
        };
        for batch in requests.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                outcome.tags.extend(batch.iter().map(|_| None));
                continue;
            }
            match self.classify_with_retry(batch) {
                Ok(responses) => outcome
                    .tags
                    .extend(responses.into_iter().map(|r| Some(normalize_tags(&r.tags)))),
                Err((error, attempts)) => {
                    warn!(
                        "Classifier batch of {} file(s) failed after {} attempt(s), using rules: {}",
                        batch.len(),
                        attempts,
                        error
                    );
                    outcome.tags.extend(batch.iter().map(|_| None));
                    outcome.failures.push(BatchFailure {
                        files: batch.len(),
                        attempts,
                        error,
                    });
                }
            }
        }
        outcome
    }

    fn classify_with_retry(
        &self,
        batch: &[ClassifyRequest],
    ) -> Result<Vec<ClassifyResponse>, (GatewayError, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call_once(batch) {
                Ok(responses) => return Ok(responses),
                Err(error) if attempt <= self.max_retries => {
                    debug!("Classifier attempt {} failed: {}, retrying", attempt, error);
                    thread::sleep(self.retry_backoff * attempt);
                }
                Err(error) => return Err((error, attempt)),
            }
        }
    }

    /// One bounded call. The classifier runs on its own thread; if it overruns
    /// the timeout the thread is abandoned and its answer discarded.
    fn call_once(&self, batch: &[ClassifyRequest]) -> Result<Vec<ClassifyResponse>, GatewayError> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let classifier = Arc::clone(&self.classifier);
        let owned = batch.to_vec();
        thread::Builder::new()
            .name("tidydesk-classifier".to_string())
            .spawn(move || {
                let _ = sender.send(classifier.classify(&owned));
            })
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let responses = match receiver.recv_timeout(self.timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => return Err(GatewayError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => return Err(GatewayError::Disconnected),
        };
        if responses.len() != batch.len() {
            return Err(GatewayError::Malformed(format!(
                "expected {} result(s), got {}",
                batch.len(),
                responses.len()
            )));
        }
        Ok(responses)
    }
}

/// Lowercases, trims and dedupes tags, dropping empty and generic ones.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty() && !GENERIC_TAGS.contains(&tag.as_str()))
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with `tags` for every file and counts calls.
    pub(crate) struct FixedClassifier {
        pub tags: Vec<String>,
        pub calls: AtomicUsize,
    }

    impl Classifier for FixedClassifier {
        fn classify(
            &self,
            batch: &[ClassifyRequest],
        ) -> Result<Vec<ClassifyResponse>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(batch
                .iter()
                .map(|_| ClassifyResponse {
                    tags: self.tags.clone(),
                })
                .collect())
        }
    }

    struct SlowClassifier(Duration);

    impl Classifier for SlowClassifier {
        fn classify(
            &self,
            batch: &[ClassifyRequest],
        ) -> Result<Vec<ClassifyResponse>, GatewayError> {
            thread::sleep(self.0);
            Ok(vec![ClassifyResponse::default(); batch.len()])
        }
    }

    struct ShortClassifier;

    impl Classifier for ShortClassifier {
        fn classify(&self, _: &[ClassifyRequest]) -> Result<Vec<ClassifyResponse>, GatewayError> {
            Ok(Vec::new())
        }
    }

    fn settings(batch_size: usize) -> ClassifierSettings {
        ClassifierSettings {
            enabled: true,
            batch_size,
            max_retries: 1,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn requests(n: usize) -> Vec<ClassifyRequest> {
        (0..n)
            .map(|i| ClassifyRequest {
                filename: format!("file{}.txt", i),
                path: None,
            })
            .collect()
    }

    #[test]
    fn test_batches_respect_batch_size() {
        let classifier = Arc::new(FixedClassifier {
            tags: vec!["Invoice".to_string()],
            calls: AtomicUsize::new(0),
        });
        let gateway = ClassifierGateway::new(classifier.clone(), &settings(50));
        let outcome = gateway.tag_all(&requests(120), &CancellationToken::new());

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.tags.len(), 120);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.tags[0], Some(vec!["invoice".to_string()]));
    }

    #[test]
    fn test_timeout_falls_back_after_retries() {
        let gateway = ClassifierGateway::new(
            Arc::new(SlowClassifier(Duration::from_millis(500))),
            &settings(10),
        )
        .with_timeout(Duration::from_millis(20));
        let outcome = gateway.tag_all(&requests(3), &CancellationToken::new());

        assert_eq!(outcome.tags, vec![None, None, None]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].attempts, 2);
        assert!(matches!(outcome.failures[0].error, GatewayError::Timeout(_)));
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let gateway = ClassifierGateway::new(Arc::new(ShortClassifier), &settings(10));
        let outcome = gateway.tag_all(&requests(2), &CancellationToken::new());
        assert!(matches!(
            outcome.failures[0].error,
            GatewayError::Malformed(_)
        ));
        assert_eq!(outcome.tags, vec![None, None]);
    }

    #[test]
    fn test_cancelled_batches_are_not_sent() {
        let classifier = Arc::new(FixedClassifier {
            tags: vec!["x".to_string()],
            calls: AtomicUsize::new(0),
        });
        let gateway = ClassifierGateway::new(classifier.clone(), &settings(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = gateway.tag_all(&requests(5), &cancel);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.tags.len(), 5);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_normalize_drops_generic_and_duplicates() {
        let tags = vec![
            " Travel ".to_string(),
            "IMAGE".to_string(),
            "travel".to_string(),
            "".to_string(),
            "receipts".to_string(),
        ];
        assert_eq!(
            normalize_tags(&tags),
            vec!["travel".to_string(), "receipts".to_string()]
        );
    }

    #[test]
    fn test_disabled_settings_build_no_gateway() {
        assert!(ClassifierGateway::from_settings(&ClassifierSettings::default()).is_none());
        let enabled_without_endpoint = ClassifierSettings {
            enabled: true,
            ..Default::default()
        };
        assert!(ClassifierGateway::from_settings(&enabled_without_endpoint).is_none());
    }
}
