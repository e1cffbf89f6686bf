//! Shared fixtures for module tests.

use crate::auth;
use crate::grouping::{DefaultFingerprinter, Fingerprinter};
use crate::pipeline::{EventProcessor, ProcessorOptions, Stores};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use store::errors::Result as StoreResult;
use store::types::{Group, GroupId, GroupSeed, ProjectId, ProjectKey};
use store::{
    GroupStore, MemoryEventStore, MemoryGroupStore, MemoryKeyStore, MemoryTagStore, StoreError,
};
use tracing::Level;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

pub const PROJECT_ID: ProjectId = 1;
pub const PUBLIC_KEY: &str = "86c7cc6172614e5fb182d2b0fa1d986b";
pub const SECRET_KEY: &str = "91a791f086b54d5887fb3c9a52cd64b6";

/// A processor wired to in-memory stores, with direct handles on each
/// store for assertions.
pub struct TestHarness {
    pub processor: Arc<EventProcessor>,
    pub keys: Arc<MemoryKeyStore>,
    pub groups: Arc<MemoryGroupStore>,
    pub tags: Arc<MemoryTagStore>,
    pub events: Arc<MemoryEventStore>,
}

pub fn harness() -> TestHarness {
    harness_with_options(ProcessorOptions::default())
}

pub fn harness_with_options(options: ProcessorOptions) -> TestHarness {
    harness_inner(options, Arc::new(DefaultFingerprinter), None)
}

pub fn harness_with_fingerprinter(fingerprinter: Arc<dyn Fingerprinter>) -> TestHarness {
    harness_inner(ProcessorOptions::default(), fingerprinter, None)
}

/// A harness whose group store fails every call; the `groups` handle on
/// the returned harness is a detached, empty store.
pub fn broken_group_harness() -> TestHarness {
    harness_inner(
        ProcessorOptions::default(),
        Arc::new(DefaultFingerprinter),
        Some(Arc::new(BrokenGroupStore)),
    )
}

fn harness_inner(
    options: ProcessorOptions,
    fingerprinter: Arc<dyn Fingerprinter>,
    groups_override: Option<Arc<dyn GroupStore>>,
) -> TestHarness {
    let keys = Arc::new(MemoryKeyStore::new());
    keys.insert(ProjectKey::new(PROJECT_ID, PUBLIC_KEY).with_secret(SECRET_KEY));
    let groups = Arc::new(MemoryGroupStore::new());
    let tags = Arc::new(MemoryTagStore::new());
    let events = Arc::new(MemoryEventStore::new());

    let stores = Stores {
        keys: keys.clone(),
        groups: groups_override.unwrap_or_else(|| groups.clone()),
        tags: tags.clone(),
        events: events.clone(),
    };
    TestHarness {
        processor: Arc::new(EventProcessor::new(stores, fingerprinter, options)),
        keys,
        groups,
        tags,
        events,
    }
}

pub fn auth_header(version: &str, public_key: &str, secret_key: Option<&str>) -> String {
    match secret_key {
        Some(secret) => format!(
            "Sentry sentry_version={version}, sentry_key={public_key}, \
             sentry_secret={secret}, sentry_client=test/1.0"
        ),
        None => format!(
            "Sentry sentry_version={version}, sentry_key={public_key}, \
             sentry_client=test/1.0"
        ),
    }
}

pub fn signed_auth_header(
    version: &str,
    public_key: &str,
    secret: &str,
    timestamp: &str,
    body: &[u8],
) -> String {
    let signature = auth::compute_signature(secret, timestamp, body);
    format!(
        "Sentry sentry_version={version}, sentry_key={public_key}, \
         sentry_timestamp={timestamp}, sentry_signature={signature}"
    )
}

pub fn compress_gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

pub fn compress_zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("zlib write");
    encoder.finish().expect("zlib finish")
}

/// A Chrome-style CSP violation document, as posted to the security
/// endpoint.
pub fn csp_document() -> Value {
    json!({
        "csp-report": {
            "document-uri": "http://45.55.25.245:8123/csp",
            "referrer": "http://example.com",
            "violated-directive": "img-src https://45.55.25.245:8123/",
            "effective-directive": "img-src",
            "original-policy": "default-src https://45.55.25.245:8123/; img-src https://45.55.25.245:8123/; report-uri http://45.55.25.245:8123/csp-report",
            "blocked-uri": "http://google.com",
            "status-code": 200,
        }
    })
}

/// Captures ERROR-level log messages emitted on the current thread while
/// the returned guard is alive.
pub fn capture_error_logs() -> (tracing::subscriber::DefaultGuard, ErrorLogSpy) {
    let spy = ErrorLogSpy::default();
    let subscriber = tracing_subscriber::registry().with(spy.clone());
    (tracing::subscriber::set_default(subscriber), spy)
}

#[derive(Clone, Default)]
pub struct ErrorLogSpy {
    messages: Arc<Mutex<Vec<String>>>,
}

impl ErrorLogSpy {
    pub fn errors(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn assert_no_errors(&self) {
        let errors = self.errors();
        assert!(errors.is_empty(), "unexpected error logs: {errors:?}");
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write as _;
            let _ = write!(self.0, "{value:?}");
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for ErrorLogSpy {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.messages.lock().push(message);
        }
    }
}

/// Group store that fails every call, for exercising the internal-error
/// path.
pub struct BrokenGroupStore;

#[async_trait]
impl GroupStore for BrokenGroupStore {
    async fn get_or_create_by_fingerprint(
        &self,
        _project_id: ProjectId,
        _fingerprint: &str,
        _seed: GroupSeed,
    ) -> StoreResult<(Group, bool)> {
        Err(StoreError::Unavailable("group store offline".to_string()))
    }

    async fn get(&self, _project_id: ProjectId, _group_id: GroupId) -> StoreResult<Option<Group>> {
        Err(StoreError::Unavailable("group store offline".to_string()))
    }
}
