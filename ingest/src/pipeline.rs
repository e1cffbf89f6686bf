//! The ingestion pipeline.
//!
//! Order matters: credentials are resolved and checked before the body is
//! decoded, the body is decoded before anything is written, and the
//! event-id reservation happens before any other write so a redelivered
//! event cannot double-count counters or tags.

use crate::auth;
use crate::body;
use crate::errors::{ApiError, AuthError, Result, ValidationError};
use crate::event::{self, NormalizedEvent};
use crate::grouping::Fingerprinter;
use crate::metrics_defs::{
    EVENT_ACCEPTED, EVENT_DUPLICATE, EVENT_PAYLOAD_BYTES, EVENT_REJECTED, GROUP_CREATED,
};
use crate::origin;
use crate::tags;
use bytes::Bytes;
use std::sync::Arc;
use store::types::{GroupSeed, ProjectId, ProjectKey};
use store::{EventStore, GroupStore, KeyStore, TagStore};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// How an accepted delivery ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Stored { event_id: Uuid },
    /// The event id was seen before; the delivery is acknowledged without
    /// writing anything.
    Duplicate { event_id: Uuid },
}

impl Outcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            Outcome::Stored { event_id } | Outcome::Duplicate { event_id } => *event_id,
        }
    }
}

/// Which channel carried the payload.
///
/// Query deliveries come from in-page scripts that cannot set headers or
/// hold a secret, so the secret requirement never applies to them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Body,
    Query,
}

/// An event delivery, as handed over by the HTTP layer. GET deliveries
/// place the `sentry_data` parameter in `body`.
#[derive(Clone, Debug)]
pub struct StoreRequest {
    /// Project id from the request path. `None` on the legacy unscoped
    /// route, where the key alone selects the project.
    pub project_id: Option<ProjectId>,
    pub query: String,
    pub auth_header: Option<String>,
    pub content_encoding: Option<String>,
    pub origin: Option<String>,
    pub transport: Transport,
    pub body: Bytes,
    pub received_at: OffsetDateTime,
}

/// A browser security report delivery.
#[derive(Clone, Debug)]
pub struct SecurityRequest {
    pub project_id: ProjectId,
    pub query: String,
    pub origin: Option<String>,
    pub body: Bytes,
    pub received_at: OffsetDateTime,
}

/// The persistence backends the pipeline writes to.
#[derive(Clone)]
pub struct Stores {
    pub keys: Arc<dyn KeyStore>,
    pub groups: Arc<dyn GroupStore>,
    pub tags: Arc<dyn TagStore>,
    pub events: Arc<dyn EventStore>,
}

#[derive(Clone, Debug)]
pub struct ProcessorOptions {
    /// Server-wide origin allow-list, unioned with each key's own.
    pub allow_origin: Vec<String>,
    /// Decompressed payload cap in bytes.
    pub max_event_bytes: usize,
    /// Accepted distance between a signature timestamp and server time.
    pub max_clock_skew: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        ProcessorOptions {
            allow_origin: Vec::new(),
            max_event_bytes: 1024 * 1024,
            max_clock_skew: Duration::seconds(300),
        }
    }
}

pub struct EventProcessor {
    stores: Stores,
    fingerprinter: Arc<dyn Fingerprinter>,
    options: ProcessorOptions,
}

impl EventProcessor {
    pub fn new(
        stores: Stores,
        fingerprinter: Arc<dyn Fingerprinter>,
        options: ProcessorOptions,
    ) -> Self {
        EventProcessor {
            stores,
            fingerprinter,
            options,
        }
    }

    pub fn max_event_bytes(&self) -> usize {
        self.options.max_event_bytes
    }

    /// Runs one event delivery through authentication, decoding,
    /// normalization, grouping, and storage.
    pub async fn process_store(&self, request: StoreRequest) -> Result<Outcome> {
        match self.process_store_inner(request).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                shared::counter!(EVENT_REJECTED).increment(1);
                Err(error)
            }
        }
    }

    async fn process_store_inner(&self, request: StoreRequest) -> Result<Outcome> {
        let auth = auth::auth_from_request(request.auth_header.as_deref(), &request.query)?;
        let key = self.resolve_key(&auth.public_key, request.project_id).await?;
        origin::check_origin(
            request.origin.as_deref(),
            &key.origins,
            &self.options.allow_origin,
        )?;
        let public_client =
            request.origin.is_some() || request.transport == Transport::Query;
        auth::verify(
            &auth,
            key.secret_key.as_deref(),
            &request.body,
            public_client,
            request.received_at,
            self.options.max_clock_skew,
        )?;

        let decoded = body::decode_body(
            &request.body,
            request.content_encoding.as_deref(),
            self.options.max_event_bytes,
        )?;
        shared::histogram!(EVENT_PAYLOAD_BYTES).record(decoded.len() as f64);
        let payload = body::parse_json(&decoded)?;
        let event = event::normalize(key.project_id, payload, request.received_at)?;

        self.finish(event).await
    }

    /// Runs one browser security report through the same tail of the
    /// pipeline. Reports are public: the key alone authenticates, since
    /// browsers can neither set headers nor keep secrets.
    pub async fn process_security_report(&self, request: SecurityRequest) -> Result<Outcome> {
        match self.process_security_inner(request).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                shared::counter!(EVENT_REJECTED).increment(1);
                Err(error)
            }
        }
    }

    async fn process_security_inner(&self, request: SecurityRequest) -> Result<Outcome> {
        let public_key =
            auth::public_key_from_query(&request.query).ok_or(AuthError::MissingKey)?;
        let key = self.resolve_key(&public_key, Some(request.project_id)).await?;
        origin::check_origin(
            request.origin.as_deref(),
            &key.origins,
            &self.options.allow_origin,
        )?;

        let decoded = body::decode_body(&request.body, None, self.options.max_event_bytes)?;
        shared::histogram!(EVENT_PAYLOAD_BYTES).record(decoded.len() as f64);
        let mut document = body::parse_json(&decoded)?;
        let report = document
            .remove("csp-report")
            .ok_or(ValidationError::MissingRequiredField("csp-report"))?;

        let mut payload = serde_json::Map::new();
        payload.insert("csp".to_string(), report);
        let event = event::normalize(request.project_id, payload, request.received_at)?;

        self.finish(event).await
    }

    async fn resolve_key(
        &self,
        public_key: &str,
        project_id: Option<ProjectId>,
    ) -> Result<ProjectKey> {
        let key = self
            .stores
            .keys
            .lookup(public_key)
            .await?
            .ok_or(AuthError::UnknownKey)?;
        if !key.is_active {
            return Err(AuthError::UnknownKey.into());
        }
        if let Some(project_id) = project_id {
            if key.project_id != project_id {
                tracing::debug!(
                    project_id,
                    key_project_id = key.project_id,
                    "key does not belong to the addressed project"
                );
                return Err(AuthError::UnknownKey.into());
            }
        }
        Ok(key)
    }

    async fn finish(&self, event: NormalizedEvent) -> Result<Outcome> {
        // Reservation is the idempotency point: exactly one delivery of an
        // event id gets past it.
        if !self
            .stores
            .events
            .reserve(event.project_id, event.event_id)
            .await?
        {
            shared::counter!(EVENT_DUPLICATE).increment(1);
            tracing::debug!(event_id = %event.event_id, "dropping redelivered event");
            return Ok(Outcome::Duplicate {
                event_id: event.event_id,
            });
        }

        let fingerprint = self.fingerprinter.fingerprint(&event);
        let seed = GroupSeed {
            title: event.title.clone(),
            culprit: event.culprit.clone(),
            timestamp: event.timestamp,
        };
        let (group, created) = self
            .stores
            .groups
            .get_or_create_by_fingerprint(event.project_id, &fingerprint, seed)
            .await?;
        if created {
            shared::counter!(GROUP_CREATED).increment(1);
            tracing::info!(
                group_id = group.id,
                project_id = event.project_id,
                title = %group.title,
                "created group"
            );
        }

        tags::index_event_tags(self.stores.tags.as_ref(), &event, &group).await?;
        self.stores.events.save(event.to_stored(group.id)).await?;

        shared::counter!(EVENT_ACCEPTED).increment(1);
        tracing::debug!(
            event_id = %event.event_id,
            group_id = group.id,
            "stored event"
        );
        Ok(Outcome::Stored {
            event_id: event.event_id,
        })
    }
}
