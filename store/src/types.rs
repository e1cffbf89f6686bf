use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

pub type ProjectId = u64;
pub type GroupId = u64;

/// Write credential for a project.
///
/// `secret_key` is absent for public-only keys handed to browser clients.
/// `origins` extends the server-wide origin allow-list for this project.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectKey {
    pub project_id: ProjectId,
    pub public_key: String,
    pub secret_key: Option<String>,
    pub origins: Vec<String>,
    pub is_active: bool,
}

impl ProjectKey {
    pub fn new<P>(project_id: ProjectId, public_key: P) -> Self
    where
        P: Into<String>,
    {
        ProjectKey {
            project_id,
            public_key: public_key.into(),
            secret_key: None,
            origins: Vec::new(),
            is_active: true,
        }
    }

    pub fn with_secret<S>(mut self, secret_key: S) -> Self
    where
        S: Into<String>,
    {
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Revoked keys stay on file but authenticate nothing.
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A deduplicated issue: the aggregate of every event in a project that
/// produced the same fingerprint.
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub project_id: ProjectId,
    pub fingerprint: String,
    pub title: String,
    pub culprit: Option<String>,
    pub times_seen: u64,
    pub first_seen: OffsetDateTime,
    pub last_seen: OffsetDateTime,
}

/// Material for creating a group the first time a fingerprint is seen.
#[derive(Clone, Debug)]
pub struct GroupSeed {
    pub title: String,
    pub culprit: Option<String>,
    pub timestamp: OffsetDateTime,
}

/// A fully normalized event pinned to its group.
#[derive(Clone, Debug)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub project_id: ProjectId,
    pub group_id: GroupId,
    pub timestamp: OffsetDateTime,
    /// Searchable text: the formatted log message when one exists, the
    /// derived title otherwise.
    pub message: String,
    pub data: Value,
}

/// Project-scoped tag key with the count of distinct values observed.
#[derive(Clone, Debug, PartialEq)]
pub struct TagKey {
    pub project_id: ProjectId,
    pub key: String,
    pub values_seen: u64,
}

/// Project-scoped tag value with occurrence counts and seen range.
#[derive(Clone, Debug, PartialEq)]
pub struct TagValue {
    pub project_id: ProjectId,
    pub key: String,
    pub value: String,
    pub times_seen: u64,
    pub first_seen: OffsetDateTime,
    pub last_seen: OffsetDateTime,
}

/// Group-scoped tag key.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupTagKey {
    pub project_id: ProjectId,
    pub group_id: GroupId,
    pub key: String,
    pub values_seen: u64,
}

/// Group-scoped tag value.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupTagValue {
    pub project_id: ProjectId,
    pub group_id: GroupId,
    pub key: String,
    pub value: String,
    pub times_seen: u64,
    pub first_seen: OffsetDateTime,
    pub last_seen: OffsetDateTime,
}
