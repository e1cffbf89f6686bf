use crate::errors::Result;
use crate::types::{GroupId, GroupTagKey, GroupTagValue, ProjectId, TagKey, TagValue};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use time::OffsetDateTime;

/// Additive tag index. Ingestion only ever creates records or increments
/// their counters; nothing in this contract removes data.
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn get_or_create_tag_key(&self, project_id: ProjectId, key: &str) -> Result<TagKey>;

    async fn get_or_create_tag_value(
        &self,
        project_id: ProjectId,
        key: &str,
        value: &str,
        seen_at: OffsetDateTime,
    ) -> Result<TagValue>;

    async fn get_or_create_group_tag_key(
        &self,
        project_id: ProjectId,
        group_id: GroupId,
        key: &str,
    ) -> Result<GroupTagKey>;

    async fn get_or_create_group_tag_value(
        &self,
        project_id: ProjectId,
        group_id: GroupId,
        key: &str,
        value: &str,
        seen_at: OffsetDateTime,
    ) -> Result<GroupTagValue>;
}

#[derive(Default)]
struct TagsInner {
    keys: HashMap<(ProjectId, String), TagKey>,
    values: HashMap<(ProjectId, String, String), TagValue>,
    group_keys: HashMap<(ProjectId, GroupId, String), GroupTagKey>,
    group_values: HashMap<(ProjectId, GroupId, String, String), GroupTagValue>,
}

/// In-memory tag index. All four record families live under one lock so a
/// value upsert can bump its parent key's distinct-value counter atomically.
#[derive(Default)]
pub struct MemoryTagStore {
    inner: RwLock<TagsInner>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_tag_key(&self, project_id: ProjectId, key: &str) -> Option<TagKey> {
        self.inner
            .read()
            .keys
            .get(&(project_id, key.to_string()))
            .cloned()
    }

    pub fn get_tag_value(&self, project_id: ProjectId, key: &str, value: &str) -> Option<TagValue> {
        self.inner
            .read()
            .values
            .get(&(project_id, key.to_string(), value.to_string()))
            .cloned()
    }

    pub fn get_group_tag_key(
        &self,
        project_id: ProjectId,
        group_id: GroupId,
        key: &str,
    ) -> Option<GroupTagKey> {
        self.inner
            .read()
            .group_keys
            .get(&(project_id, group_id, key.to_string()))
            .cloned()
    }

    pub fn get_group_tag_value(
        &self,
        project_id: ProjectId,
        group_id: GroupId,
        key: &str,
        value: &str,
    ) -> Option<GroupTagValue> {
        self.inner
            .read()
            .group_values
            .get(&(project_id, group_id, key.to_string(), value.to_string()))
            .cloned()
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    async fn get_or_create_tag_key(&self, project_id: ProjectId, key: &str) -> Result<TagKey> {
        let mut inner = self.inner.write();
        let record = inner
            .keys
            .entry((project_id, key.to_string()))
            .or_insert_with(|| TagKey {
                project_id,
                key: key.to_string(),
                values_seen: 0,
            });
        Ok(record.clone())
    }

    async fn get_or_create_tag_value(
        &self,
        project_id: ProjectId,
        key: &str,
        value: &str,
        seen_at: OffsetDateTime,
    ) -> Result<TagValue> {
        let mut inner = self.inner.write();

        let value_key = (project_id, key.to_string(), value.to_string());
        let is_new_value = !inner.values.contains_key(&value_key);

        let record = inner
            .values
            .entry(value_key)
            .and_modify(|record| {
                record.times_seen += 1;
                record.first_seen = record.first_seen.min(seen_at);
                record.last_seen = record.last_seen.max(seen_at);
            })
            .or_insert_with(|| TagValue {
                project_id,
                key: key.to_string(),
                value: value.to_string(),
                times_seen: 1,
                first_seen: seen_at,
                last_seen: seen_at,
            })
            .clone();

        if is_new_value {
            inner
                .keys
                .entry((project_id, key.to_string()))
                .or_insert_with(|| TagKey {
                    project_id,
                    key: key.to_string(),
                    values_seen: 0,
                })
                .values_seen += 1;
        }

        Ok(record)
    }

    async fn get_or_create_group_tag_key(
        &self,
        project_id: ProjectId,
        group_id: GroupId,
        key: &str,
    ) -> Result<GroupTagKey> {
        let mut inner = self.inner.write();
        let record = inner
            .group_keys
            .entry((project_id, group_id, key.to_string()))
            .or_insert_with(|| GroupTagKey {
                project_id,
                group_id,
                key: key.to_string(),
                values_seen: 0,
            });
        Ok(record.clone())
    }

    async fn get_or_create_group_tag_value(
        &self,
        project_id: ProjectId,
        group_id: GroupId,
        key: &str,
        value: &str,
        seen_at: OffsetDateTime,
    ) -> Result<GroupTagValue> {
        let mut inner = self.inner.write();

        let value_key = (project_id, group_id, key.to_string(), value.to_string());
        let is_new_value = !inner.group_values.contains_key(&value_key);

        let record = inner
            .group_values
            .entry(value_key)
            .and_modify(|record| {
                record.times_seen += 1;
                record.first_seen = record.first_seen.min(seen_at);
                record.last_seen = record.last_seen.max(seen_at);
            })
            .or_insert_with(|| GroupTagValue {
                project_id,
                group_id,
                key: key.to_string(),
                value: value.to_string(),
                times_seen: 1,
                first_seen: seen_at,
                last_seen: seen_at,
            })
            .clone();

        if is_new_value {
            inner
                .group_keys
                .entry((project_id, group_id, key.to_string()))
                .or_insert_with(|| GroupTagKey {
                    project_id,
                    group_id,
                    key: key.to_string(),
                    values_seen: 0,
                })
                .values_seen += 1;
        }

        Ok(record)
    }
}
