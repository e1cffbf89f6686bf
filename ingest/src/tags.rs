//! Tag indexing.
//!
//! For every tag pair on an accepted event, four records are kept current:
//! the per-project key and value, and the per-group key and value. These
//! back search and the tag distribution views.

use crate::event::{MAX_TAG_VALUE_LENGTH, NormalizedEvent, truncate_chars};
use indexmap::IndexMap;
use store::TagStore;
use store::errors::Result;
use store::types::Group;

/// The full tag set for an event: client tags first, then the primary
/// interface's contribution. Client tags win on conflict.
pub fn collect_tags(event: &NormalizedEvent) -> IndexMap<String, String> {
    let mut tags = event.tags.clone();
    if let Some(csp) = &event.csp {
        for (key, value) in csp.tag_contribution() {
            // Synthesized values (long blocked URIs) are truncated rather
            // than dropped.
            tags.entry(key)
                .or_insert_with(|| truncate_chars(&value, MAX_TAG_VALUE_LENGTH));
        }
    }
    tags
}

/// Upserts all four index records for each tag on the event.
pub async fn index_event_tags(
    tag_store: &dyn TagStore,
    event: &NormalizedEvent,
    group: &Group,
) -> Result<()> {
    for (key, value) in collect_tags(event) {
        tag_store
            .get_or_create_tag_key(event.project_id, &key)
            .await?;
        tag_store
            .get_or_create_tag_value(event.project_id, &key, &value, event.timestamp)
            .await?;
        tag_store
            .get_or_create_group_tag_key(event.project_id, group.id, &key)
            .await?;
        tag_store
            .get_or_create_group_tag_value(event.project_id, group.id, &key, &value, event.timestamp)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use store::MemoryTagStore;
    use store::types::ProjectId;
    use time::macros::datetime;

    const PROJECT: ProjectId = 1;

    fn event_from(payload: serde_json::Value) -> NormalizedEvent {
        let serde_json::Value::Object(payload) = payload else {
            panic!("payload fixture must be an object");
        };
        crate::event::normalize(PROJECT, payload, datetime!(2024-05-01 10:00:00 UTC)).unwrap()
    }

    fn group() -> Group {
        Group {
            id: 7,
            project_id: PROJECT,
            fingerprint: "fp".to_string(),
            title: "t".to_string(),
            culprit: None,
            times_seen: 1,
            first_seen: datetime!(2024-05-01 10:00:00 UTC),
            last_seen: datetime!(2024-05-01 10:00:00 UTC),
        }
    }

    #[test]
    fn test_collect_merges_interface_contribution() {
        let event = event_from(json!({
            "tags": {"browser": "chrome"},
            "csp": {
                "effective-directive": "img-src",
                "document-uri": "http://example.com/a",
                "blocked-uri": "http://google.com",
            }
        }));
        let tags = collect_tags(&event);
        assert_eq!(tags.get("browser").map(String::as_str), Some("chrome"));
        assert_eq!(
            tags.get("effective-directive").map(String::as_str),
            Some("img-src")
        );
        assert_eq!(
            tags.get("blocked-uri").map(String::as_str),
            Some("http://google.com")
        );
    }

    #[test]
    fn test_client_tags_win_on_conflict() {
        let event = event_from(json!({
            "tags": {"blocked-uri": "client-says-this"},
            "csp": {
                "effective-directive": "img-src",
                "document-uri": "http://example.com/a",
                "blocked-uri": "http://google.com",
            }
        }));
        let tags = collect_tags(&event);
        assert_eq!(
            tags.get("blocked-uri").map(String::as_str),
            Some("client-says-this")
        );
    }

    #[tokio::test]
    async fn test_index_writes_all_four_records() {
        let store = MemoryTagStore::new();
        let event = event_from(json!({"message": "hello", "tags": {"foo": "bar"}}));
        let group = group();

        index_event_tags(&store, &event, &group).await.unwrap();

        assert!(store.get_tag_key(PROJECT, "foo").is_some());
        assert!(store.get_tag_value(PROJECT, "foo", "bar").is_some());
        assert!(store.get_group_tag_key(PROJECT, group.id, "foo").is_some());
        assert!(
            store
                .get_group_tag_value(PROJECT, group.id, "foo", "bar")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_repeat_values_bump_counters() {
        let store = MemoryTagStore::new();
        let group = group();
        let early = event_from(json!({
            "message": "hello",
            "timestamp": "2024-05-01T09:00:00",
            "tags": {"foo": "bar"},
        }));
        let late = event_from(json!({
            "message": "hello",
            "timestamp": "2024-05-01T11:00:00",
            "tags": {"foo": "bar"},
        }));

        index_event_tags(&store, &early, &group).await.unwrap();
        index_event_tags(&store, &late, &group).await.unwrap();

        let value = store.get_tag_value(PROJECT, "foo", "bar").unwrap();
        assert_eq!(value.times_seen, 2);
        assert_eq!(value.first_seen, datetime!(2024-05-01 09:00:00 UTC));
        assert_eq!(value.last_seen, datetime!(2024-05-01 11:00:00 UTC));
    }
}
