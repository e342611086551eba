use std::collections::BTreeMap;

use crate::{CommentId, CommentWithAuthor, MapId, Time};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct SessionId(pub i32);

impl SessionId {
    /// Placeholder id carried by a session the client created locally but
    /// has not persisted yet. The wire `saveSession` event translates it to
    /// a create; it never reaches the store.
    pub const TEMP: SessionId = SessionId(-1);

    pub fn is_temp(self) -> bool {
        self == SessionId::TEMP
    }
}

/// A time-windowed comment session attached to a map. Commenting is only
/// permitted while `start <= now <= expires`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentSession {
    pub id: SessionId,
    pub name: String,
    pub map_id: MapId,
    pub start: Time,
    pub expires: Time,
}

impl CommentSession {
    pub fn is_active(&self, now: Time) -> bool {
        self.start <= now && now <= self.expires
    }

    pub fn is_pending(&self, now: Time) -> bool {
        now < self.start
    }

    pub fn is_expired(&self, now: Time) -> bool {
        now > self.expires
    }
}

/// A session to be persisted. The id is assigned by the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewSession {
    pub name: String,
    pub map_id: MapId,
    pub start: Time,
    pub expires: Time,
}

/// Partial update for an existing session: rename and/or reschedule.
/// Sessions are never moved to another map.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionPatch {
    pub name: Option<String>,
    pub start: Option<Time>,
    pub expires: Option<Time>,
}

/// Derived read-only projection of a session together with its reply forest.
/// Rebuilt from the store on every read; never a write target.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FullSessionDoc {
    #[serde(flatten)]
    pub session: CommentSession,
    pub comments: BTreeMap<CommentId, Vec<CommentWithAuthor>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn session(start: Time, expires: Time) -> CommentSession {
        CommentSession {
            id: SessionId(1),
            name: String::from("review"),
            map_id: MapId(1),
            start,
            expires,
        }
    }

    #[test]
    fn window_predicates() {
        let now = Utc::now();
        let s = session(now - Duration::hours(1), now + Duration::hours(1));
        assert!(s.is_active(now));
        assert!(!s.is_pending(now));
        assert!(!s.is_expired(now));

        let pending = session(now + Duration::minutes(1), now + Duration::hours(1));
        assert!(pending.is_pending(now));
        assert!(!pending.is_active(now));

        let expired = session(now - Duration::hours(2), now - Duration::hours(1));
        assert!(expired.is_expired(now));
        assert!(!expired.is_active(now));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = Utc::now();
        let s = session(now, now + Duration::hours(1));
        assert!(s.is_active(now));
        assert!(s.is_active(now + Duration::hours(1)));
        assert!(!s.is_active(now + Duration::hours(1) + Duration::seconds(1)));
    }

    #[test]
    fn temp_sentinel() {
        assert!(SessionId::TEMP.is_temp());
        assert!(!SessionId(1).is_temp());
    }

    #[test]
    fn full_doc_flattens_session_fields() {
        let now = Utc::now();
        let doc = FullSessionDoc {
            session: session(now, now + Duration::hours(1)),
            comments: BTreeMap::new(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["mapId"], 1);
        assert!(json["comments"].is_object());
        let back: FullSessionDoc = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }
}
