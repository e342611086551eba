use std::collections::BTreeMap;

use crate::{Author, SessionId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub i32);

impl CommentId {
    /// Forest key under which top-level comments are grouped. Real comment
    /// ids start at 1, so this value never collides with one.
    pub const ROOT: CommentId = CommentId(0);
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub content: String,

    /// Canvas anchor. Only top-level comments are anchored; replies inherit
    /// their thread's position and carry `None`.
    pub x: Option<i32>,
    pub y: Option<i32>,

    pub user_id: UserId,
    pub comment_session_id: SessionId,

    /// `None` for a top-level comment. Otherwise the id of the parent
    /// comment, which always lives in the same session.
    pub reply_id: Option<CommentId>,

    pub timestamp: Time,
}

/// A comment to be persisted. The id and timestamp are assigned by the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewComment {
    pub content: String,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub user_id: UserId,
    pub comment_session_id: SessionId,
    pub reply_id: Option<CommentId>,
}

/// Joined record: a comment enriched with its author's display fields. The
/// author is `None` when the user row no longer exists.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentWithAuthor {
    #[serde(flatten)]
    pub comment: Comment,
    #[serde(flatten)]
    pub author: Option<Author>,
}

/// Groups joined comments into the adjacency-list forest keyed by parent id,
/// with [`CommentId::ROOT`] collecting the top-level comments. Input order is
/// preserved within each bucket, so feeding comments in timestamp order
/// yields chronologically ordered threads.
pub fn build_forest(comments: Vec<CommentWithAuthor>) -> BTreeMap<CommentId, Vec<CommentWithAuthor>> {
    let mut forest: BTreeMap<CommentId, Vec<CommentWithAuthor>> = BTreeMap::new();
    for c in comments {
        forest
            .entry(c.comment.reply_id.unwrap_or(CommentId::ROOT))
            .or_insert_with(Vec::new)
            .push(c);
    }
    forest
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(id: i32, reply_id: Option<i32>) -> CommentWithAuthor {
        CommentWithAuthor {
            comment: Comment {
                id: CommentId(id),
                content: format!("comment {id}"),
                x: reply_id.is_none().then_some(10),
                y: reply_id.is_none().then_some(20),
                user_id: UserId(1),
                comment_session_id: SessionId(1),
                reply_id: reply_id.map(CommentId),
                timestamp: Utc::now(),
            },
            author: None,
        }
    }

    #[test]
    fn forest_groups_by_parent() {
        let forest = build_forest(vec![
            comment(1, None),
            comment(2, Some(1)),
            comment(3, Some(1)),
            comment(4, Some(2)),
            comment(5, None),
        ]);
        let ids = |key: CommentId| {
            forest
                .get(&key)
                .map(|v| v.iter().map(|c| c.comment.id.0).collect::<Vec<_>>())
                .unwrap_or_default()
        };
        assert_eq!(ids(CommentId::ROOT), vec![1, 5]);
        assert_eq!(ids(CommentId(1)), vec![2, 3]);
        assert_eq!(ids(CommentId(2)), vec![4]);
        assert_eq!(forest.get(&CommentId(3)), None);
    }

    #[test]
    fn forest_of_nothing_is_empty() {
        assert!(build_forest(Vec::new()).is_empty());
    }

    #[test]
    fn joined_record_serializes_flat() {
        let mut c = comment(7, None);
        c.author = Some(Author {
            first_name: String::from("Ada"),
            last_name: String::from("Lovelace"),
            avatar_url: None,
        });
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["firstName"], "Ada");
        assert_eq!(json["replyId"], serde_json::Value::Null);
    }
}
