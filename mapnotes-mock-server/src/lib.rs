//! In-memory stand-in for the relational store, used by tests. Mirrors the
//! server's semantics including cascade deletes and the author-joined reads,
//! minus durability.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mapnotes_api::{
    build_forest, Comment, CommentId, CommentSession, CommentWithAuthor, FullSessionDoc, MapId,
    NewComment, NewSession, SessionId, SessionPatch, Store, StorePool, UserId, UserIdentity,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct MockServer {
    sessions: BTreeMap<SessionId, CommentSession>,
    comments: BTreeMap<CommentId, Comment>,
    users: BTreeMap<UserId, UserIdentity>,
    next_session: i32,
    next_comment: i32,
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer::default()
    }

    pub fn add_user(&mut self, user: UserIdentity) {
        self.users.insert(user.id, user);
    }

    /// Shared handle usable as a [`StorePool`].
    pub fn shared(self) -> MockPool {
        MockPool(Arc::new(Mutex::new(self)))
    }

    fn insert_session(&mut self, s: NewSession) -> SessionId {
        self.next_session += 1;
        let id = SessionId(self.next_session);
        self.sessions.insert(
            id,
            CommentSession {
                id,
                name: s.name,
                map_id: s.map_id,
                start: s.start,
                expires: s.expires,
            },
        );
        id
    }

    fn join_author(&self, comment: &Comment) -> CommentWithAuthor {
        CommentWithAuthor {
            comment: comment.clone(),
            author: self.users.get(&comment.user_id).map(|u| u.author()),
        }
    }

    /// Removes a comment and, transitively, its reply chain, the way the
    /// store's self-referencing cascade does.
    fn remove_comment_tree(&mut self, id: CommentId) {
        let children: Vec<CommentId> = self
            .comments
            .values()
            .filter(|c| c.reply_id == Some(id))
            .map(|c| c.id)
            .collect();
        self.comments.remove(&id);
        for child in children {
            self.remove_comment_tree(child);
        }
    }
}

#[async_trait]
impl Store for MockServer {
    async fn create_session(&mut self, session: NewSession) -> anyhow::Result<SessionId> {
        Ok(self.insert_session(session))
    }

    async fn update_session(
        &mut self,
        id: SessionId,
        patch: SessionPatch,
    ) -> anyhow::Result<Option<CommentSession>> {
        Ok(self.sessions.get_mut(&id).map(|s| {
            if let Some(name) = patch.name {
                s.name = name;
            }
            if let Some(start) = patch.start {
                s.start = start;
            }
            if let Some(expires) = patch.expires {
                s.expires = expires;
            }
            s.clone()
        }))
    }

    async fn delete_session(&mut self, id: SessionId) -> anyhow::Result<bool> {
        if self.sessions.remove(&id).is_none() {
            return Ok(false);
        }
        // Cascade; equivalent to the transitive reply_id cascade because a
        // reply tree never spans sessions
        self.comments.retain(|_, c| c.comment_session_id != id);
        Ok(true)
    }

    async fn session_by_id(&mut self, id: SessionId) -> anyhow::Result<Option<CommentSession>> {
        Ok(self.sessions.get(&id).cloned())
    }

    async fn sessions_for_map(&mut self, map: MapId) -> anyhow::Result<Vec<FullSessionDoc>> {
        let mut sessions: Vec<&CommentSession> = self
            .sessions
            .values()
            .filter(|s| s.map_id == map)
            .collect();
        sessions.sort_by_key(|s| s.start);
        Ok(sessions
            .into_iter()
            .map(|session| {
                let mut comments: Vec<&Comment> = self
                    .comments
                    .values()
                    .filter(|c| c.comment_session_id == session.id)
                    .collect();
                comments.sort_by_key(|c| c.timestamp);
                FullSessionDoc {
                    session: session.clone(),
                    comments: build_forest(
                        comments.into_iter().map(|c| self.join_author(c)).collect(),
                    ),
                }
            })
            .collect())
    }

    async fn create_comment(&mut self, comment: NewComment) -> anyhow::Result<CommentId> {
        self.next_comment += 1;
        let id = CommentId(self.next_comment);
        self.comments.insert(
            id,
            Comment {
                id,
                content: comment.content,
                x: comment.x,
                y: comment.y,
                user_id: comment.user_id,
                comment_session_id: comment.comment_session_id,
                reply_id: comment.reply_id,
                timestamp: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn update_comment(
        &mut self,
        id: CommentId,
        content: String,
    ) -> anyhow::Result<Option<Comment>> {
        Ok(self.comments.get_mut(&id).map(|c| {
            c.content = content;
            c.clone()
        }))
    }

    async fn delete_comment(&mut self, id: CommentId) -> anyhow::Result<bool> {
        if !self.comments.contains_key(&id) {
            return Ok(false);
        }
        self.remove_comment_tree(id);
        Ok(true)
    }

    async fn comment_by_id(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        Ok(self.comments.get(&id).cloned())
    }

    async fn comments_for_session(&mut self, id: SessionId) -> anyhow::Result<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .comments
            .values()
            .filter(|c| c.comment_session_id == id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.timestamp);
        Ok(comments)
    }

    async fn comment_with_author(
        &mut self,
        id: CommentId,
    ) -> anyhow::Result<Option<CommentWithAuthor>> {
        Ok(self.comments.get(&id).cloned().map(|c| self.join_author(&c)))
    }
}

/// Store handle checked out of a [`MockPool`], holding the state lock for the
/// duration of one unit of work.
#[derive(Debug)]
pub struct MockConn(OwnedMutexGuard<MockServer>);

macro_rules! delegate {
    ( $( async fn $name:ident($( $arg:ident: $ty:ty ),*) -> $ret:ty; )* ) => {
        #[async_trait]
        impl Store for MockConn {
            $(
                async fn $name(&mut self, $( $arg: $ty ),*) -> $ret {
                    self.0.$name($( $arg ),*).await
                }
            )*
        }
    };
}

delegate! {
    async fn create_session(session: NewSession) -> anyhow::Result<SessionId>;
    async fn update_session(id: SessionId, patch: SessionPatch) -> anyhow::Result<Option<CommentSession>>;
    async fn delete_session(id: SessionId) -> anyhow::Result<bool>;
    async fn session_by_id(id: SessionId) -> anyhow::Result<Option<CommentSession>>;
    async fn sessions_for_map(map: MapId) -> anyhow::Result<Vec<FullSessionDoc>>;
    async fn create_comment(comment: NewComment) -> anyhow::Result<CommentId>;
    async fn update_comment(id: CommentId, content: String) -> anyhow::Result<Option<Comment>>;
    async fn delete_comment(id: CommentId) -> anyhow::Result<bool>;
    async fn comment_by_id(id: CommentId) -> anyhow::Result<Option<Comment>>;
    async fn comments_for_session(id: SessionId) -> anyhow::Result<Vec<Comment>>;
    async fn comment_with_author(id: CommentId) -> anyhow::Result<Option<CommentWithAuthor>>;
}

/// Shared handle over the mock state, usable wherever the server expects a
/// [`StorePool`].
#[derive(Clone, Debug)]
pub struct MockPool(Arc<Mutex<MockServer>>);

#[async_trait]
impl StorePool for MockPool {
    type Conn = MockConn;

    async fn acquire(&self) -> anyhow::Result<MockConn> {
        Ok(MockConn(self.0.clone().lock_owned().await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn pool_hands_out_working_store_handles() {
        let pool = MockServer::new().shared();
        let id = {
            let mut conn = pool.acquire().await.unwrap();
            conn.create_session(NewSession {
                name: String::from("review"),
                map_id: MapId(1),
                start: Utc::now(),
                expires: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap()
        };
        let mut conn = pool.acquire().await.unwrap();
        assert!(conn.session_by_id(id).await.unwrap().is_some());
        assert!(conn.sessions_for_map(MapId(2)).await.unwrap().is_empty());
    }
}
