use async_trait::async_trait;

use crate::{
    Comment, CommentId, CommentSession, CommentWithAuthor, FullSessionDoc, MapId, NewComment,
    NewSession, SessionId, SessionPatch,
};

/// Persistence interface consumed by the hub and the query surface. The
/// relational store behind it is the single source of truth; implementations
/// exist for Postgres (server) and in-memory state (mock server).
#[async_trait]
pub trait Store {
    async fn create_session(&mut self, session: NewSession) -> anyhow::Result<SessionId>;

    /// Applies a partial update. `None` when the session does not exist.
    async fn update_session(
        &mut self,
        id: SessionId,
        patch: SessionPatch,
    ) -> anyhow::Result<Option<CommentSession>>;

    /// Deletes a session, cascading to all comments it owns. `false` when
    /// the session does not exist.
    async fn delete_session(&mut self, id: SessionId) -> anyhow::Result<bool>;

    async fn session_by_id(&mut self, id: SessionId) -> anyhow::Result<Option<CommentSession>>;

    /// All sessions of a map ordered by `start` ascending, each carrying its
    /// author-joined comment forest. Implementations must use a bounded
    /// number of queries per map, not one per session or per comment.
    async fn sessions_for_map(&mut self, map: MapId) -> anyhow::Result<Vec<FullSessionDoc>>;

    /// Inserts a comment. Performs no window check; that is the hub's job so
    /// it applies uniformly to every entry point.
    async fn create_comment(&mut self, comment: NewComment) -> anyhow::Result<CommentId>;

    async fn update_comment(
        &mut self,
        id: CommentId,
        content: String,
    ) -> anyhow::Result<Option<Comment>>;

    /// Deletes a comment and, transitively, its replies. `false` when the
    /// comment does not exist.
    async fn delete_comment(&mut self, id: CommentId) -> anyhow::Result<bool>;

    async fn comment_by_id(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>>;

    async fn comments_for_session(&mut self, id: SessionId) -> anyhow::Result<Vec<Comment>>;

    /// Re-fetches the joined record after an insert; the raw row carries no
    /// denormalized author fields.
    async fn comment_with_author(
        &mut self,
        id: CommentId,
    ) -> anyhow::Result<Option<CommentWithAuthor>>;
}

/// Hands out a [`Store`] per unit of work, so concurrent event handlers never
/// serialize on a single connection.
#[async_trait]
pub trait StorePool: Clone + Send + Sync + 'static {
    type Conn: Store + Send;

    async fn acquire(&self) -> anyhow::Result<Self::Conn>;
}
