use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use mapnotes_api::{
    build_forest, AccessGuard, Author, Comment, CommentId, CommentSession, CommentWithAuthor,
    FullSessionDoc, MapId, NewComment, NewSession, SessionId, SessionPatch, Store, StorePool,
    UserId, UserIdentity,
};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::extractors::{PgConn, PgPool};

fn session_from_row(r: &PgRow) -> anyhow::Result<CommentSession> {
    Ok(CommentSession {
        id: SessionId(r.try_get("id").context("retrieving the id field")?),
        name: r.try_get("name").context("retrieving the name field")?,
        map_id: MapId(r.try_get("map_id").context("retrieving the map_id field")?),
        start: r
            .try_get::<chrono::NaiveDateTime, _>("start")
            .context("retrieving the start field")?
            .and_local_timezone(Utc)
            .unwrap(),
        expires: r
            .try_get::<chrono::NaiveDateTime, _>("expires")
            .context("retrieving the expires field")?
            .and_local_timezone(Utc)
            .unwrap(),
    })
}

fn comment_from_row(r: &PgRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: CommentId(r.try_get("id").context("retrieving the id field")?),
        content: r.try_get("content").context("retrieving the content field")?,
        x: r.try_get("x").context("retrieving the x field")?,
        y: r.try_get("y").context("retrieving the y field")?,
        user_id: UserId(r.try_get("user_id").context("retrieving the user_id field")?),
        comment_session_id: SessionId(
            r.try_get("comment_session_id")
                .context("retrieving the comment_session_id field")?,
        ),
        reply_id: r
            .try_get::<Option<i32>, _>("reply_id")
            .context("retrieving the reply_id field")?
            .map(CommentId),
        timestamp: r
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .context("retrieving the created_at field")?
            .and_local_timezone(Utc)
            .unwrap(),
    })
}

fn joined_from_row(r: &PgRow) -> anyhow::Result<CommentWithAuthor> {
    let comment = comment_from_row(r)?;
    let first_name: Option<String> = r
        .try_get("first_name")
        .context("retrieving the first_name field")?;
    let author = match first_name {
        None => None,
        Some(first_name) => Some(Author {
            first_name,
            last_name: r
                .try_get("last_name")
                .context("retrieving the last_name field")?,
            avatar_url: r
                .try_get("avatar_url")
                .context("retrieving the avatar_url field")?,
        }),
    };
    Ok(CommentWithAuthor { comment, author })
}

const JOINED_COMMENT_FIELDS: &str = "
    c.id, c.content, c.x, c.y, c.user_id, c.comment_session_id, c.reply_id, c.created_at,
    u.first_name, u.last_name, u.avatar_url
";

#[async_trait]
impl Store for PgConn {
    async fn create_session(&mut self, session: NewSession) -> anyhow::Result<SessionId> {
        let row = sqlx::query(
            "
                INSERT INTO comment_sessions (name, map_id, start, expires)
                VALUES ($1, $2, $3, $4)
                RETURNING id
            ",
        )
        .bind(&session.name)
        .bind(session.map_id.0)
        .bind(session.start.naive_utc())
        .bind(session.expires.naive_utc())
        .fetch_one(&mut **self)
        .await
        .context("inserting comment session")?;
        Ok(SessionId(
            row.try_get("id").context("retrieving the id field")?,
        ))
    }

    async fn update_session(
        &mut self,
        id: SessionId,
        patch: SessionPatch,
    ) -> anyhow::Result<Option<CommentSession>> {
        let row = sqlx::query(
            "
                UPDATE comment_sessions
                SET name = COALESCE($2, name),
                    start = COALESCE($3, start),
                    expires = COALESCE($4, expires)
                WHERE id = $1
                RETURNING id, name, map_id, start, expires
            ",
        )
        .bind(id.0)
        .bind(patch.name)
        .bind(patch.start.map(|t| t.naive_utc()))
        .bind(patch.expires.map(|t| t.naive_utc()))
        .fetch_optional(&mut **self)
        .await
        .context("updating comment session")?;
        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn delete_session(&mut self, id: SessionId) -> anyhow::Result<bool> {
        // Comments go with the session through the FK cascade
        let res = sqlx::query("DELETE FROM comment_sessions WHERE id = $1")
            .bind(id.0)
            .execute(&mut **self)
            .await
            .context("deleting comment session")?;
        Ok(res.rows_affected() > 0)
    }

    async fn session_by_id(&mut self, id: SessionId) -> anyhow::Result<Option<CommentSession>> {
        let row = sqlx::query(
            "SELECT id, name, map_id, start, expires FROM comment_sessions WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut **self)
        .await
        .context("querying comment_sessions table")?;
        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn sessions_for_map(&mut self, map: MapId) -> anyhow::Result<Vec<FullSessionDoc>> {
        // Two queries for the whole map, however many sessions it has
        let sessions = sqlx::query(
            "
                SELECT id, name, map_id, start, expires
                FROM comment_sessions
                WHERE map_id = $1
                ORDER BY start ASC
            ",
        )
        .bind(map.0)
        .fetch_all(&mut **self)
        .await
        .context("querying comment_sessions table")?
        .iter()
        .map(session_from_row)
        .collect::<anyhow::Result<Vec<CommentSession>>>()?;

        let comment_rows = sqlx::query(&format!(
            "
                SELECT {JOINED_COMMENT_FIELDS}
                FROM comments c
                INNER JOIN comment_sessions s ON s.id = c.comment_session_id
                LEFT JOIN users u ON u.id = c.user_id
                WHERE s.map_id = $1
                ORDER BY c.created_at ASC
            ",
        ))
        .bind(map.0)
        .fetch_all(&mut **self)
        .await
        .context("querying comments for map")?;

        let mut by_session: HashMap<SessionId, Vec<CommentWithAuthor>> = HashMap::new();
        for row in &comment_rows {
            let joined = joined_from_row(row)?;
            by_session
                .entry(joined.comment.comment_session_id)
                .or_insert_with(Vec::new)
                .push(joined);
        }

        Ok(sessions
            .into_iter()
            .map(|session| {
                let comments = by_session.remove(&session.id).unwrap_or_default();
                FullSessionDoc {
                    session,
                    comments: build_forest(comments),
                }
            })
            .collect())
    }

    async fn create_comment(&mut self, comment: NewComment) -> anyhow::Result<CommentId> {
        let row = sqlx::query(
            "
                INSERT INTO comments (content, x, y, user_id, comment_session_id, reply_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
            ",
        )
        .bind(&comment.content)
        .bind(comment.x)
        .bind(comment.y)
        .bind(comment.user_id.0)
        .bind(comment.comment_session_id.0)
        .bind(comment.reply_id.map(|id| id.0))
        .fetch_one(&mut **self)
        .await
        .context("inserting comment")?;
        Ok(CommentId(
            row.try_get("id").context("retrieving the id field")?,
        ))
    }

    async fn update_comment(
        &mut self,
        id: CommentId,
        content: String,
    ) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query(
            "
                UPDATE comments SET content = $2 WHERE id = $1
                RETURNING id, content, x, y, user_id, comment_session_id, reply_id, created_at
            ",
        )
        .bind(id.0)
        .bind(content)
        .fetch_optional(&mut **self)
        .await
        .context("updating comment")?;
        row.map(|r| comment_from_row(&r)).transpose()
    }

    async fn delete_comment(&mut self, id: CommentId) -> anyhow::Result<bool> {
        // reply_id cascades, so the whole reply chain under this comment goes
        let res = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id.0)
            .execute(&mut **self)
            .await
            .context("deleting comment")?;
        Ok(res.rows_affected() > 0)
    }

    async fn comment_by_id(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query(
            "
                SELECT id, content, x, y, user_id, comment_session_id, reply_id, created_at
                FROM comments WHERE id = $1
            ",
        )
        .bind(id.0)
        .fetch_optional(&mut **self)
        .await
        .context("querying comments table")?;
        row.map(|r| comment_from_row(&r)).transpose()
    }

    async fn comments_for_session(&mut self, id: SessionId) -> anyhow::Result<Vec<Comment>> {
        sqlx::query(
            "
                SELECT id, content, x, y, user_id, comment_session_id, reply_id, created_at
                FROM comments
                WHERE comment_session_id = $1
                ORDER BY created_at ASC
            ",
        )
        .bind(id.0)
        .fetch_all(&mut **self)
        .await
        .context("querying comments table")?
        .iter()
        .map(comment_from_row)
        .collect()
    }

    async fn comment_with_author(
        &mut self,
        id: CommentId,
    ) -> anyhow::Result<Option<CommentWithAuthor>> {
        let row = sqlx::query(&format!(
            "
                SELECT {JOINED_COMMENT_FIELDS}
                FROM comments c
                LEFT JOIN users u ON u.id = c.user_id
                WHERE c.id = $1
            ",
        ))
        .bind(id.0)
        .fetch_optional(&mut **self)
        .await
        .context("querying joined comment")?;
        row.map(|r| joined_from_row(&r)).transpose()
    }
}

/// Access guard backed by the `user_tokens` table. The rest of the system
/// only sees the [`AccessGuard`] trait and the verified identity.
#[derive(Clone, Debug)]
pub struct TokenGuard(PgPool);

impl TokenGuard {
    pub fn new(pool: PgPool) -> TokenGuard {
        TokenGuard(pool)
    }
}

#[async_trait]
impl AccessGuard for TokenGuard {
    async fn identify(&self, token: &str) -> anyhow::Result<Option<UserIdentity>> {
        let mut conn = StorePool::acquire(&self.0).await?;
        let row = sqlx::query(
            "
                SELECT u.id, u.first_name, u.last_name, u.avatar_url, u.is_admin
                FROM user_tokens t
                INNER JOIN users u ON u.id = t.user_id
                WHERE t.token = $1
            ",
        )
        .bind(token)
        .fetch_optional(&mut *conn)
        .await
        .context("querying user_tokens table")?;
        row.map(|r| {
            Ok(UserIdentity {
                id: UserId(r.try_get("id").context("retrieving the id field")?),
                first_name: r
                    .try_get("first_name")
                    .context("retrieving the first_name field")?,
                last_name: r
                    .try_get("last_name")
                    .context("retrieving the last_name field")?,
                avatar_url: r
                    .try_get("avatar_url")
                    .context("retrieving the avatar_url field")?,
                is_admin: r
                    .try_get("is_admin")
                    .context("retrieving the is_admin field")?,
            })
        })
        .transpose()
    }
}
