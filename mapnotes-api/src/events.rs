//! Wire events and the hub's event-handling core.
//!
//! Inbound events arrive as `{"event": <name>, "data": <payload>}` frames
//! with untrusted payloads; outbound events carry either the committed
//! record or a plain error string on the same channel, so clients
//! discriminate by runtime type. Handling an event never terminates the
//! connection: every failure becomes a reply to the sender, every success a
//! broadcast to all subscribers.

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::{
    CommentId, CommentSession, CommentWithAuthor, Error, MapId, NewComment, NewSession, SessionId,
    SessionPatch, Store, Time, UserId, UserIdentity, ValidationError, COMMENT_SCHEMA,
    SESSION_SCHEMA,
};

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "postComment")]
    PostComment(Value),
    #[serde(rename = "saveSession")]
    SaveSession(Value),
    #[serde(rename = "deleteSession")]
    DeleteSession(Value),
}

/// Success payload or plain error string, serialized without a wrapper.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum Payload<T> {
    Ok(T),
    Err(String),
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "recieveComment")]
    RecieveComment(Payload<CommentWithAuthor>),
    #[serde(rename = "recieveSession")]
    RecieveSession(Payload<CommentSession>),
    #[serde(rename = "recieveDeleteSession")]
    RecieveDeleteSession(Payload<SessionId>),
}

/// Where the outcome of a handled event goes: back to the sender only, or to
/// every subscribed connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    Reply(ServerEvent),
    Broadcast(ServerEvent),
}

impl ClientEvent {
    /// Runs the event against the store and decides its dispatch. Mutations
    /// are broadcast only after they are durably committed; failures reply
    /// to the sender on the matching outbound event.
    pub async fn handle<S: Store + Send + ?Sized>(
        self,
        store: &mut S,
        user: &UserIdentity,
        now: Time,
    ) -> Dispatch {
        match self {
            ClientEvent::PostComment(payload) => {
                match post_comment(store, now, payload).await {
                    Ok(comment) => {
                        Dispatch::Broadcast(ServerEvent::RecieveComment(Payload::Ok(comment)))
                    }
                    Err(e) => {
                        Dispatch::Reply(ServerEvent::RecieveComment(Payload::Err(e.to_string())))
                    }
                }
            }
            ClientEvent::SaveSession(payload) => {
                match save_session(store, user, payload).await {
                    Ok(session) => {
                        Dispatch::Broadcast(ServerEvent::RecieveSession(Payload::Ok(session)))
                    }
                    Err(e) => {
                        Dispatch::Reply(ServerEvent::RecieveSession(Payload::Err(e.to_string())))
                    }
                }
            }
            ClientEvent::DeleteSession(payload) => {
                match delete_session(store, user, payload).await {
                    Ok(id) => {
                        Dispatch::Broadcast(ServerEvent::RecieveDeleteSession(Payload::Ok(id)))
                    }
                    Err(e) => Dispatch::Reply(ServerEvent::RecieveDeleteSession(Payload::Err(
                        e.to_string(),
                    ))),
                }
            }
        }
    }

    /// The reply used when the event could not even reach a store.
    pub fn failure_reply(&self, message: String) -> ServerEvent {
        match self {
            ClientEvent::PostComment(_) => ServerEvent::RecieveComment(Payload::Err(message)),
            ClientEvent::SaveSession(_) => ServerEvent::RecieveSession(Payload::Err(message)),
            ClientEvent::DeleteSession(_) => {
                ServerEvent::RecieveDeleteSession(Payload::Err(message))
            }
        }
    }
}

fn storage(err: anyhow::Error) -> Error {
    tracing::error!(?err, "store operation failed");
    Error::Storage
}

async fn post_comment<S: Store + Send + ?Sized>(
    store: &mut S,
    now: Time,
    payload: Value,
) -> Result<CommentWithAuthor, Error> {
    let fields = COMMENT_SCHEMA.validate(&payload)?;
    let comment = NewComment {
        content: text_field(&fields, "content"),
        x: opt_int_field(&fields, "x")?,
        y: opt_int_field(&fields, "y")?,
        user_id: UserId(int_field(&fields, "userId")?),
        comment_session_id: SessionId(int_field(&fields, "commentsessionId")?),
        reply_id: opt_int_field(&fields, "replyId")?.map(CommentId),
    };

    let session = store
        .session_by_id(comment.comment_session_id)
        .await
        .map_err(storage)?
        .ok_or(Error::SessionNotFound)?;
    // Window check and insert are two store calls; a session may expire in
    // between. Accepted tradeoff, see DESIGN.md.
    if session.is_expired(now) {
        return Err(Error::SessionExpired);
    }
    if session.is_pending(now) {
        return Err(Error::SessionNotStarted);
    }

    // A reply tree never spans sessions
    if let Some(parent) = comment.reply_id {
        match store.comment_by_id(parent).await.map_err(storage)? {
            Some(p) if p.comment_session_id == comment.comment_session_id => {}
            _ => return Err(ValidationError::invalid("replyId").into()),
        }
    }

    let id = store.create_comment(comment).await.map_err(storage)?;
    store
        .comment_with_author(id)
        .await
        .map_err(storage)?
        .ok_or(Error::Storage)
}

async fn save_session<S: Store + Send + ?Sized>(
    store: &mut S,
    user: &UserIdentity,
    payload: Value,
) -> Result<CommentSession, Error> {
    let fields = SESSION_SCHEMA.validate(&payload)?;
    if !user.is_admin {
        return Err(Error::PermissionDenied);
    }
    let id = SessionId(int_field(&fields, "id")?);
    let name = text_field(&fields, "name");
    let start = time_field(&fields, "start")?;
    let expires = time_field(&fields, "expires")?;
    if expires < start {
        return Err(ValidationError::invalid("expires").into());
    }

    let id = if id.is_temp() {
        store
            .create_session(NewSession {
                name,
                map_id: MapId(int_field(&fields, "mapId")?),
                start,
                expires,
            })
            .await
            .map_err(storage)?
    } else {
        store
            .update_session(
                id,
                SessionPatch {
                    name: Some(name),
                    start: Some(start),
                    expires: Some(expires),
                },
            )
            .await
            .map_err(storage)?
            .ok_or(Error::SessionNotFound)?;
        id
    };

    store
        .session_by_id(id)
        .await
        .map_err(storage)?
        .ok_or(Error::Storage)
}

async fn delete_session<S: Store + Send + ?Sized>(
    store: &mut S,
    user: &UserIdentity,
    payload: Value,
) -> Result<SessionId, Error> {
    let id = payload
        .as_i64()
        .and_then(|id| i32::try_from(id).ok())
        .ok_or(Error::SessionIdNotNumeric)?;
    if !user.is_admin {
        return Err(Error::PermissionDenied);
    }
    if store.delete_session(SessionId(id)).await.map_err(storage)? {
        Ok(SessionId(id))
    } else {
        Err(Error::UnknownSessionId)
    }
}

/// A validated text field. Optional fields come back as the empty string.
fn text_field(fields: &Map<String, Value>, name: &str) -> String {
    match fields.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

fn int_field(fields: &Map<String, Value>, name: &str) -> Result<i32, ValidationError> {
    match fields.get(name) {
        Some(Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ValidationError::invalid(name))
}

/// Numeric field that may be absent (validated to `""`) or the wire literal
/// `"null"`; both mean "not set".
fn opt_int_field(fields: &Map<String, Value>, name: &str) -> Result<Option<i32>, ValidationError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() || s == "null" => Ok(None),
        _ => int_field(fields, name).map(Some),
    }
}

fn time_field(fields: &Map<String, Value>, name: &str) -> Result<Time, ValidationError> {
    let text = text_field(fields, name);
    parse_wire_time(&text).ok_or_else(|| ValidationError::invalid(name))
}

/// Date-time strings arrive either as RFC 3339 or as a bare
/// `YYYY-MM-DD hh:mm[:ss]`, which is taken as UTC.
fn parse_wire_time(s: &str) -> Option<Time> {
    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Utc.from_local_datetime(&naive).single();
        }
    }
    None
}
