use chrono::Utc;

pub type Time = chrono::DateTime<Utc>;

mod comment;
mod db;
mod error;
mod events;
mod session;
mod user;
mod validate;

pub use comment::{build_forest, Comment, CommentId, CommentWithAuthor, NewComment};
pub use db::{Store, StorePool};
pub use error::Error;
pub use events::{ClientEvent, Dispatch, Payload, ServerEvent};
pub use session::{CommentSession, FullSessionDoc, NewSession, SessionId, SessionPatch};
pub use user::{AccessGuard, Author, UserId, UserIdentity};
pub use validate::{Schema, SchemaNode, ValidationError, COMMENT_SCHEMA, SESSION_SCHEMA};

/// Identifier of a map canvas. Maps themselves are managed by an external
/// collaborator; sessions only reference them.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct MapId(pub i32);
