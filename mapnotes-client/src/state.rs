use std::collections::BTreeMap;

use crate::api::{
    CommentId, CommentSession, FullSessionDoc, Payload, ServerEvent, SessionId,
};

/// Client-held view of one map's comment sessions, seeded from the query
/// surface and kept current by applying feed broadcasts. The store stays the
/// authority; this state is only ever rebuilt or patched from what the
/// server confirms.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub sessions: Vec<FullSessionDoc>,
    pub selected: Option<SessionId>,

    /// Locally created, not-yet-persisted session placeholder (id `-1`).
    /// Discarded as soon as any real session is confirmed by the server.
    pub temp: Option<CommentSession>,

    /// Last error string received on the feed, for the UI to surface.
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn seed(sessions: Vec<FullSessionDoc>) -> SessionState {
        SessionState {
            sessions,
            ..SessionState::default()
        }
    }

    pub fn select(&mut self, id: SessionId) {
        if self.sessions.iter().any(|s| s.session.id == id) {
            self.selected = Some(id);
        }
    }

    pub fn selected_session(&self) -> Option<&FullSessionDoc> {
        let id = self.selected?;
        self.sessions.iter().find(|s| s.session.id == id)
    }

    /// Stages a local placeholder session for the save dialog.
    pub fn stage_temp(&mut self, session: CommentSession) {
        self.temp = Some(CommentSession {
            id: SessionId::TEMP,
            ..session
        });
    }

    /// Applies one feed event. Unknown targets are ignored rather than
    /// treated as errors: broadcasts are global, and this state only tracks
    /// the sessions of the map currently on screen.
    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Pong => {}
            ServerEvent::RecieveComment(Payload::Ok(comment)) => {
                let key = comment.comment.reply_id.unwrap_or(CommentId::ROOT);
                let session_id = comment.comment.comment_session_id;
                match self.sessions.iter_mut().find(|s| s.session.id == session_id) {
                    Some(doc) => {
                        doc.comments.entry(key).or_insert_with(Vec::new).push(comment);
                    }
                    None => tracing::debug!(
                        session = session_id.0,
                        "dropping comment broadcast for a session of another map"
                    ),
                }
            }
            ServerEvent::RecieveSession(Payload::Ok(session)) => {
                // A confirmed session supersedes any local placeholder
                self.temp = None;
                match self
                    .sessions
                    .iter_mut()
                    .find(|s| s.session.id == session.id)
                {
                    // Replace in place; the broadcast carries no comments,
                    // so the already loaded forest is preserved
                    Some(doc) => doc.session = session,
                    None => self.sessions.push(FullSessionDoc {
                        session,
                        comments: BTreeMap::new(),
                    }),
                }
                self.sessions.sort_by_key(|s| s.session.start);
            }
            ServerEvent::RecieveDeleteSession(Payload::Ok(id)) => {
                self.sessions.retain(|s| s.session.id != id);
                if self.selected == Some(id) {
                    self.selected = None;
                }
            }
            ServerEvent::RecieveComment(Payload::Err(msg))
            | ServerEvent::RecieveSession(Payload::Err(msg))
            | ServerEvent::RecieveDeleteSession(Payload::Err(msg)) => {
                self.last_error = Some(msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Comment, CommentWithAuthor, MapId, Time, UserId};
    use chrono::{Duration, Utc};

    fn session(id: i32, start: Time) -> CommentSession {
        CommentSession {
            id: SessionId(id),
            name: format!("session {id}"),
            map_id: MapId(1),
            start,
            expires: start + Duration::hours(1),
        }
    }

    fn doc(id: i32, start: Time) -> FullSessionDoc {
        FullSessionDoc {
            session: session(id, start),
            comments: BTreeMap::new(),
        }
    }

    fn comment_event(session_id: i32, comment_id: i32, reply_id: Option<i32>) -> ServerEvent {
        ServerEvent::RecieveComment(Payload::Ok(CommentWithAuthor {
            comment: Comment {
                id: CommentId(comment_id),
                content: String::from("hi"),
                x: Some(1),
                y: Some(2),
                user_id: UserId(1),
                comment_session_id: SessionId(session_id),
                reply_id: reply_id.map(CommentId),
                timestamp: Utc::now(),
            },
            author: None,
        }))
    }

    #[test]
    fn comment_broadcast_lands_in_forest() {
        let now = Utc::now();
        let mut state = SessionState::seed(vec![doc(1, now)]);
        state.apply(comment_event(1, 10, None));
        state.apply(comment_event(1, 11, Some(10)));
        let forest = &state.sessions[0].comments;
        assert_eq!(forest[&CommentId::ROOT].len(), 1);
        assert_eq!(forest[&CommentId(10)].len(), 1);
    }

    #[test]
    fn comment_for_unknown_session_is_ignored() {
        let now = Utc::now();
        let mut state = SessionState::seed(vec![doc(1, now)]);
        state.apply(comment_event(99, 10, None));
        assert!(state.sessions[0].comments.is_empty());
    }

    #[test]
    fn new_session_broadcast_is_appended_in_start_order() {
        let now = Utc::now();
        let mut state = SessionState::seed(vec![doc(2, now + Duration::hours(2))]);
        state.apply(ServerEvent::RecieveSession(Payload::Ok(session(5, now))));
        let ids: Vec<i32> = state.sessions.iter().map(|s| s.session.id.0).collect();
        assert_eq!(ids, vec![5, 2]);
    }

    #[test]
    fn updated_session_keeps_its_loaded_forest() {
        let now = Utc::now();
        let mut state = SessionState::seed(vec![doc(1, now)]);
        state.apply(comment_event(1, 10, None));

        let mut renamed = session(1, now);
        renamed.name = String::from("renamed");
        state.apply(ServerEvent::RecieveSession(Payload::Ok(renamed)));

        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].session.name, "renamed");
        assert_eq!(state.sessions[0].comments[&CommentId::ROOT].len(), 1);
    }

    #[test]
    fn confirmed_session_discards_temp_placeholder() {
        let now = Utc::now();
        let mut state = SessionState::seed(vec![]);
        state.stage_temp(session(0, now));
        assert_eq!(state.temp.as_ref().map(|s| s.id), Some(SessionId::TEMP));

        state.apply(ServerEvent::RecieveSession(Payload::Ok(session(7, now))));
        assert!(state.temp.is_none());
        assert_eq!(state.sessions[0].session.id, SessionId(7));
    }

    #[test]
    fn delete_broadcast_removes_and_deselects() {
        let now = Utc::now();
        let mut state = SessionState::seed(vec![doc(1, now), doc(2, now + Duration::hours(2))]);
        state.select(SessionId(1));
        state.apply(ServerEvent::RecieveDeleteSession(Payload::Ok(SessionId(1))));
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.selected, None);

        // deleting the non-selected session leaves the selection alone
        state.select(SessionId(2));
        state.apply(ServerEvent::RecieveDeleteSession(Payload::Ok(SessionId(9))));
        assert_eq!(state.selected, Some(SessionId(2)));
    }

    #[test]
    fn error_payload_is_surfaced_not_applied() {
        let now = Utc::now();
        let mut state = SessionState::seed(vec![doc(1, now)]);
        state.apply(ServerEvent::RecieveComment(Payload::Err(String::from(
            "Comment Session has expired.",
        ))));
        assert!(state.sessions[0].comments.is_empty());
        assert_eq!(
            state.last_error.as_deref(),
            Some("Comment Session has expired.")
        );
    }
}
