use axum::extract::ws::Message;
use chrono::{Duration, Utc};
use futures::{channel::mpsc as futmpsc, StreamExt};
use mapnotes_api::{
    MapId, NewSession, Payload, ServerEvent, SessionId, Store, StorePool, UserId, UserIdentity,
};
use mapnotes_mock_server::{MockPool, MockServer};
use serde_json::json;

use crate::feeds::SessionFeeds;

fn admin() -> UserIdentity {
    UserIdentity {
        id: UserId(1),
        first_name: String::from("Ada"),
        last_name: String::from("Admin"),
        avatar_url: Some(String::from("https://example.org/ada.png")),
        is_admin: true,
    }
}

fn visitor() -> UserIdentity {
    UserIdentity {
        id: UserId(2),
        first_name: String::from("Vic"),
        last_name: String::from("Visitor"),
        avatar_url: None,
        is_admin: false,
    }
}

fn session(name: &str, start_hours: i64, expires_hours: i64) -> NewSession {
    NewSession {
        name: String::from(name),
        map_id: MapId(1),
        start: Utc::now() + Duration::hours(start_hours),
        expires: Utc::now() + Duration::hours(expires_hours),
    }
}

/// Active, pending and expired sessions on map 1, plus both users.
async fn fixture() -> (MockPool, SessionId, SessionId, SessionId) {
    let mut mock = MockServer::new();
    mock.add_user(admin());
    mock.add_user(visitor());
    let active = mock.create_session(session("launch review", -1, 1)).await.unwrap();
    let pending = mock.create_session(session("next sprint", 1, 2)).await.unwrap();
    let expired = mock.create_session(session("last sprint", -2, -1)).await.unwrap();
    (mock.shared(), active, pending, expired)
}

/// Both ends of a fake websocket whose server half is subscribed to the hub.
struct TestConn {
    to_server: futmpsc::UnboundedSender<Message>,
    from_server: futmpsc::UnboundedReceiver<Message>,
}

impl TestConn {
    async fn subscribe(feeds: &SessionFeeds, pool: &MockPool, user: UserIdentity) -> TestConn {
        let (write, from_server) = futmpsc::unbounded();
        let (to_server, read) = futmpsc::unbounded();
        feeds
            .clone()
            .add_conn(user, write, read.map(Ok::<Message, axum::Error>), pool.clone())
            .await;
        TestConn { to_server, from_server }
    }

    fn send(&self, frame: &serde_json::Value) {
        self.to_server
            .unbounded_send(Message::Text(frame.to_string()))
            .unwrap();
    }

    fn send_raw(&self, frame: &str) {
        self.to_server
            .unbounded_send(Message::Text(String::from(frame)))
            .unwrap();
    }

    async fn recv(&mut self) -> ServerEvent {
        match self.from_server.next().await {
            Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn closed(&mut self) -> bool {
        self.from_server.next().await.is_none()
    }
}

fn post_comment(session: SessionId, content: &str, user: &UserIdentity) -> serde_json::Value {
    json!({
        "event": "postComment",
        "data": {
            "content": content,
            "x": 120,
            "y": 45,
            "userId": user.id.0,
            "commentsessionId": session.0,
            "replyId": null,
        },
    })
}

#[tokio::test]
async fn map_without_sessions_reads_back_empty() {
    let (pool, ..) = fixture().await;
    let docs = pool
        .acquire()
        .await
        .unwrap()
        .sessions_for_map(MapId(2))
        .await
        .unwrap();
    assert!(docs.is_empty());
}

#[tokio::test]
async fn comment_on_pending_session_is_refused() {
    let (pool, _, pending, _) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, visitor()).await;

    conn.send(&post_comment(pending, "too early", &visitor()));
    assert_eq!(
        conn.recv().await,
        ServerEvent::RecieveComment(Payload::Err(String::from("Comment Session hasn't started")))
    );
}

#[tokio::test]
async fn comment_on_expired_session_is_refused() {
    let (pool, _, _, expired) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, visitor()).await;

    conn.send(&post_comment(expired, "too late", &visitor()));
    assert_eq!(
        conn.recv().await,
        ServerEvent::RecieveComment(Payload::Err(String::from("Comment Session has expired.")))
    );
}

#[tokio::test]
async fn comment_on_unknown_session_is_refused() {
    let (pool, ..) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, visitor()).await;

    conn.send(&post_comment(SessionId(999), "lost", &visitor()));
    assert_eq!(
        conn.recv().await,
        ServerEvent::RecieveComment(Payload::Err(String::from("Comment Session not found.")))
    );
}

#[tokio::test]
async fn accepted_comment_reaches_every_subscriber() {
    let (pool, active, _, _) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut poster = TestConn::subscribe(&feeds, &pool, visitor()).await;
    let mut watcher = TestConn::subscribe(&feeds, &pool, admin()).await;

    poster.send(&post_comment(active, "looks good here", &visitor()));

    for conn in [&mut poster, &mut watcher] {
        match conn.recv().await {
            ServerEvent::RecieveComment(Payload::Ok(c)) => {
                assert_eq!(c.comment.content, "looks good here");
                assert_eq!(c.comment.comment_session_id, active);
                assert_eq!(c.comment.x, Some(120));
                assert_eq!(c.author.as_ref().unwrap().first_name, "Vic");
            }
            other => panic!("expected a committed comment, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn invalid_content_names_the_offending_character() {
    let (pool, active, _, _) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, visitor()).await;

    conn.send(&post_comment(active, "ab$%", &visitor()));
    assert_eq!(
        conn.recv().await,
        ServerEvent::RecieveComment(Payload::Err(String::from(
            "Error: illegal character \"$\" in content."
        )))
    );
}

#[tokio::test]
async fn save_session_requires_admin() {
    let (pool, ..) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, visitor()).await;

    conn.send(&json!({
        "event": "saveSession",
        "data": {
            "id": -1,
            "mapId": 1,
            "name": "sneaky session",
            "start": "2026-09-01 09:00:00",
            "expires": "2026-09-02 09:00:00",
        },
    }));
    assert_eq!(
        conn.recv().await,
        ServerEvent::RecieveSession(Payload::Err(String::from("Permission denied.")))
    );
}

#[tokio::test]
async fn saved_session_is_broadcast_with_its_real_id() {
    let (pool, ..) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, admin()).await;
    let mut watcher = TestConn::subscribe(&feeds, &pool, visitor()).await;

    conn.send(&json!({
        "event": "saveSession",
        "data": {
            "id": -1,
            "mapId": 1,
            "name": "design review",
            "start": "2026-09-01 09:00:00",
            "expires": "2026-09-02 09:00:00",
        },
    }));
    let saved = match watcher.recv().await {
        ServerEvent::RecieveSession(Payload::Ok(s)) => s,
        other => panic!("expected a committed session, got {other:?}"),
    };
    assert!(saved.id.0 > 0);
    assert_eq!(saved.name, "design review");

    let docs = pool.acquire().await.unwrap().sessions_for_map(MapId(1)).await.unwrap();
    assert!(docs.iter().any(|d| d.session.id == saved.id));
}

#[tokio::test]
async fn deleting_a_session_cascades_and_is_idempotent_in_error() {
    let (pool, active, _, _) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, admin()).await;

    conn.send(&post_comment(active, "soon to vanish", &admin()));
    conn.recv().await;

    conn.send(&json!({ "event": "deleteSession", "data": active.0 }));
    assert_eq!(
        conn.recv().await,
        ServerEvent::RecieveDeleteSession(Payload::Ok(active))
    );
    {
        let mut store = pool.acquire().await.unwrap();
        assert!(store.session_by_id(active).await.unwrap().is_none());
        assert!(store.comments_for_session(active).await.unwrap().is_empty());
    }

    conn.send(&json!({ "event": "deleteSession", "data": active.0 }));
    assert_eq!(
        conn.recv().await,
        ServerEvent::RecieveDeleteSession(Payload::Err(String::from(
            "Invalid comment session id."
        )))
    );
}

#[tokio::test]
async fn delete_session_payload_must_be_numeric() {
    let (pool, ..) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, admin()).await;

    conn.send(&json!({ "event": "deleteSession", "data": "first one" }));
    assert_eq!(
        conn.recv().await,
        ServerEvent::RecieveDeleteSession(Payload::Err(String::from(
            "Comment session id must be a number."
        )))
    );
}

#[tokio::test]
async fn ping_is_answered_without_touching_the_store() {
    let (pool, ..) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, visitor()).await;

    conn.send_raw("ping");
    assert_eq!(conn.recv().await, ServerEvent::Pong);
}

#[tokio::test]
async fn unparseable_frame_drops_the_connection() {
    let (pool, ..) = fixture().await;
    let feeds = SessionFeeds::new();
    let mut conn = TestConn::subscribe(&feeds, &pool, visitor()).await;
    assert_eq!(feeds.num_subscribers().await, 1);

    conn.send_raw("{\"event\": \"no such event\"}");
    assert!(conn.closed().await);
    assert_eq!(feeds.num_subscribers().await, 0);
}

#[tokio::test]
async fn disconnected_subscriber_is_pruned_on_broadcast() {
    let (pool, active, _, _) = fixture().await;
    let feeds = SessionFeeds::new();
    let conn = TestConn::subscribe(&feeds, &pool, visitor()).await;
    let mut poster = TestConn::subscribe(&feeds, &pool, admin()).await;
    assert_eq!(feeds.num_subscribers().await, 2);

    drop(conn);
    poster.send(&post_comment(active, "anyone there", &admin()));
    poster.recv().await;
    // The dropped peer's relayer has exited by now; the next fan-out prunes it
    feeds
        .broadcast(ServerEvent::RecieveDeleteSession(Payload::Ok(SessionId(999))))
        .await;
    assert_eq!(feeds.num_subscribers().await, 1);
}
