use anyhow::Context;
use axum::{
    extract::{ws::Message, Path, State, WebSocketUpgrade},
    Json,
};
use futures::{SinkExt, StreamExt};
use mapnotes_api::{AccessGuard, FullSessionDoc, MapId, Store};

use crate::{
    db::TokenGuard,
    extractors::{Auth, PgConn, PgPool},
    feeds::SessionFeeds,
    Error,
};

/// Query surface used to seed the page state before the realtime channel
/// takes over: every session of the map, start-ascending, with its comment
/// forest.
pub async fn sessions_for_map(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(map_id): Path<i32>,
) -> Result<Json<Vec<FullSessionDoc>>, Error> {
    Ok(Json(
        conn.sessions_for_map(MapId(map_id))
            .await
            .with_context(|| format!("fetching sessions of map {map_id} for {:?}", user.id))?,
    ))
}

pub async fn event_feed(
    ws: WebSocketUpgrade,
    State(db): State<PgPool>,
    State(feeds): State<SessionFeeds>,
    State(guard): State<TokenGuard>,
) -> Result<axum::response::Response, Error> {
    Ok(ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        event_feed_impl(write, read, db, feeds, guard)
    }))
}

/// The feed handshake: the first client frame is an opaque token. Only when
/// the access guard resolves it does the connection get subscribed; anything
/// else is refused before a single event is dispatched.
pub async fn event_feed_impl<W, R>(
    mut write: W,
    mut read: R,
    db: PgPool,
    feeds: SessionFeeds,
    guard: TokenGuard,
) where
    W: 'static + Send + Unpin + futures::Sink<Message>,
    <W as futures::Sink<Message>>::Error: Send,
    R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
{
    tracing::debug!("event feed websocket connected");
    if let Some(Ok(Message::Text(token))) = read.next().await {
        match guard.identify(&token).await {
            Ok(Some(user)) => {
                if let Ok(_) = write.send(Message::Text(String::from("ok"))).await {
                    tracing::debug!(user = user.id.0, "event feed websocket auth success");
                    feeds.add_conn(user, write, read, db).await;
                }
                return;
            }
            Ok(None) => {
                tracing::debug!("event feed websocket auth failure");
            }
            Err(err) => {
                tracing::error!(?err, "access guard failed while identifying token");
            }
        }
        let _ = write
            .send(Message::Text(String::from("permission denied")))
            .await;
    }
}
