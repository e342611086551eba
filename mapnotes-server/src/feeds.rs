use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::Message;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use mapnotes_api::{ClientEvent, Dispatch, Error, ServerEvent, StorePool, UserIdentity};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound slots per subscriber. A subscriber that falls this far behind is
/// dropped rather than buffered without bound.
const FEED_BUFFER: usize = 256;

/// Registry of all subscribed connections. There is no per-map or
/// per-session topic partitioning: every subscriber receives every
/// broadcast, and filtering happens on the receiving client.
#[derive(Clone, Debug)]
pub struct SessionFeeds(Arc<RwLock<HashMap<Uuid, mpsc::Sender<ServerEvent>>>>);

impl SessionFeeds {
    pub fn new() -> SessionFeeds {
        SessionFeeds(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Subscribes an authenticated connection and starts its relayer task.
    /// The task forwards broadcasts to the socket and handles inbound events
    /// against a store acquired per event, so handlers for different
    /// connections only ever meet inside the store.
    pub async fn add_conn<W, R, P>(self, user: UserIdentity, mut write: W, read: R, pool: P)
    where
        W: 'static + Send + Unpin + futures::Sink<Message>,
        <W as futures::Sink<Message>>::Error: Send,
        R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
        P: StorePool,
    {
        let (sender, mut receiver) = mpsc::channel(FEED_BUFFER);
        let conn_id = Uuid::new_v4();

        self.0.write().await.insert(conn_id, sender);

        let this = self.clone();
        let mut read = read.fuse();
        tokio::spawn(async move {
            macro_rules! remove_self {
                () => {{
                    this.0.write().await.remove(&conn_id);
                    return
                }};
            }
            macro_rules! send_message {
                ( $msg:expr ) => {{
                    let msg: ServerEvent = $msg;
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::error!(?err, ?msg, "failed serializing message to json");
                            continue;
                        }
                    };
                    if let Err(_) = write.send(Message::Text(json)).await {
                        remove_self!();
                    }
                }};
            }
            loop {
                tokio::select! {
                    msg = receiver.recv() => match msg {
                        None => remove_self!(),
                        Some(msg) => send_message!(msg),
                    },
                    msg = read.next() => match msg {
                        None => remove_self!(),
                        Some(Ok(Message::Close(_))) => remove_self!(),
                        Some(Ok(Message::Text(msg))) => {
                            if msg == "ping" {
                                send_message!(ServerEvent::Pong);
                                continue;
                            }
                            let event: ClientEvent = match serde_json::from_str(&msg) {
                                Ok(event) => event,
                                Err(err) => {
                                    tracing::warn!(?err, "unparseable message from client: {msg:?}");
                                    remove_self!()
                                }
                            };
                            match this.dispatch_event(&user, event, &pool).await {
                                None => continue,
                                Some(reply) => send_message!(reply),
                            }
                        }
                        Some(msg) => {
                            tracing::warn!("received unexpected message from client: {msg:?}");
                            remove_self!();
                        }
                    },
                }
            }
        });
    }

    /// Handles one inbound event. A broadcast outcome is fanned out through
    /// the registry (the sender's own relayer included); a reply outcome is
    /// returned for the caller to write on its socket alone.
    async fn dispatch_event<P: StorePool>(
        &self,
        user: &UserIdentity,
        event: ClientEvent,
        pool: &P,
    ) -> Option<ServerEvent> {
        let mut store = match pool.acquire().await {
            Ok(store) => store,
            Err(err) => {
                tracing::error!(?err, "failed acquiring store for event");
                return Some(event.failure_reply(Error::Storage.to_string()));
            }
        };
        match event.handle(&mut store, user, Utc::now()).await {
            Dispatch::Reply(msg) => Some(msg),
            Dispatch::Broadcast(msg) => {
                self.broadcast(msg).await;
                None
            }
        }
    }

    /// Fans a committed event out to every subscriber. Subscribers with a
    /// full or closed channel are removed; each accepted mutation reaches a
    /// given subscriber at most once.
    pub async fn broadcast(&self, msg: ServerEvent) {
        let mut stale = Vec::new();
        for (conn_id, sender) in self.0.read().await.iter() {
            match sender.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(conn = %conn_id, "subscriber fell behind, dropping it");
                    stale.push(*conn_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stale.push(*conn_id),
            }
        }
        if !stale.is_empty() {
            let mut subs = self.0.write().await;
            for conn_id in stale {
                subs.remove(&conn_id);
            }
        }
    }

    pub async fn num_subscribers(&self) -> usize {
        self.0.read().await.len()
    }
}
