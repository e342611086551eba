use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use structopt::StructOpt;
use tower_http::trace::TraceLayer;

mod db;
mod error;
mod extractors;
mod feeds;
mod handlers;
#[cfg(test)]
mod tests;

pub use error::Error;
use extractors::{AppState, PgPool};
use feeds::SessionFeeds;

#[derive(Debug, StructOpt)]
#[structopt(name = "mapnotes-server")]
struct Opt {
    /// Address to listen on
    #[structopt(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    tracing_subscriber::fmt::init();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))?;
    let db = PgPool::new(db);

    let state = AppState {
        guard: db::TokenGuard::new(db.clone()),
        feeds: SessionFeeds::new(),
        db,
    };

    let app = Router::new()
        .route("/api/maps/:map_id/sessions", get(handlers::sessions_for_map))
        .route("/api/event-feed", get(handlers::event_feed))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("listening on {}", opt.bind);
    axum::Server::bind(&opt.bind)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
