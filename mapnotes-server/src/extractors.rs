use std::ops::{Deref, DerefMut};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
};
use mapnotes_api::{AccessGuard, StorePool, UserIdentity};

use crate::{db::TokenGuard, feeds::SessionFeeds, Error};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub feeds: SessionFeeds,
    pub guard: TokenGuard,
}

#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }
}

#[async_trait]
impl StorePool for PgPool {
    type Conn = PgConn;

    async fn acquire(&self) -> anyhow::Result<PgConn> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }
}

pub struct PgConn(pub sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// The opaque token supplied by the client, before the access guard has seen
/// it. Tokens are not interpreted here; anything non-empty after the bearer
/// scheme is handed to the guard verbatim.
pub struct PreAuth(pub String);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        let auth = req
            .headers
            .get(http::header::AUTHORIZATION)
            .ok_or_else(Error::permission_denied)?
            .to_str()
            .map_err(|_| Error::permission_denied())?;
        let (scheme, token) = auth.split_once(' ').ok_or_else(Error::permission_denied)?;
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
            return Err(Error::permission_denied());
        }
        Ok(PreAuth(token.to_string()))
    }
}

/// A request whose token the access guard resolved to a verified identity.
pub struct Auth(pub UserIdentity);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        let user = state
            .guard
            .identify(&token)
            .await?
            .ok_or_else(Error::permission_denied)?;
        Ok(Auth(user))
    }
}
