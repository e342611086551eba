use async_trait::async_trait;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub i32);

/// A verified identity, attached to a connection or request by the access
/// guard before any event reaches this subsystem.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
}

impl UserIdentity {
    pub fn author(&self) -> Author {
        Author {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// The denormalized author fields carried by a joined comment record.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
}

/// External authentication collaborator. Resolves an opaque, client-supplied
/// token to a verified identity, or to `None` when the token is not
/// recognized. Connections without an identity are refused.
#[async_trait]
pub trait AccessGuard {
    async fn identify(&self, token: &str) -> anyhow::Result<Option<UserIdentity>>;
}
