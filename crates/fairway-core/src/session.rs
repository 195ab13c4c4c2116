//! Explicit session state.
//!
//! The current user and device identity are carried in one object with an
//! explicit init/teardown lifecycle instead of ambient globals. The session
//! persists in `sync_meta` so a restart resumes where the app left off.

use uuid::Uuid;

use crate::api::RemoteApi;
use crate::db::meta;
use crate::error::Result;
use crate::services::StoreService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Server-side user id; `None` until the first successful exchange
    pub user_id: Option<i64>,
    /// Stable device identity minted on first run
    pub device_id: String,
    pub auth_token: Option<String>,
}

impl Session {
    /// Load or establish the session at app start.
    ///
    /// Offline is not an error: the device id is minted locally and the
    /// user id is filled in on the first cycle that reaches the server.
    pub async fn init(store: &StoreService, remote: &dyn RemoteApi) -> Result<Self> {
        let mut session = Self::load(store).await?;
        if session.user_id.is_none() {
            session.attach_user(store, remote).await?;
        }
        Ok(session)
    }

    /// Read the persisted session without touching the network.
    pub async fn load(store: &StoreService) -> Result<Self> {
        let (device_id, user_id, auth_token) = store
            .with_conn(|conn| {
                let device_id = match meta::get(conn, meta::KEY_DEVICE_ID)? {
                    Some(id) => id,
                    None => {
                        let id = Uuid::now_v7().to_string();
                        meta::set(conn, meta::KEY_DEVICE_ID, &id)?;
                        id
                    }
                };
                let user_id = meta::get(conn, meta::KEY_USER_ID)?
                    .and_then(|value| value.parse::<i64>().ok());
                let auth_token = meta::get(conn, meta::KEY_AUTH_TOKEN)?;
                Ok((device_id, user_id, auth_token))
            })
            .await?;
        Ok(Self {
            user_id,
            device_id,
            auth_token,
        })
    }

    /// Resolve the server-side user, registering this device if needed.
    pub async fn attach_user(
        &mut self,
        store: &StoreService,
        remote: &dyn RemoteApi,
    ) -> Result<()> {
        let user = match remote.me().await {
            Ok(user) => user,
            Err(error) if error.is_offline() => {
                tracing::debug!("session init offline; deferring user attach");
                return Ok(());
            }
            Err(_) => match remote.create_user(&self.device_id).await {
                Ok(user) => user,
                Err(error) if error.is_transient() => {
                    tracing::debug!("user registration unavailable: {error}");
                    return Ok(());
                }
                Err(error) => return Err(error),
            },
        };

        self.user_id = Some(user.id);
        let user_id = user.id;
        store
            .with_conn(move |conn| meta::set(conn, meta::KEY_USER_ID, &user_id.to_string()))
            .await?;
        tracing::info!(user_id, "session attached to server user");
        Ok(())
    }

    /// Drop user identity at logout. The device id survives.
    pub async fn teardown(store: &StoreService) -> Result<()> {
        store
            .with_conn(|conn| {
                meta::delete(conn, meta::KEY_USER_ID)?;
                meta::delete(conn, meta::KEY_AUTH_TOKEN)?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn load_mints_a_stable_device_id() {
        let store = StoreService::open_in_memory().await.unwrap();

        let first = Session::load(&store).await.unwrap();
        let second = Session::load(&store).await.unwrap();
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first.user_id, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn teardown_clears_user_but_keeps_device() {
        let store = StoreService::open_in_memory().await.unwrap();

        let session = Session::load(&store).await.unwrap();
        store
            .with_conn(|conn| meta::set(conn, meta::KEY_USER_ID, "7"))
            .await
            .unwrap();

        Session::teardown(&store).await.unwrap();
        let reloaded = Session::load(&store).await.unwrap();
        assert_eq!(reloaded.user_id, None);
        assert_eq!(reloaded.device_id, session.device_id);
    }
}
