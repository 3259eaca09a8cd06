use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// Shared-secret password check. The login user becomes the caller's owner id
/// once the handshake succeeds.
#[derive(Debug)]
pub struct RoomSyncAuthSource {
    password: String,
}

impl RoomSyncAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RoomSyncAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        debug!("password challenge issued");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
