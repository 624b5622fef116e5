//! Request/response channel between the HTTP gateway and the identity service.

use std::fmt;

use anyhow::anyhow;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{IdentityError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Hello,
    Register,
    Login,
    Guest,
    UpdatePassword,
    RequestPasswordReset,
    ResetPassword,
    GetProfile,
    UpdateProfile,
    FindUser,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Hello => "hellofromapi",
            Topic::Register => "register",
            Topic::Login => "login",
            Topic::Guest => "guest",
            Topic::UpdatePassword => "update-password",
            Topic::RequestPasswordReset => "request-password-reset",
            Topic::ResetPassword => "reset-password",
            Topic::GetProfile => "get-profile",
            Topic::UpdateProfile => "update-profile",
            Topic::FindUser => "get-user-by-username",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Reply = oneshot::Sender<Result<Value>>;

#[derive(Debug)]
pub struct AccountRequest {
    pub topic: Topic,
    pub body: Value,
    pub reply: Reply,
}

/// Sending half held by the gateway.
#[derive(Clone)]
pub struct AccountClient {
    tx: mpsc::Sender<AccountRequest>,
}

impl AccountClient {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AccountRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Sends `body` on `topic` and waits for the service's reply.
    pub async fn send(&self, topic: Topic, body: Value) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(AccountRequest { topic, body, reply })
            .await
            .map_err(|_| IdentityError::Internal(anyhow!("account listener is not running")))?;
        response.await.map_err(|_| {
            IdentityError::Internal(anyhow!("account listener dropped the {topic} request"))
        })?
    }
}
