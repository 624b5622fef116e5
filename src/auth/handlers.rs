use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, Instrument};

use crate::auth::{
    dto::{
        Ack, LoginRequest, PasswordResetRequest, PublicUser, RegisterRequest,
        ResetPasswordRequest, UpdatePasswordRequest, UpdateProfileRequest, UserRef, UserScoped,
        UsernameRef,
    },
    services::IdentityService,
};
use crate::error::{IdentityError, Result};
use crate::transport::{AccountClient, AccountRequest, Topic};

pub const HELLO: &str = "Hello from the account service!";

/// Receiving half of the account channel: answers each request on its own task.
pub struct AccountListener {
    service: Arc<IdentityService>,
    rx: mpsc::Receiver<AccountRequest>,
}

impl AccountListener {
    pub fn new(service: Arc<IdentityService>, capacity: usize) -> (Self, AccountClient) {
        let (client, rx) = AccountClient::channel(capacity);
        (Self { service, rx }, client)
    }

    pub async fn run(mut self) {
        info!("account listener started");
        while let Some(AccountRequest { topic, body, reply }) = self.rx.recv().await {
            let service = self.service.clone();
            let span = tracing::info_span!("account_message", %topic);
            tokio::spawn(
                async move {
                    let result = handle(&service, topic, body).await;
                    if let Err(e) = &result {
                        debug!(error = %e, "request failed");
                    }
                    // The gateway may have given up waiting.
                    let _ = reply.send(result);
                }
                .instrument(span),
            );
        }
        info!("account listener stopped");
    }
}

fn decode<T: DeserializeOwned>(topic: Topic, body: Value) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| IdentityError::BadRequest(format!("Invalid {topic} payload: {e}")))
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| IdentityError::Internal(e.into()))
}

/// Routes one message to the identity service.
pub async fn handle(service: &IdentityService, topic: Topic, body: Value) -> Result<Value> {
    match topic {
        Topic::Hello => Ok(Value::String(HELLO.to_string())),
        Topic::Register => {
            let user = service
                .register(decode::<RegisterRequest>(topic, body)?)
                .await?;
            encode(&PublicUser::from(&user))
        }
        Topic::Login => encode(&service.login(decode::<LoginRequest>(topic, body)?).await?),
        Topic::Guest => encode(&service.create_guest_token().await?),
        Topic::UpdatePassword => {
            let scoped: UserScoped<UpdatePasswordRequest> = decode(topic, body)?;
            service
                .update_password(scoped.user_id, scoped.request)
                .await?;
            encode(&Ack::ok())
        }
        Topic::RequestPasswordReset => {
            let request: PasswordResetRequest = decode(topic, body)?;
            service.request_password_reset(&request.email).await?;
            encode(&Ack::ok())
        }
        Topic::ResetPassword => {
            service
                .reset_password(decode::<ResetPasswordRequest>(topic, body)?)
                .await?;
            encode(&Ack::ok())
        }
        Topic::GetProfile => {
            let user: UserRef = decode(topic, body)?;
            encode(&service.get_profile(user.user_id).await?)
        }
        Topic::UpdateProfile => {
            let scoped: UserScoped<UpdateProfileRequest> = decode(topic, body)?;
            encode(
                &service
                    .update_profile(scoped.user_id, scoped.request)
                    .await?,
            )
        }
        Topic::FindUser => {
            let lookup: UsernameRef = decode(topic, body)?;
            encode(&service.get_user_by_username(&lookup.username).await?)
        }
    }
}
