use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;

use super::EventSink;

/// Publishes each event on the NATS subject `<prefix><topic>`.
#[derive(Clone)]
pub struct NatsSink {
    client: async_nats::Client,
    prefix: String,
}

impl NatsSink {
    pub async fn connect(url: &str, prefix: Option<&str>) -> anyhow::Result<Self> {
        let client = async_nats::connect(url)
            .await
            .with_context(|| format!("connect to NATS at {url}"))?;
        Ok(Self {
            client,
            prefix: prefix.unwrap_or_default().to_string(),
        })
    }

    fn subject(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }
}

#[async_trait]
impl EventSink for NatsSink {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.client
            .publish(self.subject(topic), Bytes::from(payload))
            .await
            .context("nats publish")?;
        Ok(())
    }
}
