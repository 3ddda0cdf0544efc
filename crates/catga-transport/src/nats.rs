//! NATS-style backend (spec §4.G, §6): subject `catga.<kind>.<typeFqn>`,
//! queue group equal to the handler's type name for load-balanced
//! consumers, request/reply via a NATS reply subject carrying the
//! correlation id.

use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{error, warn};

use crate::{MessageHandler, SubscriptionHandle, Transport, TransportContext, TransportError};

pub struct NatsTransport {
    client: Client,
}

impl NatsTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn headers_for(ctx: &TransportContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in ctx.to_wire_headers() {
            headers.insert(k.as_str(), v.as_str());
        }
        headers
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>, ctx: TransportContext) -> Result<(), TransportError> {
        self.client
            .publish_with_headers(subject.to_string(), Self::headers_for(&ctx), payload.into())
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        self.client.flush().await.map_err(|e| TransportError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn send_and_receive(
        &self,
        subject: &str,
        payload: Vec<u8>,
        ctx: TransportContext,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let request = async_nats::Request::new().headers(Self::headers_for(&ctx)).payload(payload.into());
        match tokio::time::timeout(timeout, self.client.send_request(subject.to_string(), request)).await {
            Ok(Ok(message)) => Ok(message.payload.to_vec()),
            Ok(Err(e)) => Err(TransportError::Backend(e.to_string())),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, TransportError> {
        let client = self.client.clone();
        let mut subscriber = match queue_group {
            Some(group) => client
                .queue_subscribe(subject.to_string(), group.to_string())
                .await
                .map_err(|e| TransportError::Backend(e.to_string()))?,
            None => client.subscribe(subject.to_string()).await.map_err(|e| TransportError::Backend(e.to_string()))?,
        };

        let subject_owned = subject.to_string();
        let group_owned = queue_group.map(str::to_string);
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let reply_to = message.reply.clone();
                let ctx = TransportContext::new(uuid::Uuid::new_v4().to_string(), subject_owned.clone());
                let result = handler.handle(message.payload.to_vec(), ctx).await;
                match (result, reply_to) {
                    (Ok(Some(bytes)), Some(reply)) => {
                        if let Err(e) = client.publish(reply, bytes.into()).await {
                            error!(subject = %subject_owned, error = %e, "failed to publish NATS reply");
                        }
                    }
                    (Err(e), _) => warn!(subject = %subject_owned, error = %e, "NATS handler failed"),
                    _ => {}
                }
            }
        });

        Ok(SubscriptionHandle { subject: subject.to_string(), queue_group: group_owned })
    }
}
