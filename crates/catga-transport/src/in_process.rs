//! In-process transport (spec §4.G): "a typed subject table mapping
//! messageType -> [subscriber]; dispatch is synchronous on a worker
//! pool." Synchronous-on-a-worker-pool is expressed here as one
//! `tokio::spawn` per deliverable handler, joined before `publish`
//! returns — the caller observes the same "all handlers ran" guarantee
//! a thread-pool dispatch would give, without blocking a single
//! worker thread per subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{MessageHandler, SubscriptionHandle, Transport, TransportContext, TransportError};

struct Subscriber {
    queue_group: Option<String>,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
pub struct InProcessTransport {
    subscribers: DashMap<String, Vec<Subscriber>>,
    round_robin: DashMap<String, AtomicUsize>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_in_group(&self, subject: &str, group: &str, len: usize) -> usize {
        let key = format!("{subject}::{group}");
        let counter = self.round_robin.entry(key).or_insert_with(|| AtomicUsize::new(0));
        counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>, ctx: TransportContext) -> Result<(), TransportError> {
        let Some(subs) = self.subscribers.get(subject) else {
            return Ok(());
        };

        let mut broadcast = Vec::new();
        let mut grouped: HashMap<String, Vec<Arc<dyn MessageHandler>>> = HashMap::new();
        for s in subs.iter() {
            match &s.queue_group {
                None => broadcast.push(s.handler.clone()),
                Some(g) => grouped.entry(g.clone()).or_default().push(s.handler.clone()),
            }
        }
        drop(subs);

        let mut targets = broadcast;
        for (group, members) in grouped {
            let idx = self.next_in_group(subject, &group, members.len());
            targets.push(members[idx].clone());
        }

        let mut tasks = Vec::with_capacity(targets.len());
        for handler in targets {
            let payload = payload.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move { handler.handle(payload, ctx).await }));
        }
        for task in tasks {
            task.await.map_err(|e| TransportError::Backend(e.to_string()))??;
        }
        Ok(())
    }

    async fn send_and_receive(
        &self,
        subject: &str,
        payload: Vec<u8>,
        ctx: TransportContext,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let Some(subs) = self.subscribers.get(subject) else {
            return Err(TransportError::NoSubscriber(subject.to_string()));
        };
        let handler = subs.first().map(|s| s.handler.clone()).ok_or_else(|| TransportError::NoSubscriber(subject.to_string()))?;
        drop(subs);

        let fut = handler.handle(payload, ctx);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(Some(bytes))) => Ok(bytes),
            Ok(Ok(None)) => Ok(Vec::new()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, TransportError> {
        self.subscribers
            .entry(subject.to_string())
            .or_default()
            .push(Subscriber { queue_group: queue_group.map(str::to_string), handler });
        Ok(SubscriptionHandle { subject: subject.to_string(), queue_group: queue_group.map(str::to_string) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Echo(Arc<AtomicU32>);

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, payload: Vec<u8>, _ctx: TransportContext) -> Result<Option<Vec<u8>>, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Some(payload))
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_all_broadcast_subscribers() {
        let transport = InProcessTransport::new();
        let calls_a = Arc::new(AtomicU32::new(0));
        let calls_b = Arc::new(AtomicU32::new(0));
        transport.subscribe("catga.event.OrderCreated", None, Arc::new(Echo(calls_a.clone()))).await.unwrap();
        transport.subscribe("catga.event.OrderCreated", None, Arc::new(Echo(calls_b.clone()))).await.unwrap();

        let ctx = TransportContext::new("m1", "OrderCreated");
        transport.publish("catga.event.OrderCreated", b"payload".to_vec(), ctx).await.unwrap();

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_group_delivers_to_exactly_one_member() {
        let transport = InProcessTransport::new();
        let calls_a = Arc::new(AtomicU32::new(0));
        let calls_b = Arc::new(AtomicU32::new(0));
        transport.subscribe("catga.request.Ping", Some("workers"), Arc::new(Echo(calls_a.clone()))).await.unwrap();
        transport.subscribe("catga.request.Ping", Some("workers"), Arc::new(Echo(calls_b.clone()))).await.unwrap();

        for _ in 0..4 {
            let ctx = TransportContext::new("m", "Ping");
            transport.publish("catga.request.Ping", b"x".to_vec(), ctx).await.unwrap();
        }

        // Round-robin across the single queue group: both members get
        // some deliveries, total equals the number of publishes.
        assert_eq!(calls_a.load(Ordering::SeqCst) + calls_b.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn send_and_receive_returns_handler_response() {
        let transport = InProcessTransport::new();
        transport
            .subscribe("catga.request.Ping", None, Arc::new(Echo(Arc::new(AtomicU32::new(0)))))
            .await
            .unwrap();
        let ctx = TransportContext::new("m2", "Ping");
        let resp = transport
            .send_and_receive("catga.request.Ping", b"hi".to_vec(), ctx, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(resp, b"hi");
    }

    #[tokio::test]
    async fn send_and_receive_with_no_subscriber_fails() {
        let transport = InProcessTransport::new();
        let ctx = TransportContext::new("m3", "Unregistered");
        let err = transport
            .send_and_receive("catga.request.Unregistered", b"hi".to_vec(), ctx, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoSubscriber(_)));
    }
}
