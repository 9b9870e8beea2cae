use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::models::*;
use crate::{Error, Result};

pub type StoreEventStream = mpsc::UnboundedReceiver<StoreEvent>;

/// The platform purchase service as seen by [`crate::PurchaseManager`].
///
/// Payment submission and restore only enqueue work; their outcome arrives
/// later on the stream returned by [`PurchaseService::transaction_updates`].
#[async_trait]
pub trait PurchaseService: Send + Sync + 'static {
    /// Queries the catalog. Unknown identifiers go to
    /// `ProductsResponse::invalid_product_ids`.
    async fn query_products(&self, product_ids: Vec<String>) -> Result<ProductsResponse>;

    fn can_make_payments(&self) -> bool;

    fn submit_payment(&self, product: &Product) -> Result<()>;

    fn restore_completed_transactions(&self) -> Result<()>;

    /// Marks a transaction as consumed so the queue does not redeliver it.
    fn finish_transaction(&self, transaction_id: &str) -> Result<()>;

    /// Raw app receipt bytes held locally, if any. Must not touch the network.
    fn app_receipt(&self) -> Option<Vec<u8>>;

    /// Hands out the process-wide update stream. Only one caller ever gets it.
    fn transaction_updates(&self) -> Result<StoreEventStream>;
}

/// Sender/receiver pair backing a service's update stream.
pub struct StoreEventQueue {
    sender: mpsc::UnboundedSender<StoreEvent>,
    receiver: Mutex<Option<StoreEventStream>>,
}

impl StoreEventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<StoreEvent> {
        self.sender.clone()
    }

    pub fn push(&self, event: StoreEvent) {
        if self.sender.send(event).is_err() {
            tracing::warn!("store event dropped: no transaction observer");
        }
    }

    pub fn take_stream(&self) -> Result<StoreEventStream> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::ObserverAlreadyRegistered)
    }
}

impl Default for StoreEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for a callback-delivered reply, giving up after `limit`.
///
/// Backends whose platform answers through a callback use this so a reply
/// that never comes still resolves the request with a `ServiceError`.
pub async fn reply_within<T>(reply: oneshot::Receiver<Result<T>>, limit: Duration) -> Result<T> {
    match tokio::time::timeout(limit, reply).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(Error::ServiceError("request was dropped without a reply".into())),
        Err(_) => Err(Error::ServiceError(format!(
            "no reply within {}s",
            limit.as_secs_f32()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_is_handed_out_once() {
        let queue = StoreEventQueue::new();
        assert!(queue.take_stream().is_ok());
        assert!(matches!(queue.take_stream(), Err(Error::ObserverAlreadyRegistered)));
    }

    #[tokio::test]
    async fn reply_is_passed_through() {
        let (reply, response) = oneshot::channel();
        reply.send(Ok(7)).unwrap();
        assert_eq!(reply_within(response, Duration::from_secs(1)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn missing_reply_times_out_as_service_error() {
        let (_reply, response) = oneshot::channel::<Result<()>>();
        let result = reply_within(response, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::ServiceError(message)) if message.starts_with("no reply within")));
    }

    #[tokio::test]
    async fn dropped_reply_is_a_service_error() {
        let (reply, response) = oneshot::channel::<Result<()>>();
        drop(reply);
        let result = reply_within(response, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::ServiceError(_))));
    }

    #[test]
    fn pushed_events_reach_the_stream() {
        let queue = StoreEventQueue::new();
        let mut stream = queue.take_stream().unwrap();
        queue.push(StoreEvent::RestoreFinished);
        assert_eq!(stream.try_recv().unwrap(), StoreEvent::RestoreFinished);
    }
}
