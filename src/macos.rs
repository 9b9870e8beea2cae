use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tauri::{AppHandle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::models::*;
use crate::service::{reply_within, PurchaseService, StoreEventQueue, StoreEventStream};
use crate::Error;

#[swift_bridge::bridge]
mod ffi {
    pub enum FFIResult {
        Ok(String),  // json string from Swift
        Err(String), // error message from Swift
    }

    extern "Rust" {
        fn on_products_loaded(request_id: u64, json: String);
        fn on_products_failed(request_id: u64, message: String);
        fn on_store_event(json: String);
    }

    extern "Swift" {
        fn startObservingTransactions();
        fn canMakePayments() -> bool;
        fn requestProducts(requestId: u64, productIds: Vec<String>);
        fn addPayment(productId: String) -> FFIResult;
        fn restoreCompletedTransactions();
        fn finishTransaction(transactionId: String) -> FFIResult;
        fn appReceipt() -> Vec<u8>;
    }
}

/// Longest wait for a StoreKit product response before the load fails.
const PRODUCT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type ProductReply = oneshot::Sender<crate::Result<ProductsResponse>>;

/// StoreKit reports through free functions, so the observer sink is global.
static STORE_EVENTS: OnceLock<mpsc::UnboundedSender<StoreEvent>> = OnceLock::new();
static PRODUCT_REQUESTS: OnceLock<Mutex<HashMap<u64, ProductReply>>> = OnceLock::new();
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub fn init<R: Runtime>(_app: &AppHandle<R>) -> crate::Result<Arc<dyn PurchaseService>> {
    let events = StoreEventQueue::new();
    STORE_EVENTS
        .set(events.sender())
        .map_err(|_| Error::ObserverAlreadyRegistered)?;
    ffi::startObservingTransactions();
    Ok(Arc::new(StoreKit { events }))
}

/// StoreKit payment queue backend.
pub struct StoreKit {
    events: StoreEventQueue,
}

#[async_trait]
impl PurchaseService for StoreKit {
    async fn query_products(&self, product_ids: Vec<String>) -> crate::Result<ProductsResponse> {
        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        pending_requests().insert(request_id, reply);
        ffi::requestProducts(request_id, product_ids);
        let result = reply_within(response, PRODUCT_REQUEST_TIMEOUT).await;
        if pending_requests().remove(&request_id).is_some() {
            warn!(request_id, "product request timed out");
        }
        result
    }

    fn can_make_payments(&self) -> bool {
        ffi::canMakePayments()
    }

    fn submit_payment(&self, product: &Product) -> crate::Result<()> {
        to_result(ffi::addPayment(product.id.clone())).map(|_| ())
    }

    fn restore_completed_transactions(&self) -> crate::Result<()> {
        ffi::restoreCompletedTransactions();
        Ok(())
    }

    fn finish_transaction(&self, transaction_id: &str) -> crate::Result<()> {
        to_result(ffi::finishTransaction(transaction_id.to_string())).map(|_| ())
    }

    fn app_receipt(&self) -> Option<Vec<u8>> {
        let receipt = ffi::appReceipt();
        (!receipt.is_empty()).then_some(receipt)
    }

    fn transaction_updates(&self) -> crate::Result<StoreEventStream> {
        self.events.take_stream()
    }
}

/// Convert the bridged FFI result to a Rust Result.
fn to_result(bridged: ffi::FFIResult) -> crate::Result<String> {
    match bridged {
        ffi::FFIResult::Ok(response) => Ok(response),
        ffi::FFIResult::Err(err) => Err(Error::ServiceError(err)),
    }
}

fn pending_requests() -> std::sync::MutexGuard<'static, HashMap<u64, ProductReply>> {
    PRODUCT_REQUESTS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn complete_request(request_id: u64, result: crate::Result<ProductsResponse>) {
    match pending_requests().remove(&request_id) {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => warn!(request_id, "response for unknown product request"),
    }
}

fn on_products_loaded(request_id: u64, json: String) {
    let result = serde_json::from_str::<ProductsResponse>(&json).map_err(Error::from);
    complete_request(request_id, result);
}

fn on_products_failed(request_id: u64, message: String) {
    complete_request(request_id, Err(Error::ServiceError(message)));
}

fn on_store_event(json: String) {
    let event = match serde_json::from_str::<StoreEvent>(&json) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "malformed store event from StoreKit");
            return;
        }
    };
    match STORE_EVENTS.get() {
        Some(sender) => {
            if sender.send(event).is_err() {
                warn!("store event dropped: no transaction observer");
            }
        }
        None => warn!("store event before the observer was registered"),
    }
}
