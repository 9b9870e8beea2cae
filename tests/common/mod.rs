#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tauri_plugin_iap_bridge::{
    BridgeMessage, Error, IapEvent, Product, ProductsResponse, PurchaseService, Result, StoreEvent,
    StoreEventQueue, StoreEventStream, StoreFailure, TransactionState, TransactionUpdate, WebSurface,
};
use tokio::sync::{mpsc, oneshot};

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(100);

pub fn product(id: &str) -> Product {
    Product {
        id: id.to_string(),
        title: format!("Title of {id}"),
        description: format!("Description of {id}"),
        price: "$0.99".to_string(),
        price_currency_code: Some("USD".to_string()),
        price_amount_micros: Some(990_000),
    }
}

#[derive(Default)]
struct StoreState {
    catalog: HashMap<String, Product>,
    restricted: bool,
    held_query: Option<oneshot::Receiver<()>>,
    failing_query: Option<String>,
    queries: usize,
    submitted: Vec<String>,
    /// Transactions in the queue that have not been finished.
    unfinished: Vec<TransactionUpdate>,
    finished: Vec<String>,
    restorable: Vec<(String, String)>,
    failing_restore: Option<String>,
    failing_submit: Option<String>,
    receipt: Option<Vec<u8>>,
}

/// Scripted purchase service. Payments stay queued until a test resolves
/// them, like a real store waiting on the user.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
    events: StoreEventQueue,
}

impl FakeStore {
    pub fn with_catalog(ids: &[&str]) -> Arc<Self> {
        let store = Arc::new(Self::default());
        {
            let mut state = store.state.lock().unwrap();
            for id in ids {
                state.catalog.insert(id.to_string(), product(id));
            }
            state.receipt = Some(b"receipt-bytes".to_vec());
        }
        store
    }

    pub fn set_restricted(&self, restricted: bool) {
        self.state.lock().unwrap().restricted = restricted;
    }

    pub fn set_receipt(&self, receipt: Option<&[u8]>) {
        self.state.lock().unwrap().receipt = receipt.map(<[u8]>::to_vec);
    }

    pub fn set_catalog_title(&self, id: &str, title: &str) {
        if let Some(product) = self.state.lock().unwrap().catalog.get_mut(id) {
            product.title = title.to_string();
        }
    }

    /// Keeps the next catalog query pending until the returned sender fires.
    pub fn hold_next_query(&self) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        self.state.lock().unwrap().held_query = Some(held);
        release
    }

    pub fn fail_next_query(&self, message: &str) {
        self.state.lock().unwrap().failing_query = Some(message.to_string());
    }

    /// Makes the next payment submission fail before anything is queued.
    pub fn fail_next_submit(&self, message: &str) {
        self.state.lock().unwrap().failing_submit = Some(message.to_string());
    }

    pub fn fail_next_restore(&self, message: &str) {
        self.state.lock().unwrap().failing_restore = Some(message.to_string());
    }

    pub fn add_restorable(&self, product_id: &str, transaction_id: &str) {
        self.state
            .lock()
            .unwrap()
            .restorable
            .push((product_id.to_string(), transaction_id.to_string()));
    }

    pub fn queries(&self) -> usize {
        self.state.lock().unwrap().queries
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.state.lock().unwrap().finished.clone()
    }

    pub fn unfinished(&self) -> Vec<TransactionUpdate> {
        self.state.lock().unwrap().unfinished.clone()
    }

    /// Puts an update into the queue and delivers it to the observer.
    pub fn deliver(&self, update: TransactionUpdate) {
        {
            let mut state = self.state.lock().unwrap();
            state.unfinished.retain(|queued| queued.transaction_id != update.transaction_id);
            state.unfinished.push(update.clone());
        }
        self.events.push(StoreEvent::Transaction(update));
    }

    pub fn complete(&self, product_id: &str, transaction_id: &str) {
        self.deliver(TransactionUpdate::new(transaction_id, product_id, TransactionState::Purchased));
    }

    pub fn cancel(&self, product_id: &str, transaction_id: &str) {
        self.deliver(TransactionUpdate::failed(
            transaction_id,
            product_id,
            StoreFailure::cancelled("The user cancelled the payment"),
        ));
    }

    pub fn defer(&self, product_id: &str, transaction_id: &str) {
        self.deliver(TransactionUpdate::new(transaction_id, product_id, TransactionState::Deferred));
    }

    /// Redelivers every transaction still in the queue, as on app relaunch.
    pub fn replay(&self) {
        for update in self.unfinished() {
            self.events.push(StoreEvent::Transaction(update));
        }
    }

    /// Redelivers one transaction even if it was finished.
    pub fn redeliver(&self, update: TransactionUpdate) {
        self.events.push(StoreEvent::Transaction(update));
    }
}

#[async_trait]
impl PurchaseService for FakeStore {
    async fn query_products(&self, product_ids: Vec<String>) -> Result<ProductsResponse> {
        let (held, failing) = {
            let mut state = self.state.lock().unwrap();
            state.queries += 1;
            (state.held_query.take(), state.failing_query.take())
        };
        if let Some(held) = held {
            let _ = held.await;
        }
        if let Some(message) = failing {
            return Err(Error::ServiceError(message));
        }

        let state = self.state.lock().unwrap();
        let mut response = ProductsResponse::default();
        for id in product_ids {
            match state.catalog.get(&id) {
                Some(product) => response.products.push(product.clone()),
                None => response.invalid_product_ids.push(id),
            }
        }
        Ok(response)
    }

    fn can_make_payments(&self) -> bool {
        !self.state.lock().unwrap().restricted
    }

    fn submit_payment(&self, product: &Product) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.failing_submit.take() {
            return Err(Error::ServiceError(message));
        }
        state.submitted.push(product.id.clone());
        Ok(())
    }

    fn restore_completed_transactions(&self) -> Result<()> {
        let (restorable, failing) = {
            let mut state = self.state.lock().unwrap();
            (state.restorable.clone(), state.failing_restore.take())
        };
        if let Some(message) = failing {
            self.events.push(StoreEvent::RestoreFailed { message });
            return Ok(());
        }
        for (product_id, transaction_id) in restorable {
            self.deliver(TransactionUpdate::new(transaction_id, product_id, TransactionState::Restored));
        }
        self.events.push(StoreEvent::RestoreFinished);
        Ok(())
    }

    fn finish_transaction(&self, transaction_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.unfinished.retain(|queued| queued.transaction_id != transaction_id);
        state.finished.push(transaction_id.to_string());
        Ok(())
    }

    fn app_receipt(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().receipt.clone()
    }

    fn transaction_updates(&self) -> Result<StoreEventStream> {
        self.events.take_stream()
    }
}

/// Web surface that records every delivered message.
pub struct RecordingSurface {
    sender: mpsc::UnboundedSender<BridgeMessage>,
}

impl RecordingSurface {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BridgeMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl WebSurface for RecordingSurface {
    fn deliver(&self, message: &BridgeMessage) -> Result<()> {
        self.sender
            .send(message.clone())
            .map_err(|_| Error::SurfaceUnavailable("recorder".into()))
    }
}

pub async fn next<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

pub async fn assert_quiet<T: std::fmt::Debug>(receiver: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(unexpected)) = tokio::time::timeout(QUIET, receiver.recv()).await {
        panic!("unexpected message: {unexpected:?}");
    }
}

/// Waits until the observer has drained everything queued so far.
pub async fn settle() {
    tokio::time::sleep(QUIET).await;
}

pub async fn loaded(events: &mut mpsc::UnboundedReceiver<IapEvent>) -> Vec<Product> {
    match next(events).await {
        IapEvent::ProductsLoaded(products) => products,
        other => panic!("expected ProductsLoaded, got {other:?}"),
    }
}
