//! Purchase-flow state machine over a [`PurchaseService`].
//!
//! The manager takes the service's transaction-update stream when it is
//! constructed and keeps a background task draining it until the stream
//! closes, which in practice is the life of the process. Every queued
//! transaction passes through that task, including ones this manager did
//! not start.
//!
//! Misuse that can be detected on the spot (`InvalidRequest`,
//! `ProductNotFound`, `PurchaseRestricted`, `DuplicateRequest`) is returned
//! synchronously. Every other outcome is published as an [`IapEvent`].

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RequestKind;
use crate::models::*;
use crate::service::{PurchaseService, StoreEventStream};
use crate::{Error, Result};

pub type EventReceiver = mpsc::UnboundedReceiver<IapEvent>;

pub const DEFAULT_MAX_LISTENERS: usize = 8;

/// How many reported transaction ids are remembered for redelivery checks.
const REPORTED_CAPACITY: usize = 256;

/// Destination for manager events.
///
/// Sinks are called while the event is being published, in publication
/// order, so a sink that feeds a queue keeps that order.
pub trait EventSink: Send + 'static {
    /// Takes `event`. Returns `false` once the sink is gone for good, which
    /// removes it from the listener list.
    fn send_event(&self, event: &IapEvent) -> bool;

    fn is_closed(&self) -> bool;
}

impl EventSink for mpsc::UnboundedSender<IapEvent> {
    fn send_event(&self, event: &IapEvent) -> bool {
        self.send(event.clone()).is_ok()
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

/// The one purchase allowed in flight.
struct PendingPurchase {
    product_id: String,
    /// Learned from the first queue update for the product.
    transaction_id: Option<String>,
}

impl PendingPurchase {
    fn owns(&self, product_id: &str, transaction_id: &str) -> bool {
        self.product_id == product_id
            && self
                .transaction_id
                .as_deref()
                .map_or(true, |id| id == transaction_id)
    }
}

/// Insertion-ordered set of reported transaction ids; the oldest id is
/// evicted once `capacity` is reached.
struct ReportedTransactions {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl ReportedTransactions {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records `transaction_id`, returning `false` if it is already known.
    fn insert(&mut self, transaction_id: &str) -> bool {
        if self.ids.contains(transaction_id) {
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(transaction_id.to_string());
        self.ids.insert(transaction_id.to_string());
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

impl Default for ReportedTransactions {
    fn default() -> Self {
        Self::with_capacity(REPORTED_CAPACITY)
    }
}

#[derive(Default)]
struct State {
    /// Products resolved by the latest load, keyed by identifier.
    products: HashMap<String, Product>,
    loading: bool,
    /// Restored product ids collected while a restore is in flight.
    restoring: Option<Vec<String>>,
    purchase: Option<PendingPurchase>,
    /// Transactions already reported, so a redelivery is never reported twice.
    reported: ReportedTransactions,
}

struct Listeners {
    sinks: Vec<Box<dyn EventSink>>,
    max: usize,
}

struct Shared {
    service: Arc<dyn PurchaseService>,
    state: Mutex<State>,
    listeners: Mutex<Listeners>,
}

/// Owns product loads, purchases and restores against one purchase service.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct PurchaseManager {
    shared: Arc<Shared>,
}

impl PurchaseManager {
    pub fn new(service: Arc<dyn PurchaseService>) -> Result<Self> {
        Self::with_listener_limit(service, DEFAULT_MAX_LISTENERS)
    }

    /// Creates the manager and starts the transaction observer.
    ///
    /// Fails with [`Error::ObserverAlreadyRegistered`] when another manager
    /// already observes `service`.
    pub fn with_listener_limit(service: Arc<dyn PurchaseService>, max_listeners: usize) -> Result<Self> {
        let updates = service.transaction_updates()?;
        let shared = Arc::new(Shared {
            service,
            state: Mutex::new(State::default()),
            listeners: Mutex::new(Listeners {
                sinks: Vec::new(),
                max: max_listeners,
            }),
        });
        tauri::async_runtime::spawn(observe(shared.clone(), updates));
        info!("transaction observer started");
        Ok(Self { shared })
    }

    /// Registers a listener for manager events.
    pub fn subscribe(&self) -> Result<EventReceiver> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.attach(sender)?;
        Ok(receiver)
    }

    /// Registers `sink` as a listener. It counts against the same limit as
    /// [`PurchaseManager::subscribe`].
    pub fn attach<S: EventSink>(&self, sink: S) -> Result<()> {
        let mut listeners = lock(&self.shared.listeners);
        listeners.sinks.retain(|existing| !existing.is_closed());
        if listeners.sinks.len() >= listeners.max {
            return Err(Error::TooManyListeners(listeners.max));
        }
        listeners.sinks.push(Box::new(sink));
        Ok(())
    }

    /// Starts a catalog query for `product_ids`.
    ///
    /// The product cache is cleared right away; purchases issued before the
    /// query resolves fail with `ProductNotFound`.
    pub fn load_products<I, S>(&self, product_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = product_ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(Error::InvalidRequest("no product identifiers given".into()));
        }
        if ids.iter().any(|id| id.trim().is_empty()) {
            return Err(Error::InvalidRequest("blank product identifier".into()));
        }

        {
            let mut state = self.shared.state();
            if state.loading {
                return Err(Error::DuplicateRequest(RequestKind::LoadProducts));
            }
            state.loading = true;
            state.products.clear();
        }

        debug!(count = ids.len(), "loading products");
        let shared = self.shared.clone();
        tauri::async_runtime::spawn(async move {
            let result = shared.service.query_products(ids.into_iter().collect()).await;
            shared.finish_load(result);
        });
        Ok(())
    }

    /// Submits a payment for a product resolved by a prior load.
    ///
    /// Only one purchase may be in flight. It stays in flight until the
    /// queue reports its transaction as purchased or failed, so a Deferred
    /// purchase blocks new ones.
    pub fn purchase_product(&self, product_id: &str) -> Result<()> {
        if !self.shared.service.can_make_payments() {
            return Err(Error::PurchaseRestricted);
        }

        let product = {
            let mut state = self.shared.state();
            let product = state
                .products
                .get(product_id)
                .cloned()
                .ok_or_else(|| Error::ProductNotFound(product_id.to_string()))?;
            if state.purchase.is_some() {
                return Err(Error::DuplicateRequest(RequestKind::Purchase));
            }
            state.purchase = Some(PendingPurchase {
                product_id: product.id.clone(),
                transaction_id: None,
            });
            product
        };

        info!(product_id, "submitting payment");
        if let Err(err) = self.shared.service.submit_payment(&product) {
            warn!(product_id, error = %err, "payment submission failed");
            self.shared.state().purchase = None;
            self.shared.publish(IapEvent::PurchaseFailed(err.to_string()));
        }
        Ok(())
    }

    /// Asks the service to replay every completed transaction of the account.
    pub fn restore_purchases(&self) -> Result<()> {
        {
            let mut state = self.shared.state();
            if state.restoring.is_some() {
                return Err(Error::DuplicateRequest(RequestKind::Restore));
            }
            state.restoring = Some(Vec::new());
        }

        info!("restoring purchases");
        if let Err(err) = self.shared.service.restore_completed_transactions() {
            warn!(error = %err, "restore request failed");
            self.shared.state().restoring = None;
            self.shared.publish(IapEvent::PurchaseFailed(err.to_string()));
        }
        Ok(())
    }

    pub fn can_make_payments(&self) -> bool {
        self.shared.service.can_make_payments()
    }

    /// Base64 of the locally stored app receipt, or an empty string.
    pub fn receipt_string(&self) -> String {
        self.shared.receipt_string()
    }

    /// Products cached by the latest successful load.
    pub fn products(&self) -> Vec<Product> {
        self.shared.state().products.values().cloned().collect()
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn publish(&self, event: IapEvent) {
        let mut listeners = lock(&self.listeners);
        listeners.sinks.retain(|sink| sink.send_event(&event));
        if listeners.sinks.is_empty() {
            debug!(?event, "no listener for event");
        }
    }

    fn receipt_string(&self) -> String {
        self.service
            .app_receipt()
            .map(|bytes| STANDARD.encode(bytes))
            .unwrap_or_default()
    }

    fn finish_load(&self, result: Result<ProductsResponse>) {
        let event = {
            let mut state = self.state();
            state.loading = false;
            match result {
                Ok(response) => {
                    if !response.invalid_product_ids.is_empty() {
                        debug!(invalid = ?response.invalid_product_ids, "store omitted unknown products");
                    }
                    state.products = response
                        .products
                        .iter()
                        .map(|product| (product.id.clone(), product.clone()))
                        .collect();
                    IapEvent::ProductsLoaded(response.products)
                }
                Err(err) => {
                    warn!(error = %err, "product load failed");
                    IapEvent::ProductsLoadFailed(err.to_string())
                }
            }
        };
        self.publish(event);
    }

    fn handle_store_event(&self, event: StoreEvent) {
        match event {
            StoreEvent::Transaction(update) => self.handle_update(update),
            StoreEvent::RestoreFinished => {
                let pending = self.state().restoring.take();
                match pending {
                    Some(product_ids) => {
                        info!(count = product_ids.len(), "restore completed");
                        self.publish(IapEvent::RestoreCompleted(product_ids));
                    }
                    None => debug!("restore finished with no restore pending"),
                }
            }
            StoreEvent::RestoreFailed { message } => {
                let pending = self.state().restoring.take();
                match pending {
                    Some(_) => {
                        warn!(%message, "restore failed");
                        self.publish(IapEvent::PurchaseFailed(Error::ServiceError(message).to_string()));
                    }
                    None => debug!(%message, "restore failure with no restore pending"),
                }
            }
        }
    }

    fn handle_update(&self, update: TransactionUpdate) {
        let TransactionUpdate {
            transaction_id,
            product_id,
            state,
            failure,
        } = update;

        match state {
            TransactionState::Purchasing | TransactionState::Deferred => {
                if let Some(pending) = self.state().purchase.as_mut() {
                    if pending.product_id == product_id && pending.transaction_id.is_none() {
                        pending.transaction_id = Some(transaction_id.clone());
                    }
                }
                if state == TransactionState::Deferred {
                    info!(%product_id, %transaction_id, "transaction deferred");
                } else {
                    debug!(%product_id, %transaction_id, "transaction purchasing");
                }
                return;
            }
            TransactionState::Restored => {
                match self.state().restoring.as_mut() {
                    Some(restored) => restored.push(product_id.clone()),
                    None => debug!(%product_id, "restored transaction outside a restore"),
                }
            }
            TransactionState::Purchased | TransactionState::Failed => {
                let first_delivery = {
                    let mut guard = self.state();
                    let first = guard.reported.insert(&transaction_id);
                    let resolves_pending = guard
                        .purchase
                        .as_ref()
                        .is_some_and(|pending| pending.owns(&product_id, &transaction_id));
                    if first && resolves_pending {
                        guard.purchase = None;
                    }
                    first
                };
                if !first_delivery {
                    debug!(%product_id, %transaction_id, "transaction redelivered");
                } else if state == TransactionState::Purchased {
                    info!(%product_id, %transaction_id, "purchase completed");
                    self.publish(IapEvent::PurchaseCompleted(Transaction {
                        product_id: product_id.clone(),
                        transaction_id: transaction_id.clone(),
                        receipt: self.receipt_string(),
                    }));
                } else {
                    let error = failure
                        .unwrap_or_else(|| StoreFailure::other("transaction failed"))
                        .into_error();
                    info!(%product_id, %transaction_id, reason = %error, "purchase failed");
                    self.publish(IapEvent::PurchaseFailed(error.to_string()));
                }
            }
        }

        if let Err(err) = self.service.finish_transaction(&transaction_id) {
            warn!(%transaction_id, error = %err, "could not finish transaction");
        }
    }
}

async fn observe(shared: Arc<Shared>, mut updates: StoreEventStream) {
    while let Some(event) = updates.recv().await {
        shared.handle_store_event(event);
    }
    info!("transaction update stream closed");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
