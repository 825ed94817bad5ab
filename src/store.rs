//! Entity store on top of sled: one tree per logical table plus transaction helpers
use super::config::ServiceConfig;
use super::error::{WorkflowError, WorkflowResult};
use super::sequence::{self, SequenceDomain};
use super::utils;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree, abort,
};
use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct Store {
    pub(crate) requisitions: sled::Tree,
    pub(crate) approvals: sled::Tree,
    pub(crate) orders: sled::Tree,
    pub(crate) order_links: sled::Tree,
    pub(crate) invoices: sled::Tree,
    pub(crate) sequences: sled::Tree,
    pub(crate) identifiers: sled::Tree,
    pub(crate) settings: sled::Tree,
    pub(crate) users: sled::Tree,
}

impl Store {
    pub fn open(instance: Arc<sled::Db>) -> WorkflowResult<Self> {
        Ok(Self {
            requisitions: instance.open_tree("requisitions")?,
            approvals: instance.open_tree("approvals")?,
            orders: instance.open_tree("purchase_orders")?,
            order_links: instance.open_tree("order_links")?,
            invoices: instance.open_tree("invoices")?,
            sequences: instance.open_tree("sequences")?,
            identifiers: instance.open_tree("identifiers")?,
            settings: instance.open_tree("system_configuration")?,
            users: instance.open_tree("users")?,
        })
    }

    /// Raises each domain counter to the highest identifier already assigned in it.
    pub fn reconcile_sequences(&self, config: &ServiceConfig) -> WorkflowResult<()> {
        for (domain, prefix) in [
            (SequenceDomain::Requisitions, config.folio_prefix.as_str()),
            (SequenceDomain::PurchaseOrders, config.order_prefix.as_str()),
        ] {
            let namespace = format!("{}/", domain.key());
            let mut codes = vec![];
            for entry in self.identifiers.scan_prefix(namespace.as_bytes()) {
                let (key, _) = entry?;
                if let Some(code) = std::str::from_utf8(&key)
                    .ok()
                    .and_then(|k| k.strip_prefix(&namespace))
                {
                    codes.push(code.to_string());
                }
            }
            let highest = sequence::max_suffix(prefix, codes.iter().map(String::as_str));

            let raised = self.sequences.fetch_and_update(domain.key(), |current| {
                let current = current.and_then(|b| sequence::decode_counter(b).ok()).unwrap_or(0);
                Some(current.max(highest).to_be_bytes().to_vec())
            })?;
            let before = raised
                .as_deref()
                .and_then(|b| sequence::decode_counter(b).ok())
                .unwrap_or(0);
            if highest > before {
                info!(
                    domain = domain.key(),
                    from = before,
                    to = highest,
                    "sequence counter raised"
                );
            }
        }
        Ok(())
    }

    pub fn get<T>(&self, tree: &sled::Tree, entity: &'static str, id: &str) -> WorkflowResult<T>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(id.as_bytes())? {
            Some(bytes) => utils::decode(&bytes),
            None => Err(WorkflowError::not_found(entity, id)),
        }
    }

    pub fn values<T>(&self, tree: &sled::Tree) -> WorkflowResult<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        tree.iter()
            .map(|entry| {
                let (_, bytes) = entry?;
                utils::decode(&bytes)
            })
            .collect()
    }
}

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, WorkflowError>;

pub(crate) trait AbortOnError<T> {
    fn or_abort(self) -> TxResult<T>;
}

impl<T> AbortOnError<T> for WorkflowResult<T> {
    fn or_abort(self) -> TxResult<T> {
        self.map_err(ConflictableTransactionError::Abort)
    }
}

/// Loads and decodes a record inside a transaction, aborting with `NotFound` when absent.
pub(crate) fn load<T>(tree: &TransactionalTree, entity: &'static str, id: &str) -> TxResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(id.as_bytes())? {
        Some(bytes) => utils::decode(&bytes).or_abort(),
        None => abort(WorkflowError::not_found(entity, id)),
    }
}

pub(crate) fn load_opt<T>(tree: &TransactionalTree, id: &str) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(id.as_bytes())? {
        Some(bytes) => utils::decode(&bytes).map(Some).or_abort(),
        None => Ok(None),
    }
}

pub(crate) fn save<T>(tree: &TransactionalTree, id: &str, value: &T) -> TxResult<()>
where
    T: minicbor::Encode<()>,
{
    let bytes = utils::encode(value).or_abort()?;
    tree.insert(id.as_bytes(), bytes)?;
    Ok(())
}

/// Bounds how long sled may keep retrying a conflicting transaction.
///
/// sled re-runs the closure on every conflict; [`AttemptBudget::begin`] is called first
/// thing in the closure and aborts once the attempts or the deadline run out.
pub(crate) struct AttemptBudget {
    operation: &'static str,
    started: Instant,
    attempts: Cell<u32>,
    max_attempts: u32,
    timeout: Duration,
}

impl AttemptBudget {
    pub fn new(operation: &'static str, config: &ServiceConfig) -> Self {
        Self {
            operation,
            started: Instant::now(),
            attempts: Cell::new(0),
            max_attempts: config.max_transaction_attempts.max(1),
            timeout: config.transaction_timeout,
        }
    }

    pub fn begin(&self) -> TxResult<()> {
        let attempt = self.attempts.get() + 1;
        self.attempts.set(attempt);

        if attempt > 1 {
            debug!(operation = self.operation, attempt, "retrying conflicting transaction");
        }
        if self.started.elapsed() >= self.timeout {
            return abort(WorkflowError::Timeout(self.timeout));
        }
        if attempt > self.max_attempts {
            return abort(WorkflowError::Conflict(format!(
                "{} gave up after {} attempts",
                self.operation, self.max_attempts
            )));
        }
        Ok(())
    }
}
