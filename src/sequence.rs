//! Sequential human-readable identifiers (`REQ-000123`, `COM-000045`).
//!
//! Each domain keeps a counter row in the `sequences` tree. The counter is read, bumped and
//! written in the same transaction that inserts the owning record, so an aborted insert
//! never consumes a number and two committed records never share one.
use super::error::WorkflowError;
use super::store::{AbortOnError, TxResult};
use sled::transaction::{TransactionalTree, abort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceDomain {
    Requisitions,
    PurchaseOrders,
}

impl SequenceDomain {
    pub fn key(self) -> &'static str {
        match self {
            SequenceDomain::Requisitions => "requisitions",
            SequenceDomain::PurchaseOrders => "purchase_orders",
        }
    }

    // identifiers live in one tree, namespaced by domain
    pub fn identifier_key(self, code: &str) -> String {
        format!("{}/{}", self.key(), code)
    }
}

pub fn format_identifier(prefix: &str, n: u64) -> String {
    format!("{prefix}-{n:06}")
}

/// Numeric suffix of `code` if it matches `^{prefix}-[0-9]+$`.
pub fn parse_identifier(prefix: &str, code: &str) -> Option<u64> {
    let digits = code.strip_prefix(prefix)?.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Highest suffix among `codes` in the given prefix, 0 when there is none.
pub fn max_suffix<'a>(prefix: &str, codes: impl IntoIterator<Item = &'a str>) -> u64 {
    codes
        .into_iter()
        .filter_map(|code| parse_identifier(prefix, code))
        .max()
        .unwrap_or(0)
}

pub(crate) fn decode_counter(bytes: &[u8]) -> Result<u64, WorkflowError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| WorkflowError::Encoding("sequence counter is not 8 bytes".into()))?;
    Ok(u64::from_be_bytes(raw))
}

/// Assigns the next identifier in `domain` to `record_id`.
///
/// Must run inside the transaction that stores the record.
pub(crate) fn next_identifier(
    sequences: &TransactionalTree,
    identifiers: &TransactionalTree,
    domain: SequenceDomain,
    prefix: &str,
    record_id: &str,
) -> TxResult<String> {
    let current = match sequences.get(domain.key())? {
        Some(bytes) => decode_counter(&bytes).or_abort()?,
        None => 0,
    };
    let Some(next) = current.checked_add(1) else {
        return abort(WorkflowError::Conflict(format!("{} sequence exhausted", domain.key())));
    };
    let code = format_identifier(prefix, next);
    let key = domain.identifier_key(&code);

    if identifiers.get(key.as_bytes())?.is_some() {
        return abort(WorkflowError::Conflict(format!(
            "identifier {code} is already assigned"
        )));
    }

    sequences.insert(domain.key().as_bytes(), next.to_be_bytes().to_vec())?;
    identifiers.insert(key.as_bytes(), record_id.as_bytes())?;

    Ok(code)
}
