//! Purchase orders and the invoices raised against them
use super::error::{ValidationError, WorkflowError, WorkflowResult};
use super::requisition::AttachmentRef;
use super::types::{Actor, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PurchaseOrderStatus {
    #[n(0)]
    Ordered,
    #[n(1)]
    InTransit,
    #[n(2)]
    Delivered,
    #[n(3)]
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseOrderStatus::Delivered | PurchaseOrderStatus::Cancelled)
    }

    /// Orders only move forward: ordered, in transit, delivered. Cancelling is allowed
    /// from any non-terminal status.
    pub fn advance(self, next: PurchaseOrderStatus) -> WorkflowResult<PurchaseOrderStatus> {
        let allowed = !self.is_terminal()
            && match next {
                PurchaseOrderStatus::Cancelled => true,
                PurchaseOrderStatus::Ordered => false,
                _ => next > self,
            };
        if !allowed {
            return Err(WorkflowError::invalid_state("move the order to that status", self));
        }

        Ok(next)
    }
}

impl fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::InTransit => "in_transit",
            PurchaseOrderStatus::Delivered => "delivered",
            PurchaseOrderStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub order_number: String, // COM-000045
    #[n(2)]
    pub requisition_id: Option<String>,
    #[n(3)]
    pub selected_vendor: String,
    #[n(4)]
    pub total_amount: u64,
    #[n(5)]
    pub purchase_date: TimeStamp<Utc>,
    #[n(6)]
    pub estimated_delivery_date: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub actual_delivery_date: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub delivery_terms: Option<String>,
    #[n(9)]
    pub notes: Option<String>,
    #[n(10)]
    pub status: PurchaseOrderStatus,
    #[n(11)]
    pub attachments: Vec<AttachmentRef>,
    #[n(12)]
    pub created_by: String,
    #[n(13)]
    pub created_at: TimeStamp<Utc>,
    #[n(14)]
    pub updated_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Received,
    #[n(2)]
    Paid,
    #[n(3)]
    Cancelled,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub fiscal_folio: String,
    #[n(3)]
    pub amount: u64,
    #[n(4)]
    pub tax: u64,
    #[n(5)]
    pub total: u64,
    #[n(6)]
    pub invoice_date: TimeStamp<Utc>,
    #[n(7)]
    pub status: InvoiceStatus,
    #[n(8)]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceDraft {
    pub fiscal_folio: Option<String>,
    pub amount: Option<u64>,
    pub tax: u64,
    pub total: Option<u64>,
    pub invoice_date: Option<TimeStamp<Utc>>,
    pub attachments: Vec<AttachmentRef>,
}

impl InvoiceDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_fiscal_folio(mut self, folio: impl Into<String>) -> Self {
        self.fiscal_folio = Some(folio.into());
        self
    }
    pub fn set_amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }
    pub fn set_tax(mut self, tax: u64) -> Self {
        self.tax = tax;
        self
    }

    // missing amounts fall back to the order total
    pub fn finalise(self, id: String, order: &PurchaseOrder) -> WorkflowResult<Invoice> {
        let now = TimeStamp::new();
        let amount = self.amount.unwrap_or(order.total_amount);
        let total = self.total.unwrap_or(amount);
        if total < amount {
            return Err(ValidationError::InvoiceTotal.into());
        }

        Ok(Invoice {
            id,
            order_id: order.id.clone(),
            fiscal_folio: self
                .fiscal_folio
                .unwrap_or_else(|| format!("FAC-{}", now.timestamp_millis())),
            amount,
            tax: self.tax,
            total,
            invoice_date: self.invoice_date.unwrap_or(now),
            status: InvoiceStatus::Pending,
            attachments: self.attachments,
        })
    }
}

// used for constructing an order before the order number is assigned
#[derive(Debug, Clone, Default)]
pub struct PurchaseOrderDraft {
    pub requisition_id: Option<String>,
    pub selected_vendor: Option<String>,
    pub total_amount: u64,
    pub purchase_date: Option<TimeStamp<Utc>>,
    pub estimated_delivery_date: Option<TimeStamp<Utc>>,
    pub delivery_terms: Option<String>,
    pub notes: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    pub invoices: Vec<InvoiceDraft>,
}

impl PurchaseOrderDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn for_requisition(mut self, requisition_id: impl Into<String>) -> Self {
        self.requisition_id = Some(requisition_id.into());
        self
    }
    pub fn set_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.selected_vendor = Some(vendor.into());
        self
    }
    pub fn set_total_amount(mut self, amount: u64) -> Self {
        self.total_amount = amount;
        self
    }
    pub fn set_estimated_delivery_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.estimated_delivery_date = Some(date);
        self
    }
    pub fn add_invoice(mut self, invoice: InvoiceDraft) -> Self {
        self.invoices.push(invoice);
        self
    }

    pub fn finalise(&self, id: String, actor: &Actor) -> WorkflowResult<PurchaseOrder> {
        let vendor = self
            .selected_vendor
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ValidationError::MissingField("selected_vendor"))?;
        let now = TimeStamp::new();

        Ok(PurchaseOrder {
            id,
            order_number: String::new(),
            requisition_id: self.requisition_id.clone(),
            selected_vendor: vendor.to_string(),
            total_amount: self.total_amount,
            purchase_date: self.purchase_date.clone().unwrap_or_else(|| now.clone()),
            estimated_delivery_date: self.estimated_delivery_date.clone(),
            actual_delivery_date: None,
            delivery_terms: self.delivery_terms.clone(),
            notes: self.notes.clone(),
            status: PurchaseOrderStatus::Ordered,
            attachments: self.attachments.clone(),
            created_by: actor.id.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PurchaseOrderStatus::*;

    #[test]
    fn orders_only_move_forward() {
        assert_eq!(Ordered.advance(InTransit).unwrap(), InTransit);
        assert_eq!(InTransit.advance(Delivered).unwrap(), Delivered);
        assert_eq!(Ordered.advance(Delivered).unwrap(), Delivered);
        assert!(InTransit.advance(Ordered).is_err());
        assert!(InTransit.advance(InTransit).is_err());
    }

    #[test]
    fn terminal_orders_stay_put() {
        assert!(Delivered.advance(Cancelled).is_err());
        assert!(Cancelled.advance(InTransit).is_err());
        assert_eq!(InTransit.advance(Cancelled).unwrap(), Cancelled);
    }

    #[test]
    fn draft_requires_vendor() {
        let actor = Actor::new("user_1", crate::types::Role::Administrative, "dept_p");
        let err = PurchaseOrderDraft::new().set_vendor("  ").finalise("po_1".into(), &actor);
        assert!(matches!(
            err,
            Err(WorkflowError::Validation(ValidationError::MissingField("selected_vendor")))
        ));
    }
}
