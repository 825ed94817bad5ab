//! Purchase order and invoice operations on [`RequisitionService`]
use super::dispatch::{self, RequisitionEvent, SideEffect};
use super::error::{WorkflowError, WorkflowResult};
use super::lifecycle::Transition;
use super::policy::{self, Action, Resource};
use super::purchase_order::{
    Invoice, InvoiceDraft, InvoiceStatus, PurchaseOrder, PurchaseOrderDraft, PurchaseOrderStatus,
};
use super::requisition::{Requisition, RequisitionStatus};
use super::sequence::{self, SequenceDomain};
use super::service::RequisitionService;
use super::store::{self, AbortOnError, AttemptBudget, TxResult};
use super::types::{Actor, TimeStamp};
use super::utils;
use sled::Transactional;
use sled::transaction::abort;
use tracing::info;

impl RequisitionService {
    /// Create a purchase order, optionally converting an approved requisition.
    ///
    /// The order number, the order, its initial invoices and the requisition's move to
    /// `in_process` are committed together.
    pub fn create_purchase_order(
        &self,
        draft: PurchaseOrderDraft,
        actor: &Actor,
    ) -> WorkflowResult<PurchaseOrder> {
        policy::authorize(actor, Action::CreatePurchaseOrder, Resource::System)?;

        let order = draft.finalise(utils::new_record_id("po_")?, actor)?;
        let initial_invoices = draft
            .invoices
            .iter()
            .map(|invoice| -> WorkflowResult<Invoice> {
                invoice
                    .clone()
                    .finalise(utils::new_record_id("inv_")?, &order)
            })
            .collect::<WorkflowResult<Vec<_>>>()?;
        let prefix = self.config.order_prefix.as_str();
        let budget = AttemptBudget::new("create_purchase_order", &self.config);

        let (created, converted) = (
            &self.store.requisitions,
            &self.store.orders,
            &self.store.order_links,
            &self.store.invoices,
            &self.store.sequences,
            &self.store.identifiers,
        )
            .transaction(|trees| -> TxResult<_> {
                let (requisitions, orders, order_links, invoices, sequences, identifiers) =
                    trees;
                budget.begin()?;
                let mut record = order.clone();

                // the requisition must be approved and not yet ordered
                let converted = match &record.requisition_id {
                    Some(requisition_id) => {
                        let mut requisition: Requisition =
                            store::load(requisitions, "requisition", requisition_id)?;
                        if order_links.get(requisition_id.as_bytes())?.is_some() {
                            return abort(WorkflowError::invalid_state(
                                "create a second purchase order",
                                requisition.status,
                            ));
                        }
                        requisition.transition(Transition::ConvertToPurchase).or_abort()?;
                        Some(requisition)
                    }
                    None => None,
                };

                record.order_number = sequence::next_identifier(
                    sequences,
                    identifiers,
                    SequenceDomain::PurchaseOrders,
                    prefix,
                    &record.id,
                )?;
                store::save(orders, &record.id, &record)?;
                if !initial_invoices.is_empty() {
                    store::save(invoices, &record.id, &initial_invoices)?;
                }
                if let Some(requisition) = &converted {
                    store::save(requisitions, &requisition.id, requisition)?;
                    order_links.insert(requisition.id.as_bytes(), record.id.as_bytes())?;
                }

                Ok((record, converted))
            })?;
        info!(
            order_number = %created.order_number,
            requisition = ?converted.as_ref().map(|r| r.folio.as_str()),
            by = %actor.id,
            "purchase order created"
        );

        if let Some(requisition) = &converted {
            self.dispatcher.publish(
                &self.store,
                RequisitionEvent::ConvertedToPurchase {
                    requisition,
                    order_number: &created.order_number,
                },
                actor,
            );
        }

        Ok(created)
    }

    pub fn get_purchase_order(&self, order_id: &str) -> WorkflowResult<PurchaseOrder> {
        self.store.get(&self.store.orders, "purchase order", order_id)
    }

    pub fn purchase_order_for_requisition(
        &self,
        requisition_id: &str,
    ) -> WorkflowResult<Option<PurchaseOrder>> {
        match self.store.order_links.get(requisition_id.as_bytes())? {
            Some(order_id) => self
                .get_purchase_order(&String::from_utf8_lossy(&order_id))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Move an order forward. Delivery completes a linked `in_process` requisition.
    pub fn advance_purchase_order(
        &self,
        order_id: &str,
        actor: &Actor,
        next: PurchaseOrderStatus,
    ) -> WorkflowResult<PurchaseOrder> {
        policy::authorize(actor, Action::UpdatePurchaseOrder, Resource::System)?;
        let budget = AttemptBudget::new("advance_purchase_order", &self.config);

        let (order, completed) = (&self.store.orders, &self.store.requisitions).transaction(
            |(orders, requisitions)| -> TxResult<_> {
                budget.begin()?;
                let mut order: PurchaseOrder = store::load(orders, "purchase order", order_id)?;
                order.status = order.status.advance(next).or_abort()?;
                order.updated_at = TimeStamp::new();

                let mut completed = None;
                if order.status == PurchaseOrderStatus::Delivered {
                    order.actual_delivery_date = Some(TimeStamp::new());
                    if let Some(requisition_id) = &order.requisition_id {
                        let linked = store::load_opt::<Requisition>(requisitions, requisition_id)?
                            .filter(|r| r.status == RequisitionStatus::InProcess);
                        if let Some(mut requisition) = linked {
                            let previous =
                                requisition.transition(Transition::Complete).or_abort()?;
                            store::save(requisitions, requisition_id, &requisition)?;
                            completed = Some((requisition, previous));
                        }
                    }
                }
                store::save(orders, order_id, &order)?;

                Ok((order, completed))
            },
        )?;
        info!(
            order_number = %order.order_number,
            status = %order.status,
            by = %actor.id,
            "purchase order advanced"
        );

        if let Some((requisition, previous)) = &completed {
            self.dispatcher.publish(
                &self.store,
                RequisitionEvent::Completed {
                    requisition,
                    previous: *previous,
                },
                actor,
            );
        }

        Ok(order)
    }

    /// Delete an order with its invoices. A converted requisition keeps its status.
    pub fn delete_purchase_order(
        &self,
        order_id: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> WorkflowResult<PurchaseOrder> {
        let budget = AttemptBudget::new("delete_purchase_order", &self.config);

        let (deleted, invoice_count) = (
            &self.store.orders,
            &self.store.order_links,
            &self.store.invoices,
            &self.store.identifiers,
        )
            .transaction(|(orders, order_links, invoices, identifiers)| -> TxResult<_> {
                budget.begin()?;
                let order: PurchaseOrder = store::load(orders, "purchase order", order_id)?;
                let invoice_count = store::load_opt::<Vec<Invoice>>(invoices, order_id)?
                    .map_or(0, |v| v.len());
                policy::authorize(
                    actor,
                    Action::DeletePurchaseOrder,
                    Resource::PurchaseOrder {
                        order: &order,
                        has_invoices: invoice_count > 0,
                    },
                )
                .or_abort()?;

                orders.remove(order_id.as_bytes())?;
                invoices.remove(order_id.as_bytes())?;
                identifiers.remove(
                    SequenceDomain::PurchaseOrders
                        .identifier_key(&order.order_number)
                        .as_bytes(),
                )?;
                if let Some(requisition_id) = &order.requisition_id {
                    order_links.remove(requisition_id.as_bytes())?;
                }

                Ok((order, invoice_count))
            })?;
        info!(
            order_number = %deleted.order_number,
            invoices = invoice_count,
            by = %actor.id,
            "purchase order deleted"
        );

        self.dispatcher.emit(vec![SideEffect::Audit(dispatch::audit_entry(
            actor,
            "DELETE_PURCHASE_ORDER",
            "purchase_orders",
            &deleted.id,
            vec![
                ("order_number".to_string(), deleted.order_number.clone()),
                ("status".to_string(), deleted.status.to_string()),
                ("invoices".to_string(), invoice_count.to_string()),
            ],
            vec![(
                "reason".to_string(),
                reason.unwrap_or("No reason given").to_string(),
            )],
        ))]);

        Ok(deleted)
    }

    pub fn add_invoice(
        &self,
        order_id: &str,
        draft: InvoiceDraft,
        actor: &Actor,
    ) -> WorkflowResult<Invoice> {
        policy::authorize(actor, Action::ManageInvoices, Resource::System)?;
        let invoice_id = utils::new_record_id("inv_")?;
        let budget = AttemptBudget::new("add_invoice", &self.config);

        let invoice = (&self.store.orders, &self.store.invoices).transaction(
            |(orders, invoices)| -> TxResult<_> {
                budget.begin()?;
                let order: PurchaseOrder = store::load(orders, "purchase order", order_id)?;
                if order.status == PurchaseOrderStatus::Cancelled {
                    return abort(WorkflowError::invalid_state("add an invoice", order.status));
                }

                let invoice = draft
                    .clone()
                    .finalise(invoice_id.clone(), &order)
                    .or_abort()?;
                let mut existing =
                    store::load_opt::<Vec<Invoice>>(invoices, order_id)?.unwrap_or_default();
                existing.push(invoice.clone());
                store::save(invoices, order_id, &existing)?;

                Ok(invoice)
            },
        )?;
        info!(order = %order_id, fiscal_folio = %invoice.fiscal_folio, "invoice added");

        Ok(invoice)
    }

    pub fn set_invoice_status(
        &self,
        order_id: &str,
        invoice_id: &str,
        status: InvoiceStatus,
        actor: &Actor,
    ) -> WorkflowResult<Invoice> {
        policy::authorize(actor, Action::ManageInvoices, Resource::System)?;
        let budget = AttemptBudget::new("set_invoice_status", &self.config);

        self.store
            .invoices
            .transaction(|invoices| -> TxResult<_> {
                budget.begin()?;
                let mut existing =
                    store::load_opt::<Vec<Invoice>>(invoices, order_id)?.unwrap_or_default();
                let Some(invoice) = existing.iter_mut().find(|i| i.id == invoice_id) else {
                    return abort(WorkflowError::not_found("invoice", invoice_id));
                };
                invoice.status = status;
                let updated = invoice.clone();
                store::save(invoices, order_id, &existing)?;

                Ok(updated)
            })
            .map_err(WorkflowError::from)
    }

    pub fn invoices(&self, order_id: &str) -> WorkflowResult<Vec<Invoice>> {
        match self.store.invoices.get(order_id.as_bytes())? {
            Some(bytes) => utils::decode(&bytes),
            None => Ok(vec![]),
        }
    }
}
