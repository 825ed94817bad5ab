//! Access policy gate. The single authority every operation consults before mutating anything.
//!
//! [`can`] is pure: it only looks at what it is given.
use super::error::{WorkflowError, WorkflowResult};
use super::purchase_order::{PurchaseOrder, PurchaseOrderStatus};
use super::requisition::{Requisition, RequisitionStatus};
use super::types::{Actor, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateRequisition,
    ViewRequisition,
    EditRequisition,
    ApproveRequisition,
    DenyRequisition,
    CancelRequisition,
    DeleteRequisition,
    CompleteRequisition,
    CreatePurchaseOrder,
    UpdatePurchaseOrder,
    DeletePurchaseOrder,
    ManageInvoices,
    Configure,
}

#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Requisition(&'a Requisition),
    PurchaseOrder {
        order: &'a PurchaseOrder,
        has_invoices: bool,
    },
    System,
}

pub fn can(actor: &Actor, action: Action, resource: Resource<'_>) -> bool {
    match (action, resource) {
        // self-approval is never allowed, not even for system admins
        (Action::ApproveRequisition | Action::DenyRequisition, Resource::Requisition(r)) => {
            !r.is_owned_by(actor)
                && matches!(actor.role, Role::Approver | Role::Administrative | Role::SystemAdmin)
        }
        // status guards bind every role
        (Action::CancelRequisition, Resource::Requisition(r)) => {
            !r.status.is_terminal() && (r.is_owned_by(actor) || actor.role.is_privileged())
        }
        (Action::DeleteRequisition, Resource::Requisition(r)) => {
            r.status == RequisitionStatus::Pending
                && (r.is_owned_by(actor) || actor.role == Role::SystemAdmin)
        }
        _ if actor.role == Role::SystemAdmin => true,
        (Action::CreateRequisition, _) => true,
        (Action::ViewRequisition | Action::EditRequisition, Resource::Requisition(r)) => {
            match actor.role {
                Role::Requester => r.is_owned_by(actor),
                Role::Approver => r.is_owned_by(actor) || r.department_id == actor.department_id,
                Role::Administrative | Role::SystemAdmin => true,
            }
        }
        (Action::DeletePurchaseOrder, Resource::PurchaseOrder { order, has_invoices }) => {
            let delivered = order.status == PurchaseOrderStatus::Delivered;
            let allowed = match actor.role {
                Role::Administrative | Role::Approver => !delivered,
                _ => false,
            } || (order.created_by == actor.id && order.status == PurchaseOrderStatus::Ordered);

            allowed && (!has_invoices || actor.role.is_privileged())
        }
        (
            Action::CompleteRequisition
            | Action::CreatePurchaseOrder
            | Action::UpdatePurchaseOrder
            | Action::ManageInvoices,
            _,
        ) => actor.role.is_privileged(),
        _ => false,
    }
}

/// [`can`], surfaced as a `Forbidden` error on denial.
pub fn authorize(actor: &Actor, action: Action, resource: Resource<'_>) -> WorkflowResult<()> {
    if can(actor, action, resource) {
        return Ok(());
    }

    let reason = match (action, resource) {
        (Action::ApproveRequisition | Action::DenyRequisition, Resource::Requisition(r))
            if r.is_owned_by(actor) =>
        {
            format!("{} cannot act on their own requisition {}", actor.id, r.folio)
        }
        _ => format!("{} ({}) may not {:?}", actor.id, actor.role, action),
    };

    Err(WorkflowError::Forbidden(reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requisition::{RequisitionDraft, RequisitionKind};

    fn requisition_by(owner: &Actor) -> Requisition {
        RequisitionDraft::new()
            .set_kind(RequisitionKind::Services)
            .set_description("Quarterly HVAC maintenance visit")
            .set_justification("Preventive maintenance required by the lease")
            .finalise("req_1".into(), owner)
            .unwrap()
    }

    #[test]
    fn requester_sees_only_own_requisitions() {
        let owner = Actor::new("user_1", Role::Requester, "dept_a");
        let other = Actor::new("user_2", Role::Requester, "dept_a");
        let r = requisition_by(&owner);

        assert!(can(&owner, Action::ViewRequisition, Resource::Requisition(&r)));
        assert!(!can(&other, Action::ViewRequisition, Resource::Requisition(&r)));
    }

    #[test]
    fn approver_is_scoped_to_department() {
        let owner = Actor::new("user_1", Role::Requester, "dept_a");
        let same = Actor::new("user_2", Role::Approver, "dept_a");
        let other = Actor::new("user_3", Role::Approver, "dept_b");
        let r = requisition_by(&owner);

        assert!(can(&same, Action::EditRequisition, Resource::Requisition(&r)));
        assert!(!can(&other, Action::EditRequisition, Resource::Requisition(&r)));
    }

    #[test]
    fn system_admin_cannot_self_approve() {
        let admin = Actor::new("user_9", Role::SystemAdmin, "dept_it");
        let r = requisition_by(&admin);

        assert!(!can(&admin, Action::ApproveRequisition, Resource::Requisition(&r)));
        let err =
            authorize(&admin, Action::ApproveRequisition, Resource::Requisition(&r)).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn requester_cannot_approve() {
        let owner = Actor::new("user_1", Role::Requester, "dept_a");
        let peer = Actor::new("user_2", Role::Requester, "dept_a");
        let r = requisition_by(&owner);

        assert!(!can(&peer, Action::ApproveRequisition, Resource::Requisition(&r)));
    }

    #[test]
    fn delete_only_while_pending() {
        let owner = Actor::new("user_1", Role::Requester, "dept_a");
        let mut r = requisition_by(&owner);
        assert!(can(&owner, Action::DeleteRequisition, Resource::Requisition(&r)));

        r.status = RequisitionStatus::InProcess;
        assert!(!can(&owner, Action::DeleteRequisition, Resource::Requisition(&r)));
    }
}
