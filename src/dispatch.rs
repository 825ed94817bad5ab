//! Side effects of committed transitions: notifications and audit entries.
//!
//! Everything here runs after the transaction has committed. A sink failure is logged
//! and dropped; it never reaches the caller of the transition.
use super::error::WorkflowResult;
use super::requisition::{Requisition, RequisitionStatus};
use super::store::Store;
use super::types::{Actor, TimeStamp, User};
use super::utils;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Copy)]
pub enum NotificationKind {
    #[n(0)]
    StatusChange,
    #[n(1)]
    ReadyForPurchase,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub recipient_id: String,
    #[n(2)]
    pub requisition_id: Option<String>,
    #[n(3)]
    pub title: String,
    #[n(4)]
    pub body: String,
    #[n(5)]
    pub kind: NotificationKind,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct AuditEntry {
    #[n(0)]
    pub actor_id: String,
    #[n(1)]
    pub action: String, // APPROVE_REQUISITION, DELETE_PURCHASE_ORDER, ...
    #[n(2)]
    pub entity_type: String,
    #[n(3)]
    pub entity_id: String,
    #[n(4)]
    pub before: Vec<(String, String)>,
    #[n(5)]
    pub after: Vec<(String, String)>,
    #[n(6)]
    pub origin: Option<String>,
    #[n(7)]
    pub recorded_at: TimeStamp<Utc>,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}

/// Keeps notifications in the `notifications` tree for the delivery layer to pick up.
pub struct SledNotificationSink {
    tree: sled::Tree,
}

impl SledNotificationSink {
    pub fn open(db: &sled::Db) -> WorkflowResult<Self> {
        Ok(Self {
            tree: db.open_tree("notifications")?,
        })
    }

    pub fn for_user(&self, user_id: &str) -> WorkflowResult<Vec<Notification>> {
        let mut found = vec![];
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            let notification: Notification = utils::decode(&bytes)?;
            if notification.recipient_id == user_id {
                found.push(notification);
            }
        }
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

impl NotificationSink for SledNotificationSink {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let bytes = utils::encode(notification)?;
        self.tree.insert(notification.id.as_bytes(), bytes)?;
        Ok(())
    }
}

/// Append-only audit log, entries are keyed by the sha256 of their cbor encoding.
pub struct SledAuditLog {
    tree: sled::Tree,
}

impl SledAuditLog {
    pub fn open(db: &sled::Db) -> WorkflowResult<Self> {
        Ok(Self {
            tree: db.open_tree("audit_log")?,
        })
    }

    pub fn entries_for(&self, entity_id: &str) -> WorkflowResult<Vec<AuditEntry>> {
        let mut found = vec![];
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            let audit: AuditEntry = utils::decode(&bytes)?;
            if audit.entity_id == entity_id {
                found.push(audit);
            }
        }
        found.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(found)
    }
}

impl AuditSink for SledAuditLog {
    fn record(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let (hash, cbor) = utils::encode_with_digest(entry)?;
        self.tree.insert(hash.as_bytes(), cbor)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Notify(Notification),
    Audit(AuditEntry),
}

/// What happened to a requisition, as seen after commit.
#[derive(Debug, Clone)]
pub enum RequisitionEvent<'a> {
    Approved {
        requisition: &'a Requisition,
        previous: RequisitionStatus,
        approval_id: &'a str,
    },
    Denied {
        requisition: &'a Requisition,
    },
    Cancelled {
        requisition: &'a Requisition,
    },
    ConvertedToPurchase {
        requisition: &'a Requisition,
        order_number: &'a str,
    },
    Completed {
        requisition: &'a Requisition,
        previous: RequisitionStatus,
    },
}

fn notification(
    recipient_id: &str,
    requisition: &Requisition,
    title: &str,
    body: String,
    kind: NotificationKind,
) -> WorkflowResult<Notification> {
    Ok(Notification {
        id: utils::new_record_id("ntf_")?,
        recipient_id: recipient_id.to_string(),
        requisition_id: Some(requisition.id.clone()),
        title: title.to_string(),
        body,
        kind,
        created_at: TimeStamp::new(),
    })
}

pub fn audit_entry(
    actor: &Actor,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    before: Vec<(String, String)>,
    after: Vec<(String, String)>,
) -> AuditEntry {
    AuditEntry {
        actor_id: actor.id.clone(),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        before,
        after,
        origin: actor.origin.clone(),
        recorded_at: TimeStamp::new(),
    }
}

fn status_field(status: RequisitionStatus) -> Vec<(String, String)> {
    vec![("status".to_string(), status.to_string())]
}

/// Works out the side effects of `event`. `administrators` are the fan-out recipients
/// once a requisition is fully approved.
pub fn plan(
    event: &RequisitionEvent<'_>,
    actor: &Actor,
    administrators: &[User],
) -> WorkflowResult<Vec<SideEffect>> {
    let mut effects = vec![];

    match event {
        RequisitionEvent::Approved {
            requisition,
            previous,
            approval_id,
        } => {
            effects.push(SideEffect::Notify(notification(
                &requisition.requester_id,
                requisition,
                "Requisition approved",
                format!("Your requisition {} was approved by {}", requisition.folio, actor.name),
                NotificationKind::StatusChange,
            )?));

            if requisition.status == RequisitionStatus::Approved {
                for admin in administrators.iter().filter(|u| u.active && u.role.is_privileged()) {
                    effects.push(SideEffect::Notify(notification(
                        &admin.id,
                        requisition,
                        "Requisition ready for purchasing",
                        format!(
                            "Requisition {} is approved and ready to continue the purchasing process",
                            requisition.folio
                        ),
                        NotificationKind::ReadyForPurchase,
                    )?));
                }
            }

            let mut after = status_field(requisition.status);
            after.push(("approval_id".to_string(), approval_id.to_string()));
            effects.push(SideEffect::Audit(audit_entry(
                actor,
                "APPROVE_REQUISITION",
                "requisitions",
                &requisition.id,
                status_field(*previous),
                after,
            )));
        }
        RequisitionEvent::Denied { requisition } => {
            effects.push(SideEffect::Notify(notification(
                &requisition.requester_id,
                requisition,
                "Requisition denied",
                format!("Your requisition {} was denied by {}", requisition.folio, actor.name),
                NotificationKind::StatusChange,
            )?));
        }
        RequisitionEvent::Cancelled { requisition } => {
            effects.push(SideEffect::Notify(notification(
                &requisition.requester_id,
                requisition,
                "Requisition cancelled",
                format!("Your requisition {} was cancelled", requisition.folio),
                NotificationKind::StatusChange,
            )?));
        }
        RequisitionEvent::ConvertedToPurchase {
            requisition,
            order_number,
        } => {
            let mut after = status_field(requisition.status);
            after.push(("order_number".to_string(), order_number.to_string()));
            effects.push(SideEffect::Audit(audit_entry(
                actor,
                "CREATE_PURCHASE_ORDER",
                "requisitions",
                &requisition.id,
                status_field(RequisitionStatus::Approved),
                after,
            )));
        }
        RequisitionEvent::Completed { requisition, previous } => {
            effects.push(SideEffect::Notify(notification(
                &requisition.requester_id,
                requisition,
                "Requisition completed",
                format!("Your requisition {} has been completed", requisition.folio),
                NotificationKind::StatusChange,
            )?));
            effects.push(SideEffect::Audit(audit_entry(
                actor,
                "COMPLETE_REQUISITION",
                "requisitions",
                &requisition.id,
                status_field(*previous),
                status_field(requisition.status),
            )));
        }
    }

    Ok(effects)
}

pub struct Dispatcher {
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn NotificationSink>, audit: Arc<dyn AuditSink>) -> Self {
        Self { notifier, audit }
    }

    /// Plans and emits the effects of a committed event. Never fails.
    pub fn publish(&self, store: &Store, event: RequisitionEvent<'_>, actor: &Actor) {
        let administrators = match &event {
            RequisitionEvent::Approved { requisition, .. }
                if requisition.status == RequisitionStatus::Approved =>
            {
                store.values::<User>(&store.users).unwrap_or_else(|e| {
                    warn!("could not load administrators for fan-out: {e}");
                    vec![]
                })
            }
            _ => vec![],
        };

        match plan(&event, actor, &administrators) {
            Ok(effects) => self.emit(effects),
            Err(e) => warn!("dropping side effects, planning failed: {e}"),
        }
    }

    /// Emits each effect independently; one failing does not stop the rest.
    pub fn emit(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            match effect {
                SideEffect::Notify(n) => {
                    if let Err(e) = self.notifier.notify(&n) {
                        warn!(recipient = %n.recipient_id, "notification dropped: {e:#}");
                    }
                }
                SideEffect::Audit(entry) => {
                    if let Err(e) = self.audit.record(&entry) {
                        warn!(
                            action = %entry.action,
                            entity = %entry.entity_id,
                            "audit entry dropped: {e:#}"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requisition::{RequisitionDraft, RequisitionKind};
    use crate::types::Role;

    fn approved() -> Requisition {
        let owner = Actor::new("user_1", Role::Requester, "dept_a");
        let mut r = RequisitionDraft::new()
            .set_kind(RequisitionKind::Products)
            .set_description("Ergonomic chairs for the call centre")
            .set_justification("Health and safety audit finding")
            .finalise("req_1".into(), &owner)
            .unwrap();
        r.folio = "REQ-000001".into();
        r.status = RequisitionStatus::Approved;
        r
    }

    #[test]
    fn full_approval_fans_out_to_active_administrators() {
        let requisition = approved();
        let approver = Actor::new("user_2", Role::Approver, "dept_a");
        let mut retired = User::new("user_8", "Old admin", Role::Administrative, "dept_p");
        retired.active = false;
        let admins = vec![
            User::new("user_7", "Purchasing", Role::Administrative, "dept_p"),
            User::new("user_9", "Root", Role::SystemAdmin, "dept_it"),
            User::new("user_3", "Peer", Role::Approver, "dept_a"),
            retired,
        ];

        let event = RequisitionEvent::Approved {
            requisition: &requisition,
            previous: RequisitionStatus::Pending,
            approval_id: "apr_1",
        };
        let effects = plan(&event, &approver, &admins).unwrap();

        let recipients: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                SideEffect::Notify(n) => Some(n.recipient_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(recipients, vec!["user_1", "user_7", "user_9"]);
        assert_eq!(
            effects.iter().filter(|e| matches!(e, SideEffect::Audit(_))).count(),
            1
        );
    }

    #[test]
    fn denial_only_notifies_requester() {
        let mut requisition = approved();
        requisition.status = RequisitionStatus::Denied;
        let approver = Actor::new("user_2", Role::Approver, "dept_a");

        let event = RequisitionEvent::Denied {
            requisition: &requisition,
        };
        let effects = plan(&event, &approver, &[]).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], SideEffect::Notify(n) if n.recipient_id == "user_1"));
    }
}
