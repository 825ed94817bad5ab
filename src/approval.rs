//! Approval ledger and the accumulator that counts approvals towards the threshold.
//!
//! Each requisition owns one append-only ledger. It is stored as a single value so that
//! counting and appending happen in the same transaction as the status change.
use super::error::{WorkflowError, WorkflowResult};
use super::requisition::{Requisition, RequisitionStatus};
use super::types::{Actor, TimeStamp};
use chrono::Utc;

pub const DEFAULT_MINIMUM_APPROVALS: u32 = 1;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Copy)]
pub enum ApprovalAction {
    #[n(0)]
    Approve,
    #[n(1)]
    Review,
    #[n(2)]
    Deny,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Copy)]
pub enum ApprovalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Completed,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Approval {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub requisition_id: String,
    #[n(2)]
    pub approver_id: String,
    #[n(3)]
    pub action: ApprovalAction,
    #[n(4)]
    pub comments: Option<String>,
    #[n(5)]
    pub level: u32, // 1-based, derived from the approve count at insertion
    #[n(6)]
    pub acted_at: TimeStamp<Utc>,
    #[n(7)]
    pub status: ApprovalStatus,
}

/// Result of recording one approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub new_total: u32,
    pub required: u32,
    pub threshold_met: bool,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct ApprovalLedger {
    #[n(0)]
    pub requisition_id: String,
    #[n(1)]
    pub entries: Vec<Approval>,
}

impl ApprovalLedger {
    pub fn new(requisition_id: impl Into<String>) -> Self {
        Self {
            requisition_id: requisition_id.into(),
            entries: vec![],
        }
    }

    fn completed_approvals(&self) -> impl Iterator<Item = &Approval> {
        self.entries.iter().filter(|a| {
            a.action == ApprovalAction::Approve && a.status == ApprovalStatus::Completed
        })
    }

    pub fn approval_count(&self) -> u32 {
        self.completed_approvals().count() as u32
    }

    pub fn has_approved(&self, approver_id: &str) -> bool {
        self.completed_approvals().any(|a| a.approver_id == approver_id)
    }

    /// Appends a completed approval by `approver` and reports whether `minimum` is reached.
    ///
    /// Rejects a second approval by the same approver with `AlreadyApproved` before
    /// looking at the status, then rejects anything outside `pending`/`in_review`.
    pub fn record_approval(
        &mut self,
        requisition: &Requisition,
        approver: &Actor,
        minimum: u32,
        approval_id: String,
        comments: Option<String>,
    ) -> WorkflowResult<(Approval, Tally)> {
        if self.has_approved(&approver.id) {
            return Err(WorkflowError::AlreadyApproved {
                requisition_id: requisition.id.clone(),
                approver_id: approver.id.clone(),
            });
        }
        if !matches!(
            requisition.status,
            RequisitionStatus::Pending | RequisitionStatus::InReview
        ) {
            return Err(WorkflowError::invalid_state("approve", requisition.status));
        }

        let required = minimum.max(DEFAULT_MINIMUM_APPROVALS);
        let level = self.approval_count() + 1;
        let approval = self.append(
            approval_id,
            approver,
            ApprovalAction::Approve,
            level,
            comments.or_else(|| Some("Requisition approved".to_string())),
        );

        Ok((
            approval,
            Tally {
                new_total: level,
                required,
                threshold_met: level >= required,
            },
        ))
    }

    /// Records a denial. It does not count towards the threshold.
    pub fn record_denial(
        &mut self,
        approval_id: String,
        approver: &Actor,
        reason: Option<String>,
    ) -> Approval {
        let level = self.approval_count() + 1;
        self.append(approval_id, approver, ApprovalAction::Deny, level, reason)
    }

    fn append(
        &mut self,
        id: String,
        approver: &Actor,
        action: ApprovalAction,
        level: u32,
        comments: Option<String>,
    ) -> Approval {
        let approval = Approval {
            id,
            requisition_id: self.requisition_id.clone(),
            approver_id: approver.id.clone(),
            action,
            comments,
            level,
            acted_at: TimeStamp::new(),
            status: ApprovalStatus::Completed,
        };
        self.entries.push(approval.clone());

        approval
    }
}

/// Parses a stored threshold, falling back to the default for missing or unusable values.
pub fn parse_minimum(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(DEFAULT_MINIMUM_APPROVALS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requisition::{RequisitionDraft, RequisitionKind};
    use crate::types::Role;

    fn pending() -> Requisition {
        let owner = Actor::new("user_1", Role::Requester, "dept_a");
        RequisitionDraft::new()
            .set_kind(RequisitionKind::Maintenance)
            .set_description("Fix the loading dock door motor")
            .set_justification("Door is stuck half open since Monday")
            .finalise("req_1".into(), &owner)
            .unwrap()
    }

    #[test]
    fn levels_follow_the_approve_count() {
        let requisition = pending();
        let mut ledger = ApprovalLedger::new(&requisition.id);
        let a = Actor::new("user_2", Role::Approver, "dept_a");
        let b = Actor::new("user_3", Role::Approver, "dept_a");

        let (first, tally) = ledger
            .record_approval(&requisition, &a, 2, "apr_1".into(), None)
            .unwrap();
        assert_eq!(first.level, 1);
        assert!(!tally.threshold_met);

        let (second, tally) = ledger
            .record_approval(&requisition, &b, 2, "apr_2".into(), None)
            .unwrap();
        assert_eq!(second.level, 2);
        assert!(tally.threshold_met);
        assert_eq!(tally.new_total, 2);
    }

    #[test]
    fn same_approver_is_rejected_before_status() {
        let mut requisition = pending();
        let mut ledger = ApprovalLedger::new(&requisition.id);
        let a = Actor::new("user_2", Role::Approver, "dept_a");

        ledger.record_approval(&requisition, &a, 1, "apr_1".into(), None).unwrap();
        requisition.status = RequisitionStatus::Approved;

        let err = ledger
            .record_approval(&requisition, &a, 1, "apr_2".into(), None)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyApproved { .. }));
        assert_eq!(ledger.approval_count(), 1);
    }

    #[test]
    fn denials_do_not_count() {
        let requisition = pending();
        let mut ledger = ApprovalLedger::new(&requisition.id);
        let a = Actor::new("user_2", Role::Approver, "dept_a");

        ledger.record_denial("apr_1".into(), &a, Some("over budget".into()));
        assert_eq!(ledger.approval_count(), 0);
        assert!(!ledger.has_approved("user_2"));
    }

    #[test]
    fn minimum_defaults_to_one() {
        assert_eq!(parse_minimum(None), 1);
        assert_eq!(parse_minimum(Some("0")), 1);
        assert_eq!(parse_minimum(Some("abc")), 1);
        assert_eq!(parse_minimum(Some(" 3 ")), 3);
    }
}
