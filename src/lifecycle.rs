//! Requisition status state machine.
//!
//! ```text
//! pending ──approve──▶ in_review ──approve (threshold met)──▶ approved ──convert──▶ in_process ──complete──▶ completed
//!    │ └──────────approve (threshold met)────────────────────────▲
//!    └──deny / cancel──▶ denied ◀──deny / cancel── in_review        (cancel also from approved)
//! ```
//!
//! `completed` and `denied` are terminal: every mutating action on them is rejected.
//! Once a purchase order exists (`in_process`) the requisition follows the order and
//! can no longer be cancelled.
use super::error::{WorkflowError, WorkflowResult};
use super::requisition::{Requisition, RequisitionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Edit,
    Approve { threshold_met: bool },
    Deny,
    Cancel,
    ConvertToPurchase,
    Complete,
}

impl Transition {
    pub fn verb(self) -> &'static str {
        match self {
            Transition::Edit => "edit",
            Transition::Approve { .. } => "approve",
            Transition::Deny => "deny",
            Transition::Cancel => "cancel",
            Transition::ConvertToPurchase => "convert to a purchase order",
            Transition::Complete => "complete",
        }
    }
}

impl RequisitionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequisitionStatus::Completed | RequisitionStatus::Denied)
    }

    /// Non-status fields may be changed by the requester only while under approval.
    pub fn is_editable(self) -> bool {
        matches!(self, RequisitionStatus::Pending | RequisitionStatus::InReview)
    }

    /// The status reached by applying `transition`, or `InvalidState` naming the current status.
    pub fn next(self, transition: Transition) -> WorkflowResult<RequisitionStatus> {
        use RequisitionStatus::*;

        let next = match (self, transition) {
            (Completed | Denied, _) => None,
            (Pending | InReview, Transition::Edit) => Some(self),
            (Pending | InReview, Transition::Approve { threshold_met: true }) => Some(Approved),
            (Pending | InReview, Transition::Approve { threshold_met: false }) => Some(InReview),
            (Pending | InReview, Transition::Deny) => Some(Denied),
            (Pending | InReview | Approved, Transition::Cancel) => Some(Denied),
            (Approved, Transition::ConvertToPurchase) => Some(InProcess),
            (InProcess, Transition::Complete) => Some(Completed),
            _ => None,
        };

        next.ok_or_else(|| WorkflowError::invalid_state(transition.verb(), self))
    }
}

impl Requisition {
    /// Moves the requisition through `transition`, refreshing `updated_at`.
    /// Returns the status it held before.
    pub fn transition(&mut self, transition: Transition) -> WorkflowResult<RequisitionStatus> {
        let previous = self.status;
        self.status = previous.next(transition)?;
        self.touch();

        Ok(previous)
    }

    /// Cancellation lands on `denied`; the reason is kept in the comments.
    pub fn cancel(&mut self, reason: Option<&str>) -> WorkflowResult<RequisitionStatus> {
        let previous = self.transition(Transition::Cancel)?;
        match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reason) => self.append_comment(&format!("[CANCELLED] Reason: {reason}")),
            None => self.append_comment("[CANCELLED] No reason given"),
        }

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequisitionStatus::*;

    #[test]
    fn threshold_decides_between_review_and_approved() {
        assert_eq!(Pending.next(Transition::Approve { threshold_met: false }).unwrap(), InReview);
        assert_eq!(Pending.next(Transition::Approve { threshold_met: true }).unwrap(), Approved);
        assert_eq!(InReview.next(Transition::Approve { threshold_met: true }).unwrap(), Approved);
        assert_eq!(InReview.next(Transition::Approve { threshold_met: false }).unwrap(), InReview);
    }

    #[test]
    fn terminal_states_reject_everything() {
        for status in [Completed, Denied] {
            for transition in [
                Transition::Edit,
                Transition::Approve { threshold_met: true },
                Transition::Deny,
                Transition::Cancel,
                Transition::ConvertToPurchase,
                Transition::Complete,
            ] {
                assert!(matches!(
                    status.next(transition),
                    Err(WorkflowError::InvalidState { .. })
                ));
            }
        }
    }

    #[test]
    fn invalid_state_names_current_status() {
        let err = InProcess.next(Transition::Edit).unwrap_err();
        assert_eq!(err.to_string(), "cannot edit while status is in_process");
    }

    #[test]
    fn cancel_stops_at_conversion() {
        for status in [Pending, InReview, Approved] {
            assert_eq!(status.next(Transition::Cancel).unwrap(), Denied);
        }
        let err = InProcess.next(Transition::Cancel).unwrap_err();
        assert_eq!(err.to_string(), "cannot cancel while status is in_process");
    }

    #[test]
    fn purchase_path() {
        assert_eq!(Approved.next(Transition::ConvertToPurchase).unwrap(), InProcess);
        assert_eq!(InProcess.next(Transition::Complete).unwrap(), Completed);
        assert!(Pending.next(Transition::ConvertToPurchase).is_err());
        assert!(Approved.next(Transition::Deny).is_err());
    }
}
