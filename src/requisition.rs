//! Requisition records, the draft builder used to submit them and the patch used to edit them
use super::error::{ValidationError, WorkflowResult};
use super::types::{Actor, TimeStamp};
use chrono::Utc;
use std::fmt;

pub const DESCRIPTION_LEN: (usize, usize) = (10, 2000);
pub const JUSTIFICATION_LEN: (usize, usize) = (10, 1000);

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequisitionKind {
    #[n(0)]
    Products,
    #[n(1)]
    Services,
    #[n(2)]
    Maintenance,
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default,
)]
pub enum Urgency {
    #[n(0)]
    Low,
    #[default]
    #[n(1)]
    Medium,
    #[n(2)]
    High,
    #[n(3)]
    Critical,
}

/// Status field owned by the lifecycle state machine, see [`crate::lifecycle`].
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequisitionStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    InReview,
    #[n(2)]
    Approved,
    #[n(3)]
    Denied,
    #[n(4)]
    InProcess,
    #[n(5)]
    Completed,
}

impl fmt::Display for RequisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequisitionStatus::Pending => "pending",
            RequisitionStatus::InReview => "in_review",
            RequisitionStatus::Approved => "approved",
            RequisitionStatus::Denied => "denied",
            RequisitionStatus::InProcess => "in_process",
            RequisitionStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub quantity: u32,
    #[n(2)]
    pub unit: String,
    #[n(3)]
    pub estimated_price: u64, // minor currency units
    #[n(4)]
    pub justification: Option<String>,
}

impl LineItem {
    pub fn new(
        name: impl Into<String>,
        quantity: u32,
        unit: impl Into<String>,
        estimated_price: u64,
    ) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit: unit.into(),
            estimated_price,
            justification: None,
        }
    }
}

// reference into the external file store, bytes are never read here
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    #[n(0)]
    pub file_id: String,
    #[n(1)]
    pub original_name: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Requisition {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub folio: String, // REQ-000123, assigned once at creation
    #[n(2)]
    pub requester_id: String,
    #[n(3)]
    pub department_id: String,
    #[n(4)]
    pub kind: RequisitionKind,
    #[n(5)]
    pub description: String,
    #[n(6)]
    pub quantity: u32,
    #[n(7)]
    pub justification: String,
    #[n(8)]
    pub urgency: Urgency,
    #[n(9)]
    pub estimated_budget: Option<u64>,
    #[n(10)]
    pub needed_by: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub line_items: Vec<LineItem>,
    #[n(12)]
    pub attachments: Vec<AttachmentRef>,
    #[n(13)]
    pub general_comments: Option<String>,
    #[n(14)]
    pub status: RequisitionStatus,
    #[n(15)]
    pub created_at: TimeStamp<Utc>,
    #[n(16)]
    pub updated_at: TimeStamp<Utc>,
}

impl Requisition {
    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        self.requester_id == actor.id
    }

    pub fn touch(&mut self) {
        self.updated_at = TimeStamp::new();
    }

    /// Appends a line to the free-text comments, keeping what was there.
    pub fn append_comment(&mut self, line: &str) {
        let comments = self.general_comments.take().unwrap_or_default();
        self.general_comments = Some(format!("{comments}\n\n{line}").trim_start().to_string());
    }

    pub fn validate(&self) -> WorkflowResult<()> {
        validate_text("description", &self.description, DESCRIPTION_LEN)?;
        validate_text("justification", &self.justification, JUSTIFICATION_LEN)?;
        if self.quantity == 0 {
            return Err(ValidationError::Quantity.into());
        }
        validate_line_items(&self.line_items)?;
        Ok(())
    }
}

fn validate_text(
    field: &'static str,
    value: &str,
    (min, max): (usize, usize),
) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    let len = trimmed.chars().count();
    if len < min || len > max {
        return Err(ValidationError::Length { field, min, max });
    }
    Ok(())
}

fn validate_line_items(items: &[LineItem]) -> Result<(), ValidationError> {
    for (index, item) in items.iter().enumerate() {
        if item.name.trim().is_empty() {
            return Err(ValidationError::LineItem {
                index,
                reason: "name is required",
            });
        }
        if item.quantity == 0 {
            return Err(ValidationError::LineItem {
                index,
                reason: "quantity must be at least 1",
            });
        }
    }
    Ok(())
}

// Used for constructing a requisition before it is submitted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequisitionDraft {
    kind: Option<RequisitionKind>,
    description: Option<String>,
    quantity: Option<u32>,
    justification: Option<String>,
    urgency: Option<Urgency>,
    estimated_budget: Option<u64>,
    needed_by: Option<TimeStamp<Utc>>,
    line_items: Vec<LineItem>,
    attachments: Vec<AttachmentRef>,
    general_comments: Option<String>,
}

impl RequisitionDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_kind(mut self, kind: RequisitionKind) -> Self {
        self.kind = Some(kind);
        self
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }
    pub fn set_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }
    pub fn set_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }
    pub fn set_estimated_budget(mut self, amount: u64) -> Self {
        self.estimated_budget = Some(amount);
        self
    }
    pub fn set_needed_by(mut self, date: TimeStamp<Utc>) -> Self {
        self.needed_by = Some(date);
        self
    }
    pub fn add_line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }
    pub fn add_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }
    pub fn set_general_comments(mut self, comments: impl Into<String>) -> Self {
        self.general_comments = Some(comments.into());
        self
    }

    /// Checks the draft and turns it into a `pending` requisition owned by `actor`.
    /// The folio is filled in by the identifier generator inside the insert transaction.
    pub fn finalise(self, id: String, actor: &Actor) -> WorkflowResult<Requisition> {
        let kind = self.kind.ok_or(ValidationError::MissingField("kind"))?;
        let description = self.description.ok_or(ValidationError::MissingField("description"))?;
        let justification = self
            .justification
            .ok_or(ValidationError::MissingField("justification"))?;
        let now = TimeStamp::new();

        let requisition = Requisition {
            id,
            folio: String::new(),
            requester_id: actor.id.clone(),
            department_id: actor.department_id.clone(),
            kind,
            description,
            quantity: self.quantity.unwrap_or(1),
            justification,
            urgency: self.urgency.unwrap_or_default(),
            estimated_budget: self.estimated_budget,
            needed_by: self.needed_by,
            line_items: self.line_items,
            attachments: self.attachments,
            general_comments: self.general_comments,
            status: RequisitionStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
        };
        requisition.validate()?;

        Ok(requisition)
    }
}

/// Partial update of the non-status fields. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequisitionPatch {
    pub kind: Option<RequisitionKind>,
    pub description: Option<String>,
    pub quantity: Option<u32>,
    pub justification: Option<String>,
    pub urgency: Option<Urgency>,
    pub estimated_budget: Option<u64>,
    pub needed_by: Option<TimeStamp<Utc>>,
    pub line_items: Option<Vec<LineItem>>,
    pub attachments: Option<Vec<AttachmentRef>>,
    pub general_comments: Option<String>,
}

impl RequisitionPatch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }
    pub fn set_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }
    pub fn set_line_items(mut self, items: Vec<LineItem>) -> Self {
        self.line_items = Some(items);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch to a copy, validates the result and returns it.
    pub fn apply(&self, current: &Requisition) -> WorkflowResult<Requisition> {
        let mut next = current.clone();
        if let Some(kind) = self.kind {
            next.kind = kind;
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(quantity) = self.quantity {
            next.quantity = quantity;
        }
        if let Some(justification) = &self.justification {
            next.justification = justification.clone();
        }
        if let Some(urgency) = self.urgency {
            next.urgency = urgency;
        }
        if let Some(budget) = self.estimated_budget {
            next.estimated_budget = Some(budget);
        }
        if let Some(needed_by) = &self.needed_by {
            next.needed_by = Some(needed_by.clone());
        }
        if let Some(items) = &self.line_items {
            next.line_items = items.clone();
        }
        if let Some(attachments) = &self.attachments {
            next.attachments = attachments.clone();
        }
        if let Some(comments) = &self.general_comments {
            next.general_comments = Some(comments.clone());
        }
        next.validate()?;
        next.touch();

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::types::Role;

    fn draft() -> RequisitionDraft {
        RequisitionDraft::new()
            .set_kind(RequisitionKind::Products)
            .set_description("Two replacement monitors for the front desk")
            .set_justification("Current monitors flicker and are out of warranty")
    }

    #[test]
    fn finalise_applies_defaults() {
        let actor = Actor::new("user_1", Role::Requester, "dept_a");
        let requisition = draft().finalise("req_1".into(), &actor).unwrap();

        assert_eq!(requisition.quantity, 1);
        assert_eq!(requisition.urgency, Urgency::Medium);
        assert_eq!(requisition.status, RequisitionStatus::Pending);
        assert_eq!(requisition.department_id, "dept_a");
        assert!(requisition.is_owned_by(&actor));
    }

    #[test]
    fn finalise_rejects_short_description() {
        let actor = Actor::new("user_1", Role::Requester, "dept_a");
        let err = draft()
            .set_description("short")
            .finalise("req_1".into(), &actor)
            .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::Length { field: "description", .. })
        ));
    }

    #[test]
    fn append_comment_keeps_previous_text() {
        let actor = Actor::new("user_1", Role::Requester, "dept_a");
        let mut requisition = draft()
            .set_general_comments("deliver to building B")
            .finalise("req_1".into(), &actor)
            .unwrap();

        requisition.append_comment("[CANCELLED] Reason: duplicate");
        assert_eq!(
            requisition.general_comments.as_deref(),
            Some("deliver to building B\n\n[CANCELLED] Reason: duplicate")
        );
    }
}
