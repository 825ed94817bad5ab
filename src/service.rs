//! Service layer API for requisition workflow operations
use super::approval::{self, Approval, ApprovalLedger, Tally};
use super::config::ServiceConfig;
use super::dispatch::{
    self, AuditSink, Dispatcher, NotificationSink, RequisitionEvent, SideEffect, SledAuditLog,
    SledNotificationSink,
};
use super::error::{ValidationError, WorkflowError, WorkflowResult};
use super::lifecycle::Transition;
use super::policy::{self, Action, Resource};
use super::requisition::{Requisition, RequisitionDraft, RequisitionPatch, RequisitionStatus};
use super::sequence::{self, SequenceDomain};
use super::store::{self, AbortOnError, AttemptBudget, Store, TxResult};
use super::types::{Actor, TimeStamp, User};
use super::utils;
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{TransactionalTree, abort};
use std::sync::Arc;
use tracing::info;

pub const MINIMUM_APPROVALS_KEY: &str = "minimum_required_approvals";

/// A row of the `system_configuration` tree.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct ConfigEntry {
    #[n(0)]
    pub key: String,
    #[n(1)]
    pub value: String,
    #[n(2)]
    pub modified_by: String,
    #[n(3)]
    pub modified_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub requisition: Requisition,
    pub approval: Approval,
    pub tally: Tally,
    pub previous_status: RequisitionStatus,
}

pub struct RequisitionService {
    pub(crate) store: Store,
    pub(crate) config: ServiceConfig,
    pub(crate) dispatcher: Dispatcher,
}

// threshold as stored right now, read inside the caller's transaction
fn read_minimum(settings: &TransactionalTree) -> TxResult<u32> {
    let entry = store::load_opt::<ConfigEntry>(settings, MINIMUM_APPROVALS_KEY)?;
    Ok(approval::parse_minimum(entry.as_ref().map(|e| e.value.as_str())))
}

impl RequisitionService {
    pub fn new(instance: Arc<sled::Db>) -> WorkflowResult<Self> {
        Self::with_config(instance, ServiceConfig::default())
    }

    /// Service persisting notifications and audit entries next to the records.
    pub fn with_config(instance: Arc<sled::Db>, config: ServiceConfig) -> WorkflowResult<Self> {
        let notifier = Arc::new(SledNotificationSink::open(&instance)?);
        let audit = Arc::new(SledAuditLog::open(&instance)?);
        Self::with_sinks(instance, config, notifier, audit)
    }

    pub fn with_sinks(
        instance: Arc<sled::Db>,
        config: ServiceConfig,
        notifier: Arc<dyn NotificationSink>,
        audit: Arc<dyn AuditSink>,
    ) -> WorkflowResult<Self> {
        let store = Store::open(instance)?;
        store.reconcile_sequences(&config)?;

        Ok(Self {
            store,
            config,
            dispatcher: Dispatcher::new(notifier, audit),
        })
    }

    /// Adds or replaces a user in the directory used for notification fan-out.
    pub fn register_user(&self, user: &User) -> WorkflowResult<()> {
        self.store
            .users
            .insert(user.id.as_bytes(), utils::encode(user)?)?;
        Ok(())
    }

    pub fn set_minimum_required_approvals(
        &self,
        actor: &Actor,
        minimum: u32,
    ) -> WorkflowResult<()> {
        policy::authorize(actor, Action::Configure, Resource::System)?;
        if minimum == 0 {
            return Err(ValidationError::ApprovalThreshold.into());
        }

        let entry = ConfigEntry {
            key: MINIMUM_APPROVALS_KEY.to_string(),
            value: minimum.to_string(),
            modified_by: actor.id.clone(),
            modified_at: TimeStamp::new(),
        };
        self.store
            .settings
            .insert(MINIMUM_APPROVALS_KEY.as_bytes(), utils::encode(&entry)?)?;
        info!(minimum, by = %actor.id, "minimum required approvals changed");

        Ok(())
    }

    pub fn minimum_required_approvals(&self) -> WorkflowResult<u32> {
        let entry = match self.store.settings.get(MINIMUM_APPROVALS_KEY.as_bytes())? {
            Some(bytes) => Some(utils::decode::<ConfigEntry>(&bytes)?),
            None => None,
        };
        Ok(approval::parse_minimum(entry.as_ref().map(|e| e.value.as_str())))
    }

    /// Submit a new requisition. The folio is assigned in the same transaction as the insert.
    pub fn create_requisition(
        &self,
        draft: RequisitionDraft,
        actor: &Actor,
    ) -> WorkflowResult<Requisition> {
        policy::authorize(actor, Action::CreateRequisition, Resource::System)?;

        let requisition = draft.finalise(utils::new_record_id("req_")?, actor)?;
        let prefix = self.config.folio_prefix.as_str();
        let budget = AttemptBudget::new("create_requisition", &self.config);

        let created = (
            &self.store.requisitions,
            &self.store.sequences,
            &self.store.identifiers,
        )
            .transaction(|(requisitions, sequences, identifiers)| -> TxResult<_> {
                budget.begin()?;
                let mut record = requisition.clone();
                record.folio = sequence::next_identifier(
                    sequences,
                    identifiers,
                    SequenceDomain::Requisitions,
                    prefix,
                    &record.id,
                )?;
                store::save(requisitions, &record.id, &record)?;

                Ok(record)
            })?;
        info!(folio = %created.folio, requester = %actor.id, "requisition created");

        Ok(created)
    }

    pub fn get_requisition(
        &self,
        requisition_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<Requisition> {
        let requisition: Requisition =
            self.store.get(&self.store.requisitions, "requisition", requisition_id)?;
        policy::authorize(
            actor,
            Action::ViewRequisition,
            Resource::Requisition(&requisition),
        )?;
        Ok(requisition)
    }

    pub fn find_by_folio(&self, folio: &str, actor: &Actor) -> WorkflowResult<Requisition> {
        let key = SequenceDomain::Requisitions.identifier_key(folio);
        let Some(id) = self.store.identifiers.get(key.as_bytes())? else {
            return Err(WorkflowError::not_found("requisition", folio));
        };
        let id = String::from_utf8_lossy(&id).into_owned();
        self.get_requisition(&id, actor)
    }

    /// Requisitions visible to `actor`, newest first.
    pub fn list_requisitions(&self, actor: &Actor) -> WorkflowResult<Vec<Requisition>> {
        let mut visible: Vec<Requisition> = self
            .store
            .values::<Requisition>(&self.store.requisitions)?
            .into_iter()
            .filter(|r| policy::can(actor, Action::ViewRequisition, Resource::Requisition(r)))
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(visible)
    }

    /// The approval ledger of a requisition in the order it was recorded.
    pub fn approvals(&self, requisition_id: &str, actor: &Actor) -> WorkflowResult<Vec<Approval>> {
        self.get_requisition(requisition_id, actor)?;
        let mut entries = match self.store.approvals.get(requisition_id.as_bytes())? {
            Some(bytes) => utils::decode::<ApprovalLedger>(&bytes)?.entries,
            None => vec![],
        };
        entries.sort_by(|a, b| a.acted_at.cmp(&b.acted_at));
        Ok(entries)
    }

    /// Record an approval and move the requisition to `in_review` or `approved`.
    ///
    /// Counting the existing approvals, appending the new one and changing the status
    /// happen in one transaction, so concurrent approvers always get distinct levels.
    pub fn approve_requisition(
        &self,
        requisition_id: &str,
        actor: &Actor,
        comments: Option<String>,
    ) -> WorkflowResult<ApprovalOutcome> {
        let approval_id = utils::new_record_id("apr_")?;
        let budget = AttemptBudget::new("approve_requisition", &self.config);

        let outcome = (
            &self.store.requisitions,
            &self.store.approvals,
            &self.store.settings,
        )
            .transaction(|(requisitions, approvals, settings)| -> TxResult<_> {
                budget.begin()?;
                let mut requisition: Requisition =
                    store::load(requisitions, "requisition", requisition_id)?;
                policy::authorize(
                    actor,
                    Action::ApproveRequisition,
                    Resource::Requisition(&requisition),
                )
                .or_abort()?;

                let mut ledger = store::load_opt::<ApprovalLedger>(approvals, requisition_id)?
                    .unwrap_or_else(|| ApprovalLedger::new(requisition_id));
                let minimum = read_minimum(settings)?;
                let (approval, tally) = ledger
                    .record_approval(
                        &requisition,
                        actor,
                        minimum,
                        approval_id.clone(),
                        comments.clone(),
                    )
                    .or_abort()?;
                let previous_status = requisition
                    .transition(Transition::Approve {
                        threshold_met: tally.threshold_met,
                    })
                    .or_abort()?;

                store::save(approvals, requisition_id, &ledger)?;
                store::save(requisitions, requisition_id, &requisition)?;

                Ok(ApprovalOutcome {
                    requisition,
                    approval,
                    tally,
                    previous_status,
                })
            })?;
        info!(
            folio = %outcome.requisition.folio,
            approver = %actor.id,
            level = outcome.approval.level,
            required = outcome.tally.required,
            status = %outcome.requisition.status,
            "approval recorded"
        );

        self.dispatcher.publish(
            &self.store,
            RequisitionEvent::Approved {
                requisition: &outcome.requisition,
                previous: outcome.previous_status,
                approval_id: &outcome.approval.id,
            },
            actor,
        );

        Ok(outcome)
    }

    /// Deny a requisition under approval. The denial is kept in the ledger.
    pub fn deny_requisition(
        &self,
        requisition_id: &str,
        actor: &Actor,
        reason: Option<String>,
    ) -> WorkflowResult<Requisition> {
        let approval_id = utils::new_record_id("apr_")?;
        let budget = AttemptBudget::new("deny_requisition", &self.config);

        let denied = (&self.store.requisitions, &self.store.approvals).transaction(
            |(requisitions, approvals)| -> TxResult<_> {
                budget.begin()?;
                let mut requisition: Requisition =
                    store::load(requisitions, "requisition", requisition_id)?;
                if requisition.status.is_terminal() {
                    return abort(WorkflowError::invalid_state("deny", requisition.status));
                }
                policy::authorize(
                    actor,
                    Action::DenyRequisition,
                    Resource::Requisition(&requisition),
                )
                .or_abort()?;
                requisition.transition(Transition::Deny).or_abort()?;

                let mut ledger = store::load_opt::<ApprovalLedger>(approvals, requisition_id)?
                    .unwrap_or_else(|| ApprovalLedger::new(requisition_id));
                ledger.record_denial(approval_id.clone(), actor, reason.clone());

                store::save(approvals, requisition_id, &ledger)?;
                store::save(requisitions, requisition_id, &requisition)?;
                Ok(requisition)
            },
        )?;
        info!(folio = %denied.folio, by = %actor.id, "requisition denied");

        self.dispatcher.publish(
            &self.store,
            RequisitionEvent::Denied {
                requisition: &denied,
            },
            actor,
        );

        Ok(denied)
    }

    /// Withdraw a requisition before it is converted to a purchase order. It lands on
    /// `denied` with the reason appended to the comments.
    pub fn cancel_requisition(
        &self,
        requisition_id: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> WorkflowResult<Requisition> {
        let budget = AttemptBudget::new("cancel_requisition", &self.config);

        let cancelled = self
            .store
            .requisitions
            .transaction(|requisitions| -> TxResult<_> {
                budget.begin()?;
                let mut requisition: Requisition =
                    store::load(requisitions, "requisition", requisition_id)?;
                requisition.status.next(Transition::Cancel).or_abort()?;
                policy::authorize(
                    actor,
                    Action::CancelRequisition,
                    Resource::Requisition(&requisition),
                )
                .or_abort()?;
                requisition.cancel(reason).or_abort()?;

                store::save(requisitions, requisition_id, &requisition)?;
                Ok(requisition)
            })?;
        info!(folio = %cancelled.folio, by = %actor.id, "requisition cancelled");

        self.dispatcher.publish(
            &self.store,
            RequisitionEvent::Cancelled {
                requisition: &cancelled,
            },
            actor,
        );

        Ok(cancelled)
    }

    /// The owner cancels. Anyone else denies while the requisition is under approval
    /// and cancels once it has been approved.
    pub fn deny_or_cancel_requisition(
        &self,
        requisition_id: &str,
        actor: &Actor,
        reason: Option<String>,
    ) -> WorkflowResult<Requisition> {
        let requisition: Requisition =
            self.store.get(&self.store.requisitions, "requisition", requisition_id)?;

        if requisition.is_owned_by(actor) || !requisition.status.is_editable() {
            self.cancel_requisition(requisition_id, actor, reason.as_deref())
        } else {
            self.deny_requisition(requisition_id, actor, reason)
        }
    }

    /// Update the non-status fields while the requisition is still under approval.
    pub fn edit_requisition(
        &self,
        requisition_id: &str,
        actor: &Actor,
        patch: &RequisitionPatch,
    ) -> WorkflowResult<Requisition> {
        let budget = AttemptBudget::new("edit_requisition", &self.config);

        let edited = self
            .store
            .requisitions
            .transaction(|requisitions| -> TxResult<_> {
                budget.begin()?;
                let requisition: Requisition =
                    store::load(requisitions, "requisition", requisition_id)?;
                policy::authorize(
                    actor,
                    Action::EditRequisition,
                    Resource::Requisition(&requisition),
                )
                .or_abort()?;
                requisition.status.next(Transition::Edit).or_abort()?;

                let edited = patch.apply(&requisition).or_abort()?;
                store::save(requisitions, requisition_id, &edited)?;
                Ok(edited)
            })?;
        info!(
            folio = %edited.folio,
            by = %actor.id,
            empty = patch.is_empty(),
            "requisition edited"
        );

        Ok(edited)
    }

    /// Hard delete, only while `pending`. The folio stays consumed.
    pub fn delete_requisition(
        &self,
        requisition_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<Requisition> {
        let budget = AttemptBudget::new("delete_requisition", &self.config);

        let deleted = (
            &self.store.requisitions,
            &self.store.approvals,
            &self.store.identifiers,
        )
            .transaction(|(requisitions, approvals, identifiers)| -> TxResult<_> {
                budget.begin()?;
                let requisition: Requisition =
                    store::load(requisitions, "requisition", requisition_id)?;
                policy::authorize(
                    actor,
                    Action::DeleteRequisition,
                    Resource::Requisition(&requisition),
                )
                .or_abort()?;

                requisitions.remove(requisition_id.as_bytes())?;
                approvals.remove(requisition_id.as_bytes())?;
                identifiers.remove(
                    SequenceDomain::Requisitions
                        .identifier_key(&requisition.folio)
                        .as_bytes(),
                )?;
                Ok(requisition)
            })?;
        info!(folio = %deleted.folio, by = %actor.id, "requisition deleted");

        self.dispatcher.emit(vec![SideEffect::Audit(dispatch::audit_entry(
            actor,
            "DELETE_REQUISITION",
            "requisitions",
            &deleted.id,
            vec![
                ("folio".to_string(), deleted.folio.clone()),
                ("status".to_string(), deleted.status.to_string()),
            ],
            vec![],
        ))]);

        Ok(deleted)
    }

    /// External completion signal: `in_process` to `completed`.
    pub fn complete_requisition(
        &self,
        requisition_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<Requisition> {
        let budget = AttemptBudget::new("complete_requisition", &self.config);

        let (completed, previous) = self
            .store
            .requisitions
            .transaction(|requisitions| -> TxResult<_> {
                budget.begin()?;
                let mut requisition: Requisition =
                    store::load(requisitions, "requisition", requisition_id)?;
                policy::authorize(
                    actor,
                    Action::CompleteRequisition,
                    Resource::Requisition(&requisition),
                )
                .or_abort()?;
                let previous = requisition.transition(Transition::Complete).or_abort()?;

                store::save(requisitions, requisition_id, &requisition)?;
                Ok((requisition, previous))
            })?;
        info!(folio = %completed.folio, by = %actor.id, "requisition completed");

        self.dispatcher.publish(
            &self.store,
            RequisitionEvent::Completed {
                requisition: &completed,
                previous,
            },
            actor,
        );

        Ok(completed)
    }
}
