//! Smoke Screen Unit tests for requisition workflow components
//!
//! These test are unit tests that span the codebase, testing behavior in
//! isolation from integration scenarios. These are intended as smoke-screen
//! and generally test the happy-path.
//!

use requisition_workflow::{
    WorkflowError,
    approval::parse_minimum,
    config::ServiceConfig,
    dispatch::{
        AuditSink, Notification, NotificationKind, NotificationSink, SledAuditLog,
        SledNotificationSink, audit_entry,
    },
    purchase_order::{InvoiceDraft, PurchaseOrderDraft},
    requisition::{LineItem, RequisitionDraft, RequisitionKind, RequisitionPatch},
    sequence::{format_identifier, max_suffix, parse_identifier},
    types::{Actor, Role, TimeStamp},
    utils::{self, new_uuid_to_bech32},
};
use tempfile::tempdir;

// UTILS MODULE TESTS
mod utils_tests {
    use super::*;

    /// Record ids carry their entity prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("req_").unwrap();
        assert!(encoded.starts_with("req_1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
        assert!(matches!(utils::new_record_id(""), Err(WorkflowError::Encoding(_))));
    }

    #[test]
    fn generates_unique_ids() {
        let id1 = utils::new_record_id("apr_").unwrap();
        let id2 = utils::new_record_id("apr_").unwrap();
        assert_ne!(id1, id2);
    }

    /// Same content, same digest. The audit log relies on this for its keys.
    #[test]
    fn digest_is_stable_for_equal_values() {
        let actor = Actor::new("user_1", Role::SystemAdmin, "dept_it");
        let entry = audit_entry(
            &actor,
            "DELETE_REQUISITION",
            "requisitions",
            "req_1",
            vec![],
            vec![],
        );

        let (first, cbor) = utils::encode_with_digest(&entry).unwrap();
        let (second, _) = utils::encode_with_digest(&entry.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(sha256::digest(&cbor), first);
    }
}

// SEQUENCE MODULE TESTS
mod sequence_tests {
    use super::*;

    #[test]
    fn first_identifier_in_a_fresh_domain() {
        assert_eq!(format_identifier("REQ", max_suffix("REQ", []) + 1), "REQ-000001");
    }

    #[test]
    fn custom_prefixes_round_trip() {
        let code = format_identifier("SOL", 42);
        assert_eq!(code, "SOL-000042");
        assert_eq!(parse_identifier("SOL", &code), Some(42));
        assert_eq!(parse_identifier("REQ", &code), None);
    }
}

// REQUISITION MODULE TESTS
mod requisition_tests {
    use super::*;

    fn requester() -> Actor {
        Actor::new("user_1", Role::Requester, "dept_a")
    }

    fn draft() -> RequisitionDraft {
        RequisitionDraft::new()
            .set_kind(RequisitionKind::Products)
            .set_description("Replacement keyboards for support")
            .set_justification("Several keys no longer register")
    }

    #[test]
    fn missing_kind_is_rejected() {
        let err = RequisitionDraft::new()
            .set_description("Replacement keyboards for support")
            .set_justification("Several keys no longer register")
            .finalise("req_1".into(), &requester())
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid input: kind is required");
    }

    #[test]
    fn line_items_need_quantity() {
        let err = draft()
            .add_line_item(LineItem::new("Keyboard", 0, "piece", 25_00))
            .finalise("req_1".into(), &requester())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn empty_patch_only_touches() {
        let requisition = draft().finalise("req_1".into(), &requester()).unwrap();
        let patch = RequisitionPatch::new();
        assert!(patch.is_empty());

        let patched = patch.apply(&requisition).unwrap();
        assert_eq!(patched.description, requisition.description);
        assert!(patched.updated_at >= requisition.updated_at);
        assert_eq!(patched.created_at, requisition.created_at);
    }

    #[test]
    fn patch_replaces_line_items() {
        let requisition = draft()
            .add_line_item(LineItem::new("Keyboard", 3, "piece", 25_00))
            .finalise("req_1".into(), &requester())
            .unwrap();
        let patched = RequisitionPatch::new()
            .set_line_items(vec![LineItem::new("Wireless keyboard", 2, "piece", 40_00)])
            .apply(&requisition)
            .unwrap();

        assert_eq!(patched.line_items.len(), 1);
        assert_eq!(patched.line_items[0].name, "Wireless keyboard");
    }
}

// PURCHASE ORDER MODULE TESTS
mod purchase_order_tests {
    use super::*;

    fn order() -> requisition_workflow::purchase_order::PurchaseOrder {
        let actor = Actor::new("user_p", Role::Administrative, "dept_purchasing");
        PurchaseOrderDraft::new()
            .set_vendor("Grupo Industrial")
            .set_total_amount(10_000)
            .finalise("po_1".into(), &actor)
            .unwrap()
    }

    #[test]
    fn vendor_is_required() {
        let actor = Actor::new("user_p", Role::Administrative, "dept_purchasing");
        let err = PurchaseOrderDraft::new()
            .set_vendor("   ")
            .finalise("po_1".into(), &actor)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid input: selected_vendor is required");
    }

    #[test]
    fn invoice_defaults_follow_the_order() {
        let order = order();
        let invoice = InvoiceDraft::new().finalise("inv_1".into(), &order).unwrap();

        assert_eq!(invoice.amount, 10_000);
        assert_eq!(invoice.total, 10_000);
        assert_eq!(invoice.order_id, "po_1");
        assert!(invoice.fiscal_folio.starts_with("FAC-"));
    }

    #[test]
    fn invoice_total_cannot_undercut_amount() {
        let order = order();
        let mut draft = InvoiceDraft::new().set_amount(500);
        draft.total = Some(400);
        assert!(matches!(
            draft.finalise("inv_1".into(), &order),
            Err(WorkflowError::Validation(_))
        ));
    }
}

// CONFIG AND APPROVAL SETTINGS
mod config_tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_builders() {
        let config = ServiceConfig::default()
            .with_database_path("/tmp/requisitions-test.db")
            .with_transaction_limits(8, Duration::from_millis(250));

        assert_eq!(config.database_path.to_str(), Some("/tmp/requisitions-test.db"));
        assert_eq!(config.max_transaction_attempts, 8);
    }

    #[test]
    fn stored_threshold_parsing() {
        assert_eq!(parse_minimum(Some("2")), 2);
        assert_eq!(parse_minimum(Some("-1")), 1);
        assert_eq!(parse_minimum(Some("")), 1);
    }
}

// DISPATCH SINK TESTS
mod sink_tests {
    use super::*;

    #[test]
    fn notifications_are_listed_per_recipient() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = sled::open(temp_dir.path().join("sinks.db"))?;
        let sink = SledNotificationSink::open(&db)?;

        for (n, recipient) in ["user_1", "user_2", "user_1"].into_iter().enumerate() {
            sink.notify(&Notification {
                id: format!("ntf_{n}"),
                recipient_id: recipient.to_string(),
                requisition_id: None,
                title: format!("note {n}"),
                body: String::new(),
                kind: NotificationKind::StatusChange,
                created_at: TimeStamp::new(),
            })?;
        }

        let titles: Vec<String> = sink.for_user("user_1")?.into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["note 0", "note 2"]);
        Ok(())
    }

    #[test]
    fn audit_entries_are_content_addressed() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = sled::open(temp_dir.path().join("audit.db"))?;
        let log = SledAuditLog::open(&db)?;
        let actor = Actor::new("user_9", Role::SystemAdmin, "dept_it").with_origin("192.168.1.20");

        let entry = audit_entry(
            &actor,
            "DELETE_PURCHASE_ORDER",
            "purchase_orders",
            "po_1",
            vec![],
            vec![],
        );
        log.record(&entry)?;
        // writing the identical entry again lands on the same key
        log.record(&entry)?;

        let entries = log.entries_for("po_1")?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].origin.as_deref(), Some("192.168.1.20"));
        Ok(())
    }
}
