pub mod approval;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod policy;
pub mod purchase_order;
pub mod purchasing;
pub mod requisition;
pub mod sequence;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{ValidationError, WorkflowError, WorkflowResult};
pub use service::{ApprovalOutcome, RequisitionService};
