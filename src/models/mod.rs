pub mod details;
pub mod history;
pub mod identifier;
pub mod notification;
pub mod request;
pub mod summary;

pub use details::{is_protected_on_update, row_keys, DetailsEntity};
pub use history::{ApproverChainEntry, TransactionHistory};
pub use identifier::ApprovalIdentifier;
pub use notification::NotificationEnvelope;
pub use request::{
    parse_requests, ActionDetail, Approver, CanonicalRequest, Operation, Progress, Telemetry,
};
pub use summary::SummaryRow;
