pub mod builder;
pub mod sync;

pub use builder::{ApprovalFlowBuilder, ApprovalPlan, ApprovalPolicy, FlowRequest};
pub use sync::{
    map_external_status, ApprovalCallback, ApprovalFlowSynchronizer, ExternalStep, MergeOutcome,
    PEER_APPROVED_MARKER,
};

pub(crate) fn normalize_key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
