pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod eligibility;
pub mod errors;
pub mod flows;
pub mod mutation;
pub mod ports;
pub mod service;
pub mod store;

pub use approvals::{
    ApprovalCallback, ApprovalFlowBuilder, ApprovalFlowSynchronizer, ApprovalPolicy, ExternalStep,
};
pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::approval::{ApprovalFlow, ApprovalStep, StepDecision};
pub use domain::identity::{Approver, UnitId, UserId};
pub use domain::location::{Location, LocationId, LocationKind};
pub use domain::machine::{BorrowStatus, BorrowTerms, Machine, MachineId, MachineStatus};
pub use domain::ticket::{
    InventoryCount, OperationType, Ticket, TicketCategory, TicketDetail, TicketId, TicketStatus,
};
pub use eligibility::EligibilityRules;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{TicketEvent, TicketStateMachine};
pub use ports::{ApprovalDispatch, IdentityDirectory};
pub use service::{CallbackDisposition, CallbackOutcome, NewTicket, RequestContext, TicketService};
pub use store::{InMemoryStore, StoreError, TicketStore, UnitOfWork};
