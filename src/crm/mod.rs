//! CRM integration: schema contract, preflight validation, suppression list
//! paging, and prospect upsert against the fund's Notion pipeline database.

pub mod connector;
pub mod schema;

pub use connector::{
    CrmConnector, CrmRecord, CrmTransport, HttpTransport, ProspectPayload, UpsertAction,
    UpsertOutcome,
};
pub use schema::{PropertyKind, SchemaContract, ValidationReport};
