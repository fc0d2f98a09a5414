//! Gull control licence amendments and returns.
//!
//! Each workflow writes its rows inside one store transaction, commits, and only then
//! reads the committed graph back to build notification emails. Email delivery never
//! affects whether a write succeeds.

pub mod amendments;
pub mod catalogue;
pub mod content;
pub mod domain;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod returns;
pub mod router;
pub mod service;
pub mod species;

#[cfg(test)]
mod tests;

pub use amendments::AmendmentWorkflow;
pub use catalogue::{CatalogueCategories, ConditionCategory};
pub use domain::{
    ActionRecord, ActivityDetail, ActivityFlow, ActivityId, Address, AddressId, Advisory,
    AdvisoryId, Amendment, AmendmentId, AmendmentRecord, AmendmentRequest, ApplicationGraph,
    Condition, ConditionId, Contact, ContactId, ControlAction, LicenceApplication, LicenceId,
    LicencePeriod, NewAmendment, NewNote, NewReturn, Note, NoteId, Return, ReturnId,
    ReturnRecord, ReturnRequest, SpeciesSet, SpeciesSetId,
};
pub use memory::{FailPoint, MemoryLicenceStore, RowCounts};
pub use postgres::PgLicenceStore;
pub use repository::{application_graph, LicenceStore, RepositoryError, StoreTransaction};
pub use returns::ReturnWorkflow;
pub use router::licensing_router;
pub use service::{LicensingService, WorkflowError};
pub use species::{Species, SpeciesDescriptor};
