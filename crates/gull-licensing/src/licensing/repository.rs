use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::warn;

use super::domain::{
    ActivityDetail, ActivityFlow, ActivityId, Address, AddressId, Advisory, AdvisoryId, Amendment,
    AmendmentId, AmendmentRecord, ApplicationGraph, Condition, ConditionId, Contact, ContactId,
    LicenceApplication, LicenceId, NewAmendment, NewNote, NewReturn, Note, Return, ReturnId,
    ReturnRecord, SpeciesSetId,
};
use super::species::Species;

/// Read side of the licensing tables plus the entry point for transactional writes.
#[async_trait]
pub trait LicenceStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError>;

    async fn application(
        &self,
        id: LicenceId,
    ) -> Result<Option<LicenceApplication>, RepositoryError>;
    async fn contact(&self, id: ContactId) -> Result<Option<Contact>, RepositoryError>;
    async fn address(&self, id: AddressId) -> Result<Option<Address>, RepositoryError>;

    async fn amendment(
        &self,
        id: AmendmentId,
        include_deleted: bool,
    ) -> Result<Option<AmendmentRecord>, RepositoryError>;
    async fn amendments(
        &self,
        licence_id: LicenceId,
        include_deleted: bool,
    ) -> Result<Vec<AmendmentRecord>, RepositoryError>;
    /// Marks the amendment deleted. Returns false when no live amendment matched.
    async fn soft_delete_amendment(&self, id: AmendmentId) -> Result<bool, RepositoryError>;

    async fn return_record(&self, id: ReturnId) -> Result<Option<ReturnRecord>, RepositoryError>;
    async fn returns(&self, licence_id: LicenceId) -> Result<Vec<ReturnRecord>, RepositoryError>;

    async fn notes(&self, licence_id: LicenceId) -> Result<Vec<Note>, RepositoryError>;
    async fn conditions(&self) -> Result<Vec<Condition>, RepositoryError>;
    async fn advisories(&self) -> Result<Vec<Advisory>, RepositoryError>;
}

/// One open database transaction. Dropping it without `commit` discards every insert.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_activity(
        &mut self,
        flow: ActivityFlow,
        detail: &ActivityDetail,
    ) -> Result<ActivityId, RepositoryError>;
    async fn insert_species_set(
        &mut self,
        flow: ActivityFlow,
        keys: &BTreeMap<Species, ActivityId>,
    ) -> Result<SpeciesSetId, RepositoryError>;
    async fn insert_amendment(
        &mut self,
        amendment: &NewAmendment,
        species_id: SpeciesSetId,
    ) -> Result<Amendment, RepositoryError>;
    async fn link_conditions(
        &mut self,
        amendment_id: AmendmentId,
        condition_ids: &[ConditionId],
    ) -> Result<(), RepositoryError>;
    async fn link_advisories(
        &mut self,
        amendment_id: AmendmentId,
        advisory_ids: &[AdvisoryId],
    ) -> Result<(), RepositoryError>;
    async fn insert_note(&mut self, note: &NewNote) -> Result<Note, RepositoryError>;
    async fn insert_return(
        &mut self,
        record: &NewReturn,
        species_id: SpeciesSetId,
    ) -> Result<Return, RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("{entity} {id} does not exist")]
    MissingReference { entity: &'static str, id: i64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Roll back after a failed write. The original failure is what the caller reports.
pub(crate) async fn abandon(tx: Box<dyn StoreTransaction>) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "rollback failed after aborted write");
    }
}

/// Load the licence application and the records notifications are built from.
///
/// Returns `None` when the application itself cannot be read. Contact and address lookups run
/// concurrently and degrade to `None` on failure, since the write they follow has committed.
pub async fn application_graph<S>(store: &S, licence_id: LicenceId) -> Option<ApplicationGraph>
where
    S: LicenceStore + ?Sized,
{
    let application = match store.application(licence_id).await {
        Ok(Some(application)) => application,
        Ok(None) => {
            warn!(licence_id = licence_id.0, "licence application not found for notification");
            return None;
        }
        Err(err) => {
            warn!(licence_id = licence_id.0, error = %err, "failed to load licence application");
            return None;
        }
    };

    let (holder, applicant, site_address) = futures::join!(
        store.contact(application.licence_holder_id),
        store.contact(application.licence_applicant_id),
        store.address(application.site_address_id),
    );
    let holder = best_effort(holder, "licence holder");
    let applicant = best_effort(applicant, "licence applicant");
    let site_address = best_effort(site_address, "site address");

    let holder_address = match holder.as_ref().and_then(|contact| contact.postal_address_id) {
        Some(address_id) => best_effort(store.address(address_id).await, "holder address"),
        None => None,
    };

    Some(ApplicationGraph {
        application,
        holder,
        applicant,
        site_address,
        holder_address,
    })
}

fn best_effort<T>(result: Result<Option<T>, RepositoryError>, what: &'static str) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(record = what, error = %err, "lookup failed; continuing without it");
            None
        }
    }
}
