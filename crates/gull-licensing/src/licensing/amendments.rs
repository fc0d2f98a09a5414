use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use super::catalogue::CatalogueCategories;
use super::content::amendment_personalisation;
use super::domain::{
    ActivityFlow, AdvisoryId, AmendmentId, AmendmentRecord, AmendmentRequest, ApplicationGraph,
    ConditionId, LicenceId, NewNote,
};
use super::repository::{abandon, application_graph, LicenceStore, RepositoryError, StoreTransaction};
use super::service::WorkflowError;
use super::species::insert_species_activities;
use crate::notifications::{dispatch_all, Notification, NotificationDispatcher, NotificationTemplate};

/// Creates amendments in one transaction, then emails the holder, applicant and licensing team.
pub struct AmendmentWorkflow<S, D> {
    store: Arc<S>,
    dispatcher: Arc<D>,
    categories: Arc<CatalogueCategories>,
    internal_mailbox: String,
}

impl<S, D> AmendmentWorkflow<S, D>
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<D>,
        categories: Arc<CatalogueCategories>,
        internal_mailbox: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            categories,
            internal_mailbox: internal_mailbox.into(),
        }
    }

    /// Persist the amendment graph and its audit note atomically, then notify.
    ///
    /// Notification problems are logged; once the commit succeeds the call succeeds.
    pub async fn create(&self, request: AmendmentRequest) -> Result<AmendmentRecord, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let written = match write_amendment(tx.as_mut(), &request).await {
            Ok(written) => written,
            Err(err) => {
                abandon(tx).await;
                return Err(err.into());
            }
        };
        tx.commit().await?;

        let amendment_id = written.amendment.id;
        let licence_id = written.amendment.licence_id;
        info!(
            amendment_id = amendment_id.0,
            licence_id = licence_id.0,
            species = written.species.keys.len(),
            "amendment committed"
        );

        let (graph, committed) = futures::join!(
            application_graph(self.store.as_ref(), licence_id),
            self.store.amendment(amendment_id, false),
        );
        let record = match committed {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(amendment_id = amendment_id.0, "committed amendment not readable; using written rows");
                written
            }
            Err(err) => {
                warn!(amendment_id = amendment_id.0, error = %err, "failed to re-read amendment");
                written
            }
        };

        let notifications = self.notifications(graph.as_ref(), &record);
        dispatch_all(self.dispatcher.as_ref(), notifications).await;

        Ok(record)
    }

    /// Holder and applicant are not deduplicated; the internal mailbox always receives a copy.
    fn notifications(
        &self,
        graph: Option<&ApplicationGraph>,
        record: &AmendmentRecord,
    ) -> Vec<Notification> {
        let personalisation = amendment_personalisation(graph, record, &self.categories);
        let reference = format!("amendment-{}", record.amendment.id.0);

        let holder = graph
            .and_then(|graph| graph.holder.as_ref())
            .and_then(|contact| contact.email());
        let applicant = graph
            .and_then(|graph| graph.applicant.as_ref())
            .and_then(|contact| contact.email());

        holder
            .into_iter()
            .chain(applicant)
            .chain(Some(self.internal_mailbox.as_str()))
            .map(|recipient| {
                Notification::new(
                    NotificationTemplate::Amendment,
                    recipient,
                    personalisation.clone(),
                )
                .with_reference(reference.clone())
            })
            .collect()
    }

    pub async fn find_one(
        &self,
        id: AmendmentId,
        include_deleted: bool,
    ) -> Result<AmendmentRecord, WorkflowError> {
        self.store
            .amendment(id, include_deleted)
            .await?
            .ok_or(WorkflowError::AmendmentNotFound { id: id.0 })
    }

    pub async fn find_all(
        &self,
        licence_id: LicenceId,
        include_deleted: bool,
    ) -> Result<Vec<AmendmentRecord>, WorkflowError> {
        Ok(self.store.amendments(licence_id, include_deleted).await?)
    }

    /// Soft delete. Deleting an already deleted amendment reports it as not found.
    pub async fn delete(&self, id: AmendmentId) -> Result<(), WorkflowError> {
        if self.store.soft_delete_amendment(id).await? {
            info!(amendment_id = id.0, "amendment deleted");
            Ok(())
        } else {
            Err(WorkflowError::AmendmentNotFound { id: id.0 })
        }
    }
}

async fn write_amendment(
    tx: &mut dyn StoreTransaction,
    request: &AmendmentRequest,
) -> Result<AmendmentRecord, RepositoryError> {
    let species =
        insert_species_activities(tx, ActivityFlow::Amendment, &request.activities).await?;
    let amendment = tx.insert_amendment(&request.amendment, species.id).await?;

    let condition_ids: Vec<ConditionId> = unique(&request.optional_conditions);
    let advisory_ids: Vec<AdvisoryId> = unique(&request.optional_advisories);
    tx.link_conditions(amendment.id, &condition_ids).await?;
    tx.link_advisories(amendment.id, &advisory_ids).await?;

    tx.insert_note(&NewNote {
        licence_id: amendment.licence_id,
        note: amendment.amend_reason.clone(),
        created_by: amendment.amended_by.clone(),
    })
    .await?;

    let activities = species
        .keys
        .keys()
        .filter_map(|species| {
            request
                .activities
                .get(species)
                .map(|detail| (*species, detail.clone()))
        })
        .collect();

    Ok(AmendmentRecord {
        amendment,
        species,
        activities,
        conditions: Vec::new(),
        advisories: Vec::new(),
    })
}

/// Each catalogue entry is linked once, however often the request repeats it.
fn unique<T: Copy + Ord>(ids: &[T]) -> Vec<T> {
    ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}
