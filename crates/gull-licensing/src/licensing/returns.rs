use std::sync::Arc;

use tracing::{info, warn};

use super::content::return_personalisation;
use super::domain::{ActivityFlow, ApplicationGraph, LicenceId, ReturnId, ReturnRecord, ReturnRequest};
use super::repository::{abandon, application_graph, LicenceStore, RepositoryError, StoreTransaction};
use super::service::WorkflowError;
use super::species::insert_species_activities;
use crate::notifications::{dispatch_all, Notification, NotificationDispatcher, NotificationTemplate};

/// Records post-licence activity returns and tells the holder and applicant.
pub struct ReturnWorkflow<S, D> {
    store: Arc<S>,
    dispatcher: Arc<D>,
}

impl<S, D> ReturnWorkflow<S, D>
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    pub fn new(store: Arc<S>, dispatcher: Arc<D>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn create(&self, request: ReturnRequest) -> Result<ReturnRecord, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let written = match write_return(tx.as_mut(), &request).await {
            Ok(written) => written,
            Err(err) => {
                abandon(tx).await;
                return Err(err.into());
            }
        };
        tx.commit().await?;

        let return_id = written.return_record.id;
        let licence_id = written.return_record.licence_id;
        info!(
            return_id = return_id.0,
            licence_id = licence_id.0,
            species = written.species.keys.len(),
            "return committed"
        );

        let (graph, committed) = futures::join!(
            application_graph(self.store.as_ref(), licence_id),
            self.store.return_record(return_id),
        );
        let record = match committed {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(return_id = return_id.0, "committed return not readable; using written rows");
                written
            }
            Err(err) => {
                warn!(return_id = return_id.0, error = %err, "failed to re-read return");
                written
            }
        };

        let notifications = notifications(graph.as_ref(), &record);
        dispatch_all(self.dispatcher.as_ref(), notifications).await;

        Ok(record)
    }

    pub async fn find_one(&self, id: ReturnId) -> Result<ReturnRecord, WorkflowError> {
        self.store
            .return_record(id)
            .await?
            .ok_or(WorkflowError::ReturnNotFound { id: id.0 })
    }

    pub async fn find_all(&self, licence_id: LicenceId) -> Result<Vec<ReturnRecord>, WorkflowError> {
        Ok(self.store.returns(licence_id).await?)
    }
}

/// One email when holder and applicant are the same contact, otherwise one per known address.
fn notifications(graph: Option<&ApplicationGraph>, record: &ReturnRecord) -> Vec<Notification> {
    let Some(graph) = graph else {
        return Vec::new();
    };

    let personalisation = return_personalisation(Some(graph), record);
    let reference = format!("return-{}", record.return_record.id.0);

    let holder = graph.holder.as_ref().and_then(|contact| contact.email());
    let recipients: Vec<&str> =
        if graph.application.licence_holder_id == graph.application.licence_applicant_id {
            holder.into_iter().collect()
        } else {
            let applicant = graph.applicant.as_ref().and_then(|contact| contact.email());
            holder.into_iter().chain(applicant).collect()
        };

    recipients
        .into_iter()
        .map(|recipient| {
            Notification::new(
                NotificationTemplate::Return,
                recipient,
                personalisation.clone(),
            )
            .with_reference(reference.clone())
        })
        .collect()
}

async fn write_return(
    tx: &mut dyn StoreTransaction,
    request: &ReturnRequest,
) -> Result<ReturnRecord, RepositoryError> {
    let species = insert_species_activities(tx, ActivityFlow::Return, &request.activities).await?;
    let return_record = tx.insert_return(&request.return_record, species.id).await?;

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

    Ok(ReturnRecord {
        return_record,
        species,
        activities,
    })
}
