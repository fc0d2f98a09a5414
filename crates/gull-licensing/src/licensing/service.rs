use std::sync::Arc;

use super::amendments::AmendmentWorkflow;
use super::catalogue::CatalogueCategories;
use super::domain::{
    Advisory, AmendmentId, AmendmentRecord, AmendmentRequest, Condition, LicenceId, Note,
    ReturnId, ReturnRecord, ReturnRequest,
};
use super::repository::{LicenceStore, RepositoryError};
use super::returns::ReturnWorkflow;
use crate::notifications::NotificationDispatcher;

/// Service composing the amendment and return workflows over one store and dispatcher.
pub struct LicensingService<S, D> {
    store: Arc<S>,
    amendments: AmendmentWorkflow<S, D>,
    returns: ReturnWorkflow<S, D>,
}

impl<S, D> LicensingService<S, D>
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<D>,
        categories: CatalogueCategories,
        internal_mailbox: impl Into<String>,
    ) -> Self {
        let amendments = AmendmentWorkflow::new(
            store.clone(),
            dispatcher.clone(),
            Arc::new(categories),
            internal_mailbox,
        );
        let returns = ReturnWorkflow::new(store.clone(), dispatcher);
        Self {
            store,
            amendments,
            returns,
        }
    }

    pub fn amendments(&self) -> &AmendmentWorkflow<S, D> {
        &self.amendments
    }

    pub fn returns(&self) -> &ReturnWorkflow<S, D> {
        &self.returns
    }

    pub async fn create_amendment(
        &self,
        request: AmendmentRequest,
    ) -> Result<AmendmentRecord, WorkflowError> {
        self.amendments.create(request).await
    }

    pub async fn create_return(&self, request: ReturnRequest) -> Result<ReturnRecord, WorkflowError> {
        self.returns.create(request).await
    }

    pub async fn amendment(
        &self,
        id: AmendmentId,
        include_deleted: bool,
    ) -> Result<AmendmentRecord, WorkflowError> {
        self.amendments.find_one(id, include_deleted).await
    }

    pub async fn licence_amendments(
        &self,
        licence_id: LicenceId,
        include_deleted: bool,
    ) -> Result<Vec<AmendmentRecord>, WorkflowError> {
        self.amendments.find_all(licence_id, include_deleted).await
    }

    pub async fn delete_amendment(&self, id: AmendmentId) -> Result<(), WorkflowError> {
        self.amendments.delete(id).await
    }

    pub async fn return_record(&self, id: ReturnId) -> Result<ReturnRecord, WorkflowError> {
        self.returns.find_one(id).await
    }

    pub async fn licence_returns(
        &self,
        licence_id: LicenceId,
    ) -> Result<Vec<ReturnRecord>, WorkflowError> {
        self.returns.find_all(licence_id).await
    }

    pub async fn notes(&self, licence_id: LicenceId) -> Result<Vec<Note>, WorkflowError> {
        Ok(self.store.notes(licence_id).await?)
    }

    /// Condition catalogue in display order.
    pub async fn conditions(&self) -> Result<Vec<Condition>, WorkflowError> {
        Ok(self.store.conditions().await?)
    }

    pub async fn advisories(&self) -> Result<Vec<Advisory>, WorkflowError> {
        Ok(self.store.advisories().await?)
    }
}

/// Error raised by the licensing workflows.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("amendment {id} not found")]
    AmendmentNotFound { id: i64 },
    #[error("return {id} not found")]
    ReturnNotFound { id: i64 },
}
