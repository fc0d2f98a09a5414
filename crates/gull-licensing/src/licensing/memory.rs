use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::domain::{
    ActivityDetail, ActivityFlow, ActivityId, Address, AddressId, Advisory, AdvisoryId, Amendment,
    AmendmentId, AmendmentRecord, Condition, ConditionId, Contact, ContactId, LicenceApplication,
    LicenceId, NewAmendment, NewNote, NewReturn, Note, NoteId, Return, ReturnId, ReturnRecord,
    SpeciesSet, SpeciesSetId,
};
use super::repository::{LicenceStore, RepositoryError, StoreTransaction};
use super::species::Species;

/// Step at which an injected failure aborts a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Activity,
    SpeciesSet,
    Amendment,
    Conditions,
    Advisories,
    Note,
    Return,
    Commit,
}

impl FailPoint {
    pub const ALL: [FailPoint; 8] = [
        FailPoint::Activity,
        FailPoint::SpeciesSet,
        FailPoint::Amendment,
        FailPoint::Conditions,
        FailPoint::Advisories,
        FailPoint::Note,
        FailPoint::Return,
        FailPoint::Commit,
    ];
}

/// Number of rows in each table written by the workflows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub activities: usize,
    pub species_sets: usize,
    pub amendments: usize,
    pub amend_conditions: usize,
    pub amend_advisories: usize,
    pub notes: usize,
    pub returns: usize,
}

#[derive(Debug, Default)]
struct MemoryTables {
    applications: BTreeMap<LicenceId, LicenceApplication>,
    contacts: BTreeMap<ContactId, Contact>,
    addresses: BTreeMap<AddressId, Address>,
    conditions: BTreeMap<ConditionId, Condition>,
    advisories: BTreeMap<AdvisoryId, Advisory>,
    activities: BTreeMap<(ActivityFlow, ActivityId), ActivityDetail>,
    species_sets: BTreeMap<(ActivityFlow, SpeciesSetId), BTreeMap<Species, ActivityId>>,
    amendments: BTreeMap<AmendmentId, Amendment>,
    amend_conditions: Vec<(AmendmentId, ConditionId)>,
    amend_advisories: Vec<(AmendmentId, AdvisoryId)>,
    notes: BTreeMap<NoteId, Note>,
    returns: BTreeMap<ReturnId, Return>,
}

impl MemoryTables {
    fn species_set(&self, flow: ActivityFlow, id: SpeciesSetId) -> SpeciesSet {
        let keys = self
            .species_sets
            .get(&(flow, id))
            .cloned()
            .unwrap_or_default();
        SpeciesSet { id, keys }
    }

    fn activities_for(
        &self,
        flow: ActivityFlow,
        species: &SpeciesSet,
    ) -> BTreeMap<Species, ActivityDetail> {
        species
            .keys
            .iter()
            .filter_map(|(species, activity_id)| {
                self.activities
                    .get(&(flow, *activity_id))
                    .map(|detail| (*species, detail.clone()))
            })
            .collect()
    }

    fn amendment_record(&self, amendment: &Amendment) -> AmendmentRecord {
        let species = self.species_set(ActivityFlow::Amendment, amendment.species_id);
        let activities = self.activities_for(ActivityFlow::Amendment, &species);

        let mut conditions: Vec<Condition> = self
            .amend_conditions
            .iter()
            .filter(|(amendment_id, _)| *amendment_id == amendment.id)
            .filter_map(|(_, condition_id)| self.conditions.get(condition_id).cloned())
            .collect();
        conditions.sort_by_key(|condition| (condition.display_order, condition.id));

        let mut advisories: Vec<Advisory> = self
            .amend_advisories
            .iter()
            .filter(|(amendment_id, _)| *amendment_id == amendment.id)
            .filter_map(|(_, advisory_id)| self.advisories.get(advisory_id).cloned())
            .collect();
        advisories.sort_by_key(|advisory| (advisory.display_order, advisory.id));

        AmendmentRecord {
            amendment: amendment.clone(),
            species,
            activities,
            conditions,
            advisories,
        }
    }

    fn return_record(&self, record: &Return) -> ReturnRecord {
        let species = self.species_set(ActivityFlow::Return, record.species_id);
        let activities = self.activities_for(ActivityFlow::Return, &species);
        ReturnRecord {
            return_record: record.clone(),
            species,
            activities,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<MemoryTables>,
    sequence: AtomicI64,
    fail_point: Mutex<Option<FailPoint>>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, MemoryTables> {
        self.tables.lock().expect("memory store mutex poisoned")
    }

    /// Keys are drawn from one sequence and never reused, even after a rollback.
    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn check(&self, point: FailPoint) -> Result<(), RepositoryError> {
        let armed = *self.fail_point.lock().expect("fail point mutex poisoned");
        if armed == Some(point) {
            return Err(RepositoryError::Unavailable(format!(
                "injected failure at {point:?}"
            )));
        }
        Ok(())
    }
}

/// Transactional in-memory store used by tests, the demo and database-less deployments.
///
/// Writes are staged per transaction and applied atomically on commit. Foreign keys to
/// applications and catalogue rows are enforced at insert time.
#[derive(Debug, Clone, Default)]
pub struct MemoryLicenceStore {
    shared: Arc<Shared>,
}

impl MemoryLicenceStore {
    pub fn insert_application(&self, application: LicenceApplication) {
        self.shared
            .tables()
            .applications
            .insert(application.id, application);
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.shared.tables().contacts.insert(contact.id, contact);
    }

    pub fn insert_address(&self, address: Address) {
        self.shared.tables().addresses.insert(address.id, address);
    }

    pub fn insert_condition(&self, condition: Condition) {
        self.shared
            .tables()
            .conditions
            .insert(condition.id, condition);
    }

    pub fn insert_advisory(&self, advisory: Advisory) {
        self.shared
            .tables()
            .advisories
            .insert(advisory.id, advisory);
    }

    /// Arm (or with `None`, disarm) a failure for every subsequent transaction.
    pub fn fail_at(&self, point: Option<FailPoint>) {
        *self
            .shared
            .fail_point
            .lock()
            .expect("fail point mutex poisoned") = point;
    }

    pub fn row_counts(&self) -> RowCounts {
        let tables = self.shared.tables();
        RowCounts {
            activities: tables.activities.len(),
            species_sets: tables.species_sets.len(),
            amendments: tables.amendments.len(),
            amend_conditions: tables.amend_conditions.len(),
            amend_advisories: tables.amend_advisories.len(),
            notes: tables.notes.len(),
            returns: tables.returns.len(),
        }
    }
}

#[async_trait]
impl LicenceStore for MemoryLicenceStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError> {
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            staged: Vec::new(),
        }))
    }

    async fn application(
        &self,
        id: LicenceId,
    ) -> Result<Option<LicenceApplication>, RepositoryError> {
        Ok(self.shared.tables().applications.get(&id).cloned())
    }

    async fn contact(&self, id: ContactId) -> Result<Option<Contact>, RepositoryError> {
        Ok(self.shared.tables().contacts.get(&id).cloned())
    }

    async fn address(&self, id: AddressId) -> Result<Option<Address>, RepositoryError> {
        Ok(self.shared.tables().addresses.get(&id).cloned())
    }

    async fn amendment(
        &self,
        id: AmendmentId,
        include_deleted: bool,
    ) -> Result<Option<AmendmentRecord>, RepositoryError> {
        let tables = self.shared.tables();
        Ok(tables
            .amendments
            .get(&id)
            .filter(|amendment| include_deleted || amendment.deleted_at.is_none())
            .map(|amendment| tables.amendment_record(amendment)))
    }

    async fn amendments(
        &self,
        licence_id: LicenceId,
        include_deleted: bool,
    ) -> Result<Vec<AmendmentRecord>, RepositoryError> {
        let tables = self.shared.tables();
        Ok(tables
            .amendments
            .values()
            .filter(|amendment| amendment.licence_id == licence_id)
            .filter(|amendment| include_deleted || amendment.deleted_at.is_none())
            .map(|amendment| tables.amendment_record(amendment))
            .collect())
    }

    async fn soft_delete_amendment(&self, id: AmendmentId) -> Result<bool, RepositoryError> {
        let mut tables = self.shared.tables();
        match tables.amendments.get_mut(&id) {
            Some(amendment) if amendment.deleted_at.is_none() => {
                amendment.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn return_record(&self, id: ReturnId) -> Result<Option<ReturnRecord>, RepositoryError> {
        let tables = self.shared.tables();
        Ok(tables
            .returns
            .get(&id)
            .map(|record| tables.return_record(record)))
    }

    async fn returns(&self, licence_id: LicenceId) -> Result<Vec<ReturnRecord>, RepositoryError> {
        let tables = self.shared.tables();
        Ok(tables
            .returns
            .values()
            .filter(|record| record.licence_id == licence_id)
            .map(|record| tables.return_record(record))
            .collect())
    }

    async fn notes(&self, licence_id: LicenceId) -> Result<Vec<Note>, RepositoryError> {
        Ok(self
            .shared
            .tables()
            .notes
            .values()
            .filter(|note| note.licence_id == licence_id)
            .cloned()
            .collect())
    }

    async fn conditions(&self) -> Result<Vec<Condition>, RepositoryError> {
        let mut conditions: Vec<Condition> =
            self.shared.tables().conditions.values().cloned().collect();
        conditions.sort_by_key(|condition| (condition.display_order, condition.id));
        Ok(conditions)
    }

    async fn advisories(&self) -> Result<Vec<Advisory>, RepositoryError> {
        let mut advisories: Vec<Advisory> =
            self.shared.tables().advisories.values().cloned().collect();
        advisories.sort_by_key(|advisory| (advisory.display_order, advisory.id));
        Ok(advisories)
    }
}

#[derive(Debug)]
enum StagedRow {
    Activity(ActivityFlow, ActivityId, ActivityDetail),
    SpeciesSet(ActivityFlow, SpeciesSetId, BTreeMap<Species, ActivityId>),
    Amendment(Amendment),
    Condition(AmendmentId, ConditionId),
    Advisory(AmendmentId, AdvisoryId),
    Note(Note),
    Return(Return),
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    staged: Vec<StagedRow>,
}

impl MemoryTransaction {
    fn staged_activity(&self, flow: ActivityFlow, id: ActivityId) -> bool {
        self.staged.iter().any(|row| {
            matches!(row, StagedRow::Activity(staged_flow, staged_id, _)
                if *staged_flow == flow && *staged_id == id)
        })
    }

    fn staged_species_set(&self, flow: ActivityFlow, id: SpeciesSetId) -> bool {
        self.staged.iter().any(|row| {
            matches!(row, StagedRow::SpeciesSet(staged_flow, staged_id, _)
                if *staged_flow == flow && *staged_id == id)
        })
    }

    fn staged_amendment(&self, id: AmendmentId) -> bool {
        self.staged
            .iter()
            .any(|row| matches!(row, StagedRow::Amendment(amendment) if amendment.id == id))
    }

    fn require_licence(&self, licence_id: LicenceId) -> Result<(), RepositoryError> {
        if self
            .shared
            .tables()
            .applications
            .contains_key(&licence_id)
        {
            Ok(())
        } else {
            Err(RepositoryError::MissingReference {
                entity: "licence application",
                id: licence_id.0,
            })
        }
    }

    fn require_species_set(
        &self,
        flow: ActivityFlow,
        id: SpeciesSetId,
    ) -> Result<(), RepositoryError> {
        let committed = self
            .shared
            .tables()
            .species_sets
            .contains_key(&(flow, id));
        if committed || self.staged_species_set(flow, id) {
            Ok(())
        } else {
            Err(RepositoryError::MissingReference {
                entity: "species set",
                id: id.0,
            })
        }
    }

    fn require_amendment(&self, id: AmendmentId) -> Result<(), RepositoryError> {
        let committed = self.shared.tables().amendments.contains_key(&id);
        if committed || self.staged_amendment(id) {
            Ok(())
        } else {
            Err(RepositoryError::MissingReference {
                entity: "amendment",
                id: id.0,
            })
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_activity(
        &mut self,
        flow: ActivityFlow,
        detail: &ActivityDetail,
    ) -> Result<ActivityId, RepositoryError> {
        self.shared.check(FailPoint::Activity)?;
        let id = ActivityId(self.shared.next_id());
        self.staged
            .push(StagedRow::Activity(flow, id, detail.clone()));
        Ok(id)
    }

    async fn insert_species_set(
        &mut self,
        flow: ActivityFlow,
        keys: &BTreeMap<Species, ActivityId>,
    ) -> Result<SpeciesSetId, RepositoryError> {
        self.shared.check(FailPoint::SpeciesSet)?;
        for activity_id in keys.values() {
            let committed = self
                .shared
                .tables()
                .activities
                .contains_key(&(flow, *activity_id));
            if !committed && !self.staged_activity(flow, *activity_id) {
                return Err(RepositoryError::MissingReference {
                    entity: "activity",
                    id: activity_id.0,
                });
            }
        }
        let id = SpeciesSetId(self.shared.next_id());
        self.staged
            .push(StagedRow::SpeciesSet(flow, id, keys.clone()));
        Ok(id)
    }

    async fn insert_amendment(
        &mut self,
        amendment: &NewAmendment,
        species_id: SpeciesSetId,
    ) -> Result<Amendment, RepositoryError> {
        self.shared.check(FailPoint::Amendment)?;
        self.require_licence(amendment.licence_id)?;
        self.require_species_set(ActivityFlow::Amendment, species_id)?;

        let row = Amendment {
            id: AmendmentId(self.shared.next_id()),
            licence_id: amendment.licence_id,
            species_id,
            amend_reason: amendment.amend_reason.clone(),
            amended_by: amendment.amended_by.clone(),
            assessment: amendment.assessment.clone(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.staged.push(StagedRow::Amendment(row.clone()));
        Ok(row)
    }

    async fn link_conditions(
        &mut self,
        amendment_id: AmendmentId,
        condition_ids: &[ConditionId],
    ) -> Result<(), RepositoryError> {
        self.shared.check(FailPoint::Conditions)?;
        self.require_amendment(amendment_id)?;
        for condition_id in condition_ids {
            if !self
                .shared
                .tables()
                .conditions
                .contains_key(condition_id)
            {
                return Err(RepositoryError::MissingReference {
                    entity: "condition",
                    id: condition_id.0,
                });
            }
            self.staged
                .push(StagedRow::Condition(amendment_id, *condition_id));
        }
        Ok(())
    }

    async fn link_advisories(
        &mut self,
        amendment_id: AmendmentId,
        advisory_ids: &[AdvisoryId],
    ) -> Result<(), RepositoryError> {
        self.shared.check(FailPoint::Advisories)?;
        self.require_amendment(amendment_id)?;
        for advisory_id in advisory_ids {
            if !self
                .shared
                .tables()
                .advisories
                .contains_key(advisory_id)
            {
                return Err(RepositoryError::MissingReference {
                    entity: "advisory",
                    id: advisory_id.0,
                });
            }
            self.staged
                .push(StagedRow::Advisory(amendment_id, *advisory_id));
        }
        Ok(())
    }

    async fn insert_note(&mut self, note: &NewNote) -> Result<Note, RepositoryError> {
        self.shared.check(FailPoint::Note)?;
        self.require_licence(note.licence_id)?;

        let row = Note {
            id: NoteId(self.shared.next_id()),
            licence_id: note.licence_id,
            note: note.note.clone(),
            created_by: note.created_by.clone(),
            created_at: Utc::now(),
        };
        self.staged.push(StagedRow::Note(row.clone()));
        Ok(row)
    }

    async fn insert_return(
        &mut self,
        record: &NewReturn,
        species_id: SpeciesSetId,
    ) -> Result<Return, RepositoryError> {
        self.shared.check(FailPoint::Return)?;
        self.require_licence(record.licence_id)?;
        self.require_species_set(ActivityFlow::Return, species_id)?;

        let row = Return {
            id: ReturnId(self.shared.next_id()),
            licence_id: record.licence_id,
            species_id,
            confirm_declaration: record.confirm_declaration,
            created_at: Utc::now(),
        };
        self.staged.push(StagedRow::Return(row.clone()));
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.shared.check(FailPoint::Commit)?;

        let MemoryTransaction { shared, staged } = *self;
        let mut tables = shared.tables();
        for row in staged {
            match row {
                StagedRow::Activity(flow, id, detail) => {
                    tables.activities.insert((flow, id), detail);
                }
                StagedRow::SpeciesSet(flow, id, keys) => {
                    tables.species_sets.insert((flow, id), keys);
                }
                StagedRow::Amendment(amendment) => {
                    tables.amendments.insert(amendment.id, amendment);
                }
                StagedRow::Condition(amendment_id, condition_id) => {
                    tables.amend_conditions.push((amendment_id, condition_id));
                }
                StagedRow::Advisory(amendment_id, advisory_id) => {
                    tables.amend_advisories.push((amendment_id, advisory_id));
                }
                StagedRow::Note(note) => {
                    tables.notes.insert(note.id, note);
                }
                StagedRow::Return(record) => {
                    tables.returns.insert(record.id, record);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}
