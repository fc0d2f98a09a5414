//! PostgreSQL-backed licence store.
//!
//! Tables (schema managed outside this crate):
//! `licence_applications`, `contacts`, `addresses`, `conditions`, `advisories`,
//! `amend_activities` / `return_activities` (one `<action>`, `<action>_quantity`,
//! `<action>_date` column triple per control action), `amend_species` / `return_species`
//! (one nullable key column per species), `amendments` (with `deleted_at`), `returns`,
//! `amend_conditions`, `amend_advisories` and `notes`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgDatabaseError, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::warn;

use super::domain::{
    ActionRecord, ActivityDetail, ActivityFlow, ActivityId, Address, AddressId, Advisory,
    AdvisoryId, Amendment, AmendmentId, AmendmentRecord, Condition, ConditionId, Contact,
    ContactId, ControlAction, LicenceApplication, LicenceId, LicencePeriod, NewAmendment,
    NewNote, NewReturn, Note, NoteId, Return, ReturnId, ReturnRecord, SpeciesSet, SpeciesSetId,
};
use super::repository::{LicenceStore, RepositoryError, StoreTransaction};
use super::species::Species;

const AMENDMENT_COLUMNS: &str =
    "id, licence_id, species_id, amend_reason, amended_by, assessment, created_at, deleted_at";
const RETURN_COLUMNS: &str = "id, licence_id, species_id, confirm_declaration, created_at";

fn activity_table(flow: ActivityFlow) -> &'static str {
    match flow {
        ActivityFlow::Amendment => "amend_activities",
        ActivityFlow::Return => "return_activities",
    }
}

fn species_table(flow: ActivityFlow) -> &'static str {
    match flow {
        ActivityFlow::Amendment => "amend_species",
        ActivityFlow::Return => "return_species",
    }
}

fn insert_activity_sql(flow: ActivityFlow) -> String {
    let mut columns = Vec::with_capacity(ControlAction::ALL.len() * 3);
    for action in ControlAction::ALL {
        let column = action.column();
        columns.push(column.to_string());
        columns.push(format!("{column}_quantity"));
        columns.push(format!("{column}_date"));
    }
    let placeholders: Vec<String> = (1..=columns.len()).map(|index| format!("${index}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
        activity_table(flow),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn insert_species_sql(flow: ActivityFlow) -> String {
    let columns: Vec<&str> = Species::ALL.iter().map(|species| species.column()).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|index| format!("${index}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
        species_table(flow),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn quantity_to_db(quantity: Option<u32>) -> Option<i64> {
    quantity.map(i64::from)
}

fn quantity_from_db(quantity: Option<i64>) -> Option<u32> {
    quantity.and_then(|value| match u32::try_from(value) {
        Ok(quantity) => Some(quantity),
        Err(_) => {
            warn!(stored = value, "activity quantity out of range; reading it as absent");
            None
        }
    })
}

/// Entity name reported for a foreign key into `table`.
fn referenced_entity(table: &str) -> &'static str {
    match table {
        "licence_applications" => "licence application",
        "amend_species" | "return_species" => "species set",
        "amend_activities" | "return_activities" => "activity",
        "amendments" => "amendment",
        "conditions" => "condition",
        "advisories" => "advisory",
        "contacts" => "contact",
        "addresses" => "address",
        _ => "record",
    }
}

/// Parses `Key (condition_id)=(999) is not present in table "conditions".`
fn missing_key(detail: &str) -> Option<(&'static str, i64)> {
    let (_, rest) = detail.split_once(")=(")?;
    let (id, rest) = rest.split_once(')')?;
    let id = id.trim().parse().ok()?;
    let (_, table) = rest.split_once("table \"")?;
    let (table, _) = table.split_once('"')?;
    Some((referenced_entity(table), id))
}

fn classify_violation(kind: ErrorKind, detail: Option<&str>) -> Option<RepositoryError> {
    match kind {
        ErrorKind::UniqueViolation => Some(RepositoryError::Conflict),
        ErrorKind::ForeignKeyViolation => {
            let (entity, id) = detail.and_then(missing_key)?;
            Some(RepositoryError::MissingReference { entity, id })
        }
        _ => None,
    }
}

/// Constraint violations on writes surface as the same errors the in-memory store reports.
fn write_error(err: sqlx::Error) -> RepositoryError {
    let classified = err.as_database_error().and_then(|db| {
        let detail = db
            .try_downcast_ref::<PgDatabaseError>()
            .and_then(|pg| pg.detail());
        classify_violation(db.kind(), detail)
    });
    classified.unwrap_or(RepositoryError::Database(err))
}

fn activity_from_row(row: &PgRow) -> Result<ActivityDetail, sqlx::Error> {
    let mut detail = ActivityDetail::default();
    for action in ControlAction::ALL {
        let column = action.column();
        let selected: bool = row.try_get(column)?;
        if !selected {
            continue;
        }
        let quantity: Option<i64> = row.try_get(format!("{column}_quantity").as_str())?;
        let date: Option<NaiveDate> = row.try_get(format!("{column}_date").as_str())?;
        detail.set_action(
            action,
            Some(ActionRecord {
                quantity: quantity_from_db(quantity),
                date,
            }),
        );
    }
    Ok(detail)
}

fn amendment_from_row(row: &PgRow) -> Result<Amendment, sqlx::Error> {
    Ok(Amendment {
        id: AmendmentId(row.try_get("id")?),
        licence_id: LicenceId(row.try_get("licence_id")?),
        species_id: SpeciesSetId(row.try_get("species_id")?),
        amend_reason: row.try_get("amend_reason")?,
        amended_by: row.try_get("amended_by")?,
        assessment: row.try_get("assessment")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        deleted_at: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at")?,
    })
}

fn return_from_row(row: &PgRow) -> Result<Return, sqlx::Error> {
    Ok(Return {
        id: ReturnId(row.try_get("id")?),
        licence_id: LicenceId(row.try_get("licence_id")?),
        species_id: SpeciesSetId(row.try_get("species_id")?),
        confirm_declaration: row.try_get("confirm_declaration")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn note_from_row(row: &PgRow) -> Result<Note, sqlx::Error> {
    Ok(Note {
        id: NoteId(row.try_get("id")?),
        licence_id: LicenceId(row.try_get("licence_id")?),
        note: row.try_get("note")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn condition_from_row(row: &PgRow) -> Result<Condition, sqlx::Error> {
    Ok(Condition {
        id: ConditionId(row.try_get("id")?),
        condition: row.try_get("condition")?,
        display_order: row.try_get("display_order")?,
        default_condition: row.try_get("default_condition")?,
    })
}

fn advisory_from_row(row: &PgRow) -> Result<Advisory, sqlx::Error> {
    Ok(Advisory {
        id: AdvisoryId(row.try_get("id")?),
        advisory: row.try_get("advisory")?,
        display_order: row.try_get("display_order")?,
        default_advisory: row.try_get("default_advisory")?,
    })
}

/// Licence store over a shared `PgPool`.
#[derive(Debug, Clone)]
pub struct PgLicenceStore {
    pool: PgPool,
}

impl PgLicenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn species_graph(
        &self,
        flow: ActivityFlow,
        species_id: SpeciesSetId,
    ) -> Result<(SpeciesSet, BTreeMap<Species, ActivityDetail>), RepositoryError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", species_table(flow));
        let row = sqlx::query(&sql)
            .bind(species_id.0)
            .fetch_optional(&self.pool)
            .await?;

        let mut keys = BTreeMap::new();
        if let Some(row) = row {
            for species in Species::ALL {
                let key: Option<i64> = row.try_get(species.column())?;
                if let Some(key) = key {
                    keys.insert(species, ActivityId(key));
                }
            }
        }

        let activity_sql = format!("SELECT * FROM {} WHERE id = $1", activity_table(flow));
        let mut activities = BTreeMap::new();
        for (species, activity_id) in &keys {
            let row = sqlx::query(&activity_sql)
                .bind(activity_id.0)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                activities.insert(*species, activity_from_row(&row)?);
            }
        }

        Ok((
            SpeciesSet {
                id: species_id,
                keys,
            },
            activities,
        ))
    }

    async fn amendment_graph(
        &self,
        amendment: Amendment,
    ) -> Result<AmendmentRecord, RepositoryError> {
        let (species, activities) = self
            .species_graph(ActivityFlow::Amendment, amendment.species_id)
            .await?;

        let conditions = sqlx::query(
            "SELECT c.id, c.condition, c.display_order, c.default_condition \
             FROM amend_conditions ac JOIN conditions c ON c.id = ac.condition_id \
             WHERE ac.amendment_id = $1 ORDER BY c.display_order, c.id",
        )
        .bind(amendment.id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(condition_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let advisories = sqlx::query(
            "SELECT a.id, a.advisory, a.display_order, a.default_advisory \
             FROM amend_advisories aa JOIN advisories a ON a.id = aa.advisory_id \
             WHERE aa.amendment_id = $1 ORDER BY a.display_order, a.id",
        )
        .bind(amendment.id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(advisory_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(AmendmentRecord {
            amendment,
            species,
            activities,
            conditions,
            advisories,
        })
    }

    async fn return_graph(&self, record: Return) -> Result<ReturnRecord, RepositoryError> {
        let (species, activities) = self
            .species_graph(ActivityFlow::Return, record.species_id)
            .await?;
        Ok(ReturnRecord {
            return_record: record,
            species,
            activities,
        })
    }
}

#[async_trait]
impl LicenceStore for PgLicenceStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn application(
        &self,
        id: LicenceId,
    ) -> Result<Option<LicenceApplication>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, licence_holder_id, licence_applicant_id, site_address_id, \
             licence_start, licence_end FROM licence_applications WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(LicenceApplication {
            id: LicenceId(row.try_get("id")?),
            licence_holder_id: ContactId(row.try_get("licence_holder_id")?),
            licence_applicant_id: ContactId(row.try_get("licence_applicant_id")?),
            site_address_id: AddressId(row.try_get("site_address_id")?),
            period: LicencePeriod {
                start: row.try_get("licence_start")?,
                end: row.try_get("licence_end")?,
            },
        }))
    }

    async fn contact(&self, id: ContactId) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, email_address, postal_address_id FROM contacts WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Contact {
            id: ContactId(row.try_get("id")?),
            name: row.try_get("name")?,
            email_address: row.try_get("email_address")?,
            postal_address_id: row
                .try_get::<Option<i64>, _>("postal_address_id")?
                .map(AddressId),
        }))
    }

    async fn address(&self, id: AddressId) -> Result<Option<Address>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, address_line_one, address_line_two, address_town, postcode \
             FROM addresses WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Address {
            id: AddressId(row.try_get("id")?),
            address_line_one: row.try_get("address_line_one")?,
            address_line_two: row.try_get("address_line_two")?,
            address_town: row.try_get("address_town")?,
            postcode: row.try_get("postcode")?,
        }))
    }

    async fn amendment(
        &self,
        id: AmendmentId,
        include_deleted: bool,
    ) -> Result<Option<AmendmentRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {AMENDMENT_COLUMNS} FROM amendments \
             WHERE id = $1 AND ($2 OR deleted_at IS NULL)"
        );
        let row = sqlx::query(&sql)
            .bind(id.0)
            .bind(include_deleted)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let amendment = amendment_from_row(&row)?;
                Ok(Some(self.amendment_graph(amendment).await?))
            }
            None => Ok(None),
        }
    }

    async fn amendments(
        &self,
        licence_id: LicenceId,
        include_deleted: bool,
    ) -> Result<Vec<AmendmentRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {AMENDMENT_COLUMNS} FROM amendments \
             WHERE licence_id = $1 AND ($2 OR deleted_at IS NULL) ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(licence_id.0)
            .bind(include_deleted)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let amendment = amendment_from_row(row)?;
            records.push(self.amendment_graph(amendment).await?);
        }
        Ok(records)
    }

    async fn soft_delete_amendment(&self, id: AmendmentId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE amendments SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn return_record(&self, id: ReturnId) -> Result<Option<ReturnRecord>, RepositoryError> {
        let sql = format!("SELECT {RETURN_COLUMNS} FROM returns WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let record = return_from_row(&row)?;
                Ok(Some(self.return_graph(record).await?))
            }
            None => Ok(None),
        }
    }

    async fn returns(&self, licence_id: LicenceId) -> Result<Vec<ReturnRecord>, RepositoryError> {
        let sql = format!("SELECT {RETURN_COLUMNS} FROM returns WHERE licence_id = $1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(licence_id.0)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = return_from_row(row)?;
            records.push(self.return_graph(record).await?);
        }
        Ok(records)
    }

    async fn notes(&self, licence_id: LicenceId) -> Result<Vec<Note>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, licence_id, note, created_by, created_at FROM notes \
             WHERE licence_id = $1 ORDER BY id",
        )
        .bind(licence_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(note_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn conditions(&self) -> Result<Vec<Condition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, condition, display_order, default_condition FROM conditions \
             ORDER BY display_order, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(condition_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn advisories(&self) -> Result<Vec<Advisory>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, advisory, display_order, default_advisory FROM advisories \
             ORDER BY display_order, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(advisory_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn insert_activity(
        &mut self,
        flow: ActivityFlow,
        detail: &ActivityDetail,
    ) -> Result<ActivityId, RepositoryError> {
        let sql = insert_activity_sql(flow);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for action in ControlAction::ALL {
            let record = detail.action(action);
            query = query
                .bind(record.is_some())
                .bind(quantity_to_db(record.and_then(|record| record.quantity)))
                .bind(record.and_then(|record| record.date));
        }
        let id = query.fetch_one(&mut *self.tx).await.map_err(write_error)?;
        Ok(ActivityId(id))
    }

    async fn insert_species_set(
        &mut self,
        flow: ActivityFlow,
        keys: &BTreeMap<Species, ActivityId>,
    ) -> Result<SpeciesSetId, RepositoryError> {
        let sql = insert_species_sql(flow);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for species in Species::ALL {
            query = query.bind(keys.get(&species).map(|key| key.0));
        }
        let id = query.fetch_one(&mut *self.tx).await.map_err(write_error)?;
        Ok(SpeciesSetId(id))
    }

    async fn insert_amendment(
        &mut self,
        amendment: &NewAmendment,
        species_id: SpeciesSetId,
    ) -> Result<Amendment, RepositoryError> {
        let sql = format!(
            "INSERT INTO amendments (licence_id, species_id, amend_reason, amended_by, assessment) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {AMENDMENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(amendment.licence_id.0)
            .bind(species_id.0)
            .bind(&amendment.amend_reason)
            .bind(&amendment.amended_by)
            .bind(&amendment.assessment)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(write_error)?;
        Ok(amendment_from_row(&row)?)
    }

    async fn link_conditions(
        &mut self,
        amendment_id: AmendmentId,
        condition_ids: &[ConditionId],
    ) -> Result<(), RepositoryError> {
        if condition_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = condition_ids.iter().map(|id| id.0).collect();
        sqlx::query(
            "INSERT INTO amend_conditions (amendment_id, condition_id) \
             SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(amendment_id.0)
        .bind(ids)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn link_advisories(
        &mut self,
        amendment_id: AmendmentId,
        advisory_ids: &[AdvisoryId],
    ) -> Result<(), RepositoryError> {
        if advisory_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = advisory_ids.iter().map(|id| id.0).collect();
        sqlx::query(
            "INSERT INTO amend_advisories (amendment_id, advisory_id) \
             SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(amendment_id.0)
        .bind(ids)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn insert_note(&mut self, note: &NewNote) -> Result<Note, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO notes (licence_id, note, created_by) VALUES ($1, $2, $3) \
             RETURNING id, licence_id, note, created_by, created_at",
        )
        .bind(note.licence_id.0)
        .bind(&note.note)
        .bind(&note.created_by)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(note_from_row(&row)?)
    }

    async fn insert_return(
        &mut self,
        record: &NewReturn,
        species_id: SpeciesSetId,
    ) -> Result<Return, RepositoryError> {
        let sql = format!(
            "INSERT INTO returns (licence_id, species_id, confirm_declaration) \
             VALUES ($1, $2, $3) RETURNING {RETURN_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(record.licence_id.0)
            .bind(species_id.0)
            .bind(record.confirm_declaration)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(write_error)?;
        Ok(return_from_row(&row)?)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await.map_err(write_error)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_insert_binds_three_columns_per_action() {
        let sql = insert_activity_sql(ActivityFlow::Return);
        assert!(sql.starts_with("INSERT INTO return_activities (remove_nests, remove_nests_quantity"));
        assert!(sql.contains("$18)"));
        assert!(!sql.contains("$19"));
    }

    #[test]
    fn species_insert_lists_every_species_column() {
        let sql = insert_species_sql(ActivityFlow::Amendment);
        for species in Species::ALL {
            assert!(sql.contains(species.column()));
        }
        assert!(sql.contains("$5) RETURNING id"));
    }

    #[test]
    fn quantities_outside_u32_are_dropped() {
        assert_eq!(quantity_from_db(Some(-1)), None);
        assert_eq!(quantity_from_db(Some(12)), Some(12));
        assert_eq!(quantity_to_db(Some(u32::MAX)), Some(i64::from(u32::MAX)));
    }

    #[test]
    fn foreign_key_violation_names_the_missing_row() {
        let detail = r#"Key (condition_id)=(999) is not present in table "conditions"."#;
        let err = classify_violation(ErrorKind::ForeignKeyViolation, Some(detail))
            .expect("classified");
        assert!(matches!(
            err,
            RepositoryError::MissingReference { entity: "condition", id: 999 }
        ));
        assert_eq!(err.to_string(), "condition 999 does not exist");

        let detail = r#"Key (licence_id)=(9999) is not present in table "licence_applications"."#;
        assert_eq!(missing_key(detail), Some(("licence application", 9999)));
    }

    #[test]
    fn unique_violation_is_a_conflict() {
        let err = classify_violation(
            ErrorKind::UniqueViolation,
            Some("Key (amendment_id, condition_id)=(4, 21) already exists."),
        );
        assert!(matches!(err, Some(RepositoryError::Conflict)));
    }

    #[test]
    fn unparseable_or_other_failures_stay_database_errors() {
        assert!(classify_violation(ErrorKind::ForeignKeyViolation, None).is_none());
        assert!(classify_violation(ErrorKind::ForeignKeyViolation, Some("garbled")).is_none());
        assert!(classify_violation(ErrorKind::NotNullViolation, None).is_none());
        assert!(matches!(
            write_error(sqlx::Error::RowNotFound),
            RepositoryError::Database(sqlx::Error::RowNotFound)
        ));
    }
}
