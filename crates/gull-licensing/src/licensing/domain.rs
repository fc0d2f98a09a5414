use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::species::Species;

/// Identifier of a licence application; doubles as the licence number once issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LicenceId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddressId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AmendmentId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReturnId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpeciesSetId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConditionId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdvisoryId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoteId(pub i64);

/// Dates between which the licence permits control activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicencePeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl LicencePeriod {
    pub fn summary(&self) -> String {
        format!(
            "{} to {}",
            self.start.format("%-d %B %Y"),
            self.end.format("%-d %B %Y")
        )
    }
}

/// Root record of a gull control licence. Created at submission, read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenceApplication {
    pub id: LicenceId,
    pub licence_holder_id: ContactId,
    pub licence_applicant_id: ContactId,
    pub site_address_id: AddressId,
    pub period: LicencePeriod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub email_address: Option<String>,
    pub postal_address_id: Option<AddressId>,
}

impl Contact {
    /// Email address if present and non-blank.
    pub fn email(&self) -> Option<&str> {
        self.email_address
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub address_line_one: String,
    pub address_line_two: Option<String>,
    pub address_town: String,
    pub postcode: String,
}

impl Address {
    /// Single-line rendering used in notifications, skipping blank parts.
    pub fn summary(&self) -> String {
        [
            Some(self.address_line_one.as_str()),
            self.address_line_two.as_deref(),
            Some(self.address_town.as_str()),
            Some(self.postcode.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Which family of tables an activity or species aggregate row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivityFlow {
    Amendment,
    Return,
}

/// Control actions a licence can permit or a return can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    RemoveNests,
    DestroyEggs,
    RescueChicks,
    RelocateChicks,
    KillChicks,
    KillAdults,
}

impl ControlAction {
    pub const ALL: [ControlAction; 6] = [
        ControlAction::RemoveNests,
        ControlAction::DestroyEggs,
        ControlAction::RescueChicks,
        ControlAction::RelocateChicks,
        ControlAction::KillChicks,
        ControlAction::KillAdults,
    ];

    /// Column prefix used by the activity tables.
    pub const fn column(self) -> &'static str {
        match self {
            ControlAction::RemoveNests => "remove_nests",
            ControlAction::DestroyEggs => "destroy_eggs",
            ControlAction::RescueChicks => "rescue_chicks",
            ControlAction::RelocateChicks => "relocate_chicks",
            ControlAction::KillChicks => "kill_chicks",
            ControlAction::KillAdults => "kill_adults",
        }
    }
}

/// Quantity and date recorded against a single control action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl ActionRecord {
    pub fn quantity(quantity: u32) -> Self {
        Self {
            quantity: Some(quantity),
            date: None,
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

/// Per-species activity detail. The same shape backs amendment and return activity rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_nests: Option<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy_eggs: Option<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescue_chicks: Option<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relocate_chicks: Option<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_chicks: Option<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_adults: Option<ActionRecord>,
}

impl ActivityDetail {
    pub fn action(&self, action: ControlAction) -> Option<&ActionRecord> {
        match action {
            ControlAction::RemoveNests => self.remove_nests.as_ref(),
            ControlAction::DestroyEggs => self.destroy_eggs.as_ref(),
            ControlAction::RescueChicks => self.rescue_chicks.as_ref(),
            ControlAction::RelocateChicks => self.relocate_chicks.as_ref(),
            ControlAction::KillChicks => self.kill_chicks.as_ref(),
            ControlAction::KillAdults => self.kill_adults.as_ref(),
        }
    }

    pub fn set_action(&mut self, action: ControlAction, record: Option<ActionRecord>) {
        let slot = match action {
            ControlAction::RemoveNests => &mut self.remove_nests,
            ControlAction::DestroyEggs => &mut self.destroy_eggs,
            ControlAction::RescueChicks => &mut self.rescue_chicks,
            ControlAction::RelocateChicks => &mut self.relocate_chicks,
            ControlAction::KillChicks => &mut self.kill_chicks,
            ControlAction::KillAdults => &mut self.kill_adults,
        };
        *slot = record;
    }

    pub fn with_action(mut self, action: ControlAction, record: ActionRecord) -> Self {
        self.set_action(action, Some(record));
        self
    }

    /// Actions that were selected, in rendering order.
    pub fn actions(&self) -> impl Iterator<Item = (ControlAction, &ActionRecord)> + '_ {
        ControlAction::ALL
            .into_iter()
            .filter_map(|action| self.action(action).map(|record| (action, record)))
    }

    pub fn is_empty(&self) -> bool {
        self.actions().next().is_none()
    }
}

/// Species aggregate row: one optional activity key per species.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesSet {
    pub id: SpeciesSetId,
    pub keys: BTreeMap<Species, ActivityId>,
}

impl SpeciesSet {
    pub fn key(&self, species: Species) -> Option<ActivityId> {
        self.keys.get(&species).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub id: ConditionId,
    pub condition: String,
    pub display_order: i32,
    pub default_condition: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: AdvisoryId,
    pub advisory: String,
    pub display_order: i32,
    pub default_advisory: bool,
}

/// Amendment fields supplied by the caller before any keys are generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAmendment {
    pub licence_id: LicenceId,
    pub amend_reason: String,
    pub amended_by: String,
    pub assessment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amendment {
    pub id: AmendmentId,
    pub licence_id: LicenceId,
    pub species_id: SpeciesSetId,
    pub amend_reason: String,
    pub amended_by: String,
    pub assessment: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Shaped input for the amendment workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendmentRequest {
    pub amendment: NewAmendment,
    #[serde(default)]
    pub activities: BTreeMap<Species, ActivityDetail>,
    #[serde(default)]
    pub optional_conditions: Vec<ConditionId>,
    #[serde(default)]
    pub optional_advisories: Vec<AdvisoryId>,
}

/// Committed amendment together with its species, activity, condition and advisory graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendmentRecord {
    pub amendment: Amendment,
    pub species: SpeciesSet,
    pub activities: BTreeMap<Species, ActivityDetail>,
    pub conditions: Vec<Condition>,
    pub advisories: Vec<Advisory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub licence_id: LicenceId,
    pub note: String,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub licence_id: LicenceId,
    pub note: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReturn {
    pub licence_id: LicenceId,
    pub confirm_declaration: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Return {
    pub id: ReturnId,
    pub licence_id: LicenceId,
    pub species_id: SpeciesSetId,
    pub confirm_declaration: bool,
    pub created_at: DateTime<Utc>,
}

/// Shaped input for the return workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    #[serde(rename = "return")]
    pub return_record: NewReturn,
    #[serde(default)]
    pub activities: BTreeMap<Species, ActivityDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    #[serde(rename = "return")]
    pub return_record: Return,
    pub species: SpeciesSet,
    pub activities: BTreeMap<Species, ActivityDetail>,
}

/// Licence application with the contacts and addresses needed for notifications.
/// Every lookup beyond the application itself is best-effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationGraph {
    pub application: LicenceApplication,
    pub holder: Option<Contact>,
    pub applicant: Option<Contact>,
    pub site_address: Option<Address>,
    pub holder_address: Option<Address>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_summary_skips_blank_lines() {
        let address = Address {
            id: AddressId(1),
            address_line_one: "1 Harbour Road".to_string(),
            address_line_two: Some("  ".to_string()),
            address_town: "Inverness".to_string(),
            postcode: "IV1 1AA".to_string(),
        };
        assert_eq!(address.summary(), "1 Harbour Road, Inverness, IV1 1AA");
    }

    #[test]
    fn licence_period_reads_as_dates() {
        let period = LicencePeriod {
            start: NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid"),
            end: NaiveDate::from_ymd_opt(2026, 8, 31).expect("valid"),
        };
        assert_eq!(period.summary(), "1 April 2026 to 31 August 2026");
    }

    #[test]
    fn activity_detail_iterates_selected_actions_in_order() {
        let detail = ActivityDetail::default()
            .with_action(ControlAction::KillAdults, ActionRecord::quantity(2))
            .with_action(ControlAction::RemoveNests, ActionRecord::quantity(3));

        let actions: Vec<_> = detail.actions().map(|(action, _)| action).collect();
        assert_eq!(
            actions,
            vec![ControlAction::RemoveNests, ControlAction::KillAdults]
        );
        assert!(!detail.is_empty());
        assert!(ActivityDetail::default().is_empty());
    }

    #[test]
    fn blank_contact_email_is_treated_as_absent() {
        let contact = Contact {
            id: ContactId(4),
            name: "Site Manager".to_string(),
            email_address: Some("   ".to_string()),
            postal_address_id: None,
        };
        assert_eq!(contact.email(), None);
    }
}
