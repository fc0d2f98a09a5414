//! Text blocks and personalisation maps sent with licence notifications.

use std::collections::BTreeMap;

use super::catalogue::{CatalogueCategories, ConditionCategory};
use super::domain::{
    ActionRecord, ActivityDetail, Advisory, AmendmentRecord, ApplicationGraph, Condition,
    ControlAction, ReturnRecord,
};
use super::species::Species;

pub const LICENCE_NUMBER: &str = "licence_number";
pub const SITE_ADDRESS: &str = "site_address";
pub const LICENCE_PERIOD: &str = "licence_period";
pub const LICENCE_HOLDER_NAME: &str = "licence_holder_name";
pub const LICENCE_HOLDER_ADDRESS: &str = "licence_holder_address";
pub const PERMITTED_ACTIVITIES: &str = "permitted_activities";
pub const CONSERVATION_STATUS: &str = "conservation_status";
pub const ADVISORY_NOTES: &str = "advisory_notes";
pub const GENERAL_CONDITIONS: &str = "general_conditions";
pub const WHAT_YOU_MUST_DO_CONDITIONS: &str = "what_you_must_do_conditions";
pub const REPORTING_CONDITIONS: &str = "reporting_conditions";
pub const ASSESSMENT: &str = "assessment";
pub const RETURN_DATE: &str = "return_date";
pub const RETURN_DETAILS: &str = "return_details";

const HUMAN_DATE: &str = "%-d %B %Y";
const ACTION_DATE: &str = "%d/%m/%Y";

fn counted(quantity: Option<u32>, singular: &str, plural: &str) -> String {
    match quantity {
        Some(1) => format!("1 {singular}"),
        Some(n) => format!("{n} {plural}"),
        None => plural.to_string(),
    }
}

/// Licence wording for a permitted action.
pub fn permitted_action(action: ControlAction, record: &ActionRecord) -> String {
    let quantity = record.quantity;
    match action {
        ControlAction::RemoveNests => format!(
            "To take and destroy {} and any eggs they contain by hand.",
            counted(quantity, "nest", "nests")
        ),
        ControlAction::DestroyEggs => format!(
            "To take and destroy eggs from {} by oiling, pricking or by hand.",
            counted(quantity, "nest", "nests")
        ),
        ControlAction::RescueChicks => format!(
            "To take {} by hand and transport them to a wildlife rescue centre.",
            counted(quantity, "chick", "chicks")
        ),
        ControlAction::RelocateChicks => format!(
            "To take {} by hand and release them nearby.",
            counted(quantity, "chick", "chicks")
        ),
        ControlAction::KillChicks => format!(
            "To kill {} by hand using cervical dislocation.",
            counted(quantity, "chick", "chicks")
        ),
        ControlAction::KillAdults => format!(
            "To kill {} by shooting or by trapping and dispatch.",
            counted(quantity, "adult", "adults")
        ),
    }
}

/// Past-tense wording used when reporting an action back.
pub fn returned_action(action: ControlAction) -> &'static str {
    match action {
        ControlAction::RemoveNests => "nests removed and destroyed",
        ControlAction::DestroyEggs => "eggs destroyed",
        ControlAction::RescueChicks => "chicks taken to a wildlife rescue centre",
        ControlAction::RelocateChicks => "chicks relocated",
        ControlAction::KillChicks => "chicks killed",
        ControlAction::KillAdults => "adults killed",
    }
}

fn present_species(
    activities: &BTreeMap<Species, ActivityDetail>,
) -> impl Iterator<Item = (Species, &ActivityDetail)> + '_ {
    Species::ALL.into_iter().filter_map(|species| {
        activities
            .get(&species)
            .filter(|detail| !detail.is_empty())
            .map(|detail| (species, detail))
    })
}

/// One line per permitted action, prefixed with the species it applies to.
pub fn permitted_activities(activities: &BTreeMap<Species, ActivityDetail>) -> String {
    present_species(activities)
        .flat_map(|(species, detail)| {
            detail.actions().map(move |(action, record)| {
                format!("{}: {}", species.label(), permitted_action(action, record))
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn conservation_status(activities: &BTreeMap<Species, ActivityDetail>) -> String {
    present_species(activities)
        .map(|(species, _)| species.conservation_status())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Bullet list of what was done, e.g. `* Herring gull: nests removed and destroyed, quantity 3, on 14/05/2026`.
pub fn returned_activities(activities: &BTreeMap<Species, ActivityDetail>) -> String {
    present_species(activities)
        .flat_map(|(species, detail)| {
            detail.actions().map(move |(action, record)| {
                let mut line = format!("* {}: {}", species.label(), returned_action(action));
                if let Some(quantity) = record.quantity {
                    line.push_str(&format!(", quantity {quantity}"));
                }
                if let Some(date) = record.date {
                    line.push_str(&format!(", on {}", date.format(ACTION_DATE)));
                }
                line
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn bullets<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    lines
        .map(|line| format!("* {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Bullet block of the linked conditions that fall in `category`.
pub fn condition_block(
    conditions: &[Condition],
    categories: &CatalogueCategories,
    category: ConditionCategory,
) -> String {
    bullets(
        conditions
            .iter()
            .filter(|condition| categories.category_of(condition.id) == category)
            .map(|condition| condition.condition.as_str()),
    )
}

pub fn advisory_notes(advisories: &[Advisory], categories: &CatalogueCategories) -> String {
    bullets(
        advisories
            .iter()
            .filter(|advisory| categories.notifies_advisory(advisory.id))
            .map(|advisory| advisory.advisory.as_str()),
    )
}

/// Personalisation for an amendment email. Fields sourced from a missing lookup are left empty.
pub fn amendment_personalisation(
    graph: Option<&ApplicationGraph>,
    record: &AmendmentRecord,
    categories: &CatalogueCategories,
) -> BTreeMap<String, String> {
    let site_address = graph
        .and_then(|graph| graph.site_address.as_ref())
        .map(|address| address.summary())
        .unwrap_or_default();
    let licence_period = graph
        .map(|graph| graph.application.period.summary())
        .unwrap_or_default();
    let holder_name = graph
        .and_then(|graph| graph.holder.as_ref())
        .map(|holder| holder.name.clone())
        .unwrap_or_default();
    let holder_address = graph
        .and_then(|graph| graph.holder_address.as_ref())
        .map(|address| address.summary())
        .unwrap_or_default();

    let conditions = &record.conditions;
    let fields = [
        (LICENCE_NUMBER, record.amendment.licence_id.0.to_string()),
        (SITE_ADDRESS, site_address),
        (LICENCE_PERIOD, licence_period),
        (LICENCE_HOLDER_NAME, holder_name),
        (LICENCE_HOLDER_ADDRESS, holder_address),
        (PERMITTED_ACTIVITIES, permitted_activities(&record.activities)),
        (CONSERVATION_STATUS, conservation_status(&record.activities)),
        (ADVISORY_NOTES, advisory_notes(&record.advisories, categories)),
        (
            GENERAL_CONDITIONS,
            condition_block(conditions, categories, ConditionCategory::General),
        ),
        (
            WHAT_YOU_MUST_DO_CONDITIONS,
            condition_block(conditions, categories, ConditionCategory::WhatYouMustDo),
        ),
        (
            REPORTING_CONDITIONS,
            condition_block(conditions, categories, ConditionCategory::Reporting),
        ),
        (ASSESSMENT, record.amendment.assessment.clone()),
    ];

    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

pub fn return_personalisation(
    graph: Option<&ApplicationGraph>,
    record: &ReturnRecord,
) -> BTreeMap<String, String> {
    let site_address = graph
        .and_then(|graph| graph.site_address.as_ref())
        .map(|address| address.summary())
        .unwrap_or_default();

    let fields = [
        (
            LICENCE_NUMBER,
            record.return_record.licence_id.0.to_string(),
        ),
        (
            RETURN_DATE,
            record.return_record.created_at.format(HUMAN_DATE).to_string(),
        ),
        (SITE_ADDRESS, site_address),
        (RETURN_DETAILS, returned_activities(&record.activities)),
    ];

    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
