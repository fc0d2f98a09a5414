use crate::infra::InMemoryNotifications;
use chrono::{Datelike, Local, NaiveDate};
use clap::Args;
use gull_licensing::error::AppError;
use gull_licensing::licensing::{
    ActionRecord, ActivityDetail, Address, AddressId, Advisory, AdvisoryId, AmendmentRequest,
    CatalogueCategories, Condition, ConditionId, Contact, ContactId, ControlAction,
    LicenceApplication, LicenceId, LicencePeriod, LicensingService, MemoryLicenceStore,
    NewAmendment, NewReturn, ReturnRequest, Species,
};
use gull_licensing::notifications::Notification;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEMO_LICENCE: LicenceId = LicenceId(1001);

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Herring gull nests the amendment permits removing.
    #[arg(long, default_value_t = 3)]
    pub(crate) nests: u32,
    /// Date the returned activity took place (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) activity_date: Option<NaiveDate>,
    /// Skip the return half of the walkthrough.
    #[arg(long)]
    pub(crate) skip_return: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        nests,
        activity_date,
        skip_return,
    } = args;
    let activity_date = activity_date.unwrap_or_else(|| Local::now().date_naive());

    let store = demo_store(activity_date.year());
    let notifications = InMemoryNotifications::default();
    let service = LicensingService::new(
        Arc::new(store),
        Arc::new(notifications.clone()),
        CatalogueCategories::default(),
        "licensing@nature.scot",
    );

    println!("Gull licensing demo (licence {})", DEMO_LICENCE.0);

    let amendment = service
        .create_amendment(AmendmentRequest {
            amendment: NewAmendment {
                licence_id: DEMO_LICENCE,
                amend_reason: "Nesting spread to the warehouse roof".to_string(),
                amended_by: "demo.officer".to_string(),
                assessment: "Nests over the loading bay create a public health risk.".to_string(),
            },
            activities: BTreeMap::from([(
                Species::HerringGull,
                ActivityDetail::default()
                    .with_action(ControlAction::RemoveNests, ActionRecord::quantity(nests)),
            )]),
            optional_conditions: vec![ConditionId(12), ConditionId(21)],
            optional_advisories: vec![AdvisoryId(1)],
        })
        .await?;
    println!(
        "- Amendment {} committed with {} species and {} conditions",
        amendment.amendment.id.0,
        amendment.species.keys.len(),
        amendment.conditions.len()
    );

    if !skip_return {
        let returned = service
            .create_return(ReturnRequest {
                return_record: NewReturn {
                    licence_id: DEMO_LICENCE,
                    confirm_declaration: true,
                },
                activities: BTreeMap::from([(
                    Species::HerringGull,
                    ActivityDetail::default().with_action(
                        ControlAction::RemoveNests,
                        ActionRecord::quantity(nests).on(activity_date),
                    ),
                )]),
            })
            .await?;
        println!("- Return {} committed", returned.return_record.id.0);
    }

    let notes = service.notes(DEMO_LICENCE).await?;
    println!("- {} audit note(s) on the licence", notes.len());

    println!("\nEmails that would be sent");
    for notification in notifications.sent() {
        render_notification(&notification);
    }

    Ok(())
}

fn render_notification(notification: &Notification) {
    println!(
        "\n[{:?}] to {}",
        notification.template, notification.recipient
    );
    for (key, value) in &notification.personalisation {
        if value.is_empty() {
            continue;
        }
        if value.contains('\n') {
            println!("  {key}:");
            for line in value.lines() {
                println!("    {line}");
            }
        } else {
            println!("  {key}: {value}");
        }
    }
}

fn demo_store(year: i32) -> MemoryLicenceStore {
    let store = MemoryLicenceStore::default();
    store.insert_address(Address {
        id: AddressId(1),
        address_line_one: "Harbour Warehouse".to_string(),
        address_line_two: Some("Shore Street".to_string()),
        address_town: "Ullapool".to_string(),
        postcode: "IV26 2UR".to_string(),
    });
    store.insert_contact(Contact {
        id: ContactId(1),
        name: "Ullapool Harbour Trust".to_string(),
        email_address: Some("harbour@example.com".to_string()),
        postal_address_id: Some(AddressId(1)),
    });
    store.insert_contact(Contact {
        id: ContactId(2),
        name: "Highland Pest Control".to_string(),
        email_address: Some("agent@example.com".to_string()),
        postal_address_id: None,
    });

    let start = NaiveDate::from_ymd_opt(year, 3, 1).unwrap_or_default();
    let end = NaiveDate::from_ymd_opt(year, 9, 30).unwrap_or_default();
    store.insert_application(LicenceApplication {
        id: DEMO_LICENCE,
        licence_holder_id: ContactId(1),
        licence_applicant_id: ContactId(2),
        site_address_id: AddressId(1),
        period: LicencePeriod { start, end },
    });

    let conditions = [
        (12, "The licence holder must be able to produce this licence on request."),
        (21, "A return of action taken must be submitted within 14 days of the licence expiring."),
    ];
    for (id, text) in conditions {
        store.insert_condition(Condition {
            id: ConditionId(id),
            condition: text.to_string(),
            display_order: id as i32,
            default_condition: true,
        });
    }
    store.insert_advisory(Advisory {
        id: AdvisoryId(1),
        advisory: "Check for chicks before removing any nest.".to_string(),
        display_order: 1,
        default_advisory: true,
    });

    store
}
