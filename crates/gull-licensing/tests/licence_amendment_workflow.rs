//! Integration tests for amendments and returns through the public service facade,
//! wired the way the API binary wires them: in-memory store, queued delivery, disabled Notify.

mod common {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use gull_licensing::licensing::{
        Address, AddressId, Condition, ConditionId, Contact, ContactId, LicenceApplication,
        LicenceId, LicencePeriod, MemoryLicenceStore,
    };
    use gull_licensing::notifications::{NotifyClient, NotifyTemplates};

    pub(super) const LICENCE: LicenceId = LicenceId(42);

    pub(super) fn store() -> MemoryLicenceStore {
        let store = MemoryLicenceStore::default();
        store.insert_address(Address {
            id: AddressId(1),
            address_line_one: "Fish Market".to_string(),
            address_line_two: None,
            address_town: "Peterhead".to_string(),
            postcode: "AB42 1DT".to_string(),
        });
        store.insert_contact(Contact {
            id: ContactId(1),
            name: "Harbour Trust".to_string(),
            email_address: Some("trust@example.com".to_string()),
            postal_address_id: Some(AddressId(1)),
        });
        store.insert_application(LicenceApplication {
            id: LICENCE,
            licence_holder_id: ContactId(1),
            licence_applicant_id: ContactId(1),
            site_address_id: AddressId(1),
            period: LicencePeriod {
                start: NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid"),
                end: NaiveDate::from_ymd_opt(2026, 9, 30).expect("valid"),
            },
        });
        store.insert_condition(Condition {
            id: ConditionId(22),
            condition: "Send a return within 30 days.".to_string(),
            display_order: 22,
            default_condition: true,
        });
        store
    }

    pub(super) fn disabled_notify() -> Arc<NotifyClient> {
        Arc::new(NotifyClient::disabled(NotifyTemplates {
            amendment: "amendment".to_string(),
            return_submitted: "return".to_string(),
        }))
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use gull_licensing::licensing::{
    ActionRecord, ActivityDetail, AmendmentRequest, CatalogueCategories, ConditionId,
    ControlAction, LicenceStore, LicensingService, NewAmendment, NewReturn, ReturnRequest,
    Species,
};
use gull_licensing::notifications::{NotificationQueue, RetryPolicy};

use common::*;

#[tokio::test]
async fn amendment_and_return_round_trip_through_queued_delivery() {
    let store = store();
    let (queue, worker) =
        NotificationQueue::channel(disabled_notify(), RetryPolicy::new(1, Duration::ZERO));
    let worker = tokio::spawn(worker.run());

    let service = LicensingService::new(
        Arc::new(store.clone()),
        Arc::new(queue),
        CatalogueCategories::default(),
        "licensing@example.org",
    );

    let amendment = service
        .create_amendment(AmendmentRequest {
            amendment: NewAmendment {
                licence_id: LICENCE,
                amend_reason: "Additional roof".to_string(),
                amended_by: "officer".to_string(),
                assessment: "Roof access confirmed.".to_string(),
            },
            activities: BTreeMap::from([(
                Species::HerringGull,
                ActivityDetail::default()
                    .with_action(ControlAction::DestroyEggs, ActionRecord::quantity(12)),
            )]),
            optional_conditions: vec![ConditionId(22)],
            optional_advisories: Vec::new(),
        })
        .await
        .expect("amendment created");
    assert_eq!(amendment.conditions.len(), 1);

    let returned = service
        .create_return(ReturnRequest {
            return_record: NewReturn {
                licence_id: LICENCE,
                confirm_declaration: true,
            },
            activities: BTreeMap::new(),
        })
        .await
        .expect("return created");
    assert!(returned.species.keys.is_empty());

    let notes = store.notes(LICENCE).await.expect("notes");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].note, "Additional roof");

    drop(service);
    worker.await.expect("worker drains and stops");
}
