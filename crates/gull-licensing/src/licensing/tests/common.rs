use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::licensing::{
    licensing_router, ActionRecord, ActivityDetail, Address, AddressId, Advisory, AdvisoryId,
    AmendmentRequest, CatalogueCategories, Condition, ConditionId, Contact, ContactId,
    ControlAction, LicenceApplication, LicenceId, LicencePeriod, LicensingService,
    MemoryLicenceStore, NewAmendment, NewReturn, ReturnRequest, Species,
};
use crate::notifications::{
    DispatchOutcome, Notification, NotificationDispatcher, NotificationError,
};

pub(super) const LICENCE: LicenceId = LicenceId(1001);
/// Licence whose holder also applied for it.
pub(super) const SELF_APPLIED_LICENCE: LicenceId = LicenceId(1002);
pub(super) const INTERNAL_MAILBOX: &str = "licensing@example.org";
pub(super) const HOLDER_EMAIL: &str = "holder@example.com";
pub(super) const APPLICANT_EMAIL: &str = "agent@example.com";

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn seeded_store() -> MemoryLicenceStore {
    let store = MemoryLicenceStore::default();

    store.insert_address(Address {
        id: AddressId(10),
        address_line_one: "Harbour Warehouse".to_string(),
        address_line_two: Some("Shore Street".to_string()),
        address_town: "Ullapool".to_string(),
        postcode: "IV26 2UR".to_string(),
    });
    store.insert_address(Address {
        id: AddressId(11),
        address_line_one: "4 Quay Brae".to_string(),
        address_line_two: None,
        address_town: "Ullapool".to_string(),
        postcode: "IV26 2XB".to_string(),
    });
    store.insert_contact(Contact {
        id: ContactId(1),
        name: "Morag Fraser".to_string(),
        email_address: Some(HOLDER_EMAIL.to_string()),
        postal_address_id: Some(AddressId(11)),
    });
    store.insert_contact(Contact {
        id: ContactId(2),
        name: "Pest Control Agent".to_string(),
        email_address: Some(APPLICANT_EMAIL.to_string()),
        postal_address_id: None,
    });

    let period = LicencePeriod {
        start: date(2026, 4, 1),
        end: date(2026, 8, 31),
    };
    store.insert_application(LicenceApplication {
        id: LICENCE,
        licence_holder_id: ContactId(1),
        licence_applicant_id: ContactId(2),
        site_address_id: AddressId(10),
        period,
    });
    store.insert_application(LicenceApplication {
        id: SELF_APPLIED_LICENCE,
        licence_holder_id: ContactId(1),
        licence_applicant_id: ContactId(1),
        site_address_id: AddressId(10),
        period,
    });

    for id in 1..=25 {
        store.insert_condition(Condition {
            id: ConditionId(id),
            condition: format!("Condition {id}"),
            display_order: id as i32,
            default_condition: id <= 13,
        });
    }
    for id in 1..=10 {
        store.insert_advisory(Advisory {
            id: AdvisoryId(id),
            advisory: format!("Advisory {id}"),
            display_order: id as i32,
            default_advisory: false,
        });
    }

    store
}

pub(super) type TestService = LicensingService<MemoryLicenceStore, RecordingDispatcher>;

pub(super) fn build_service() -> (TestService, MemoryLicenceStore, Arc<RecordingDispatcher>) {
    let store = seeded_store();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let service = LicensingService::new(
        Arc::new(store.clone()),
        dispatcher.clone(),
        CatalogueCategories::default(),
        INTERNAL_MAILBOX,
    );
    (service, store, dispatcher)
}

pub(super) fn licensing_router_with_service(service: TestService) -> axum::Router {
    licensing_router(Arc::new(service))
}

pub(super) fn herring_nests(quantity: u32) -> BTreeMap<Species, ActivityDetail> {
    BTreeMap::from([(
        Species::HerringGull,
        ActivityDetail::default()
            .with_action(ControlAction::RemoveNests, ActionRecord::quantity(quantity)),
    )])
}

pub(super) fn amendment_request(licence_id: LicenceId) -> AmendmentRequest {
    AmendmentRequest {
        amendment: NewAmendment {
            licence_id,
            amend_reason: "Nesting moved to the north roof".to_string(),
            amended_by: "case.officer".to_string(),
            assessment: "Public health risk from nesting above the loading bay.".to_string(),
        },
        activities: herring_nests(3),
        optional_conditions: Vec::new(),
        optional_advisories: Vec::new(),
    }
}

pub(super) fn return_request(licence_id: LicenceId) -> ReturnRequest {
    ReturnRequest {
        return_record: NewReturn {
            licence_id,
            confirm_declaration: true,
        },
        activities: BTreeMap::from([(
            Species::HerringGull,
            ActivityDetail::default().with_action(
                ControlAction::RemoveNests,
                ActionRecord::quantity(3).on(date(2026, 5, 14)),
            ),
        )]),
    }
}

#[derive(Default)]
pub(super) struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("dispatcher mutex poisoned").clone()
    }

    pub(super) fn recipients(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|notification| notification.recipient)
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, notification: Notification) -> Result<DispatchOutcome, NotificationError> {
        self.sent
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(notification);
        Ok(DispatchOutcome::Sent { provider_id: None })
    }
}

/// Rejects every email as the provider would during an outage.
#[derive(Default)]
pub(super) struct FailingDispatcher {
    calls: AtomicUsize,
}

impl FailingDispatcher {
    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationDispatcher for FailingDispatcher {
    async fn send(&self, _: Notification) -> Result<DispatchOutcome, NotificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NotificationError::Rejected {
            status: 503,
            body: "service unavailable".to_string(),
        })
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
