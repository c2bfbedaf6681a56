use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tarmac_catalog::fares::{Applicability, Fare, PromoCode, PromoDiscount, Validity};
use tarmac_catalog::{
    AncillaryCatalog, AncillaryOffering, FareBucket, FareCatalog, FlightInventory, InventoryConfig, InventoryError,
    InventoryManager, InventoryRepository, MemoryInventoryRepository, PricingEngine, SeatInventory, SeatStatus,
};
use tarmac_core::gds::{GdsOperation, GdsRecordStatus, MockGdsClient, ScriptedFailure, TicketQuirk};
use tarmac_core::sink::RecordingSink;
use tarmac_core::{AgentType, CabinClass, CoreError, FlightDateKey, ManualClock};
use tarmac_governor::{
    BookingGovernor, BookingLimit, GovernorConfig, LimitPeriod, LimitScope, LimitType, MemoryLimitRepository,
    MemoryOverrideRepository,
};
use tarmac_order::{
    AncillaryStatus, AttachAncillary, BookingOrchestrator, BookingStatus, ContactInfo, GdsConfig, GdsGateway,
    MemoryBookingRepository, NewBooking, PassengerDetails, RefundDecision, RefundRequest, TicketStatus,
};
use tarmac_shared::models::events::AccountingEventKind;
use uuid::Uuid;

fn departure_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 1).unwrap()
}

fn flight() -> FlightDateKey {
    FlightDateKey::new("SV1020", departure_date())
}

/// In-memory inventory storage whose saves can be made to fail.
#[derive(Default)]
struct FlakyInventoryRepository {
    inner: MemoryInventoryRepository,
    saves_until_failure: AtomicI64,
}

impl FlakyInventoryRepository {
    /// The `nth` save from now fails with a storage error.
    fn fail_save(&self, nth: i64) {
        self.saves_until_failure.store(nth, Ordering::SeqCst);
    }
}

#[async_trait]
impl InventoryRepository for FlakyInventoryRepository {
    async fn get(&self, key: &FlightDateKey) -> Result<Option<FlightInventory>, InventoryError> {
        self.inner.get(key).await
    }

    async fn find_by_route(
        &self,
        origin: &str,
        destination: &str,
        date: NaiveDate,
    ) -> Result<Vec<FlightInventory>, InventoryError> {
        self.inner.find_by_route(origin, destination, date).await
    }

    async fn list_with_holds(&self) -> Result<Vec<FlightInventory>, InventoryError> {
        self.inner.list_with_holds().await
    }

    async fn insert(&self, inventory: &FlightInventory) -> Result<(), InventoryError> {
        self.inner.insert(inventory).await
    }

    async fn save(&self, inventory: &FlightInventory) -> Result<FlightInventory, InventoryError> {
        if self.saves_until_failure.fetch_sub(1, Ordering::SeqCst) == 1 {
            return Err(InventoryError::Storage("connection reset".into()));
        }
        self.inner.save(inventory).await
    }
}

fn once_promo() -> PromoCode {
    PromoCode {
        code: "ONCE".into(),
        description: "One booking only".into(),
        discount: PromoDiscount::Fixed { amount: dec!(100) },
        applies: Applicability::default(),
        valid_from: Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
        valid_until: Utc.with_ymd_and_hms(2026, 12, 31, 0, 0, 0).unwrap(),
        is_active: true,
        max_usage: Some(1),
        usage_count: 0,
        max_uses_per_user: None,
        per_user_usage: Default::default(),
        minimum_booking_value: None,
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    gds: Arc<MockGdsClient>,
    sink: Arc<RecordingSink>,
    inventory: Arc<InventoryManager>,
    pricing: Arc<PricingEngine>,
    governor: Arc<BookingGovernor>,
    orchestrator: BookingOrchestrator,
}

async fn harness() -> Harness {
    harness_with(Arc::new(MemoryInventoryRepository::new()), Vec::new()).await
}

async fn harness_with(repo: Arc<dyn InventoryRepository>, promo_codes: Vec<PromoCode>) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()));
    let gds = Arc::new(MockGdsClient::new());
    let sink = Arc::new(RecordingSink::new());

    let inventory = Arc::new(InventoryManager::new(repo, clock.clone(), InventoryConfig::default()));
    let departure = Utc.with_ymd_and_hms(2026, 11, 1, 6, 0, 0).unwrap();
    inventory
        .create(
            FlightInventory::new(flight(), "RUH", "JED", departure, departure + Duration::minutes(105), 150)
                .with_cabin(CabinClass::Economy, 120)
                .with_cabin(CabinClass::Business, 30)
                .with_bucket(FareBucket::new("M", CabinClass::Economy, 40, dec!(500), "SAR"))
                .with_seat(SeatInventory::new("12A", CabinClass::Economy, SeatStatus::Available)),
        )
        .await
        .unwrap();

    let pricing = Arc::new(PricingEngine::new(
        FareCatalog {
            fares: vec![Fare {
                id: Uuid::new_v4(),
                airline: "SV".into(),
                origin: "RUH".into(),
                destination: "JED".into(),
                cabin: CabinClass::Economy,
                booking_class: "M".into(),
                fare_basis: "MOWSA".into(),
                base_fare: dec!(500),
                currency: "SAR".into(),
                child_discount_pct: dec!(25),
                infant_discount_pct: dec!(90),
                validity: Validity {
                    effective_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                    expiry_date: None,
                },
            }],
            promo_codes,
            ..Default::default()
        },
        clock.clone(),
    ));

    let governor = Arc::new(BookingGovernor::new(
        Arc::new(MemoryLimitRepository::new()),
        Arc::new(MemoryOverrideRepository::new()),
        sink.clone(),
        clock.clone(),
        GovernorConfig::default(),
    ));

    let offerings: Vec<AncillaryOffering> = serde_json::from_str(
        r#"[
            { "kind": "baggage", "code": "XBAG", "price_per_kg": "12.5", "max_kg": 23 },
            { "kind": "meal", "code": "HOTMEAL", "price": "30", "min_flight_minutes": 120 }
        ]"#,
    )
    .unwrap();

    let orchestrator = BookingOrchestrator::new(
        Arc::new(MemoryBookingRepository::new()),
        inventory.clone(),
        pricing.clone(),
        governor.clone(),
        Arc::new(GdsGateway::new(gds.clone(), &GdsConfig::default())),
        clock.clone(),
    )
    .with_accounting(sink.clone())
    .with_ancillaries(Arc::new(AncillaryCatalog::from_offerings(offerings).unwrap()));

    Harness {
        clock,
        gds,
        sink,
        inventory,
        pricing,
        governor,
        orchestrator,
    }
}

fn passenger(first: &str, last: &str, dob: (i32, u32, u32)) -> PassengerDetails {
    PassengerDetails {
        first_name: first.to_string(),
        last_name: last.to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(dob.0, dob.1, dob.2),
        gender: None,
        passport_number: Some("K1234567".to_string()),
        nationality: Some("SA".to_string()),
        needs_mobility_assistance: false,
        travelling_with_infant: false,
    }
}

fn new_booking(reference: &str) -> NewBooking {
    NewBooking {
        client_reference: reference.to_string(),
        itinerary_id: "SV1020@2026-11-01/Y/M".to_string(),
        passengers: vec![
            passenger("Sara", "Alharbi", (1988, 4, 2)),
            passenger("Omar", "Alharbi", (2019, 6, 15)),
        ],
        contact: ContactInfo {
            email: "bookings@agency.example".to_string(),
            phone: None,
        },
        agent_id: "agent-7".to_string(),
        agent_type: AgentType::Iata,
        corporate_client: None,
        promo_code: None,
        user_id: None,
    }
}

#[tokio::test]
async fn test_create_confirms_and_commits_seats() {
    let h = harness().await;

    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.pnr.as_ref().unwrap().locator, "TM0001");
    // Adult 500, child 375.
    assert_eq!(booking.total_amount, dec!(875));

    let flight = h.inventory.get(&flight()).await.unwrap();
    assert_eq!(flight.available_seats, 148);
    assert_eq!(flight.reserved_seats, 0);
    assert_eq!(flight.bucket("M").unwrap().booked_seats, 2);
}

#[tokio::test]
async fn test_create_is_idempotent_on_reference() {
    let h = harness().await;

    let first = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    let second = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.gds.calls(), vec![GdsOperation::Create]);
    assert_eq!(h.inventory.get(&flight()).await.unwrap().available_seats, 148);
}

#[tokio::test]
async fn test_invalid_payload_fails_before_any_hold() {
    let h = harness().await;
    let mut request = new_booking("AGY-1001");
    request.passengers[0].date_of_birth = None;

    let err = h.orchestrator.create_booking(request).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(h.gds.calls().is_empty());
    assert_eq!(h.inventory.get(&flight()).await.unwrap().available_seats, 150);
}

#[tokio::test]
async fn test_gds_rejection_releases_holds() {
    let h = harness().await;
    h.gds
        .fail_next(GdsOperation::Create, ScriptedFailure::Reject("no seats in M".into()));

    let err = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap_err();
    assert!(matches!(err, CoreError::GdsRejected(_)));

    let flight = h.inventory.get(&flight()).await.unwrap();
    assert_eq!(flight.available_seats, 150);
    assert_eq!(flight.reserved_seats, 0);
    assert!(flight.holds.is_empty());
}

#[tokio::test]
async fn test_timeout_after_apply_reconciles_to_confirmed() {
    let h = harness().await;
    h.gds.fail_next(GdsOperation::Create, ScriptedFailure::TimeoutAfterApply);

    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(
        booking.pnr.as_ref().unwrap().locator,
        h.gds.record("AGY-1001").unwrap().pnr
    );
    assert_eq!(h.gds.calls(), vec![GdsOperation::Create, GdsOperation::Retrieve]);
    assert_eq!(h.inventory.get(&flight()).await.unwrap().available_seats, 148);
}

#[tokio::test]
async fn test_timeout_before_apply_releases_holds() {
    let h = harness().await;
    h.gds.fail_next(GdsOperation::Create, ScriptedFailure::TimeoutBeforeApply);

    let err = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap_err();
    assert!(matches!(err, CoreError::GdsCommunication(_)));
    let flight = h.inventory.get(&flight()).await.unwrap();
    assert_eq!(flight.reserved_seats, 0);
    assert_eq!(flight.available_seats, 150);

    // The retry goes through cleanly.
    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_tickets_matched_by_passenger_not_position() {
    let h = harness().await;
    h.gds.set_ticket_quirk(TicketQuirk::Reversed);
    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();

    let ticketed = h.orchestrator.issue_tickets(booking.id).await.unwrap();
    assert_eq!(ticketed.status, BookingStatus::Ticketed);
    assert_eq!(ticketed.tickets.len(), 2);
    assert_eq!(ticketed.tickets[0].passenger_name, "Sara Alharbi");
    assert_eq!(ticketed.tickets[0].amount, dec!(500));
    assert_eq!(ticketed.tickets[1].amount, dec!(375));

    let events = h.sink.accounting();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AccountingEventKind::TicketIssued);
    assert_eq!(events[0].references.len(), 2);
}

#[tokio::test]
async fn test_short_ticket_response_is_a_protocol_error() {
    let h = harness().await;
    h.gds.set_ticket_quirk(TicketQuirk::MissingOne);
    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();

    let err = h.orchestrator.issue_tickets(booking.id).await.unwrap_err();
    assert!(matches!(err, CoreError::GdsProtocol(_)));
    let stored = h.orchestrator.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert!(stored.tickets.is_empty());
}

#[tokio::test]
async fn test_cancel_releases_seats_and_is_final() {
    let h = harness().await;
    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    h.orchestrator.assign_seat(booking.id, 0, &flight(), "12A").await.unwrap();
    h.orchestrator.issue_tickets(booking.id).await.unwrap();

    let cancelled = h.orchestrator.cancel_booking(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let flight = h.inventory.get(&flight()).await.unwrap();
    assert_eq!(flight.available_seats, 150);
    assert_eq!(flight.seat("12A").unwrap().status, SeatStatus::Available);

    let kinds: Vec<_> = h.sink.accounting().into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![AccountingEventKind::TicketIssued, AccountingEventKind::BookingCancelled]
    );

    let err = h.orchestrator.cancel_booking(booking.id).await.unwrap_err();
    assert!(matches!(err, CoreError::StateConflict { .. }));
    let err = h.orchestrator.issue_tickets(booking.id).await.unwrap_err();
    assert!(matches!(err, CoreError::StateConflict { .. }));
}

#[tokio::test]
async fn test_void_only_inside_window() {
    let h = harness().await;
    let late = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    h.orchestrator.issue_tickets(late.id).await.unwrap();
    let early = h.orchestrator.create_booking(new_booking("AGY-1002")).await.unwrap();

    h.clock.advance(Duration::hours(25));
    h.orchestrator.issue_tickets(early.id).await.unwrap();

    let err = h.orchestrator.void_tickets(late.id).await.unwrap_err();
    assert!(matches!(err, CoreError::StateConflict { .. }));

    let voided = h.orchestrator.void_tickets(early.id).await.unwrap();
    assert_eq!(voided.status, BookingStatus::Voided);
    assert!(voided.tickets.iter().all(|t| t.status == TicketStatus::Voided));
    assert_eq!(h.inventory.get(&flight()).await.unwrap().available_seats, 148);
}

#[tokio::test]
async fn test_refund_flow_closes_booking_at_full_amount() {
    let h = harness().await;
    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    let decision = || RefundDecision {
        decided_by: "finance-1".into(),
        note: None,
    };
    let request = |amount| RefundRequest {
        amount,
        reason: "schedule change".into(),
        requested_by: "agent-7".into(),
        ticket_number: None,
    };

    let partial = h.orchestrator.request_refund(booking.id, request(dec!(300))).await.unwrap();
    h.orchestrator.approve_refund(partial.id, decision()).await.unwrap();
    h.orchestrator.process_refund(partial.id).await.unwrap();
    assert_eq!(
        h.orchestrator.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );

    let err = h
        .orchestrator
        .request_refund(booking.id, request(dec!(600)))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let rest = h.orchestrator.request_refund(booking.id, request(dec!(575))).await.unwrap();
    // Processing before approval is refused.
    assert!(h.orchestrator.process_refund(rest.id).await.is_err());
    h.orchestrator.approve_refund(rest.id, decision()).await.unwrap();
    h.orchestrator.process_refund(rest.id).await.unwrap();

    let closed = h.orchestrator.get_booking(booking.id).await.unwrap();
    assert_eq!(closed.status, BookingStatus::Refunded);
    assert_eq!(h.inventory.get(&flight()).await.unwrap().available_seats, 150);
    assert_eq!(h.gds.record("AGY-1001").unwrap().status, tarmac_core::gds::GdsRecordStatus::Cancelled);

    let refunds: Vec<_> = h
        .sink
        .accounting()
        .into_iter()
        .filter(|e| e.kind == AccountingEventKind::RefundProcessed)
        .map(|e| e.amount)
        .collect();
    assert_eq!(refunds, vec![dec!(300), dec!(575)]);
}

#[tokio::test]
async fn test_limit_blocks_before_seats_are_held() {
    let h = harness().await;
    h.governor
        .create_limit(BookingLimit::new(
            "Daily agency revenue",
            LimitType::Revenue,
            LimitScope::System,
            dec!(1000),
            LimitPeriod::Daily,
            Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
        ))
        .await
        .unwrap();

    h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    let err = h
        .orchestrator
        .create_booking(new_booking("AGY-1002"))
        .await
        .unwrap_err();
    match err {
        CoreError::LimitBlocked {
            current_usage,
            limit_value,
            ..
        } => {
            assert_eq!(current_usage, dec!(875));
            assert_eq!(limit_value, dec!(1000));
        }
        other => panic!("expected limit blocked, got {:?}", other),
    }

    assert_eq!(h.gds.calls(), vec![GdsOperation::Create]);
    let flight = h.inventory.get(&flight()).await.unwrap();
    assert_eq!(flight.available_seats, 148);
    assert_eq!(flight.reserved_seats, 0);
}

#[tokio::test]
async fn test_cancel_gives_limit_usage_back() {
    let h = harness().await;
    let limit = h
        .governor
        .create_limit(BookingLimit::new(
            "SV1020 seats",
            LimitType::Seat,
            LimitScope::Flight {
                flight_number: "SV1020".into(),
            },
            dec!(10),
            LimitPeriod::Total,
            Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
        ))
        .await
        .unwrap();

    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();
    assert_eq!(h.governor.get_limit(limit.id).await.unwrap().current_usage, dec!(2));

    h.orchestrator.cancel_booking(booking.id).await.unwrap();
    assert_eq!(h.governor.get_limit(limit.id).await.unwrap().current_usage, dec!(0));
}

#[tokio::test]
async fn test_ancillary_lifecycle() {
    let h = harness().await;
    let booking = h.orchestrator.create_booking(new_booking("AGY-1001")).await.unwrap();

    let bag = h
        .orchestrator
        .attach_ancillary(
            booking.id,
            AttachAncillary {
                passenger_index: 0,
                code: "xbag".into(),
                quantity: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(bag.status, AncillaryStatus::Pending);
    assert_eq!(bag.price, dec!(125));

    // 105 minute flight is too short for a hot meal.
    let err = h
        .orchestrator
        .attach_ancillary(
            booking.id,
            AttachAncillary {
                passenger_index: 1,
                code: "HOTMEAL".into(),
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    h.orchestrator.confirm_ancillary(booking.id, bag.id).await.unwrap();
    let used = h.orchestrator.mark_ancillary_used(booking.id, bag.id).await.unwrap();
    assert_eq!(used.status, AncillaryStatus::Used);
    assert!(h.orchestrator.refund_ancillary(booking.id, bag.id).await.is_err());

    h.orchestrator.cancel_booking(booking.id).await.unwrap();
    let err = h
        .orchestrator
        .attach_ancillary(
            booking.id,
            AttachAncillary {
                passenger_index: 0,
                code: "XBAG".into(),
                quantity: 5,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StateConflict { .. }));
}

#[tokio::test]
async fn test_single_use_promo_wins_once_under_concurrency() {
    let h = harness_with(Arc::new(MemoryInventoryRepository::new()), vec![once_promo()]).await;
    h.gds.set_latency(std::time::Duration::from_millis(50));

    let mut first = new_booking("AGY-1001");
    first.promo_code = Some("ONCE".into());
    let mut second = new_booking("AGY-1002");
    second.promo_code = Some("once".into());

    let (a, b) = tokio::join!(
        h.orchestrator.create_booking(first),
        h.orchestrator.create_booking(second)
    );
    let results = [a, b];
    let confirmed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].total_amount, dec!(775));
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CoreError::PromoInvalid { .. }))));

    assert_eq!(h.pricing.promo("ONCE").unwrap().usage_count, 1);
    let flight = h.inventory.get(&flight()).await.unwrap();
    assert_eq!(flight.available_seats, 148);
    assert_eq!(flight.reserved_seats, 0);
}

#[tokio::test]
async fn test_failed_booking_gives_promo_use_back() {
    let h = harness_with(Arc::new(MemoryInventoryRepository::new()), vec![once_promo()]).await;
    h.gds
        .fail_next(GdsOperation::Create, ScriptedFailure::Reject("fare no longer filed".into()));

    let mut request = new_booking("AGY-1001");
    request.promo_code = Some("ONCE".into());
    assert!(h.orchestrator.create_booking(request).await.is_err());
    assert_eq!(h.pricing.promo("ONCE").unwrap().usage_count, 0);

    let mut retry = new_booking("AGY-1002");
    retry.promo_code = Some("ONCE".into());
    let booking = h.orchestrator.create_booking(retry).await.unwrap();
    assert_eq!(booking.total_amount, dec!(775));
    assert_eq!(h.pricing.promo("ONCE").unwrap().usage_count, 1);
}

#[tokio::test]
async fn test_failed_seat_sale_unwinds_the_booking() {
    let repo = Arc::new(FlakyInventoryRepository::default());
    let h = harness_with(repo.clone(), Vec::new()).await;
    let limit = h
        .governor
        .create_limit(BookingLimit::new(
            "SV1020 seats",
            LimitType::Seat,
            LimitScope::Flight {
                flight_number: "SV1020".into(),
            },
            dec!(10),
            LimitPeriod::Total,
            Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
        ))
        .await
        .unwrap();

    // First save places the hold, the second would sell it.
    repo.fail_save(2);
    let err = h
        .orchestrator
        .create_booking(new_booking("AGY-1001"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));

    assert_eq!(h.gds.calls(), vec![GdsOperation::Create, GdsOperation::Cancel]);
    assert_eq!(h.gds.record("AGY-1001").unwrap().status, GdsRecordStatus::Cancelled);
    assert!(h.orchestrator.list_bookings(10).await.unwrap().is_empty());
    assert_eq!(h.governor.get_limit(limit.id).await.unwrap().current_usage, dec!(0));

    let flight = h.inventory.get(&flight()).await.unwrap();
    assert_eq!(flight.available_seats, 150);
    assert_eq!(flight.reserved_seats, 0);
    assert!(flight.holds.is_empty());
    assert_eq!(flight.bucket("M").unwrap().held_seats, 0);
}
