use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tarmac_catalog::{
    AncillaryCatalog, InventoryError, InventoryManager, PricingEngine, QuoteRequest, QuoteSegment, SeatInventory,
    SeatOccupant, SeatRequest,
};
use tarmac_core::gds::{GdsBookingRequest, GdsRecordStatus, GdsTicketNumber, GdsTicketRequest};
use tarmac_core::sink::{AccountingSink, TracingSink};
use tarmac_core::{Clock, CoreError, CoreResult, FlightDateKey};
use tarmac_governor::{BookingDemand, BookingGovernor};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::finance::FinancialEvents;
use crate::models::{BookedSegment, Booking, BookingStatus, NewBooking, Pnr, Ticket, TicketStatus};
use crate::repository::BookingRepository;
use crate::resiliency::GdsGateway;

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    #[serde(default = "default_void_window_hours")]
    pub void_window_hours: i64,
}

fn default_void_window_hours() -> i64 {
    24
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            void_window_hours: default_void_window_hours(),
        }
    }
}

/// What a reconciliation read found after an indeterminate create.
enum Reconciled {
    Exists(Pnr),
    Absent,
    Unknown(CoreError),
}

/// Marks a client reference as being created so concurrent retries of the
/// same request do not both commit seats.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    reference: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.reference);
    }
}

/// Drives bookings through create, ticket, cancel, void and refund, keeping
/// inventory, limits and the GDS in step.
pub struct BookingOrchestrator {
    pub(crate) bookings: Arc<dyn BookingRepository>,
    pub(crate) inventory: Arc<InventoryManager>,
    pub(crate) pricing: Arc<PricingEngine>,
    pub(crate) governor: Arc<BookingGovernor>,
    pub(crate) gds: Arc<GdsGateway>,
    pub(crate) ancillaries: Arc<AncillaryCatalog>,
    pub(crate) accounting: Arc<dyn AccountingSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: BookingConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl BookingOrchestrator {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        inventory: Arc<InventoryManager>,
        pricing: Arc<PricingEngine>,
        governor: Arc<BookingGovernor>,
        gds: Arc<GdsGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bookings,
            inventory,
            pricing,
            governor,
            gds,
            ancillaries: Arc::new(AncillaryCatalog::new()),
            accounting: Arc::new(TracingSink),
            clock,
            config: BookingConfig::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_accounting(mut self, sink: Arc<dyn AccountingSink>) -> Self {
        self.accounting = sink;
        self
    }

    pub fn with_ancillaries(mut self, catalog: Arc<AncillaryCatalog>) -> Self {
        self.ancillaries = catalog;
        self
    }

    pub fn with_config(mut self, config: BookingConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn get_booking(&self, id: Uuid) -> CoreResult<Booking> {
        self.bookings
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", id)))
    }

    pub async fn list_bookings(&self, limit: usize) -> CoreResult<Vec<Booking>> {
        self.bookings.list(limit).await
    }

    fn claim(&self, reference: &str) -> CoreResult<InFlight<'_>> {
        let mut set = self.in_flight.lock();
        if !set.insert(reference.to_string()) {
            return Err(CoreError::StateConflict {
                entity: format!("booking {}", reference),
                from: "in progress".into(),
                to: "pending".into(),
            });
        }
        Ok(InFlight {
            set: &self.in_flight,
            reference: reference.to_string(),
        })
    }

    /// Create flow: validate, price, take the promo use, admit, hold seats,
    /// create at the GDS, then confirm and commit. Idempotent on
    /// `client_reference`.
    pub async fn create_booking(&self, request: NewBooking) -> CoreResult<Booking> {
        let validated = request.validate()?;
        let reference = validated.request.client_reference.clone();

        if let Some(existing) = self.bookings.find_by_reference(&reference).await? {
            debug!(reference = %reference, booking_id = %existing.id, "booking already exists for reference");
            return Ok(existing);
        }
        let _claim = self.claim(&reference)?;
        if let Some(existing) = self.bookings.find_by_reference(&reference).await? {
            return Ok(existing);
        }

        let mut segments = Vec::with_capacity(validated.itinerary.segments.len());
        let mut quoted = Vec::with_capacity(validated.itinerary.segments.len());
        for segment in &validated.itinerary.segments {
            let flight = self.inventory.get(&segment.flight).await.map_err(|err| match err {
                InventoryError::NotFound(_) => {
                    CoreError::Validation(format!("itinerary references unknown flight {}", segment.flight))
                }
                other => other.into(),
            })?;
            quoted.push(QuoteSegment {
                segment: segment.clone(),
                origin: flight.origin.clone(),
                destination: flight.destination.clone(),
                load_factor: flight.load_factor,
            });
            segments.push(BookedSegment {
                segment: segment.clone(),
                origin: flight.origin.clone(),
                destination: flight.destination.clone(),
                departure_time: flight.departure_time,
                duration_minutes: flight.duration_minutes(),
            });
        }

        let quote = self.pricing.quote(&QuoteRequest {
            segments: quoted,
            passengers: validated.passengers.iter().map(|p| p.passenger_type).collect(),
            agent_type: validated.request.agent_type,
            corporate_client: validated.request.corporate_client.clone(),
            user_id: validated.request.user_id.clone(),
            promo_code: validated.request.promo_code.clone(),
        })?;

        let now = self.clock.now();
        let mut booking = Booking::new(validated, segments, quote, now);

        self.reserve_promo(&booking)?;
        if let Err(err) = self.place(&mut booking).await {
            self.release_promo(&booking);
            return Err(err);
        }

        self.bookings.insert(&booking).await?;
        info!(
            booking_id = %booking.id,
            reference = %reference,
            pnr = booking.pnr.as_ref().map(|p| p.locator.as_str()).unwrap_or_default(),
            total = %booking.total_amount,
            currency = %booking.currency,
            "booking confirmed"
        );
        Ok(booking)
    }

    /// Admit, hold, create at the GDS and sell the held seats. On failure
    /// everything this step took is given back, except holds whose upstream
    /// outcome is unknown.
    async fn place(&self, booking: &mut Booking) -> CoreResult<()> {
        booking.admission = self.governor.admit(&demand_for(booking)).await?;

        if let Err(err) = self.hold_seats(booking).await {
            self.release_admission(booking).await;
            return Err(err);
        }

        let reference = booking.client_reference.clone();
        let pnr = match self.gds.create_booking(&gds_request(booking)).await {
            Ok(response) => Pnr {
                locator: response.pnr,
                raw: response.raw,
                created_at: self.clock.now(),
            },
            Err(err @ CoreError::GdsCommunication(_)) => match self.reconcile_create(booking).await {
                Reconciled::Exists(pnr) => {
                    warn!(reference = %reference, pnr = %pnr.locator, "create outcome reconciled: booking exists upstream");
                    pnr
                }
                Reconciled::Absent => {
                    warn!(reference = %reference, "create outcome reconciled: nothing upstream, releasing holds");
                    self.release_holds(booking).await;
                    self.release_admission(booking).await;
                    return Err(err);
                }
                Reconciled::Unknown(read_err) => {
                    // Seats stay held: the booking may exist upstream. A retry
                    // with the same reference picks the holds up again.
                    error!(reference = %reference, "create outcome unknown, holds kept: {}", read_err);
                    self.release_admission(booking).await;
                    return Err(err);
                }
            },
            Err(err) => {
                self.release_holds(booking).await;
                self.release_admission(booking).await;
                return Err(err);
            }
        };

        booking.confirm(pnr, self.clock.now())?;
        if let Err(err) = self.commit_seats(booking).await {
            if let Err(cancel_err) = self.cancel_at_gds(booking).await {
                error!(
                    reference = %reference,
                    pnr = booking.pnr.as_ref().map(|p| p.locator.as_str()).unwrap_or_default(),
                    "PNR left open upstream after seat sale failed: {}",
                    cancel_err
                );
            }
            self.release_admission(booking).await;
            return Err(err);
        }
        Ok(())
    }

    fn reserve_promo(&self, booking: &Booking) -> CoreResult<()> {
        if let Some(code) = booking.quote.promo_code.as_deref() {
            self.pricing.redeem_promo(code, booking.user_id.as_deref())?;
            debug!(reference = %booking.client_reference, code, "promo use reserved");
        }
        Ok(())
    }

    fn release_promo(&self, booking: &Booking) {
        if let Some(code) = booking.quote.promo_code.as_deref() {
            self.pricing.release_promo(code, booking.user_id.as_deref());
            debug!(reference = %booking.client_reference, code, "promo use given back");
        }
    }

    async fn reconcile_create(&self, booking: &Booking) -> Reconciled {
        match self.gds.retrieve_booking(&booking.client_reference).await {
            Ok(Some(record)) if record.status != GdsRecordStatus::Cancelled => Reconciled::Exists(Pnr {
                locator: record.pnr,
                raw: record.raw,
                created_at: self.clock.now(),
            }),
            Ok(_) => Reconciled::Absent,
            Err(err) => Reconciled::Unknown(err),
        }
    }

    fn seat_request(booking: &Booking, segment: &BookedSegment) -> SeatRequest {
        SeatRequest::for_segment(&segment.segment, booking.seated_passengers())
    }

    async fn hold_seats(&self, booking: &Booking) -> CoreResult<()> {
        for (held, segment) in booking.segments.iter().enumerate() {
            let request = Self::seat_request(booking, segment);
            if let Err(err) = self
                .inventory
                .reserve_seats(&segment.segment.flight, &booking.client_reference, &request, false)
                .await
            {
                for previous in &booking.segments[..held] {
                    let previous_request = Self::seat_request(booking, previous);
                    if let Err(release_err) = self
                        .inventory
                        .release_seats(&previous.segment.flight, &booking.client_reference, &previous_request, false)
                        .await
                    {
                        error!(flight = %previous.segment.flight, "hold rollback failed: {}", release_err);
                    }
                }
                return Err(err.into());
            }
        }
        Ok(())
    }

    async fn release_holds(&self, booking: &Booking) {
        for segment in &booking.segments {
            let request = Self::seat_request(booking, segment);
            if let Err(err) = self
                .inventory
                .release_seats(&segment.segment.flight, &booking.client_reference, &request, false)
                .await
            {
                error!(flight = %segment.segment.flight, reference = %booking.client_reference, "hold release failed: {}", err);
            }
        }
    }

    /// Turn the soft holds into sales. If one segment cannot be sold, the
    /// segments already sold and the holds still pending are given back.
    async fn commit_seats(&self, booking: &Booking) -> CoreResult<()> {
        for (sold, segment) in booking.segments.iter().enumerate() {
            let request = Self::seat_request(booking, segment);
            let Err(err) = self
                .inventory
                .reserve_seats(&segment.segment.flight, &booking.client_reference, &request, true)
                .await
            else {
                continue;
            };
            error!(
                flight = %segment.segment.flight,
                reference = %booking.client_reference,
                "seat hold promotion failed: {}",
                err
            );
            for (index, other) in booking.segments.iter().enumerate() {
                let other_request = Self::seat_request(booking, other);
                let confirmed = index < sold;
                if let Err(release_err) = self
                    .inventory
                    .release_seats(&other.segment.flight, &booking.client_reference, &other_request, confirmed)
                    .await
                {
                    error!(flight = %other.segment.flight, confirmed, "seat rollback failed: {}", release_err);
                }
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Give back sold seats, seat assignments and limit usage.
    pub(crate) async fn release_commitments(&self, booking: &Booking) {
        for segment in &booking.segments {
            let key = &segment.segment.flight;
            let request = Self::seat_request(booking, segment);
            if let Err(err) = self
                .inventory
                .release_seats(key, &booking.client_reference, &request, true)
                .await
            {
                error!(flight = %key, booking_id = %booking.id, "seat release failed: {}", err);
            }
            if let Err(err) = self.inventory.release_booking_seats(key, booking.id).await {
                error!(flight = %key, booking_id = %booking.id, "seat map release failed: {}", err);
            }
        }
        self.release_admission(booking).await;
    }

    async fn release_admission(&self, booking: &Booking) {
        if let Err(err) = self.governor.release(&booking.admission).await {
            error!(reference = %booking.client_reference, "limit usage release failed: {}", err);
        }
    }

    /// Cancel the PNR upstream. An indeterminate failure is accepted only if
    /// a read shows the PNR cancelled.
    pub(crate) async fn cancel_at_gds(&self, booking: &Booking) -> CoreResult<()> {
        let pnr = booking.pnr_locator()?;
        match self.gds.cancel_booking(pnr).await {
            Ok(_) => Ok(()),
            Err(err @ CoreError::GdsCommunication(_)) => match self.gds.retrieve_booking(&booking.client_reference).await {
                Ok(Some(record)) if record.status == GdsRecordStatus::Cancelled => {
                    warn!(booking_id = %booking.id, pnr, "cancel outcome reconciled: PNR cancelled upstream");
                    Ok(())
                }
                _ => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    pub async fn cancel_booking(&self, id: Uuid) -> CoreResult<Booking> {
        let mut booking = self.get_booking(id).await?;
        booking.ensure_transition(BookingStatus::Cancelled)?;

        self.cancel_at_gds(&booking).await?;

        let now = self.clock.now();
        booking.transition(BookingStatus::Cancelled, now)?;
        let saved = self.bookings.save(&booking).await?;
        self.release_commitments(&saved).await;
        self.accounting.emit(FinancialEvents::booking_cancelled(&saved, now)).await;

        info!(booking_id = %id, reference = %saved.client_reference, "booking cancelled");
        Ok(saved)
    }

    pub async fn issue_tickets(&self, id: Uuid) -> CoreResult<Booking> {
        let mut booking = self.get_booking(id).await?;
        booking.ensure_transition(BookingStatus::Ticketed)?;

        let request = GdsTicketRequest {
            client_reference: booking.client_reference.clone(),
            pnr: booking.pnr_locator()?.to_string(),
            passengers: booking.passengers.iter().map(|p| p.to_gds()).collect(),
            total_amount: booking.total_amount,
            currency: booking.currency.clone(),
        };

        let issued = match self.gds.issue_ticket(&request).await {
            Ok(response) => response.tickets,
            Err(err @ CoreError::GdsCommunication(_)) => match self.gds.retrieve_booking(&booking.client_reference).await {
                Ok(Some(record)) if record.status == GdsRecordStatus::Ticketed && !record.tickets.is_empty() => {
                    warn!(booking_id = %id, "ticketing outcome reconciled: tickets exist upstream");
                    record.tickets
                }
                _ => return Err(err),
            },
            Err(err) => return Err(err),
        };

        let now = self.clock.now();
        booking.tickets = match_tickets(&booking, issued, now)?;
        booking.transition(BookingStatus::Ticketed, now)?;
        let saved = self.bookings.save(&booking).await?;
        self.accounting.emit(FinancialEvents::ticket_issued(&saved, now)).await;

        info!(booking_id = %id, tickets = saved.tickets.len(), "tickets issued");
        Ok(saved)
    }

    /// Same-window reversal of issued tickets.
    pub async fn void_tickets(&self, id: Uuid) -> CoreResult<Booking> {
        let mut booking = self.get_booking(id).await?;
        booking.ensure_transition(BookingStatus::Voided)?;

        let now = self.clock.now();
        let issued_at = booking.ticketed_at.unwrap_or(booking.updated_at);
        if now - issued_at > Duration::hours(self.config.void_window_hours) {
            return Err(CoreError::StateConflict {
                entity: format!("booking {}", id),
                from: format!("ticketed more than {}h ago", self.config.void_window_hours),
                to: "voided".into(),
            });
        }

        self.cancel_at_gds(&booking).await?;

        for ticket in booking.tickets.iter_mut().filter(|t| t.status == TicketStatus::Issued) {
            ticket.status = TicketStatus::Voided;
            ticket.voided_at = Some(now);
        }
        booking.transition(BookingStatus::Voided, now)?;
        let saved = self.bookings.save(&booking).await?;
        self.release_commitments(&saved).await;
        self.accounting.emit(FinancialEvents::ticket_voided(&saved, now)).await;

        info!(booking_id = %id, tickets = saved.tickets.len(), "tickets voided");
        Ok(saved)
    }

    /// Put a passenger of a live booking in a specific seat.
    pub async fn assign_seat(
        &self,
        booking_id: Uuid,
        passenger_index: usize,
        flight: &FlightDateKey,
        seat_number: &str,
    ) -> CoreResult<SeatInventory> {
        let booking = self.get_booking(booking_id).await?;
        if !matches!(booking.status, BookingStatus::Confirmed | BookingStatus::Ticketed) {
            return Err(CoreError::Validation(format!(
                "booking {} is {}, seats can only be assigned on live bookings",
                booking_id,
                booking.status.as_str()
            )));
        }
        let segment = booking
            .segments
            .iter()
            .find(|s| s.segment.flight == *flight)
            .ok_or_else(|| CoreError::Validation(format!("booking {} does not include {}", booking_id, flight)))?;
        let passenger = booking.passenger(passenger_index)?;

        let occupant = SeatOccupant {
            booking_id,
            passenger_index,
            passenger_name: passenger.full_name(),
            passenger_type: passenger.passenger_type,
            age: passenger.age_on(segment.segment.flight.departure_date),
            needs_mobility_assistance: passenger.needs_mobility_assistance,
            travelling_with_infant: passenger.travelling_with_infant,
        };
        let seat = self.inventory.assign_seat(flight, seat_number, &occupant, None).await?;
        info!(%booking_id, passenger_index, flight = %flight, seat = seat_number, "seat assigned");
        Ok(seat)
    }
}

/// Line tickets up with the submitted manifest. The GDS echoes the
/// passenger index and surname; anything else is a protocol violation.
fn match_tickets(booking: &Booking, issued: Vec<GdsTicketNumber>, now: DateTime<Utc>) -> CoreResult<Vec<Ticket>> {
    if issued.len() != booking.passengers.len() {
        return Err(CoreError::GdsProtocol(format!(
            "expected {} tickets for {}, got {}",
            booking.passengers.len(),
            booking.client_reference,
            issued.len()
        )));
    }

    let mut numbers = HashSet::new();
    let mut tickets = Vec::with_capacity(issued.len());
    for passenger in &booking.passengers {
        let mut matching = issued.iter().filter(|t| t.passenger_index == passenger.index);
        let ticket = match (matching.next(), matching.next()) {
            (Some(ticket), None) => ticket,
            _ => {
                return Err(CoreError::GdsProtocol(format!(
                    "passenger {} does not have exactly one ticket",
                    passenger.index
                )))
            }
        };
        if !ticket.last_name.eq_ignore_ascii_case(&passenger.last_name) {
            return Err(CoreError::GdsProtocol(format!(
                "ticket {} names {} but passenger {} is {}",
                ticket.ticket_number, ticket.last_name, passenger.index, passenger.last_name
            )));
        }
        if !numbers.insert(ticket.ticket_number.clone()) {
            return Err(CoreError::GdsProtocol(format!(
                "ticket number {} issued twice",
                ticket.ticket_number
            )));
        }
        tickets.push(Ticket {
            id: Uuid::new_v4(),
            passenger_index: passenger.index,
            passenger_name: passenger.full_name(),
            ticket_number: ticket.ticket_number.clone(),
            amount: booking.quote.passenger_total(passenger.index),
            status: TicketStatus::Issued,
            issued_at: now,
            voided_at: None,
        });
    }
    Ok(tickets)
}

fn gds_request(booking: &Booking) -> GdsBookingRequest {
    GdsBookingRequest {
        client_reference: booking.client_reference.clone(),
        itinerary: booking.itinerary.clone(),
        passengers: booking.passengers.iter().map(|p| p.to_gds()).collect(),
        contact_email: booking.contact.email.clone(),
        total_amount: booking.total_amount,
        currency: booking.currency.clone(),
    }
}

/// Everything a booking consumes, in the units limits count.
pub fn demand_for(booking: &Booking) -> BookingDemand {
    let mut flight_numbers = Vec::new();
    let mut routes = Vec::new();
    let mut airlines = Vec::new();
    for segment in &booking.segments {
        let flight = &segment.segment.flight;
        if !flight_numbers.contains(&flight.flight_number) {
            flight_numbers.push(flight.flight_number.clone());
        }
        let route = (segment.origin.clone(), segment.destination.clone());
        if !routes.contains(&route) {
            routes.push(route);
        }
        let airline = flight.airline_code().to_string();
        if !airlines.contains(&airline) {
            airlines.push(airline);
        }
    }
    BookingDemand {
        reference: booking.client_reference.clone(),
        flight_numbers,
        routes,
        airlines,
        agent_id: booking.agent_id.clone(),
        corporate_client: booking.corporate_client.clone(),
        seats: booking.seated_passengers(),
        passengers: booking.passengers.len() as u32,
        revenue: booking.total_amount,
    }
}
