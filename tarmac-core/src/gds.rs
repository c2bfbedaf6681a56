use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tarmac_shared::Masked;

use crate::types::{ItineraryRef, PassengerType};

/// Failure modes of a GDS round trip.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GdsError {
    /// The call did not complete in time. The remote side may or may not
    /// have applied it.
    #[error("GDS call timed out")]
    Timeout,

    /// Transport-level failure, same uncertainty as a timeout.
    #[error("GDS transport error: {0}")]
    Transport(String),

    /// The GDS answered and refused.
    #[error("GDS rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl GdsError {
    /// True when the remote outcome is unknown and must be reconciled.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, GdsError::Timeout | GdsError::Transport(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdsPassenger {
    /// Position in the submitted manifest, echoed back on tickets.
    pub index: usize,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub passenger_type: PassengerType,
    pub passport_number: Option<Masked<String>>,
    pub nationality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdsBookingRequest {
    /// Caller-generated idempotency key; a retried create with the same
    /// reference must not produce a second PNR.
    pub client_reference: String,
    pub itinerary: ItineraryRef,
    pub passengers: Vec<GdsPassenger>,
    pub contact_email: String,
    pub total_amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdsBookingResponse {
    pub pnr: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdsCancelResponse {
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdsTicketRequest {
    pub client_reference: String,
    pub pnr: String,
    pub passengers: Vec<GdsPassenger>,
    pub total_amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdsTicketNumber {
    pub passenger_index: usize,
    pub last_name: String,
    pub ticket_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdsTicketResponse {
    pub tickets: Vec<GdsTicketNumber>,
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GdsRecordStatus {
    Confirmed,
    Ticketed,
    Cancelled,
}

/// What the GDS currently holds for a client reference. Used to reconcile
/// after an indeterminate failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdsBookingRecord {
    pub pnr: String,
    pub status: GdsRecordStatus,
    pub tickets: Vec<GdsTicketNumber>,
    pub raw: Value,
}

/// Remote reservation system contract. All mutating calls are
/// at-least-once; idempotency is keyed on `client_reference`.
#[async_trait]
pub trait GdsClient: Send + Sync {
    async fn create_booking(&self, request: &GdsBookingRequest) -> Result<GdsBookingResponse, GdsError>;

    async fn cancel_booking(&self, pnr: &str) -> Result<GdsCancelResponse, GdsError>;

    async fn issue_ticket(&self, request: &GdsTicketRequest) -> Result<GdsTicketResponse, GdsError>;

    async fn retrieve_booking(&self, client_reference: &str) -> Result<Option<GdsBookingRecord>, GdsError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GdsOperation {
    Create,
    Cancel,
    IssueTicket,
    Retrieve,
}

/// Scripted misbehaviour for [`MockGdsClient`].
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    /// Reject without applying.
    Reject(String),
    /// Fail with a timeout without applying.
    TimeoutBeforeApply,
    /// Apply the operation upstream, then report a timeout.
    TimeoutAfterApply,
    /// Transport failure without applying.
    Transport(String),
}

/// How the mock shapes ticket responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TicketQuirk {
    #[default]
    None,
    /// Return tickets in reverse manifest order.
    Reversed,
    /// Drop the last passenger's ticket.
    MissingOne,
}

#[derive(Default)]
struct MockState {
    records: HashMap<String, GdsBookingRecord>,
    by_pnr: HashMap<String, String>,
    script: VecDeque<(GdsOperation, ScriptedFailure)>,
    calls: Vec<GdsOperation>,
    ticket_quirk: TicketQuirk,
    latency: Option<Duration>,
    pnr_seq: u32,
    ticket_seq: u64,
}

/// In-process GDS used in tests and local runs.
#[derive(Default)]
pub struct MockGdsClient {
    state: Mutex<MockState>,
}

impl MockGdsClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next call of `operation`.
    pub fn fail_next(&self, operation: GdsOperation, failure: ScriptedFailure) {
        self.lock().script.push_back((operation, failure));
    }

    pub fn set_ticket_quirk(&self, quirk: TicketQuirk) {
        self.lock().ticket_quirk = quirk;
    }

    /// Simulated network latency applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    pub fn calls(&self) -> Vec<GdsOperation> {
        self.lock().calls.clone()
    }

    pub fn record(&self, client_reference: &str) -> Option<GdsBookingRecord> {
        self.lock().records.get(client_reference).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    async fn enter(&self, operation: GdsOperation) -> Option<ScriptedFailure> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(operation);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        let position = state.script.iter().position(|(op, _)| *op == operation)?;
        state.script.remove(position).map(|(_, failure)| failure)
    }
}

fn early_failure(failure: &ScriptedFailure) -> Option<GdsError> {
    match failure {
        ScriptedFailure::Reject(message) => Some(GdsError::Rejected {
            code: "UC".to_string(),
            message: message.clone(),
        }),
        ScriptedFailure::TimeoutBeforeApply => Some(GdsError::Timeout),
        ScriptedFailure::Transport(message) => Some(GdsError::Transport(message.clone())),
        ScriptedFailure::TimeoutAfterApply => None,
    }
}

#[async_trait]
impl GdsClient for MockGdsClient {
    async fn create_booking(&self, request: &GdsBookingRequest) -> Result<GdsBookingResponse, GdsError> {
        let failure = self.enter(GdsOperation::Create).await;
        if let Some(err) = failure.as_ref().and_then(early_failure) {
            return Err(err);
        }

        let mut state = self.lock();
        let pnr = match state.records.get(&request.client_reference) {
            Some(existing) => existing.pnr.clone(),
            None => {
                state.pnr_seq += 1;
                let pnr = format!("TM{:04}", state.pnr_seq);
                let raw = json!({
                    "pnr": pnr,
                    "itinerary": request.itinerary.to_string(),
                    "passengers": request.passengers.len(),
                    "status": "HK",
                });
                state.records.insert(
                    request.client_reference.clone(),
                    GdsBookingRecord {
                        pnr: pnr.clone(),
                        status: GdsRecordStatus::Confirmed,
                        tickets: Vec::new(),
                        raw,
                    },
                );
                state.by_pnr.insert(pnr.clone(), request.client_reference.clone());
                pnr
            }
        };

        if failure.is_some() {
            return Err(GdsError::Timeout);
        }

        Ok(GdsBookingResponse {
            raw: json!({ "pnr": pnr, "status": "HK" }),
            pnr,
        })
    }

    async fn cancel_booking(&self, pnr: &str) -> Result<GdsCancelResponse, GdsError> {
        let failure = self.enter(GdsOperation::Cancel).await;
        if let Some(err) = failure.as_ref().and_then(early_failure) {
            return Err(err);
        }

        let mut state = self.lock();
        let reference = state.by_pnr.get(pnr).cloned().ok_or_else(|| GdsError::Rejected {
            code: "NO_PNR".to_string(),
            message: format!("PNR {} not found", pnr),
        })?;
        if let Some(record) = state.records.get_mut(&reference) {
            record.status = GdsRecordStatus::Cancelled;
        }

        if failure.is_some() {
            return Err(GdsError::Timeout);
        }
        Ok(GdsCancelResponse {
            raw: json!({ "pnr": pnr, "status": "XX" }),
        })
    }

    async fn issue_ticket(&self, request: &GdsTicketRequest) -> Result<GdsTicketResponse, GdsError> {
        let failure = self.enter(GdsOperation::IssueTicket).await;
        if let Some(err) = failure.as_ref().and_then(early_failure) {
            return Err(err);
        }

        let mut state = self.lock();
        let quirk = state.ticket_quirk;
        let existing = state
            .records
            .get(&request.client_reference)
            .map(|r| (r.status, r.tickets.clone()))
            .ok_or_else(|| GdsError::Rejected {
                code: "NO_PNR".to_string(),
                message: format!("PNR {} not found", request.pnr),
            })?;

        let mut tickets = match existing {
            (GdsRecordStatus::Cancelled, _) => {
                return Err(GdsError::Rejected {
                    code: "XX".to_string(),
                    message: "PNR is cancelled".to_string(),
                })
            }
            (GdsRecordStatus::Ticketed, tickets) => tickets,
            (GdsRecordStatus::Confirmed, _) => {
                let mut issued = Vec::with_capacity(request.passengers.len());
                for passenger in &request.passengers {
                    state.ticket_seq += 1;
                    issued.push(GdsTicketNumber {
                        passenger_index: passenger.index,
                        last_name: passenger.last_name.to_uppercase(),
                        ticket_number: format!("065{:010}", state.ticket_seq),
                    });
                }
                if let Some(record) = state.records.get_mut(&request.client_reference) {
                    record.status = GdsRecordStatus::Ticketed;
                    record.tickets = issued.clone();
                }
                issued
            }
        };

        if failure.is_some() {
            return Err(GdsError::Timeout);
        }

        match quirk {
            TicketQuirk::None => {}
            TicketQuirk::Reversed => tickets.reverse(),
            TicketQuirk::MissingOne => {
                tickets.pop();
            }
        }

        Ok(GdsTicketResponse {
            raw: json!({ "pnr": request.pnr, "tickets": tickets.len() }),
            tickets,
        })
    }

    async fn retrieve_booking(&self, client_reference: &str) -> Result<Option<GdsBookingRecord>, GdsError> {
        if let Some(err) = self.enter(GdsOperation::Retrieve).await.as_ref().and_then(early_failure) {
            return Err(err);
        }
        Ok(self.lock().records.get(client_reference).cloned())
    }
}
