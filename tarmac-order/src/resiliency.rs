use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tarmac_core::gds::{
    GdsBookingRecord, GdsBookingRequest, GdsBookingResponse, GdsCancelResponse, GdsClient, GdsError, GdsTicketRequest,
    GdsTicketResponse,
};
use tarmac_core::{CoreError, CoreResult};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast
    HalfOpen, // One trial call allowed
}

pub struct CircuitBreaker {
    pub name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    reset_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
    trial_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a call may go through now.
    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_fail = *self.last_failure.read().await;
                match last_fail {
                    Some(instant) if instant.elapsed() >= self.reset_timeout => {
                        let mut s = self.state.write().await;
                        if *s == CircuitState::Open {
                            *s = CircuitState::HalfOpen;
                            tracing::info!("Circuit breaker [{}] moving to half-open", self.name);
                        }
                        self.try_trial()
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => self.try_trial(),
        }
    }

    fn try_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            tracing::info!("Circuit breaker [{}] recovered to closed", self.name);
        }
        self.failure_count.store(0, Ordering::SeqCst);
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.last_failure.write().await = Some(Instant::now());
            tracing::error!("Circuit breaker [{}] tripped to open after {} failures", self.name, count);
        }
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GdsConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    #[serde(default = "default_reset_timeout_seconds")]
    pub reset_timeout_seconds: u64,
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_failure_threshold() -> usize {
    5
}

fn default_reset_timeout_seconds() -> u64 {
    30
}

impl Default for GdsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_seconds: default_reset_timeout_seconds(),
        }
    }
}

/// GDS client behind a per-call timeout and a circuit breaker, translating
/// outcomes into the engine's error taxonomy:
///
/// * circuit open: `GdsUnavailable`, nothing was sent
/// * timeout or transport failure: `GdsCommunication`, outcome unknown
/// * explicit refusal: `GdsRejected`
pub struct GdsGateway {
    client: Arc<dyn GdsClient>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl GdsGateway {
    pub fn new(client: Arc<dyn GdsClient>, config: &GdsConfig) -> Self {
        Self {
            client,
            breaker: CircuitBreaker::new(
                "gds",
                config.failure_threshold,
                Duration::from_secs(config.reset_timeout_seconds),
            ),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn call<T, Fut>(&self, operation: &'static str, call: Fut) -> CoreResult<T>
    where
        Fut: Future<Output = Result<T, GdsError>>,
    {
        if !self.breaker.check().await {
            return Err(CoreError::GdsUnavailable(format!(
                "circuit [{}] open, {} not attempted",
                self.breaker.name, operation
            )));
        }

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => {
                self.breaker.record_success().await;
                Ok(value)
            }
            Ok(Err(GdsError::Rejected { code, message })) => {
                // The remote side answered, so the link is healthy.
                self.breaker.record_success().await;
                Err(CoreError::GdsRejected(format!("{} {}: {}", operation, code, message)))
            }
            Ok(Err(err)) => {
                self.breaker.record_failure().await;
                tracing::error!(operation, "GDS call failed: {}", err);
                Err(CoreError::GdsCommunication(format!("{}: {}", operation, err)))
            }
            Err(_) => {
                self.breaker.record_failure().await;
                tracing::error!(operation, timeout_ms = self.timeout.as_millis() as u64, "GDS call timed out");
                Err(CoreError::GdsCommunication(format!(
                    "{} timed out after {}ms",
                    operation,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn create_booking(&self, request: &GdsBookingRequest) -> CoreResult<GdsBookingResponse> {
        self.call("create_booking", self.client.create_booking(request)).await
    }

    pub async fn cancel_booking(&self, pnr: &str) -> CoreResult<GdsCancelResponse> {
        self.call("cancel_booking", self.client.cancel_booking(pnr)).await
    }

    pub async fn issue_ticket(&self, request: &GdsTicketRequest) -> CoreResult<GdsTicketResponse> {
        self.call("issue_ticket", self.client.issue_ticket(request)).await
    }

    pub async fn retrieve_booking(&self, client_reference: &str) -> CoreResult<Option<GdsBookingRecord>> {
        self.call("retrieve_booking", self.client.retrieve_booking(client_reference))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarmac_core::gds::{GdsOperation, MockGdsClient, ScriptedFailure};

    fn gateway(mock: Arc<MockGdsClient>, threshold: usize) -> GdsGateway {
        GdsGateway::new(
            mock,
            &GdsConfig {
                timeout_ms: 200,
                failure_threshold: threshold,
                reset_timeout_seconds: 30,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_then_half_opens() {
        let breaker = CircuitBreaker::new("test", 2, Duration::from_secs(30));
        assert!(breaker.check().await);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.check().await);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.check().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        // Only one trial at a time.
        assert!(!breaker.check().await);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_communication_error() {
        let mock = Arc::new(MockGdsClient::new());
        mock.set_latency(Duration::from_secs(5));
        let gateway = gateway(mock, 5);

        let err = gateway.retrieve_booking("AGY-1").await.unwrap_err();
        assert!(matches!(err, CoreError::GdsCommunication(_)));
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_calling() {
        let mock = Arc::new(MockGdsClient::new());
        mock.fail_next(GdsOperation::Cancel, ScriptedFailure::Transport("reset by peer".into()));
        let gateway = gateway(mock.clone(), 1);

        assert!(matches!(
            gateway.cancel_booking("TM0001").await,
            Err(CoreError::GdsCommunication(_))
        ));
        assert!(matches!(
            gateway.cancel_booking("TM0001").await,
            Err(CoreError::GdsUnavailable(_))
        ));
        assert_eq!(mock.calls(), vec![GdsOperation::Cancel]);
    }

    #[tokio::test]
    async fn test_rejection_does_not_trip_breaker() {
        let mock = Arc::new(MockGdsClient::new());
        let gateway = gateway(mock, 1);

        assert!(matches!(
            gateway.cancel_booking("NOPE").await,
            Err(CoreError::GdsRejected(_))
        ));
        assert_eq!(gateway.breaker().state().await, CircuitState::Closed);
    }
}
