//! In-memory gateway for tests and local runs without gateway credentials.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{GatewayError, GatewayIntent, IntentRequest, PaymentGateway};
use crate::domain::PaymentStatus;

#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    intents: HashMap<String, (GatewayIntent, IntentRequest)>,
    next: u64,
    fail_next: Option<FailureMode>,
}

#[derive(Clone, Copy, Debug)]
pub enum FailureMode { Timeout, Rejected }

impl MockGateway {
    pub fn new() -> Self { Self::default() }

    /// Makes the next call fail once.
    pub fn fail_next(&self, mode: FailureMode) { self.lock().fail_next = Some(mode); }

    pub fn intent_count(&self) -> usize { self.lock().intents.len() }

    /// The request an intent was created with, metadata included.
    pub fn request_for(&self, intent_id: &str) -> Option<IntentRequest> {
        self.lock().intents.get(intent_id).map(|(_, r)| r.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_failure(state: &mut MockState) -> Result<(), GatewayError> {
        match state.fail_next.take() {
            Some(FailureMode::Timeout) => Err(GatewayError::Timeout),
            Some(FailureMode::Rejected) => Err(GatewayError::Rejected("card_declined".into())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(&self, request: IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        state.next += 1;
        let id = format!("pi_mock_{}", state.next);
        let intent = GatewayIntent {
            client_secret: Some(format!("{id}_secret_{}", rand::random::<u32>())),
            id: id.clone(),
            status: PaymentStatus::Pending,
            amount: request.amount,
            currency: request.currency.clone(),
        };
        state.intents.insert(id, (intent.clone(), request));
        Ok(intent)
    }

    async fn confirm_intent(&self, intent_id: &str, payment_method: Option<&str>) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        let (intent, _) = state.intents.get_mut(intent_id)
            .ok_or_else(|| GatewayError::Rejected(format!("no such payment_intent: {intent_id}")))?;
        intent.status = match payment_method {
            Some("pm_card_chargeDeclined") => PaymentStatus::Failed,
            _ => PaymentStatus::Succeeded,
        };
        Ok(intent.clone())
    }
}
