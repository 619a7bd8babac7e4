//! The orchestration engine: walks a user journey step by step over a
//! [`JourneySnapshot`].
//!
//! The engine holds no per-journey state. Every entry point takes the
//! snapshot by `&mut`, runs steps until the journey suspends or ends, and
//! reports what the caller must do next as an [`Outcome`].

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use xavyo_claims::{run_pipeline, ClaimValue, ClaimsDelta};
use xavyo_federation::{
    AdapterContext, AdapterError, AdapterResult, Exchange, OutboundRedirect, ProtocolAdapter,
    RawResponse,
};
use xavyo_policy::{
    OrchestrationStep, PolicyGraph, PreconditionKind, ResolvedPolicy, RetryConfig, StepType,
    TechnicalProfile, UserJourney, SELECTED_CLAIMS_EXCHANGE,
};

use crate::error::{EngineError, ErrorKind};
use crate::snapshot::{
    JourneySnapshot, JourneyState, RelyingPartyRequest, SelectionCandidate, SsoRecord, StepEvent,
};

/// Claims released to the relying party, named as the relying party knows
/// them.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedClaims {
    pub subject: String,
    pub claims: Vec<(String, ClaimValue)>,
}

impl IssuedClaims {
    /// Claims as JSON, keyed by partner claim name.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.claims
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

/// What the caller must do after an engine call.
#[derive(Debug)]
pub enum Outcome {
    /// Persist the snapshot, then send the browser to
    /// [`OutboundRedirect::location`] with the continuity token.
    Redirect(OutboundRedirect),
    /// Let the user pick one of the candidates, then call
    /// [`JourneyEngine::select`].
    Selection(Vec<SelectionCandidate>),
    Completed(IssuedClaims),
    Failed(ErrorKind),
}

enum Flow {
    Continue,
    Stop(Outcome),
}

#[derive(Clone)]
pub struct JourneyEngine {
    graph: Arc<PolicyGraph>,
    adapters: AdapterContext,
}

impl std::fmt::Debug for JourneyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyEngine")
            .field("policies", &self.graph.len())
            .finish_non_exhaustive()
    }
}

fn invalid_state(expected: &'static str, actual: JourneyState) -> EngineError {
    EngineError::InvalidState {
        expected,
        actual: actual.to_string(),
    }
}

/// Index of the first precondition that matches the bag.
fn matching_precondition(step: &OrchestrationStep, snapshot: &JourneySnapshot) -> Option<usize> {
    step.preconditions.iter().position(|p| match p.kind {
        PreconditionKind::ClaimsExist => snapshot.bag.contains(&p.claim),
        PreconditionKind::ClaimEquals => snapshot
            .bag
            .get(&p.claim)
            .is_some_and(|v| p.value.as_deref() == Some(v.to_claim_string().as_str())),
    })
}

/// Calls `call` until it succeeds, fails with a non-retryable error, or
/// `retry.max_attempts` attempts have been made. Returns the result and the
/// number of attempts.
async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    profile_id: &str,
    mut call: F,
) -> (AdapterResult<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdapterResult<T>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff = retry.backoff_ms(attempt);
                warn!(
                    technical_profile = %profile_id,
                    error = %e,
                    attempt,
                    wait_ms = backoff,
                    "Provider unreachable, retrying with backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            result => return (result, attempt),
        }
    }
}

impl JourneyEngine {
    #[must_use]
    pub fn new(graph: Arc<PolicyGraph>, adapters: AdapterContext) -> Self {
        Self { graph, adapters }
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<PolicyGraph> {
        &self.graph
    }

    #[must_use]
    pub fn adapters(&self) -> &AdapterContext {
        &self.adapters
    }

    fn policy(&self, policy_id: &str) -> Result<&ResolvedPolicy, EngineError> {
        self.graph
            .policy(policy_id)
            .ok_or_else(|| EngineError::UnknownPolicy(policy_id.to_string()))
    }

    fn journey<'p>(policy: &'p ResolvedPolicy, id: &str) -> Result<&'p UserJourney, EngineError> {
        policy.journey(id).ok_or_else(|| EngineError::UnknownJourney {
            policy: policy.policy_id().to_string(),
            journey: id.to_string(),
        })
    }

    /// Creates a journey for `request` on the policy's default user journey.
    ///
    /// Request parameters named by the relying party's input claims are
    /// typed and copied into the bag. Nothing runs until
    /// [`JourneyEngine::advance`].
    pub fn start(
        &self,
        policy_id: &str,
        request: RelyingPartyRequest,
        params: &BTreeMap<String, String>,
        sso: SsoRecord,
    ) -> Result<JourneySnapshot, EngineError> {
        let policy = self.policy(policy_id)?;
        let rp = policy.relying_party();
        let journey = Self::journey(policy, &rp.default_user_journey)?;

        let mut snapshot = JourneySnapshot::new(policy_id, &journey.id, request, sso);
        for input in &rp.input_claims {
            let Some(raw) = params.get(input.partner_name()) else {
                continue;
            };
            let data_type = policy
                .claim_type(&input.claim_type)
                .map(|c| c.data_type)
                .ok_or_else(|| EngineError::UnknownPolicy(policy_id.to_string()))?;
            let value = ClaimValue::coerce(raw, data_type).map_err(|e| {
                EngineError::InvalidParameter {
                    name: input.partner_name().to_string(),
                    reason: e.to_string(),
                }
            })?;
            snapshot.bag.set(input.claim_type.clone(), value);
        }

        info!(
            journey_id = %snapshot.journey_id,
            policy_id = %policy_id,
            user_journey = %journey.id,
            client_id = %snapshot.request.client_id,
            "Journey started"
        );
        Ok(snapshot)
    }

    /// Runs steps from the current one until the journey suspends or ends.
    #[instrument(skip_all, fields(journey_id = %snapshot.journey_id, policy_id = %snapshot.policy_id))]
    pub async fn advance(&self, snapshot: &mut JourneySnapshot) -> Result<Outcome, EngineError> {
        self.drive(snapshot).await
    }

    /// Applies the user's choice at a selection step and continues.
    #[instrument(skip_all, fields(journey_id = %snapshot.journey_id, policy_id = %snapshot.policy_id))]
    pub async fn select(
        &self,
        snapshot: &mut JourneySnapshot,
        choice: &str,
    ) -> Result<Outcome, EngineError> {
        let JourneyState::AtStep(order) = snapshot.state else {
            return Err(invalid_state("awaiting a selection", snapshot.state));
        };
        if !snapshot.awaiting_selection() {
            return Err(invalid_state("awaiting a selection", snapshot.state));
        }
        if !snapshot.offered.iter().any(|c| c.claims_exchange == choice) {
            warn!(choice = %choice, "Selection is not one of the offered claims exchanges");
            return Err(EngineError::InvalidSelection(choice.to_string()));
        }

        let policy = self.policy(&snapshot.policy_id)?;
        let journey = Self::journey(policy, &snapshot.user_journey)?;
        let step_type = StepType::ClaimsProviderSelection;

        let delta = ClaimsDelta::new().with(
            SELECTED_CLAIMS_EXCHANGE,
            ClaimValue::String(choice.to_string()),
        );
        if let Err(e) = snapshot.bag.apply(delta, policy.claims_schema()) {
            return Ok(Self::fail(snapshot, order, step_type, ErrorKind::Internal, &e));
        }
        snapshot.offered.clear();
        snapshot.record(
            order,
            step_type,
            StepEvent::Selected {
                claims_exchange: choice.to_string(),
            },
        );
        info!(step = order, claims_exchange = %choice, "Claims provider selected");

        match journey.next_step(order) {
            Some(next) => snapshot.state = JourneyState::AtStep(next.order),
            None => {
                return Ok(Self::fail(
                    snapshot,
                    order,
                    step_type,
                    ErrorKind::Internal,
                    &"selection is the last step",
                ))
            }
        }
        self.drive(snapshot).await
    }

    /// Completes the exchange a journey is suspended on with the provider's
    /// answer, then continues.
    #[instrument(skip_all, fields(journey_id = %snapshot.journey_id, policy_id = %snapshot.policy_id))]
    pub async fn handle_callback(
        &self,
        snapshot: &mut JourneySnapshot,
        raw: RawResponse,
    ) -> Result<Outcome, EngineError> {
        let JourneyState::AwaitingExternalCallback(order) = snapshot.state else {
            return Err(invalid_state("awaiting a provider callback", snapshot.state));
        };
        let policy = self.policy(&snapshot.policy_id)?;
        let journey = Self::journey(policy, &snapshot.user_journey)?;
        let step_type = StepType::ClaimsExchange;

        let exchange_id = snapshot.current_exchange.take();
        let profile = exchange_id
            .as_deref()
            .and_then(|id| journey.claims_exchange(id))
            .and_then(|e| policy.technical_profile(&e.technical_profile));
        let Some(profile) = profile else {
            return Ok(Self::fail(
                snapshot,
                order,
                step_type,
                ErrorKind::Internal,
                &format!("no technical profile for claims exchange {exchange_id:?}"),
            ));
        };

        let span = info_span!("claims_exchange", step = order, technical_profile = %profile.id);
        let flow = self
            .complete_callback(policy, order, profile, raw, snapshot)
            .instrument(span)
            .await;
        if let Flow::Stop(outcome) = flow {
            return Ok(outcome);
        }

        match journey.next_step(order) {
            Some(next) => snapshot.state = JourneyState::AtStep(next.order),
            None => {
                return Ok(Self::fail(
                    snapshot,
                    order,
                    step_type,
                    ErrorKind::Internal,
                    &"claims exchange is the last step",
                ))
            }
        }
        self.drive(snapshot).await
    }

    async fn complete_callback(
        &self,
        policy: &ResolvedPolicy,
        order: u32,
        profile: &TechnicalProfile,
        raw: RawResponse,
        snapshot: &mut JourneySnapshot,
    ) -> Flow {
        let adapter = ProtocolAdapter::for_protocol(profile.protocol);
        let pending = snapshot.pending.take();
        let (result, attempts) = {
            let exchange = Exchange {
                profile,
                schema: policy.claims_schema(),
                bag: &snapshot.bag,
            };
            let (exchange, raw, pending, ctx) = (&exchange, &raw, pending.as_ref(), &self.adapters);
            with_retry(&profile.retry, &profile.id, move || {
                adapter.parse_response(exchange, raw, pending, ctx)
            })
            .await
        };
        Self::record_retries(snapshot, order, StepType::ClaimsExchange, profile, attempts);

        match result {
            Ok(delta) => Self::complete_exchange(policy, order, profile, delta, true, snapshot),
            Err(e) => Flow::Stop(Self::fail_adapter(snapshot, order, profile, &e)),
        }
    }

    async fn drive(&self, snapshot: &mut JourneySnapshot) -> Result<Outcome, EngineError> {
        let policy = self.policy(&snapshot.policy_id)?;
        let journey = Self::journey(policy, &snapshot.user_journey)?;

        let mut next = match snapshot.state {
            JourneyState::NotStarted => journey.first_step(),
            JourneyState::AtStep(order) if snapshot.offered.is_empty() => journey.step(order),
            other => return Err(invalid_state("ready to run a step", other)),
        };
        let mut last = (0, StepType::ClaimsExchange);

        while let Some(step) = next {
            snapshot.state = JourneyState::AtStep(step.order);
            last = (step.order, step.step_type);

            if let Some(index) = matching_precondition(step, snapshot) {
                debug!(
                    step = step.order,
                    step_type = %step.step_type,
                    precondition = index,
                    "Precondition matched, skipping step"
                );
                snapshot.record(
                    step.order,
                    step.step_type,
                    StepEvent::Skipped {
                        precondition: index,
                    },
                );
                next = journey.next_step(step.order);
                continue;
            }

            let flow = match step.step_type {
                StepType::ClaimsProviderSelection => {
                    Flow::Stop(Self::offer(policy, journey, step, snapshot))
                }
                StepType::ClaimsExchange => {
                    let span = info_span!("orchestration_step", step = step.order);
                    self.run_exchange(policy, step, snapshot)
                        .instrument(span)
                        .await
                }
                StepType::SendClaims => Flow::Stop(Self::send_claims(policy, step, snapshot)),
            };
            if let Flow::Stop(outcome) = flow {
                return Ok(outcome);
            }
            next = journey.next_step(step.order);
        }

        Ok(Self::fail(
            snapshot,
            last.0,
            last.1,
            ErrorKind::Internal,
            &"journey ended without sending claims",
        ))
    }

    fn offer(
        policy: &ResolvedPolicy,
        journey: &UserJourney,
        step: &OrchestrationStep,
        snapshot: &mut JourneySnapshot,
    ) -> Outcome {
        let candidates: Vec<SelectionCandidate> = step
            .selections
            .iter()
            .filter_map(|id| journey.claims_exchange(id))
            .map(|exchange| {
                let tp = &exchange.technical_profile;
                let display_name = policy
                    .provider_of(tp)
                    .and_then(|p| p.display_name.clone())
                    .or_else(|| policy.technical_profile(tp).and_then(|p| p.display_name.clone()))
                    .unwrap_or_else(|| exchange.id.clone());
                SelectionCandidate {
                    claims_exchange: exchange.id.clone(),
                    technical_profile: tp.clone(),
                    display_name,
                }
            })
            .collect();

        snapshot.offered.clone_from(&candidates);
        snapshot.record(
            step.order,
            step.step_type,
            StepEvent::SelectionOffered {
                candidates: candidates.len(),
            },
        );
        info!(step = step.order, candidates = candidates.len(), "Awaiting provider selection");
        Outcome::Selection(candidates)
    }

    async fn run_exchange(
        &self,
        policy: &ResolvedPolicy,
        step: &OrchestrationStep,
        snapshot: &mut JourneySnapshot,
    ) -> Flow {
        let order = step.order;
        let chosen = match step.claims_exchanges.as_slice() {
            [only] => Some(only),
            many => snapshot
                .bag
                .get_str(SELECTED_CLAIMS_EXCHANGE)
                .and_then(|selected| many.iter().find(|e| e.id == selected)),
        };
        let Some(chosen) = chosen else {
            return Flow::Stop(Self::fail(
                snapshot,
                order,
                step.step_type,
                ErrorKind::Internal,
                &"no claims exchange selected for this step",
            ));
        };
        let Some(profile) = policy.technical_profile(&chosen.technical_profile) else {
            return Flow::Stop(Self::fail(
                snapshot,
                order,
                step.step_type,
                ErrorKind::Internal,
                &format!("technical profile '{}' is not defined", chosen.technical_profile),
            ));
        };

        let seed = *snapshot.seed.as_bytes();
        if let Err(e) = run_pipeline(
            &profile.input_claims_transformations,
            &mut snapshot.bag,
            policy,
            &seed,
        ) {
            return Flow::Stop(Self::fail(snapshot, order, step.step_type, ErrorKind::Internal, &e));
        }

        if let Some(flow) = self.restore_session(policy, order, profile, snapshot).await {
            return flow;
        }

        let adapter = ProtocolAdapter::for_protocol(profile.protocol);
        let (result, attempts) = {
            let exchange = Exchange {
                profile,
                schema: policy.claims_schema(),
                bag: &snapshot.bag,
            };
            let (exchange, ctx) = (&exchange, &self.adapters);
            with_retry(&profile.retry, &profile.id, move || {
                adapter.build_request(exchange, ctx)
            })
            .await
        };
        Self::record_retries(snapshot, order, step.step_type, profile, attempts);
        let request = match result {
            Ok(request) => request,
            Err(e) => return Flow::Stop(Self::fail_adapter(snapshot, order, profile, &e)),
        };

        if let Some(redirect) = request.redirect {
            snapshot.pending = request.pending;
            snapshot.current_exchange = Some(chosen.id.clone());
            snapshot.state = JourneyState::AwaitingExternalCallback(order);
            snapshot.record(
                order,
                step.step_type,
                StepEvent::Redirected {
                    technical_profile: profile.id.clone(),
                },
            );
            info!(
                step = order,
                technical_profile = %profile.id,
                endpoint = %redirect.endpoint(),
                "Awaiting provider callback"
            );
            return Flow::Stop(Outcome::Redirect(redirect));
        }

        let (result, attempts) = {
            let exchange = Exchange {
                profile,
                schema: policy.claims_schema(),
                bag: &snapshot.bag,
            };
            let raw = RawResponse::None;
            let (exchange, raw, pending, ctx) =
                (&exchange, &raw, request.pending.as_ref(), &self.adapters);
            with_retry(&profile.retry, &profile.id, move || {
                adapter.parse_response(exchange, raw, pending, ctx)
            })
            .await
        };
        Self::record_retries(snapshot, order, step.step_type, profile, attempts);
        match result {
            Ok(delta) => Self::complete_exchange(policy, order, profile, delta, true, snapshot),
            Err(e) => Flow::Stop(Self::fail_adapter(snapshot, order, profile, &e)),
        }
    }

    /// Restores claims from the SSO record instead of contacting the
    /// provider, if the profile's session-management profile holds a
    /// session.
    async fn restore_session(
        &self,
        policy: &ResolvedPolicy,
        order: u32,
        profile: &TechnicalProfile,
        snapshot: &mut JourneySnapshot,
    ) -> Option<Flow> {
        let sm_id = profile.session_management.as_deref()?;
        let remembered = snapshot.sso.session(sm_id)?.clone();
        let sm_profile = policy.technical_profile(sm_id)?;

        let delta = {
            let exchange = Exchange {
                profile: sm_profile,
                schema: policy.claims_schema(),
                bag: &snapshot.bag,
            };
            ProtocolAdapter::Session
                .parse_response(
                    &exchange,
                    &RawResponse::Remembered(remembered),
                    None,
                    &self.adapters,
                )
                .await
        };
        let delta = match delta {
            Ok(delta) => delta,
            Err(e) => return Some(Flow::Stop(Self::fail_adapter(snapshot, order, sm_profile, &e))),
        };

        info!(
            step = order,
            technical_profile = %profile.id,
            session_profile = %sm_id,
            "Restored claims from SSO session"
        );
        snapshot.record(
            order,
            StepType::ClaimsExchange,
            StepEvent::SessionRestored {
                technical_profile: profile.id.clone(),
            },
        );
        Some(Self::complete_exchange(policy, order, profile, delta, false, snapshot))
    }

    /// Merges an exchange's output claims, runs output transformations and
    /// remembers the session for SSO.
    fn complete_exchange(
        policy: &ResolvedPolicy,
        order: u32,
        profile: &TechnicalProfile,
        delta: ClaimsDelta,
        remember: bool,
        snapshot: &mut JourneySnapshot,
    ) -> Flow {
        let step_type = StepType::ClaimsExchange;
        let written = delta.len();
        if let Err(e) = snapshot.bag.apply(delta, policy.claims_schema()) {
            return Flow::Stop(Self::fail(snapshot, order, step_type, ErrorKind::Internal, &e));
        }
        let seed = *snapshot.seed.as_bytes();
        if let Err(e) = run_pipeline(
            &profile.output_claims_transformations,
            &mut snapshot.bag,
            policy,
            &seed,
        ) {
            return Flow::Stop(Self::fail(snapshot, order, step_type, ErrorKind::Internal, &e));
        }

        if remember {
            if let Some(sm) = profile
                .session_management
                .as_deref()
                .and_then(|id| policy.technical_profile(id))
            {
                let claims = snapshot
                    .bag
                    .subset(sm.output_claims.iter().map(|c| c.claim_type.as_str()));
                debug!(session_profile = %sm.id, claims = claims.len(), "Session remembered");
                snapshot.sso.remember(sm.id.clone(), claims);
            }
        }

        snapshot.record(
            order,
            step_type,
            StepEvent::Exchanged {
                technical_profile: profile.id.clone(),
                claims: written,
            },
        );
        info!(step = order, technical_profile = %profile.id, claims = written, "Claims exchange completed");
        Flow::Continue
    }

    fn send_claims(
        policy: &ResolvedPolicy,
        step: &OrchestrationStep,
        snapshot: &mut JourneySnapshot,
    ) -> Outcome {
        let order = step.order;
        if let Some(issuer) = step
            .technical_profile
            .as_deref()
            .and_then(|id| policy.technical_profile(id))
        {
            let seed = *snapshot.seed.as_bytes();
            if let Err(e) = run_pipeline(
                &issuer.input_claims_transformations,
                &mut snapshot.bag,
                policy,
                &seed,
            ) {
                return Self::fail(snapshot, order, step.step_type, ErrorKind::Internal, &e);
            }
        }

        let rp = policy.relying_party();
        let Some(subject) = snapshot.bag.get(&rp.subject_claim) else {
            return Self::fail(
                snapshot,
                order,
                step.step_type,
                ErrorKind::Internal,
                &format!("subject claim '{}' is missing", rp.subject_claim),
            );
        };
        let subject = subject.to_claim_string();
        let claims: Vec<(String, ClaimValue)> = rp
            .output_claims
            .iter()
            .filter_map(|c| {
                snapshot
                    .bag
                    .get(&c.claim_type)
                    .map(|v| (c.partner_name().to_string(), v.clone()))
            })
            .collect();

        snapshot.state = JourneyState::Completed;
        snapshot.record(order, step.step_type, StepEvent::ClaimsSent);
        info!(
            step = order,
            claims = claims.len(),
            steps = ?snapshot.executed_steps(),
            "Journey completed"
        );
        Outcome::Completed(IssuedClaims { subject, claims })
    }

    fn record_retries(
        snapshot: &mut JourneySnapshot,
        order: u32,
        step_type: StepType,
        profile: &TechnicalProfile,
        attempts: u32,
    ) {
        for attempt in 2..=attempts {
            snapshot.record(
                order,
                step_type,
                StepEvent::Retried {
                    technical_profile: profile.id.clone(),
                    attempt,
                },
            );
        }
    }

    fn fail_adapter(
        snapshot: &mut JourneySnapshot,
        order: u32,
        profile: &TechnicalProfile,
        e: &AdapterError,
    ) -> Outcome {
        warn!(technical_profile = %profile.id, "Claims exchange failed");
        Self::fail(snapshot, order, StepType::ClaimsExchange, ErrorKind::from(e), e)
    }

    fn fail(
        snapshot: &mut JourneySnapshot,
        order: u32,
        step_type: StepType,
        kind: ErrorKind,
        detail: &dyn Display,
    ) -> Outcome {
        if kind == ErrorKind::Internal {
            error!(step = order, kind = ?kind, error = %detail, "Journey invariant violated");
        } else {
            warn!(step = order, kind = ?kind, error = %detail, "Journey failed");
        }
        snapshot.pending = None;
        snapshot.current_exchange = None;
        snapshot.offered.clear();
        snapshot.state = JourneyState::Failed(kind);
        snapshot.record(order, step_type, StepEvent::Failed { kind });
        Outcome::Failed(kind)
    }
}
