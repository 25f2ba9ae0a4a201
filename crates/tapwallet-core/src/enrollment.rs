//! Card enrollment: eligibility, consent, digitization, and provisioning,
//! driven as one generation-guarded session at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use tapwallet_crypto::{ActivationSecret, InstrumentData};
use tapwallet_types::{
    BringupOrigin, ConsentPrompt, ConsentSessionId, DigitizeOutcome, EnrollmentStatus,
    IdvMethod, IdvMethodId, InitState, InputMethod, PendingActivationKind, ProvisioningEvent,
};

use crate::bringup::SdkBringupCoordinator;
use crate::config::OrchestrationConfig;
use crate::engine::TokenizationEngine;

const UPDATE_CAPACITY: usize = 32;

/// Enrollment session phases. `PendingActivation` branches are terminal for
/// this coordinator until the caller continues them (IDV selection, OTP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentPhase {
    Inactive,
    /// Blocking on engine bring-up before the eligibility check.
    WseCheck,
    EligibilityCheck,
    AwaitingConsent,
    Digitization,
    ActivationCodeAcquired,
    Enrolling,
    Continuing,
    SendingActivationCode,
    PendingActivation(PendingActivationKind),
    Finished,
    Error,
}

/// One published enrollment transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentUpdate {
    pub phase: EnrollmentPhase,
    pub error: Option<String>,
}

/// The single live session. Starting a new enrollment supersedes this one:
/// the generation advances, held data is wiped (the activation secret is
/// zeroed by drop), and late callbacks carrying the old generation fall
/// silent.
struct Session {
    generation: u64,
    phase: EnrollmentPhase,
    consent: Option<ConsentPrompt>,
    secret: Option<ActivationSecret>,
    idv_methods: Vec<IdvMethod>,
    last_error: Option<String>,
}

impl Session {
    fn wipe(&mut self) {
        self.consent = None;
        self.secret = None;
        self.idv_methods.clear();
        self.last_error = None;
    }
}

pub struct EnrollmentCoordinator<E> {
    engine: Arc<E>,
    bringup: Arc<SdkBringupCoordinator<E>>,
    config: Arc<OrchestrationConfig>,
    session: Mutex<Session>,
    updates_tx: broadcast::Sender<EnrollmentUpdate>,
}

impl<E: TokenizationEngine> EnrollmentCoordinator<E> {
    pub fn new(
        engine: Arc<E>,
        bringup: Arc<SdkBringupCoordinator<E>>,
        config: Arc<OrchestrationConfig>,
    ) -> Self {
        let (updates_tx, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            engine,
            bringup,
            config,
            session: Mutex::new(Session {
                generation: 0,
                phase: EnrollmentPhase::Inactive,
                consent: None,
                secret: None,
                idv_methods: Vec::new(),
                last_error: None,
            }),
            updates_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnrollmentUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.lock().phase
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Identity-verification methods offered by the issuer, present while
    /// selection is pending.
    pub fn idv_methods(&self) -> Vec<IdvMethod> {
        self.lock().idv_methods.clone()
    }

    /// Begin enrolling a card. Any live session is discarded and wiped
    /// first; bring-up readiness is awaited before the eligibility check.
    pub fn start(self: &Arc<Self>, instrument: InstrumentData, input_method: InputMethod) {
        let generation = {
            let mut session = self.lock();
            if session.phase != EnrollmentPhase::Inactive {
                info!(phase = ?session.phase, "new enrollment supersedes the live session");
            }
            session.generation += 1;
            session.wipe();
            session.phase = EnrollmentPhase::WseCheck;
            session.generation
        };
        self.publish(EnrollmentPhase::WseCheck, None);
        self.bringup.ensure_ready(BringupOrigin::Enrollment);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive_eligibility(generation, instrument, input_method)
                .await;
        });
    }

    async fn drive_eligibility(
        &self,
        generation: u64,
        instrument: InstrumentData,
        input_method: InputMethod,
    ) {
        let ready = self.bringup.wait_terminal().await;
        if ready.state != InitState::Successful {
            let message = ready
                .error
                .unwrap_or_else(|| "engine bring-up failed".to_string());
            return self.fail(generation, message);
        }

        let sealed = match instrument.seal(&self.config.onboarding_key, &self.config.device.serial)
        {
            Ok(sealed) => sealed,
            Err(err) => return self.fail(generation, err.to_string()),
        };
        drop(instrument);

        if !self.transition(generation, EnrollmentPhase::EligibilityCheck) {
            return;
        }
        match self
            .engine
            .check_card_eligibility(
                sealed,
                &self.config.device.serial,
                &self.config.locale,
                input_method,
            )
            .await
        {
            Ok(prompt) => {
                {
                    let mut session = self.lock();
                    if session.generation != generation {
                        debug!("stale eligibility result, discarding");
                        return;
                    }
                    session.consent = Some(prompt);
                    session.phase = EnrollmentPhase::AwaitingConsent;
                }
                self.publish(EnrollmentPhase::AwaitingConsent, None);
            }
            Err(err) => self.fail(generation, err.to_string()),
        }
    }

    /// The consent text to display, available only while consent is
    /// awaited. Out-of-phase reads are logged no-ops.
    pub fn consent_text(&self) -> Option<String> {
        let session = self.lock();
        if session.phase != EnrollmentPhase::AwaitingConsent {
            debug!(phase = ?session.phase, "consent text requested outside AwaitingConsent");
            return None;
        }
        session.consent.as_ref().map(|c| c.terms_text.clone())
    }

    /// Exchange the user's consent for a digitization session. Out-of-phase
    /// calls are logged no-ops; state is authoritative, not caller intent.
    pub fn accept_consent(self: &Arc<Self>) {
        let (generation, consent_id) = {
            let mut session = self.lock();
            if session.phase != EnrollmentPhase::AwaitingConsent {
                warn!(phase = ?session.phase, "accept_consent outside AwaitingConsent is a no-op");
                return;
            }
            let Some(consent) = session.consent.take() else {
                warn!("no consent prompt held, ignoring accept");
                return;
            };
            // Only the session id travels forward; the consent text
            // reference is discarded here.
            session.phase = EnrollmentPhase::Digitization;
            (session.generation, consent.session_id)
        };
        self.publish(EnrollmentPhase::Digitization, None);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive_digitization(generation, consent_id).await;
        });
    }

    /// Decline ends the session silently; the engine is not contacted.
    pub fn decline_consent(&self) {
        {
            let mut session = self.lock();
            if session.phase != EnrollmentPhase::AwaitingConsent {
                warn!(phase = ?session.phase, "decline_consent outside AwaitingConsent is a no-op");
                return;
            }
            session.generation += 1;
            session.wipe();
            session.phase = EnrollmentPhase::Inactive;
        }
        info!("consent declined, enrollment reset");
        self.publish(EnrollmentPhase::Inactive, None);
    }

    async fn drive_digitization(&self, generation: u64, consent_id: ConsentSessionId) {
        let token = match self.engine.accept_consent(&consent_id).await {
            Ok(token) => token,
            Err(err) => return self.fail(generation, err.to_string()),
        };
        let outcome = match self.engine.digitize_card(&token).await {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(generation, err.to_string()),
        };
        self.apply_digitize_outcome(generation, outcome).await;
    }

    async fn apply_digitize_outcome(&self, generation: u64, outcome: DigitizeOutcome) {
        match outcome {
            DigitizeOutcome::ActivationCode(code) => {
                {
                    let mut session = self.lock();
                    if session.generation != generation {
                        debug!("stale digitization result, discarding");
                        return;
                    }
                    session.secret = Some(ActivationSecret::from_zeroizing(code));
                    session.phase = EnrollmentPhase::ActivationCodeAcquired;
                }
                self.publish(EnrollmentPhase::ActivationCodeAcquired, None);
                self.drive_provisioning(generation).await;
            }
            DigitizeOutcome::IdvSelectionRequired(methods) => {
                {
                    let mut session = self.lock();
                    if session.generation != generation {
                        return;
                    }
                    session.idv_methods = methods;
                    session.phase = EnrollmentPhase::PendingActivation(
                        PendingActivationKind::IdvMethodNotSelected,
                    );
                }
                self.publish(
                    EnrollmentPhase::PendingActivation(PendingActivationKind::IdvMethodNotSelected),
                    None,
                );
            }
            DigitizeOutcome::PendingActivation(kind) => {
                if matches!(
                    kind,
                    PendingActivationKind::Web3ds | PendingActivationKind::App2App
                ) {
                    warn!(?kind, "unsupported pending-activation flow, delegating to caller");
                }
                self.transition(generation, EnrollmentPhase::PendingActivation(kind));
            }
        }
    }

    /// Branch on the device's provisioning status, issue the matching
    /// engine call, then track provisioning events to completion.
    async fn drive_provisioning(&self, generation: u64) {
        // Subscribed before the provisioning call so the secret request
        // cannot be missed.
        let mut events = self.engine.provisioning_events();

        let status = match self.engine.enrollment_status().await {
            Ok(status) => status,
            Err(err) => return self.fail(generation, err.to_string()),
        };
        let step = match status {
            EnrollmentStatus::Needed => {
                if !self.transition(generation, EnrollmentPhase::Enrolling) {
                    return;
                }
                self.engine
                    .enroll(
                        &self.config.wallet_id,
                        &self.config.push_token,
                        &self.config.locale,
                    )
                    .await
            }
            EnrollmentStatus::InProgress => {
                if !self.transition(generation, EnrollmentPhase::Continuing) {
                    return;
                }
                self.engine.continue_enrollment(&self.config.locale).await
            }
            EnrollmentStatus::Complete => {
                // Additional card: the activation code goes straight out.
                if !self.transition(generation, EnrollmentPhase::SendingActivationCode) {
                    return;
                }
                self.engine.send_activation_code().await
            }
        };
        if let Err(err) = step {
            return self.fail(generation, err.to_string());
        }

        self.await_provisioning_result(generation, &mut events).await;
    }

    async fn await_provisioning_result(
        &self,
        generation: u64,
        events: &mut broadcast::Receiver<ProvisioningEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(ProvisioningEvent::ActivationSecretRequired) => {
                    if let Err(message) = self.feed_activation_secret(generation).await {
                        return self.fail(generation, message);
                    }
                }
                Ok(ProvisioningEvent::EnrollmentCompleted) => {
                    {
                        let mut session = self.lock();
                        if session.generation == generation {
                            // Completion destroys the session's held data.
                            session.wipe();
                        }
                    }
                    self.transition(generation, EnrollmentPhase::Finished);
                    return;
                }
                Ok(ProvisioningEvent::EnrollmentError { code, message }) => {
                    return self.fail(
                        generation,
                        format!("enrollment failed: code={code}, message={message}"),
                    );
                }
                // Server-message batching belongs to the push router.
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "provisioning event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return self.fail(generation, "provisioning event stream closed".to_string());
                }
            }
            let superseded = self.lock().generation != generation;
            if superseded {
                debug!("enrollment superseded, abandoning provisioning watch");
                return;
            }
        }
    }

    /// Feed the held secret into the engine's secure input channel one byte
    /// at a time. Post-condition: no in-memory copy of the code survives;
    /// the buffer is zeroed when dropped at the end of the feed.
    async fn feed_activation_secret(&self, generation: u64) -> Result<(), String> {
        let secret = {
            let mut session = self.lock();
            if session.generation != generation {
                return Ok(());
            }
            session.secret.take()
        };
        let Some(secret) = secret else {
            return Err("activation secret requested but none is held".to_string());
        };

        let bytes = secret.into_bytes();
        for &byte in bytes.iter() {
            if let Err(err) = self.engine.input_activation_secret(byte).await {
                return Err(err.to_string());
            }
        }
        Ok(())
    }

    /// Continue a pending activation by selecting an identity-verification
    /// method the issuer offered.
    pub fn select_idv_method(self: &Arc<Self>, method: IdvMethodId) {
        let generation = {
            let session = self.lock();
            if session.phase
                != EnrollmentPhase::PendingActivation(PendingActivationKind::IdvMethodNotSelected)
            {
                warn!(phase = ?session.phase, "select_idv_method outside IDV selection is a no-op");
                return;
            }
            if !session.idv_methods.iter().any(|m| m.id == method) {
                warn!(method = %method, "unknown identity-verification method");
                return;
            }
            session.generation
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.engine.select_idv_method(&method).await {
                Ok(outcome) => this.apply_digitize_outcome(generation, outcome).await,
                Err(err) => this.fail(generation, err.to_string()),
            }
        });
    }

    /// Submit the one-time passcode for a pending activation. An empty
    /// entry is the user backing out: the session resets silently and the
    /// engine is not contacted.
    pub fn submit_otp(self: &Arc<Self>, otp: &str) {
        let generation = {
            let mut session = self.lock();
            if session.phase
                != EnrollmentPhase::PendingActivation(PendingActivationKind::OtpNeeded)
            {
                warn!(phase = ?session.phase, "submit_otp outside OtpNeeded is a no-op");
                return;
            }
            if otp.is_empty() {
                info!("empty one-time passcode, resetting enrollment");
                session.generation += 1;
                session.wipe();
                session.phase = EnrollmentPhase::Inactive;
                drop(session);
                self.publish(EnrollmentPhase::Inactive, None);
                return;
            }
            session.secret = Some(ActivationSecret::from(otp));
            session.generation
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = this.engine.provisioning_events();
            if let Err(message) = this.feed_activation_secret(generation).await {
                return this.fail(generation, message);
            }
            this.await_provisioning_result(generation, &mut events).await;
        });
    }

    fn transition(&self, generation: u64, phase: EnrollmentPhase) -> bool {
        {
            let mut session = self.lock();
            if session.generation != generation {
                debug!(?phase, "stale enrollment transition, discarding");
                return false;
            }
            session.phase = phase;
        }
        self.publish(phase, None);
        true
    }

    /// Terminal failure: session data is wiped and the error is published
    /// on the same stream as successful transitions.
    fn fail(&self, generation: u64, message: String) {
        {
            let mut session = self.lock();
            if session.generation != generation {
                debug!("stale enrollment failure, discarding");
                return;
            }
            session.wipe();
            session.phase = EnrollmentPhase::Error;
            session.last_error = Some(message.clone());
        }
        warn!(error = %message, "enrollment failed");
        self.publish(EnrollmentPhase::Error, Some(message));
    }

    fn publish(&self, phase: EnrollmentPhase, error: Option<String>) {
        info!(?phase, "enrollment phase changed");
        let _ = self.updates_tx.send(EnrollmentUpdate { phase, error });
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use zeroize::Zeroizing;

    use tapwallet_crypto::InstrumentData;
    use tapwallet_engine_mock::{consent_prompt, MockEngine};
    use tapwallet_types::{
        DigitizeOutcome, EngineError, EnrollmentStatus, IdvMethod, IdvMethodId, InputMethod,
        PendingActivationKind, ProvisioningEvent,
    };

    use super::{EnrollmentCoordinator, EnrollmentPhase};
    use crate::bringup::SdkBringupCoordinator;
    use crate::config::OrchestrationConfig;
    use crate::engine::MockEngineHandle;

    fn coordinator(
        engine: MockEngine,
    ) -> (Arc<EnrollmentCoordinator<MockEngineHandle>>, MockEngineHandle) {
        let handle = MockEngineHandle::new(engine);
        let engine = Arc::new(handle.clone());
        let config = Arc::new(OrchestrationConfig::default());
        let bringup = Arc::new(SdkBringupCoordinator::new(
            Arc::clone(&engine),
            Arc::clone(&config),
        ));
        (
            Arc::new(EnrollmentCoordinator::new(engine, bringup, config)),
            handle,
        )
    }

    fn instrument() -> InstrumentData {
        InstrumentData::new("4532015112830366", 9, 2029, "123")
    }

    async fn wait_for_phase(
        coordinator: &Arc<EnrollmentCoordinator<MockEngineHandle>>,
        phase: EnrollmentPhase,
    ) {
        for _ in 0..200 {
            if coordinator.phase() == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "never reached {phase:?}, stuck in {:?} (error: {:?})",
            coordinator.phase(),
            coordinator.last_error()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consent_accept_reaches_digitization_and_decline_resets() {
        let mut engine = MockEngine::new();
        engine
            .eligibility_script
            .push_back(Ok(consent_prompt("T&C-v1")));
        engine
            .eligibility_script
            .push_back(Ok(consent_prompt("T&C-v1")));
        engine.digitize_script.push_back(Ok(
            DigitizeOutcome::ActivationCode(Zeroizing::new(b"982137".to_vec())),
        ));
        let (enrollment, _) = coordinator(engine);

        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::AwaitingConsent).await;
        assert_eq!(enrollment.consent_text().unwrap(), "T&C-v1");

        // Decline resets silently and forgets the consent text.
        enrollment.decline_consent();
        assert_eq!(enrollment.phase(), EnrollmentPhase::Inactive);
        assert!(enrollment.consent_text().is_none());

        // A fresh start and accept proceeds through digitization; with no
        // provisioning events scripted the flow rests at the send step.
        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::AwaitingConsent).await;
        enrollment.accept_consent();
        wait_for_phase(&enrollment, EnrollmentPhase::SendingActivationCode).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_first_card_enrollment_feeds_and_wipes_the_secret() {
        let mut engine = MockEngine::new();
        engine
            .eligibility_script
            .push_back(Ok(consent_prompt("T&C-v1")));
        engine.digitize_script.push_back(Ok(
            DigitizeOutcome::ActivationCode(Zeroizing::new(b"982137".to_vec())),
        ));
        engine.enrollment_status = EnrollmentStatus::Needed;
        let (enrollment, handle) = coordinator(engine);

        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::AwaitingConsent).await;
        enrollment.accept_consent();
        wait_for_phase(&enrollment, EnrollmentPhase::Enrolling).await;

        handle
            .engine()
            .lock()
            .unwrap()
            .emit_provisioning(ProvisioningEvent::ActivationSecretRequired);
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let engine = handle.engine();
            let engine = engine.lock().unwrap();
            assert_eq!(engine.secret_input, b"982137");
            assert_eq!(engine.enroll_calls.len(), 1);
        }
        assert!(enrollment.lock().secret.is_none());

        handle
            .engine()
            .lock()
            .unwrap()
            .emit_provisioning(ProvisioningEvent::EnrollmentCompleted);
        wait_for_phase(&enrollment, EnrollmentPhase::Finished).await;
    }

    #[tokio::test(start_paused = true)]
    async fn additional_card_sends_the_activation_code_directly() {
        let mut engine = MockEngine::new();
        engine
            .eligibility_script
            .push_back(Ok(consent_prompt("T&C-v1")));
        engine.digitize_script.push_back(Ok(
            DigitizeOutcome::ActivationCode(Zeroizing::new(b"445566".to_vec())),
        ));
        engine.enrollment_status = EnrollmentStatus::Complete;
        let (enrollment, handle) = coordinator(engine);

        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::AwaitingConsent).await;
        enrollment.accept_consent();
        wait_for_phase(&enrollment, EnrollmentPhase::SendingActivationCode).await;

        handle
            .engine()
            .lock()
            .unwrap()
            .emit_provisioning(ProvisioningEvent::EnrollmentCompleted);
        wait_for_phase(&enrollment, EnrollmentPhase::Finished).await;
        assert_eq!(handle.engine().lock().unwrap().send_code_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_again_discards_the_previous_session() {
        let mut engine = MockEngine::new();
        engine
            .eligibility_script
            .push_back(Ok(consent_prompt("first")));
        engine
            .eligibility_script
            .push_back(Ok(consent_prompt("second")));
        let (enrollment, _) = coordinator(engine);

        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::AwaitingConsent).await;
        {
            // The superseded session also held an activation secret.
            let mut session = enrollment.lock();
            session.secret = Some(tapwallet_crypto::ActivationSecret::from("111111"));
        }

        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::AwaitingConsent).await;
        assert_eq!(enrollment.consent_text().unwrap(), "second");
        assert!(enrollment.lock().secret.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn eligibility_failure_ends_the_session_with_an_error() {
        let mut engine = MockEngine::new();
        engine.eligibility_script.push_back(Err(EngineError::Rejected {
            code: 61,
            message: "card not eligible".to_string(),
        }));
        let (enrollment, _) = coordinator(engine);

        let mut updates = enrollment.subscribe();
        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::Error).await;
        assert!(enrollment.last_error().unwrap().contains("card not eligible"));

        let mut saw_error_update = false;
        while let Ok(update) = updates.try_recv() {
            if update.phase == EnrollmentPhase::Error {
                assert!(update.error.unwrap().contains("card not eligible"));
                saw_error_update = true;
            }
        }
        assert!(saw_error_update);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_phase_consent_calls_are_no_ops() {
        let (enrollment, handle) = coordinator(MockEngine::new());

        assert!(enrollment.consent_text().is_none());
        enrollment.accept_consent();
        enrollment.decline_consent();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(enrollment.phase(), EnrollmentPhase::Inactive);
        assert!(handle.engine().lock().unwrap().consent_accepts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idv_selection_then_otp_completes_the_pending_activation() {
        let mut engine = MockEngine::new();
        engine
            .eligibility_script
            .push_back(Ok(consent_prompt("T&C-v1")));
        engine
            .digitize_script
            .push_back(Ok(DigitizeOutcome::IdvSelectionRequired(vec![IdvMethod {
                id: IdvMethodId::new("sms-otp"),
                display_name: "Text message".to_string(),
            }])));
        engine
            .idv_select_script
            .push_back(Ok(DigitizeOutcome::PendingActivation(
                PendingActivationKind::OtpNeeded,
            )));
        let (enrollment, handle) = coordinator(engine);

        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::AwaitingConsent).await;
        enrollment.accept_consent();
        wait_for_phase(
            &enrollment,
            EnrollmentPhase::PendingActivation(PendingActivationKind::IdvMethodNotSelected),
        )
        .await;

        enrollment.select_idv_method(IdvMethodId::new("sms-otp"));
        wait_for_phase(
            &enrollment,
            EnrollmentPhase::PendingActivation(PendingActivationKind::OtpNeeded),
        )
        .await;

        enrollment.submit_otp("246810");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.engine().lock().unwrap().secret_input, b"246810");

        handle
            .engine()
            .lock()
            .unwrap()
            .emit_provisioning(ProvisioningEvent::EnrollmentCompleted);
        wait_for_phase(&enrollment, EnrollmentPhase::Finished).await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_otp_resets_without_contacting_the_engine() {
        let mut engine = MockEngine::new();
        engine
            .eligibility_script
            .push_back(Ok(consent_prompt("T&C-v1")));
        engine
            .digitize_script
            .push_back(Ok(DigitizeOutcome::PendingActivation(
                PendingActivationKind::OtpNeeded,
            )));
        let (enrollment, handle) = coordinator(engine);

        enrollment.start(instrument(), InputMethod::Keyed);
        wait_for_phase(&enrollment, EnrollmentPhase::AwaitingConsent).await;
        enrollment.accept_consent();
        wait_for_phase(
            &enrollment,
            EnrollmentPhase::PendingActivation(PendingActivationKind::OtpNeeded),
        )
        .await;

        enrollment.submit_otp("");
        assert_eq!(enrollment.phase(), EnrollmentPhase::Inactive);
        assert!(handle.engine().lock().unwrap().secret_input.is_empty());
    }
}
