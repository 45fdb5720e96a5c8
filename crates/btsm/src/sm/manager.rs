//! Security Manager orchestration
//!
//! Drives pairing over one SMP bearer: feature exchange as the
//! initiating request/response transaction, phase two as command PDUs,
//! and a queue of security requests resolved when the attempt
//! concludes. Pairing state is shared between the manager surface and
//! the bearer handlers through `Rc<RefCell<..>>`; handlers collect
//! actions under the borrow and execute them against the bearer after
//! releasing it.

use super::constants::*;
use super::crypto;
use super::features::{build_pairing_response, passkey_side, resolve_features, PasskeySide};
use super::pdu::*;
use super::phase2::{ConfirmAction, LegacyPairing};
use super::types::*;
use crate::bearer::{
    Bearer, BearerConfig, BearerError, ErrorDetails, MethodType, ProtocolTable, ShutdownReason,
    TransactionId,
};
use crate::channel::Channel;
use log::{debug, info, warn};
use std::cell::RefCell;
use std::mem;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn sm_classify(opcode: u8) -> MethodType {
    match opcode {
        SMP_PAIRING_REQUEST => MethodType::Request,
        SMP_PAIRING_RESPONSE => MethodType::Response,
        SMP_PAIRING_CONFIRM | SMP_PAIRING_RANDOM | SMP_PAIRING_FAILED | SMP_SECURITY_REQUEST => {
            MethodType::Command
        }
        _ => MethodType::Invalid,
    }
}

fn sm_request_for_response(opcode: u8) -> Option<u8> {
    (opcode == SMP_PAIRING_RESPONSE).then_some(SMP_PAIRING_REQUEST)
}

fn sm_response_for_request(opcode: u8) -> Option<u8> {
    (opcode == SMP_PAIRING_REQUEST).then_some(SMP_PAIRING_RESPONSE)
}

// Pairing Failed names no target opcode; a `None` target lets the
// bearer apply it to the in-flight pairing request, or hand it to the
// registered handler when nothing is outstanding.
fn sm_decode_error(pdu: &[u8]) -> Option<ErrorDetails> {
    PairingFailed::parse(pdu).ok().map(|failed| ErrorDetails {
        target: None,
        handle: 0,
        code: failed.reason,
    })
}

fn sm_encode_error(_target: u8, _handle: u16, code: u8) -> Vec<u8> {
    vec![SMP_PAIRING_FAILED, code]
}

const SM_TABLE: ProtocolTable = ProtocolTable {
    name: "smp",
    min_mtu: SMP_MIN_MTU,
    classify: sm_classify,
    request_for_response: sm_request_for_response,
    response_for_request: sm_response_for_request,
    error_opcode: Some(SMP_PAIRING_FAILED),
    decode_error: sm_decode_error,
    encode_error: Some(sm_encode_error),
    not_supported_code: SMP_REASON_COMMAND_NOT_SUPPORTED,
};

/// Security manager tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct SecurityManagerConfig {
    /// Bearer MTU for the SMP channel
    pub mtu: u16,
    /// Time allowed for the pairing response
    pub transaction_timeout: Duration,
    /// Time allowed between pairing PDUs before the attempt fails
    pub pairing_timeout: Duration,
}

impl Default for SecurityManagerConfig {
    fn default() -> Self {
        Self {
            mtu: SMP_MIN_MTU,
            transaction_timeout: Duration::from_millis(SMP_TIMEOUT_TRANSACTION),
            pairing_timeout: Duration::from_millis(SMP_TIMEOUT_GENERAL),
        }
    }
}

/// One queued `update_security` call
struct PendingSecurityRequest {
    target: SecurityLevel,
    callback: SecurityResultCallback,
}

enum PairingPhase {
    Idle,
    /// Initiator waiting for the pairing response
    FeatureExchange,
    /// Confirm/random exchange in progress
    Phase2 {
        features: PairingFeatures,
        legacy: LegacyPairing,
        awaiting_passkey: bool,
    },
}

/// Deferred bearer work produced while the pairing state is borrowed
enum Action {
    Send(Vec<u8>),
    Reply { id: TransactionId, pdu: Vec<u8> },
    ReplyError { id: TransactionId, code: u8 },
    Resolve(Vec<(SecurityResultCallback, SmResult<()>)>),
}

struct PairingCore {
    role: PairingRole,
    prefs: PairingPreferences,
    local_address: DeviceAddress,
    peer_address: DeviceAddress,
    pairing_timeout: Duration,
    phase: PairingPhase,
    // Request parameters sent, kept until the response resolves them
    sent_request: Option<PairingParams>,
    security_level: SecurityLevel,
    requests: Vec<PendingSecurityRequest>,
    event_callback: Option<EventCallback>,
    pending_events: Vec<SmEvent>,
    pairing_deadline: Option<Instant>,
}

impl PairingCore {
    fn is_pairing(&self) -> bool {
        !matches!(self.phase, PairingPhase::Idle)
    }

    fn arm_deadline(&mut self) {
        self.pairing_deadline = Some(Instant::now() + self.pairing_timeout);
    }

    /// Start the feature exchange as initiator and return the request
    /// PDU to put on the wire.
    fn begin_pairing(&mut self) -> Vec<u8> {
        let params = PairingParams::from_preferences(&self.prefs);
        self.sent_request = Some(params);
        self.phase = PairingPhase::FeatureExchange;
        self.arm_deadline();
        info!("smp: starting pairing with {}", self.peer_address);
        params.serialize(SMP_PAIRING_REQUEST)
    }

    /// Conclude the current attempt, resolving every queued security
    /// request in order. Idempotent once idle.
    fn conclude(&mut self, result: SmResult<()>) -> Vec<Action> {
        if !self.is_pairing() && self.requests.is_empty() {
            return Vec::new();
        }
        let features = match &self.phase {
            PairingPhase::Phase2 { features, .. } => Some(*features),
            _ => None,
        };
        self.phase = PairingPhase::Idle;
        self.sent_request = None;
        self.pairing_deadline = None;

        match result {
            Ok(()) => {
                if let Some(features) = features {
                    self.pending_events.push(SmEvent::PairingComplete(features));
                }
            }
            Err(e) => {
                info!("smp: pairing with {} failed: {}", self.peer_address, e);
                self.pending_events.push(SmEvent::PairingFailed(e));
            }
        }

        let level = self.security_level;
        let resolved = mem::take(&mut self.requests)
            .into_iter()
            .map(|request| {
                let outcome = match result {
                    Ok(()) if level >= request.target => Ok(()),
                    Ok(()) => Err(SmError::AuthenticationRequirements),
                    Err(e) => Err(e),
                };
                (request.callback, outcome)
            })
            .collect();
        vec![Action::Resolve(resolved)]
    }

    /// Send Pairing Failed and conclude.
    fn abort(&mut self, error: SmError) -> Vec<Action> {
        let mut actions = vec![Action::Send(PairingFailed::new(error).serialize())];
        actions.extend(self.conclude(Err(error)));
        actions
    }

    /// Enter phase two after a resolved feature exchange. `preq` and
    /// `pres` are the exchanged PDUs in transmitted order and `peer_io`
    /// the peer's capability, for the passkey side decision.
    fn start_phase2(
        &mut self,
        features: PairingFeatures,
        preq: [u8; 7],
        pres: [u8; 7],
        peer_io: IoCapability,
    ) -> SmResult<Vec<Action>> {
        if features.secure_connections {
            // Both sides offered Secure Connections but this engine
            // only runs the legacy confirm/random exchange.
            return Err(SmError::PairingNotSupported);
        }
        let (initiator_address, responder_address) = match features.role {
            PairingRole::Initiator => (self.local_address, self.peer_address),
            PairingRole::Responder => (self.peer_address, self.local_address),
        };
        let mut legacy = LegacyPairing::new(
            features.role,
            features.encryption_key_size,
            preq,
            pres,
            initiator_address,
            responder_address,
        );

        let mut actions = Vec::new();
        let mut awaiting_passkey = false;
        match features.method {
            PairingMethod::JustWorks => {
                if let Some(confirm) = legacy.set_tk([0u8; 16])? {
                    actions.push(Action::Send(PairingConfirm::new(confirm).serialize()));
                }
            }
            PairingMethod::OutOfBand => {
                let tk = self.prefs.oob_data.ok_or(SmError::OobNotAvailable)?;
                if let Some(confirm) = legacy.set_tk(tk)? {
                    actions.push(Action::Send(PairingConfirm::new(confirm).serialize()));
                }
            }
            PairingMethod::PasskeyEntry => {
                match passkey_side(features.role, self.prefs.io_capability, peer_io) {
                    PasskeySide::Display => {
                        let passkey = crypto::generate_passkey();
                        self.pending_events.push(SmEvent::DisplayPasskey(passkey));
                        if let Some(confirm) = legacy.set_tk(crypto::passkey_to_tk(passkey))? {
                            actions.push(Action::Send(PairingConfirm::new(confirm).serialize()));
                        }
                    }
                    PasskeySide::Input => {
                        awaiting_passkey = true;
                        self.pending_events.push(SmEvent::PasskeyRequest);
                    }
                }
            }
            // Numeric comparison implies Secure Connections, already
            // rejected above.
            PairingMethod::NumericComparison => return Err(SmError::PairingNotSupported),
        }

        debug!(
            "smp: feature exchange complete, method {}, key size {}",
            features.method, features.encryption_key_size
        );
        self.pending_events
            .push(SmEvent::FeatureExchangeComplete(features));
        self.phase = PairingPhase::Phase2 {
            features,
            legacy,
            awaiting_passkey,
        };
        self.arm_deadline();
        Ok(actions)
    }

    /// Initiator: the pairing response completed our request.
    fn handle_pairing_response(&mut self, pdu: &[u8]) -> Vec<Action> {
        if !matches!(self.phase, PairingPhase::FeatureExchange) {
            return self.abort(SmError::UnspecifiedReason);
        }
        let request = match self.sent_request.take() {
            Some(request) => request,
            None => return self.abort(SmError::UnspecifiedReason),
        };
        let response = match PairingParams::parse(pdu) {
            Ok(response) => response,
            Err(e) => return self.abort(e),
        };
        let features = match resolve_features(PairingRole::Initiator, &request, &response) {
            Ok(features) => features,
            Err(e) => return self.abort(e),
        };
        let peer_io = match IoCapability::from_u8(response.io_capability) {
            Some(io) => io,
            None => return self.abort(SmError::InvalidParameters),
        };
        match self.start_phase2(
            features,
            request.to_bytes(SMP_PAIRING_REQUEST),
            response.to_bytes(SMP_PAIRING_RESPONSE),
            peer_io,
        ) {
            Ok(actions) => actions,
            Err(e) => self.abort(e),
        }
    }

    /// Initiator: the pairing request transaction failed.
    fn handle_request_error(&mut self, error: BearerError) -> Vec<Action> {
        let mapped = match error {
            BearerError::TimedOut => SmError::Timeout,
            BearerError::Closed => SmError::LinkDisconnected,
            BearerError::Peer { code, .. } => SmError::from_reason(code),
        };
        self.conclude(Err(mapped))
    }

    /// Responder: a peer pairing request arrived.
    fn handle_pairing_request(&mut self, id: TransactionId, pdu: &[u8]) -> Vec<Action> {
        if self.role == PairingRole::Initiator {
            return vec![Action::ReplyError {
                id,
                code: SMP_REASON_PAIRING_NOT_SUPPORTED,
            }];
        }
        if self.is_pairing() {
            // A second request mid-pairing abandons the current
            // attempt and refuses the new one.
            warn!("smp: pairing request while pairing already in progress");
            let mut actions = self.conclude(Err(SmError::UnspecifiedReason));
            actions.push(Action::ReplyError {
                id,
                code: SMP_REASON_UNSPECIFIED_REASON,
            });
            return actions;
        }
        let request = match PairingParams::parse(pdu) {
            Ok(request) => request,
            Err(e) => {
                return vec![Action::ReplyError {
                    id,
                    code: e.reason_code(),
                }]
            }
        };
        let response = build_pairing_response(&self.prefs, &request);
        let features = match resolve_features(PairingRole::Responder, &request, &response) {
            Ok(features) => features,
            Err(e) => {
                return vec![Action::ReplyError {
                    id,
                    code: e.reason_code(),
                }]
            }
        };
        let peer_io = match IoCapability::from_u8(request.io_capability) {
            Some(io) => io,
            None => {
                return vec![Action::ReplyError {
                    id,
                    code: SMP_REASON_INVALID_PARAMETERS,
                }]
            }
        };
        match self.start_phase2(
            features,
            request.to_bytes(SMP_PAIRING_REQUEST),
            response.to_bytes(SMP_PAIRING_RESPONSE),
            peer_io,
        ) {
            Ok(actions) => {
                let mut all = vec![Action::Reply {
                    id,
                    pdu: response.serialize(SMP_PAIRING_RESPONSE),
                }];
                all.extend(actions);
                all
            }
            Err(e) => vec![Action::ReplyError {
                id,
                code: e.reason_code(),
            }],
        }
    }

    fn handle_pairing_confirm(&mut self, pdu: &[u8]) -> Vec<Action> {
        let confirm = match PairingConfirm::parse(pdu) {
            Ok(confirm) => confirm,
            Err(e) => return self.failed_or_abort(e),
        };
        let legacy = match &mut self.phase {
            PairingPhase::Phase2 { legacy, .. } => legacy,
            _ => return self.failed_or_abort(SmError::UnspecifiedReason),
        };
        debug!("smp: peer confirm {}", hex::encode(confirm.confirm_value));
        match legacy.on_peer_confirm(confirm.confirm_value) {
            Ok(ConfirmAction::SendLocalConfirm(value)) => {
                self.arm_deadline();
                vec![Action::Send(PairingConfirm::new(value).serialize())]
            }
            Ok(ConfirmAction::SendLocalRandom(value)) => {
                self.arm_deadline();
                vec![Action::Send(PairingRandom::new(value).serialize())]
            }
            Ok(ConfirmAction::Wait) => {
                self.arm_deadline();
                Vec::new()
            }
            Err(e) => self.abort(e),
        }
    }

    fn handle_pairing_random(&mut self, pdu: &[u8]) -> Vec<Action> {
        let random = match PairingRandom::parse(pdu) {
            Ok(random) => random,
            Err(e) => return self.failed_or_abort(e),
        };
        let (legacy, features) = match &mut self.phase {
            PairingPhase::Phase2 {
                legacy, features, ..
            } => (legacy, *features),
            _ => return self.failed_or_abort(SmError::UnspecifiedReason),
        };
        let outcome = match legacy.on_peer_random(random.random_value) {
            Ok(outcome) => outcome,
            Err(e) => return self.abort(e),
        };

        let mut actions = Vec::new();
        if let Some(value) = outcome.send_random {
            actions.push(Action::Send(PairingRandom::new(value).serialize()));
        }
        info!(
            "smp: pairing with {} complete ({})",
            self.peer_address, features.method
        );
        self.pending_events.push(SmEvent::StkReady {
            stk: outcome.stk,
            encryption_key_size: features.encryption_key_size,
        });
        self.security_level = if features.mitm {
            SecurityLevel::EncryptionWithAuthentication
        } else {
            SecurityLevel::EncryptionOnly
        };
        actions.extend(self.conclude(Ok(())));
        actions
    }

    /// Peer aborted with Pairing Failed outside a request transaction.
    fn handle_pairing_failed(&mut self, pdu: &[u8]) -> Vec<Action> {
        let reason = match PairingFailed::parse(pdu) {
            Ok(failed) => failed.to_error(),
            Err(_) => SmError::UnspecifiedReason,
        };
        if !self.is_pairing() {
            debug!("smp: ignoring pairing failed with no pairing in progress");
            return Vec::new();
        }
        self.conclude(Err(reason))
    }

    fn handle_security_request(&mut self, pdu: &[u8]) -> Vec<Action> {
        let request = match SecurityRequest::parse(pdu) {
            Ok(request) => request,
            Err(e) => return vec![Action::Send(PairingFailed::new(e).serialize())],
        };
        if self.role != PairingRole::Initiator {
            // Only the central receives security requests.
            return vec![Action::Send(
                PairingFailed::new(SmError::CommandNotSupported).serialize(),
            )];
        }
        self.pending_events.push(SmEvent::PeerSecurityRequest(
            AuthRequirements::from_u8(request.auth_req),
        ));
        Vec::new()
    }

    /// The user supplied the passkey shown on the peer.
    fn handle_passkey(&mut self, passkey: u32) -> SmResult<Vec<Action>> {
        match &mut self.phase {
            PairingPhase::Phase2 {
                legacy,
                awaiting_passkey,
                ..
            } if *awaiting_passkey => {
                *awaiting_passkey = false;
                let confirm = legacy.set_tk(crypto::passkey_to_tk(passkey))?;
                self.arm_deadline();
                Ok(match confirm {
                    Some(value) => vec![Action::Send(PairingConfirm::new(value).serialize())],
                    None => Vec::new(),
                })
            }
            _ => Err(SmError::InvalidState),
        }
    }

    /// Unexpected phase-two PDU: abort a running pairing, or just tell
    /// the peer off when there is none.
    fn failed_or_abort(&mut self, error: SmError) -> Vec<Action> {
        if self.is_pairing() {
            self.abort(error)
        } else {
            vec![Action::Send(PairingFailed::new(error).serialize())]
        }
    }
}

/// The pairing engine for one LE link.
pub struct SecurityManager<C: Channel + 'static> {
    bearer: Bearer<C>,
    core: Rc<RefCell<PairingCore>>,
}

impl<C: Channel + 'static> SecurityManager<C> {
    /// Create a manager over the given channel. `role` is the link
    /// role's pairing role: `Initiator` for the central, `Responder`
    /// for the peripheral.
    pub fn new(
        chan: C,
        role: PairingRole,
        local_address: DeviceAddress,
        peer_address: DeviceAddress,
        prefs: PairingPreferences,
    ) -> Self {
        Self::with_config(
            chan,
            role,
            local_address,
            peer_address,
            prefs,
            SecurityManagerConfig::default(),
        )
    }

    pub fn with_config(
        chan: C,
        role: PairingRole,
        local_address: DeviceAddress,
        peer_address: DeviceAddress,
        prefs: PairingPreferences,
        config: SecurityManagerConfig,
    ) -> Self {
        let bearer = Bearer::new(
            chan,
            SM_TABLE,
            BearerConfig {
                mtu: config.mtu,
                transaction_timeout: config.transaction_timeout,
            },
        );
        let core = Rc::new(RefCell::new(PairingCore {
            role,
            prefs,
            local_address,
            peer_address,
            pairing_timeout: config.pairing_timeout,
            phase: PairingPhase::Idle,
            sent_request: None,
            security_level: SecurityLevel::None,
            requests: Vec::new(),
            event_callback: None,
            pending_events: Vec::new(),
            pairing_deadline: None,
        }));
        let mut manager = Self { bearer, core };
        manager.register_handlers();
        manager
    }

    fn register_handlers(&mut self) {
        let core = self.core.clone();
        self.bearer.register_handler(
            SMP_PAIRING_REQUEST,
            Box::new(move |bearer, id, pdu| {
                let actions = core.borrow_mut().handle_pairing_request(id, pdu);
                Self::perform(&core, bearer, actions);
            }),
        );
        let core = self.core.clone();
        self.bearer.register_handler(
            SMP_PAIRING_CONFIRM,
            Box::new(move |bearer, _, pdu| {
                let actions = core.borrow_mut().handle_pairing_confirm(pdu);
                Self::perform(&core, bearer, actions);
            }),
        );
        let core = self.core.clone();
        self.bearer.register_handler(
            SMP_PAIRING_RANDOM,
            Box::new(move |bearer, _, pdu| {
                let actions = core.borrow_mut().handle_pairing_random(pdu);
                Self::perform(&core, bearer, actions);
            }),
        );
        let core = self.core.clone();
        self.bearer.register_handler(
            SMP_PAIRING_FAILED,
            Box::new(move |bearer, _, pdu| {
                let actions = core.borrow_mut().handle_pairing_failed(pdu);
                Self::perform(&core, bearer, actions);
            }),
        );
        let core = self.core.clone();
        self.bearer.register_handler(
            SMP_SECURITY_REQUEST,
            Box::new(move |bearer, _, pdu| {
                let actions = core.borrow_mut().handle_security_request(pdu);
                Self::perform(&core, bearer, actions);
            }),
        );
        // The bearer may stop underneath a pairing with no transaction
        // in flight; conclude the attempt from the closed callback.
        let core = self.core.clone();
        self.bearer.set_closed_callback(Box::new(move |reason| {
            let error = match reason {
                ShutdownReason::TimedOut => SmError::Timeout,
                _ => SmError::LinkDisconnected,
            };
            let actions = core.borrow_mut().conclude(Err(error));
            Self::resolve_only(actions);
            Self::flush_events(&core);
        }));
    }

    /// Register the event callback. Events raised before registration
    /// are dropped.
    pub fn set_event_callback(&mut self, callback: EventCallback) {
        self.core.borrow_mut().event_callback = Some(callback);
    }

    /// Entry point for inbound SMP PDUs from the channel.
    pub fn receive(&mut self, pdu: &[u8]) {
        self.bearer.receive(pdu);
        Self::flush_events(&self.core);
    }

    /// Current link security level established by pairing.
    pub fn security_level(&self) -> SecurityLevel {
        self.core.borrow().security_level
    }

    pub fn is_pairing(&self) -> bool {
        self.core.borrow().is_pairing()
    }

    /// Request the link be raised to `target`. Already-satisfied
    /// requests resolve immediately; as responder the request is
    /// refused; otherwise it queues until the pairing this call may
    /// start concludes.
    pub fn update_security(&mut self, target: SecurityLevel, callback: SecurityResultCallback) {
        enum Disposition {
            Satisfied,
            WrongRole,
            Queue,
        }
        let disposition = {
            let core = self.core.borrow();
            if core.security_level >= target {
                Disposition::Satisfied
            } else if core.role == PairingRole::Responder {
                Disposition::WrongRole
            } else {
                Disposition::Queue
            }
        };
        match disposition {
            Disposition::Satisfied => callback(Ok(())),
            Disposition::WrongRole => callback(Err(SmError::NotSupported)),
            Disposition::Queue => {
                let request_pdu = {
                    let mut core = self.core.borrow_mut();
                    core.requests.push(PendingSecurityRequest { target, callback });
                    if core.is_pairing() {
                        None
                    } else {
                        Some(core.begin_pairing())
                    }
                };
                if let Some(pdu) = request_pdu {
                    let ok_core = self.core.clone();
                    let err_core = self.core.clone();
                    let started = self.bearer.start_transaction(
                        pdu,
                        Box::new(move |bearer, rsp| {
                            let actions = ok_core.borrow_mut().handle_pairing_response(rsp);
                            Self::perform(&ok_core, bearer, actions);
                        }),
                        Box::new(move |bearer, err| {
                            let actions = err_core.borrow_mut().handle_request_error(err);
                            Self::perform(&err_core, bearer, actions);
                        }),
                    );
                    if !started {
                        let actions = self
                            .core
                            .borrow_mut()
                            .conclude(Err(SmError::LinkDisconnected));
                        Self::perform(&self.core, &mut self.bearer, actions);
                    }
                }
                Self::flush_events(&self.core);
            }
        }
    }

    /// Complete a pending `PasskeyRequest` event with the user's
    /// passkey.
    pub fn provide_passkey(&mut self, passkey: u32) -> SmResult<()> {
        if passkey > SMP_MAX_PASSKEY {
            return Err(SmError::InvalidParameters);
        }
        let actions = {
            let mut core = self.core.borrow_mut();
            core.handle_passkey(passkey)
        };
        let actions = actions?;
        Self::perform(&self.core, &mut self.bearer, actions);
        Ok(())
    }

    /// Abort a pairing in progress.
    pub fn cancel_pairing(&mut self) {
        let actions = {
            let mut core = self.core.borrow_mut();
            if !core.is_pairing() {
                return;
            }
            core.abort(SmError::UnspecifiedReason)
        };
        Self::perform(&self.core, &mut self.bearer, actions);
    }

    /// Fire expired timers. A host loop calls this periodically; an
    /// expired pairing timer fails the attempt and leaves the channel
    /// unusable, per the SMP security timer rules.
    pub fn process_timeouts(&mut self) {
        self.bearer.process_timeouts();
        let expired = {
            let core = self.core.borrow();
            core.pairing_deadline.is_some_and(|d| d <= Instant::now())
        };
        if expired {
            warn!("smp: pairing timer expired");
            let actions = self.core.borrow_mut().conclude(Err(SmError::Timeout));
            Self::perform(&self.core, &mut self.bearer, actions);
            self.bearer.shutdown_timed_out();
        }
        Self::flush_events(&self.core);
    }

    /// The owner tore the channel down (link disconnected).
    pub fn handle_channel_closed(&mut self) {
        self.bearer.shutdown();
        Self::flush_events(&self.core);
    }

    fn perform(core: &Rc<RefCell<PairingCore>>, bearer: &mut Bearer<C>, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(pdu) => {
                    bearer.send_without_response(pdu);
                }
                Action::Reply { id, pdu } => {
                    bearer.reply(id, pdu);
                }
                Action::ReplyError { id, code } => {
                    bearer.reply_with_error(id, 0, code);
                }
                Action::Resolve(resolved) => {
                    for (callback, outcome) in resolved {
                        callback(outcome);
                    }
                }
            }
        }
        Self::flush_events(core);
    }

    fn resolve_only(actions: Vec<Action>) {
        for action in actions {
            if let Action::Resolve(resolved) = action {
                for (callback, outcome) in resolved {
                    callback(outcome);
                }
            }
        }
    }

    fn flush_events(core: &Rc<RefCell<PairingCore>>) {
        loop {
            let (mut callback, events) = {
                let mut core = core.borrow_mut();
                if core.pending_events.is_empty() {
                    return;
                }
                match core.event_callback.take() {
                    Some(callback) => (callback, mem::take(&mut core.pending_events)),
                    None => {
                        core.pending_events.clear();
                        return;
                    }
                }
            };
            for event in &events {
                callback(event);
            }
            let mut core = core.borrow_mut();
            if core.event_callback.is_none() {
                core.event_callback = Some(callback);
            }
        }
    }
}
