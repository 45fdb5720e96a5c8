//! Feature exchange resolution
//!
//! Turns a Pairing Request / Pairing Response pair into the fixed set
//! of features the rest of the pairing runs with: association method,
//! negotiated key size and agreed key distribution.

use super::constants::*;
use super::pdu::PairingParams;
use super::types::*;

/// Which part a device plays in Passkey Entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasskeySide {
    /// Generate a passkey and show it to the user
    Display,
    /// Ask the user for the passkey shown on the peer
    Input,
}

/// Build the Pairing Response parameters for a received request: local
/// preferences with the key distribution narrowed to what the
/// initiator offered.
pub fn build_pairing_response(prefs: &PairingPreferences, request: &PairingParams) -> PairingParams {
    let mut params = PairingParams::from_preferences(prefs);
    params.initiator_key_dist &= request.initiator_key_dist;
    params.responder_key_dist &= request.responder_key_dist;
    params
}

/// Resolve the exchanged parameters into pairing features. `role` is
/// the local role. Fails with `AuthenticationRequirements` when MITM
/// protection is required but the capabilities cannot provide it.
pub fn resolve_features(
    role: PairingRole,
    preq: &PairingParams,
    pres: &PairingParams,
) -> SmResult<PairingFeatures> {
    let initiator_io =
        IoCapability::from_u8(preq.io_capability).ok_or(SmError::InvalidParameters)?;
    let responder_io =
        IoCapability::from_u8(pres.io_capability).ok_or(SmError::InvalidParameters)?;
    let initiator_auth = AuthRequirements::from_u8(preq.auth_req);
    let responder_auth = AuthRequirements::from_u8(pres.auth_req);

    let secure_connections =
        initiator_auth.secure_connections && responder_auth.secure_connections;
    let mitm_required = initiator_auth.mitm || responder_auth.mitm;
    let oob = if secure_connections {
        preq.oob_data_present != 0 || pres.oob_data_present != 0
    } else {
        preq.oob_data_present != 0 && pres.oob_data_present != 0
    };

    let method = if oob {
        PairingMethod::OutOfBand
    } else if !mitm_required {
        PairingMethod::JustWorks
    } else {
        method_from_io(initiator_io, responder_io, secure_connections)
    };
    if mitm_required && !method.is_authenticated() {
        return Err(SmError::AuthenticationRequirements);
    }

    let encryption_key_size = preq.max_key_size.min(pres.max_key_size);
    if encryption_key_size < SMP_MIN_ENCRYPTION_KEY_SIZE {
        return Err(SmError::EncryptionKeySize);
    }

    Ok(PairingFeatures {
        role,
        method,
        secure_connections,
        mitm: method.is_authenticated(),
        encryption_key_size,
        // The response carries the agreed key distribution; the
        // responder already narrowed it to what the request offered.
        initiator_key_dist: KeyDistribution::from_u8(pres.initiator_key_dist),
        responder_key_dist: KeyDistribution::from_u8(pres.responder_key_dist),
    })
}

/// IO capability mapping when MITM protection is requested, Vol 3
/// Part H Table 2.8. Numeric Comparison only exists when both sides
/// are Secure Connections capable Display Yes/No; that combination
/// falls back to Just Works for legacy pairing.
fn method_from_io(
    initiator: IoCapability,
    responder: IoCapability,
    secure_connections: bool,
) -> PairingMethod {
    use IoCapability::*;

    if initiator == NoInputNoOutput || responder == NoInputNoOutput {
        return PairingMethod::JustWorks;
    }
    match (initiator, responder) {
        (DisplayOnly, DisplayOnly) | (DisplayOnly, DisplayYesNo) | (DisplayYesNo, DisplayOnly) => {
            PairingMethod::JustWorks
        }
        (DisplayYesNo, DisplayYesNo) => {
            if secure_connections {
                PairingMethod::NumericComparison
            } else {
                PairingMethod::JustWorks
            }
        }
        _ => PairingMethod::PasskeyEntry,
    }
}

/// The part this device plays when the method is Passkey Entry.
pub fn passkey_side(
    role: PairingRole,
    local_io: IoCapability,
    peer_io: IoCapability,
) -> PasskeySide {
    if local_io == IoCapability::KeyboardDisplay && peer_io == IoCapability::KeyboardDisplay {
        // Both could do either; the initiator displays.
        return match role {
            PairingRole::Initiator => PasskeySide::Display,
            PairingRole::Responder => PasskeySide::Input,
        };
    }
    if local_io.can_display() && peer_io.can_input() && !peer_io.can_display() {
        PasskeySide::Display
    } else if local_io.can_input() {
        PasskeySide::Input
    } else {
        PasskeySide::Display
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(io: IoCapability, auth: AuthRequirements, max_key_size: u8) -> PairingParams {
        PairingParams {
            io_capability: io.to_u8(),
            oob_data_present: 0,
            auth_req: auth.to_u8(),
            max_key_size,
            initiator_key_dist: SMP_KEY_DIST_ENC_KEY | SMP_KEY_DIST_ID_KEY,
            responder_key_dist: SMP_KEY_DIST_ENC_KEY | SMP_KEY_DIST_ID_KEY | SMP_KEY_DIST_SIGN_KEY,
        }
    }

    fn no_mitm() -> AuthRequirements {
        AuthRequirements::new(true, false, false)
    }

    fn mitm() -> AuthRequirements {
        AuthRequirements::new(true, true, false)
    }

    #[test]
    fn test_just_works_without_mitm() {
        // Capable IO on both ends still selects Just Works when
        // neither side asks for MITM protection.
        let preq = params(IoCapability::KeyboardDisplay, no_mitm(), 16);
        let pres = params(IoCapability::KeyboardDisplay, no_mitm(), 16);
        let features = resolve_features(PairingRole::Initiator, &preq, &pres).unwrap();
        assert_eq!(features.method, PairingMethod::JustWorks);
        assert!(!features.mitm);
    }

    #[test]
    fn test_mitm_with_no_io_fails() {
        let preq = params(IoCapability::NoInputNoOutput, mitm(), 16);
        let pres = params(IoCapability::KeyboardDisplay, mitm(), 16);
        assert_eq!(
            resolve_features(PairingRole::Initiator, &preq, &pres),
            Err(SmError::AuthenticationRequirements)
        );
    }

    #[test]
    fn test_passkey_entry_selection() {
        let preq = params(IoCapability::DisplayOnly, mitm(), 16);
        let pres = params(IoCapability::KeyboardOnly, mitm(), 16);
        let features = resolve_features(PairingRole::Responder, &preq, &pres).unwrap();
        assert_eq!(features.method, PairingMethod::PasskeyEntry);
        assert!(features.mitm);
    }

    #[test]
    fn test_numeric_comparison_needs_secure_connections() {
        let sc_mitm = AuthRequirements::new(true, true, true);
        let preq = params(IoCapability::DisplayYesNo, sc_mitm, 16);
        let pres = params(IoCapability::DisplayYesNo, sc_mitm, 16);
        let features = resolve_features(PairingRole::Initiator, &preq, &pres).unwrap();
        assert_eq!(features.method, PairingMethod::NumericComparison);
        assert!(features.secure_connections);

        // The same capabilities with legacy pairing degrade to Just
        // Works, which cannot satisfy the MITM requirement.
        let preq = params(IoCapability::DisplayYesNo, mitm(), 16);
        let pres = params(IoCapability::DisplayYesNo, mitm(), 16);
        assert_eq!(
            resolve_features(PairingRole::Initiator, &preq, &pres),
            Err(SmError::AuthenticationRequirements)
        );
    }

    #[test]
    fn test_numeric_comparison_needs_display_yes_no_on_both() {
        // A keyboard-display device could compare numbers, but only
        // the Display Yes/No pairing selects Numeric Comparison; the
        // rest use Passkey Entry even with Secure Connections.
        let sc_mitm = AuthRequirements::new(true, true, true);
        for (initiator_io, responder_io) in [
            (IoCapability::DisplayYesNo, IoCapability::KeyboardDisplay),
            (IoCapability::KeyboardDisplay, IoCapability::DisplayYesNo),
            (IoCapability::KeyboardDisplay, IoCapability::KeyboardDisplay),
        ] {
            let preq = params(initiator_io, sc_mitm, 16);
            let pres = params(responder_io, sc_mitm, 16);
            let features = resolve_features(PairingRole::Initiator, &preq, &pres).unwrap();
            assert_eq!(features.method, PairingMethod::PasskeyEntry);
        }
    }

    #[test]
    fn test_oob_selection_legacy_needs_both() {
        let mut preq = params(IoCapability::NoInputNoOutput, mitm(), 16);
        let mut pres = params(IoCapability::NoInputNoOutput, mitm(), 16);
        preq.oob_data_present = 1;
        // Only one side has OOB data: not usable for legacy pairing,
        // and Just Works cannot satisfy MITM.
        assert_eq!(
            resolve_features(PairingRole::Initiator, &preq, &pres),
            Err(SmError::AuthenticationRequirements)
        );
        pres.oob_data_present = 1;
        let features = resolve_features(PairingRole::Initiator, &preq, &pres).unwrap();
        assert_eq!(features.method, PairingMethod::OutOfBand);
        assert!(features.mitm);
    }

    #[test]
    fn test_key_size_negotiation() {
        let preq = params(IoCapability::NoInputNoOutput, no_mitm(), 16);
        let pres = params(IoCapability::NoInputNoOutput, no_mitm(), 7);
        let features = resolve_features(PairingRole::Initiator, &preq, &pres).unwrap();
        assert_eq!(features.encryption_key_size, 7);
    }

    #[test]
    fn test_key_distribution_read_from_response() {
        // The response alone states the agreed key distribution, even
        // where the request offered more.
        let mut preq = params(IoCapability::NoInputNoOutput, no_mitm(), 16);
        preq.initiator_key_dist = SMP_KEY_DIST_ENC_KEY | SMP_KEY_DIST_ID_KEY;
        preq.responder_key_dist = SMP_KEY_DIST_ENC_KEY;
        let mut pres = params(IoCapability::NoInputNoOutput, no_mitm(), 16);
        pres.initiator_key_dist = SMP_KEY_DIST_ENC_KEY;
        pres.responder_key_dist = SMP_KEY_DIST_ENC_KEY | SMP_KEY_DIST_SIGN_KEY;
        let features = resolve_features(PairingRole::Initiator, &preq, &pres).unwrap();
        assert!(features.initiator_key_dist.encryption_key);
        assert!(!features.initiator_key_dist.identity_key);
        assert!(features.responder_key_dist.encryption_key);
        assert!(features.responder_key_dist.signing_key);
        assert!(!features.responder_key_dist.identity_key);
    }

    #[test]
    fn test_resolution_is_role_symmetric() {
        // Both ends resolve the same exchanged parameters; the result
        // must agree on everything but the local role marker.
        let preq = params(IoCapability::DisplayOnly, mitm(), 16);
        let mut pres = params(IoCapability::KeyboardOnly, mitm(), 10);
        pres.responder_key_dist = SMP_KEY_DIST_ENC_KEY;
        let as_initiator = resolve_features(PairingRole::Initiator, &preq, &pres).unwrap();
        let as_responder = resolve_features(PairingRole::Responder, &preq, &pres).unwrap();
        assert_eq!(as_initiator.role, PairingRole::Initiator);
        assert_eq!(as_responder.role, PairingRole::Responder);
        assert_eq!(as_initiator.method, as_responder.method);
        assert_eq!(as_initiator.mitm, as_responder.mitm);
        assert_eq!(
            as_initiator.encryption_key_size,
            as_responder.encryption_key_size
        );
        assert_eq!(
            as_initiator.initiator_key_dist,
            as_responder.initiator_key_dist
        );
        assert_eq!(
            as_initiator.responder_key_dist,
            as_responder.responder_key_dist
        );
    }

    #[test]
    fn test_response_narrows_key_distribution() {
        let prefs = PairingPreferences::default();
        let mut request = PairingParams::from_preferences(&prefs);
        request.initiator_key_dist = SMP_KEY_DIST_ENC_KEY;
        let response = build_pairing_response(&prefs, &request);
        assert_eq!(response.initiator_key_dist, SMP_KEY_DIST_ENC_KEY);
    }

    #[test]
    fn test_passkey_side_assignment() {
        use IoCapability::*;
        use PairingRole::*;

        assert_eq!(passkey_side(Initiator, DisplayOnly, KeyboardOnly), PasskeySide::Display);
        assert_eq!(passkey_side(Responder, KeyboardOnly, DisplayOnly), PasskeySide::Input);
        // Two keyboard-only devices both take user input.
        assert_eq!(passkey_side(Initiator, KeyboardOnly, KeyboardOnly), PasskeySide::Input);
        assert_eq!(passkey_side(Responder, KeyboardOnly, KeyboardOnly), PasskeySide::Input);
        // Two keyboard-display devices split by role.
        assert_eq!(
            passkey_side(Initiator, KeyboardDisplay, KeyboardDisplay),
            PasskeySide::Display
        );
        assert_eq!(
            passkey_side(Responder, KeyboardDisplay, KeyboardDisplay),
            PasskeySide::Input
        );
    }
}
