//! Phase two of LE legacy pairing
//!
//! Tracks the confirm and random value exchange for one pairing and
//! derives the short term key. The state machine is strict about
//! ordering: each PDU is accepted exactly once and only in the order
//! the protocol allows, anything else is an error the caller turns
//! into a Pairing Failed.

use super::crypto;
use super::types::*;

/// What to send after accepting a peer confirm value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    /// Send our confirm value (responder answering the initiator)
    SendLocalConfirm([u8; 16]),
    /// Send our random value (initiator after the responder confirm)
    SendLocalRandom([u8; 16]),
    /// Keep waiting, the temporary key is not available yet
    Wait,
}

/// The outcome of a verified peer random value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomOutcome {
    /// Short term key, already masked to the negotiated key size
    pub stk: [u8; 16],
    /// Random value to send back (responder only)
    pub send_random: Option<[u8; 16]>,
}

/// Confirm and random exchange state for one legacy pairing
pub struct LegacyPairing {
    role: PairingRole,
    encryption_key_size: u8,
    preq: [u8; 7],
    pres: [u8; 7],
    initiator_address: DeviceAddress,
    responder_address: DeviceAddress,
    tk: Option<[u8; 16]>,
    local_rand: [u8; 16],
    local_confirm: Option<[u8; 16]>,
    peer_confirm: Option<[u8; 16]>,
    peer_rand_seen: bool,
    sent_confirm: bool,
    sent_rand: bool,
}

impl LegacyPairing {
    /// Start phase two. `preq` and `pres` are the exchanged pairing
    /// PDUs in transmitted order; the addresses are those of the link.
    pub fn new(
        role: PairingRole,
        encryption_key_size: u8,
        preq: [u8; 7],
        pres: [u8; 7],
        initiator_address: DeviceAddress,
        responder_address: DeviceAddress,
    ) -> Self {
        Self {
            role,
            encryption_key_size,
            preq,
            pres,
            initiator_address,
            responder_address,
            tk: None,
            local_rand: crypto::generate_random_128(),
            local_confirm: None,
            peer_confirm: None,
            peer_rand_seen: false,
            sent_confirm: false,
            sent_rand: false,
        }
    }

    /// Supply the temporary key and compute the local confirm value.
    /// Returns the confirm value to transmit now, if it is this side's
    /// turn: immediately for the initiator, after the initiator's
    /// confirm for the responder.
    pub fn set_tk(&mut self, tk: [u8; 16]) -> SmResult<Option<[u8; 16]>> {
        if self.tk.is_some() {
            return Err(SmError::InvalidState);
        }
        self.tk = Some(tk);
        let confirm = self.compute_confirm(&tk, &self.local_rand);
        self.local_confirm = Some(confirm);
        match self.role {
            PairingRole::Initiator => {
                self.sent_confirm = true;
                Ok(Some(confirm))
            }
            PairingRole::Responder => {
                if self.peer_confirm.is_some() {
                    self.sent_confirm = true;
                    Ok(Some(confirm))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Accept the peer's confirm value.
    pub fn on_peer_confirm(&mut self, value: [u8; 16]) -> SmResult<ConfirmAction> {
        if self.peer_confirm.is_some() || self.peer_rand_seen {
            return Err(SmError::UnspecifiedReason);
        }
        match self.role {
            PairingRole::Initiator => {
                // The responder only confirms after our confirm value.
                if !self.sent_confirm {
                    return Err(SmError::UnspecifiedReason);
                }
                self.peer_confirm = Some(value);
                self.sent_rand = true;
                Ok(ConfirmAction::SendLocalRandom(self.local_rand))
            }
            PairingRole::Responder => {
                self.peer_confirm = Some(value);
                match self.local_confirm {
                    Some(confirm) => {
                        self.sent_confirm = true;
                        Ok(ConfirmAction::SendLocalConfirm(confirm))
                    }
                    None => Ok(ConfirmAction::Wait),
                }
            }
        }
    }

    /// Accept and verify the peer's random value, completing phase two
    /// when it checks out against the earlier confirm commitment.
    pub fn on_peer_random(&mut self, value: [u8; 16]) -> SmResult<RandomOutcome> {
        if self.peer_rand_seen {
            return Err(SmError::UnspecifiedReason);
        }
        let peer_confirm = match self.peer_confirm {
            Some(c) => c,
            None => return Err(SmError::UnspecifiedReason),
        };
        let tk = match self.tk {
            Some(tk) => tk,
            None => return Err(SmError::UnspecifiedReason),
        };
        let in_order = match self.role {
            PairingRole::Initiator => self.sent_confirm && self.sent_rand,
            PairingRole::Responder => self.sent_confirm,
        };
        if !in_order {
            return Err(SmError::UnspecifiedReason);
        }
        self.peer_rand_seen = true;

        let expected = self.compute_confirm(&tk, &value);
        if expected != peer_confirm {
            return Err(SmError::ConfirmValueFailed);
        }

        // STK = s1(TK, Srand, Mrand)
        let (srand, mrand) = match self.role {
            PairingRole::Initiator => (&value, &self.local_rand),
            PairingRole::Responder => (&self.local_rand, &value),
        };
        let stk = crypto::mask_key(&crypto::s1(&tk, srand, mrand), self.encryption_key_size);
        let send_random = match self.role {
            PairingRole::Initiator => None,
            PairingRole::Responder => {
                self.sent_rand = true;
                Some(self.local_rand)
            }
        };
        Ok(RandomOutcome { stk, send_random })
    }

    /// The confirm value either side commits to with `rand`.
    fn compute_confirm(&self, tk: &[u8; 16], rand: &[u8; 16]) -> [u8; 16] {
        crypto::c1(
            tk,
            rand,
            &self.preq,
            &self.pres,
            self.initiator_address.addr_type.to_u8(),
            self.responder_address.addr_type.to_u8(),
            &self.initiator_address.addr,
            &self.responder_address.addr,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREQ: [u8; 7] = [0x01, 0x03, 0x00, 0x01, 0x10, 0x03, 0x07];
    const PRES: [u8; 7] = [0x02, 0x03, 0x00, 0x01, 0x10, 0x03, 0x07];

    fn addresses() -> (DeviceAddress, DeviceAddress) {
        (
            DeviceAddress::random([0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6]),
            DeviceAddress::public([0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6]),
        )
    }

    fn pair() -> (LegacyPairing, LegacyPairing) {
        let (ia, ra) = addresses();
        (
            LegacyPairing::new(PairingRole::Initiator, 16, PREQ, PRES, ia, ra),
            LegacyPairing::new(PairingRole::Responder, 16, PREQ, PRES, ia, ra),
        )
    }

    /// Drive both sides through a complete exchange and return the two
    /// derived keys.
    fn run_exchange(
        initiator: &mut LegacyPairing,
        responder: &mut LegacyPairing,
        tk: [u8; 16],
    ) -> ([u8; 16], [u8; 16]) {
        let mconfirm = initiator.set_tk(tk).unwrap().unwrap();
        assert!(responder.set_tk(tk).unwrap().is_none());

        let sconfirm = match responder.on_peer_confirm(mconfirm).unwrap() {
            ConfirmAction::SendLocalConfirm(c) => c,
            other => panic!("unexpected action {:?}", other),
        };
        let mrand = match initiator.on_peer_confirm(sconfirm).unwrap() {
            ConfirmAction::SendLocalRandom(r) => r,
            other => panic!("unexpected action {:?}", other),
        };
        let responder_outcome = responder.on_peer_random(mrand).unwrap();
        let srand = responder_outcome.send_random.unwrap();
        let initiator_outcome = initiator.on_peer_random(srand).unwrap();
        assert!(initiator_outcome.send_random.is_none());
        (initiator_outcome.stk, responder_outcome.stk)
    }

    #[test]
    fn test_full_exchange_agrees_on_stk() {
        let (mut initiator, mut responder) = pair();
        let (initiator_stk, responder_stk) =
            run_exchange(&mut initiator, &mut responder, [0u8; 16]);
        assert_eq!(initiator_stk, responder_stk);
    }

    #[test]
    fn test_stk_is_masked_to_key_size() {
        let (ia, ra) = addresses();
        let mut initiator = LegacyPairing::new(PairingRole::Initiator, 7, PREQ, PRES, ia, ra);
        let mut responder = LegacyPairing::new(PairingRole::Responder, 7, PREQ, PRES, ia, ra);
        let (initiator_stk, responder_stk) =
            run_exchange(&mut initiator, &mut responder, [0x5a; 16]);
        assert_eq!(initiator_stk, responder_stk);
        assert_eq!(&initiator_stk[0..9], &[0u8; 9]);
    }

    #[test]
    fn test_responder_waits_for_tk() {
        let (mut initiator, mut responder) = pair();
        let mconfirm = initiator.set_tk([0u8; 16]).unwrap().unwrap();

        // Confirm arrives before the user supplied the passkey.
        assert_eq!(
            responder.on_peer_confirm(mconfirm).unwrap(),
            ConfirmAction::Wait
        );
        // Supplying the key later releases our confirm value.
        assert!(responder.set_tk([0u8; 16]).unwrap().is_some());
    }

    #[test]
    fn test_wrong_tk_fails_confirm_check() {
        let (mut initiator, mut responder) = pair();
        let mconfirm = initiator.set_tk([1u8; 16]).unwrap().unwrap();
        assert!(responder.set_tk([2u8; 16]).unwrap().is_none());

        let sconfirm = match responder.on_peer_confirm(mconfirm).unwrap() {
            ConfirmAction::SendLocalConfirm(c) => c,
            other => panic!("unexpected action {:?}", other),
        };
        let mrand = match initiator.on_peer_confirm(sconfirm).unwrap() {
            ConfirmAction::SendLocalRandom(r) => r,
            other => panic!("unexpected action {:?}", other),
        };
        assert_eq!(
            responder.on_peer_random(mrand),
            Err(SmError::ConfirmValueFailed)
        );
    }

    #[test]
    fn test_random_before_confirm_is_rejected() {
        let (_, mut responder) = pair();
        responder.set_tk([0u8; 16]).unwrap();
        assert_eq!(
            responder.on_peer_random([0x11; 16]),
            Err(SmError::UnspecifiedReason)
        );

        let (mut initiator, _) = pair();
        initiator.set_tk([0u8; 16]).unwrap();
        assert_eq!(
            initiator.on_peer_random([0x11; 16]),
            Err(SmError::UnspecifiedReason)
        );
    }

    #[test]
    fn test_duplicate_confirm_is_rejected() {
        let (mut initiator, mut responder) = pair();
        let mconfirm = initiator.set_tk([0u8; 16]).unwrap().unwrap();
        responder.set_tk([0u8; 16]).unwrap();
        responder.on_peer_confirm(mconfirm).unwrap();
        assert_eq!(
            responder.on_peer_confirm(mconfirm),
            Err(SmError::UnspecifiedReason)
        );
    }

    #[test]
    fn test_confirm_before_initiator_sends_is_rejected() {
        let (mut initiator, _) = pair();
        // No TK yet, so we have not sent our confirm value; a peer
        // confirm at this point is out of order.
        assert_eq!(
            initiator.on_peer_confirm([0x22; 16]),
            Err(SmError::UnspecifiedReason)
        );
    }

    #[test]
    fn test_tk_is_single_use() {
        let (mut initiator, _) = pair();
        initiator.set_tk([0u8; 16]).unwrap();
        assert_eq!(initiator.set_tk([0u8; 16]), Err(SmError::InvalidState));
    }
}
