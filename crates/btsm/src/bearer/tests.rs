//! Tests for the transactional bearer, run against a synthetic
//! protocol table so every PDU category is exercised.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::channel::Channel;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    // Synthetic protocol: two request/response pairs, an ATT-style
    // error response, one indication and fire-and-forget opcodes.
    const PING_REQ: u8 = 0x01;
    const PING_RSP: u8 = 0x02;
    const FETCH_REQ: u8 = 0x03;
    const FETCH_RSP: u8 = 0x04;
    const ERROR_RSP: u8 = 0x05;
    const EVENT_IND: u8 = 0x06;
    const EVENT_CONF: u8 = 0x07;
    const POKE_CMD: u8 = 0x08;
    const STATUS_NTF: u8 = 0x09;
    const NOT_SUPPORTED: u8 = 0x06;

    fn classify(opcode: u8) -> MethodType {
        match opcode {
            PING_REQ | FETCH_REQ => MethodType::Request,
            PING_RSP | FETCH_RSP => MethodType::Response,
            EVENT_IND => MethodType::Indication,
            EVENT_CONF => MethodType::Confirmation,
            POKE_CMD => MethodType::Command,
            STATUS_NTF => MethodType::Notification,
            _ => MethodType::Invalid,
        }
    }

    fn request_for_response(opcode: u8) -> Option<u8> {
        match opcode {
            PING_RSP => Some(PING_REQ),
            FETCH_RSP => Some(FETCH_REQ),
            EVENT_CONF => Some(EVENT_IND),
            _ => None,
        }
    }

    fn response_for_request(opcode: u8) -> Option<u8> {
        match opcode {
            PING_REQ => Some(PING_RSP),
            FETCH_REQ => Some(FETCH_RSP),
            EVENT_IND => Some(EVENT_CONF),
            _ => None,
        }
    }

    fn decode_error(pdu: &[u8]) -> Option<ErrorDetails> {
        ErrorResponse::parse(pdu).map(|e| ErrorDetails {
            target: Some(e.request_opcode),
            handle: e.attribute_handle,
            code: e.error_code,
        })
    }

    fn encode_error(target: u8, handle: u16, code: u8) -> Vec<u8> {
        ErrorResponse {
            request_opcode: target,
            attribute_handle: handle,
            error_code: code,
        }
        .serialize(ERROR_RSP)
    }

    const TABLE: ProtocolTable = ProtocolTable {
        name: "test",
        min_mtu: 5,
        classify,
        request_for_response,
        response_for_request,
        error_opcode: Some(ERROR_RSP),
        decode_error,
        encode_error: Some(encode_error),
        not_supported_code: NOT_SUPPORTED,
    };

    #[derive(Clone, Default)]
    struct ChannelLog {
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
        link_error: Rc<RefCell<bool>>,
    }

    impl ChannelLog {
        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.borrow().clone()
        }
    }

    struct MockChannel {
        log: ChannelLog,
    }

    impl Channel for MockChannel {
        fn send(&mut self, pdu: &[u8]) -> bool {
            self.log.sent.borrow_mut().push(pdu.to_vec());
            true
        }

        fn signal_link_error(&mut self) {
            *self.log.link_error.borrow_mut() = true;
        }
    }

    fn make_bearer(timeout: Duration) -> (Bearer<MockChannel>, ChannelLog) {
        let log = ChannelLog::default();
        let chan = MockChannel { log: log.clone() };
        let bearer = Bearer::new(
            chan,
            TABLE,
            BearerConfig {
                mtu: 23,
                transaction_timeout: timeout,
            },
        );
        (bearer, log)
    }

    fn long_timeout() -> Duration {
        Duration::from_secs(30)
    }

    type Completions = Rc<RefCell<Vec<Result<Vec<u8>, BearerError>>>>;

    fn start(bearer: &mut Bearer<MockChannel>, pdu: Vec<u8>, out: &Completions) -> bool {
        let ok = out.clone();
        let err = out.clone();
        bearer.start_transaction(
            pdu,
            Box::new(move |_, rsp| ok.borrow_mut().push(Ok(rsp.to_vec()))),
            Box::new(move |_, e| err.borrow_mut().push(Err(e))),
        )
    }

    #[test]
    fn test_opcode_map_involution() {
        for opcode in [PING_REQ, FETCH_REQ, EVENT_IND] {
            let rsp = response_for_request(opcode).unwrap();
            assert_eq!(request_for_response(rsp), Some(opcode));
        }
        for opcode in [PING_RSP, FETCH_RSP, EVENT_CONF] {
            let req = request_for_response(opcode).unwrap();
            assert_eq!(response_for_request(req), Some(opcode));
        }
    }

    #[test]
    fn test_transactions_complete_fifo() {
        let (mut bearer, log) = make_bearer(long_timeout());
        let out: Completions = Rc::new(RefCell::new(Vec::new()));

        assert!(start(&mut bearer, vec![PING_REQ, 1], &out));
        assert!(start(&mut bearer, vec![PING_REQ, 2], &out));
        // Indications run on their own queue, in parallel with requests.
        assert!(start(&mut bearer, vec![EVENT_IND, 3], &out));

        // Only the head of each category queue is on the wire.
        assert_eq!(log.sent(), vec![vec![PING_REQ, 1], vec![EVENT_IND, 3]]);

        bearer.receive(&[PING_RSP, 1]);
        // Completion starts the next queued request before callbacks.
        assert_eq!(log.sent().last().unwrap(), &vec![PING_REQ, 2]);

        bearer.receive(&[PING_RSP, 2]);
        bearer.receive(&[EVENT_CONF]);

        let out = out.borrow();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Ok(vec![PING_RSP, 1]));
        assert_eq!(out[1], Ok(vec![PING_RSP, 2]));
        assert_eq!(out[2], Ok(vec![EVENT_CONF]));
    }

    #[test]
    fn test_start_transaction_rejects_bad_input() {
        let (mut bearer, log) = make_bearer(long_timeout());
        let out: Completions = Rc::new(RefCell::new(Vec::new()));

        // Empty PDU
        assert!(!start(&mut bearer, vec![], &out));
        // Oversized PDU
        assert!(!start(&mut bearer, vec![0u8; 24], &out));
        // Response opcode cannot start a transaction
        assert!(!start(&mut bearer, vec![PING_RSP], &out));
        // Command opcode cannot either
        assert!(!start(&mut bearer, vec![POKE_CMD], &out));

        assert!(log.sent().is_empty());
        assert!(out.borrow().is_empty());
    }

    #[test]
    fn test_send_without_response_category_check() {
        let (mut bearer, log) = make_bearer(long_timeout());

        assert!(bearer.send_without_response(vec![POKE_CMD, 0xaa]));
        assert!(bearer.send_without_response(vec![STATUS_NTF]));
        assert!(!bearer.send_without_response(vec![PING_REQ]));
        assert!(!bearer.send_without_response(vec![EVENT_IND]));

        assert_eq!(log.sent().len(), 2);
    }

    #[test]
    fn test_one_handler_per_opcode() {
        let (mut bearer, _log) = make_bearer(long_timeout());

        let first = bearer.register_handler(PING_REQ, Box::new(|_, _, _| {}));
        assert!(first.is_valid());
        let second = bearer.register_handler(PING_REQ, Box::new(|_, _, _| {}));
        assert_eq!(second, HandlerId::INVALID);

        bearer.unregister_handler(first);
        let third = bearer.register_handler(PING_REQ, Box::new(|_, _, _| {}));
        assert!(third.is_valid());
        assert_ne!(third, first);
    }

    #[test]
    fn test_response_with_nothing_in_flight_is_fatal() {
        let (mut bearer, log) = make_bearer(long_timeout());
        let closed = Rc::new(RefCell::new(None));
        let closed_in = closed.clone();
        bearer.set_closed_callback(Box::new(move |reason| {
            *closed_in.borrow_mut() = Some(reason);
        }));

        bearer.receive(&[PING_RSP]);

        assert!(bearer.is_closed());
        assert!(*log.link_error.borrow());
        assert_eq!(*closed.borrow(), Some(ShutdownReason::ProtocolViolation));
    }

    #[test]
    fn test_mismatched_response_fails_all_pending() {
        let (mut bearer, _log) = make_bearer(long_timeout());
        let out: Completions = Rc::new(RefCell::new(Vec::new()));

        assert!(start(&mut bearer, vec![PING_REQ], &out));
        assert!(start(&mut bearer, vec![PING_REQ, 2], &out));

        // FETCH_RSP does not match the in-flight PING_REQ.
        bearer.receive(&[FETCH_RSP]);

        assert!(bearer.is_closed());
        let out = out.borrow();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r == &Err(BearerError::Closed)));
    }

    #[test]
    fn test_error_response_completes_with_peer_error() {
        let (mut bearer, _log) = make_bearer(long_timeout());
        let out: Completions = Rc::new(RefCell::new(Vec::new()));

        assert!(start(&mut bearer, vec![PING_REQ], &out));
        let err = ErrorResponse {
            request_opcode: PING_REQ,
            attribute_handle: 0x1234,
            error_code: 0x0e,
        }
        .serialize(ERROR_RSP);
        bearer.receive(&err);

        assert!(!bearer.is_closed());
        assert_eq!(
            out.borrow()[0],
            Err(BearerError::Peer {
                code: 0x0e,
                handle: 0x1234
            })
        );
    }

    #[test]
    fn test_peer_request_dispatch_and_reply() {
        let (mut bearer, log) = make_bearer(long_timeout());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in = seen.clone();
        bearer.register_handler(
            PING_REQ,
            Box::new(move |bearer, id, pdu| {
                seen_in.borrow_mut().push(pdu.to_vec());
                assert!(bearer.reply(id, vec![PING_RSP, 0x77]));
            }),
        );

        bearer.receive(&[PING_REQ, 0x11]);

        assert_eq!(*seen.borrow(), vec![vec![PING_REQ, 0x11]]);
        assert_eq!(log.sent(), vec![vec![PING_RSP, 0x77]]);

        // The slot was cleared by the reply; another request is fine.
        bearer.receive(&[PING_REQ, 0x22]);
        assert!(!bearer.is_closed());
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_concurrent_peer_requests_are_fatal() {
        let (mut bearer, _log) = make_bearer(long_timeout());
        // Handler that never replies, leaving the transaction open.
        bearer.register_handler(PING_REQ, Box::new(|_, _, _| {}));

        bearer.receive(&[PING_REQ]);
        assert!(!bearer.is_closed());
        bearer.receive(&[PING_REQ]);
        assert!(bearer.is_closed());
    }

    #[test]
    fn test_unhandled_request_gets_not_supported() {
        let (mut bearer, log) = make_bearer(long_timeout());

        bearer.receive(&[FETCH_REQ, 0x01]);

        assert!(!bearer.is_closed());
        let expected = ErrorResponse {
            request_opcode: FETCH_REQ,
            attribute_handle: 0,
            error_code: NOT_SUPPORTED,
        }
        .serialize(ERROR_RSP);
        assert_eq!(log.sent(), vec![expected]);
    }

    #[test]
    fn test_unhandled_indication_is_confirmed() {
        let (mut bearer, log) = make_bearer(long_timeout());

        bearer.receive(&[EVENT_IND, 0x42]);

        assert!(!bearer.is_closed());
        assert_eq!(log.sent(), vec![vec![EVENT_CONF]]);
    }

    #[test]
    fn test_reply_validation() {
        let (mut bearer, _log) = make_bearer(long_timeout());
        let captured = Rc::new(RefCell::new(TransactionId::INVALID));
        let captured_in = captured.clone();
        bearer.register_handler(
            EVENT_IND,
            Box::new(move |_, id, _| {
                *captured_in.borrow_mut() = id;
            }),
        );

        bearer.receive(&[EVENT_IND]);
        let id = *captured.borrow();
        assert!(id.is_valid());

        // Wrong opcode for an indication reply.
        assert!(!bearer.reply(id, vec![PING_RSP]));
        // Indications have no error-response form.
        assert!(!bearer.reply_with_error(id, 0, NOT_SUPPORTED));
        // Unknown id.
        assert!(!bearer.reply(TransactionId(999), vec![EVENT_CONF]));
        // Correct confirmation succeeds exactly once.
        assert!(bearer.reply(id, vec![EVENT_CONF]));
        assert!(!bearer.reply(id, vec![EVENT_CONF]));
    }

    #[test]
    fn test_timeout_shuts_down_bearer() {
        let (mut bearer, log) = make_bearer(Duration::ZERO);
        let out: Completions = Rc::new(RefCell::new(Vec::new()));
        let closed = Rc::new(RefCell::new(None));
        let closed_in = closed.clone();
        bearer.set_closed_callback(Box::new(move |reason| {
            *closed_in.borrow_mut() = Some(reason);
        }));

        assert!(start(&mut bearer, vec![PING_REQ], &out));
        assert!(start(&mut bearer, vec![FETCH_REQ], &out));
        bearer.process_timeouts();

        assert!(bearer.is_closed());
        assert!(*log.link_error.borrow());
        assert_eq!(*closed.borrow(), Some(ShutdownReason::TimedOut));
        let out = out.borrow();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r == &Err(BearerError::TimedOut)));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (mut bearer, log) = make_bearer(long_timeout());
        let closed_count = Rc::new(RefCell::new(0));
        let closed_in = closed_count.clone();
        bearer.set_closed_callback(Box::new(move |_| {
            *closed_in.borrow_mut() += 1;
        }));

        bearer.shutdown();
        bearer.shutdown();

        assert_eq!(*closed_count.borrow(), 1);
        // Voluntary shutdown does not signal a link error.
        assert!(!*log.link_error.borrow());
        // And nothing can be sent afterwards.
        assert!(!bearer.send_without_response(vec![POKE_CMD]));
    }

    #[test]
    fn test_completion_resets_timer_for_next_transaction() {
        let (mut bearer, _log) = make_bearer(long_timeout());
        let out: Completions = Rc::new(RefCell::new(Vec::new()));

        assert!(start(&mut bearer, vec![PING_REQ, 1], &out));
        bearer.receive(&[PING_RSP, 1]);
        // No transaction in flight: the timer must be disarmed.
        bearer.process_timeouts();
        assert!(!bearer.is_closed());
        assert_eq!(out.borrow().len(), 1);
    }
}
