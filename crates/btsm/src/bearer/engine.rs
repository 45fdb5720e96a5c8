//! Transactional PDU bearer
//!
//! Matches local requests to peer responses by opcode, serializes
//! concurrent local transactions per category (request vs indication),
//! enforces per-transaction timeouts and routes peer-initiated PDUs to
//! registered handlers. Protocol violations by the peer are fatal to the
//! whole bearer; local misuse fails synchronously without state change.

use super::types::*;
use crate::channel::Channel;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::time::{Duration, Instant};

/// Invoked when a local transaction completes with the peer's response.
pub type SuccessCallback<C> = Box<dyn FnOnce(&mut Bearer<C>, &[u8])>;

/// Invoked when a local transaction fails (error response, timeout,
/// shutdown).
pub type ErrorCallback<C> = Box<dyn FnOnce(&mut Bearer<C>, BearerError)>;

/// Invoked for each peer-initiated PDU of a registered opcode. For
/// requests and indications the id identifies the pending transaction
/// to `reply` to; for commands and notifications it is
/// `TransactionId::INVALID`.
pub type RemoteHandler<C> = Box<dyn FnMut(&mut Bearer<C>, TransactionId, &[u8])>;

/// Invoked exactly once when the bearer stops operating.
pub type ClosedCallback = Box<dyn FnMut(ShutdownReason)>;

/// Bearer tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct BearerConfig {
    /// Current MTU; outbound PDUs larger than this are rejected
    pub mtu: u16,
    /// Time allowed for the peer to answer one transaction
    pub transaction_timeout: Duration,
}

/// A local transaction queued or in flight.
struct PendingTransaction<C: Channel> {
    opcode: u8,
    pdu: Vec<u8>,
    on_success: SuccessCallback<C>,
    on_error: ErrorCallback<C>,
}

/// FIFO of local transactions for one category. At most one is in
/// flight; `deadline` is armed exactly while one is.
struct TransactionQueue<C: Channel> {
    pending: VecDeque<PendingTransaction<C>>,
    current: Option<PendingTransaction<C>>,
    deadline: Option<Instant>,
}

impl<C: Channel> TransactionQueue<C> {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            deadline: None,
        }
    }

    fn drain(&mut self) -> Vec<PendingTransaction<C>> {
        self.deadline = None;
        let mut all: Vec<_> = self.current.take().into_iter().collect();
        all.extend(mem::take(&mut self.pending));
        all
    }
}

/// The two transaction categories a bearer serializes independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Request,
    Indication,
}

/// A peer-initiated request/indication awaiting a local reply.
#[derive(Debug, Clone, Copy)]
struct RemoteTransaction {
    id: TransactionId,
    opcode: u8,
}

/// Flow-controlled request/response engine over one fixed channel.
pub struct Bearer<C: Channel> {
    chan: C,
    table: ProtocolTable,
    config: BearerConfig,
    requests: TransactionQueue<C>,
    indications: TransactionQueue<C>,
    handlers: HashMap<u8, (HandlerId, RemoteHandler<C>)>,
    remote_request: Option<RemoteTransaction>,
    remote_indication: Option<RemoteTransaction>,
    next_handler_id: u64,
    next_transaction_id: u64,
    // Set while a handler for this id runs, so self-unregistration
    // inside the handler is not undone when we reinsert it.
    dispatching: Option<HandlerId>,
    dispatch_unregistered: bool,
    closed: bool,
    closed_callback: Option<ClosedCallback>,
}

impl<C: Channel> Bearer<C> {
    pub fn new(chan: C, table: ProtocolTable, config: BearerConfig) -> Self {
        let mut config = config;
        if config.mtu < table.min_mtu {
            config.mtu = table.min_mtu;
        }
        Self {
            chan,
            table,
            config,
            requests: TransactionQueue::new(),
            indications: TransactionQueue::new(),
            handlers: HashMap::new(),
            remote_request: None,
            remote_indication: None,
            next_handler_id: 1,
            next_transaction_id: 1,
            dispatching: None,
            dispatch_unregistered: false,
            closed: false,
            closed_callback: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mtu(&self) -> u16 {
        self.config.mtu
    }

    /// Raise (or lower, bounded by the protocol floor) the MTU after a
    /// negotiation on a higher layer.
    pub fn set_mtu(&mut self, mtu: u16) {
        self.config.mtu = mtu.max(self.table.min_mtu);
    }

    pub fn set_closed_callback(&mut self, cb: ClosedCallback) {
        self.closed_callback = Some(cb);
    }

    /// Start a local request or indication transaction. The PDU is sent
    /// immediately iff nothing is in flight on its category queue,
    /// otherwise it waits its FIFO turn. Returns `false` without state
    /// change on a malformed PDU, wrong opcode category or closed
    /// bearer.
    pub fn start_transaction(
        &mut self,
        pdu: Vec<u8>,
        on_success: SuccessCallback<C>,
        on_error: ErrorCallback<C>,
    ) -> bool {
        if self.closed || pdu.is_empty() || pdu.len() > self.config.mtu as usize {
            return false;
        }
        let opcode = pdu[0];
        let category = match (self.table.classify)(opcode) {
            MethodType::Request => Category::Request,
            MethodType::Indication => Category::Indication,
            _ => return false,
        };
        self.queue_mut(category).pending.push_back(PendingTransaction {
            opcode,
            pdu,
            on_success,
            on_error,
        });
        if self.queue_mut(category).current.is_none() {
            self.send_next(category);
        }
        true
    }

    /// Send a command or notification. No queueing, no callbacks.
    pub fn send_without_response(&mut self, pdu: Vec<u8>) -> bool {
        if self.closed || pdu.is_empty() || pdu.len() > self.config.mtu as usize {
            return false;
        }
        match (self.table.classify)(pdu[0]) {
            MethodType::Command | MethodType::Notification => {}
            _ => return false,
        }
        if !self.chan.send(&pdu) {
            self.shutdown_with(ShutdownReason::LinkError);
            return false;
        }
        true
    }

    /// Register the handler for one opcode. Exactly one handler per
    /// opcode; a second registration returns `HandlerId::INVALID`.
    pub fn register_handler(&mut self, opcode: u8, handler: RemoteHandler<C>) -> HandlerId {
        if self.handlers.contains_key(&opcode) {
            return HandlerId::INVALID;
        }
        let id = HandlerId(self.next_transaction_handler_id());
        if !id.is_valid() {
            return HandlerId::INVALID;
        }
        self.handlers.insert(opcode, (id, handler));
        id
    }

    pub fn unregister_handler(&mut self, id: HandlerId) {
        if !id.is_valid() {
            return;
        }
        if self.dispatching == Some(id) {
            self.dispatch_unregistered = true;
            return;
        }
        self.handlers.retain(|_, (hid, _)| *hid != id);
    }

    /// Complete a pending peer-initiated request/indication with a
    /// response/confirmation. The reply opcode must be the one the
    /// pending opcode expects. Fails for an unknown id or a mismatched
    /// opcode.
    pub fn reply(&mut self, id: TransactionId, pdu: Vec<u8>) -> bool {
        if self.closed || pdu.is_empty() || pdu.len() > self.config.mtu as usize {
            return false;
        }
        let slot = match self.find_remote(id) {
            Some(slot) => slot,
            None => return false,
        };
        let remote = match slot {
            Category::Request => self.remote_request.unwrap(),
            Category::Indication => self.remote_indication.unwrap(),
        };
        if (self.table.response_for_request)(remote.opcode) != Some(pdu[0]) {
            return false;
        }
        self.clear_remote(slot);
        if !self.chan.send(&pdu) {
            self.shutdown_with(ShutdownReason::LinkError);
            return false;
        }
        true
    }

    /// Complete a pending peer-initiated request with an error
    /// response. Not valid for indications, which have no error form.
    pub fn reply_with_error(&mut self, id: TransactionId, handle: u16, code: u8) -> bool {
        if self.closed {
            return false;
        }
        let encode = match self.table.encode_error {
            Some(f) => f,
            None => return false,
        };
        match self.find_remote(id) {
            Some(Category::Request) => {}
            _ => return false,
        }
        let opcode = self.remote_request.unwrap().opcode;
        self.clear_remote(Category::Request);
        let pdu = encode(opcode, handle, code);
        if !self.chan.send(&pdu) {
            self.shutdown_with(ShutdownReason::LinkError);
            return false;
        }
        true
    }

    /// Voluntarily stop the bearer. Idempotent. Fails every queued and
    /// in-flight local transaction with `BearerError::Closed` and
    /// invokes the closed callback.
    pub fn shutdown(&mut self) {
        self.shutdown_with(ShutdownReason::Closed);
    }

    /// Entry point for inbound PDUs from the channel, in peer-send
    /// order.
    pub fn receive(&mut self, pdu: &[u8]) {
        if self.closed {
            debug!("{}: dropping PDU received after close", self.table.name);
            return;
        }
        if pdu.is_empty() {
            warn!("{}: empty PDU from peer", self.table.name);
            self.shutdown_with(ShutdownReason::ProtocolViolation);
            return;
        }
        let opcode = pdu[0];
        if Some(opcode) == self.table.error_opcode {
            self.receive_error(pdu);
            return;
        }
        match (self.table.classify)(opcode) {
            MethodType::Response | MethodType::Confirmation => {
                self.receive_completion(opcode, pdu)
            }
            MethodType::Request | MethodType::Indication => self.receive_remote(opcode, pdu),
            MethodType::Command | MethodType::Notification => self.dispatch_unsolicited(opcode, pdu),
            MethodType::Invalid => self.receive_unknown(opcode),
        }
    }

    /// Fire any expired transaction timer. A host loop is expected to
    /// call this periodically; an expiry shuts the whole bearer down
    /// with a `TimedOut` status.
    pub fn process_timeouts(&mut self) {
        if self.closed {
            return;
        }
        let now = Instant::now();
        let expired = |q: &TransactionQueue<C>| q.deadline.is_some_and(|d| d <= now);
        if expired(&self.requests) || expired(&self.indications) {
            warn!("{}: transaction timed out", self.table.name);
            self.shutdown_with(ShutdownReason::TimedOut);
        }
    }

    fn queue_mut(&mut self, category: Category) -> &mut TransactionQueue<C> {
        match category {
            Category::Request => &mut self.requests,
            Category::Indication => &mut self.indications,
        }
    }

    fn send_next(&mut self, category: Category) {
        debug_assert!(self.queue_mut(category).current.is_none());
        let txn = match self.queue_mut(category).pending.pop_front() {
            Some(txn) => txn,
            None => return,
        };
        if !self.chan.send(&txn.pdu) {
            // Hand the transaction back so shutdown fails it with the
            // rest.
            self.queue_mut(category).pending.push_front(txn);
            self.shutdown_with(ShutdownReason::LinkError);
            return;
        }
        let deadline = Instant::now() + self.config.transaction_timeout;
        let queue = self.queue_mut(category);
        queue.current = Some(txn);
        queue.deadline = Some(deadline);
    }

    /// Completion path: a response or confirmation maps back to its
    /// originating opcode via the reverse table and must match the
    /// in-flight transaction on the relevant queue. Any mismatch,
    /// including nothing in flight, is fatal.
    fn receive_completion(&mut self, opcode: u8, pdu: &[u8]) {
        let target = match (self.table.request_for_response)(opcode) {
            Some(t) => t,
            None => {
                warn!("{}: no reverse mapping for opcode {:#04x}", self.table.name, opcode);
                self.shutdown_with(ShutdownReason::ProtocolViolation);
                return;
            }
        };
        self.complete_current(target, Ok(pdu));
    }

    /// Error responses carry the target opcode in the payload, or apply
    /// to the in-flight request when the protocol's error PDU does not
    /// name one. An error PDU with nothing to answer falls through to a
    /// registered handler (the SM Pairing Failed case) and is otherwise
    /// a violation.
    fn receive_error(&mut self, pdu: &[u8]) {
        let opcode = pdu[0];
        let details = match (self.table.decode_error)(pdu) {
            Some(d) => d,
            None => {
                warn!("{}: malformed error response", self.table.name);
                self.shutdown_with(ShutdownReason::ProtocolViolation);
                return;
            }
        };
        match details.target {
            Some(target) => self.complete_current(
                target,
                Err(BearerError::Peer {
                    code: details.code,
                    handle: details.handle,
                }),
            ),
            None => {
                if self.requests.current.is_some() {
                    let target = self.requests.current.as_ref().map(|t| t.opcode).unwrap();
                    self.complete_current(
                        target,
                        Err(BearerError::Peer {
                            code: details.code,
                            handle: details.handle,
                        }),
                    );
                } else if self.handlers.contains_key(&opcode) {
                    self.dispatch_unsolicited(opcode, pdu);
                } else {
                    warn!("{}: unexpected error response", self.table.name);
                    self.shutdown_with(ShutdownReason::ProtocolViolation);
                }
            }
        }
    }

    fn complete_current(&mut self, target: u8, outcome: Result<&[u8], BearerError>) {
        let category = match (self.table.classify)(target) {
            MethodType::Request => Category::Request,
            MethodType::Indication => Category::Indication,
            _ => {
                self.shutdown_with(ShutdownReason::ProtocolViolation);
                return;
            }
        };
        let matches = self
            .queue_mut(category)
            .current
            .as_ref()
            .map(|t| t.opcode == target)
            .unwrap_or(false);
        if !matches {
            warn!(
                "{}: completion for opcode {:#04x} does not match transaction in flight",
                self.table.name, target
            );
            self.shutdown_with(ShutdownReason::ProtocolViolation);
            return;
        }
        // Cancel the timer, pop the transaction and start the next one
        // before invoking any callback.
        let queue = self.queue_mut(category);
        queue.deadline = None;
        let txn = queue.current.take().unwrap();
        self.send_next(category);
        match outcome {
            Ok(pdu) => (txn.on_success)(self, pdu),
            Err(err) => (txn.on_error)(self, err),
        }
    }

    fn receive_remote(&mut self, opcode: u8, pdu: &[u8]) {
        let (category, slot_taken) = match (self.table.classify)(opcode) {
            MethodType::Request => (Category::Request, self.remote_request.is_some()),
            _ => (Category::Indication, self.remote_indication.is_some()),
        };
        if slot_taken {
            // A second concurrent peer request of the same category
            // breaks the protocol's flow control.
            warn!(
                "{}: peer sent opcode {:#04x} with a transaction already outstanding",
                self.table.name, opcode
            );
            self.shutdown_with(ShutdownReason::ProtocolViolation);
            return;
        }
        if !self.handlers.contains_key(&opcode) {
            self.answer_unhandled(category, opcode);
            return;
        }
        let id = TransactionId(self.next_remote_transaction_id());
        let remote = RemoteTransaction { id, opcode };
        match category {
            Category::Request => self.remote_request = Some(remote),
            Category::Indication => self.remote_indication = Some(remote),
        }
        self.dispatch(opcode, id, pdu);
    }

    fn answer_unhandled(&mut self, category: Category, opcode: u8) {
        match category {
            Category::Request => {
                debug!("{}: no handler for request {:#04x}", self.table.name, opcode);
                if let Some(encode) = self.table.encode_error {
                    let pdu = encode(opcode, 0, self.table.not_supported_code);
                    if !self.chan.send(&pdu) {
                        self.shutdown_with(ShutdownReason::LinkError);
                    }
                } else {
                    self.shutdown_with(ShutdownReason::ProtocolViolation);
                }
            }
            Category::Indication => {
                // Indications have no error form; confirm to keep the
                // peer's flow control moving.
                debug!("{}: no handler for indication {:#04x}", self.table.name, opcode);
                if let Some(conf) = (self.table.response_for_request)(opcode) {
                    if !self.chan.send(&[conf]) {
                        self.shutdown_with(ShutdownReason::LinkError);
                    }
                }
            }
        }
    }

    fn dispatch_unsolicited(&mut self, opcode: u8, pdu: &[u8]) {
        if self.handlers.contains_key(&opcode) {
            self.dispatch(opcode, TransactionId::INVALID, pdu);
        } else {
            debug!(
                "{}: dropping unsolicited opcode {:#04x} with no handler",
                self.table.name, opcode
            );
        }
    }

    fn receive_unknown(&mut self, opcode: u8) {
        debug!("{}: undefined opcode {:#04x} from peer", self.table.name, opcode);
        if let Some(encode) = self.table.encode_error {
            let pdu = encode(opcode, 0, self.table.not_supported_code);
            if !self.chan.send(&pdu) {
                self.shutdown_with(ShutdownReason::LinkError);
            }
        } else {
            self.shutdown_with(ShutdownReason::ProtocolViolation);
        }
    }

    /// Run the handler for `opcode` with the handler temporarily
    /// removed from the map, so the handler may send, reply or
    /// unregister itself through `&mut self`.
    fn dispatch(&mut self, opcode: u8, id: TransactionId, pdu: &[u8]) {
        let (hid, mut handler) = match self.handlers.remove(&opcode) {
            Some(entry) => entry,
            None => return,
        };
        self.dispatching = Some(hid);
        self.dispatch_unregistered = false;
        handler(self, id, pdu);
        self.dispatching = None;
        if !self.dispatch_unregistered && !self.handlers.contains_key(&opcode) {
            self.handlers.insert(opcode, (hid, handler));
        }
    }

    fn find_remote(&self, id: TransactionId) -> Option<Category> {
        if !id.is_valid() {
            return None;
        }
        if self.remote_request.map(|r| r.id) == Some(id) {
            return Some(Category::Request);
        }
        if self.remote_indication.map(|r| r.id) == Some(id) {
            return Some(Category::Indication);
        }
        None
    }

    fn clear_remote(&mut self, category: Category) {
        match category {
            Category::Request => self.remote_request = None,
            Category::Indication => self.remote_indication = None,
        }
    }

    /// Handler ids saturate to invalid once the counter is exhausted.
    fn next_transaction_handler_id(&mut self) -> u64 {
        if self.next_handler_id == 0 {
            return 0;
        }
        let id = self.next_handler_id;
        self.next_handler_id = self.next_handler_id.checked_add(1).unwrap_or(0);
        id
    }

    /// Remote transaction ids skip the reserved zero on wraparound.
    fn next_remote_transaction_id(&mut self) -> u64 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        if self.next_transaction_id == 0 {
            self.next_transaction_id = 1;
        }
        id
    }

    fn shutdown_with(&mut self, reason: ShutdownReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("{}: shutting down ({:?})", self.table.name, reason);
        self.remote_request = None;
        self.remote_indication = None;
        if reason != ShutdownReason::Closed {
            self.chan.signal_link_error();
        }
        // Move everything pending into locals before invoking any
        // callback; a callback may mutate the queues through us.
        let mut failed = self.requests.drain();
        failed.extend(self.indications.drain());
        let status = BearerError::from_shutdown(reason);
        for txn in failed {
            (txn.on_error)(self, status.clone());
        }
        if let Some(mut cb) = self.closed_callback.take() {
            cb(reason);
        }
    }
}

impl<C: Channel> Bearer<C> {
    /// Escalated shutdown used by layers above when their own timers
    /// fire (the SMP pairing timer).
    pub(crate) fn shutdown_timed_out(&mut self) {
        self.shutdown_with(ShutdownReason::TimedOut);
    }
}
