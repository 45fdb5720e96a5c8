//! Fixed logical channel abstraction
//!
//! The bearer sends PDUs over exactly one fixed channel (SMP rides CID
//! 0x0006 on LE links). Segmentation, reassembly and transport
//! multiplexing live below this trait; the link-layer owner delivers
//! inbound PDUs by calling `Bearer::receive` directly.

/// One fixed logical channel towards a peer.
///
/// Implementations are not required to buffer: `send` returning `false`
/// means the PDU was not delivered and the link should be considered
/// unusable.
pub trait Channel {
    /// Queue one complete PDU for transmission. Returns `false` if the
    /// channel cannot accept it (closed, link dead).
    fn send(&mut self, pdu: &[u8]) -> bool;

    /// Tell the link layer that a fatal protocol error occurred on this
    /// channel and the underlying connection should be torn down.
    fn signal_link_error(&mut self);
}
