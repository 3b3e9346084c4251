use tokio::sync::mpsc;

/// The byte-pipe capability a peer link runs over.
///
/// Production transports (websockets, TLS sockets) adapt their connection to
/// this shape; [`link_pair`] builds an in-process crossover used by tests and
/// local wiring. Dropping either half disconnects the link.
pub struct LinkTransport {
    pub outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pub incoming: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Builds two connected transports: frames sent on one arrive on the other.
pub fn link_pair() -> (LinkTransport, LinkTransport) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    (
        LinkTransport {
            outgoing: left_tx,
            incoming: right_rx,
        },
        LinkTransport {
            outgoing: right_tx,
            incoming: left_rx,
        },
    )
}
