//! Socket listeners and the listener engine
//!
//! Most servers listen on one port, sometimes two (a secure and a
//! non-secure one, or whatever other distinction they like), and hand
//! accepted sockets to worker threads. The [`ListenerEngine`] does that
//! once, correctly: one thread per enabled port, each owning a
//! [`SocketListener`], both feeding a bounded thread-safe queue that
//! worker threads drain through [`ListenerEngine::wait`].
//!
//! A [`SocketListener`] may own up to two host sockets per port, an
//! IPv4 ANY and an IPv6 ANY, because not every stack accepts IPv4
//! connections on a v6 socket. Accept readiness is polled across both
//! with one multi-select.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::set_last_kernel_error;
use crate::time::TimeStamp;
use crate::{ErrorKind, Result};

use super::addr::{AddrFamily, IpAddress, IpEndpoint};
use super::socket::{
    multi_read_select, BoolSockOpt, SelectFlags, SelectItem, SockProtocol, Socket, SocketKind,
};

/// How often listener threads come up for air to sample the shutdown
/// flag.
const LISTEN_TICK: Duration = Duration::from_millis(500);

/// A listening post on one port, across both address families where the
/// host provides them.
pub struct SocketListener {
    sockets: Vec<Socket>,
    port: u16,
    max_waiting: u32,
}

impl SocketListener {
    /// Bind and listen on the given port. Port zero picks an ephemeral
    /// port on the first family, which the second then shares.
    /// `max_waiting` caps the host backlog; zero means the host default.
    pub fn new(port: u16, max_waiting: u32) -> Result<Self> {
        let mut sockets = Vec::with_capacity(2);
        let mut bound_port = port;

        for family in [AddrFamily::IpV4, AddrFamily::IpV6] {
            match Self::open_one(family, bound_port, max_waiting) {
                Ok(socket) => {
                    if bound_port == 0 {
                        bound_port = socket.local_endpoint()?.port;
                    }
                    sockets.push(socket);
                }
                Err(err) => {
                    // One family may simply not exist on this host; only
                    // losing both is fatal
                    log::debug!("no {family:?} listener on port {bound_port}: {err}");
                }
            }
        }

        if sockets.is_empty() {
            return Err(set_last_kernel_error(ErrorKind::NotSupported, 0)
                .with_detail(format!("no listenable address family for port {port}")));
        }

        Ok(Self {
            sockets,
            port: bound_port,
            max_waiting,
        })
    }

    fn open_one(family: AddrFamily, port: u16, max_waiting: u32) -> Result<Socket> {
        let mut socket = Socket::create(SocketKind::Stream, SockProtocol::Tcp, family)?;
        socket.set_bool_opt(BoolSockOpt::ReuseAddr, true)?;
        if family == AddrFamily::IpV6 {
            socket.set_v6_only(true)?;
        }
        socket.bind_listen(&IpAddress::any(family), port)?;
        socket.listen(max_waiting)?;
        Ok(socket)
    }

    /// The port this listener is bound on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// How many host sockets the listener owns (one per usable family).
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn max_waiting(&self) -> u32 {
        self.max_waiting
    }

    /// Wait up to `timeout` for a client, then accept it. `Ok(None)`
    /// means the wait expired with nobody there.
    pub fn listen_for(&self, timeout: Option<Duration>) -> Result<Option<(Socket, IpEndpoint)>> {
        let mut items: Vec<SelectItem<'_>> = self.sockets.iter().map(SelectItem::new).collect();
        let changed = multi_read_select(&mut items, timeout, None)?;
        if changed == 0 {
            return Ok(None);
        }

        for item in &items {
            if item.flags.contains(SelectFlags::READ) {
                return item.socket.accept().map(Some);
            }
        }
        Ok(None)
    }
}

/// One accepted connection, queued by a listener thread.
///
/// The connection owns its socket: dropping an unwanted connection
/// closes it. A caller that wants to keep the socket beyond the
/// connection object takes it with [`LengConn::into_socket`].
pub struct LengConn {
    socket: Option<Socket>,
    secure: bool,
    client: IpEndpoint,
    accepted_at: TimeStamp,
}

impl LengConn {
    fn new(socket: Socket, secure: bool, client: IpEndpoint) -> Self {
        Self {
            socket: Some(socket),
            secure,
            client,
            accepted_at: TimeStamp::now(),
        }
    }

    /// Whether this connection arrived on the secure port.
    pub fn secure(&self) -> bool {
        self.secure
    }

    /// The client's endpoint.
    pub fn client(&self) -> &IpEndpoint {
        &self.client
    }

    /// When the connection was accepted.
    pub fn accepted_at(&self) -> TimeStamp {
        self.accepted_at
    }

    /// The connection's socket.
    pub fn socket(&self) -> &Socket {
        self.socket.as_ref().expect("connection socket still owned")
    }

    /// The connection's socket, mutably.
    pub fn socket_mut(&mut self) -> &mut Socket {
        self.socket.as_mut().expect("connection socket still owned")
    }

    /// Take ownership of the socket out of the connection object.
    pub fn into_socket(mut self) -> Socket {
        self.socket.take().expect("connection socket still owned")
    }
}

struct ConnQueue {
    entries: Mutex<VecDeque<LengConn>>,
    arrival: Condvar,
    max_waiting: usize,
}

impl ConnQueue {
    fn new(max_waiting: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            arrival: Condvar::new(),
            max_waiting,
        }
    }

    /// Queue a connection, or drop it (closing the socket) when the
    /// queue is at its cap. The listener must never block here.
    fn push(&self, conn: LengConn) {
        let mut entries = self.entries.lock();
        if self.max_waiting != 0 && entries.len() >= self.max_waiting {
            log::warn!(
                "listener queue full ({} waiting), dropping connection from {}",
                entries.len(),
                conn.client()
            );
            return;
        }
        entries.push_back(conn);
        self.arrival.notify_one();
    }

    fn wait(&self, timeout: Duration) -> Option<LengConn> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            if let Some(conn) = entries.pop_front() {
                return Some(conn);
            }
            if self.arrival.wait_until(&mut entries, deadline).timed_out() {
                return entries.pop_front();
            }
        }
    }

    fn drain(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }
}

/// The listener engine: up to two listener threads (secure and
/// non-secure port) feeding one bounded queue of accepted connections.
pub struct ListenerEngine {
    non_secure_port: u16,
    secure_port: u16,
    max_waiting: u32,
    queue: Arc<ConnQueue>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ListenerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEngine")
            .field("non_secure_port", &self.non_secure_port)
            .field("secure_port", &self.secure_port)
            .field("max_waiting", &self.max_waiting)
            .field("threads", &self.threads.len())
            .finish()
    }
}

impl ListenerEngine {
    /// Start listener threads for every non-zero port. At least one of
    /// the two ports must be enabled. `max_waiting` bounds the
    /// connection queue; zero means unbounded.
    pub fn start(non_secure_port: u16, secure_port: u16, max_waiting: u32) -> Result<Self> {
        if non_secure_port == 0 && secure_port == 0 {
            return Err(set_last_kernel_error(ErrorKind::InvalidArguments, 0)
                .with_detail("listener engine needs at least one port"));
        }

        let queue = Arc::new(ConnQueue::new(max_waiting as usize));
        let stop = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::with_capacity(2);

        for (port, secure) in [(non_secure_port, false), (secure_port, true)] {
            if port == 0 {
                continue;
            }
            let thread_queue = Arc::clone(&queue);
            let thread_stop = Arc::clone(&stop);
            let name = if secure { "listener-secure" } else { "listener-plain" };
            let spawned = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || listen_thread(port, secure, max_waiting, &thread_queue, &thread_stop));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    // Take down whichever thread already started
                    stop.store(true, Ordering::SeqCst);
                    for handle in threads.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(set_last_kernel_error(ErrorKind::GenFailure, 0)
                        .with_detail(format!("cannot spawn {name}: {err}")));
                }
            }
        }

        log::info!(
            "Listener engine up (plain port {non_secure_port}, secure port {secure_port}, \
             max waiting {max_waiting})"
        );

        Ok(Self {
            non_secure_port,
            secure_port,
            max_waiting,
            queue,
            stop,
            threads,
        })
    }

    pub fn non_secure_port(&self) -> u16 {
        self.non_secure_port
    }

    pub fn secure_port(&self) -> u16 {
        self.secure_port
    }

    pub fn max_waiting(&self) -> u32 {
        self.max_waiting
    }

    /// Wait up to `timeout` for an accepted connection. `None` means
    /// the wait expired with nothing queued.
    pub fn wait(&self, timeout: Duration) -> Option<LengConn> {
        self.queue.wait(timeout)
    }

    /// Signal the listener threads, join them, and close every
    /// connection still waiting in the queue.
    pub fn shutdown(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }

        // The threads sample the flag every tick, so this join is
        // bounded
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::warn!("listener thread ended by panic");
            }
        }

        let dropped = self.queue.drain();
        if dropped > 0 {
            log::info!("Listener engine closed {dropped} unclaimed connections");
        }
    }
}

impl Drop for ListenerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn listen_thread(
    port: u16,
    secure: bool,
    max_waiting: u32,
    queue: &ConnQueue,
    stop: &AtomicBool,
) {
    let listener = match SocketListener::new(port, max_waiting) {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("listener on port {port} failed to start: {err}");
            return;
        }
    };

    while !stop.load(Ordering::SeqCst) {
        match listener.listen_for(Some(LISTEN_TICK)) {
            Ok(Some((socket, client))) => {
                log::debug!("accepted {client} on port {port}");
                queue.push(LengConn::new(socket, secure, client));
            }
            Ok(None) => {}
            Err(err) => {
                // Transient accept failures (the client gave up first,
                // say) must not kill the listener
                log::warn!("accept failure on port {port}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::RecvMode;

    fn connect_client(port: u16) -> Socket {
        let mut client =
            Socket::create(SocketKind::Stream, SockProtocol::Tcp, AddrFamily::IpV4).unwrap();
        let target = IpEndpoint::new(IpAddress::loopback(AddrFamily::IpV4), port);
        client.connect(&target, Some(Duration::from_secs(5))).unwrap();
        client
    }

    #[test]
    fn test_listener_binds_each_family() {
        let listener = SocketListener::new(0, 4).unwrap();
        assert!(listener.port() != 0);
        assert!(listener.socket_count() >= 1);
    }

    #[test]
    fn test_listen_for_times_out_quietly() {
        let listener = SocketListener::new(0, 1).unwrap();
        let got = listener.listen_for(Some(Duration::from_millis(30))).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_listener_accepts_a_client() {
        let listener = SocketListener::new(0, 4).unwrap();
        let client = connect_client(listener.port());

        let (server, peer) = listener
            .listen_for(Some(Duration::from_secs(5)))
            .unwrap()
            .expect("client should be waiting");
        assert!(peer.addr.is_loopback());
        assert!(server.is_connected());

        client.send(b"hi").unwrap();
        let mut buf = [0u8; 2];
        let got = server
            .recv_to(&mut buf, Some(Duration::from_secs(2)), RecvMode::All)
            .unwrap();
        assert_eq!(got, 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn test_engine_requires_a_port() {
        let err = ListenerEngine::start(0, 0, 4).unwrap_err();
        assert!(err.is(ErrorKind::InvalidArguments));
    }

    #[test]
    fn test_engine_empty_wait_returns_fast() {
        let mut engine = ListenerEngine::start(47_911, 0, 4).unwrap();
        let before = Instant::now();
        assert!(engine.wait(Duration::from_millis(0)).is_none());
        assert!(before.elapsed() < Duration::from_millis(100));
        engine.shutdown();
    }

    #[test]
    fn test_engine_delivers_in_arrival_order() {
        let mut engine = ListenerEngine::start(47_912, 0, 8).unwrap();
        // Give the listener thread a moment to bind
        std::thread::sleep(Duration::from_millis(100));

        let first = connect_client(47_912);
        first.send(b"1").unwrap();
        let second = connect_client(47_912);
        second.send(b"2").unwrap();

        let conn_a = engine.wait(Duration::from_secs(5)).expect("first conn");
        let conn_b = engine.wait(Duration::from_secs(5)).expect("second conn");
        assert!(!conn_a.secure());
        assert!(!conn_b.secure());

        let mut byte = [0u8; 1];
        conn_a
            .socket()
            .recv_to(&mut byte, Some(Duration::from_secs(2)), RecvMode::All)
            .unwrap();
        assert_eq!(&byte, b"1");
        conn_b
            .socket()
            .recv_to(&mut byte, Some(Duration::from_secs(2)), RecvMode::All)
            .unwrap();
        assert_eq!(&byte, b"2");

        engine.shutdown();
    }
}
