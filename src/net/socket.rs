//! Socket core
//!
//! Stream and datagram sockets over IPv4/IPv6. Stream sockets are placed
//! in non-blocking mode as soon as they exist; the blocking call surface
//! is emulated by readiness polls with caller-supplied timeouts, so no
//! thread is ever parked inside the host longer than the caller allowed.
//!
//! `WouldBlock` on a stream receive is transparently reported as "zero
//! bytes, success". A peer that closed its end surfaces as
//! [`ErrorKind::NotConnected`], which callers treat as the normal end of
//! a conversation rather than a failure.

use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use bitflags::bitflags;
use socket2::{Domain, Protocol, SockAddr, Type};

use crate::error::{set_last_host_error, set_last_kernel_error};
use crate::time::TimeStamp;
use crate::{ErrorKind, Result};

use super::addr::{AddrFamily, IpAddress, IpEndpoint};

/// Most sockets one multi-select call will take.
pub const MAX_SELECT: usize = 64;

/// Largest payload a datagram socket can send in one message.
const MAX_DGRAM_MSG: i32 = 65_507;

/// Socket types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
    Raw,
}

/// Socket protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockProtocol {
    Ip,
    Icmp,
    Icmp6,
    Igmp,
    Tcp,
    Pup,
    Udp,
    Idp,
    RawIp,
}

impl SockProtocol {
    fn to_host(self) -> libc::c_int {
        match self {
            SockProtocol::Ip => libc::IPPROTO_IP,
            SockProtocol::Icmp => libc::IPPROTO_ICMP,
            SockProtocol::Icmp6 => libc::IPPROTO_ICMPV6,
            SockProtocol::Igmp => libc::IPPROTO_IGMP,
            SockProtocol::Tcp => libc::IPPROTO_TCP,
            SockProtocol::Pup => libc::IPPROTO_PUP,
            SockProtocol::Udp => libc::IPPROTO_UDP,
            SockProtocol::Idp => libc::IPPROTO_IDP,
            SockProtocol::RawIp => libc::IPPROTO_RAW,
        }
    }
}

/// Directions a stream socket can be shut down in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Recv,
    Send,
    Both,
}

/// Whether a timed receive must fill the whole buffer or may return
/// early with what arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Loop until the buffer is full; an expired deadline is an error.
    All,
    /// Return after the first successful read.
    Partial,
}

/// Boolean socket options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolSockOpt {
    AllowBroadcast,
    DontRoute,
    KeepAlive,
    /// Whether Nagle's algorithm is on. Note this is the logical inverse
    /// of the host's `TCP_NODELAY` flag.
    Nagle,
    ReuseAddr,
}

/// Integer socket options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSockOpt {
    LastError,
    MaxMsgSize,
    ReceiveBuf,
    SendBuf,
    Ttl,
    TtlV6,
}

bitflags! {
    /// Per-socket readiness flags reported by the multi-selects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SelectFlags: u8 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const EXCEPT = 0b0100;
        /// Set by the idle sweep when the item's last message is older
        /// than the caller's maximum idle time.
        const MAX_IDLE = 0b1000;
    }
}

/// One socket's entry in a multi-select call. The select updates
/// `flags` in place; `last_msg_time` is maintained by the caller and
/// only read here for the idle sweep.
pub struct SelectItem<'a> {
    pub socket: &'a Socket,
    pub last_msg_time: TimeStamp,
    pub flags: SelectFlags,
}

impl<'a> SelectItem<'a> {
    pub fn new(socket: &'a Socket) -> Self {
        Self {
            socket,
            last_msg_time: TimeStamp::now(),
            flags: SelectFlags::empty(),
        }
    }
}

/// A socket over the host's network stack.
///
/// Lifecycle: create, then bind and/or connect, then I/O, then drop
/// (which closes the handle if it is still open).
#[derive(Debug)]
pub struct Socket {
    inner: socket2::Socket,
    family: AddrFamily,
    kind: SocketKind,
    bound: bool,
    connected: bool,
    shut_down: bool,
}

impl Socket {
    /// Create a socket of the given type, protocol and family. Stream
    /// sockets come back already in non-blocking mode.
    pub fn create(kind: SocketKind, protocol: SockProtocol, family: AddrFamily) -> Result<Socket> {
        let domain = match family {
            AddrFamily::IpV4 => Domain::IPV4,
            AddrFamily::IpV6 => Domain::IPV6,
            AddrFamily::Unspec => {
                return Err(set_last_kernel_error(ErrorKind::InvalidArguments, 0)
                    .with_detail("socket creation needs a concrete address family"));
            }
        };
        let sock_type = match kind {
            SocketKind::Stream => Type::STREAM,
            SocketKind::Datagram => Type::DGRAM,
            SocketKind::Raw => Type::RAW,
        };

        let inner = socket2::Socket::new(domain, sock_type, Some(Protocol::from(protocol.to_host())))
            .map_err(map_io_error)?;

        if kind == SocketKind::Stream {
            inner.set_nonblocking(true).map_err(map_io_error)?;
        }

        Ok(Socket {
            inner,
            family,
            kind,
            bound: false,
            connected: false,
            shut_down: false,
        })
    }

    /// Wrap an accepted host socket.
    fn from_accepted(inner: socket2::Socket, family: AddrFamily) -> Result<Socket> {
        inner.set_nonblocking(true).map_err(map_io_error)?;
        Ok(Socket {
            inner,
            family,
            kind: SocketKind::Stream,
            bound: true,
            connected: true,
            shut_down: false,
        })
    }

    /// The raw host handle, for readiness polling.
    pub fn handle(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    pub fn family(&self) -> AddrFamily {
        self.family
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Whether a bind has succeeded on this socket.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Whether a stream connect has succeeded on this socket.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether orderly shutdown has been initiated.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // -----------------------------------------------------------------
    // Binding and connecting
    // -----------------------------------------------------------------

    /// Bind for listening, to a specific local address or to the
    /// family's wildcard when `addr` is unspecified.
    pub fn bind_listen(&mut self, addr: &IpAddress, port: u16) -> Result<()> {
        let local = match addr {
            IpAddress::Unspecified => IpAddress::any(self.family),
            other => other.clone(),
        };
        let endpoint = IpEndpoint::new(local, port);
        let std_addr = endpoint.to_std().ok_or_else(|| {
            set_last_kernel_error(ErrorKind::InvalidAddress, 0)
        })?;

        self.inner
            .bind(&SockAddr::from(std_addr))
            .map_err(map_io_error)?;
        self.bound = true;
        Ok(())
    }

    /// Bind to the local interface the host would route through to
    /// reach `remote`. Datagram senders use this so their traffic leaves
    /// through the right interface.
    pub fn bind_for_remote(&mut self, remote: &IpEndpoint, local_port: u16) -> Result<()> {
        let remote_std = remote.to_std().ok_or_else(|| {
            set_last_kernel_error(ErrorKind::InvalidAddress, 0)
        })?;

        // Ask the routing layer which source address it would pick: a
        // connected datagram socket reports it without sending anything
        let domain = match self.family {
            AddrFamily::IpV6 => Domain::IPV6,
            _ => Domain::IPV4,
        };
        let probe = socket2::Socket::new(domain, Type::DGRAM, None).map_err(map_io_error)?;
        probe
            .connect(&SockAddr::from(remote_std))
            .map_err(|err| {
                let mapped = map_io_error(err);
                set_last_kernel_error(ErrorKind::InvalidAddress, mapped.host_code())
                    .with_detail("no route to pick a local interface from")
            })?;
        let local_ip = probe
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
            .map(|addr| addr.ip())
            .ok_or_else(|| set_last_kernel_error(ErrorKind::InvalidAddress, 0))?;

        let endpoint = IpEndpoint::new(IpAddress::from_std(local_ip), local_port);
        let std_addr = endpoint
            .to_std()
            .ok_or_else(|| set_last_kernel_error(ErrorKind::InvalidAddress, 0))?;
        self.inner
            .bind(&SockAddr::from(std_addr))
            .map_err(map_io_error)?;
        self.bound = true;
        Ok(())
    }

    /// Start listening with the given backlog; zero means the host
    /// maximum.
    pub fn listen(&self, backlog: u32) -> Result<()> {
        let actual = if backlog == 0 {
            libc::SOMAXCONN
        } else {
            backlog as libc::c_int
        };
        self.inner.listen(actual).map_err(map_io_error)
    }

    /// Accept one pending connection. The caller is expected to have
    /// seen read readiness on this listener first.
    pub fn accept(&self) -> Result<(Socket, IpEndpoint)> {
        let (accepted, peer) = self.inner.accept().map_err(map_io_error)?;
        let endpoint = peer
            .as_socket()
            .map(IpEndpoint::from_std)
            .ok_or_else(|| set_last_kernel_error(ErrorKind::InvalidData, 0))?;
        Ok((Socket::from_accepted(accepted, self.family)?, endpoint))
    }

    /// Connect a non-blocking stream socket, waiting up to `timeout`
    /// for the connect to complete. `None` waits forever.
    ///
    /// A timeout leaves the connect in flight: the caller can come back
    /// and wait again, or drop the socket to abandon it.
    pub fn connect(&mut self, target: &IpEndpoint, timeout: Option<Duration>) -> Result<()> {
        let std_addr = target
            .to_std()
            .ok_or_else(|| set_last_kernel_error(ErrorKind::InvalidAddress, 0))?;

        match self.inner.connect(&SockAddr::from(std_addr)) {
            Ok(()) => {
                self.connected = true;
                return Ok(());
            }
            Err(err) => match err.raw_os_error() {
                // Completed while we were away
                Some(libc::EISCONN) => {
                    self.connected = true;
                    return Ok(());
                }
                // In progress, fall through to the readiness wait
                Some(libc::EINPROGRESS) | Some(libc::EAGAIN) | Some(libc::EALREADY) => {}
                _ => return Err(map_io_error(err)),
            },
        }

        if !self.wait_for_connect_ready(timeout)? {
            return Err(set_last_kernel_error(ErrorKind::Timeout, 0));
        }

        // Writability alone doesn't mean success; the socket reports the
        // final status through its error option
        if let Ok(Some(err)) = self.inner.take_error() {
            return Err(map_io_error(err));
        }
        self.connected = true;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stream I/O
    // -----------------------------------------------------------------

    /// Receive whatever is available right now. On a non-blocking
    /// stream "nothing there yet" is reported as zero bytes, success.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        match self.recv_raw(buf, false) {
            Err(err) if err.is(ErrorKind::WouldBlock) => Ok(0),
            other => other,
        }
    }

    /// Receive without consuming: the same bytes remain for the next
    /// read.
    pub fn recv_peek(&self, buf: &mut [u8]) -> Result<usize> {
        match self.recv_raw(buf, true) {
            Err(err) if err.is(ErrorKind::WouldBlock) => Ok(0),
            other => other,
        }
    }

    fn recv_raw(&self, buf: &mut [u8], peek: bool) -> Result<usize> {
        let flags = if peek { libc::MSG_PEEK } else { 0 };
        let got = unsafe {
            libc::recv(
                self.handle(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                flags,
            )
        };
        if got < 0 {
            return Err(crate::error::set_last_os_error());
        }
        Ok(got as usize)
    }

    /// Receive with a deadline. In [`RecvMode::All`] the call loops
    /// until the buffer is full and an expired deadline is a
    /// [`Timeout`](ErrorKind::Timeout) error; in [`RecvMode::Partial`]
    /// it returns whatever the first read produced.
    ///
    /// A peer that closed its end fails with
    /// [`ErrorKind::NotConnected`].
    pub fn recv_to(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
        mode: RecvMode,
    ) -> Result<usize> {
        let deadline = timeout.map(|wait| Instant::now() + wait);
        let mut total = 0usize;

        while total < buf.len() {
            let remaining = match remaining_time(deadline) {
                Some(left) => left,
                None => {
                    if mode == RecvMode::All {
                        return Err(set_last_kernel_error(ErrorKind::Timeout, 0));
                    }
                    break;
                }
            };

            if !self.wait_for_data_ready(remaining)? {
                if mode == RecvMode::All {
                    return Err(set_last_kernel_error(ErrorKind::Timeout, 0));
                }
                break;
            }

            let got = self.recv_raw(&mut buf[total..], false)?;
            if got == 0 {
                // Readable plus zero bytes is the peer-close signal
                return Err(set_last_kernel_error(ErrorKind::NotConnected, 0));
            }
            total += got;

            if mode == RecvMode::Partial {
                break;
            }
        }
        Ok(total)
    }

    /// Send once. Partial writes are not hidden: the return value says
    /// how much the host actually took.
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.shut_down {
            return Err(set_last_kernel_error(ErrorKind::NotConnected, 0)
                .with_detail("socket has been shut down"));
        }
        let sent = unsafe { libc::send(self.handle(), buf.as_ptr().cast(), buf.len(), 0) };
        if sent < 0 {
            return Err(crate::error::set_last_os_error());
        }
        Ok(sent as usize)
    }

    /// Send the whole buffer, waiting up to `chunk_timeout` for write
    /// readiness before each chunk. Fails with
    /// [`Timeout`](ErrorKind::Timeout) when a single wait expires.
    pub fn send_throttled(&self, buf: &[u8], chunk_timeout: Option<Duration>) -> Result<usize> {
        let mut sent = 0usize;
        while sent < buf.len() {
            if !self.wait_for_send_ready(chunk_timeout)? {
                return Err(set_last_kernel_error(ErrorKind::Timeout, 0));
            }
            sent += self.send(&buf[sent..])?;
        }
        Ok(sent)
    }

    /// Orderly shutdown of one or both directions. Writes are refused
    /// after a send-side shutdown.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> Result<()> {
        let how = match mode {
            ShutdownMode::Recv => libc::SHUT_RD,
            ShutdownMode::Send => libc::SHUT_WR,
            ShutdownMode::Both => libc::SHUT_RDWR,
        };
        let rc = unsafe { libc::shutdown(self.handle(), how) };
        if rc != 0 {
            return Err(crate::error::set_last_os_error());
        }
        if mode != ShutdownMode::Recv {
            self.shut_down = true;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Datagram I/O
    // -----------------------------------------------------------------

    /// Send a datagram to the given endpoint.
    pub fn send_to(&self, buf: &[u8], target: &IpEndpoint) -> Result<usize> {
        let std_addr = target
            .to_std()
            .ok_or_else(|| set_last_kernel_error(ErrorKind::InvalidAddress, 0))?;
        self.inner
            .send_to(buf, &SockAddr::from(std_addr))
            .map_err(map_io_error)
    }

    /// Receive one datagram and where it came from, waiting up to
    /// `timeout` for one to arrive. With `peek` the datagram stays
    /// queued for the next read.
    pub fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
        peek: bool,
    ) -> Result<(usize, IpEndpoint)> {
        if !self.wait_for_data_ready(timeout)? {
            return Err(set_last_kernel_error(ErrorKind::Timeout, 0));
        }

        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let flags = if peek { libc::MSG_PEEK } else { 0 };

        let got = unsafe {
            libc::recvfrom(
                self.handle(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                flags,
                (&mut storage as *mut libc::sockaddr_storage).cast(),
                &mut len,
            )
        };
        if got < 0 {
            return Err(crate::error::set_last_os_error());
        }

        let from = endpoint_from_storage(&storage)
            .ok_or_else(|| set_last_kernel_error(ErrorKind::InvalidData, 0))?;
        Ok((got as usize, from))
    }

    // -----------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------

    /// Bytes the next read could return without blocking.
    pub fn data_ready(&self) -> Result<usize> {
        let mut available: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.handle(), libc::FIONREAD as _, &mut available) };
        if rc != 0 {
            return Err(crate::error::set_last_os_error());
        }
        Ok(available as usize)
    }

    /// Wait until the socket is readable. False means the wait timed
    /// out.
    pub fn wait_for_data_ready(&self, timeout: Option<Duration>) -> Result<bool> {
        let (readable, _, _) = select_single(self.handle(), true, false, false, timeout)?;
        Ok(readable)
    }

    /// Wait until the socket is writable. A socket whose read side
    /// fires during the wait (the peer dropped it) reports ready too, so
    /// the caller's send surfaces the real error.
    pub fn wait_for_send_ready(&self, timeout: Option<Duration>) -> Result<bool> {
        let (readable, writable, _) = select_single(self.handle(), true, true, false, timeout)?;
        Ok(readable || writable)
    }

    /// Wait for an in-flight connect to finish. False means the wait
    /// timed out and the connect is still going.
    pub fn wait_for_connect_ready(&self, timeout: Option<Duration>) -> Result<bool> {
        let (_, writable, _) = select_single(self.handle(), false, true, false, timeout)?;
        Ok(writable)
    }

    /// One-socket readiness query across all three states.
    pub fn query_sel_status(&self, timeout: Option<Duration>) -> Result<(bool, bool, bool)> {
        select_single(self.handle(), true, true, true, timeout)
    }

    // -----------------------------------------------------------------
    // Options
    // -----------------------------------------------------------------

    /// Read a boolean socket option.
    pub fn get_bool_opt(&self, opt: BoolSockOpt) -> Result<bool> {
        let (level, name, negate) = bool_opt_info(opt);
        let value = getsockopt_int(self.handle(), level, name)?;
        let mut on = value != 0;
        if negate {
            on = !on;
        }
        Ok(on)
    }

    /// Set a boolean socket option.
    pub fn set_bool_opt(&self, opt: BoolSockOpt, new_state: bool) -> Result<()> {
        let (level, name, negate) = bool_opt_info(opt);
        let state = if negate { !new_state } else { new_state };
        setsockopt_int(self.handle(), level, name, i32::from(state))
    }

    /// Read an integer socket option.
    pub fn get_int_opt(&self, opt: IntSockOpt) -> Result<i32> {
        let (level, name) = match opt {
            IntSockOpt::LastError => (libc::SOL_SOCKET, libc::SO_ERROR),
            IntSockOpt::MaxMsgSize => return Ok(MAX_DGRAM_MSG),
            IntSockOpt::ReceiveBuf => (libc::SOL_SOCKET, libc::SO_RCVBUF),
            IntSockOpt::SendBuf => (libc::SOL_SOCKET, libc::SO_SNDBUF),
            IntSockOpt::Ttl => (libc::IPPROTO_IP, libc::IP_TTL),
            IntSockOpt::TtlV6 => (libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS),
        };
        getsockopt_int(self.handle(), level, name)
    }

    /// Set an integer socket option. The read-only options refuse with
    /// [`ErrorKind::BadSockOpt`].
    pub fn set_int_opt(&self, opt: IntSockOpt, new_value: i32) -> Result<()> {
        let (level, name) = match opt {
            IntSockOpt::ReceiveBuf => (libc::SOL_SOCKET, libc::SO_RCVBUF),
            IntSockOpt::SendBuf => (libc::SOL_SOCKET, libc::SO_SNDBUF),
            IntSockOpt::Ttl => (libc::IPPROTO_IP, libc::IP_TTL),
            IntSockOpt::TtlV6 => (libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS),
            IntSockOpt::LastError | IntSockOpt::MaxMsgSize => {
                return Err(set_last_kernel_error(ErrorKind::BadSockOpt, 0));
            }
        };
        setsockopt_int(self.handle(), level, name, new_value)
    }

    /// Restrict an IPv6 socket to IPv6 traffic only. Listeners use this
    /// so a v4 and a v6 socket can share one port on hosts without a
    /// dual-mode stack.
    pub fn set_v6_only(&self, on: bool) -> Result<()> {
        self.inner.set_only_v6(on).map_err(map_io_error)
    }

    /// Turn lingering close on or off.
    pub fn set_linger(&self, on: bool, seconds: u16) -> Result<()> {
        let linger = on.then(|| Duration::from_secs(u64::from(seconds)));
        self.inner.set_linger(linger).map_err(map_io_error)
    }

    /// Whether lingering close is currently on.
    pub fn is_lingering(&self) -> Result<bool> {
        Ok(self.inner.linger().map_err(map_io_error)?.is_some())
    }

    // -----------------------------------------------------------------
    // Multicast
    // -----------------------------------------------------------------

    /// Join a multicast group on the given local interface. Both
    /// addresses must belong to this socket's family.
    pub fn join_multicast(&self, group: &IpAddress, interface: &IpAddress) -> Result<()> {
        match (group, interface) {
            (IpAddress::V4(group_bytes), IpAddress::V4(iface_bytes)) => {
                if self.family != AddrFamily::IpV4 {
                    return Err(set_last_kernel_error(ErrorKind::InvalidAddress, 0));
                }
                self.inner
                    .join_multicast_v4(&(*group_bytes).into(), &(*iface_bytes).into())
                    .map_err(map_io_error)
            }
            (IpAddress::V6 { bytes, .. }, IpAddress::V6 { scope_id, .. }) => {
                if self.family != AddrFamily::IpV6 {
                    return Err(set_last_kernel_error(ErrorKind::InvalidAddress, 0));
                }
                self.inner
                    .join_multicast_v6(&(*bytes).into(), *scope_id)
                    .map_err(map_io_error)
            }
            _ => Err(set_last_kernel_error(ErrorKind::InvalidAddress, 0)
                .with_detail("multicast group and interface families differ")),
        }
    }

    // -----------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------

    /// The local endpoint this socket is bound to.
    pub fn local_endpoint(&self) -> Result<IpEndpoint> {
        let addr = self.inner.local_addr().map_err(map_io_error)?;
        addr.as_socket()
            .map(IpEndpoint::from_std)
            .ok_or_else(|| set_last_kernel_error(ErrorKind::InvalidData, 0))
    }

    /// The remote endpoint of a connected socket.
    pub fn remote_endpoint(&self) -> Result<IpEndpoint> {
        let addr = self.inner.peer_addr().map_err(map_io_error)?;
        addr.as_socket()
            .map(IpEndpoint::from_std)
            .ok_or_else(|| set_last_kernel_error(ErrorKind::InvalidData, 0))
    }

    /// Close the socket. Dropping it does the same; this just reads
    /// better at call sites that close early.
    pub fn close(self) {}
}

// ---------------------------------------------------------------------------
// Multi-select
// ---------------------------------------------------------------------------

/// Poll many sockets for read readiness in one host call.
///
/// Every item's `flags` is rewritten: [`SelectFlags::READ`] where data
/// (or an accept) is waiting, empty where nothing changed. Returns how
/// many items changed; zero changes is not an error.
///
/// When `max_idle` is given, items whose `last_msg_time` is older than
/// now minus `max_idle` additionally get [`SelectFlags::MAX_IDLE`], so a
/// server can retire idle clients in the same pass.
pub fn multi_read_select(
    items: &mut [SelectItem<'_>],
    timeout: Option<Duration>,
    max_idle: Option<Duration>,
) -> Result<usize> {
    multi_select_impl(items, timeout, max_idle, false)
}

/// Poll many sockets for read, write and exception readiness in one
/// host call. Flag handling matches [`multi_read_select`].
pub fn multi_select(
    items: &mut [SelectItem<'_>],
    timeout: Option<Duration>,
    max_idle: Option<Duration>,
) -> Result<usize> {
    multi_select_impl(items, timeout, max_idle, true)
}

fn multi_select_impl(
    items: &mut [SelectItem<'_>],
    timeout: Option<Duration>,
    max_idle: Option<Duration>,
    all_states: bool,
) -> Result<usize> {
    if items.len() > MAX_SELECT {
        return Err(set_last_kernel_error(ErrorKind::TooMany, 0)
            .with_detail("too many sockets in one select"));
    }

    let mut read_set = new_fd_set();
    let mut write_set = new_fd_set();
    let mut except_set = new_fd_set();
    let mut highest: RawFd = -1;

    for item in items.iter() {
        let fd = item.socket.handle();
        check_selectable(fd)?;
        unsafe {
            libc::FD_SET(fd, &mut read_set);
            if all_states {
                libc::FD_SET(fd, &mut write_set);
                libc::FD_SET(fd, &mut except_set);
            }
        }
        highest = highest.max(fd);
    }

    let mut tv = timeout.map(to_timeval);
    let write_ptr = if all_states {
        &mut write_set as *mut libc::fd_set
    } else {
        std::ptr::null_mut()
    };
    let except_ptr = if all_states {
        &mut except_set as *mut libc::fd_set
    } else {
        std::ptr::null_mut()
    };
    let rc = unsafe {
        libc::select(
            highest + 1,
            &mut read_set,
            write_ptr,
            except_ptr,
            tv.as_mut().map_or(std::ptr::null_mut(), |tv| tv as *mut _),
        )
    };
    if rc < 0 {
        return Err(crate::error::set_last_os_error());
    }

    let mut changed = 0usize;
    for item in items.iter_mut() {
        let fd = item.socket.handle();
        let mut flags = SelectFlags::empty();
        if rc > 0 {
            unsafe {
                if libc::FD_ISSET(fd, &mut read_set) {
                    flags |= SelectFlags::READ;
                }
                if all_states && libc::FD_ISSET(fd, &mut write_set) {
                    flags |= SelectFlags::WRITE;
                }
                if all_states && libc::FD_ISSET(fd, &mut except_set) {
                    flags |= SelectFlags::EXCEPT;
                }
            }
        }
        item.flags = flags;
    }

    // Idle sweep: a pure computation over the caller's stamps
    if let Some(max_idle) = max_idle {
        for item in items.iter_mut() {
            if item.last_msg_time.elapsed() > max_idle {
                item.flags |= SelectFlags::MAX_IDLE;
            }
        }
    }

    for item in items.iter() {
        if !item.flags.is_empty() {
            changed += 1;
        }
    }
    Ok(changed)
}

// ---------------------------------------------------------------------------
// Host plumbing
// ---------------------------------------------------------------------------

pub(crate) fn map_io_error(err: std::io::Error) -> crate::KernelError {
    match err.raw_os_error() {
        Some(host) => set_last_host_error(host),
        None => set_last_kernel_error(ErrorKind::GenFailure, 0),
    }
}

fn new_fd_set() -> libc::fd_set {
    let mut set = mem::MaybeUninit::<libc::fd_set>::zeroed();
    unsafe {
        libc::FD_ZERO(set.as_mut_ptr());
        set.assume_init()
    }
}

fn check_selectable(fd: RawFd) -> Result<()> {
    if fd < 0 || fd >= libc::FD_SETSIZE as RawFd {
        return Err(set_last_kernel_error(ErrorKind::InvalidHandle, i64::from(fd)));
    }
    Ok(())
}

fn to_timeval(wait: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: wait.as_secs() as libc::time_t,
        tv_usec: wait.subsec_micros() as libc::suseconds_t,
    }
}

fn remaining_time(deadline: Option<Instant>) -> Option<Option<Duration>> {
    match deadline {
        None => Some(None),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                None
            } else {
                Some(Some(deadline - now))
            }
        }
    }
}

fn select_single(
    fd: RawFd,
    read: bool,
    write: bool,
    except: bool,
    timeout: Option<Duration>,
) -> Result<(bool, bool, bool)> {
    check_selectable(fd)?;

    let mut read_set = new_fd_set();
    let mut write_set = new_fd_set();
    let mut except_set = new_fd_set();
    unsafe {
        if read {
            libc::FD_SET(fd, &mut read_set);
        }
        if write {
            libc::FD_SET(fd, &mut write_set);
        }
        if except {
            libc::FD_SET(fd, &mut except_set);
        }
    }

    let mut tv = timeout.map(to_timeval);
    let read_ptr = if read {
        &mut read_set as *mut libc::fd_set
    } else {
        std::ptr::null_mut()
    };
    let write_ptr = if write {
        &mut write_set as *mut libc::fd_set
    } else {
        std::ptr::null_mut()
    };
    let except_ptr = if except {
        &mut except_set as *mut libc::fd_set
    } else {
        std::ptr::null_mut()
    };
    let rc = unsafe {
        libc::select(
            fd + 1,
            read_ptr,
            write_ptr,
            except_ptr,
            tv.as_mut().map_or(std::ptr::null_mut(), |tv| tv as *mut _),
        )
    };
    if rc < 0 {
        return Err(crate::error::set_last_os_error());
    }
    if rc == 0 {
        return Ok((false, false, false));
    }

    unsafe {
        Ok((
            read && libc::FD_ISSET(fd, &mut read_set),
            write && libc::FD_ISSET(fd, &mut write_set),
            except && libc::FD_ISSET(fd, &mut except_set),
        ))
    }
}

fn getsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int) -> Result<i32> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            (&mut value as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(crate::error::set_last_os_error());
    }
    if len as usize != mem::size_of::<libc::c_int>() {
        return Err(set_last_kernel_error(ErrorKind::InvalidData, 0)
            .with_detail("unexpected socket option size"));
    }
    Ok(value)
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int, value: i32) -> Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (&value as *const libc::c_int).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(crate::error::set_last_os_error());
    }
    Ok(())
}

fn bool_opt_info(opt: BoolSockOpt) -> (libc::c_int, libc::c_int, bool) {
    match opt {
        BoolSockOpt::AllowBroadcast => (libc::SOL_SOCKET, libc::SO_BROADCAST, false),
        BoolSockOpt::DontRoute => (libc::SOL_SOCKET, libc::SO_DONTROUTE, false),
        BoolSockOpt::KeepAlive => (libc::SOL_SOCKET, libc::SO_KEEPALIVE, false),
        BoolSockOpt::Nagle => (libc::IPPROTO_TCP, libc::TCP_NODELAY, true),
        BoolSockOpt::ReuseAddr => (libc::SOL_SOCKET, libc::SO_REUSEADDR, false),
    }
}

fn endpoint_from_storage(storage: &libc::sockaddr_storage) -> Option<IpEndpoint> {
    match libc::c_int::from(storage.ss_family) {
        libc::AF_INET => {
            let v4 = unsafe { &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in>() };
            let bytes = v4.sin_addr.s_addr.to_ne_bytes();
            Some(IpEndpoint::new(
                IpAddress::V4(bytes),
                u16::from_be(v4.sin_port),
            ))
        }
        libc::AF_INET6 => {
            let v6 = unsafe { &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in6>() };
            Some(IpEndpoint::new(
                IpAddress::V6 {
                    bytes: v6.sin6_addr.s6_addr,
                    scope_id: v6.sin6_scope_id,
                },
                u16::from_be(v6.sin6_port),
            ))
        }
        _ => None,
    }
}
