//! Network services
//!
//! The socket layer of the kernel: family-agnostic addresses and
//! endpoints, stream/datagram sockets with timed blocking emulated over
//! readiness polls, multi-socket select, and the listener engine that
//! feeds accepted connections through a bounded queue.

pub mod addr;
pub mod listener;
pub mod socket;

pub use addr::{
    local_host_name, resolve_addr, resolve_host_name, AddrFamily, IpAddress, IpEndpoint,
};
pub use listener::{LengConn, ListenerEngine, SocketListener};
pub use socket::{
    multi_read_select, multi_select, BoolSockOpt, IntSockOpt, RecvMode, SelectFlags, SelectItem,
    ShutdownMode, SockProtocol, Socket, SocketKind,
};

use crate::Result;

/// Bring up the host network stack. The POSIX stack needs no explicit
/// start; this exists so the initialization driver owns the ordering on
/// every host.
pub(crate) fn initialize() -> Result<()> {
    log::debug!("Network layer ready");
    Ok(())
}

pub(crate) fn shutdown() -> Result<()> {
    Ok(())
}
