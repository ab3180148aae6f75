//! MultiOS Host Abstraction Kernel
//!
//! A portable operating-system abstraction layer for MultiOS applications.
//! It hides per-host differences behind one set of capability-oriented
//! services so that the higher framework layers never talk to the host OS
//! directly.
//!
//! # Architecture Overview
//!
//! ```text
//! +---------------------------------------------+
//! |        Application Framework Layers         |
//! +---------------------------------------------+
//! |  Listener Engine  |  Locale  |  Stack Dump  |
//! +---------------------------------------------+
//! |  Sockets / Addresses  |  Paths  |  Resources|
//! +---------------------------------------------+
//! |  Errors | Sync | Per-Thread | Time | Memory |
//! +---------------------------------------------+
//! |              Host Operating System          |
//! +---------------------------------------------+
//! ```
//!
//! # Features
//!
//! - **Per-thread error channel**: every fallible call records a kernel
//!   error code plus the raw host error on the calling thread
//! - **Synchronization**: recursive critical sections and linearizable
//!   safe counters
//! - **Per-thread data**: dynamically allocated per-thread slots with
//!   cleanup on thread exit
//! - **Sockets**: stream and datagram sockets over IPv4/IPv6 with timed
//!   blocking, non-blocking connect, and multi-socket readiness polling
//! - **Listener engine**: dual-port accept threads feeding a bounded
//!   connection queue
//! - **Host services**: locale cache, path decomposition, resource
//!   naming, time stamps, raw memory and hashing
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use multios_oskit::prelude::*;
//!
//! fn main() -> multios_oskit::Result<()> {
//!     multios_oskit::initialize()?;
//!
//!     let target = IpEndpoint::parse("127.0.0.1:8080", AddrFamily::IpV4)?;
//!     let mut sock = Socket::create(
//!         SocketKind::Stream,
//!         SockProtocol::Tcp,
//!         AddrFamily::IpV4,
//!     )?;
//!     sock.connect(&target, Some(std::time::Duration::from_secs(5)))?;
//!     sock.send(b"Hello, MultiOS!")?;
//!
//!     multios_oskit::shutdown()?;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod error;
pub mod locale;
pub mod net;
pub mod pathstr;
pub mod perthread;
pub mod prelude;
pub mod rawmem;
pub mod resource;
pub mod stackdump;
pub mod sync;
pub mod time;

/// Kernel error codes exported to callers.
///
/// This is the closed taxonomy every host failure is translated into. The
/// raw host error number is preserved next to it in [`KernelError`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("no error")]
    NoError,

    #[error("file not found")]
    FileNotFound,

    #[error("path not found")]
    PathNotFound,

    #[error("access denied")]
    AccessDenied,

    #[error("invalid handle")]
    InvalidHandle,

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid format")]
    InvalidFormat,

    #[error("invalid data")]
    InvalidData,

    #[error("invalid arguments")]
    InvalidArguments,

    #[error("buffer overflow")]
    BufferOverflow,

    #[error("insufficient buffer")]
    InsufficientBuffer,

    #[error("operation timed out")]
    Timeout,

    #[error("not supported")]
    NotSupported,

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("negative result")]
    NegativeResult,

    #[error("possible deadlock")]
    PossibleDeadlock,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("connection aborted")]
    ConnectionAborted,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("host unreachable")]
    HostUnreachable,

    #[error("network is down")]
    NetworkDown,

    #[error("not connected")]
    NotConnected,

    #[error("operation interrupted")]
    Interrupted,

    #[error("operation would block")]
    WouldBlock,

    #[error("resource full")]
    Full,

    #[error("too many")]
    TooMany,

    #[error("invalid address")]
    InvalidAddress,

    #[error("invalid address string")]
    InvalidAddrString,

    #[error("unknown protocol")]
    UnknownProtocol,

    #[error("bad socket option")]
    BadSockOpt,

    #[error("invalid drive")]
    InvalidDrive,

    #[error("not ready")]
    NotReady,

    #[error("general failure")]
    GenFailure,

    #[error("untranslated host error")]
    HostError,
}

/// A kernel error: the translated kernel code plus the raw host error
/// number that produced it, and an optional detail string.
///
/// One of these is also kept per thread as the "last error" and updated
/// by every failing kernel call. See [`error::last_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelError {
    kind: ErrorKind,
    host_code: i64,
    detail: Option<String>,
}

impl KernelError {
    /// Create an error with no associated host error code.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            host_code: 0,
            detail: None,
        }
    }

    /// Create an error that carries the raw host error code.
    pub fn with_host(kind: ErrorKind, host_code: i64) -> Self {
        Self {
            kind,
            host_code,
            detail: None,
        }
    }

    /// Attach a detail string to this error.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The kernel error code.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The raw host error number, or 0 when there is none.
    pub fn host_code(&self) -> i64 {
        self.host_code
    }

    /// The optional detail text.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// True if this error is of the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl Default for KernelError {
    fn default() -> Self {
        Self::new(ErrorKind::NoError)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.host_code != 0 {
            write!(f, " (host error {})", self.host_code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for KernelError {}

impl From<ErrorKind> for KernelError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Version information
pub const VERSION: &str = "1.0.0";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the host abstraction kernel.
///
/// This must be called before using the locale cache, the stack dump
/// writer, or the network layer. Subsystems are brought up leaves-first:
/// error registry, synchronization, per-thread data, stack dump, locale,
/// network, high-performance timer. Calling it twice is an error.
pub fn initialize() -> Result<()> {
    let _guard = sync::base_lock().enter();

    if INITIALIZED.load(Ordering::Acquire) {
        return Err(KernelError::new(ErrorKind::AlreadyExists)
            .with_detail("host abstraction kernel already initialized"));
    }

    log::info!("Initializing MultiOS host abstraction kernel v{VERSION}");

    error::initialize()?;
    sync::initialize()?;
    perthread::initialize()?;
    stackdump::initialize()?;
    locale::initialize()?;
    net::initialize()?;
    time::initialize()?;

    INITIALIZED.store(true, Ordering::Release);
    log::info!("Host abstraction kernel initialized");
    Ok(())
}

/// Shut down the host abstraction kernel.
///
/// Subsystems are taken down in the reverse of the initialization order.
pub fn shutdown() -> Result<()> {
    let _guard = sync::base_lock().enter();

    if !INITIALIZED.load(Ordering::Acquire) {
        return Err(KernelError::new(ErrorKind::NotReady)
            .with_detail("host abstraction kernel not initialized"));
    }

    time::shutdown()?;
    net::shutdown()?;
    locale::shutdown()?;
    stackdump::shutdown()?;
    perthread::shutdown()?;
    sync::shutdown()?;
    error::shutdown()?;

    INITIALIZED.store(false, Ordering::Release);
    log::info!("Host abstraction kernel shut down");
    Ok(())
}

/// Whether [`initialize`] has completed successfully.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}
