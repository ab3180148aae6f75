//! Per-thread error channel and host error translation
//!
//! Every thread of the process owns one [`KernelError`] cell which is
//! faulted in on first access and updated by each failing kernel call.
//! Raw host error numbers are translated into the closed [`ErrorKind`]
//! taxonomy through a sorted table searched with a binary search; a host
//! error with no entry translates to [`ErrorKind::HostError`].

use std::cell::RefCell;

use crate::{ErrorKind, KernelError, Result};

/// Host error translation table.
///
/// Entries MUST be in ascending order of the host error number, because a
/// binary search is used to find the kernel code that maps to it. Debug
/// builds verify the ordering during [`initialize`].
#[cfg(unix)]
const HOST_ERROR_MAP: &[(i32, ErrorKind)] = &[
    (libc::EPERM, ErrorKind::AccessDenied),
    (libc::ENOENT, ErrorKind::FileNotFound),
    (libc::ESRCH, ErrorKind::NotFound),
    (libc::EINTR, ErrorKind::Interrupted),
    (libc::EIO, ErrorKind::GenFailure),
    (libc::ENXIO, ErrorKind::NotFound),
    (libc::E2BIG, ErrorKind::InvalidArguments),
    (libc::ENOEXEC, ErrorKind::InvalidFormat),
    (libc::EBADF, ErrorKind::InvalidHandle),
    (libc::ECHILD, ErrorKind::NotFound),
    (libc::EAGAIN, ErrorKind::WouldBlock),
    (libc::ENOMEM, ErrorKind::OutOfMemory),
    (libc::EACCES, ErrorKind::AccessDenied),
    (libc::EFAULT, ErrorKind::InvalidAddress),
    (libc::ENOTBLK, ErrorKind::InvalidArguments),
    (libc::EBUSY, ErrorKind::NotReady),
    (libc::EEXIST, ErrorKind::AlreadyExists),
    (libc::EXDEV, ErrorKind::NotSupported),
    (libc::ENODEV, ErrorKind::NotFound),
    (libc::ENOTDIR, ErrorKind::PathNotFound),
    (libc::EISDIR, ErrorKind::GenFailure),
    (libc::EINVAL, ErrorKind::InvalidArguments),
    (libc::ENFILE, ErrorKind::TooMany),
    (libc::EMFILE, ErrorKind::TooMany),
    (libc::ENOTTY, ErrorKind::InvalidHandle),
    (libc::ETXTBSY, ErrorKind::AccessDenied),
    (libc::EFBIG, ErrorKind::InsufficientBuffer),
    (libc::ENOSPC, ErrorKind::Full),
    (libc::ESPIPE, ErrorKind::GenFailure),
    (libc::EROFS, ErrorKind::AccessDenied),
    (libc::EMLINK, ErrorKind::TooMany),
    (libc::EPIPE, ErrorKind::NotConnected),
    (libc::EDOM, ErrorKind::InvalidArguments),
    (libc::ERANGE, ErrorKind::InvalidData),
    (libc::EDEADLK, ErrorKind::PossibleDeadlock),
    (libc::ENAMETOOLONG, ErrorKind::InsufficientBuffer),
    (libc::ENOLCK, ErrorKind::AccessDenied),
    (libc::ENOSYS, ErrorKind::NotSupported),
    (libc::ENOTEMPTY, ErrorKind::GenFailure),
    (libc::ELOOP, ErrorKind::TooMany),
    (libc::ENOMSG, ErrorKind::NotFound),
    (libc::EIDRM, ErrorKind::InvalidHandle),
    (libc::EILSEQ, ErrorKind::InvalidFormat),
    (libc::EUSERS, ErrorKind::TooMany),
    (libc::ENOTSOCK, ErrorKind::InvalidHandle),
    (libc::EDESTADDRREQ, ErrorKind::InvalidAddress),
    (libc::EMSGSIZE, ErrorKind::InvalidData),
    (libc::EPROTOTYPE, ErrorKind::UnknownProtocol),
    (libc::ENOPROTOOPT, ErrorKind::BadSockOpt),
    (libc::EPROTONOSUPPORT, ErrorKind::UnknownProtocol),
    (libc::ESOCKTNOSUPPORT, ErrorKind::NotSupported),
    (libc::EOPNOTSUPP, ErrorKind::NotSupported),
    (libc::EPFNOSUPPORT, ErrorKind::NotSupported),
    (libc::EAFNOSUPPORT, ErrorKind::InvalidAddress),
    (libc::EADDRINUSE, ErrorKind::InvalidAddress),
    (libc::EADDRNOTAVAIL, ErrorKind::InvalidAddress),
    (libc::ENETDOWN, ErrorKind::NetworkDown),
    (libc::ENETUNREACH, ErrorKind::NetworkDown),
    (libc::ENETRESET, ErrorKind::ConnectionReset),
    (libc::ECONNABORTED, ErrorKind::ConnectionAborted),
    (libc::ECONNRESET, ErrorKind::ConnectionReset),
    (libc::ENOBUFS, ErrorKind::InsufficientBuffer),
    (libc::EISCONN, ErrorKind::AlreadyExists),
    (libc::ENOTCONN, ErrorKind::NotConnected),
    (libc::ESHUTDOWN, ErrorKind::NotConnected),
    (libc::ETOOMANYREFS, ErrorKind::TooMany),
    (libc::ETIMEDOUT, ErrorKind::Timeout),
    (libc::ECONNREFUSED, ErrorKind::ConnectionRefused),
    (libc::EHOSTDOWN, ErrorKind::HostUnreachable),
    (libc::EHOSTUNREACH, ErrorKind::HostUnreachable),
    (libc::EALREADY, ErrorKind::WouldBlock),
    (libc::EINPROGRESS, ErrorKind::WouldBlock),
    (libc::ESTALE, ErrorKind::GenFailure),
    (libc::EDQUOT, ErrorKind::GenFailure),
];

thread_local! {
    // The last-error cell for the calling thread, faulted in on first use.
    static LAST_ERROR: RefCell<KernelError> = RefCell::new(KernelError::default());
}

/// Get a copy of the calling thread's last error.
///
/// A thread that has never recorded an error observes the default error,
/// whose kind is [`ErrorKind::NoError`].
pub fn last_error() -> KernelError {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

/// Reset the calling thread's last error to the no-error state.
pub fn clear_last_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = KernelError::default());
}

/// Record the given error as the calling thread's last error.
pub fn set_last_error(err: &KernelError) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = err.clone());
}

/// Record a kernel error code, with an optional host error, as the calling
/// thread's last error. Returns the recorded error so call sites can
/// propagate it directly.
pub fn set_last_kernel_error(kind: ErrorKind, host_code: i64) -> KernelError {
    let err = KernelError::with_host(kind, host_code);
    set_last_error(&err);
    err
}

/// Translate a host error number, record it as the calling thread's last
/// error, and return the translated error.
pub fn set_last_host_error(host_code: i32) -> KernelError {
    let err = KernelError::with_host(map_host_error(host_code), i64::from(host_code));
    set_last_error(&err);
    err
}

/// Build (but do not record) the kernel error for a host error number.
pub fn host_error(host_code: i32) -> KernelError {
    KernelError::with_host(map_host_error(host_code), i64::from(host_code))
}

/// Map a host error number to its kernel error code. An unmapped host
/// error yields [`ErrorKind::HostError`].
pub fn map_host_error(host_code: i32) -> ErrorKind {
    let mut begin = 0usize;
    let mut end = HOST_ERROR_MAP.len();

    while begin < end {
        let mid = (begin + end) / 2;
        let (host, kind) = HOST_ERROR_MAP[mid];
        if host == host_code {
            return kind;
        }
        if host_code < host {
            end = mid;
        } else {
            begin = mid + 1;
        }
    }
    ErrorKind::HostError
}

/// Translate the errno left behind by the most recent libc call, record
/// it, and return the translated error.
#[cfg(unix)]
pub(crate) fn set_last_os_error() -> KernelError {
    let host = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    set_last_host_error(host)
}

/// Initialize the error subsystem.
///
/// Debug builds verify that the host error map really is in ascending
/// order; the binary search depends on it, so a violation is fatal to
/// initialization.
pub(crate) fn initialize() -> Result<()> {
    if cfg!(debug_assertions) {
        for pair in HOST_ERROR_MAP.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(KernelError::new(ErrorKind::InvalidData).with_detail(format!(
                    "host error map out of order at host code {}",
                    pair[1].0
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn shutdown() -> Result<()> {
    Ok(())
}
