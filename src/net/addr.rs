//! IP addresses and endpoints
//!
//! [`IpAddress`] is the comparable value: family plus binary address
//! bytes (plus the scope for IPv6). Host names are deliberately not part
//! of it; different names can point at the same machine and only the
//! binary address decides equality. Code that wants a display name calls
//! [`resolve_host_name`] on demand and pays for the reverse lookup then.
//!
//! Endpoint text follows the usual conventions: `host:port` for IPv4 and
//! DNS names, `[literal]:port` for IPv6 literals.

use std::fmt;
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs,
};

use crate::error::set_last_kernel_error;
use crate::{ErrorKind, Result};

/// Preferred address family for creation and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    /// Let the host pick whatever family it prefers.
    Unspec,
    IpV4,
    IpV6,
}

/// A family-agnostic IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IpAddress {
    /// No address at all, distinct from the family wildcards.
    Unspecified,
    V4([u8; 4]),
    V6 { bytes: [u8; 16], scope_id: u32 },
}

impl IpAddress {
    /// The wildcard (ANY) address of a family. `Unspec` yields the
    /// IPv4 wildcard.
    pub fn any(family: AddrFamily) -> Self {
        match family {
            AddrFamily::IpV6 => IpAddress::V6 {
                bytes: [0; 16],
                scope_id: 0,
            },
            _ => IpAddress::V4([0; 4]),
        }
    }

    /// The loopback address of a family. `Unspec` yields the IPv4
    /// loopback.
    pub fn loopback(family: AddrFamily) -> Self {
        match family {
            AddrFamily::IpV6 => IpAddress::V6 {
                bytes: Ipv6Addr::LOCALHOST.octets(),
                scope_id: 0,
            },
            _ => IpAddress::V4([127, 0, 0, 1]),
        }
    }

    /// The family this address belongs to.
    pub fn family(&self) -> AddrFamily {
        match self {
            IpAddress::Unspecified => AddrFamily::Unspec,
            IpAddress::V4(_) => AddrFamily::IpV4,
            IpAddress::V6 { .. } => AddrFamily::IpV6,
        }
    }

    /// Whether this is a loopback address.
    pub fn is_loopback(&self) -> bool {
        match self.to_std() {
            Some(addr) => addr.is_loopback(),
            None => false,
        }
    }

    /// Whether this is a family wildcard (ANY) address.
    pub fn is_any(&self) -> bool {
        match self.to_std() {
            Some(addr) => addr.is_unspecified(),
            None => false,
        }
    }

    /// Adopt a standard library address.
    pub fn from_std(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => IpAddress::V4(v4.octets()),
            IpAddr::V6(v6) => IpAddress::V6 {
                bytes: v6.octets(),
                scope_id: 0,
            },
        }
    }

    /// The standard library form; `None` for [`IpAddress::Unspecified`].
    pub fn to_std(&self) -> Option<IpAddr> {
        match self {
            IpAddress::Unspecified => None,
            IpAddress::V4(bytes) => Some(IpAddr::V4(Ipv4Addr::from(*bytes))),
            IpAddress::V6 { bytes, .. } => Some(IpAddr::V6(Ipv6Addr::from(*bytes))),
        }
    }

    /// The IPv6 scope id, zero for everything else.
    pub fn scope_id(&self) -> u32 {
        match self {
            IpAddress::V6 { scope_id, .. } => *scope_id,
            _ => 0,
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::Unspecified => write!(f, "<unspec>"),
            IpAddress::V4(bytes) => write!(f, "{}", Ipv4Addr::from(*bytes)),
            IpAddress::V6 { bytes, scope_id } => {
                write!(f, "{}", Ipv6Addr::from(*bytes))?;
                if *scope_id != 0 {
                    write!(f, "%{scope_id}")?;
                }
                Ok(())
            }
        }
    }
}

fn family_matches(addr: &IpAddr, family: AddrFamily) -> bool {
    match family {
        AddrFamily::Unspec => true,
        AddrFamily::IpV4 => addr.is_ipv4(),
        AddrFamily::IpV6 => addr.is_ipv6(),
    }
}

/// Parse a numeric address literal, honoring the family preference and
/// an optional `%scope` suffix on IPv6 literals.
fn parse_literal(text: &str, family: AddrFamily) -> Option<IpAddress> {
    let (body, scope_id) = match text.split_once('%') {
        Some((body, scope)) => (body, scope.parse::<u32>().ok()?),
        None => (text, 0),
    };

    let parsed: IpAddr = body.parse().ok()?;
    if !family_matches(&parsed, family) {
        return None;
    }

    Some(match parsed {
        IpAddr::V4(v4) => IpAddress::V4(v4.octets()),
        IpAddr::V6(v6) => IpAddress::V6 {
            bytes: v6.octets(),
            scope_id,
        },
    })
}

/// Resolve a textual address: numeric literals directly, anything else
/// through the system resolver, keeping the first result of the
/// preferred family.
pub fn resolve_addr(text: &str, family: AddrFamily) -> Result<IpAddress> {
    if text.is_empty() {
        return Err(set_last_kernel_error(ErrorKind::InvalidAddrString, 0)
            .with_detail("empty address string"));
    }

    if let Some(address) = parse_literal(text, family) {
        return Ok(address);
    }

    // Not a literal of the right family, so ask the resolver. Port zero
    // is a placeholder; only the addresses matter here.
    let candidates = (text, 0u16).to_socket_addrs().map_err(|err| {
        let host = err.raw_os_error().unwrap_or(0);
        set_last_kernel_error(ErrorKind::NotFound, i64::from(host))
            .with_detail(format!("cannot resolve '{text}'"))
    })?;

    for candidate in candidates {
        let ip = candidate.ip();
        if family_matches(&ip, family) {
            let mut resolved = IpAddress::from_std(ip);
            if let (IpAddress::V6 { scope_id, .. }, SocketAddr::V6(v6)) =
                (&mut resolved, candidate)
            {
                *scope_id = v6.scope_id();
            }
            return Ok(resolved);
        }
    }

    Err(set_last_kernel_error(ErrorKind::NotFound, 0)
        .with_detail(format!("no {family:?} address for '{text}'")))
}

/// Reverse-resolve an address to a host name.
///
/// Returns `None` when the resolver has no name for it (or the address
/// is unspecified); the caller decides whether to fall back to
/// [`host_name_or_text`] or treat that as an error.
#[cfg(unix)]
pub fn resolve_host_name(address: &IpAddress) -> Option<String> {
    let std_addr = SocketAddr::new(address.to_std()?, 0);
    let raw = socket2::SockAddr::from(std_addr);

    let mut host = [0 as libc::c_char; libc::NI_MAXHOST as usize];
    let rc = unsafe {
        libc::getnameinfo(
            raw.as_ptr(),
            raw.len(),
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        return None;
    }

    let name = unsafe { std::ffi::CStr::from_ptr(host.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

/// The host name for an address, falling back to its text form when
/// reverse resolution finds nothing.
pub fn host_name_or_text(address: &IpAddress) -> String {
    #[cfg(unix)]
    if let Some(name) = resolve_host_name(address) {
        return name;
    }
    address.to_string()
}

/// This machine's host name.
#[cfg(unix)]
pub fn local_host_name() -> Result<String> {
    let mut buf = [0 as libc::c_char; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(crate::error::set_last_os_error());
    }
    let name = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

/// An IP address together with a port number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpEndpoint {
    pub addr: IpAddress,
    pub port: u16,
}

impl IpEndpoint {
    pub fn new(addr: IpAddress, port: u16) -> Self {
        Self { addr, port }
    }

    /// Parse `host:port` or `[v6-literal]:port`, resolving DNS names
    /// with the given family preference.
    pub fn parse(text: &str, family: AddrFamily) -> Result<Self> {
        let (host, port_text) = if let Some(rest) = text.strip_prefix('[') {
            // Bracketed IPv6 literal
            let close = rest.find(']').ok_or_else(|| {
                set_last_kernel_error(ErrorKind::InvalidAddrString, 0)
                    .with_detail("unterminated '[' in endpoint")
            })?;
            let port = rest[close + 1..].strip_prefix(':').ok_or_else(|| {
                set_last_kernel_error(ErrorKind::InvalidAddrString, 0)
                    .with_detail("missing port after ']'")
            })?;
            (&rest[..close], port)
        } else {
            text.rsplit_once(':').ok_or_else(|| {
                set_last_kernel_error(ErrorKind::InvalidAddrString, 0)
                    .with_detail("missing ':port' in endpoint")
            })?
        };

        let port: u16 = port_text.parse().map_err(|_| {
            set_last_kernel_error(ErrorKind::InvalidAddrString, 0)
                .with_detail(format!("bad port number '{port_text}'"))
        })?;

        Ok(Self {
            addr: resolve_addr(host, family)?,
            port,
        })
    }

    /// The standard library form; `None` when the address is
    /// unspecified.
    pub fn to_std(&self) -> Option<SocketAddr> {
        Some(match self.addr.to_std()? {
            IpAddr::V4(v4) => SocketAddr::V4(SocketAddrV4::new(v4, self.port)),
            IpAddr::V6(v6) => {
                SocketAddr::V6(SocketAddrV6::new(v6, self.port, 0, self.addr.scope_id()))
            }
        })
    }

    /// Adopt a standard library socket address.
    pub fn from_std(addr: SocketAddr) -> Self {
        let ip = match addr {
            SocketAddr::V4(v4) => IpAddress::V4(v4.ip().octets()),
            SocketAddr::V6(v6) => IpAddress::V6 {
                bytes: v6.ip().octets(),
                scope_id: v6.scope_id(),
            },
        };
        Self::new(ip, addr.port())
    }
}

impl fmt::Display for IpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.addr {
            IpAddress::V6 { .. } => write!(f, "[{}]:{}", self.addr, self.port),
            other => write!(f, "{}:{}", other, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_parsing() {
        let v4 = resolve_addr("192.0.2.1", AddrFamily::Unspec).unwrap();
        assert_eq!(v4, IpAddress::V4([192, 0, 2, 1]));
        assert_eq!(v4.family(), AddrFamily::IpV4);

        let v6 = resolve_addr("2001:db8::7", AddrFamily::Unspec).unwrap();
        assert_eq!(v6.family(), AddrFamily::IpV6);
        assert_eq!(v6.to_string(), "2001:db8::7");
    }

    #[test]
    fn test_scoped_v6_literal() {
        let scoped = resolve_addr("fe80::1%4", AddrFamily::IpV6).unwrap();
        assert_eq!(scoped.scope_id(), 4);
        assert_eq!(scoped.to_string(), "fe80::1%4");
    }

    #[test]
    fn test_family_preference_rejects_wrong_literal() {
        assert!(resolve_addr("192.0.2.1", AddrFamily::IpV6).is_err());
        assert!(resolve_addr("2001:db8::7", AddrFamily::IpV4).is_err());
    }

    #[test]
    fn test_empty_and_garbage_strings() {
        let err = resolve_addr("", AddrFamily::Unspec).unwrap_err();
        assert!(err.is(ErrorKind::InvalidAddrString));
        assert!(resolve_addr("no-such-host.invalid.", AddrFamily::Unspec).is_err());
    }

    #[test]
    fn test_localhost_resolves() {
        let addr = resolve_addr("localhost", AddrFamily::IpV4).unwrap();
        assert!(addr.is_loopback());
    }

    #[test]
    fn test_equality_is_binary_only() {
        // Two paths to the same bytes compare equal: the host name a
        // caller knows the machine by is never part of the value
        let direct = resolve_addr("10.0.0.1", AddrFamily::Unspec).unwrap();
        let parsed = IpAddress::V4([10, 0, 0, 1]);
        assert_eq!(direct, parsed);

        let alpha = IpEndpoint::new(direct, 80);
        let beta = IpEndpoint::new(parsed, 80);
        assert_eq!(alpha, beta);
        assert_ne!(alpha, IpEndpoint::new(IpAddress::V4([10, 0, 0, 1]), 81));
    }

    #[test]
    fn test_endpoint_text_forms() {
        let v4 = IpEndpoint::parse("192.0.2.9:8080", AddrFamily::Unspec).unwrap();
        assert_eq!(v4.to_string(), "192.0.2.9:8080");
        assert_eq!(v4.port, 8080);

        let v6 = IpEndpoint::parse("[2001:db8::7]:443", AddrFamily::Unspec).unwrap();
        assert_eq!(v6.to_string(), "[2001:db8::7]:443");
        assert_eq!(v6.port, 443);

        assert!(IpEndpoint::parse("192.0.2.9", AddrFamily::Unspec).is_err());
        assert!(IpEndpoint::parse("[2001:db8::7]443", AddrFamily::Unspec).is_err());
        assert!(IpEndpoint::parse("host:notaport", AddrFamily::Unspec).is_err());
    }

    #[test]
    fn test_std_round_trip() {
        let endpoint = IpEndpoint::parse("[2001:db8::7]:443", AddrFamily::Unspec).unwrap();
        let std_form = endpoint.to_std().unwrap();
        assert_eq!(IpEndpoint::from_std(std_form), endpoint);

        assert!(IpEndpoint::new(IpAddress::Unspecified, 1).to_std().is_none());
    }

    #[test]
    fn test_any_and_loopback() {
        assert!(IpAddress::any(AddrFamily::IpV4).is_any());
        assert!(IpAddress::any(AddrFamily::IpV6).is_any());
        assert!(IpAddress::loopback(AddrFamily::IpV4).is_loopback());
        assert!(IpAddress::loopback(AddrFamily::IpV6).is_loopback());
        assert!(!IpAddress::Unspecified.is_any());
    }

    #[cfg(unix)]
    #[test]
    fn test_loopback_reverse_resolution_falls_back() {
        let addr = IpAddress::V4([127, 0, 0, 1]);
        // Whatever the resolver says, the fallback form is never empty
        assert!(!host_name_or_text(&addr).is_empty());
    }
}
