//! Commonly used kernel types, re-exported for a one-line import.

pub use crate::error::{clear_last_error, last_error};
pub use crate::locale::{Language, LocaleInfo, MeasureSystem};
pub use crate::net::{
    multi_read_select, multi_select, resolve_addr, resolve_host_name, AddrFamily, BoolSockOpt,
    IntSockOpt, IpAddress, IpEndpoint, LengConn, ListenerEngine, RecvMode, SelectFlags,
    SelectItem, ShutdownMode, SockProtocol, Socket, SocketKind, SocketListener,
};
pub use crate::pathstr::PathPart;
pub use crate::perthread::PerThreadSlot;
pub use crate::resource::{ResourceKind, ResourceName};
pub use crate::sync::{CritSec, SafeCard32Counter, SafeInt32Counter};
pub use crate::time::{Month, TimeStamp, Weekday};
pub use crate::{ErrorKind, KernelError, Result};
