//! Shareable resource names
//!
//! An abstraction for the names of shareable resources (events, mutexes,
//! semaphores, shared memory). The three name parts keep resources from
//! different vendors and subsystems apart; the optional process id scopes
//! a name to one process. The formatted form is what actually gets handed
//! to the host when creating the named resource.

use std::fmt;

use crate::error::set_last_kernel_error;
use crate::{ErrorKind, Result};

/// Kinds of named shareable resources. The kind prefixes the formatted
/// name so resources of different kinds can never clash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Event,
    Memory,
    Mutex,
    Semaphore,
}

impl ResourceKind {
    fn prefix(self) -> &'static str {
        match self {
            ResourceKind::Event => "Event",
            ResourceKind::Memory => "Memory",
            ResourceKind::Mutex => "Mutex",
            ResourceKind::Semaphore => "Semaphore",
        }
    }
}

/// Longest formatted resource name the host accepts.
pub const MAX_RESOURCE_NAME_LEN: usize = 255;

/// A structured name for one shareable resource:
/// `(company, subsystem, resource)` plus an optional owning process id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    company: String,
    subsystem: String,
    resource: String,
    pid: Option<u32>,
}

impl ResourceName {
    /// A process-wide resource name.
    pub fn new(
        company: impl Into<String>,
        subsystem: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            company: company.into(),
            subsystem: subsystem.into(),
            resource: resource.into(),
            pid: None,
        }
    }

    /// A resource name scoped to the given process id.
    pub fn with_pid(
        company: impl Into<String>,
        subsystem: impl Into<String>,
        resource: impl Into<String>,
        pid: u32,
    ) -> Self {
        Self {
            pid: Some(pid),
            ..Self::new(company, subsystem, resource)
        }
    }

    /// Valid means all three name parts are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.company.is_empty() && !self.subsystem.is_empty() && !self.resource.is_empty()
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Replace all the name parts at once.
    pub fn set_name(
        &mut self,
        company: impl Into<String>,
        subsystem: impl Into<String>,
        resource: impl Into<String>,
        pid: Option<u32>,
    ) {
        self.company = company.into();
        self.subsystem = subsystem.into();
        self.resource = resource.into();
        self.pid = pid;
    }

    /// Compose the host-unique name for a resource of the given kind:
    /// `<Kind>.[<hex-pid>.]<company>.<subsystem>.<resource>`.
    ///
    /// An invalid name formats as the empty string. A composed name
    /// longer than [`MAX_RESOURCE_NAME_LEN`] fails with
    /// [`ErrorKind::InsufficientBuffer`].
    pub fn build_full_name(&self, kind: ResourceKind) -> Result<String> {
        if !self.is_valid() {
            return Ok(String::new());
        }

        let mut full = String::with_capacity(64);
        full.push_str(kind.prefix());
        full.push('.');

        if let Some(pid) = self.pid {
            full.push_str(&format!("{pid:X}"));
            full.push('.');
        }

        full.push_str(&self.company);
        full.push('.');
        full.push_str(&self.subsystem);
        full.push('.');
        full.push_str(&self.resource);

        if full.len() > MAX_RESOURCE_NAME_LEN {
            return Err(set_last_kernel_error(ErrorKind::InsufficientBuffer, 0)
                .with_detail("composed resource name exceeds the host limit"));
        }
        Ok(full)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.company, self.subsystem, self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_requires_all_parts() {
        assert!(ResourceName::new("MultiOS", "NetQ", "Listener").is_valid());
        assert!(!ResourceName::new("", "NetQ", "Listener").is_valid());
        assert!(!ResourceName::new("MultiOS", "", "Listener").is_valid());
        assert!(!ResourceName::new("MultiOS", "NetQ", "").is_valid());
    }

    #[test]
    fn test_full_name_without_pid() {
        let name = ResourceName::new("MultiOS", "NetQ", "Listener");
        assert_eq!(
            name.build_full_name(ResourceKind::Mutex).unwrap(),
            "Mutex.MultiOS.NetQ.Listener"
        );
        assert_eq!(
            name.build_full_name(ResourceKind::Event).unwrap(),
            "Event.MultiOS.NetQ.Listener"
        );
    }

    #[test]
    fn test_full_name_with_hex_pid() {
        let name = ResourceName::with_pid("MultiOS", "NetQ", "Listener", 0xBEEF);
        assert_eq!(
            name.build_full_name(ResourceKind::Semaphore).unwrap(),
            "Semaphore.BEEF.MultiOS.NetQ.Listener"
        );
        assert_eq!(
            name.build_full_name(ResourceKind::Memory).unwrap(),
            "Memory.BEEF.MultiOS.NetQ.Listener"
        );
    }

    #[test]
    fn test_invalid_name_formats_empty() {
        let name = ResourceName::new("", "", "");
        assert_eq!(name.build_full_name(ResourceKind::Event).unwrap(), "");
    }

    #[test]
    fn test_oversized_name_fails() {
        let long = "x".repeat(MAX_RESOURCE_NAME_LEN);
        let name = ResourceName::new(long, "Sub", "Rsc");
        let err = name.build_full_name(ResourceKind::Mutex).unwrap_err();
        assert!(err.is(ErrorKind::InsufficientBuffer));
    }

    #[test]
    fn test_equality_includes_pid() {
        let a = ResourceName::with_pid("C", "S", "R", 1);
        let b = ResourceName::with_pid("C", "S", "R", 1);
        let c = ResourceName::with_pid("C", "S", "R", 2);
        let d = ResourceName::new("C", "S", "R");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
