//! Link-layer readiness.
//!
//! The session core never manages the link; it only asks whether the
//! transport is usable before starting a connect.

use std::path::{Path, PathBuf};

/// Root of the Linux network-interface sysfs tree.
pub const SYSFS_NET: &str = "/sys/class/net";

pub trait LinkLayer: Send + Sync {
    fn is_ready(&self) -> bool;
}

impl<T: LinkLayer + ?Sized> LinkLayer for Box<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Link that is always usable (no interface to watch).
pub struct AlwaysReady;

impl LinkLayer for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Link readiness from `/sys/class/net/<iface>/operstate`.
pub struct SysfsLink {
    operstate: PathBuf,
}

impl SysfsLink {
    pub fn new(iface: &str) -> Self {
        Self::under(Path::new(SYSFS_NET), iface)
    }

    pub(crate) fn under(root: &Path, iface: &str) -> Self {
        Self {
            operstate: root.join(iface).join("operstate"),
        }
    }
}

impl LinkLayer for SysfsLink {
    fn is_ready(&self) -> bool {
        match std::fs::read_to_string(&self.operstate) {
            // Virtual links (tun, some wifi drivers) report "unknown" while
            // carrying traffic.
            Ok(state) => matches!(state.trim(), "up" | "unknown"),
            Err(_) => false,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
