//! Per-boot MQTT client identity: `<base><last 3 hardware-id bytes as hex>`.

use std::fmt;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

/// MQTT 3.1 servers are only required to accept client ids this long.
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Hex digits appended to the base.
pub const SUFFIX_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Hardware identifier
// ---------------------------------------------------------------------------

/// Six-byte MAC-style hardware identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareId(pub [u8; 6]);

impl HardwareId {
    /// Parse `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or `AABBCCDDEEFF`.
    pub fn parse(s: &str) -> Result<Self> {
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid hardware id {s:?} (expected 6 hex bytes)");
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| anyhow!("invalid hardware id {s:?}: {e}"))?;
        }
        Ok(Self(bytes))
    }

    /// Read the MAC of `iface`, or of the first non-loopback interface with a
    /// non-zero address when `iface` is `None`.
    pub fn discover(sysfs_net: &Path, iface: Option<&str>) -> Result<Self> {
        if let Some(name) = iface {
            return Self::read_address(&sysfs_net.join(name).join("address"))
                .with_context(|| format!("no hardware id for interface {name}"));
        }

        let mut names: Vec<String> = std::fs::read_dir(sysfs_net)
            .with_context(|| format!("failed to list {}", sysfs_net.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n != "lo")
            .collect();
        names.sort();

        for name in &names {
            if let Ok(id) = Self::read_address(&sysfs_net.join(name).join("address")) {
                if id.0 != [0; 6] {
                    tracing::debug!(iface = %name, "hardware id discovered");
                    return Ok(id);
                }
            }
        }
        bail!("no network interface with a hardware address found");
    }

    fn read_address(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&raw)
    }

    /// Upper-case hex of the last three bytes.
    pub fn suffix(&self) -> String {
        let [.., a, b, c] = self.0;
        format!("{a:02X}{b:02X}{c:02X}")
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

// ---------------------------------------------------------------------------
// Session identity
// ---------------------------------------------------------------------------

/// Client identity presented to the broker.  Never changes after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    pub fn derive(base: &str, hw: &HardwareId) -> Self {
        Self(format!("{base}{}", hw.suffix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
