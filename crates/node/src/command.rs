use std::fmt;

/// Indicator state requested over the command topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedCommand {
    #[default]
    Off,
    Green,
    Blue,
    Red,
}

impl LedCommand {
    /// Decode a command payload.
    ///
    /// Only the exact tokens `11`, `12` and `13` select a colour.  Anything
    /// else (empty, padded, lower/upper case variants, binary junk) turns the
    /// indicator off, so every input resolves to a defined state.
    pub fn decode(payload: &[u8]) -> Self {
        match payload {
            b"11" => Self::Green,
            b"12" => Self::Blue,
            b"13" => Self::Red,
            _ => Self::Off,
        }
    }

    /// Channel levels as `(red, green, blue)`.
    pub fn rgb(self) -> (bool, bool, bool) {
        match self {
            Self::Off => (false, false, false),
            Self::Green => (false, true, false),
            Self::Blue => (false, false, true),
            Self::Red => (true, false, false),
        }
    }
}

impl fmt::Display for LedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Green => write!(f, "green"),
            Self::Blue => write!(f, "blue"),
            Self::Red => write!(f, "red"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
