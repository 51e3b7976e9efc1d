//! Negotiated protocol versions

use std::fmt;

/// Protocol version reported by the engine after a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// SSL 3.0 (deprecated, rarely used)
    Ssl3,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
    /// Any name the engine reports that is not listed above
    Unsupported,
}

impl ProtocolVersion {
    /// Map an engine protocol name (case-insensitive, with or without the
    /// `v`, e.g. `TLSv1.3` or `TLS1.3`). Unknown names map to
    /// [`ProtocolVersion::Unsupported`].
    pub fn from_engine_name(name: &str) -> Self {
        match name.trim().to_uppercase().as_str() {
            "SSLV3" | "SSL3" | "SSL3.0" => ProtocolVersion::Ssl3,
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => ProtocolVersion::Tls10,
            "TLSV1.1" | "TLS1.1" => ProtocolVersion::Tls11,
            "TLSV1.2" | "TLS1.2" => ProtocolVersion::Tls12,
            "TLSV1.3" | "TLS1.3" => ProtocolVersion::Tls13,
            _ => ProtocolVersion::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Ssl3 => "SSLv3",
            ProtocolVersion::Tls10 => "TLSv1.0",
            ProtocolVersion::Tls11 => "TLSv1.1",
            ProtocolVersion::Tls12 => "TLSv1.2",
            ProtocolVersion::Tls13 => "TLSv1.3",
            ProtocolVersion::Unsupported => "unsupported",
        }
    }

    pub fn is_supported(&self) -> bool {
        *self != ProtocolVersion::Unsupported
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
