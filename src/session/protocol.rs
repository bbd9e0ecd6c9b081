//! Session protocol negotiated on a connection.

/// The protocol a connection currently speaks. The only legal transitions
/// are `H1 -> H2` and `H1C -> H2C`, at most once, driven by an HTTP/2
/// settings signal arriving on an HTTP/1-negotiated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProtocol {
    /// HTTP/1.1 over TLS.
    H1,
    /// Cleartext HTTP/1.1.
    H1C,
    /// HTTP/2 over TLS.
    H2,
    /// Cleartext HTTP/2.
    H2C,
}

impl SessionProtocol {
    /// Whether many logical streams share this connection and can be
    /// cancelled independently.
    pub fn is_multiplex(&self) -> bool {
        matches!(self, SessionProtocol::H2 | SessionProtocol::H2C)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, SessionProtocol::H1 | SessionProtocol::H2)
    }

    /// The protocol after an HTTP/2 upgrade. Idempotent on H2/H2C.
    pub fn upgraded(&self) -> SessionProtocol {
        match self {
            SessionProtocol::H1 => SessionProtocol::H2,
            SessionProtocol::H1C => SessionProtocol::H2C,
            other => *other,
        }
    }
}

impl std::fmt::Display for SessionProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionProtocol::H1 => "h1",
            SessionProtocol::H1C => "h1c",
            SessionProtocol::H2 => "h2",
            SessionProtocol::H2C => "h2c",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_transitions() {
        assert_eq!(SessionProtocol::H1.upgraded(), SessionProtocol::H2);
        assert_eq!(SessionProtocol::H1C.upgraded(), SessionProtocol::H2C);
        // At most once: upgrading an upgraded protocol is a no-op.
        assert_eq!(SessionProtocol::H2.upgraded(), SessionProtocol::H2);
        assert_eq!(SessionProtocol::H2C.upgraded(), SessionProtocol::H2C);
    }

    #[test]
    fn multiplex_and_tls_flags() {
        assert!(!SessionProtocol::H1.is_multiplex());
        assert!(!SessionProtocol::H1C.is_multiplex());
        assert!(SessionProtocol::H2.is_multiplex());
        assert!(SessionProtocol::H2C.is_multiplex());
        assert!(SessionProtocol::H1.is_tls());
        assert!(!SessionProtocol::H2C.is_tls());
    }
}
