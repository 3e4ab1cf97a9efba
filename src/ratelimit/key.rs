//! Client key derivation.

use std::net::{IpAddr, SocketAddr};

/// Key shared by every caller whose origin cannot be determined.
pub const UNKNOWN_CLIENT_KEY: &str = "unknown";

/// The origin information available for a request.
///
/// Sources are consulted in order: the direct connection address, the first
/// entry of a forwarded-for header, then the socket's remote address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Connection address, or one resolved by a trusted upstream layer
    pub direct: Option<IpAddr>,
    /// Raw `X-Forwarded-For` header value
    pub forwarded_for: Option<String>,
    /// Remote address of the underlying socket
    pub socket: Option<SocketAddr>,
}

impl ClientIdentity {
    /// Derive the limiter key for this identity.
    ///
    /// Falls back to [`UNKNOWN_CLIENT_KEY`], so all unidentifiable callers
    /// draw from one counter.
    pub fn client_key(&self) -> String {
        if let Some(ip) = self.direct {
            return ip.to_string();
        }

        // "client, proxy1, proxy2": the first entry is the original client
        if let Some(first) = self
            .forwarded_for
            .as_deref()
            .and_then(|raw| raw.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty())
        {
            return first.to_string();
        }

        if let Some(addr) = self.socket {
            return addr.ip().to_string();
        }

        UNKNOWN_CLIENT_KEY.to_string()
    }
}
