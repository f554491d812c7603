//! URL validation for acquisition requests.
//!
//! Every URL passes through [`validate_url`] before any network activity or
//! rate-limit token is spent. The validator rejects malformed URLs,
//! non-HTTP(S) schemes, and hosts that name private or internal network
//! targets, so a compromised source catalog cannot steer the client at
//! loopback services or cloud metadata endpoints.
//!
//! Only literal addresses and obvious local hostnames are checked; no DNS
//! resolution is performed here.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::{Host, Url};

/// Rejection categories for disallowed URLs.
///
/// Each variant names the matched category so rejected downloads are
/// debuggable from the result's error string alone.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    /// The URL could not be parsed at all (includes missing scheme).
    #[error("invalid URL {url}: not parseable as an absolute URL")]
    InvalidUrl {
        /// The offending input.
        url: String,
    },

    /// The URL uses a scheme other than http or https.
    #[error("unsupported scheme '{scheme}' in {url}: only http and https are allowed")]
    UnsupportedScheme {
        /// The offending URL.
        url: String,
        /// The disallowed scheme.
        scheme: String,
    },

    /// The URL has no host component.
    #[error("missing host in {url}")]
    MissingHost {
        /// The offending URL.
        url: String,
    },

    /// The host is `localhost` or a `*.localhost` name.
    #[error("local hostname '{host}' in {url} refused")]
    LocalHostname {
        /// The offending URL.
        url: String,
        /// The matched hostname.
        host: String,
    },

    /// The host is a loopback address (127.0.0.0/8 or ::1).
    #[error("loopback address {address} in {url} refused")]
    Loopback {
        /// The offending URL.
        url: String,
        /// The matched literal address.
        address: String,
    },

    /// The host is an RFC1918 private address.
    #[error("private network address {address} in {url} refused")]
    PrivateNetwork {
        /// The offending URL.
        url: String,
        /// The matched literal address.
        address: String,
    },

    /// The host is a link-local address (169.254.0.0/16 or fe80::/10).
    #[error("link-local address {address} in {url} refused")]
    LinkLocal {
        /// The offending URL.
        url: String,
        /// The matched literal address.
        address: String,
    },

    /// The host is an IPv6 unique-local address (fc00::/7).
    #[error("unique-local address {address} in {url} refused")]
    UniqueLocal {
        /// The offending URL.
        url: String,
        /// The matched literal address.
        address: String,
    },

    /// The host is the unspecified address (0.0.0.0 or ::).
    #[error("unspecified address {address} in {url} refused")]
    Unspecified {
        /// The offending URL.
        url: String,
        /// The matched literal address.
        address: String,
    },
}

/// Validates a URL for acquisition, returning the normalized parse on
/// success.
///
/// # Errors
///
/// Returns a [`ValidateError`] naming the matched rejection category:
/// unparseable input, non-HTTP(S) scheme, missing host, local hostnames,
/// or a literal loopback/private/link-local/unique-local/unspecified
/// address (IPv4-mapped IPv6 forms included).
pub fn validate_url(url: &str) -> Result<Url, ValidateError> {
    let parsed = Url::parse(url).map_err(|_| ValidateError::InvalidUrl {
        url: url.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidateError::UnsupportedScheme {
                url: url.to_string(),
                scheme: other.to_string(),
            });
        }
    }

    match parsed.host() {
        None => Err(ValidateError::MissingHost {
            url: url.to_string(),
        }),
        Some(Host::Domain(name)) => {
            check_hostname(url, name)?;
            Ok(parsed)
        }
        Some(Host::Ipv4(addr)) => {
            check_ipv4(url, addr)?;
            Ok(parsed)
        }
        Some(Host::Ipv6(addr)) => {
            check_ipv6(url, addr)?;
            Ok(parsed)
        }
    }
}

/// Rejects `localhost` and `*.localhost` names (RFC 6761 reserved).
fn check_hostname(url: &str, name: &str) -> Result<(), ValidateError> {
    let normalized = name.trim_end_matches('.').to_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return Err(ValidateError::LocalHostname {
            url: url.to_string(),
            host: name.to_string(),
        });
    }
    Ok(())
}

fn check_ipv4(url: &str, addr: Ipv4Addr) -> Result<(), ValidateError> {
    let address = addr.to_string();
    let url = url.to_string();
    if addr.is_loopback() {
        Err(ValidateError::Loopback { url, address })
    } else if addr.is_private() {
        Err(ValidateError::PrivateNetwork { url, address })
    } else if addr.is_link_local() {
        Err(ValidateError::LinkLocal { url, address })
    } else if addr.is_unspecified() {
        Err(ValidateError::Unspecified { url, address })
    } else {
        Ok(())
    }
}

fn check_ipv6(url: &str, addr: Ipv6Addr) -> Result<(), ValidateError> {
    // IPv4-mapped addresses (::ffff:a.b.c.d) inherit the IPv4 verdict
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return check_ipv4(url, mapped);
    }

    let address = addr.to_string();
    let url = url.to_string();
    if addr.is_loopback() {
        Err(ValidateError::Loopback { url, address })
    } else if is_unicast_link_local(addr) {
        Err(ValidateError::LinkLocal { url, address })
    } else if is_unique_local(addr) {
        Err(ValidateError::UniqueLocal { url, address })
    } else if addr.is_unspecified() {
        Err(ValidateError::Unspecified { url, address })
    } else {
        Ok(())
    }
}

/// fe80::/10
fn is_unicast_link_local(addr: Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// fc00::/7
fn is_unique_local(addr: Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}
