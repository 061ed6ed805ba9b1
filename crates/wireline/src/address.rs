//! Internet endpoint addresses.
//!
//! [`Address`] is an immutable IPv4/IPv6 endpoint value: an address plus an
//! optional native-endian port. It is created by parsing a literal, by
//! resolving a name, by converting a [`SocketAddr`], or directly from parts;
//! "the same address with a different port" is a new value
//! ([`Address::with_port`]).
//!
//! Parsing and resolution are separate failure domains: [`Address::parse`]
//! only accepts literals and fails with [`NetError::Parse`], while hostnames
//! go through [`Address::resolve`] (or the [`crate::resolver::Resolver`]) and
//! fail with [`NetError::Resolution`].

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use crate::error::{NetError, Result};

/// Address family of an [`Address`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressFamily {
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inet => write!(f, "INET"),
            Self::Inet6 => write!(f, "INET6"),
        }
    }
}

/// An internet endpoint: IPv4 or IPv6 address plus optional port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    ip: IpAddr,
    port: Option<u16>,
}

impl Address {
    /// Create an address from parts.
    pub fn new(ip: IpAddr, port: Option<u16>) -> Self {
        Self { ip, port }
    }

    /// The IP portion of the address.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The port, if one is set.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The address family.
    pub fn family(&self) -> AddressFamily {
        match self.ip {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    /// The same address with a different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            ip: self.ip,
            port: Some(port),
        }
    }

    /// Parse an address literal of the form `host[:port]`.
    ///
    /// `host` is a dotted IPv4 literal, a bare IPv6 literal (no port), or a
    /// bracketed IPv6 literal (`[::1]`, `[::1]:80`). The port is 1–5 decimal
    /// digits. Hostnames are rejected here; resolve them with
    /// [`Address::resolve`].
    ///
    /// An explicit port in the literal wins over `default_port`. A `family`
    /// hint that contradicts the literal is a parse error.
    ///
    /// # Example
    ///
    /// ```
    /// use wireline::address::Address;
    ///
    /// let addr = Address::parse("127.0.0.1:80", None, None).unwrap();
    /// assert_eq!(addr.to_string(), "127.0.0.1:80");
    /// ```
    pub fn parse(s: &str, default_port: Option<u16>, family: Option<AddressFamily>) -> Result<Self> {
        let (host, port) = split_host_port(s)?;

        let ip: IpAddr = host
            .parse()
            .map_err(|_| NetError::Parse(format!("not an address literal: '{host}'")))?;

        let address = Self {
            ip,
            port: port.or(default_port),
        };

        if let Some(family) = family
            && address.family() != family
        {
            return Err(NetError::Parse(format!(
                "'{host}' is not an {family} address"
            )));
        }

        Ok(address)
    }

    /// Resolve `name` (`host[:port]`) to addresses.
    ///
    /// Wraps the platform name-resolution call. Literals short-circuit
    /// without touching the resolver. The result set is deduplicated and
    /// sorted by the [`Address`] ordering, so it is deterministic for a given
    /// resolver answer. Failure to resolve a syntactically valid name is a
    /// [`NetError::Resolution`], not a parse error.
    pub async fn resolve(name: &str, family: Option<AddressFamily>) -> Result<Vec<Self>> {
        if let Ok(address) = Self::parse(name, None, family) {
            return Ok(vec![address]);
        }

        let (host, port) = split_host_port(name)?;

        let resolved = tokio::net::lookup_host((host, port.unwrap_or(0)))
            .await
            .map_err(|e| NetError::Resolution {
                name: host.to_string(),
                message: e.to_string(),
            })?;

        let addresses: BTreeSet<Address> = resolved
            .map(Address::from)
            .filter(|a| family.is_none_or(|f| a.family() == f))
            .collect();

        if addresses.is_empty() {
            return Err(NetError::Resolution {
                name: host.to_string(),
                message: "no addresses found".to_string(),
            });
        }

        Ok(addresses.into_iter().collect())
    }

    /// Convert to a [`SocketAddr`].
    ///
    /// Fails with [`NetError::Config`] when no port is set, since the target
    /// representation requires one.
    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        match self.port {
            Some(port) => Ok(SocketAddr::new(self.ip, port)),
            None => Err(NetError::Config(format!("address {self} has no port"))),
        }
    }
}

impl From<SocketAddr> for Address {
    /// Port 0 in the socket address maps to "no port", matching the raw
    /// sockaddr conversion where an unset port is wire zero.
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: (addr.port() != 0).then_some(addr.port()),
        }
    }
}

impl From<(IpAddr, u16)> for Address {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Self {
            ip,
            port: Some(port),
        }
    }
}

impl std::str::FromStr for Address {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, None, None)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.ip, self.port) {
            (IpAddr::V4(ip), Some(port)) => write!(f, "{ip}:{port}"),
            (IpAddr::V4(ip), None) => write!(f, "{ip}"),
            (IpAddr::V6(ip), Some(port)) => write!(f, "[{ip}]:{port}"),
            (IpAddr::V6(ip), None) => write!(f, "[{ip}]"),
        }
    }
}

impl Ord for Address {
    /// Total order: family, then raw address bytes, then port. An absent
    /// port sorts before any set port.
    fn cmp(&self, other: &Self) -> Ordering {
        self.family()
            .cmp(&other.family())
            .then_with(|| match (self.ip, other.ip) {
                (IpAddr::V4(a), IpAddr::V4(b)) => a.octets().cmp(&b.octets()),
                (IpAddr::V6(a), IpAddr::V6(b)) => a.octets().cmp(&b.octets()),
                _ => unreachable!("families already compared equal"),
            })
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split `host[:port]`, handling bracketed IPv6 literals and bare IPv6
/// literals (which contain colons but carry no port).
fn split_host_port(s: &str) -> Result<(&str, Option<u16>)> {
    if s.is_empty() {
        return Err(NetError::Parse("empty address".to_string()));
    }

    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| NetError::Parse(format!("unterminated '[' in '{s}'")))?;
        let port = match tail {
            "" => None,
            _ => {
                let digits = tail
                    .strip_prefix(':')
                    .ok_or_else(|| NetError::Parse(format!("malformed port in '{s}'")))?;
                Some(parse_port(digits, s)?)
            }
        };
        return Ok((host, port));
    }

    // A bare IPv6 literal contains colons but no port notation.
    if s.parse::<std::net::Ipv6Addr>().is_ok() {
        return Ok((s, None));
    }

    match s.rsplit_once(':') {
        Some((host, digits)) => Ok((host, Some(parse_port(digits, s)?))),
        None => Ok((s, None)),
    }
}

fn parse_port(digits: &str, whole: &str) -> Result<u16> {
    if digits.is_empty() || digits.len() > 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NetError::Parse(format!("malformed port in '{whole}'")));
    }
    digits
        .parse::<u16>()
        .map_err(|_| NetError::Parse(format!("port out of range in '{whole}'")))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn parse_ipv4_with_port() {
        let addr = Address::parse("127.0.0.1:80", None, None).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(addr.port(), Some(80));
        assert_eq!(addr.family(), AddressFamily::Inet);
        assert_eq!(addr.to_string(), "127.0.0.1:80");
    }

    #[test]
    fn parse_ipv6_forms() {
        let bare = Address::parse("::1", None, None).unwrap();
        assert_eq!(bare.port(), None);
        assert_eq!(bare.to_string(), "[::1]");

        let bracketed = Address::parse("[::1]", None, None).unwrap();
        assert_eq!(bracketed, bare);

        let with_port = Address::parse("[::1]:8080", None, None).unwrap();
        assert_eq!(with_port.port(), Some(8080));
        assert_eq!(with_port.to_string(), "[::1]:8080");
    }

    #[test]
    fn parse_round_trips_display() {
        for s in ["127.0.0.1:80", "10.0.0.1", "[::1]:443", "[fe80::1]"] {
            let addr: Address = s.parse().unwrap();
            assert_eq!(addr.to_string().parse::<Address>().unwrap(), addr);
        }
    }

    #[test]
    fn parse_rejects_hostnames_and_garbage() {
        assert!(matches!(
            Address::parse("example.com:80", None, None),
            Err(NetError::Parse(_))
        ));
        assert!(matches!(
            Address::parse("", None, None),
            Err(NetError::Parse(_))
        ));
        assert!(matches!(
            Address::parse("127.0.0.1:99999", None, None),
            Err(NetError::Parse(_))
        ));
        assert!(matches!(
            Address::parse("[::1", None, None),
            Err(NetError::Parse(_))
        ));
    }

    #[test]
    fn parse_applies_default_port_and_family_hint() {
        let addr = Address::parse("10.1.2.3", Some(53), None).unwrap();
        assert_eq!(addr.port(), Some(53));

        // Explicit port wins over the default.
        let addr = Address::parse("10.1.2.3:99", Some(53), None).unwrap();
        assert_eq!(addr.port(), Some(99));

        assert!(Address::parse("10.1.2.3", None, Some(AddressFamily::Inet6)).is_err());
        assert!(Address::parse("::1", None, Some(AddressFamily::Inet6)).is_ok());
    }

    #[test]
    fn with_port_produces_new_value() {
        let addr = Address::parse("127.0.0.1", None, None).unwrap();
        let with = addr.with_port(8080);
        assert_eq!(addr.port(), None);
        assert_eq!(with.port(), Some(8080));
        assert_eq!(with.ip(), addr.ip());
    }

    #[test]
    fn socket_addr_conversions() {
        let sa: SocketAddr = "192.168.1.1:443".parse().unwrap();
        let addr = Address::from(sa);
        assert_eq!(addr.port(), Some(443));
        assert_eq!(addr.to_socket_addr().unwrap(), sa);

        // Port zero maps to "no port", and converting back fails.
        let sa0: SocketAddr = "192.168.1.1:0".parse().unwrap();
        let addr0 = Address::from(sa0);
        assert_eq!(addr0.port(), None);
        assert!(matches!(
            addr0.to_socket_addr(),
            Err(NetError::Config(_))
        ));
    }

    #[test]
    fn ordering_is_family_then_bytes_then_port() {
        let a: Address = "1.2.3.4:80".parse().unwrap();
        let b: Address = "1.2.3.5:1".parse().unwrap();
        let c: Address = "[::1]:1".parse().unwrap();
        let d = Address::parse("1.2.3.4", None, None).unwrap();

        // Family dominates bytes, bytes dominate port, no-port sorts first.
        assert!(a < b);
        assert!(b < c);
        assert!(d < a);

        let mut set = vec![c, a, d, b];
        set.sort();
        let sorted = set.clone();
        set.sort();
        assert_eq!(set, sorted);
        assert_eq!(set, vec![d, a, b, c]);
    }

    #[tokio::test]
    async fn resolve_literal_short_circuits() {
        let addrs = Address::resolve("127.0.0.1:80", None).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:80".parse().unwrap()]);
    }
}
