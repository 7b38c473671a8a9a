//! Listener binding for `{network, address}` pairs
//!
//! Addresses follow the usual `host:port` form. A missing host (`":8000"`)
//! means every interface of the requested family, and an empty address
//! picks an ephemeral port.

use std::io;
use std::net::SocketAddr;

use ferrule_core::{Error, Result};
use tokio::net::{lookup_host, TcpListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Any,
    V4,
    V6,
}

impl Family {
    fn parse(network: &str) -> Result<Self> {
        match network {
            "tcp" => Ok(Family::Any),
            "tcp4" => Ok(Family::V4),
            "tcp6" => Ok(Family::V6),
            other => Err(Error::UnknownNetwork {
                network: other.to_string(),
            }),
        }
    }

    fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }

    fn unspecified_host(&self) -> &'static str {
        match self {
            Family::V6 => "[::]",
            Family::Any | Family::V4 => "0.0.0.0",
        }
    }
}

/// Bind a TCP listener, failing once without retrying
pub(crate) async fn bind(network: &str, address: &str) -> Result<TcpListener> {
    let family = Family::parse(network)?;
    let target = normalize_address(address, family);
    let bind_error = |source: io::Error| Error::Bind {
        network: network.to_string(),
        address: address.to_string(),
        source,
    };

    let resolved = lookup_host(target.as_str())
        .await
        .map_err(bind_error)?
        .find(|addr| family.accepts(addr));
    let addr = match resolved {
        Some(addr) => addr,
        None => {
            return Err(bind_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {network} address for {address}"),
            )))
        }
    };

    TcpListener::bind(addr).await.map_err(bind_error)
}

fn normalize_address(address: &str, family: Family) -> String {
    if address.is_empty() {
        format!("{}:0", family.unspecified_host())
    } else if address.starts_with(':') {
        format!("{}{}", family.unspecified_host(), address)
    } else {
        address.to_string()
    }
}
