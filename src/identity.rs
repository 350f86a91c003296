// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use std::io;
use std::net::UdpSocket;

/// Port the co-located scraper listens on; peers address us through it.
pub const SCRAPER_PORT: u16 = 9090;

/// The identity peers know this instance by: `<routable-ip>:<scraper-port>`.
/// Connecting a UDP socket forces the OS to pick the outbound interface;
/// nothing is ever sent.
pub fn self_identity() -> io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    let addr = socket.local_addr()?;
    Ok(format!("{}:{}", addr.ip(), SCRAPER_PORT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_shape() {
        let Ok(identity) = self_identity() else {
            // No routable interface in this environment.
            return;
        };
        let (host, port) = identity.rsplit_once(':').unwrap();
        assert_eq!(port, "9090");
        assert!(host.parse::<std::net::IpAddr>().is_ok());
    }
}
