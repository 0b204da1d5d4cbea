//! Socket table queries.
//!
//! # Platform Behavior
//! - **Linux**: parses `/proc/net/{tcp,tcp6,udp,udp6}`
//! - **Elsewhere**: probes by binding the port on TCP and UDP

use crate::error::{BurrowError, Result};
use std::collections::HashSet;

/// TCP state code for LISTEN in `/proc/net/tcp`.
const TCP_LISTEN: &str = "0A";
/// UDP sockets that are bound but not connected report state 07.
const UDP_UNCONNECTED: &str = "07";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtocol {
    Tcp,
    Udp,
}

/// Extract local ports of listening sockets from a `/proc/net/*` table.
///
/// Malformed rows are skipped.
pub fn parse_proc_net(contents: &str, protocol: SocketProtocol) -> HashSet<u16> {
    let wanted_state = match protocol {
        SocketProtocol::Tcp => TCP_LISTEN,
        SocketProtocol::Udp => UDP_UNCONNECTED,
    };

    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || !fields[3].eq_ignore_ascii_case(wanted_state) {
                return None;
            }
            let (_, port_hex) = fields[1].rsplit_once(':')?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .collect()
}

/// Every local port with a listening TCP socket or a bound UDP socket.
#[cfg(target_os = "linux")]
pub fn listening_ports() -> Result<HashSet<u16>> {
    const TABLES: [(&str, SocketProtocol, bool); 4] = [
        ("/proc/net/tcp", SocketProtocol::Tcp, true),
        ("/proc/net/udp", SocketProtocol::Udp, true),
        // IPv6 tables are absent when IPv6 is disabled.
        ("/proc/net/tcp6", SocketProtocol::Tcp, false),
        ("/proc/net/udp6", SocketProtocol::Udp, false),
    ];

    let mut ports = HashSet::new();
    for (path, protocol, required) in TABLES {
        match std::fs::read_to_string(path) {
            Ok(contents) => ports.extend(parse_proc_net(&contents, protocol)),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BurrowError::discovery(format!(
                    "failed to read {}: {}",
                    path, e
                )))
            }
        }
    }
    Ok(ports)
}

/// Whether anything is listening on `port`.
pub fn port_has_listener(port: u16) -> Result<bool> {
    #[cfg(target_os = "linux")]
    {
        Ok(listening_ports()?.contains(&port))
    }

    #[cfg(not(target_os = "linux"))]
    {
        probe_port(port)
    }
}

#[cfg(not(target_os = "linux"))]
fn probe_port(port: u16) -> Result<bool> {
    use std::io::ErrorKind;
    use std::net::{TcpListener, UdpSocket};

    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AddrInUse => return Ok(true),
        Err(e) => {
            return Err(BurrowError::discovery(format!(
                "tcp probe of port {}: {}",
                port, e
            )))
        }
    }
    match UdpSocket::bind(("0.0.0.0", port)) {
        Ok(_) => Ok(false),
        Err(e) if e.kind() == ErrorKind::AddrInUse => Ok(true),
        Err(e) => Err(BurrowError::discovery(format!(
            "udp probe of port {}: {}",
            port, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 12345 1 0000000000000000 100 0 0 10 0
   1: 0100007F:0277 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 12346 1 0000000000000000 100 0 0 10 0
   2: 0100007F:A1B2 0100007F:1F90 01 00000000:00000000 00:00000000 00000000  1000        0 12347 1 0000000000000000 20 4 30 10 -1
";

    const UDP_TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
  10: 00000000:2329 00000000:0000 07 00000000:00000000 00:00000000 00000000     0        0 22222 2 0000000000000000 0
  11: 0100007F:0035 08080808:0035 01 00000000:00000000 00:00000000 00000000     0        0 22223 2 0000000000000000 0
";

    #[test]
    fn test_parse_tcp_listeners_only() {
        let ports = parse_proc_net(TCP_TABLE, SocketProtocol::Tcp);
        assert_eq!(ports, HashSet::from([8080, 631]));
    }

    #[test]
    fn test_parse_udp_bound_only() {
        let ports = parse_proc_net(UDP_TABLE, SocketProtocol::Udp);
        assert_eq!(ports, HashSet::from([9001]));
    }

    #[test]
    fn test_parse_ipv6_address() {
        let table = "header\n   0: 00000000000000000000000000000000:2329 00000000000000000000000000000000:0000 07 0 0 0 0 0\n";
        let ports = parse_proc_net(table, SocketProtocol::Udp);
        assert_eq!(ports, HashSet::from([9001]));
    }

    #[test]
    fn test_parse_garbage_is_skipped() {
        let ports = parse_proc_net("header\nnot a row\n 1: nocolon 0 0A\n", SocketProtocol::Tcp);
        assert!(ports.is_empty());
    }

    #[test]
    fn test_detects_bound_tcp_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_has_listener(port).unwrap());
    }

    #[test]
    fn test_detects_bound_udp_socket() {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = socket.local_addr().unwrap().port();
        assert!(port_has_listener(port).unwrap());
    }
}
