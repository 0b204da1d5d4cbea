//! Discovery of running tunnel processes.
//!
//! Every call re-reads the OS tables; there is no in-memory registry of pids.

use crate::error::Result;
use crate::models::{LiveProcessSet, LiveTunnel};
use crate::platform::OsSurface;
use std::sync::Arc;
use tracing::debug;

const LISTEN_FLAGS: [&str; 2] = ["l", "listen"];
const TARGET_FLAGS: [&str; 2] = ["t", "target"];

/// Read-only view of live tunnel state.
#[derive(Clone)]
pub struct ProcessDiscovery {
    os: Arc<dyn OsSurface>,
    binary_name: String,
}

impl ProcessDiscovery {
    pub fn new(os: Arc<dyn OsSurface>, binary_name: impl Into<String>) -> Self {
        Self {
            os,
            binary_name: binary_name.into(),
        }
    }

    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    /// Running tunnel processes with the ports read from their arguments.
    ///
    /// Instances whose listen port cannot be parsed are ignored.
    pub async fn list_tunnels(&self) -> Result<Vec<LiveTunnel>> {
        let processes = self.os.find_processes(&self.binary_name).await?;

        let tunnels: Vec<LiveTunnel> = processes
            .iter()
            .filter_map(|process| {
                let tunnel_port = parse_listen_port(&process.args)?;
                Some(LiveTunnel {
                    pid: process.pid,
                    tunnel_port,
                    target_port: parse_target_port(&process.args),
                })
            })
            .collect();

        debug!(
            "list_tunnels: {} of {} {} processes carry a listen port",
            tunnels.len(),
            processes.len(),
            self.binary_name
        );
        Ok(tunnels)
    }

    /// Deduplicated set of tunnel ports currently bound by tunnel processes.
    pub async fn list_active_tunnel_ports(&self) -> Result<LiveProcessSet> {
        Ok(self
            .list_tunnels()
            .await?
            .into_iter()
            .map(|tunnel| tunnel.tunnel_port)
            .collect())
    }

    /// Whether anything (tunnel or not) holds `port`.
    pub async fn port_in_use(&self, port: u16) -> Result<bool> {
        self.os.port_has_listener(port).await
    }

    /// Pids of tunnels forwarding to `target_port`.
    pub async fn pids_for_target(&self, target_port: u16) -> Result<Vec<u32>> {
        Ok(self
            .list_tunnels()
            .await?
            .into_iter()
            .filter(|tunnel| tunnel.target_port == Some(target_port))
            .map(|tunnel| tunnel.pid)
            .collect())
    }

    /// Pids of tunnels listening on `tunnel_port`.
    pub async fn pids_for_tunnel_port(&self, tunnel_port: u16) -> Result<Vec<u32>> {
        Ok(self
            .list_tunnels()
            .await?
            .into_iter()
            .filter(|tunnel| tunnel.tunnel_port == tunnel_port)
            .map(|tunnel| tunnel.pid)
            .collect())
    }
}

/// Port from the listen argument (`-l :9001`, `--listen=0.0.0.0:9001`).
pub fn parse_listen_port(args: &[String]) -> Option<u16> {
    flag_value(args, &LISTEN_FLAGS).and_then(port_of)
}

/// Port from the forwarding argument (`-t 127.0.0.1:8388`).
pub fn parse_target_port(args: &[String]) -> Option<u16> {
    flag_value(args, &TARGET_FLAGS).and_then(port_of)
}

/// Value of the first matching flag. Accepts `-x v`, `--x v`, `-x=v`, `--x=v`.
/// `args[0]` is the program and is skipped.
fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a str> {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let Some(stripped) = arg
            .strip_prefix("--")
            .or_else(|| arg.strip_prefix('-'))
        else {
            continue;
        };

        for name in names {
            if stripped == *name {
                return iter.next().map(String::as_str);
            }
            if let Some(value) = stripped
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
            {
                return Some(value);
            }
        }
    }
    None
}

fn port_of(address: &str) -> Option<u16> {
    let address = address.trim();
    let port = match address.rsplit_once(':') {
        Some((_, port)) => port,
        None => address,
    };
    port.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_listen_short_flag() {
        let argv = args(&["server_linux_amd64", "-l", ":9001", "-t", "0.0.0.0:8388"]);
        assert_eq!(parse_listen_port(&argv), Some(9001));
        assert_eq!(parse_target_port(&argv), Some(8388));
    }

    #[test]
    fn test_parse_long_and_equals_forms() {
        let argv = args(&["server", "--listen=0.0.0.0:4000", "--target", "127.0.0.1:80"]);
        assert_eq!(parse_listen_port(&argv), Some(4000));
        assert_eq!(parse_target_port(&argv), Some(80));
    }

    #[test]
    fn test_parse_tolerates_padding() {
        let argv = args(&["server", "-l", ":9001 ", "-t", "0.0.0.0:8388 "]);
        assert_eq!(parse_listen_port(&argv), Some(9001));
        assert_eq!(parse_target_port(&argv), Some(8388));
    }

    #[test]
    fn test_parse_ipv6_listen() {
        let argv = args(&["server", "-l", "[::]:9002"]);
        assert_eq!(parse_listen_port(&argv), Some(9002));
    }

    #[test]
    fn test_parse_missing_or_invalid() {
        assert_eq!(parse_listen_port(&args(&["server"])), None);
        assert_eq!(parse_listen_port(&args(&["server", "-l"])), None);
        assert_eq!(parse_listen_port(&args(&["server", "-l", ":abc"])), None);
        assert_eq!(parse_listen_port(&args(&["server", "-l", ":0"])), None);
        // program name is never treated as a flag
        assert_eq!(parse_listen_port(&args(&["-l", ":9001"])), None);
    }

    #[test]
    fn test_unrelated_flag_with_same_prefix() {
        let argv = args(&["server", "--log", "/tmp/x", "-l", ":9003"]);
        assert_eq!(parse_listen_port(&argv), Some(9003));
    }
}
