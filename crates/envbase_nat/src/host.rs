//! Host network configuration for the NAT instance.

use std::process::Command;

use tracing::{debug, info};

use crate::error::{NatError, NatResult};

/// Kernel and firewall changes a NAT instance needs.
#[cfg_attr(test, mockall::automock)]
pub trait HostNetwork: Send + Sync {
    /// Turn on IPv4 forwarding and stop ICMP redirects on `interface`.
    fn enable_ip_forwarding(&self, interface: &str) -> NatResult<()>;

    fn masquerade_rule_exists(&self, interface: &str, source_cidr: &str) -> NatResult<bool>;

    fn add_masquerade_rule(&self, interface: &str, source_cidr: &str) -> NatResult<()>;
}

/// Install the masquerade rule unless it is already present.
pub fn ensure_masquerade(
    host: &dyn HostNetwork,
    interface: &str,
    source_cidr: &str,
) -> NatResult<bool> {
    if host.masquerade_rule_exists(interface, source_cidr)? {
        debug!(interface, source_cidr, "Masquerade rule already present");
        return Ok(false);
    }
    host.add_masquerade_rule(interface, source_cidr)?;
    info!(interface, source_cidr, "Masquerade rule added");
    Ok(true)
}

/// Runs `sysctl` and `iptables` on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostNetwork;

impl SystemHostNetwork {
    fn run(program: &str, args: &[&str]) -> NatResult<std::process::Output> {
        let command = format!("{} {}", program, args.join(" "));
        debug!("Running {}", command);
        Command::new(program)
            .args(args)
            .output()
            .map_err(|e| NatError::host(&command, e.to_string()))
    }

    fn run_checked(program: &str, args: &[&str]) -> NatResult<()> {
        let output = Self::run(program, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NatError::host(
                format!("{} {}", program, args.join(" ")),
                stderr.trim().to_string(),
            ));
        }
        Ok(())
    }
}

fn masquerade_args<'a>(op: &'a str, interface: &'a str, source_cidr: &'a str) -> [&'a str; 10] {
    [
        "-t",
        "nat",
        op,
        "POSTROUTING",
        "-o",
        interface,
        "-s",
        source_cidr,
        "-j",
        "MASQUERADE",
    ]
}

impl HostNetwork for SystemHostNetwork {
    fn enable_ip_forwarding(&self, interface: &str) -> NatResult<()> {
        Self::run_checked("sysctl", &["-q", "-w", "net.ipv4.ip_forward=1"])?;
        let redirects = format!("net.ipv4.conf.{}.send_redirects=0", interface);
        Self::run_checked("sysctl", &["-q", "-w", &redirects])
    }

    fn masquerade_rule_exists(&self, interface: &str, source_cidr: &str) -> NatResult<bool> {
        let output = Self::run("iptables", &masquerade_args("-C", interface, source_cidr))?;
        Ok(output.status.success())
    }

    fn add_masquerade_rule(&self, interface: &str, source_cidr: &str) -> NatResult<()> {
        Self::run_checked("iptables", &masquerade_args("-A", interface, source_cidr))
    }
}
