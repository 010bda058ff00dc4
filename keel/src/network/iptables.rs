//! iptables rule management by shelling out to the `iptables` binary
//! rather than reimplementing the `ip(6)tables` kernel ABI. Every rule
//! keel installs carries the sentinel comment [`MANAGED_COMMENT`] so a
//! reconciliation pass can tell "ours" apart from rules a human or
//! another tool added.

use std::process::Command;

use keel_shared::constants::network::IPTABLES_COMMENT;
use keel_shared::errors::{EngineError, EngineResult};

fn run(args: &[&str]) -> EngineResult<String> {
    let output = Command::new("iptables")
        .args(args)
        .output()
        .map_err(|e| EngineError::DriverError(format!("failed to exec iptables: {e}")))?;
    if !output.status.success() {
        return Err(EngineError::DriverError(format!(
            "iptables {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Idempotently ensure a rule exists: `iptables -C` (check) first, `-A`
/// (append) only if absent. All of this module's operations tolerate
/// partial prior state, as recovery requires.
fn ensure_rule(table: &str, chain: &str, spec: &[&str]) -> EngineResult<()> {
    let mut check_args = vec!["-t", table, "-C", chain];
    check_args.extend_from_slice(spec);
    check_args.extend(["-m", "comment", "--comment", IPTABLES_COMMENT]);

    if Command::new("iptables")
        .args(&check_args)
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
    {
        return Ok(());
    }

    let mut add_args = vec!["-t", table, "-A", chain];
    add_args.extend_from_slice(spec);
    add_args.extend(["-m", "comment", "--comment", IPTABLES_COMMENT]);
    run(&add_args).map(|_| ())
}

fn remove_rule(table: &str, chain: &str, spec: &[&str]) -> EngineResult<()> {
    let mut args = vec!["-t", table, "-D", chain];
    args.extend_from_slice(spec);
    args.extend(["-m", "comment", "--comment", IPTABLES_COMMENT]);
    // `-D` on an absent rule exits nonzero; that is the idempotent "already
    // gone" case, not a failure worth propagating.
    let _ = run(&args);
    Ok(())
}

/// `nat POSTROUTING -s <cidr> ! -o <bridge> -j MASQUERADE`.
pub fn ensure_masquerade(cidr: &str, bridge: &str) -> EngineResult<()> {
    ensure_rule(
        "nat",
        "POSTROUTING",
        &["-s", cidr, "!", "-o", bridge, "-j", "MASQUERADE"],
    )
}

pub fn remove_masquerade(cidr: &str, bridge: &str) -> EngineResult<()> {
    remove_rule(
        "nat",
        "POSTROUTING",
        &["-s", cidr, "!", "-o", bridge, "-j", "MASQUERADE"],
    )
}

/// `filter FORWARD` default accept for bridge-local traffic.
pub fn ensure_bridge_forward_accept(bridge: &str) -> EngineResult<()> {
    ensure_rule("filter", "FORWARD", &["-i", bridge, "-o", bridge, "-j", "ACCEPT"])?;
    ensure_rule("filter", "FORWARD", &["-i", bridge, "!", "-o", bridge, "-j", "ACCEPT"])?;
    ensure_rule("filter", "FORWARD", &["-o", bridge, "-m", "conntrack", "--ctstate", "RELATED,ESTABLISHED", "-j", "ACCEPT"])
}

/// Insert an explicit DROP between two containers' IPs (icc=false), and an
/// ACCEPT pair overriding it for a specific link.
pub fn deny_inter_container(bridge: &str) -> EngineResult<()> {
    ensure_rule("filter", "FORWARD", &["-i", bridge, "-o", bridge, "-j", "DROP"])
}

pub fn allow_link(src_ip: &str, dst_ip: &str) -> EngineResult<()> {
    ensure_rule("filter", "FORWARD", &["-s", src_ip, "-d", dst_ip, "-j", "ACCEPT"])?;
    ensure_rule("filter", "FORWARD", &["-s", dst_ip, "-d", src_ip, "-j", "ACCEPT"])
}

/// Ensure the `DOCKER`-style per-port DNAT chain exists and is jumped to
/// from `PREROUTING`.
pub fn ensure_dnat_chain(chain: &str) -> EngineResult<()> {
    let created = Command::new("iptables")
        .args(["-t", "nat", "-N", chain])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    let _ = created; // `-N` fails if the chain already exists; that's fine.
    ensure_rule("nat", "PREROUTING", &["-j", chain])
}

/// One `DNAT` rule per published port.
pub fn ensure_port_dnat(
    chain: &str,
    protocol: &str,
    host_port: u16,
    container_ip: &str,
    container_port: u16,
) -> EngineResult<()> {
    ensure_rule(
        "nat",
        chain,
        &[
            "-p",
            protocol,
            "--dport",
            &host_port.to_string(),
            "-j",
            "DNAT",
            "--to-destination",
            &format!("{container_ip}:{container_port}"),
        ],
    )
}

pub fn remove_port_dnat(
    chain: &str,
    protocol: &str,
    host_port: u16,
    container_ip: &str,
    container_port: u16,
) -> EngineResult<()> {
    remove_rule(
        "nat",
        chain,
        &[
            "-p",
            protocol,
            "--dport",
            &host_port.to_string(),
            "-j",
            "DNAT",
            "--to-destination",
            &format!("{container_ip}:{container_port}"),
        ],
    )
}

/// List every rule we currently own, across the tables we touch, for
/// startup reconciliation.
pub fn list_managed_rules(table: &str) -> EngineResult<Vec<String>> {
    let output = run(&["-t", table, "-S"])?;
    Ok(output
        .lines()
        .filter(|line| line.contains(IPTABLES_COMMENT))
        .map(str::to_string)
        .collect())
}
