use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Name of the network interface to capture on (e.g., "eth0"). Ignored
    /// when a capture file is given.
    #[arg(short, long, value_name = "NAME", env = "CACHETAP_INTERFACE")]
    pub interface: Option<String>,

    /// Path to a recorded pcap file to replay instead of capturing live.
    #[arg(short, long, value_name = "FILE", env = "CACHETAP_FILE")]
    pub file: Option<PathBuf>,

    /// Ports to watch: comma-separated values and inclusive "A...B" ranges
    /// (e.g., "11211,11300...11305").
    #[arg(
        short,
        long,
        value_name = "SPEC",
        env = "CACHETAP_PORTS",
        default_value = "11211"
    )]
    pub ports: String,

    /// An optional operation-level filter expression of comma-separated
    /// clauses (e.g., "opcode=Set,key=session:*,status!=NoError").
    #[arg(short = 'x', long = "filter", value_name = "EXPR", env = "CACHETAP_FILTER")]
    pub filter: Option<String>,

    /// List the capture devices visible to this process and exit.
    #[arg(long)]
    pub list_devices: bool,

    /// Output format for decoded packets.
    #[arg(
        short,
        long,
        value_name = "FORMAT",
        env = "CACHETAP_OUTPUT",
        default_value = "log"
    )]
    pub output: OutputFormat,

    /// Set the application's log level (e.g., "debug", "warn").
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        env = "CACHETAP_LOG_LEVEL",
        default_value = "info"
    )]
    pub log_level: Level,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One diagnostic line per operation.
    Log,
    /// One JSON object per packet on stdout.
    Json,
}

/// Parses the port specification grammar: comma-separated tokens, each an
/// integer or an inclusive `A...B` range (bounds swapped when descending).
/// Unparseable tokens are dropped, port 0 is filtered, duplicates collapse.
pub fn parse_ports(spec: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = Vec::new();

    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if let Some((start, end)) = token.split_once("...") {
            if let (Ok(start), Ok(end)) = (start.trim().parse::<u16>(), end.trim().parse::<u16>()) {
                let (low, high) = if start <= end {
                    (start, end)
                } else {
                    (end, start)
                };
                for port in low..=high {
                    push_port(&mut ports, port);
                }
            }
        } else if let Ok(port) = token.parse::<u16>() {
            push_port(&mut ports, port);
        }
    }

    ports
}

fn push_port(ports: &mut Vec<u16>, port: u16) {
    if port != 0 && !ports.contains(&port) {
        ports.push(port);
    }
}
