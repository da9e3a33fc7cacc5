//! `hnet-ifup` / `hnet-ifdown`: the CLI multicall helper (spec §6). One
//! binary, installed under both names, dispatching on `argv[0]`: invoked as
//! `hnet-ifdown` it sends a bare `ifdown`; invoked as anything else (the
//! `hnet-ifup` case) it builds an `ifup` request from its short options.
//!
//! A one-shot synchronous client: bind an ephemeral datagram socket, send
//! one framed request to the daemon, print whatever it replies with.

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;

use homenetd::ipc::{frame, unframe, IpcRequest};

/// Short options mirror spec §6's CLI table: `-c mode, -d disable_pa,
/// -p "prefix,…", -l link_id, -i "iface_id,…", -m ip6assign, -n ip4assign,
/// -u ula_default_router, -k trickle_k, -P ping_interval`.
#[derive(Debug, Parser)]
#[clap(name = "hnet-ifup", about = "Configure a homenetd-managed interface")]
struct Args {
    /// Interface mode: adhoc|guest|hybrid|leaf|external|auto.
    #[clap(short = 'c')]
    mode: Option<String>,
    /// Disable prefix assignment on this interface.
    #[clap(short = 'd')]
    disable_pa: bool,
    /// Comma-separated assigned prefixes.
    #[clap(short = 'p')]
    prefix: Option<String>,
    /// Link id, `"<hex>/<mask_bits>"`.
    #[clap(short = 'l')]
    link_id: Option<String>,
    /// Comma-separated `"<addr_or_prefix> [filter_prefix]"` entries.
    #[clap(short = 'i')]
    iface_id: Option<String>,
    /// Requested IPv6 assignment length.
    #[clap(short = 'm')]
    ip6assign: Option<String>,
    /// Requested IPv4 assignment length.
    #[clap(short = 'n')]
    ip4assign: Option<String>,
    /// Advertise a ULA default route on this link.
    #[clap(short = 'u')]
    ula_default_router: bool,
    /// Trickle redundancy constant.
    #[clap(short = 'k')]
    trickle_k: Option<u32>,
    /// Peer probe interval, milliseconds.
    #[clap(short = 'P')]
    ping_interval: Option<u32>,
    /// The interface to configure.
    ifname: String,
}

/// Socket path the daemon listens on — not yet wired to `Config`, since this
/// standalone helper never loads `homenetd.toml`.
const DAEMON_SOCKET: &str = "/var/run/hnetd.sock";

fn invoked_as_ifdown() -> bool {
    std::env::args()
        .next()
        .map(|a| PathBuf::from(a).file_name().map(|n| n.to_string_lossy().contains("ifdown")).unwrap_or(false))
        .unwrap_or(false)
}

fn build_request(args: Args) -> IpcRequest {
    if invoked_as_ifdown() {
        return IpcRequest::Ifdown { ifname: args.ifname };
    }
    IpcRequest::Ifup {
        ifname: args.ifname,
        handle: None,
        mode: args.mode,
        prefix: args.prefix.map(|s| s.split(',').map(str::to_string).collect()),
        link_id: args.link_id,
        iface_id: args.iface_id.map(|s| s.split(',').map(str::to_string).collect()),
        ip6assign: args.ip6assign,
        ip4assign: args.ip4assign,
        disable_pa: Some(args.disable_pa),
        ula_default_router: Some(args.ula_default_router),
        ping_interval: args.ping_interval,
        trickle_k: args.trickle_k,
        dnsname: None,
    }
}

fn main() {
    let args = Args::parse();
    let request = build_request(args);

    let client_path = PathBuf::from(format!("/var/run/hnetd-client{}.sock", process::id()));
    let _ = std::fs::remove_file(&client_path);

    let socket = match UnixDatagram::bind(&client_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("hnet-ifup: failed to bind client socket {:?}: {}", client_path, e);
            process::exit(1);
        }
    };
    let _ = socket.set_read_timeout(Some(Duration::from_secs(2)));

    let payload = serde_json::to_vec(&request).expect("IpcRequest always serializes");
    if let Err(e) = socket.send_to(&frame(&payload), DAEMON_SOCKET) {
        eprintln!("hnet-ifup: failed to reach homenetd at {}: {}", DAEMON_SOCKET, e);
        let _ = std::fs::remove_file(&client_path);
        process::exit(1);
    }

    let mut buf = [0u8; 64 * 1024];
    match socket.recv(&mut buf) {
        Ok(n) => match unframe(&buf[..n]) {
            Ok(reply) if !reply.is_empty() => {
                println!("{}", String::from_utf8_lossy(reply));
            }
            Ok(_) => {}
            Err(e) => eprintln!("hnet-ifup: malformed reply: {}", e),
        },
        Err(e) => eprintln!("hnet-ifup: no reply from homenetd: {}", e),
    }

    let _ = std::fs::remove_file(&client_path);
}
