mod args;
mod transport;

use std::fs;
use std::net::UdpSocket;

use clap::Parser;
use dhcp_core::{Config, Engine, FileLeaseStore, InMemoryLeaseStore, LeaseStore, NoopPingProbe};

use crate::args::Args;
use crate::transport::{RawSocket, UdpTransport};

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> anyhow::Result<()> {
    let config_text = fs::read_to_string(&args.config)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", args.config.display()))?;
    let config = Config::from_yaml(&config_text)?;

    let mut store: Box<dyn LeaseStore> = match &args.lease_file {
        Some(path) => Box::new(FileLeaseStore::open(path).map_err(|e| anyhow::anyhow!("opening lease file: {e}"))?),
        None => Box::new(InMemoryLeaseStore::new()),
    };
    let mut ping = NoopPingProbe;

    let socket = UdpSocket::bind(&args.bind).map_err(|e| anyhow::anyhow!("binding {}: {e}", args.bind))?;
    socket.set_broadcast(true)?;
    log::info!("Listening on {} for {}", args.bind, args.interface_address);

    let raw = match &args.interface {
        Some(interface) => {
            let raw = RawSocket::bind(interface)
                .map_err(|e| anyhow::anyhow!("opening a raw socket on {interface}: {e}"))?;
            log::info!("Raw unicast-without-ARP enabled on {interface}");
            Some(raw)
        }
        None => None,
    };

    let engine = Engine::new(&config, args.interface_address);

    let mut buf = [0u8; 1500];
    loop {
        let (len, _peer) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to receive a datagram: {e}");
                continue;
            }
        };

        let mut transport = UdpTransport::new(&socket, raw.as_ref());
        engine.handle_datagram(&buf[..len], args.interface_address, store.as_mut(), &mut ping, &mut transport);
    }
}
