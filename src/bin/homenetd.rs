//! `homenetd`: the daemon binary. Wires configuration, persisted state, the
//! PA data model/core/local/PD drivers, the routing engine, and the IPC
//! server together around a single cooperative event loop (spec §5).
//!
//! The Trickle flooding layer this daemon would normally consume its
//! topology view from is out of scope (see [`homenetd::node::FloodView`]):
//! this binary runs against an empty, self-only [`homenetd::node::TestFloodView`],
//! which makes it correct for a single, unfederated router and a faithful
//! skeleton for wiring in a real flooding session later.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use homenetd::config::Config;
use homenetd::iface::InterfaceRegistry;
use homenetd::ipc;
use homenetd::logging;
use homenetd::node::TestFloodView;
use homenetd::pa::{PaCore, PaCoreConfig, PaLocal, PaPd, PaStore};
use homenetd::rid::RouterId;
use homenetd::routing::{RoutingBackend, RoutingEngine, ROUTING_NONE};
use homenetd::store::Store;
use homenetd::time::{Clock, SystemClock};

/// `homenetd` command-line arguments.
#[derive(Debug, Parser)]
#[clap(name = "homenetd", about = "Home-network prefix-assignment and fallback-routing core")]
struct Args {
    /// Path to an optional TOML configuration file.
    #[clap(short, long)]
    config: Option<PathBuf>,
}

/// How often the event loop re-runs every subsystem. A real port of
/// `pa_local_schedule`'s per-subsystem timer would sleep exactly until the
/// earliest reported wakeup; a fixed tick is simpler and still correct,
/// just occasionally a tick late.
const TICK: Duration = Duration::from_millis(200);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&config.log_filter);

    let local_set = tokio::task::LocalSet::new();
    local_set.run_until(run(config)).await;
}

async fn run(config: Config) {
    let clock = SystemClock::new();
    let self_rid = RouterId::new(rand::random());
    info!(%self_rid, "starting homenetd");

    let ifaces = Rc::new(RefCell::new(InterfaceRegistry::new()));
    let pa_store = Rc::new(RefCell::new(PaStore::new(self_rid)));
    let active_routing_protocol = Rc::new(RefCell::new(ROUTING_NONE));
    let flood = TestFloodView::new(self_rid, vec![]);

    let mut persisted = Store::open(config.store.path.clone());
    let mut pa_core = PaCore::new(PaCoreConfig {
        flooding_delay_ms: config.pa.flooding_delay_ms,
        priority: config.pa.priority,
    });
    let mut pa_local = PaLocal::new();
    let mut pa_pd = PaPd::new();
    let mut routing_engine = RoutingEngine::new(
        RoutingBackend::new(config.routing.backend_script.clone()),
        config.routing.max_protocol,
    );

    let ipc_task = tokio::task::spawn_local(ipc::serve(
        PathBuf::from(&config.ipc.socket_path),
        ifaces.clone(),
        pa_store.clone(),
        active_routing_protocol.clone(),
        Rc::new(config.pa.clone()),
        {
            let clock = clock.clone();
            move || clock.now()
        },
    ));

    let tick_loop = async {
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            let now = clock.now();

            {
                let mut store = pa_store.borrow_mut();
                store.expire_stale_dps(now);
                {
                    let ifaces = ifaces.borrow();
                    pa_core.run(&mut store, &ifaces, &flood, now);
                }
                pa_local.run(&mut store, &flood, &config.pa, &mut persisted, now);
                for lease_id in pa_pd.run(&mut store, &config.pa_pd, now) {
                    info!(lease_id = %lease_id, "pa-pd lease updated, notifying client");
                }
                store.gc();
            }

            {
                let mut ifaces = ifaces.borrow_mut();
                routing_engine.run(&flood, &mut ifaces);
            }
            *active_routing_protocol.borrow_mut() = routing_engine.active();
        }
    };

    tokio::select! {
        _ = tick_loop => {}
        result = ipc_task => {
            match result {
                Ok(Ok(())) => error!("ipc server exited unexpectedly"),
                Ok(Err(e)) => {
                    error!(error = %e, "ipc server failed to bind its control socket");
                    std::process::exit(3);
                }
                Err(e) => error!(error = %e, "ipc server task panicked"),
            }
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }
}
