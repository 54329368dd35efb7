#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use muninn_gate_lib::{config::load_from_path, gateway, telemetry, Listener, PlainFactory, Session};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Muninn reliable-datagram gateway (echo server)")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "config/basic.toml")]
    config: PathBuf,
}

/// Echoes every received message back over the session.
struct EchoListener;

impl Listener for EchoListener {
    fn on_connected(&self, session: &Arc<Session>) -> muninn_gate_lib::Result<()> {
        info!(conv = session.conv(), origin = %session.user().origin(), "peer connected");
        Ok(())
    }

    fn handle_receive(&self, session: &Arc<Session>, message: Bytes) {
        if let Err(e) = session.send(message) {
            error!(conv = session.conv(), error = %e, "echo failed");
        }
    }

    fn handle_close(&self, session: &Arc<Session>) {
        info!(conv = session.conv(), origin = %session.user().origin(), "peer disconnected");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match load_from_path(&cli.config) {
        Ok(cfg) => {
            if let Err(err) = telemetry::init_tracing(&cfg.logging) {
                eprintln!("failed to initialize tracing: {err}");
                std::process::exit(1);
            }
            info!(listen = %cfg.listen, executors = cfg.runtime.executors, "configuration loaded");
            let cfg = Arc::new(cfg);
            if let Err(err) =
                gateway::run(cfg, Arc::new(EchoListener), Arc::new(PlainFactory)).await
            {
                error!(%err, "gateway exited with error");
                telemetry::shutdown_tracing();
                std::process::exit(1);
            }
            telemetry::shutdown_tracing();
        }
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    }
}
