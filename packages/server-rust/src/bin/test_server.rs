//! Standalone RPC server with a handful of demo routes, for manual and
//! cross-language testing of the wire protocol.

use std::io::{self, IsTerminal};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hashwire_core::{catalog, frame::DEFAULT_MAX_FRAME_LENGTH, status};
use hashwire_server::network::{ConnectionConfig, Transport, TransportConfig};
use hashwire_server::service::{RouteMapper, TcpRequest, TcpResponse};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "test-server")]
#[command(about = "Length-prefixed JSON RPC server with demo routes")]
struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 = OS-assigned)
    #[arg(long, env = "TCP_PORT", default_value_t = 4001)]
    port: u16,

    /// Largest accepted payload in bytes
    #[arg(long, env = "MAX_FRAME_LENGTH", default_value_t = DEFAULT_MAX_FRAME_LENGTH)]
    max_frame_length: usize,

    /// Seconds to wait for in-flight handlers on shutdown
    #[arg(long, default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_ansi(io::stderr().is_terminal());
    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }
}

fn register_demo_routes(mapper: &mut RouteMapper) -> anyhow::Result<()> {
    mapper
        .register_route(catalog::USER_VERIFY, |req: TcpRequest, mut res: TcpResponse| async move {
            if req.has_user() {
                res.json(json!({"valid": true, "user": req.user}));
            } else {
                res.status(status::UNAUTHORIZED).json(json!({"valid": false}));
            }
            anyhow::Ok(())
        })?
        .register_route(catalog::USER_GET_PROFILE, |req: TcpRequest, res: TcpResponse| async move {
            res.json(json!({"user": req.user, "sender": req.header("x-sender-id")}));
            anyhow::Ok(())
        })?
        .register_route(catalog::USER_UPDATE_PROFILE, |req: TcpRequest, res: TcpResponse| async move {
            let id = req.param("id").context("route captured no id")?;
            res.json(json!({"id": id, "updated": req.body}));
            anyhow::Ok(())
        })?
        .register_route(catalog::ROLE_GET_PERMISSION_BY_ROLE, |_req: TcpRequest, res: TcpResponse| async move {
            res.json(json!({"permissions": ["VIEW_ONLY"]}));
            anyhow::Ok(())
        })?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = TransportConfig {
        host: args.host,
        port: args.port,
        connection: ConnectionConfig {
            max_frame_length: args.max_frame_length,
            ..ConnectionConfig::default()
        },
        drain_timeout: Duration::from_secs(args.drain_timeout_secs),
        ..TransportConfig::default()
    };

    let (transport, inbound) = Transport::new(config);
    let mut mapper = RouteMapper::new(transport.clone());
    register_demo_routes(&mut mapper)?;

    let addr = transport
        .start_server()
        .await
        .context("failed to start TCP transport")?;
    info!(%addr, routes = mapper.route_count(), "test server ready");
    let dispatcher = tokio::spawn(mapper.run(inbound));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    transport.shutdown().await;
    dispatcher.await.context("route mapper task failed")?;
    Ok(())
}
