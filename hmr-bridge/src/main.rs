use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use hmr_bridge::defaults::{
    DEFAULT_BIND_ADDR, DEFAULT_CANDIDATE_PORTS, DEFAULT_LISTEN_PORT, DEFAULT_TARGET_PORT,
    PROBE_TIMEOUT,
};
use hmr_bridge::{Bridge, BridgeError, PortProbe, effective_candidates, ensure_not_self, server};
use hmr_bridge_core::{ExecutionContext, PortPolicy, TargetEndpoint};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// HMR Bridge - exposes a host dev server inside containers
#[derive(Parser)]
#[command(name = "hmr-bridge")]
#[command(version)]
#[command(about = "Forward HTTP and HMR WebSocket traffic to a dev server on the host")]
struct Args {
    /// Port to listen on
    #[arg(default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Address to listen on
    #[arg(long, env = "HMR_BRIDGE_BIND", default_value = DEFAULT_BIND_ADDR)]
    bind: String,

    /// Dev server ports to probe, in order of preference
    #[arg(long = "candidate-port", env = "HMR_BRIDGE_PORTS", value_delimiter = ',')]
    candidate_ports: Vec<u16>,

    /// Port used when no candidate answers
    #[arg(long, env = "VITE_PORT")]
    default_port: Option<u16>,

    /// Explicit dev server endpoint (host:port); disables probing
    #[arg(long, env = "HMR_BRIDGE_TARGET")]
    target: Option<String>,

    /// Rewrite every loopback URL to this port instead of keeping its own
    #[arg(long, env = "HMR_BRIDGE_FIXED_PORT")]
    fixed_port: Option<u16>,

    /// Print the detected environment as JSON and exit
    #[arg(long)]
    print_env: bool,

    /// Print the rewritten form of URL and exit
    #[arg(long, value_name = "URL")]
    rewrite: Option<String>,
}

#[derive(Serialize)]
struct EnvReport<'a> {
    context: &'a ExecutionContext,
    target: &'a TargetEndpoint,
    listen_port: u16,
    rewrite_host: Option<&'a str>,
    fixed_port: Option<u16>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let rt = tokio::runtime::Runtime::new()?;
    if let Err(e) = rt.block_on(run(args)) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), BridgeError> {
    let bind_ip: IpAddr = args
        .bind
        .parse()
        .map_err(|_| BridgeError::InvalidBindAddr(args.bind.clone()))?;
    let addr = SocketAddr::new(bind_ip, args.port);

    let context = hmr_bridge_core::detect();
    tracing::info!(context = context.name(), "execution context detected");

    let target = resolve_target(&args, &context).await?;
    ensure_not_self(&target, args.port)?;

    let ports = args.fixed_port.map_or(PortPolicy::Preserve, PortPolicy::Fixed);
    let bridge = Bridge::new(context, target).with_port_policy(ports);

    if let Some(url) = &args.rewrite {
        println!("{}", bridge.rewriter().rewrite(url));
        return Ok(());
    }

    if args.print_env {
        let report = EnvReport {
            context: bridge.context(),
            target: bridge.target(),
            listen_port: args.port,
            rewrite_host: bridge.rewriter().replacement_host(),
            fixed_port: args.fixed_port,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let listener = server::bind(addr).await?;
    tracing::info!(
        listen = %addr,
        upstream = %bridge.target(),
        "hmr bridge listening"
    );

    tokio::select! {
        _ = server::serve(listener, Arc::new(bridge)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}

async fn resolve_target(
    args: &Args,
    context: &ExecutionContext,
) -> Result<TargetEndpoint, BridgeError> {
    if let Some(raw) = &args.target {
        let target: TargetEndpoint = raw.parse()?;
        tracing::info!(upstream = %target, "using explicit target, probing skipped");
        return Ok(target);
    }

    let candidates = if args.candidate_ports.is_empty() {
        DEFAULT_CANDIDATE_PORTS
    } else {
        args.candidate_ports.as_slice()
    };
    let candidates = effective_candidates(candidates, context, args.port);
    let default_port = args.default_port.unwrap_or(DEFAULT_TARGET_PORT);

    Ok(PortProbe::for_context(context, PROBE_TIMEOUT)
        .find_target(&candidates, context, default_port)
        .await)
}
