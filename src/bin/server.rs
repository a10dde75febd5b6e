use std::net::SocketAddr;

use clap::Parser;
use rbtv_dl::{
    config::PipelineArgs,
    server::{self, AppContext},
};
use tokio_util::sync::CancellationToken;

/// Serve Red Bull TV videos as streamed MP4 downloads
#[derive(Parser)]
#[command(version)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "RBTV_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = ServerArgs::parse();
    let ctx = AppContext::new(args.pipeline.endpoints(), args.pipeline.transcoder());
    tokio::spawn(shutdown_signal(ctx.shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    server::serve(listener, ctx).await
}

/// First Ctrl-C starts a graceful shutdown, a second one exits right away.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for Ctrl-C: {}", e);
        return;
    }
    log::info!("Shutting down");
    shutdown.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        log::warn!("Second Ctrl-C, exiting now");
        std::process::exit(130);
    }
}
