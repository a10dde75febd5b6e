use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use rbtv_dl::{
    config::PipelineArgs,
    relay::{self, RelayOutcome},
    resolve::Resolver,
    stats::TransferProgress,
    util,
};

/// Download a Red Bull TV video as MP4
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// The URL of the video page
    url: String,

    /// Output file path (defaults to the video title)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = Resolver::new(cli.pipeline.endpoints());
    let video = resolver.resolve(&cli.url).await?;
    log::info!("M3U stream found for {}", cli.url);

    let path = output_path(cli.output.as_deref(), &video.stream.title);
    let mut session = cli.pipeline.transcoder().open(&video.stream)?;

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    log::info!("Converting and saving {}", video.stream.media_url);
    let mut progress = TransferProgress::new();
    let result = relay::save_to_file(&mut session, &path, |bytes| progress.update(bytes)).await;
    println!();

    let RelayOutcome { bytes, interrupted } = result?;
    if interrupted {
        log::info!(
            "Interrupted by user, kept {} ({})",
            path.display(),
            util::format_bytes(bytes)
        );
    } else {
        log::info!(
            "Successfully saved {} ({})",
            path.display(),
            util::format_bytes(bytes)
        );
    }

    Ok(())
}

/// Where to write: the requested path with an `.mp4` extension, or
/// `<title>.mp4`.
fn output_path(requested: Option<&Path>, title: &str) -> PathBuf {
    match requested.filter(|p| !p.as_os_str().is_empty()) {
        Some(path) => {
            let is_mp4 = path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("mp4"));
            if is_mp4 {
                path.to_path_buf()
            } else {
                path.with_extension("mp4")
            }
        }
        None => PathBuf::from(format!("{}.mp4", title)),
    }
}
