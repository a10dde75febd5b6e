use std::{path::PathBuf, time::Duration};

use crate::{
    ffmpeg::{Transcoder, DEFAULT_CHUNK_SIZE},
    resolve::{Endpoints, DEFAULT_PLAYER_API_URL, DEFAULT_SITE_URL},
};

/// Options shared by the downloader and the server.
#[derive(Debug, Clone, clap::Args)]
pub struct PipelineArgs {
    /// Base URL of the video platform
    #[arg(long, env = "RBTV_SITE_URL", default_value = DEFAULT_SITE_URL)]
    pub site_url: String,

    /// Base URL of the player API that hands out stream URLs
    #[arg(long, env = "RBTV_PLAYER_API_URL", default_value = DEFAULT_PLAYER_API_URL)]
    pub player_api_url: String,

    /// ffmpeg binary used for remuxing
    #[arg(long, env = "RBTV_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Milliseconds ffmpeg gets to exit after SIGTERM before it is killed
    #[arg(long, env = "RBTV_KILL_GRACE_MS", default_value_t = 500)]
    pub kill_grace_ms: u64,
}

impl PipelineArgs {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            site: self.site_url.clone(),
            player_api: self.player_api_url.clone(),
        }
    }

    pub fn transcoder(&self) -> Transcoder {
        Transcoder {
            program: self.ffmpeg.clone(),
            grace: Duration::from_millis(self.kill_grace_ms),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        pipeline: PipelineArgs,
    }

    #[test]
    fn defaults_point_at_the_platform() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        assert_eq!(cli.pipeline.endpoints(), Endpoints::default());

        let transcoder = cli.pipeline.transcoder();
        assert_eq!(transcoder.program, PathBuf::from("ffmpeg"));
        assert_eq!(transcoder.grace, Duration::from_millis(500));
        assert_eq!(transcoder.chunk_size, 8192);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "test",
            "--site-url",
            "http://127.0.0.1:9000",
            "--player-api-url",
            "http://127.0.0.1:9001",
            "--ffmpeg",
            "/opt/ffmpeg/bin/ffmpeg",
            "--kill-grace-ms",
            "1500",
        ])
        .unwrap();

        let endpoints = cli.pipeline.endpoints();
        assert_eq!(endpoints.site, "http://127.0.0.1:9000");
        assert_eq!(endpoints.player_api, "http://127.0.0.1:9001");

        let transcoder = cli.pipeline.transcoder();
        assert_eq!(transcoder.program, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(transcoder.grace, Duration::from_millis(1500));
    }
}
