//! # rbtv-dl
//!
//! Turns a Red Bull TV video page into a fragmented MP4 stream without ever
//! storing the whole video. A page reference is resolved to its HLS playlist
//! in three upstream calls, then ffmpeg remuxes the playlist and its output is
//! relayed chunk by chunk to an HTTP response or a file.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rbtv_dl::{ffmpeg::Transcoder, relay, resolve::{Endpoints, Resolver}};
//!
//! #[tokio::main]
//! async fn main() {
//!     let resolver = Resolver::new(Endpoints::default());
//!     let video = resolver
//!         .resolve("https://www.redbull.com/int-en/videos/some-video")
//!         .await
//!         .unwrap();
//!
//!     println!("{} -> {}", video.stream.title, video.stream.media_url);
//!
//!     let mut session = Transcoder::default().open(&video.stream).unwrap();
//!     let path = format!("{}.mp4", video.stream.title);
//!     relay::save_to_file(&mut session, std::path::Path::new(&path), |_| {})
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! The `rbtv-dl` binary does the same from the command line, and
//! `rbtv-dl-server` serves `GET /api/download?url=<page>&probe=<0|1>`.

#![forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod config;
pub mod ffmpeg;
pub mod relay;
pub mod resolve;
pub mod sanitize;
pub mod server;
pub mod stats;
pub mod upstream;
pub mod util;
