//! Moves transcoder output to its consumer, one pulled chunk at a time.
//!
//! Nothing is read from ffmpeg before the consumer asks for it, so a slow
//! client slows the transcode down instead of piling up memory.

use std::{
    io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use tokio::{fs::File, io::AsyncWriteExt};

use crate::ffmpeg::{TranscodeError, TranscodeSession};

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("could not write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub bytes: u64,
    /// The session was cancelled before ffmpeg finished.
    pub interrupted: bool,
}

/// Response body for an HTTP download. `first` is a chunk the caller already
/// pulled, e.g. to make sure ffmpeg started before committing to a 200.
///
/// Headers are already on the wire when this runs, so a failing transcoder
/// is only logged and the body simply ends. Dropping the stream (client
/// went away) tears the process down.
pub fn body_stream(
    session: TranscodeSession,
    first: Option<Bytes>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let rest = stream::unfold(session, |mut session| async move {
        match session.next_chunk().await {
            Ok(Some(chunk)) => Some((Ok(chunk), session)),
            Ok(None) => None,
            Err(e) => {
                error!(
                    "Transcode ended abnormally after {} bytes: {}",
                    session.bytes_out(),
                    e
                );
                None
            }
        }
    });

    stream::iter(first.map(Ok::<_, io::Error>)).chain(rest)
}

/// Writes the session's output to a new file at `path`.
///
/// The file is created with the first chunk, so a transcoder that fails
/// before producing anything leaves no file behind. `on_progress` receives
/// the running byte count after every chunk. If the session gets cancelled
/// (Ctrl-C) or fails later, whatever was written so far stays on disk.
pub async fn save_to_file<F>(
    session: &mut TranscodeSession,
    path: &Path,
    mut on_progress: F,
) -> Result<RelayOutcome, RelayError>
where
    F: FnMut(u64),
{
    let write_error = |source| RelayError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file: Option<File> = None;
    let mut bytes = 0;

    let result = loop {
        match session.next_chunk().await {
            Ok(Some(chunk)) => {
                let target = match file.take() {
                    Some(opened) => Ok(opened),
                    None => File::create(path).await,
                };
                let mut opened = match target {
                    Ok(opened) => opened,
                    Err(e) => {
                        session.cancel().await;
                        break Err(write_error(e));
                    }
                };
                let written = opened.write_all(&chunk).await;
                file = Some(opened);
                if let Err(e) = written {
                    session.cancel().await;
                    break Err(write_error(e));
                }
                bytes += chunk.len() as u64;
                on_progress(bytes);
            }
            // A clean transcode with no output still saves an (empty) file.
            Ok(None) if file.is_none() && !session.is_cancelled() => {
                match File::create(path).await {
                    Ok(created) => {
                        file = Some(created);
                        break Ok(());
                    }
                    Err(e) => break Err(write_error(e)),
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(RelayError::Transcode(e)),
        }
    };

    let flushed = match file.as_mut() {
        Some(file) => file.flush().await.map_err(write_error),
        None => Ok(()),
    };
    result?;
    flushed?;

    Ok(RelayOutcome {
        bytes,
        interrupted: session.is_cancelled(),
    })
}
