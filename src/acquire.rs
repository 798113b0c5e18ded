//! Archive acquisition: race a single-file CDN prefetch against a streamed
//! tarball extraction of the whole tree.
//!
//! The race resolves on the first strategy to make the workspace usable.
//! The tarball task is never cancelled by losing; its handle is retained so
//! completion can still be awaited before teardown. Only the extraction
//! writer is abortable, and only during forced early exit.

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use futures::future::select_ok;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::errors::PeekError;
use crate::github::GithubClient;
use crate::reference::{fallback_ref, Reference};
use crate::session::Session;

/// Delay between "tarball connection established" and resolving the race
/// when the prefetch strategy is disabled.
const DEFAULT_GRACE_MS: u64 = 500;

fn grace_delay() -> Duration {
    let ms = std::env::var("GIT_PEEK_GRACE_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_GRACE_MS);
    Duration::from_millis(ms)
}

/// Flag observed by the blocking extraction writer; set only by the exit
/// coordinator during forced early exit.
#[derive(Debug, Clone, Default)]
pub struct ExtractAbort(Arc<AtomicBool>);

impl ExtractAbort {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum FirstDone {
    Prefetch(Result<bool, tokio::task::JoinError>),
    Tarball(Result<Result<(), PeekError>, tokio::task::JoinError>),
}

/// Handles to the in-flight acquisition.
pub struct Acquisition {
    started: watch::Receiver<bool>,
    tarball: Option<JoinHandle<Result<(), PeekError>>>,
    prefetch: Option<JoinHandle<bool>>,
    abort: ExtractAbort,
}

impl Acquisition {
    pub fn abort_handle(&self) -> ExtractAbort {
        self.abort.clone()
    }

    /// Resolve once the workspace is usable: the prefetched file landed, the
    /// full tree finished extracting, or (with prefetch disabled) a short
    /// grace period elapsed after the tarball connection was established.
    /// A tarball failure after both refs is fatal and surfaces here.
    pub async fn wait_until_usable(&mut self) -> Result<(), PeekError> {
        let Some(mut tarball) = self.tarball.take() else {
            return Ok(());
        };

        if let Some(mut prefetch) = self.prefetch.take() {
            let first = tokio::select! {
                res = &mut prefetch => FirstDone::Prefetch(res),
                res = &mut tarball => FirstDone::Tarball(res),
            };
            return match first {
                FirstDone::Prefetch(Ok(true)) => {
                    // Prefetch won; the tarball keeps streaming in the
                    // background and is awaited again before teardown.
                    self.tarball = Some(tarball);
                    Ok(())
                }
                FirstDone::Prefetch(_) => Self::settle(tarball.await),
                FirstDone::Tarball(res) => Self::settle(res),
            };
        }

        // Grace branch: prefetch disabled. Resolve a fixed delay after the
        // tarball connection is established so classification does not block
        // on the entire download; a pre-connection failure is still fatal.
        if !*self.started.borrow_and_update() {
            tokio::select! {
                res = &mut tarball => return Self::settle(res),
                changed = self.started.changed() => {
                    if changed.is_err() {
                        // Sender gone without signalling: task is finishing.
                        return Self::settle(tarball.await);
                    }
                }
            }
        }
        tokio::select! {
            res = &mut tarball => Self::settle(res),
            _ = tokio::time::sleep(grace_delay()) => {
                self.tarball = Some(tarball);
                Ok(())
            }
        }
    }

    /// Propagate a tarball failure that has already settled. Never blocks
    /// on an extraction still in flight; a successful or running task is
    /// not an error.
    pub async fn failure_if_settled(&mut self) -> Result<(), PeekError> {
        if self.tarball.as_ref().is_some_and(|h| h.is_finished()) {
            self.wait_complete().await
        } else {
            Ok(())
        }
    }

    /// Await full extraction (or its failure). Idempotent once settled.
    pub async fn wait_complete(&mut self) -> Result<(), PeekError> {
        match self.tarball.take() {
            Some(handle) => Self::settle(handle.await),
            None => Ok(()),
        }
    }

    fn settle(res: Result<Result<(), PeekError>, tokio::task::JoinError>) -> Result<(), PeekError> {
        match res {
            Ok(inner) => inner,
            Err(join) => Err(PeekError::Io(std::io::Error::other(format!(
                "tarball task failed: {join}"
            )))),
        }
    }
}

/// Launch both strategies for `reference` into `dest`.
pub fn acquire(
    client: &GithubClient,
    session: &Arc<Session>,
    reference: &Reference,
    dest: &Path,
    open_path: &Path,
    prefetch_enabled: bool,
) -> Acquisition {
    let fallback = fallback_ref(&reference.git_ref);
    let (started_tx, started_rx) = watch::channel(false);
    let abort = ExtractAbort::default();

    let tarball = tokio::spawn(fetch_and_extract(
        client.clone(),
        session.clone(),
        TarballRequest {
            primary: client.tarball_url(&reference.owner, &reference.name, &reference.git_ref),
            fallback: client.tarball_url(&reference.owner, &reference.name, &fallback),
            dest: dest.to_path_buf(),
        },
        started_tx,
        abort.clone(),
    ));

    let prefetch = prefetch_enabled.then(|| {
        let filepath = if reference.filepath.is_empty() {
            "README.md".to_string()
        } else {
            reference.filepath.clone()
        };
        let urls = vec![
            client.cdn_file_url(&reference.owner, &reference.name, &reference.git_ref, &filepath),
            client.cdn_file_url(&reference.owner, &reference.name, &fallback, &filepath),
        ];
        tokio::spawn(prefetch_file(client.clone(), urls, open_path.to_path_buf()))
    });

    Acquisition {
        started: started_rx,
        tarball: Some(tarball),
        prefetch,
        abort,
    }
}

/// Fetch the one file the user asked to view (both refs raced, first success
/// wins) and write it at the target path. Failure is non-fatal by contract:
/// it is logged and swallowed, leaving the tarball strategy authoritative.
async fn prefetch_file(client: GithubClient, urls: Vec<String>, target: PathBuf) -> bool {
    let fetches = urls
        .iter()
        .map(|url| {
            let client = client.clone();
            let url = url.clone();
            Box::pin(async move { fetch_nonempty_text(&client, &url).await })
        })
        .collect::<Vec<_>>();

    match select_ok(fetches).await {
        Ok((text, _rest)) => {
            if let Some(parent) = target.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    tracing::debug!("prefetch mkdir failed: {e}");
                    return false;
                }
            }
            match tokio::fs::write(&target, text).await {
                Ok(()) => {
                    tracing::debug!("prefetched {}", target.display());
                    true
                }
                Err(e) => {
                    tracing::debug!("prefetch write failed: {e}");
                    false
                }
            }
        }
        Err(e) => {
            tracing::debug!("prefetch failed for all refs: {e}");
            false
        }
    }
}

async fn fetch_nonempty_text(client: &GithubClient, url: &str) -> Result<String, String> {
    let resp = client
        .get_raw(url)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("HTTP {} for {url}", resp.status().as_u16()));
    }
    let text = resp.text().await.map_err(|e| e.to_string())?;
    if text.trim().is_empty() {
        return Err(format!("empty body for {url}"));
    }
    Ok(text)
}

struct TarballRequest {
    primary: String,
    fallback: String,
    dest: PathBuf,
}

/// Stream the tarball for the primary ref (falling back once), piping the
/// compressed bytes into an incremental extractor. Exhausting both refs is
/// fatal for the whole session.
async fn fetch_and_extract(
    client: GithubClient,
    session: Arc<Session>,
    req: TarballRequest,
    started_tx: watch::Sender<bool>,
    abort: ExtractAbort,
) -> Result<(), PeekError> {
    let resp = match request_tarball(&client, &req.primary).await {
        Ok(resp) => resp,
        Err(first) => {
            tracing::debug!("tarball at primary ref failed: {first}");
            match request_tarball(&client, &req.fallback).await {
                Ok(resp) => resp,
                Err(second) => {
                    tracing::debug!("tarball at fallback ref failed: {second}");
                    return Err(PeekError::AcquisitionExhausted {
                        primary: req.primary,
                        fallback: req.fallback,
                    });
                }
            }
        }
    };

    let _ = started_tx.send(true);
    session.log("⏳ Extracting repository to temp folder...");

    let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
    let dest = req.dest.clone();
    let extract_abort = abort.clone();
    let extractor =
        tokio::task::spawn_blocking(move || extract_stream(rx, &dest, &extract_abort));

    let mut stream = resp.bytes_stream();
    let mut stream_err: Option<PeekError> = None;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if tx.send(bytes.to_vec()).await.is_err() {
                    break; // extractor gone (aborted or failed)
                }
            }
            Err(e) => {
                stream_err = Some(PeekError::Http(e));
                break;
            }
        }
    }
    drop(tx);

    let extracted = extractor
        .await
        .map_err(|e| PeekError::Io(std::io::Error::other(format!("extractor panicked: {e}"))))?;
    if let Some(e) = stream_err {
        return Err(e);
    }
    extracted?;
    session.log("💿 Finished downloading repository!");
    Ok(())
}

/// GET a tarball URL; non-success statuses become a descriptive error so the
/// caller can retry the fallback ref. 401/403 get the private-repo hint.
async fn request_tarball(client: &GithubClient, url: &str) -> Result<reqwest::Response, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        Err(format!(
            "HTTP {}\n{}\n-\nIf this is a private repo, consider setting $GITHUB_TOKEN. \
             To persist it, store it in $HOME/.git-peek (a .env file)",
            status.as_u16(),
            body
        ))
    } else {
        Err(format!("HTTP {} for {url}", status.as_u16()))
    }
}

/// Reader that drains the byte channel; fails fast once aborted.
struct ChannelReader {
    rx: mpsc::Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
    abort: ExtractAbort,
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.abort.is_aborted() {
                return Err(std::io::Error::other("extraction aborted"));
            }
            if self.pos < self.buf.len() {
                let n = (self.buf.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match self.rx.blocking_recv() {
                Some(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
    }
}

/// Incremental gzip+tar extraction into `dest`, stripping the single leading
/// `{repo}-{sha}/` component. Modification times are not preserved (content
/// is fresh) and pre-existing files (the prefetched one) are overwritten.
fn extract_stream(
    rx: mpsc::Receiver<Vec<u8>>,
    dest: &Path,
    abort: &ExtractAbort,
) -> Result<(), PeekError> {
    let reader = ChannelReader {
        rx,
        buf: Vec::new(),
        pos: 0,
        abort: abort.clone(),
    };
    let gz = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);
    archive.set_preserve_mtime(false);
    archive.set_overwrite(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(stripped) = strip_leading_component(&path) else {
            continue;
        };
        let target = dest.join(&stripped);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

/// Drop the wrapping `{repo}-{sha}/` prefix; reject traversal components.
fn strip_leading_component(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    components.next()?;
    let rest: PathBuf = components
        .as_path()
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(Ok(p)),
            Component::CurDir => None,
            _ => Some(Err(())),
        })
        .collect::<Result<PathBuf, ()>>()
        .ok()?;
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzipped_tar(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(&tar_bytes).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn test_strip_leading_component() {
        assert_eq!(
            strip_leading_component(Path::new("repo-abc123/src/main.rs")),
            Some(PathBuf::from("src/main.rs"))
        );
        assert_eq!(strip_leading_component(Path::new("repo-abc123/")), None);
        assert_eq!(strip_leading_component(Path::new("repo-abc123")), None);
        // Traversal entries are rejected outright.
        assert_eq!(strip_leading_component(Path::new("repo/../escape")), None);
    }

    #[test]
    fn test_extract_stream_strips_prefix_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        // Simulate a prefetched file that the extractor overwrites.
        std::fs::write(dir.path().join("README.md"), "prefetched").unwrap();

        let payload = gzipped_tar(&[
            ("hello-world-deadbeef/README.md", "# fresh\n"),
            ("hello-world-deadbeef/src/lib.rs", "pub fn x() {}\n"),
        ]);

        // Everything is queued before the extractor runs, so the channel
        // must hold the whole payload no matter how the fixture grows.
        let chunks: Vec<Vec<u8>> = payload.chunks(64).map(|c| c.to_vec()).collect();
        let (tx, rx) = mpsc::channel::<Vec<u8>>(chunks.len().max(1));
        for chunk in chunks {
            tx.blocking_send(chunk).unwrap();
        }
        drop(tx);

        extract_stream(rx, dir.path(), &ExtractAbort::default()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "# fresh\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            "pub fn x() {}\n"
        );
    }

    #[test]
    fn test_aborted_extraction_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel::<Vec<u8>>(4);
        let abort = ExtractAbort::default();
        abort.abort();
        // Channel left open: the reader must fail via the abort flag, not
        // by waiting for the sender.
        let res = extract_stream(rx, dir.path(), &abort);
        assert!(res.is_err());
        drop(tx);
    }
}
