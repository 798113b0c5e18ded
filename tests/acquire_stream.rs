//! End-to-end acquisition against a loopback HTTP server: the tarball is
//! streamed, decompressed, and extracted with its leading path component
//! stripped; the prefetch strategy makes the workspace usable while the
//! tarball is still in flight.

use std::io::{Read as _, Write as _};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;

use git_peek::acquire::acquire;
use git_peek::errors::PeekError;
use git_peek::github::GithubClient;
use git_peek::reference::Reference;
use git_peek::session::Session;
use git_peek::workspace::Workspace;

// Endpoint overrides are process-global; serialize the tests that set them.
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn gzipped_tar(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .expect("append");
    }
    let tar_bytes = builder.into_inner().expect("tar");
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&tar_bytes).expect("gz write");
    gz.finish().expect("gz finish")
}

/// Serve `conns` connections, each getting `status_line` + `body` after
/// `delay`. Returns the chosen port.
fn spawn_server(status_line: &'static str, body: Vec<u8>, delay: Duration, conns: usize) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    std::thread::spawn(move || {
        for _ in 0..conns {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            // Drain the request headers before answering.
            let mut buf = [0u8; 4096];
            let mut seen = Vec::new();
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
            std::thread::sleep(delay);
            let head = format!(
                "{status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        }
    });
    port
}

fn test_reference() -> Reference {
    Reference {
        host: "github.com".to_string(),
        owner: "octocat".to_string(),
        name: "hello-world".to_string(),
        git_ref: "main".to_string(),
        filepath: String::new(),
        line: None,
        pull_request: None,
        raw_url: "https://github.com/octocat/hello-world".to_string(),
    }
}

#[test]
fn test_tarball_streams_and_extracts_without_prefetch() {
    let payload = gzipped_tar(&[
        ("hello-world-0123abc/README.md", "# hello\n"),
        ("hello-world-0123abc/src/lib.rs", "pub fn hi() {}\n"),
    ]);
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let port = spawn_server("HTTP/1.1 200 OK", payload, Duration::ZERO, 1);
    std::env::set_var("GIT_PEEK_API_BASE", format!("http://127.0.0.1:{port}"));
    std::env::set_var("GIT_PEEK_GRACE_MS", "50");

    let parent = tempfile::tempdir().expect("tmpdir");
    let ws = Workspace::create(Some(parent.path()), "hello-world", "main", false).expect("create");
    let ws_path = ws.path().to_path_buf();
    let session = Arc::new(Session::new(ws, false));

    let rt = rt();
    rt.block_on(async {
        let client = GithubClient::new().expect("client");
        let reference = test_reference();
        let open_path = ws_path.join("README.md");
        let mut acq = acquire(&client, &session, &reference, &ws_path, &open_path, false);
        acq.wait_until_usable().await.expect("usable");
        acq.wait_complete().await.expect("complete");
    });

    // Leading "{repo}-{sha}/" component stripped, tree intact.
    assert_eq!(
        std::fs::read_to_string(ws_path.join("README.md")).expect("README"),
        "# hello\n"
    );
    assert_eq!(
        std::fs::read_to_string(ws_path.join("src/lib.rs")).expect("lib.rs"),
        "pub fn hi() {}\n"
    );

    session.do_exit();
    assert!(!ws_path.exists());
}

#[test]
fn test_prefetch_makes_workspace_usable_before_tarball_settles() {
    // CDN answers immediately; the tarball endpoint stalls, then 404s both
    // refs. Usability must come from the prefetched file alone, and the
    // tarball failure surfaces later, at completion time.
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let cdn_port = spawn_server(
        "HTTP/1.1 200 OK",
        b"# prefetched readme\n".to_vec(),
        Duration::ZERO,
        2,
    );
    let api_port = spawn_server(
        "HTTP/1.1 404 Not Found",
        b"{}".to_vec(),
        Duration::from_millis(500),
        2,
    );
    std::env::set_var("GIT_PEEK_CDN_BASE", format!("http://127.0.0.1:{cdn_port}/cdn"));
    std::env::set_var("GIT_PEEK_API_BASE", format!("http://127.0.0.1:{api_port}"));

    let parent = tempfile::tempdir().expect("tmpdir");
    let ws = Workspace::create(Some(parent.path()), "hello-world", "main", false).expect("create");
    let ws_path = ws.path().to_path_buf();
    let session = Arc::new(Session::new(ws, false));

    let rt = rt();
    let completion = rt.block_on(async {
        let client = GithubClient::new().expect("client");
        let reference = test_reference();
        let open_path = ws_path.join("README.md");
        let mut acq = acquire(&client, &session, &reference, &ws_path, &open_path, true);
        acq.wait_until_usable().await.expect("prefetch should win");
        assert_eq!(
            tokio::fs::read_to_string(&open_path).await.expect("read"),
            "# prefetched readme\n"
        );
        acq.wait_complete().await
    });

    let err = completion.expect_err("tarball exhaustion must surface at completion");
    assert!(matches!(err, PeekError::AcquisitionExhausted { .. }), "{err}");

    session.do_exit();
    assert!(!ws_path.exists());
}
