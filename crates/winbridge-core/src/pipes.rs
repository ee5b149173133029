//! Local pipe transport.
//!
//! A session uses two single-instance local pipes, realized as Unix-domain
//! sockets under the user's runtime directory. The library side binds both
//! and waits for the agent to connect; the agent side connects by name.
//! Either operation is bounded by [`CONNECT_TIMEOUT`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::debug;

/// Default timeout for pipe connect/accept.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Allocates unique pipe-name pairs for one pipe namespace.
///
/// The counter lives inside the value rather than as a free global so that
/// concurrent sessions created through different scopes stay independent.
#[derive(Debug)]
pub struct PipeScope {
    prefix: String,
    counter: AtomicU32,
}

/// The two pipe paths of one session.
#[derive(Debug, Clone)]
pub struct PipePair {
    pub control: PathBuf,
    pub data: PathBuf,
}

impl PipeScope {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            counter: AtomicU32::new(0),
        }
    }

    /// Next unique `<dir>/<prefix>-<pid>-<counter>{-control,-data}` pair.
    pub fn next_pair(&self) -> PipePair {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let base = runtime_dir().join(format!(
            "{}-{}-{}",
            self.prefix,
            std::process::id(),
            n
        ));
        PipePair {
            control: with_suffix(&base, "-control"),
            data: with_suffix(&base, "-data"),
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    std::env::temp_dir()
}

// ========== Listener ==========

/// Bound, single-instance pipe listener. The socket file is removed on drop.
pub struct PipeListener {
    path: PathBuf,
    inner: UnixListener,
}

impl PipeListener {
    pub fn bind(path: &Path) -> Result<Self> {
        // A stale socket file from a dead process would make bind fail.
        if path.exists() {
            std::fs::remove_file(path).ok();
        }
        let inner = UnixListener::bind(path)
            .with_context(|| format!("failed to bind pipe {}", path.display()))?;
        debug!(path = %path.display(), "pipe bound");
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    /// Accept the single expected peer, bounded by [`CONNECT_TIMEOUT`].
    pub async fn accept(&self) -> Result<PipeStream> {
        let (stream, _) = timeout(CONNECT_TIMEOUT, self.inner.accept())
            .await
            .map_err(|_| anyhow!("timed out waiting for pipe peer on {}", self.path.display()))?
            .with_context(|| format!("accept failed on {}", self.path.display()))?;
        Ok(PipeStream { inner: stream })
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

// ========== Stream ==========

/// One end of a connected pipe.
#[derive(Debug)]
pub struct PipeStream {
    inner: UnixStream,
}

impl PipeStream {
    /// Connect to a pipe by name, bounded by [`CONNECT_TIMEOUT`].
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = timeout(CONNECT_TIMEOUT, UnixStream::connect(path))
            .await
            .map_err(|_| anyhow!("timed out connecting to pipe {}", path.display()))?
            .with_context(|| format!("failed to connect to pipe {}", path.display()))?;
        debug!(path = %path.display(), "pipe connected");
        Ok(Self { inner: stream })
    }

    /// Split into independently-owned read and write halves.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.inner.into_split()
    }

    /// An already-connected socket pair, for in-process tests.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixStream::pair().context("socketpair failed")?;
        Ok((Self { inner: a }, Self { inner: b }))
    }
}

impl tokio::io::AsyncRead for PipeStream {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for PipeStream {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn pipe_names_are_unique_per_scope() {
        let scope = PipeScope::new("winbridge");
        let a = scope.next_pair();
        let b = scope.next_pair();
        assert_ne!(a.control, b.control);
        assert_ne!(a.data, b.data);
        assert!(a.control.to_string_lossy().ends_with("-control"));
        assert!(a.data.to_string_lossy().ends_with("-data"));
    }

    #[tokio::test]
    async fn bind_accept_connect() {
        let scope = PipeScope::new("winbridge-test");
        let pair = scope.next_pair();
        let listener = PipeListener::bind(&pair.control).unwrap();
        let path = pair.control.clone();
        let client = tokio::spawn(async move { PipeStream::connect(&path).await.unwrap() });
        let mut server_end = listener.accept().await.unwrap();
        let mut client_end = client.await.unwrap();
        client_end.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn accept_times_out_without_peer() {
        tokio::time::pause();
        let scope = PipeScope::new("winbridge-test");
        let pair = scope.next_pair();
        let listener = PipeListener::bind(&pair.data).unwrap();
        let err = listener.accept().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
