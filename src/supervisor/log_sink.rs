//! Per-worker log files
//!
//! Both output streams of a worker are copied line by line into one
//! append-only file, each line prefixed with the channel name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::property::unix_nanos;

/// `{dir}/app-{channel}-{unix_nanos}.log`
pub fn log_path(dir: &Path, channel: &str) -> PathBuf {
    dir.join(format!("app-{channel}-{}.log", unix_nanos()))
}

#[derive(Clone)]
pub struct LogSink {
    channel: Arc<str>,
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl LogSink {
    pub async fn open(path: &Path, channel: &str) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            channel: Arc::from(channel),
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let entry = format!("[{}] {}\n", self.channel, line.trim_end_matches('\r'));
        let mut file = self.file.lock().await;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }

    /// Copy `stream` into the file until it closes
    pub fn pump<R>(&self, stream: R, source: &'static str) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sink = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Err(e) = sink.write_line(&line).await {
                            warn!(channel = %sink.channel, source, error = %e, "Failed to write worker log");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(channel = %sink.channel, source, error = %e, "Worker output stream failed");
                        break;
                    }
                }
            }
            debug!(channel = %sink.channel, source, "Worker output stream closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_are_prefixed_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(dir.path(), "room-1");
        let sink = LogSink::open(&path, "room-1").await.unwrap();

        let stdout: &[u8] = b"hello\nworld\r\n";
        let stderr: &[u8] = b"oops\n";
        sink.pump(stdout, "stdout").await.unwrap();
        sink.pump(stderr, "stderr").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["[room-1] hello", "[room-1] world", "[room-1] oops"]);
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.log");

        LogSink::open(&path, "a").await.unwrap().write_line("one").await.unwrap();
        LogSink::open(&path, "a").await.unwrap().write_line("two").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "[a] one\n[a] two\n");
    }

    #[test]
    fn test_log_path_shape() {
        let path = log_path(Path::new("/var/log/graph-host"), "room-7");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("app-room-7-"));
        assert!(name.ends_with(".log"));
    }
}
