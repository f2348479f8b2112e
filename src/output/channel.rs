use super::{AgentIdentity, Payload, ResultSink};
use crate::error::SinkError;
use crate::model::{OutputConfig, OutputFormat, ScanResult};
use async_trait::async_trait;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Dry-run sink: batches go through a channel to a blocking writer on
/// stdout instead of leaving the host.
#[derive(Clone)]
pub struct StdoutSink {
    inner: Arc<OutputInner>,
}

struct OutputInner {
    tx: tokio::sync::Mutex<Option<mpsc::Sender<OutputCommand>>>,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

enum OutputCommand {
    Emit(Vec<ScanResult>),
}

impl StdoutSink {
    pub fn new(cfg: OutputConfig, identity: AgentIdentity) -> Self {
        Self::with_writer(cfg, identity, std::io::stdout())
    }

    pub fn with_writer<W>(cfg: OutputConfig, identity: AgentIdentity, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(1024);
        let handle = tokio::task::spawn_blocking(move || {
            let mut writer = BufWriter::new(writer);
            while let Some(cmd) = rx.blocking_recv() {
                if let Err(err) = match cmd {
                    OutputCommand::Emit(results) => {
                        write_batch(&cfg, &identity, &mut writer, &results)
                    }
                } {
                    eprintln!("failed to write scan results: {err}");
                }
            }
            let _ = writer.flush();
        });

        Self {
            inner: Arc::new(OutputInner {
                tx: tokio::sync::Mutex::new(Some(tx)),
                handle: tokio::sync::Mutex::new(Some(handle)),
            }),
        }
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.inner.tx.lock().await.take();

        if let Some(handle) = self.inner.handle.lock().await.take() {
            handle
                .await
                .map_err(|err| anyhow::anyhow!("failed to join output worker: {err}"))?;
        }

        Ok(())
    }
}

#[async_trait]
impl ResultSink for StdoutSink {
    async fn send(&self, results: Vec<ScanResult>) -> Result<(), SinkError> {
        let guard = self.inner.tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(OutputCommand::Emit(results))
                .await
                .map_err(|_| SinkError::Closed),
            None => Err(SinkError::Closed),
        }
    }
}

fn write_batch<W: Write>(
    cfg: &OutputConfig,
    identity: &AgentIdentity,
    writer: &mut W,
    results: &[ScanResult],
) -> anyhow::Result<()> {
    match cfg.format {
        OutputFormat::Jsonl => {
            let line = serde_json::to_string(&Payload::new(identity, results))?;
            writeln!(writer, "{line}")?;
        }
        OutputFormat::Pretty => {
            for result in results {
                let host = if result.hostname.is_empty() {
                    "-"
                } else {
                    result.hostname.as_str()
                };
                let kind = result
                    .handshake_type
                    .map(|family| family.as_str())
                    .unwrap_or("starttls");
                writeln!(
                    writer,
                    "{}:{} ({host}) [{kind}] {} certificate(s)",
                    result.ip,
                    result.port,
                    result.certificates.len()
                )?;
            }
        }
    }

    writer.flush()?;
    Ok(())
}
