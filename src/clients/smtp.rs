use super::{log_probe_error, Attempt, ProtocolHandler};
use crate::engine::reader::{LineReader, ReadError};
use crate::error::ProbeError;
use crate::model::{Config, PortTarget, ProbeOutcome, ScanResult, DEFAULT_OVERALL_TIMEOUT};
use crate::probe::{dial, upgrade_and_collect};
use crate::util::sanitize_text;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, instrument};

pub const EHLO_COMMAND: &[u8] = b"EHLO certscan\r\n";
pub const STARTTLS_COMMAND: &[u8] = b"STARTTLS\r\n";

const MAX_LINE: usize = 4096;
const MAX_EHLO_LINES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    Connected,
    GreetingRead,
    EhloSent,
    EhloMultilineRead,
    CapabilityChecked,
    StartTlsSent,
    StartTlsAccepted,
    TlsHandshaking,
    Done,
}

impl fmt::Display for SmtpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) struct SmtpStartTlsHandler;

#[async_trait]
impl ProtocolHandler for SmtpStartTlsHandler {
    fn name(&self) -> &'static str {
        "smtp-starttls"
    }

    async fn attempt(&self, target: &PortTarget, cfg: &Config) -> Attempt {
        let upgrader = StartTlsUpgrader::new(cfg.dial_timeout, cfg.read_timeout)
            .with_overall_timeout(cfg.overall_timeout);
        match upgrader.upgrade(target).await {
            Ok(outcome) => Attempt::Handled(vec![ScanResult::from_outcome(target, outcome)]),
            Err(err) => {
                log_probe_error(target, "starttls", &err);
                Attempt::Handled(Vec::new())
            }
        }
    }
}

/// Plain SMTP up to an accepted STARTTLS, then a TLS handshake on the same
/// socket. A single handshake is enough: the negotiation already fixed the
/// chain the server will present.
#[derive(Debug, Clone)]
pub struct StartTlsUpgrader {
    dial_timeout: Duration,
    read_timeout: Duration,
    overall_timeout: Duration,
}

impl StartTlsUpgrader {
    pub fn new(dial_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            read_timeout,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
        }
    }

    pub fn with_overall_timeout(mut self, overall_timeout: Duration) -> Self {
        self.overall_timeout = overall_timeout;
        self
    }

    /// Dial, negotiation and handshake together share `overall_timeout`.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn upgrade(&self, target: &PortTarget) -> Result<ProbeOutcome, ProbeError> {
        match timeout(self.overall_timeout, self.run(target)).await {
            Ok(res) => res,
            Err(_) => Err(ProbeError::Protocol(format!(
                "starttls upgrade not finished within {} ms",
                self.overall_timeout.as_millis()
            ))),
        }
    }

    async fn run(&self, target: &PortTarget) -> Result<ProbeOutcome, ProbeError> {
        let mut stream = dial(target.addr(), self.dial_timeout).await?;

        let mut session = SmtpSession::new(self.read_timeout);
        session.negotiate(&mut stream).await?;

        session.advance(SmtpState::TlsHandshaking);
        let chain = upgrade_and_collect(stream, &target.server_name(), self.read_timeout).await?;
        session.advance(SmtpState::Done);

        Ok(ProbeOutcome::new(None, chain))
    }
}

pub struct SmtpSession {
    state: SmtpState,
    reader: LineReader,
    ehlo_lines: Vec<String>,
}

impl SmtpSession {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            state: SmtpState::Connected,
            reader: LineReader::new(MAX_LINE, read_timeout),
            ehlo_lines: Vec::new(),
        }
    }

    pub fn state(&self) -> SmtpState {
        self.state
    }

    /// EHLO reply lines as received, line endings stripped.
    pub fn ehlo_lines(&self) -> &[String] {
        &self.ehlo_lines
    }

    fn advance(&mut self, next: SmtpState) {
        debug!(from = %self.state, to = %next, "smtp state");
        self.state = next;
    }

    /// Drives the plaintext half. On success the stream sits right after the
    /// server's `220` to STARTTLS with nothing left unread.
    pub async fn negotiate<S>(&mut self, stream: &mut S) -> Result<(), ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let greeting = self.read_line(stream).await?;
        debug!(greeting = %sanitize_text(&greeting), "smtp greeting");
        self.advance(SmtpState::GreetingRead);

        self.send(stream, EHLO_COMMAND).await?;
        self.advance(SmtpState::EhloSent);

        loop {
            let line = self.read_line(stream).await?;
            let continued = line.starts_with(b"250-");
            self.ehlo_lines.push(sanitize_text(line.trim_ascii_end()));
            if !continued {
                break;
            }
            if self.ehlo_lines.len() >= MAX_EHLO_LINES {
                return Err(self.protocol_error("EHLO reply has too many lines"));
            }
        }
        self.advance(SmtpState::EhloMultilineRead);

        let offers_starttls = self
            .ehlo_lines
            .iter()
            .any(|line| line.to_ascii_uppercase().contains("STARTTLS"));
        if !offers_starttls {
            return Err(ProbeError::Unsupported(
                "server does not advertise STARTTLS".into(),
            ));
        }
        self.advance(SmtpState::CapabilityChecked);

        self.send(stream, STARTTLS_COMMAND).await?;
        self.advance(SmtpState::StartTlsSent);

        let reply = self.read_line(stream).await?;
        if !reply.starts_with(b"220") {
            return Err(self.protocol_error(&format!(
                "STARTTLS refused: {}",
                sanitize_text(&reply)
            )));
        }
        if !self.reader.buffered().is_empty() {
            return Err(self.protocol_error("server sent data ahead of the TLS handshake"));
        }
        self.advance(SmtpState::StartTlsAccepted);
        Ok(())
    }

    async fn read_line<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
    ) -> Result<Vec<u8>, ProbeError> {
        match self.reader.read_line(stream).await {
            Ok(line) => Ok(line),
            Err(ReadError::Closed) => Err(self.protocol_error("connection closed")),
            Err(err) => Err(self.protocol_error(&err.to_string())),
        }
    }

    async fn send<S: AsyncWrite + Unpin>(
        &mut self,
        stream: &mut S,
        bytes: &[u8],
    ) -> Result<(), ProbeError> {
        stream
            .write_all(bytes)
            .await
            .map_err(|err| self.protocol_error(&format!("write failed: {err}")))?;
        stream
            .flush()
            .await
            .map_err(|err| self.protocol_error(&format!("flush failed: {err}")))
    }

    fn protocol_error(&self, detail: &str) -> ProbeError {
        ProbeError::Protocol(format!("smtp {}: {detail}", self.state))
    }
}
