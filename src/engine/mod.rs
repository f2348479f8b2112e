pub mod dispatch;
pub mod pipeline;
pub mod reader;

use crate::error::SinkError;
use crate::filter::filter_certificates;
use crate::model::{Config, ExclusionRule, ScanResult, ScanTarget};
use crate::output::ResultSink;
use pipeline::{DefaultProcessor, PortProcessor};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetSummary {
    pub ports: usize,
    pub results_sent: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub targets: usize,
    pub ports: usize,
    pub results_sent: usize,
}

pub struct Scheduler {
    cfg: Arc<Config>,
    processor: Arc<dyn PortProcessor>,
    sink: Arc<dyn ResultSink>,
    sem: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(cfg: Arc<Config>, sink: Arc<dyn ResultSink>) -> Self {
        Self::with_processor(cfg, Arc::new(DefaultProcessor), sink)
    }

    pub fn with_processor(
        cfg: Arc<Config>,
        processor: Arc<dyn PortProcessor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(cfg.concurrency.max(1))),
            cfg,
            processor,
            sink,
        }
    }

    /// Scans targets one after another, pausing for the throttle delay in
    /// between. Only a fatal sink error ends the cycle early.
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run(&self, targets: &[ScanTarget]) -> Result<CycleSummary, SinkError> {
        let mut summary = CycleSummary::default();

        for (idx, target) in targets.iter().enumerate() {
            if idx > 0 && !self.cfg.throttle_delay.is_zero() {
                tokio::time::sleep(self.cfg.throttle_delay).await;
            }
            let scanned = self.scan_target(target).await?;
            summary.targets += 1;
            summary.ports += scanned.ports;
            summary.results_sent += scanned.results_sent;
        }

        info!(
            targets = summary.targets,
            ports = summary.ports,
            results = summary.results_sent,
            "scan cycle finished"
        );
        Ok(summary)
    }

    /// One task per port, admitted through the semaphore. Returns once every
    /// port finished, or as soon as a port hits a fatal sink error.
    #[instrument(skip(self, target), fields(ip = %target.ip, host = %target.hostname))]
    pub async fn scan_target(&self, target: &ScanTarget) -> Result<TargetSummary, SinkError> {
        let mut tasks = JoinSet::new();

        for &port in &target.ports {
            let port_target = target.port_target(port);
            let protocol = target.protocol.clone();
            let cfg = self.cfg.clone();
            let processor = self.processor.clone();
            let sink = self.sink.clone();
            let sem = self.sem.clone();

            tasks.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Err(SinkError::Closed);
                };

                let raw = processor
                    .process_port(port_target.clone(), protocol, cfg.clone())
                    .await;
                let results = filter_results(raw, &cfg.exclude_certs);
                if results.is_empty() {
                    debug!(target = %port_target, "nothing to report");
                    return Ok(0);
                }

                let count = results.len();
                match sink.send(results).await {
                    Ok(()) => {
                        info!(target = %port_target, count, "results sent");
                        Ok(count)
                    }
                    Err(err) if err.is_fatal() => Err(err),
                    Err(err) => {
                        warn!(target = %port_target, error = %err, "dropping result batch");
                        Ok(0)
                    }
                }
            });
        }

        let mut summary = TargetSummary {
            ports: target.ports.len(),
            results_sent: 0,
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(sent)) => summary.results_sent += sent,
                Ok(Err(err)) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(err) if err.is_panic() => error!(error = %err, "port task panicked"),
                Err(err) => debug!(error = %err, "port task cancelled"),
            }
        }

        Ok(summary)
    }
}

/// Applies the exclusion rules to every result and drops those left without
/// certificates.
pub fn filter_results(results: Vec<ScanResult>, rules: &[ExclusionRule]) -> Vec<ScanResult> {
    results
        .into_iter()
        .filter_map(|result| {
            let kept = filter_certificates(&result.certificates, rules);
            if kept.is_empty() {
                None
            } else {
                Some(result.with_certificates(kept))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CipherFamily, PortTarget, ProbeOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProcessor {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PortProcessor for CountingProcessor {
        async fn process_port(
            &self,
            _target: PortTarget,
            _protocol: Option<String>,
            _cfg: Arc<Config>,
        ) -> Vec<ScanResult> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Vec::new()
        }
    }

    /// One result per port carrying the same certificate bytes.
    struct FixedProcessor(Vec<u8>);

    #[async_trait]
    impl PortProcessor for FixedProcessor {
        async fn process_port(
            &self,
            target: PortTarget,
            _protocol: Option<String>,
            _cfg: Arc<Config>,
        ) -> Vec<ScanResult> {
            let outcome = ProbeOutcome::new(Some(CipherFamily::Rsa), vec![self.0.clone()]);
            vec![ScanResult::from_outcome(&target, outcome)]
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<ScanResult>>>,
        fail_with_unauthorized: bool,
        fail_with_status: Option<u16>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn send(&self, results: Vec<ScanResult>) -> Result<(), SinkError> {
            if self.fail_with_unauthorized {
                return Err(SinkError::Unauthorized {
                    url: "http://127.0.0.1/hook".into(),
                });
            }
            if let Some(status) = self.fail_with_status {
                return Err(SinkError::Status { status });
            }
            self.batches.lock().unwrap().push(results);
            Ok(())
        }
    }

    fn target(ports: std::ops::Range<u16>) -> ScanTarget {
        ScanTarget::new("127.0.0.1".parse().unwrap(), "", ports, None)
    }

    fn self_signed_der() -> Vec<u8> {
        use openssl::{asn1::Asn1Time, hash::MessageDigest, pkey::PKey, rsa::Rsa, x509};

        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = x509::X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "unit.test").unwrap();
        let name = name.build();
        let mut builder = x509::X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build().to_der().unwrap()
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_limit() {
        let cfg = Arc::new(Config {
            concurrency: 3,
            ..Config::default()
        });
        let processor = Arc::new(CountingProcessor::default());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::with_processor(cfg, processor.clone(), sink);

        let summary = scheduler.scan_target(&target(1000..1012)).await.unwrap();

        assert_eq!(summary.ports, 12);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 12);
        assert!(processor.peak.load(Ordering::SeqCst) <= 3);
        assert!(processor.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn zero_concurrency_means_one_slot() {
        let cfg = Arc::new(Config {
            concurrency: 0,
            ..Config::default()
        });
        let processor = Arc::new(CountingProcessor::default());
        let scheduler =
            Scheduler::with_processor(cfg, processor.clone(), Arc::new(RecordingSink::default()));

        scheduler.scan_target(&target(2000..2004)).await.unwrap();
        assert_eq!(processor.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unparsable_results_are_never_forwarded() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::with_processor(
            Arc::new(Config::default()),
            Arc::new(FixedProcessor(b"not a certificate".to_vec())),
            sink.clone(),
        );

        let summary = scheduler.scan_target(&target(3000..3003)).await.unwrap();
        assert_eq!(summary.results_sent, 0);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_port_flushes_its_own_batch() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::with_processor(
            Arc::new(Config {
                concurrency: 4,
                ..Config::default()
            }),
            Arc::new(FixedProcessor(self_signed_der())),
            sink.clone(),
        );

        let summary = scheduler.scan_target(&target(4000..4004)).await.unwrap();
        assert_eq!(summary.results_sent, 4);

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 4);
        assert!(batches.iter().all(|batch| batch.len() == 1));
    }

    #[tokio::test]
    async fn fatal_sink_error_stops_the_cycle() {
        let sink = Arc::new(RecordingSink {
            fail_with_unauthorized: true,
            ..RecordingSink::default()
        });
        let scheduler = Scheduler::with_processor(
            Arc::new(Config::default()),
            Arc::new(FixedProcessor(self_signed_der())),
            sink,
        );

        let targets = vec![target(5000..5002), target(5002..5004)];
        let err = scheduler.run(&targets).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[derive(Clone, Default)]
    struct LogBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn rejected_batch_is_logged_once_and_scan_goes_on() {
        let logs = LogBuf::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let sink = Arc::new(RecordingSink {
            fail_with_status: Some(500),
            ..RecordingSink::default()
        });
        let scheduler = Scheduler::with_processor(
            Arc::new(Config::default()),
            Arc::new(FixedProcessor(self_signed_der())),
            sink,
        );

        let summary = scheduler.scan_target(&target(6000..6001)).await.unwrap();
        assert_eq!(summary.results_sent, 0);

        let output = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
        assert_eq!(output.lines().count(), 1, "{output}");
        assert!(output.contains("dropping result batch"));
        assert!(output.contains("status 500"));
    }
}
