//! Replay motion sensor
//!
//! Feeds recorded or piped samples into the step pipeline:
//! - pre-loaded samples (CSV replay) with an optional inter-sample delay
//! - JSON lines from any async reader, typically stdin:
//!   `motion-simulation | pedocore run --stdin`
//!
//! Each sensor can be subscribed once; the input is consumed by the
//! producer task.

use super::{AcquisitionError, MotionSensor, Subscription};
use crate::types::MotionSample;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where replayed samples come from.
pub enum ReplayInput {
    /// Pre-loaded samples, paced by `delay`
    Samples {
        samples: Vec<MotionSample>,
        delay: Duration,
    },
    /// One JSON-encoded [`MotionSample`] per line, paced by the writer
    JsonLines(Box<dyn AsyncBufRead + Send + Unpin>),
}

impl std::fmt::Debug for ReplayInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Samples { samples, delay } => f
                .debug_struct("Samples")
                .field("count", &samples.len())
                .field("delay", delay)
                .finish(),
            Self::JsonLines(_) => f.write_str("JsonLines"),
        }
    }
}

/// Motion sensor backed by a replay input.
#[derive(Debug)]
pub struct ReplaySensor {
    name: String,
    input: Mutex<Option<ReplayInput>>,
}

impl ReplaySensor {
    pub fn new(name: impl Into<String>, input: ReplayInput) -> Self {
        Self {
            name: name.into(),
            input: Mutex::new(Some(input)),
        }
    }

    /// Replay pre-loaded samples with `delay` between them.
    pub fn from_samples(samples: Vec<MotionSample>, delay: Duration) -> Self {
        Self::new("replay", ReplayInput::Samples { samples, delay })
    }

    /// Read JSON-line samples from stdin.
    pub fn stdin() -> Self {
        Self::new(
            "stdin",
            ReplayInput::JsonLines(Box::new(BufReader::new(tokio::io::stdin()))),
        )
    }

    /// Read JSON-line samples from any buffered reader.
    pub fn json_lines<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self::new("json-lines", ReplayInput::JsonLines(Box::new(reader)))
    }

    fn take_input(&self) -> Option<ReplayInput> {
        self.input
            .lock()
            .unwrap_or_else(|e| {
                warn!("ReplaySensor input lock poisoned, recovering");
                e.into_inner()
            })
            .take()
    }
}

impl MotionSensor for ReplaySensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.input
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn subscribe(&self, sink: mpsc::Sender<MotionSample>) -> Result<Subscription, AcquisitionError> {
        let input = self
            .take_input()
            .ok_or_else(|| AcquisitionError::AlreadySubscribed(self.name.clone()))?;

        let cancel = CancellationToken::new();
        let child = cancel.child_token();
        let name = self.name.clone();

        let task = tokio::spawn(async move {
            let sent = match input {
                ReplayInput::Samples { samples, delay } => {
                    replay_samples(samples, delay, &sink, &child).await
                }
                ReplayInput::JsonLines(reader) => replay_json_lines(reader, &sink, &child).await,
            };
            info!("[ReplaySensor] {} finished after {} samples", name, sent);
        });

        info!("[ReplaySensor] {} subscribed", self.name);
        Ok(Subscription::new(self.name.clone(), cancel, task))
    }
}

/// Push pre-loaded samples. Returns how many were delivered.
async fn replay_samples(
    samples: Vec<MotionSample>,
    delay: Duration,
    sink: &mpsc::Sender<MotionSample>,
    cancel: &CancellationToken,
) -> usize {
    let mut sent = 0;
    for sample in samples {
        // No delay before the first sample.
        if sent > 0 && !delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return sent,
                () = tokio::time::sleep(delay) => {}
            }
        }
        if !deliver(sample, sink, cancel).await {
            return sent;
        }
        sent += 1;
    }
    sent
}

/// Push JSON-line samples until EOF. Malformed lines are skipped.
async fn replay_json_lines(
    mut reader: Box<dyn AsyncBufRead + Send + Unpin>,
    sink: &mpsc::Sender<MotionSample>,
    cancel: &CancellationToken,
) -> usize {
    let mut buf = Vec::with_capacity(256);
    let mut line_num = 0usize;
    let mut sent = 0;

    loop {
        buf.clear();
        let read = tokio::select! {
            () = cancel.cancelled() => return sent,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => return sent,
            Ok(_) => {}
            Err(e) => {
                warn!("[ReplaySensor] Read error after {} lines: {}", line_num, e);
                return sent;
            }
        }
        line_num += 1;

        let Ok(line) = std::str::from_utf8(&buf) else {
            warn!("[ReplaySensor] Skipping line {}: not valid UTF-8", line_num);
            continue;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_json_line(trimmed, line_num) {
            Ok(sample) => {
                if !deliver(sample, sink, cancel).await {
                    return sent;
                }
                sent += 1;
            }
            Err(e) => warn!("[ReplaySensor] Skipping sample: {}", e),
        }
    }
}

/// Parse one JSON line into a sample.
pub fn parse_json_line(line: &str, line_num: usize) -> Result<MotionSample, AcquisitionError> {
    serde_json::from_str::<MotionSample>(line).map_err(|e| AcquisitionError::Parse {
        line: line_num,
        message: e.to_string(),
    })
}

/// Send one sample, honouring cancellation. Returns false when delivery must stop.
async fn deliver(
    sample: MotionSample,
    sink: &mpsc::Sender<MotionSample>,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        result = sink.send(sample) => {
            if result.is_err() {
                debug!("[ReplaySensor] Receiver closed, stopping");
            }
            result.is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_all_samples_then_closes() {
        let sensor = ReplaySensor::from_samples(
            vec![MotionSample::vertical(0, 0.0), MotionSample::vertical(100, 0.2)],
            Duration::ZERO,
        );
        let (tx, mut rx) = mpsc::channel(8);
        let sub = sensor.subscribe(tx).unwrap();

        assert_eq!(rx.recv().await.map(|s| s.timestamp_ms), Some(0));
        assert_eq!(rx.recv().await.map(|s| s.timestamp_ms), Some(100));
        assert!(rx.recv().await.is_none());
        sensor.unsubscribe(sub);
    }

    #[tokio::test]
    async fn test_second_subscribe_rejected() {
        let sensor = ReplaySensor::from_samples(Vec::new(), Duration::ZERO);
        let (tx, _rx) = mpsc::channel(1);
        let sub = sensor.subscribe(tx.clone()).unwrap();
        assert!(!sensor.is_available());
        assert!(matches!(
            sensor.subscribe(tx),
            Err(AcquisitionError::AlreadySubscribed(_))
        ));
        sensor.unsubscribe(sub);
    }

    #[tokio::test]
    async fn test_json_lines_skip_malformed() {
        let data = b"{\"timestamp_ms\":1,\"y\":0.5}\nnot json\n\n{\"timestamp_ms\":2,\"x\":1.0,\"y\":0.1,\"z\":9.8}\n";
        let sensor = ReplaySensor::json_lines(BufReader::new(&data[..]));
        let (tx, mut rx) = mpsc::channel(8);
        let sub = sensor.subscribe(tx).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first, MotionSample::vertical(1, 0.5));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.z, 9.8);
        assert!(rx.recv().await.is_none());
        sub.release_and_join().await;
    }

    #[tokio::test]
    async fn test_json_lines_skip_invalid_utf8_and_continue() {
        let mut data = b"{\"timestamp_ms\":0,\"y\":0.0}\n".to_vec();
        data.extend_from_slice(b"\xff\xfe garbage\n");
        data.extend_from_slice(b"{\"timestamp_ms\":100,\"y\":0.5}\n");
        data.extend_from_slice(b"{\"timestamp_ms\":2000,\"y\":0.0}\n");
        let sensor = ReplaySensor::json_lines(BufReader::new(std::io::Cursor::new(data)));
        let (tx, mut rx) = mpsc::channel(8);
        let sub = sensor.subscribe(tx).unwrap();

        let mut times = Vec::new();
        while let Some(sample) = rx.recv().await {
            times.push(sample.timestamp_ms);
        }
        assert_eq!(times, vec![0, 100, 2000]);
        sub.release_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_stops_paced_replay() {
        let samples: Vec<_> = (0..1000).map(|i| MotionSample::vertical(i * 100, 0.0)).collect();
        let sensor = ReplaySensor::from_samples(samples, Duration::from_millis(100));
        let (tx, mut rx) = mpsc::channel(8);
        let sub = sensor.subscribe(tx).unwrap();

        assert!(rx.recv().await.is_some());
        sub.release_and_join().await;
        // Producer dropped its sender; anything buffered drains, then None.
        while rx.recv().await.is_some() {}
    }

    #[test]
    fn test_parse_json_line_reports_line_number() {
        let err = parse_json_line("{\"y\": 1.0}", 7).unwrap_err();
        assert!(matches!(err, AcquisitionError::Parse { line: 7, .. }));
    }
}
