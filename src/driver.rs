//! Request/response driver.
//!
//! Owns one connection and runs up to `count` exchanges on it, one request
//! in flight at a time. Every exchange is finalized into an
//! [`ExchangeOutcome`]; the first non-success outcome ends the run. The
//! connection is shut down exactly once, whichever way the run ends.

use bytes::Bytes;
use chrono::{DateTime, Local};
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::protocols::csb::{
    read_exact, Frame, FrameError, Header, MessageType, ReadStatus, HEADER_LEN,
};
use crate::report::Reporter;

/// Parameters for one run.
#[derive(Debug, Clone)]
pub struct ExchangePlan {
    pub request_type: MessageType,
    pub payload: Bytes,
    pub count: u32,
    /// Pause after each successful exchange; skipped after the last one.
    pub delay: Duration,
    /// Budget for each frame write and each exact read.
    pub io_timeout: Duration,
    pub max_payload: u32,
}

/// Driver state. A driver always starts `Connected`: it is only built
/// around a stream the transport has already opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Connected,
    Sending(u32),
    AwaitingResponse(u32),
    Closed,
}

/// How a single exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Response of the expected type received in full.
    Success,
    /// Peer closed cleanly before any byte of the response header.
    PeerClosedBeforeHeader,
    /// The request could not be written.
    SendFailed,
    /// Response header truncated, timed out, or failed at the transport.
    HeaderReadFailed,
    /// Response payload truncated, timed out, or failed at the transport.
    PayloadReadFailed,
    /// Response header failed validation.
    ProtocolViolation,
    /// Well-formed response of the wrong type.
    UnexpectedType,
    /// Run interrupted externally while this exchange was in progress.
    Interrupted,
}

impl OutcomeKind {
    /// Whether the run may continue past this outcome.
    pub fn is_success(self) -> bool {
        self == OutcomeKind::Success
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::PeerClosedBeforeHeader => "peer closed before header",
            OutcomeKind::SendFailed => "send failed",
            OutcomeKind::HeaderReadFailed => "header read failed",
            OutcomeKind::PayloadReadFailed => "payload read failed",
            OutcomeKind::ProtocolViolation => "protocol violation",
            OutcomeKind::UnexpectedType => "unexpected type",
            OutcomeKind::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Finalized record of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// 1-based request ordinal.
    pub index: u32,
    pub request_type: MessageType,
    pub sent: Bytes,
    pub received: Option<Bytes>,
    pub kind: OutcomeKind,
    /// Human-readable cause.
    pub cause: String,
}

impl ExchangeOutcome {
    /// True when a response payload arrived and matches what was sent.
    pub fn echo_intact(&self) -> bool {
        self.received.as_ref() == Some(&self.sent)
    }
}

impl fmt::Display for ExchangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request {}: {} ({})", self.index, self.kind, self.cause)
    }
}

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every planned exchange succeeded.
    Completed,
    /// The peer ended the session between exchanges.
    PeerClosed,
    /// An exchange failed.
    Aborted(OutcomeKind),
    Interrupted,
}

/// Result of checking a run against an expected per-connection cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapVerdict {
    /// Exactly `cap` successes, then a clean close.
    Confirmed,
    /// More requests were planned than the cap, but no close was seen after `cap` successes.
    NotEnforced { successes: u32 },
    /// The planned count never reached past the cap, so the close could not be observed.
    Untested { successes: u32 },
    /// The peer closed cleanly, but after a different number of requests.
    ClosedAt { successes: u32 },
    /// The run broke in some other way.
    Inconclusive,
}

/// Everything observed during a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub planned: u32,
    /// Shutdown fired before the run ended on its own.
    pub interrupted: bool,
    pub outcomes: Vec<ExchangeOutcome>,
}

impl RunReport {
    pub fn successes(&self) -> u32 {
        self.outcomes.iter().filter(|o| o.kind.is_success()).count() as u32
    }

    pub fn termination(&self) -> Termination {
        if self.interrupted {
            return Termination::Interrupted;
        }
        match self.outcomes.last().map(|o| o.kind) {
            None | Some(OutcomeKind::Success) => Termination::Completed,
            Some(OutcomeKind::PeerClosedBeforeHeader) => Termination::PeerClosed,
            Some(OutcomeKind::Interrupted) => Termination::Interrupted,
            Some(kind) => Termination::Aborted(kind),
        }
    }

    /// Judge the run against an expected cap of `cap` requests per connection.
    pub fn cap_verdict(&self, cap: u32) -> CapVerdict {
        let successes = self.successes();
        match self.termination() {
            Termination::PeerClosed if successes == cap => CapVerdict::Confirmed,
            Termination::Completed if self.planned <= cap => CapVerdict::Untested { successes },
            Termination::Completed => CapVerdict::NotEnforced { successes },
            Termination::PeerClosed => CapVerdict::ClosedAt { successes },
            Termination::Aborted(_) | Termination::Interrupted => CapVerdict::Inconclusive,
        }
    }
}

/// Drives the request sequence over one owned connection.
pub struct Driver<S> {
    stream: Option<S>,
    plan: ExchangePlan,
    state: DriverState,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Take ownership of an already-connected stream.
    pub fn new(stream: S, plan: ExchangePlan) -> Self {
        Self {
            stream: Some(stream),
            plan,
            state: DriverState::Connected,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Run the sequence until it completes, fails, or `shutdown` resolves.
    ///
    /// The connection is closed before this returns; running a closed
    /// driver again yields an empty report.
    pub async fn run<R, F>(&mut self, reporter: &mut R, shutdown: F) -> RunReport
    where
        R: Reporter + ?Sized,
        F: Future,
    {
        let started_at = Local::now();
        let clock = Instant::now();
        let mut outcomes = Vec::new();
        let mut interrupted = false;
        tokio::pin!(shutdown);

        if self.stream.is_some() {
            for index in 1..=self.plan.count {
                reporter.request_started(index, self.plan.request_type, &self.plan.payload);

                let outcome = tokio::select! {
                    outcome = self.exchange(index) => outcome,
                    _ = &mut shutdown => {
                        interrupted = true;
                        let cause = "run interrupted".to_string();
                        finalize(&self.plan, index, OutcomeKind::Interrupted, None, cause)
                    }
                };
                reporter.outcome(&outcome);

                let proceed = outcome.kind.is_success();
                outcomes.push(outcome);
                if !proceed {
                    break;
                }
                self.state = DriverState::Connected;

                if !self.plan.delay.is_zero() && index < self.plan.count {
                    tokio::select! {
                        _ = tokio::time::sleep(self.plan.delay) => {}
                        _ = &mut shutdown => {
                            debug!(after = index, "Interrupted during delay");
                            interrupted = true;
                            break;
                        }
                    }
                }
            }
        }

        self.close().await;

        let report = RunReport {
            started_at,
            elapsed: clock.elapsed(),
            planned: self.plan.count,
            interrupted,
            outcomes,
        };
        reporter.finished(&report);
        report
    }

    /// One request/response exchange.
    async fn exchange(&mut self, index: u32) -> ExchangeOutcome {
        let plan = &self.plan;
        let Some(stream) = self.stream.as_mut() else {
            let cause = "connection already closed".to_string();
            return finalize(plan, index, OutcomeKind::SendFailed, None, cause);
        };

        self.state = DriverState::Sending(index);
        if let Err(e) = send_request(stream, plan).await {
            return finalize(plan, index, OutcomeKind::SendFailed, None, e.to_string());
        }

        self.state = DriverState::AwaitingResponse(index);
        let mut header_buf = [0u8; HEADER_LEN];
        match read_exact(stream, HEADER_LEN, plan.io_timeout).await {
            Ok(ReadStatus::Complete(bytes)) => header_buf.copy_from_slice(&bytes),
            Ok(ReadStatus::CleanEof) => {
                return finalize(
                    plan,
                    index,
                    OutcomeKind::PeerClosedBeforeHeader,
                    None,
                    "peer closed the connection before sending a response header".into(),
                );
            }
            Ok(status) => {
                let cause = describe_short_read("header", HEADER_LEN, &status);
                return finalize(plan, index, OutcomeKind::HeaderReadFailed, None, cause);
            }
            Err(e) => {
                let cause = format!("header read: {e}");
                return finalize(plan, index, OutcomeKind::HeaderReadFailed, None, cause);
            }
        }

        let header = match Header::decode(&header_buf)
            .and_then(|h| h.check_length(plan.max_payload).map(|()| h))
        {
            Ok(header) => header,
            Err(e) => {
                return finalize(plan, index, OutcomeKind::ProtocolViolation, None, e.to_string())
            }
        };
        trace!(
            index,
            message_type = %header.message_type,
            flags = header.flags,
            length = header.length,
            "Response header"
        );

        let payload = match read_exact(stream, header.length as usize, plan.io_timeout).await {
            Ok(ReadStatus::Complete(payload)) => payload,
            Ok(status) => {
                let cause = describe_short_read("payload", header.length as usize, &status);
                return finalize(plan, index, OutcomeKind::PayloadReadFailed, None, cause);
            }
            Err(e) => {
                let cause = format!("payload read: {e}");
                return finalize(plan, index, OutcomeKind::PayloadReadFailed, None, cause);
            }
        };

        let frame = match Frame::decode(&header_buf, payload) {
            Ok(frame) => frame,
            Err(e) => {
                return finalize(plan, index, OutcomeKind::ProtocolViolation, None, e.to_string())
            }
        };

        let expected = plan.request_type.response_type();
        if Some(frame.message_type) == expected {
            let cause = format!("{} with {} bytes", frame.message_type, frame.payload.len());
            return finalize(plan, index, OutcomeKind::Success, Some(frame.payload), cause);
        }

        let cause = match (frame.message_type, expected) {
            (MessageType::Error, _) => {
                format!("server error: {}", String::from_utf8_lossy(&frame.payload))
            }
            (got, Some(want)) => {
                format!("expected {want}, got {got} with {} bytes", frame.payload.len())
            }
            (got, None) => format!("no response type for {}, got {got}", plan.request_type),
        };
        finalize(plan, index, OutcomeKind::UnexpectedType, Some(frame.payload), cause)
    }

    /// Shut down and release the connection. Idempotent.
    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // Peer may already be gone; the socket is released on drop regardless.
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Shutdown after run failed");
            }
            drop(stream);
            debug!("Connection closed");
        }
        self.state = DriverState::Closed;
    }
}

impl<S> Drop for Driver<S> {
    fn drop(&mut self) {
        if self.stream.is_some() {
            warn!("Driver dropped with the connection still open");
        }
    }
}

fn finalize(
    plan: &ExchangePlan,
    index: u32,
    kind: OutcomeKind,
    received: Option<Bytes>,
    cause: String,
) -> ExchangeOutcome {
    ExchangeOutcome {
        index,
        request_type: plan.request_type,
        sent: plan.payload.clone(),
        received,
        kind,
        cause,
    }
}

/// Encode and write the request frame within the I/O timeout.
async fn send_request<S>(stream: &mut S, plan: &ExchangePlan) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let frame = Frame::new(plan.request_type, plan.payload.clone())
        .encode()
        .map_err(|e: FrameError| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let write = async {
        stream.write_all(&frame).await?;
        stream.flush().await
    };
    match tokio::time::timeout(plan.io_timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("write timed out after {:?}", plan.io_timeout),
        )),
    }
}

fn describe_short_read(what: &str, wanted: usize, status: &ReadStatus) -> String {
    match status {
        ReadStatus::CleanEof => format!("{what}: peer closed before sending any of {wanted} bytes"),
        ReadStatus::TruncatedEof { received } => {
            format!("{what}: peer closed after {received} of {wanted} bytes")
        }
        ReadStatus::Timeout { received } => {
            format!("{what}: timed out after {received} of {wanted} bytes")
        }
        ReadStatus::Complete(_) => format!("{what}: complete"),
    }
}
