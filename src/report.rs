//! Outcome reporting.
//!
//! The driver emits one event per request started, one per finalized
//! outcome, and one when the run ends. `TracingReporter` narrates them
//! through `tracing`.

use tracing::{error, info, warn};

use crate::driver::{CapVerdict, ExchangeOutcome, OutcomeKind, RunReport, Termination};
use crate::protocols::csb::MessageType;

/// Longest payload preview logged.
const PREVIEW_LEN: usize = 64;

/// Consumer of driver events.
pub trait Reporter {
    fn request_started(&mut self, index: u32, request_type: MessageType, payload: &[u8]);

    fn outcome(&mut self, outcome: &ExchangeOutcome);

    fn finished(&mut self, report: &RunReport);
}

/// Reporter that logs every event.
pub struct TracingReporter {
    expect_cap: Option<u32>,
}

impl TracingReporter {
    pub fn new(expect_cap: Option<u32>) -> Self {
        Self { expect_cap }
    }
}

impl Reporter for TracingReporter {
    fn request_started(&mut self, index: u32, request_type: MessageType, payload: &[u8]) {
        info!(
            index,
            message_type = %request_type,
            bytes = payload.len(),
            payload = %preview(payload),
            "-> request"
        );
    }

    fn outcome(&mut self, outcome: &ExchangeOutcome) {
        let index = outcome.index;
        let cause = outcome.cause.as_str();
        match outcome.kind {
            OutcomeKind::Success => {
                let received = outcome.received.as_deref().unwrap_or_default();
                info!(
                    index,
                    bytes = received.len(),
                    payload = %preview(received),
                    "<- response"
                );
                if outcome.request_type == MessageType::Echo && !outcome.echo_intact() {
                    warn!(index, "Echo payload differs from request");
                }
            }
            OutcomeKind::PeerClosedBeforeHeader => {
                info!(index, cause, "Peer closed before header (EOF)");
            }
            OutcomeKind::Interrupted => warn!(index, "Interrupted"),
            kind => error!(index, kind = %kind, cause, "Exchange failed"),
        }
    }

    fn finished(&mut self, report: &RunReport) {
        info!(
            started_at = %report.started_at.format("%F %T%.3f"),
            elapsed_ms = report.elapsed.as_millis() as u64,
            planned = report.planned,
            successes = report.successes(),
            "{}",
            describe(report.termination())
        );

        if let Some(cap) = self.expect_cap {
            match report.cap_verdict(cap) {
                CapVerdict::Confirmed => info!(cap, "Per-connection cap confirmed"),
                CapVerdict::ClosedAt { successes } => {
                    error!(cap, successes, "Peer closed after a different number of requests")
                }
                CapVerdict::NotEnforced { successes } => {
                    error!(cap, successes, "Cap not enforced: no close after the cap")
                }
                CapVerdict::Untested { successes } => warn!(
                    cap,
                    successes,
                    "Cap untested: request count must exceed the cap"
                ),
                CapVerdict::Inconclusive => warn!(cap, "Cap inconclusive: run aborted"),
            }
        }
    }
}

fn describe(termination: Termination) -> String {
    match termination {
        Termination::Completed => "Done: all requests answered".to_string(),
        Termination::PeerClosed => "Done: peer closed the connection".to_string(),
        Termination::Aborted(kind) => format!("Done: aborted ({kind})"),
        Termination::Interrupted => "Done: interrupted".to_string(),
    }
}

/// Lossy UTF-8 preview of a payload, cut at `PREVIEW_LEN` bytes.
fn preview(payload: &[u8]) -> String {
    let cut = payload.len().min(PREVIEW_LEN);
    let mut text = String::from_utf8_lossy(&payload[..cut]).into_owned();
    if payload.len() > cut {
        text.push('…');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview(b"hello"), "hello");
        assert_eq!(preview(&[b'a'; 100]), format!("{}…", "a".repeat(PREVIEW_LEN)));
        assert_eq!(preview(&[0xff, b'x']), "\u{fffd}x");
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(Termination::Aborted(OutcomeKind::SendFailed)),
            "Done: aborted (send failed)"
        );
        assert_eq!(describe(Termination::PeerClosed), "Done: peer closed the connection");
    }
}
