//! Line-oriented replay of admission checks.
//!
//! Each input line is `<tier> <client-key>`; blank lines and `#` comments are
//! skipped. One JSON object is written per checked line, so recorded traffic
//! can be run against a configuration to see what it would admit.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::client::ClientKey;
use super::service::{AdmissionGate, Decision};
use crate::error::Result;
use crate::ratelimit::Tier;

/// Counts of a finished replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub allowed: u64,
    pub denied: u64,
    pub malformed: u64,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ReplayRecord<'a> {
    Decision {
        line: u64,
        tier: Tier,
        client: &'a str,
        decision: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<&'static str>,
    },
    Malformed {
        line: u64,
        error: String,
    },
}

/// Run every line of `reader` through `gate`, writing decisions to `writer`.
pub async fn replay<R, W>(gate: &AdmissionGate, reader: R, mut writer: W) -> Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = SplitStream::new(reader.split(b'\n'));
    let mut stats = ReplayStats::default();
    let mut line_no = 0u64;

    while let Some(raw) = lines.next().await {
        let raw = raw?;
        line_no += 1;

        // Undecodable bytes spoil only their own line.
        let parsed = match std::str::from_utf8(&raw) {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() || text.starts_with('#') {
                    continue;
                }
                parse_line(text)
            }
            Err(e) => Err(format!("invalid UTF-8: {}", e)),
        };

        let record = match parsed {
            Ok((tier, client)) => {
                let key = ClientKey::from(client);
                let decision = gate.check(tier, &key);
                let reason = match &decision {
                    Decision::Allow => {
                        stats.allowed += 1;
                        None
                    }
                    Decision::Deny(reason) => {
                        stats.denied += 1;
                        Some(reason.code)
                    }
                };
                ReplayRecord::Decision {
                    line: line_no,
                    tier,
                    client,
                    decision: if decision.is_allowed() { "allow" } else { "deny" },
                    reason,
                }
            }
            Err(error) => {
                warn!(line = line_no, error = %error, "Skipping malformed replay line");
                stats.malformed += 1;
                ReplayRecord::Malformed {
                    line: line_no,
                    error,
                }
            }
        };

        let mut out = serde_json::to_vec(&record)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
    }

    writer.flush().await?;
    info!(
        allowed = stats.allowed,
        denied = stats.denied,
        malformed = stats.malformed,
        "Replay finished"
    );
    Ok(stats)
}

fn parse_line(line: &str) -> std::result::Result<(Tier, &str), String> {
    let mut parts = line.split_whitespace();
    let (Some(tier), Some(client), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err("expected '<tier> <client-key>'".to_string());
    };
    let tier = tier.parse::<Tier>().map_err(|e| e.to_string())?;
    Ok((tier, client))
}
