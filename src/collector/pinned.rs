use anyhow::bail;
use log::{info, warn};
use tokio::time::sleep;

use crate::driver::MeasurementOutcome;

use super::ShardContext;

/// Explicit state of one pinned-session loop.
///
/// Transitions:
///
/// ```text
/// NeedRoot --root created--> HaveRoot(session)
/// HaveRoot --quota rejected--> HaveRoot (shadow zeroed, re-gate)
/// HaveRoot --no matching probe--> NeedRoot (session invalidated)
/// any      --target reached--> Done
/// ```
///
/// Root-creation failures other than quota exhaustion are fatal for
/// this vantage point only; the caller logs and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No usable session; the next creation selects an entry point.
    NeedRoot,

    /// A pinned session routes follow-ups through the same path.
    HaveRoot(String),

    /// Target reached; carries the last valid session handle.
    Done { session: Option<String> },
}

fn log_progress(location: &str, done: u64, total: u64) {
    if done % 10 == 0 || done == total {
        info!("Progress for {}: {}/{}", location, done, total);
    }
}

/// Collects `total_requests` samples for one host through one named
/// location, reusing a pinned session so every sample goes through
/// the same previously-selected entry point.
///
/// Returns the terminal state (scenario checks care about whether
/// the session survived the run).
pub async fn collect_from_location(
    ctx: &ShardContext,
    host: &str,
    location: &str,
    total_requests: u64,
) -> anyhow::Result<SessionState> {
    info!(
        "Starting collection for {} from {} (Target: {} requests)",
        host, location, total_requests
    );

    let mut state = SessionState::NeedRoot;
    let mut requests_done: u64 = 0;

    while requests_done < total_requests {
        // One authoritative quota check per batch; the shadow
        // counter below approximates it between checks.
        let mut local_remaining = ctx.gate.admit().await;

        state = match state {
            SessionState::NeedRoot => {
                info!("Creating root measurement for {}...", location);

                match ctx.driver.create_pinned_root(host, location).await {
                    MeasurementOutcome::Complete { id, results } => {
                        ctx.persist(&results).await?;
                        requests_done += 1;
                        log_progress(location, requests_done, total_requests);
                        info!("Root measurement created: {}", id);
                        SessionState::HaveRoot(id)
                    }
                    MeasurementOutcome::RateLimited => {
                        info!(
                            "Rate limit exceeded creating root measurement. \
                             Waiting..."
                        );
                        sleep(ctx.transient_retry.delay(0, None)).await;
                        SessionState::NeedRoot
                    }
                    MeasurementOutcome::SessionInvalid => {
                        bail!("no probe matched location '{}'", location);
                    }
                    MeasurementOutcome::Failed(msg) => {
                        bail!("failed to create root measurement: {}", msg);
                    }
                }
            }

            SessionState::HaveRoot(session) => {
                info!(
                    "Rate limit allows {} requests. Proceeding with batch \
                     using session {}...",
                    local_remaining, session
                );

                let mut next = SessionState::HaveRoot(session.clone());

                while local_remaining > 0 && requests_done < total_requests {
                    match ctx.driver.create_from_session(host, &session).await
                    {
                        MeasurementOutcome::Complete { results, .. } => {
                            local_remaining -= 1;
                            ctx.persist(&results).await?;
                            requests_done += 1;
                            log_progress(
                                location,
                                requests_done,
                                total_requests,
                            );
                        }
                        MeasurementOutcome::RateLimited => {
                            // Shadow counter was stale; force a
                            // re-gate.
                            info!(
                                "Rate limit exceeded during batch. \
                                 Refreshing limits..."
                            );
                            local_remaining = 0;
                        }
                        MeasurementOutcome::SessionInvalid => {
                            info!(
                                "Session probe unavailable. Invalidating \
                                 session {}...",
                                session
                            );
                            next = SessionState::NeedRoot;
                            break;
                        }
                        MeasurementOutcome::Failed(msg) => {
                            // Wasted attempt; the driver already
                            // backed off.
                            warn!(
                                "Measurement failed for {} via {}: {}",
                                host, location, msg
                            );
                            local_remaining -= 1;
                        }
                    }
                }

                next
            }

            SessionState::Done { .. } => break,
        };
    }

    info!(
        "Collection for {} from {} complete ({} requests)",
        host, location, requests_done
    );

    Ok(SessionState::Done {
        session: match state {
            SessionState::HaveRoot(id) => Some(id),
            _ => None,
        },
    })
}
