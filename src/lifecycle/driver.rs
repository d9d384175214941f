//! The task that runs one session's handshake.
//!
//! A driver launches a connection, pumps its events through an
//! [`EventAdapter`], reconnects after non-permanent closes and lingers after
//! a successful link until the cleanup deadline. Aborting the driver's
//! `JoinHandle` cancels all of it, timers included.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::adapter::{EventAdapter, Step, TaskOutcome};
use super::context::SessionContext;
use super::events::LifecycleEventKind;
use crate::domain::SessionStatus;
use crate::error::{LinkerError, LinkerResult};
use crate::traits::{
    DisconnectReason, HandshakeConfig, HandshakeConnection, OpenedConnection, FALLBACK_VERSION,
};

/// How a connection's event pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    /// Nothing more to do for this session.
    Finished,
    /// The connection closed and may be reopened.
    Closed,
}

pub(crate) async fn run(ctx: SessionContext) {
    // Every reconnect counts, including after an `open` that never linked.
    let mut reconnects: u32 = 0;
    let mut first_launch = true;

    loop {
        match launch(&ctx).await {
            Ok(opened) => {
                first_launch = false;
                let connection = opened.connection.clone();
                let attached = ctx
                    .shared
                    .registry
                    .attach(&ctx.unique_id, ctx.generation, connection.clone())
                    .await;
                if !attached {
                    debug!(session_id = %ctx.session_id, "Superseded before attaching");
                    connection.shutdown();
                    return;
                }

                match pump(&ctx, opened).await {
                    PumpExit::Finished => return,
                    PumpExit::Closed => {
                        ctx.shared
                            .registry
                            .detach(&ctx.unique_id, ctx.generation)
                            .await;
                    }
                }
            }
            Err(e) => {
                error!(
                    session_id = %ctx.session_id,
                    unique_id = %ctx.unique_id,
                    "Failed to start handshake: {}",
                    e
                );
                ctx.report(&e);
                if first_launch {
                    give_up(&ctx).await;
                    return;
                }
            }
        }

        reconnects += 1;
        if let Some(max) = ctx.timings().max_reconnects {
            if reconnects > max {
                error!(
                    unique_id = %ctx.unique_id,
                    "Giving up after {} reconnect attempts",
                    max
                );
                give_up(&ctx).await;
                return;
            }
        }

        if ctx.snapshot().await.is_none() {
            debug!(session_id = %ctx.session_id, "Session gone, not reconnecting");
            drop(ctx.shared.registry.release(&ctx.unique_id, ctx.generation).await);
            return;
        }

        let delay = ctx.timings().reconnect_delay;
        info!(
            unique_id = %ctx.unique_id,
            "Reconnecting in {}ms (attempt {})",
            delay.as_millis(),
            reconnects
        );
        ctx.publish(LifecycleEventKind::ReconnectScheduled {
            attempt: reconnects,
            delay_ms: delay.as_millis() as u64,
        });
        tokio::time::sleep(delay).await;
    }
}

/// Load credentials and open a connection.
async fn launch(ctx: &SessionContext) -> LinkerResult<OpenedConnection> {
    let auth = ctx.shared.store.load(&ctx.unique_id).await?;

    let version = match ctx.shared.connector.negotiate_version().await {
        Ok(version) => version,
        Err(e) => {
            warn!("Version negotiation failed, using fallback: {}", e);
            FALLBACK_VERSION
        }
    };

    let opened = ctx
        .shared
        .connector
        .connect(HandshakeConfig::new(version), auth)
        .await?;
    debug!(session_id = %ctx.session_id, "Handshake connection opened");
    Ok(opened)
}

async fn give_up(ctx: &SessionContext) {
    ctx.fail(SessionStatus::LaunchFailed).await;
    drop(ctx.shared.registry.release(&ctx.unique_id, ctx.generation).await);
}

async fn logged_out(ctx: &SessionContext, connection: &Arc<dyn HandshakeConnection>) {
    let err = LinkerError::LoggedOut {
        unique_id: ctx.unique_id.clone(),
    };
    warn!("{}, erasing credentials", err);
    ctx.report(&err);
    ctx.teardown(connection).await;
    if let Err(e) = ctx.shared.store.erase(&ctx.unique_id).await {
        error!(unique_id = %ctx.unique_id, "Failed to erase credentials: {}", e);
        ctx.report(&LinkerError::from(e));
    }
    ctx.fail(SessionStatus::AuthFailed).await;
}

/// Whether the finalize task already reported the link, even if its outcome
/// has not been collected yet.
async fn is_connected(ctx: &SessionContext) -> bool {
    ctx.snapshot()
        .await
        .is_some_and(|s| s.status == SessionStatus::Connected)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn pump(ctx: &SessionContext, opened: OpenedConnection) -> PumpExit {
    let OpenedConnection {
        connection,
        mut events,
    } = opened;
    let mut adapter = EventAdapter::new(ctx.clone(), connection.clone());
    let mut cleanup_at: Option<Instant> = None;
    let mut listening = true;

    loop {
        tokio::select! {
            _ = wait_until(cleanup_at) => {
                info!(session_id = %ctx.session_id, "Cleaning up linked session");
                ctx.cleanup(&connection).await;
                return PumpExit::Finished;
            }
            outcome = adapter.next_outcome(), if adapter.has_tasks() => {
                match outcome {
                    Some(TaskOutcome::Linked) => {
                        cleanup_at = Some(Instant::now() + ctx.timings().cleanup_delay);
                    }
                    Some(TaskOutcome::Terminal) => {
                        ctx.teardown(&connection).await;
                        return PumpExit::Finished;
                    }
                    Some(TaskOutcome::Done) | None => {}
                }
            }
            event = events.recv(), if listening => {
                let step = match event {
                    Some(event) => adapter.handle(event).await,
                    None => Step::Closed(DisconnectReason::Unknown),
                };
                let linked = matches!(step, Step::Closed(_))
                    && (cleanup_at.is_some() || is_connected(ctx).await);

                match step {
                    Step::Continue => {}
                    Step::Terminal => {
                        ctx.teardown(&connection).await;
                        return PumpExit::Finished;
                    }
                    Step::Closed(reason) if reason.is_logged_out() => {
                        adapter.abort_tasks().await;
                        logged_out(ctx, &connection).await;
                        return PumpExit::Finished;
                    }
                    Step::Closed(reason) if linked => {
                        info!(
                            unique_id = %ctx.unique_id,
                            ?reason,
                            "Connection closed after link, waiting for cleanup"
                        );
                        cleanup_at
                            .get_or_insert_with(|| Instant::now() + ctx.timings().cleanup_delay);
                        listening = false;
                        connection.shutdown();
                    }
                    Step::Closed(reason) => {
                        info!(
                            unique_id = %ctx.unique_id,
                            ?reason,
                            code = ?reason.status_code(),
                            "Connection closed"
                        );
                        adapter.abort_tasks().await;
                        connection.shutdown();
                        return PumpExit::Closed;
                    }
                }
            }
        }
    }
}
