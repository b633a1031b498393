//! Shutdown notification
//!
//! OS signals and explicit cleanup requests both end up as a single
//! [`ShutdownReason`] delivered through a watch channel. The first trigger
//! wins; later ones are ignored.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Why forwarding stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP
    Hangup,
    /// Requested by the embedding program, or every trigger was dropped
    CleanupRequested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => f.write_str("interrupt"),
            ShutdownReason::Terminate => f.write_str("terminate"),
            ShutdownReason::Hangup => f.write_str("hangup"),
            ShutdownReason::CleanupRequested => f.write_str("cleanup request"),
        }
    }
}

/// Sending half; cheap to clone
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

/// Receiving half, awaited by the lifecycle manager
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<Option<ShutdownReason>>,
}

/// Create a connected trigger/signal pair
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(None);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    /// Fire the notification; returns false if it had already fired
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Shorthand for an explicit cleanup request
    pub fn request_cleanup(&self) -> bool {
        self.trigger(ShutdownReason::CleanupRequested)
    }
}

impl ShutdownSignal {
    /// The reason, if the notification already fired
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.rx.borrow()
    }

    /// Block until the notification fires
    pub async fn wait(&mut self) -> ShutdownReason {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::CleanupRequested),
            Err(_) => {
                debug!("All shutdown triggers dropped");
                ShutdownReason::CleanupRequested
            }
        }
    }
}

/// Translate SIGINT, SIGTERM and SIGHUP into the trigger
#[cfg(unix)]
pub fn listen_for_signals(trigger: ShutdownTrigger) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        let reason = tokio::select! {
            _ = interrupt.recv() => ShutdownReason::Interrupt,
            _ = terminate.recv() => ShutdownReason::Terminate,
            _ = hangup.recv() => ShutdownReason::Hangup,
        };
        debug!("Received {} signal", reason);
        trigger.trigger(reason);
    }))
}

/// Translate Ctrl-C into the trigger
#[cfg(not(unix))]
pub fn listen_for_signals(trigger: ShutdownTrigger) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                trigger.trigger(ShutdownReason::Interrupt);
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    }))
}
