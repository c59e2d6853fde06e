//! Termination signal sources.

use archlens_shared::constants::exit_codes;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use async_trait::async_trait;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;

/// A request to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM, sent by container runtimes on stop.
    Terminate,
    /// SIGINT, Ctrl-C in a foreground run.
    Interrupt,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Interrupt => "SIGINT",
        }
    }

    /// Conventional `128 + signo` exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Terminate => exit_codes::TERMINATED,
            Self::Interrupt => exit_codes::INTERRUPTED,
        }
    }
}

/// Where shutdown requests come from.
#[async_trait]
pub trait SignalSource: Send {
    /// Next signal; `None` when the source is closed and no more will arrive.
    async fn recv(&mut self) -> Option<ShutdownSignal>;
}

/// SIGTERM and SIGINT of the current process.
pub struct UnixSignals {
    sigterm: Signal,
    sigint: Signal,
}

impl UnixSignals {
    /// Register handlers. Must be called inside a tokio runtime.
    pub fn register() -> ArchlensResult<Self> {
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| ArchlensError::Internal(format!("failed to register SIGTERM: {}", e)))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| ArchlensError::Internal(format!("failed to register SIGINT: {}", e)))?;
        Ok(Self { sigterm, sigint })
    }
}

#[async_trait]
impl SignalSource for UnixSignals {
    async fn recv(&mut self) -> Option<ShutdownSignal> {
        tokio::select! {
            s = self.sigterm.recv() => s.map(|_| ShutdownSignal::Terminate),
            s = self.sigint.recv() => s.map(|_| ShutdownSignal::Interrupt),
        }
    }
}

/// Channel-backed source, for embedding and tests.
#[async_trait]
impl SignalSource for mpsc::UnboundedReceiver<ShutdownSignal> {
    async fn recv(&mut self) -> Option<ShutdownSignal> {
        mpsc::UnboundedReceiver::recv(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownSignal::Terminate.exit_code(), 128 + libc::SIGTERM);
        assert_eq!(ShutdownSignal::Interrupt.exit_code(), 128 + libc::SIGINT);
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ShutdownSignal::Interrupt).unwrap();
        drop(tx);
        assert_eq!(SignalSource::recv(&mut rx).await, Some(ShutdownSignal::Interrupt));
        assert_eq!(SignalSource::recv(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_unix_signal_delivery() {
        let mut signals = UnixSignals::register().unwrap();
        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
        assert_eq!(signals.recv().await, Some(ShutdownSignal::Terminate));
    }
}
