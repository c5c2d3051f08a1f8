/// Moderation controls: block/unblock the current peer
use crate::backend::Backend;
use crate::events::{ClientEvent, ModerationAction, ModerationReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What the conversation shows when a block/unblock call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Log only; the confirmation simply never appears
    #[default]
    Silent,
    /// Append a system entry describing the failure
    Surface,
}

pub struct ModerationControls {
    backend: Arc<dyn Backend>,
    policy: FailurePolicy,
}

impl ModerationControls {
    pub fn new(backend: Arc<dyn Backend>, policy: FailurePolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn block(
        &self,
        victim: &str,
        offender: &str,
        reports: mpsc::UnboundedSender<ClientEvent>,
    ) -> Option<JoinHandle<()>> {
        self.request(ModerationAction::Block, victim, offender, reports)
    }

    pub fn unblock(
        &self,
        victim: &str,
        offender: &str,
        reports: mpsc::UnboundedSender<ClientEvent>,
    ) -> Option<JoinHandle<()>> {
        self.request(ModerationAction::Unblock, victim, offender, reports)
    }

    /// Issue one call in the background. Returns `None` without calling
    /// anything when either identity is blank.
    pub fn request(
        &self,
        action: ModerationAction,
        victim: &str,
        offender: &str,
        reports: mpsc::UnboundedSender<ClientEvent>,
    ) -> Option<JoinHandle<()>> {
        let victim = victim.trim().to_string();
        let offender = offender.trim().to_string();
        if victim.is_empty() || offender.is_empty() {
            debug!("Skipping {}: identity not set", action);
            return None;
        }

        let backend = self.backend.clone();
        Some(tokio::spawn(async move {
            let result = match action {
                ModerationAction::Block => backend.block(&victim, &offender).await,
                ModerationAction::Unblock => backend.unblock(&victim, &offender).await,
            };
            if let Err(e) = &result {
                warn!("Failed to {} {} for {}: {}", action, offender, victim, e);
            }
            let _ = reports.send(ClientEvent::ModerationSettled(ModerationReport {
                action,
                victim,
                offender,
                result,
            }));
        }))
    }

    /// System entry to append once a call has settled, if any
    pub fn confirmation(&self, report: &ModerationReport) -> Option<String> {
        match (&report.result, self.policy) {
            (Ok(()), _) => Some(format!(
                "You {} {}",
                report.action.past_tense(),
                report.offender
            )),
            (Err(_), FailurePolicy::Silent) => None,
            (Err(e), FailurePolicy::Surface) => Some(format!(
                "Could not {} {}: {}",
                report.action, report.offender, e
            )),
        }
    }
}
