//! Early stopping.

use serde::{Deserialize, Serialize};

/// What the loop should do after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Stops once `epoch - best_epoch > patience`, i.e. after `patience`
/// consecutive epochs without improvement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self { patience }
    }

    /// `best_epoch` is `None` only before any improvement, which never
    /// triggers a stop.
    pub fn on_epoch_end(&self, epoch: usize, best_epoch: Option<usize>) -> CallbackAction {
        match best_epoch {
            Some(best) if epoch.saturating_sub(best) > self.patience => CallbackAction::Stop,
            _ => CallbackAction::Continue,
        }
    }
}
