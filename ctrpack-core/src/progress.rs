//! User-interaction collaborator: progress reporting and prompts.
//!
//! Every streaming loop in the engine calls [`Interaction::progress`] once per
//! processed chunk. Returning `false` cancels the running operation; this is
//! the only cooperative yield point and the only cancellation mechanism.

/// Progress and prompt sink supplied by the frontend.
pub trait Interaction {
    /// Report `done` of `total` bytes for the item named by `label`.
    /// A `total` of zero marks the start of an item. Return `false` to abort.
    fn progress(&self, done: u64, total: u64, label: &str) -> bool;

    /// Show a message to the user. Returns whether it was acknowledged.
    fn prompt(&self, message: &str) -> bool;
}

/// Silent interaction: never cancels, acknowledges every prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInteraction;

impl Interaction for NoInteraction {
    fn progress(&self, _done: u64, _total: u64, _label: &str) -> bool {
        true
    }

    fn prompt(&self, _message: &str) -> bool {
        true
    }
}

/// Routes progress and prompts into the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogInteraction;

impl Interaction for LogInteraction {
    fn progress(&self, done: u64, total: u64, label: &str) -> bool {
        if total == 0 {
            log::info!("{}: starting", label);
        } else {
            log::debug!("{}: {}/{} bytes", label, done, total);
        }
        true
    }

    fn prompt(&self, message: &str) -> bool {
        log::warn!("{}", message.replace('\n', " | "));
        true
    }
}
