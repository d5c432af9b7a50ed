//! CLI command implementations

pub mod cp;
pub mod rm;

use std::sync::Arc;

use hafiz_core::TransferConfig;
use hafiz_storage::StorageClient;
use hafiz_transfer::CancellationToken;
use indicatif::ProgressBar;

use crate::progress::{create_spinner, hidden};

/// Context passed to all commands
pub struct CommandContext {
    pub client: Arc<dyn StorageClient>,
    pub transfer: TransferConfig,
    pub quiet: bool,
    /// Cancelled on Ctrl-C
    pub cancel: CancellationToken,
}

impl CommandContext {
    /// Print info message if not quiet
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg);
    }

    /// Spinner for a running transfer, hidden in quiet mode
    pub fn spinner(&self, msg: &str) -> ProgressBar {
        if self.quiet {
            hidden()
        } else {
            create_spinner(msg)
        }
    }
}
