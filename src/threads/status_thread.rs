//! Status Thread - periodic server status reports.
//!
//! Builds a textual snapshot every `status_interval_s`: queue contents with
//! stage flags and running commands, merge-loop state, blacklist and
//! per-robot mission chains. The report is always logged locally; a
//! registered status callback additionally receives every report.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::server::context::ServerContext;

use super::interruptible_sleep;

/// Status thread handle.
pub(crate) struct StatusThread {
    handle: JoinHandle<()>,
}

impl StatusThread {
    pub fn spawn(context: Arc<ServerContext>) -> Self {
        let handle = thread::Builder::new()
            .name("status".into())
            .spawn(move || run_status_loop(context))
            .expect("Failed to spawn status thread");
        Self { handle }
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_status_loop(context: Arc<ServerContext>) {
    log::info!("Status thread starting");

    while !context.shutdown_requested() {
        print_and_publish_server_status(&context);
        interruptible_sleep(
            &context,
            Duration::from_secs_f64(context.config.status_interval_s),
        );
    }

    log::info!("Status thread shutdown complete");
}

fn print_and_publish_server_status(context: &ServerContext) {
    let status = context.build_status();
    let text = status.to_string();

    log::info!("\n{}", text);

    let publisher = context
        .status_publisher
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();
    if let Some(publisher) = publisher {
        publisher.publish(&text);
    }
}
