//! Change notifier: filters the store's change feed and launches sync runs.
//!
//! Changes arrive one record per delivery in commit order. Records whose new
//! image has a raw `SyncStatus` beginning with `QUEUED` are dispatched
//! fire-and-forget; everything else is dropped with no replay. A dispatch
//! that fails to start is retried once, then the change is dropped; a stuck
//! record can always be re-queued externally.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{debug, warn};

use crate::core::stream::ChangeRecord;

const DISPATCH_RETRIES: u32 = 1;
const DISPATCH_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Trigger predicate: matches `QUEUED` and externally written variants such
/// as `QUEUED_RETRY`.
pub fn should_trigger(record: &ChangeRecord) -> bool {
    record
        .dynamodb
        .new_image
        .sync_status
        .value
        .starts_with("QUEUED")
}

pub struct ChangeNotifier<F>
where
    F: Fn(ChangeRecord) -> Result<()>,
{
    launch: F,
}

impl<F> ChangeNotifier<F>
where
    F: Fn(ChangeRecord) -> Result<()>,
{
    pub fn new(launch: F) -> Self {
        Self { launch }
    }

    /// Consume the feed until the sending side closes.
    pub async fn run(&self, changes: mpsc::Receiver<ChangeRecord>) {
        let mut changes = ReceiverStream::new(changes);
        while let Some(record) = changes.next().await {
            self.deliver(record).await;
        }
    }

    async fn deliver(&self, record: ChangeRecord) {
        if !should_trigger(&record) {
            debug!(
                event_id = %record.event_id,
                sync_status = %record.dynamodb.new_image.sync_status.value,
                "change does not match trigger predicate, dropping"
            );
            return;
        }

        let mut attempts_left = DISPATCH_RETRIES + 1;
        loop {
            match (self.launch)(record.clone()) {
                Ok(()) => return,
                Err(e) => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        warn!(
                            event_id = %record.event_id,
                            bot_key = record.sk(),
                            "dropping change after failed dispatch: {}",
                            e
                        );
                        return;
                    }
                    warn!(
                        event_id = %record.event_id,
                        "dispatch failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(DISPATCH_RETRY_DELAY).await;
                }
            }
        }
    }
}
