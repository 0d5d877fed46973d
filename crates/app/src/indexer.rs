use std::time::Duration;

use metrics::counter;
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info};

use rollout_storage::Database;

/// Handle for requesting asynchronous full rebuilds of the search index.
/// The index is synced best-effort on the write path, so the worker also
/// rebuilds periodically to repair any drift.
#[derive(Clone)]
pub struct RebuildService {
    sender: mpsc::Sender<RebuildCommand>,
}

impl RebuildService {
    pub fn new(database: Database, interval: Duration) -> (Self, RebuildWorker) {
        let (sender, receiver) = mpsc::channel(8);
        let worker = RebuildWorker {
            database,
            receiver,
            interval,
        };
        (Self { sender }, worker)
    }

    pub async fn trigger(&self) -> Result<(), RebuildTriggerError> {
        self.sender
            .send(RebuildCommand::Full)
            .await
            .map_err(|_| RebuildTriggerError::ChannelClosed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RebuildTriggerError {
    #[error("index rebuild worker channel closed")]
    ChannelClosed,
}

enum RebuildCommand {
    Full,
}

pub struct RebuildWorker {
    database: Database,
    receiver: mpsc::Receiver<RebuildCommand>,
    interval: Duration,
}

impl RebuildWorker {
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) {
        // The first tick fires immediately, so the index is rebuilt once at
        // startup before settling into the periodic cadence.
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.rebuild("periodic").await,
                Some(cmd) = self.receiver.recv() => {
                    match cmd {
                        RebuildCommand::Full => self.rebuild("requested").await,
                    }
                }
                else => break,
            }
        }
    }

    async fn rebuild(&self, reason: &'static str) {
        match self.database.search().rebuild().await {
            Ok(documents) => {
                counter!("search_index_rebuilds_total", "outcome" => "ok").increment(1);
                info!(stage = "search", reason, documents, "search index rebuilt");
            }
            Err(err) => {
                counter!("search_index_rebuilds_total", "outcome" => "error").increment(1);
                error!(stage = "search", reason, error = %err, "search index rebuild failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rollout_storage::NewAccount;
    use tokio::time::{sleep, timeout};
    use uuid::Uuid;

    #[tokio::test]
    async fn triggered_rebuild_repopulates_the_index() {
        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        let marker = format!("indexer{}", Uuid::new_v4().simple());
        database
            .accounts()
            .insert(
                NewAccount {
                    id: Uuid::new_v4(),
                    name: format!("{marker} Transit"),
                    sap_id: Uuid::new_v4().to_string(),
                    crm_id: None,
                    contact_email: None,
                    address_id: None,
                },
                Utc::now(),
            )
            .await
            .expect("account");

        let (service, worker) = RebuildService::new(database.clone(), Duration::from_secs(3600));
        let handle = worker.spawn();

        service.trigger().await.expect("trigger");

        let found = timeout(Duration::from_secs(5), async {
            loop {
                let hits = database.search().query(&marker, None, 10).await.expect("query");
                if !hits.is_empty() {
                    break hits;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("index should catch up");
        assert_eq!(found.len(), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn trigger_fails_once_the_worker_is_gone() {
        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        let (service, worker) = RebuildService::new(database, Duration::from_secs(3600));
        drop(worker);

        let err = service.trigger().await.unwrap_err();
        assert!(matches!(err, RebuildTriggerError::ChannelClosed));
    }
}
