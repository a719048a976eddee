//! Job scheduler: concurrency cap, pause/resume, priority policy and
//! self-driving queue drain.
//!
//! The scheduler admits at most one new primary pipeline task per call, a
//! deliberate governor against SQLite writer contention. Drain is driven two
//! ways: a completing pipeline re-ticks the scheduler when the queue is
//! non-empty, and an independent 5-second timer catches anything the
//! completion path missed.

use super::{enhanced_stages, IndexingPipeline, PipelineOutcome};
use crate::cancel::CancellationToken;
use crate::catalog::MediaType;
use crate::config::SchedulerConfig;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct RunningTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

struct SchedulerInner {
    pipeline: IndexingPipeline,
    paused: AtomicBool,
    primary: Mutex<HashMap<String, RunningTask>>,
    enhanced: Mutex<HashMap<String, RunningTask>>,
}

/// Shared scheduler handle.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(pipeline: IndexingPipeline) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pipeline,
                paused: AtomicBool::new(false),
                primary: Mutex::new(HashMap::new()),
                enhanced: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Spawn the periodic drain tick. The task runs for the process
    /// lifetime.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SchedulerConfig::TICK_INTERVAL).await;
                if scheduler.is_paused() {
                    continue;
                }
                let queued = scheduler
                    .inner
                    .pipeline
                    .catalog()
                    .count_queued()
                    .unwrap_or(0);
                if queued > 0 && scheduler.live_primary_count() == 0 {
                    debug!("Scheduler tick: {} queued, 0 live; draining", queued);
                    let _ = scheduler
                        .start_indexing_queued(SchedulerConfig::DRAIN_BATCH as usize)
                        .await;
                }
            }
        })
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!("Indexing paused");
    }

    /// Resume and immediately tick once.
    pub async fn resume(&self) -> Result<usize> {
        self.inner.paused.store(false, Ordering::SeqCst);
        info!("Indexing resumed");
        self.start_indexing_queued(SchedulerConfig::DRAIN_BATCH as usize)
            .await
    }

    pub fn live_primary_count(&self) -> usize {
        self.inner
            .primary
            .lock()
            .map(|map| map.values().filter(|t| !t.handle.is_finished()).count())
            .unwrap_or(0)
    }

    pub fn running_media_ids(&self) -> Vec<String> {
        self.inner
            .primary
            .lock()
            .map(|map| {
                map.iter()
                    .filter(|(_, t)| !t.handle.is_finished())
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pick queued items (per the priority policy) and start pipelines for
    /// them, bounded by the concurrency cap and the one-admission-per-call
    /// governor. Returns how many were started.
    pub async fn start_indexing_queued(&self, limit: usize) -> Result<usize> {
        if self.is_paused() {
            return Ok(0);
        }
        let settings = self.inner.pipeline.catalog().settings_view()?;
        let live = self.live_primary_count();
        let available = (settings.max_concurrent_jobs as usize).saturating_sub(live);
        if available == 0 {
            return Ok(0);
        }
        let effective = limit
            .min(available)
            .min(SchedulerConfig::ADMISSION_PER_TICK as usize);

        let candidates = self
            .inner
            .pipeline
            .catalog()
            .list_queued(limit.max(effective), settings.prioritize_recent_media)?;

        let mut started = 0usize;
        for media_id in candidates {
            if started >= effective {
                break;
            }
            if self.is_running(&media_id) {
                continue;
            }
            self.spawn_primary(media_id);
            started += 1;
        }
        Ok(started)
    }

    fn is_running(&self, media_id: &str) -> bool {
        self.inner
            .primary
            .lock()
            .map(|map| {
                map.get(media_id)
                    .map(|t| !t.handle.is_finished())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn spawn_primary(&self, media_id: String) {
        let scheduler = self.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_media_id = media_id.clone();

        let handle = tokio::spawn(async move {
            let outcome = scheduler
                .inner
                .pipeline
                .run_primary(&task_media_id, task_cancel)
                .await;

            if let Ok(mut map) = scheduler.inner.primary.lock() {
                map.remove(&task_media_id);
            }

            if outcome == PipelineOutcome::Done {
                scheduler.maybe_spawn_enhanced(&task_media_id).await;
            }

            // Self-driving drain: when this was the last live task and work
            // remains, kick the scheduler again.
            let queued = scheduler
                .inner
                .pipeline
                .catalog()
                .count_queued()
                .unwrap_or(0);
            if queued > 0 && scheduler.live_primary_count() == 0 && !scheduler.is_paused() {
                debug!("Auto-continuing indexing: {} items queued", queued);
                if let Err(e) = scheduler
                    .start_indexing_queued(SchedulerConfig::DRAIN_BATCH as usize)
                    .await
                {
                    warn!("Auto-continue failed: {}", e);
                }
            }
        });

        if let Ok(mut map) = self.inner.primary.lock() {
            map.insert(media_id, RunningTask { handle, cancel });
        }
    }

    /// Schedule the enhanced stages after a primary run reaches DONE, when
    /// the item and preset call for them.
    async fn maybe_spawn_enhanced(&self, media_id: &str) {
        let catalog = self.inner.pipeline.catalog();
        let Ok(settings) = catalog.settings_view() else {
            return;
        };
        let media_type = match catalog.get_media(media_id) {
            Ok(Some(item)) => item.media_type,
            _ => return,
        };
        if enhanced_stages(media_type, settings.indexing_preset).is_empty() {
            return;
        }
        if media_type != MediaType::Video {
            return;
        }

        let scheduler = self.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_media_id = media_id.to_string();
        let handle = tokio::spawn(async move {
            let outcome = scheduler
                .inner
                .pipeline
                .run_enhanced(&task_media_id, task_cancel)
                .await;
            if outcome != PipelineOutcome::Done {
                debug!("Enhanced stages for {} ended with {:?}", task_media_id, outcome);
            }
            if let Ok(mut map) = scheduler.inner.enhanced.lock() {
                map.remove(&task_media_id);
            }
        });

        if let Ok(mut map) = self.inner.enhanced.lock() {
            map.insert(media_id.to_string(), RunningTask { handle, cancel });
        }
    }

    /// Cancel one item's tasks, or everything when `media_id` is `None`.
    /// Cancellation is cooperative; pipelines observe it at their next stage
    /// boundary and converge on CANCELLED.
    pub fn stop_indexing(&self, media_id: Option<&str>) -> Vec<String> {
        let mut stopped = Vec::new();
        for map in [&self.inner.primary, &self.inner.enhanced] {
            if let Ok(map) = map.lock() {
                match media_id {
                    Some(target) => {
                        if let Some(task) = map.get(target) {
                            task.cancel.cancel();
                            if !stopped.contains(&target.to_string()) {
                                stopped.push(target.to_string());
                            }
                        }
                    }
                    None => {
                        for (id, task) in map.iter() {
                            task.cancel.cancel();
                            if !stopped.contains(id) {
                                stopped.push(id.clone());
                            }
                        }
                    }
                }
            }
        }
        if !stopped.is_empty() {
            info!("Cancellation requested for {:?}", stopped);
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, MediaStatus};
    use crate::events::EventBus;
    use crate::ml::MlToolkit;
    use crate::paths::DataPaths;

    fn scheduler_with_items(items: &[&str]) -> (JobScheduler, Catalog, tempfile::TempDir) {
        let temp = tempfile::TempDir::new().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        for media_id in items {
            crate::catalog::test_support::seed_media(&catalog, media_id, MediaType::Video);
        }
        let paths = DataPaths::new(temp.path()).unwrap();
        let pipeline = IndexingPipeline::new(
            catalog.clone(),
            paths,
            MlToolkit::default(),
            EventBus::new(),
        );
        (JobScheduler::new(pipeline), catalog, temp)
    }

    #[tokio::test]
    async fn test_paused_scheduler_starts_nothing() {
        let (scheduler, _catalog, _temp) = scheduler_with_items(&["m1"]);
        scheduler.pause();
        assert_eq!(scheduler.start_indexing_queued(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_admission_cap_is_one_per_call() {
        let (scheduler, _catalog, _temp) = scheduler_with_items(&["m1", "m2", "m3"]);
        let started = scheduler.start_indexing_queued(10).await.unwrap();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_empty_queue_starts_nothing() {
        let (scheduler, _catalog, _temp) = scheduler_with_items(&[]);
        assert_eq!(scheduler.start_indexing_queued(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_drains_queue_via_self_continue() {
        let (scheduler, catalog, _temp) = scheduler_with_items(&["m1", "m2"]);
        // The items' source files do not exist, so each run fails fast with
        // FILE_NOT_FOUND; the drain logic still walks the whole queue.
        scheduler.start_indexing_queued(10).await.unwrap();

        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if catalog.count_queued().unwrap() == 0 && scheduler.live_primary_count() == 0 {
                break;
            }
        }
        assert_eq!(catalog.count_queued().unwrap(), 0);
        assert_eq!(
            catalog.media_status("m1").unwrap().unwrap(),
            MediaStatus::Failed
        );
        assert_eq!(
            catalog.media_status("m2").unwrap().unwrap(),
            MediaStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_resume_ticks_once() {
        let (scheduler, _catalog, _temp) = scheduler_with_items(&["m1"]);
        scheduler.pause();
        assert!(scheduler.is_paused());
        let started = scheduler.resume().await.unwrap();
        assert_eq!(started, 1);
        assert!(!scheduler.is_paused());
    }

    #[tokio::test]
    async fn test_stop_indexing_unknown_id_is_empty() {
        let (scheduler, _catalog, _temp) = scheduler_with_items(&[]);
        assert!(scheduler.stop_indexing(Some("ghost")).is_empty());
        assert!(scheduler.stop_indexing(None).is_empty());
    }
}
