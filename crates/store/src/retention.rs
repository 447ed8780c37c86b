use std::time::Duration;

use ragscope_core::query::AbandonedTrace;
use ragscope_core::time::elapsed_ms;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::TraceStore;

impl TraceStore {
    /// Moves in-progress traces older than `timeout` into the session's
    /// abandoned list. Reaped ids are no longer known to the store.
    pub fn reap_abandoned(&self, timeout: Duration) -> Vec<AbandonedTrace> {
        let now = self.now();
        let timeout_ms = timeout.as_millis();

        let reaped = {
            let mut traces = self.traces();
            let stale = traces
                .values()
                .filter(|t| t.is_active() && u128::from(elapsed_ms(t.start_time, now)) > timeout_ms)
                .map(|t| t.trace_id.clone())
                .collect::<Vec<_>>();
            let reaped = stale
                .into_iter()
                .filter_map(|id| traces.remove(&id))
                .map(|trace| AbandonedTrace {
                    trace_id: trace.trace_id,
                    query: trace.query_text,
                    started_at: trace.start_time,
                    abandoned_at: now,
                    spans_recorded: trace.spans.len(),
                })
                .collect::<Vec<_>>();
            if !reaped.is_empty() {
                self.session().abandoned.extend(reaped.iter().cloned());
            }
            reaped
        };

        for abandoned in &reaped {
            warn!(
                trace_id = %abandoned.trace_id,
                spans_recorded = abandoned.spans_recorded,
                "trace abandoned before completion"
            );
        }
        reaped
    }

    pub fn spawn_reaper(&self, timeout: Duration, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let reaped = store.reap_abandoned(timeout);
                debug!(reaped = reaped.len(), "reaper sweep finished");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ragscope_core::error::RagscopeError;
    use ragscope_core::model::trace::TraceStatus;
    use ragscope_core::query::Completion;
    use ragscope_core::time::ManualClock;
    use testkit::{base_time, embedding_metrics};

    use crate::TraceStore;

    fn store_with_clock() -> (TraceStore, ManualClock) {
        let clock = ManualClock::new(base_time());
        let store = TraceStore::default().with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    #[test]
    fn stale_traces_are_abandoned() {
        let (store, clock) = store_with_clock();
        let stale = store.start_trace("never finished");
        store
            .record_span(&stale, "embedding", &embedding_metrics(45))
            .unwrap();
        clock.advance_ms(4 * 60 * 1000);
        let fresh = store.start_trace("still running");
        clock.advance_ms(2 * 60 * 1000);

        let reaped = store.reap_abandoned(Duration::from_secs(300));
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].trace_id, stale);
        assert_eq!(reaped[0].spans_recorded, 1);
        assert_eq!(reaped[0].abandoned_at, base_time() + chrono::Duration::minutes(6));

        assert!(matches!(
            store.record_span(&stale, "search", &embedding_metrics(1)),
            Err(RagscopeError::UnknownTrace(_))
        ));
        assert!(matches!(
            store.complete_trace(&stale, Completion::default()),
            Err(RagscopeError::UnknownTrace(_))
        ));
        assert!(store.get_trace(&fresh).unwrap().is_active());

        let stats = store.session_stats();
        assert_eq!(stats.abandoned_traces, 1);
        assert_eq!(stats.active_traces, 1);
        assert_eq!(stats.total_queries, 0);
        let export = store.export_session();
        assert_eq!(export.traces.len(), 2);
        assert_eq!(export.traces[0].trace_id, stale);
        assert_eq!(export.traces[0].status, TraceStatus::Abandoned);
        assert!(export.traces[0].metrics.is_none());
        assert_eq!(export.abandoned.len(), 1);
    }

    #[test]
    fn completed_traces_are_never_reaped() {
        let (store, clock) = store_with_clock();
        let id = store.start_trace("q");
        store.complete_trace(&id, Completion::default()).unwrap();
        clock.advance_ms(60 * 60 * 1000);

        assert!(store.reap_abandoned(Duration::from_secs(1)).is_empty());
        assert!(store.get_trace(&id).is_ok());
        assert_eq!(store.session_stats().total_queries, 1);
    }

    #[tokio::test]
    async fn reaper_task_sweeps_periodically() {
        let (store, clock) = store_with_clock();
        let id = store.start_trace("leaked");
        clock.advance_ms(10_000);

        let handle = store.spawn_reaper(Duration::from_secs(5), Duration::from_millis(10));
        for _ in 0..100 {
            if store.get_trace(&id).is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(store.get_trace(&id).is_err());
        assert_eq!(store.session_stats().abandoned_traces, 1);
    }
}
