// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use super::fakes::{job_payload, region, Harness, Receive};
use fontdetective_worker::{PollOutcome, PollSettings, RunOutcome, WorkerLoop};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PollSettings {
        PollSettings {
            receive_wait: Duration::from_millis(10),
            lease: Duration::from_secs(60),
            idle_backoff: Duration::ZERO,
            error_backoff: Duration::from_millis(5),
        }
    }

    fn worker(harness: &Harness) -> WorkerLoop {
        WorkerLoop::new(
            harness.queue.clone(),
            Arc::new(harness.orchestrator()),
            settings(),
        )
    }

    fn harness() -> Harness {
        Harness::new(vec![("d1", Ok(vec![region(1, 1, 4, 4)]))])
    }

    #[tokio::test]
    async fn test_three_empty_polls() {
        let harness = harness();
        let worker = worker(&harness);

        for _ in 0..3 {
            assert_eq!(worker.poll_once().await, PollOutcome::Empty);
        }

        assert_eq!(harness.count("receive"), 3);
        assert_eq!(harness.count("fetch:"), 0);
        assert_eq!(harness.events().len(), 3);

        let stats = worker.stats().await;
        assert_eq!(stats.polls, 3);
        assert_eq!(stats.empty_polls, 3);
        assert_eq!(stats.completed_runs, 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_deleted_without_stages() {
        let harness = harness();
        // Missing uid
        harness.queue.push(Receive::Message(
            br#"{"url":"http://x/img.png","image":{"w":10,"h":10},"selection":{"x":0,"y":0,"w":5,"h":5}}"#.to_vec(),
            "lease-poison",
        ));
        let worker = worker(&harness);

        assert_eq!(worker.poll_once().await, PollOutcome::Poisoned);
        assert_eq!(harness.events(), vec!["receive", "delete:lease-poison"]);
        assert_eq!(worker.stats().await.poison_messages, 1);
    }

    #[tokio::test]
    async fn test_invalid_selection_is_poison() {
        let harness = harness();
        harness.queue.push(Receive::Message(
            br#"{"uid":"b7","url":"http://x/img.png","image":{"w":10,"h":10},"selection":{"x":8,"y":0,"w":5,"h":5}}"#.to_vec(),
            "lease-b7",
        ));
        let worker = worker(&harness);

        assert_eq!(worker.poll_once().await, PollOutcome::Poisoned);
        assert_eq!(harness.count("delete:lease-b7"), 1);
        assert_eq!(harness.count("fetch:"), 0);
        assert_eq!(harness.count("persist:"), 0);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_fatal() {
        let harness = harness();
        harness.queue.push(Receive::Unreachable);
        harness
            .queue
            .push(Receive::Message(job_payload("c3"), "lease-c3"));
        let worker = worker(&harness);

        assert_eq!(worker.poll_once().await, PollOutcome::TransportFailed);
        let outcome = worker.poll_once().await;
        assert!(matches!(
            outcome,
            PollOutcome::Processed(RunOutcome::Acknowledged { ref job_id, .. }) if job_id == "c3"
        ));

        let stats = worker.stats().await;
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.completed_runs, 1);
    }

    #[tokio::test]
    async fn test_jobs_processed_one_at_a_time() {
        let harness = harness();
        harness
            .queue
            .push(Receive::Message(job_payload("j1"), "lease-j1"));
        harness
            .queue
            .push(Receive::Message(job_payload("j2"), "lease-j2"));
        let worker = worker(&harness);

        worker.poll_once().await;
        worker.poll_once().await;

        // The second receive happens only after the first job is acknowledged
        let second_receive = harness
            .events()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.as_str() == "receive")
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(harness.position("delete:lease-j1").unwrap() < second_receive);
        assert!(harness.position("fetch:").unwrap() < second_receive);
    }

    #[tokio::test]
    async fn test_aborted_run_counted() {
        let harness = harness();
        harness
            .fetcher
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);
        harness
            .queue
            .push(Receive::Message(job_payload("f9"), "lease-f9"));
        let worker = worker(&harness);

        let outcome = worker.poll_once().await;
        assert!(matches!(
            outcome,
            PollOutcome::Processed(RunOutcome::Aborted { .. })
        ));
        assert_eq!(harness.count("delete:"), 0);
        assert_eq!(worker.stats().await.aborted_runs, 1);
    }
}
