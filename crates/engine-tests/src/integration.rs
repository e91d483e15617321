#[cfg(test)]
mod tests {
    use crate::utils::{TestEnv, emit_chunks, staged_keys};
    use engine_core::filter::AdmissionFilter;
    use engine_processing::error::CoordinatorError;
    use std::collections::HashSet;
    use tracing_test::traced_test;

    // Scenario: namespace {in/1.wav, in/2.wav, out/1.wav, in/3.txt}, batch_size=2,
    // extensions {.wav}, reserved {out/}.
    // Expected Outcome:
    // - exactly in/1.wav and in/2.wav are staged, in listing order;
    // - the in-memory ledger records both downloads;
    // - has_next() is still true because nothing has been committed;
    // - leftovers in the inbound dir are wiped before the fetch.
    #[traced_test]
    #[tokio::test]
    async fn first_batch_of_mixed_namespace() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav", "out/1.wav", "in/3.txt"]);
        std::fs::create_dir_all(&env.settings.dirs.inbound).unwrap();
        let stale = env.settings.dirs.inbound.join("leftover.wav");
        std::fs::write(&stale, b"old").unwrap();

        let mut coordinator = env.coordinator().await;
        let batch = coordinator.next_batch().await.unwrap();

        assert_eq!(staged_keys(&batch), vec!["in/1.wav", "in/2.wav"]);
        assert_eq!(
            coordinator.ledger().downloaded_keys,
            vec!["in/1.wav", "in/2.wav"]
        );
        assert!(coordinator.has_next());
        assert!(!stale.exists());
        assert_eq!(env.store.get_calls("out/1.wav"), 0);
        assert_eq!(env.store.get_calls("in/3.txt"), 0);
        assert_eq!(
            env.observer.events()[..2],
            ["start:fetch", "update:fetch:batch_id,bytes,staged"]
        );
        assert!(logs_contain("Fetched batch."));
    }

    // Admissibility only depends on the key and the configured extensions
    // and prefixes.
    #[tokio::test]
    async fn filter_correctness() {
        let filter = AdmissionFilter::new([".wav"], ["out/"]);
        assert!(!filter.admits("out/a.wav"));
        assert!(filter.admits("in/a.wav"));
        assert!(!filter.admits("in/a.txt"));

        let env = TestEnv::new(&["out/a.wav", "in/a.wav", "in/a.txt"]).with(|s| s.batch_size = 10);
        let mut coordinator = env.coordinator().await;
        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/a.wav"]);
    }

    // Test Settings: batch_size=3, page_size=2.
    // Scenario: 7 admissible keys spread over 4 pages.
    // Expected Outcome: cycles stage 3, 3 and 1 keys; no key is fetched twice
    // and the namespace ends exhausted.
    #[tokio::test]
    async fn batch_size_bound_across_pages() {
        let keys: Vec<String> = (1..=7).map(|i| format!("in/{i}.wav")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let env = TestEnv::new(&refs).with(|s| {
            s.batch_size = 3;
            s.page_size = 2;
        });

        let mut coordinator = env.coordinator().await;
        let mut sizes = Vec::new();
        let mut seen = Vec::new();
        while coordinator.has_next() {
            let batch = coordinator.next_batch().await.unwrap();
            assert!(batch.len() <= 3);
            sizes.push(batch.len());
            seen.extend(staged_keys(&batch));
            coordinator.upload().await.unwrap();
        }

        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(seen, keys);
        for key in &keys {
            assert_eq!(env.store.get_calls(key), 1, "{key} fetched more than once");
        }
    }

    // Scenario: the process dies after fetching in/1.wav but before upload()
    // flushes the ledger.
    // Expected Outcome: the restarted coordinator re-lists from the committed
    // cursor, fetches in/1.wav again without error and the flushed ledger
    // records it exactly once.
    #[traced_test]
    #[tokio::test]
    async fn crash_before_ledger_flush_refetches_once() {
        let env = TestEnv::new(&["in/1.wav"]);

        {
            let mut coordinator = env.coordinator().await;
            let batch = coordinator.next_batch().await.unwrap();
            assert_eq!(staged_keys(&batch), vec!["in/1.wav"]);
            // dropped without upload()
        }

        assert!(env.ledger_on_disk().is_none());
        let state = env.state_on_disk().unwrap();
        assert!(state.pending.is_some());
        assert!(!state.completed);

        let mut coordinator = env.coordinator().await;
        assert!(coordinator.has_next());
        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/1.wav"]);
        coordinator.upload().await.unwrap();

        assert_eq!(env.store.get_calls("in/1.wav"), 2);
        let ledger = env.ledger_on_disk().unwrap();
        assert_eq!(ledger.downloaded_keys, vec!["in/1.wav"]);
        assert_eq!(ledger.batch_count, 1);
        assert!(env.state_on_disk().unwrap().completed);
        assert!(logs_contain("uncommitted cursor"));
    }

    // Scenario: upload() with nothing in the outbound dir.
    // Expected Outcome: no error, nothing pushed, batch_count advances by one
    // per call.
    #[tokio::test]
    async fn empty_upload_still_counts_a_batch() {
        let env = TestEnv::new(&[]);
        let mut coordinator = env.coordinator().await;

        let report = coordinator.upload().await.unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(env.ledger_on_disk().unwrap().batch_count, 1);

        coordinator.upload().await.unwrap();
        assert_eq!(env.ledger_on_disk().unwrap().batch_count, 2);
        assert_eq!(env.observer.count("end:push:succeeded"), 2);
    }

    // Scenario: the namespace is exhausted after one cycle.
    // Expected Outcome: has_next() stays false on every later call, across a
    // restart and after another fetch/publish round, and the store is not
    // listed again.
    #[tokio::test]
    async fn exhaustion_is_terminal() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav"]).with(|s| s.batch_size = 5);
        let mut coordinator = env.coordinator().await;
        coordinator.next_batch().await.unwrap();
        coordinator.upload().await.unwrap();
        assert!(!coordinator.has_next());
        assert!(!coordinator.has_next());

        let lists = env.store.list_calls();
        let mut coordinator = env.coordinator().await;
        assert!(!coordinator.has_next());

        let batch = coordinator.next_batch().await.unwrap();
        assert!(batch.is_empty());
        coordinator.upload().await.unwrap();

        assert!(!coordinator.has_next());
        assert!(env.state_on_disk().unwrap().completed);
        assert_eq!(env.store.list_calls(), lists);
        assert_eq!(env.store.get_calls("in/1.wav"), 1);
    }

    // Scenario: several runs over 5 keys, each object producing two chunks,
    // with one run interrupted between fetch and upload.
    // Expected Outcome: every uploaded key is unique, total_chunks equals the
    // number of uploads and every source is downloaded exactly once in the
    // ledger.
    #[tokio::test]
    async fn resume_after_interrupted_run_is_idempotent() {
        let keys = ["in/a.wav", "in/b.wav", "in/c.wav", "in/d.wav", "in/e.wav"];
        let env = TestEnv::new(&keys);

        {
            let mut coordinator = env.coordinator().await;
            let batch = coordinator.next_batch().await.unwrap();
            emit_chunks(&batch, 2).await;
            coordinator.upload().await.unwrap();

            let batch = coordinator.next_batch().await.unwrap();
            emit_chunks(&batch, 2).await;
            // interrupted before upload()
        }

        let mut coordinator = env.coordinator().await;
        while coordinator.has_next() {
            let batch = coordinator.next_batch().await.unwrap();
            emit_chunks(&batch, 2).await;
            coordinator.upload().await.unwrap();
        }

        let ledger = env.ledger_on_disk().unwrap();
        let unique: HashSet<&String> = ledger.uploaded_keys.iter().collect();
        assert_eq!(unique.len(), ledger.uploaded_keys.len());
        assert_eq!(ledger.uploaded_keys.len(), 10);
        assert_eq!(ledger.total_chunks, 10);
        assert_eq!(ledger.downloaded_keys, keys);
        assert_eq!(ledger.before_process_count, 5);
        assert_eq!(ledger.after_process_count, 10);
        assert!(
            ledger
                .uploaded_keys
                .iter()
                .all(|k| env.store.object(k).is_some() && k.starts_with("out/"))
        );
        assert_eq!(env.store.get_calls("in/c.wav"), 2);
    }

    // Test Settings: batch_size=2, page_size=2, two attempts per store call.
    // Scenario: every attempt to fetch in/1.wav fails during the first cycle.
    // Expected Outcome:
    // - the key is queued in failed_keys instead of being skipped for good;
    // - the next cycle retries it first and then continues the listing;
    // - the queue drains once the fetch succeeds.
    #[traced_test]
    #[tokio::test]
    async fn failed_fetch_is_retried_next_cycle() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav", "in/3.wav", "in/4.wav"])
            .with(|s| s.page_size = 2);
        env.store.fail_get("in/1.wav", 2);

        let mut coordinator = env.coordinator().await;
        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/2.wav", "in/3.wav"]);
        coordinator.upload().await.unwrap();

        let ledger = env.ledger_on_disk().unwrap();
        assert_eq!(ledger.failed_keys, vec!["in/1.wav"]);
        assert!(coordinator.has_next());

        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/1.wav", "in/4.wav"]);
        coordinator.upload().await.unwrap();

        let ledger = env.ledger_on_disk().unwrap();
        assert!(ledger.failed_keys.is_empty());
        assert!(ledger.attempts.is_empty());
        assert_eq!(
            ledger.downloaded_keys,
            vec!["in/2.wav", "in/3.wav", "in/1.wav", "in/4.wav"]
        );
        assert!(!coordinator.has_next());
        assert_eq!(env.store.get_calls("in/1.wav"), 3);
        assert!(logs_contain("Fetch failed"));
    }

    // Scenario: pushes of one chunk keep failing.
    // Expected Outcome: the cycle still commits, the failure is counted and
    // the failed file is neither recorded nor counted as a chunk.
    #[tokio::test]
    async fn failed_push_is_counted_not_recorded() {
        let env = TestEnv::new(&["in/1.wav"]);
        env.store.fail_put("out/in_1_wav_chunk-0001.wav");

        let mut coordinator = env.coordinator().await;
        let batch = coordinator.next_batch().await.unwrap();
        emit_chunks(&batch, 2).await;
        let report = coordinator.upload().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 1);
        let ledger = env.ledger_on_disk().unwrap();
        assert_eq!(ledger.uploaded_keys, vec!["out/in_1_wav_chunk-0000.wav"]);
        assert_eq!(ledger.total_chunks, 1);
        assert!(env.state_on_disk().unwrap().completed);
        assert_eq!(env.observer.count("end:push:failed"), 1);
    }

    // Scenario: the listing fails on every attempt while nothing is staged.
    // Expected Outcome: a non-fatal listing error; the cursor is untouched and
    // a later cycle succeeds.
    #[tokio::test]
    async fn listing_outage_is_recoverable() {
        let env = TestEnv::new(&["in/1.wav"]);
        env.store.fail_list(2);

        let mut coordinator = env.coordinator().await;
        let err = coordinator.next_batch().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Listing { .. }));
        assert!(!err.is_fatal());
        assert_eq!(env.observer.count("end:fetch:failed"), 1);

        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/1.wav"]);
    }

    // Counting walks the whole listing and is refused mid-cycle.
    #[tokio::test]
    async fn total_expected_is_counted_between_cycles() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav", "in/x.txt", "out/1.wav"])
            .with(|s| s.page_size = 1);
        let mut coordinator = env.coordinator().await;

        assert_eq!(coordinator.refresh_total_expected().await.unwrap(), 2);
        assert_eq!(env.ledger_on_disk().unwrap().total_expected, 2);

        coordinator.next_batch().await.unwrap();
        assert!(matches!(
            coordinator.refresh_total_expected().await,
            Err(CoordinatorError::CycleInFlight)
        ));
        coordinator.upload().await.unwrap();

        let report = coordinator.report();
        assert_eq!(report.total_expected, 2);
        assert_eq!(report.percent_downloaded, Some(100.0));
    }

    // Test Settings: page_size=2, batch_size=5, stop_on_short_page.
    // Scenario: the first page holds a single key but still carries a token.
    // Expected Outcome:
    // - the first cycle ends after that page with the token committed and the
    //   listing not exhausted;
    // - the next cycle resumes from the token and stages the rest.
    #[tokio::test]
    async fn short_page_with_token_resumes_next_cycle() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav", "in/3.wav"]).with(|s| {
            s.page_size = 2;
            s.batch_size = 5;
            s.stop_on_short_page = true;
        });
        env.store.limit_next_pages(&[1]);

        let mut coordinator = env.coordinator().await;
        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/1.wav"]);
        coordinator.upload().await.unwrap();

        let state = env.state_on_disk().unwrap();
        assert_eq!(state.token.as_deref(), Some("after:in/1.wav"));
        assert!(!state.completed);
        assert!(coordinator.has_next());

        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/2.wav", "in/3.wav"]);
        coordinator.upload().await.unwrap();
        assert!(!coordinator.has_next());
    }

    // Scenario: in/1.wav is listed but deleted before it can be fetched.
    // Expected Outcome: it is skipped rather than queued, fetched only once, and
    // the rest of the batch is staged.
    #[traced_test]
    #[tokio::test]
    async fn vanished_object_is_skipped_not_queued() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav"]);
        env.store.vanish("in/1.wav");

        let mut coordinator = env.coordinator().await;
        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/2.wav"]);
        coordinator.upload().await.unwrap();

        let ledger = env.ledger_on_disk().unwrap();
        assert!(ledger.failed_keys.is_empty());
        assert_eq!(ledger.skipped_keys, vec!["in/1.wav"]);
        assert_eq!(env.store.get_calls("in/1.wav"), 1);
        assert!(!coordinator.has_next());
        assert!(!coordinator.has_queued_work());
        assert!(logs_contain("vanished after listing"));
    }

    // Test Settings: max_key_attempts=2, two attempts per store call.
    // Scenario: in/1.wav never fetches.
    // Expected Outcome: it is retried once in the next cycle, then skipped for
    // good, and later cycles no longer touch it.
    #[tokio::test]
    async fn failing_fetch_gives_up_after_max_attempts() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav"]).with(|s| s.max_key_attempts = 2);
        env.store.fail_get("in/1.wav", 100);

        let mut coordinator = env.coordinator().await;
        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/2.wav"]);
        coordinator.upload().await.unwrap();
        assert!(!coordinator.has_next());
        assert!(coordinator.has_queued_work());

        let batch = coordinator.next_batch().await.unwrap();
        assert!(batch.is_empty());
        coordinator.upload().await.unwrap();

        let ledger = env.ledger_on_disk().unwrap();
        assert!(ledger.failed_keys.is_empty());
        assert!(ledger.attempts.is_empty());
        assert_eq!(ledger.skipped_keys, vec!["in/1.wav"]);
        assert!(!coordinator.has_queued_work());
        assert_eq!(env.store.get_calls("in/1.wav"), 4);
    }

    // Test Settings: page_size=2, batch_size=3.
    // Scenario: every page after the first repeats the last key of the
    // previous page.
    // Expected Outcome: each key is fetched once and recorded once, in listing
    // order.
    #[tokio::test]
    async fn overlapping_pages_fetch_each_key_once() {
        let keys: Vec<String> = (1..=5).map(|i| format!("in/{i}.wav")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let env = TestEnv::new(&refs).with(|s| {
            s.page_size = 2;
            s.batch_size = 3;
        });
        env.store.overlap_pages(1);

        let mut coordinator = env.coordinator().await;
        let mut seen = Vec::new();
        while coordinator.has_next() {
            let batch = coordinator.next_batch().await.unwrap();
            seen.extend(staged_keys(&batch));
            coordinator.upload().await.unwrap();
        }

        assert_eq!(seen, keys);
        assert_eq!(env.ledger_on_disk().unwrap().downloaded_keys, keys);
        for key in &keys {
            assert_eq!(env.store.get_calls(key), 1, "{key} fetched more than once");
        }
    }

    // Scenario: the ledger cannot be flushed during upload().
    // Expected Outcome: upload() fails, the push step is still reported as
    // failed, and the cursor stays pending.
    #[tokio::test]
    async fn failed_ledger_flush_ends_push_step() {
        let env = TestEnv::new(&["in/1.wav"]);
        let mut coordinator = env.coordinator().await;
        coordinator.next_batch().await.unwrap();

        let blocker = env.settings.dirs.metadata.join("progress.json");
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        assert!(coordinator.upload().await.is_err());
        assert_eq!(env.observer.count("start:push"), 1);
        assert_eq!(env.observer.count("end:push:failed"), 1);
        assert!(env.state_on_disk().unwrap().pending.is_some());
    }

    // Test Settings: batch_size=2, max_key_attempts=2.
    // Scenario: processing of the first batch {in/1, in/2} fails; in/1 then
    // processes fine on its own while in/2 fails again.
    // Expected Outcome:
    // - abandoning commits the cursor without counting a batch;
    // - queued keys are restaged one per cycle without listing;
    // - in/2 is skipped at the cap and in/3 is still published.
    #[traced_test]
    #[tokio::test]
    async fn abandoned_batch_is_reprocessed_key_by_key() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav", "in/3.wav"])
            .with(|s| s.max_key_attempts = 2);
        let mut coordinator = env.coordinator().await;

        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/1.wav", "in/2.wav"]);
        let report = coordinator.abandon("step crashed").await.unwrap();
        assert_eq!((report.requeued, report.skipped), (2, 0));

        let ledger = env.ledger_on_disk().unwrap();
        assert_eq!(ledger.reprocess_keys, vec!["in/1.wav", "in/2.wav"]);
        assert_eq!(ledger.batch_count, 0);
        assert!(env.state_on_disk().unwrap().pending.is_none());

        let lists = env.store.list_calls();
        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/1.wav"]);
        emit_chunks(&batch, 1).await;
        coordinator.upload().await.unwrap();

        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/2.wav"]);
        let report = coordinator.abandon("step crashed").await.unwrap();
        assert_eq!((report.requeued, report.skipped), (0, 1));
        assert_eq!(env.store.list_calls(), lists);

        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(staged_keys(&batch), vec!["in/3.wav"]);
        emit_chunks(&batch, 1).await;
        coordinator.upload().await.unwrap();

        let ledger = env.ledger_on_disk().unwrap();
        assert!(ledger.reprocess_keys.is_empty());
        assert!(ledger.attempts.is_empty());
        assert_eq!(ledger.skipped_keys, vec!["in/2.wav"]);
        assert_eq!(
            ledger.uploaded_keys,
            vec!["out/in_1_wav_chunk-0000.wav", "out/in_3_wav_chunk-0000.wav"]
        );
        assert!(!coordinator.has_next());
        assert!(!coordinator.has_queued_work());
        assert!(logs_contain("Abandoned batch"));
    }
}
