#[cfg(test)]
mod tests {
    use crate::utils::{TestEnv, wav_bytes};
    use engine_core::observer::StepObserver;
    use engine_processing::manifest::{TEXT_FILE, TIMING_FILE, WAV_SCP_FILE};
    use engine_runtime::{
        error::RunError,
        execution::{
            executor::{PipelineExecutor, RunOptions},
            factory,
        },
    };
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    /// Copies each staged file to `<clean name>_chunk-0000.wav`, the way an
    /// external transcription script names its output.
    const COPY_SCRIPT: &str = r#"for f in {inbound}/*; do
        b=$(basename "$f" .wav | tr 'A-Z' 'a-z' | tr -c 'a-z0-9\n' '_')
        cp "$f" "{outbound}/${b}_wav_chunk-0000.wav"
    done"#;

    async fn executor(env: &TestEnv, options: RunOptions, cancel: CancellationToken) -> PipelineExecutor {
        let step = factory::create_step(&env.settings).unwrap();
        let observer: Arc<dyn StepObserver> = env.observer.clone();
        PipelineExecutor::new(
            env.coordinator().await,
            step,
            observer,
            env.metrics.clone(),
            options,
            cancel,
        )
    }

    // Test Settings: external step command, batch_size=2.
    // Scenario: 3 admissible objects plus one text file.
    // Expected Outcome:
    // - two cycles run and the namespace ends exhausted;
    // - every chunk lands under the output prefix;
    // - the ledger and cursor files are published under the metadata prefix.
    #[traced_test]
    #[tokio::test]
    async fn command_step_end_to_end() {
        let env = TestEnv::new(&["in/1.wav", "in/2.wav", "in/3.wav", "in/notes.txt"]).with(|s| {
            s.processing.command = Some(vec!["sh".into(), "-c".into(), COPY_SCRIPT.into()]);
        });

        let summary = executor(&env, RunOptions::default(), CancellationToken::new())
            .await
            .execute()
            .await
            .unwrap();

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.uploaded, 3);
        assert!(summary.exhausted);
        assert_eq!(
            env.store.keys_under("out/"),
            vec![
                "out/in_1_wav_chunk-0000.wav",
                "out/in_2_wav_chunk-0000.wav",
                "out/in_3_wav_chunk-0000.wav",
            ]
        );
        assert_eq!(
            env.store.object("out/in_2_wav_chunk-0000.wav").unwrap(),
            b"in/2.wav"
        );
        assert_eq!(
            env.store.keys_under("metadata/"),
            vec!["metadata/batcher_state.json", "metadata/progress.json"]
        );
        assert_eq!(env.observer.count("end:sh:succeeded"), 2);
        assert!(logs_contain("Step command finished"));
    }

    // Test Settings: in-process splitter fed by an external transcriber that
    // prints a fixed JSON transcript.
    // Expected Outcome: one normalised chunk per object, Kaldi manifests and
    // the CSV published next to the ledger.
    #[traced_test]
    #[tokio::test]
    async fn splitter_end_to_end() {
        let transcript = r#"echo '{"language": "pt", "segments": [
            {"start": 0.0, "end": 0.5, "text": "capítulo  1"},
            {"start": 0.5, "end": 0.52, "text": "curto"}
        ]}'"#;
        let env = TestEnv::new(&[]).with(|s| {
            s.processing.asr_command = Some(vec!["sh".into(), "-c".into(), transcript.into()]);
        });
        env.store.insert("in/1.wav", &wav_bytes(1));
        env.store.insert("in/2.wav", &wav_bytes(1));

        let summary = executor(&env, RunOptions::default(), CancellationToken::new())
            .await
            .execute()
            .await
            .unwrap();

        assert_eq!(summary.chunks, 2);
        assert_eq!(
            env.store.keys_under("out/"),
            vec!["out/in_1_wav_chunk-0000.wav", "out/in_2_wav_chunk-0000.wav"]
        );
        assert_eq!(
            env.store.keys_under("metadata/"),
            vec![
                "metadata/batcher_state.json",
                "metadata/metadata.csv",
                "metadata/progress.json",
                "metadata/text",
                "metadata/timing",
                "metadata/wav.scp",
            ]
        );

        let text = String::from_utf8(env.store.object("metadata/text").unwrap()).unwrap();
        assert_eq!(
            text,
            "in_1_wav_chunk-0000 capítulo um\nin_2_wav_chunk-0000 capítulo um\n"
        );
        let metadata = &env.settings.dirs.metadata;
        assert!(metadata.join(WAV_SCP_FILE).exists());
        assert!(
            std::fs::read_to_string(metadata.join(TIMING_FILE))
                .unwrap()
                .starts_with("in_1_wav_chunk-0000 0.000 0.500")
        );
        assert!(metadata.join(TEXT_FILE).exists());
    }

    // Test Settings: batch_size=1, three attempts per key.
    // Scenario: the step command crashes whenever in/1.wav is staged.
    // Expected Outcome:
    // - the run finishes instead of aborting;
    // - in/1.wav is retried alone until it is skipped;
    // - in/2.wav and in/3.wav are still published.
    #[traced_test]
    #[tokio::test]
    async fn poisoned_key_does_not_block_later_keys() {
        let script = format!("[ -e {{inbound}}/in_1.wav ] && exit 3\n{COPY_SCRIPT}");
        let env = TestEnv::new(&["in/1.wav", "in/2.wav", "in/3.wav"]).with(|s| {
            s.batch_size = 1;
            s.processing.command = Some(vec!["sh".into(), "-c".into(), script]);
        });

        let summary = executor(&env, RunOptions::default(), CancellationToken::new())
            .await
            .execute()
            .await
            .unwrap();

        assert!(summary.exhausted);
        assert_eq!(summary.cycles, 5);
        assert_eq!(summary.failed_cycles, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.uploaded, 2);
        assert_eq!(
            env.store.keys_under("out/"),
            vec!["out/in_2_wav_chunk-0000.wav", "out/in_3_wav_chunk-0000.wav"]
        );

        let ledger = env.ledger_on_disk().unwrap();
        assert_eq!(ledger.skipped_keys, vec!["in/1.wav"]);
        assert!(ledger.reprocess_keys.is_empty());
        assert_eq!(ledger.batch_count, 2);
        assert_eq!(env.store.get_calls("in/1.wav"), 3);
        assert_eq!(env.observer.count("end:sh:failed"), 3);
        assert!(logs_contain("Out of attempts"));
    }

    // Scenario: the store cannot be listed at all.
    // Expected Outcome: the run aborts after three listing outages in a row and
    // nothing is committed.
    #[tokio::test]
    async fn listing_outages_abort_the_run() {
        let env = TestEnv::new(&["in/1.wav"]).with(|s| {
            s.processing.command = Some(vec!["sh".into(), "-c".into(), COPY_SCRIPT.into()]);
        });
        env.store.fail_list(100);

        let err = executor(&env, RunOptions::default(), CancellationToken::new())
            .await
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::TooManyFailures { consecutive: 3, .. }));
        assert!(env.ledger_on_disk().is_none());
        assert_eq!(env.store.get_calls("in/1.wav"), 0);
    }

    // Scenario: shutdown is requested before the loop starts.
    // Expected Outcome: no cycle runs, metadata is not published and the
    // summary is marked interrupted.
    #[tokio::test]
    async fn cancellation_stops_between_cycles() {
        let env = TestEnv::new(&["in/1.wav"]).with(|s| {
            s.processing.command = Some(vec!["true".into()]);
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = executor(&env, RunOptions::default(), cancel)
            .await
            .execute()
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.cycles, 0);
        assert!(env.store.keys_under("metadata/").is_empty());
        assert_eq!(env.store.get_calls("in/1.wav"), 0);
    }
}
