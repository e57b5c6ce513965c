//! Integrity verification and cancellation scenarios.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use coalesce_core::executor::CancelHandle;
    use coalesce_core::timeline::OverlapPolicy;
    use coalesce_core::{Synthesizer, SynthesisError, engine::SynthesisRequest};

    use crate::{local_intent, patterned, range, remote_intent, small_part_sim, write_file};

    #[tokio::test]
    async fn test_should_abort_without_finish_when_hybrid_download_is_corrupt() {
        // A short remote head must be downloaded and re-uploaded; the
        // simulator corrupts the download while reporting the honest
        // checksum. The synthesis must abort before any finish call.
        let sim = small_part_sim();
        let head = sim.put_object("head.bin", Bytes::from(patterned(1000, 21)));
        sim.corrupt_downloads_of(&head);
        let file = write_file(&patterned(9000, 22));

        let intents = vec![
            remote_intent(&head, range(0, 1000)),
            local_intent(&file, range(1000, 10_000)),
        ];

        let engine = Synthesizer::new(Arc::clone(&sim));
        let err = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("corrupt.bin")
                    .build(),
            )
            .await
            .expect_err("corrupt source must abort the synthesis");

        assert!(matches!(err, SynthesisError::SourceIntegrity { .. }));
        assert!(!err.is_resumable());
        assert_eq!(sim.call_count("finish_large_object"), 0);
        assert!(sim.object_named("corrupt.bin").is_none());
    }

    #[tokio::test]
    async fn test_should_abort_when_local_bytes_disagree_with_remote_core() {
        // Under VerifyAgainstLocal a local intent re-states part of a
        // remote object with *different* bytes. The downloaded core
        // disagrees with the local payload, which is exactly the
        // corruption the policy exists to catch.
        let sim = small_part_sim();
        let whole = patterned(20_000, 23);
        let object_id = sim.put_object("whole.bin", Bytes::from(whole));
        let divergent = write_file(&patterned(4000, 99));

        let intents = vec![
            remote_intent(&object_id, range(0, 20_000)),
            local_intent(&divergent, range(8000, 12_000)),
        ];

        let engine = Synthesizer::new(Arc::clone(&sim));
        let err = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("diverged.bin")
                    .overlap_policy(OverlapPolicy::VerifyAgainstLocal)
                    .build(),
            )
            .await
            .expect_err("divergent local bytes must abort");

        assert!(matches!(err, SynthesisError::SourceIntegrity { .. }));
        assert_eq!(sim.call_count("finish_large_object"), 0);
    }

    #[tokio::test]
    async fn test_should_trust_local_bytes_when_policy_prefers_local() {
        // The same divergence is fine under PreferLocal: no verification
        // download happens and the local bytes win.
        let sim = small_part_sim();
        let whole = patterned(20_000, 24);
        let object_id = sim.put_object("whole.bin", Bytes::from(whole.clone()));
        let replacement = patterned(4000, 98);
        let divergent = write_file(&replacement);

        let intents = vec![
            remote_intent(&object_id, range(0, 20_000)),
            local_intent(&divergent, range(8000, 12_000)),
        ];

        let engine = Synthesizer::new(Arc::clone(&sim));
        let object = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("patched.bin")
                    .overlap_policy(OverlapPolicy::PreferLocal)
                    .build(),
            )
            .await
            .expect("synthesize");

        assert_eq!(object.length, 20_000);
        let mut expected = whole;
        expected[8000..12_000].copy_from_slice(&replacement);
        let (_, bytes) = sim.object_named("patched.bin").expect("object");
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_should_keep_session_after_cancellation() {
        let sim = small_part_sim();
        let data = patterned(40_000, 25);
        let file = write_file(&data);
        let intents = vec![local_intent(&file, range(0, 40_000))];

        let (handle, token) = CancelHandle::new();
        handle.cancel();

        let engine = Synthesizer::new(Arc::clone(&sim));
        let err = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("cancelled.bin")
                    .cancel(token)
                    .build(),
            )
            .await
            .expect_err("cancelled synthesis must not commit");

        assert!(matches!(err, SynthesisError::Cancelled));
        assert!(err.is_resumable());
        assert_eq!(sim.call_count("upload_part"), 0);
        assert_eq!(sim.call_count("finish_large_object"), 0);
        // The freshly started session survives for a later resume.
        assert_eq!(sim.call_count("start_large_object"), 1);
    }
}
