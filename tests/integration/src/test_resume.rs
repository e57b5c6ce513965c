//! Session resumption scenarios.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use coalesce_core::checksums::hex_sha1;
    use coalesce_core::fingerprint::FINGERPRINT_METADATA_KEY;
    use coalesce_core::planner::{PartPlan, build_plan};
    use coalesce_core::sim::StoreSimulator;
    use coalesce_core::source::FileInfo;
    use coalesce_core::store::RemoteStore;
    use coalesce_core::timeline::{OverlapPolicy, SegmentTimeline};
    use coalesce_core::{Synthesizer, engine::SynthesisRequest};

    use crate::{local_intent, patterned, range, remote_intent, small_part_sim, write_file};

    /// Compute the plan the engine will derive for `intents` against the
    /// simulator's sizing, so tests can pre-populate matching sessions.
    fn plan_for(
        sim: &StoreSimulator,
        intents: &[coalesce_core::WriteIntent],
    ) -> PartPlan {
        let timeline =
            SegmentTimeline::resolve(intents, None, OverlapPolicy::default()).expect("resolve");
        build_plan(&timeline, &sim.part_sizing()).expect("plan")
    }

    #[tokio::test]
    async fn test_should_resume_session_and_transfer_only_missing_parts() {
        // A prior run uploaded parts 1-3 of an all-local five-part plan.
        // The new call must verify them against the local file and only
        // transfer parts 4 and 5.
        let sim = small_part_sim();
        let data = patterned(40_000, 11);
        let file = write_file(&data);
        let intents = vec![local_intent(&file, range(0, 40_000))];
        let plan = plan_for(&sim, &intents);
        assert_eq!(plan.parts.len(), 5);

        let session = sim
            .start_large_object("resume.bin", "application/octet-stream", &FileInfo::new(), None)
            .await
            .expect("start");
        for part in &plan.parts[..3] {
            let slice = &data
                [part.destination_range.start() as usize..part.destination_range.end() as usize];
            let payload = Bytes::copy_from_slice(slice);
            let sha1 = hex_sha1(&payload);
            sim.upload_part(&session, part.index, payload, &sha1)
                .await
                .expect("seed part");
        }
        let uploads_seeded = sim.call_count("upload_part");
        assert_eq!(uploads_seeded, 3);

        let engine = Synthesizer::new(Arc::clone(&sim));
        let object = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("resume.bin")
                    .build(),
            )
            .await
            .expect("synthesize");

        assert_eq!(sim.call_count("upload_part"), 5, "only parts 4+ transfer");
        assert_eq!(sim.call_count("start_large_object"), 1, "no fresh session");
        assert_eq!(object.length, 40_000);
        let (_, bytes) = sim.object_named("resume.bin").expect("object");
        assert_eq!(bytes.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_should_resume_by_fingerprint_for_plans_with_remote_parts() {
        let sim = small_part_sim();
        let remote_data = patterned(8000, 12);
        let object_id = sim.put_object("seed.bin", Bytes::from(remote_data.clone()));
        let local_data = patterned(9000, 13);
        let file = write_file(&local_data);

        let intents = vec![
            remote_intent(&object_id, range(0, 8000)),
            local_intent(&file, range(8000, 17_000)),
        ];
        let plan = plan_for(&sim, &intents);
        assert!(!plan.is_purely_local());

        // A prior run recorded the fingerprint and copied part 1.
        let mut file_info = FileInfo::new();
        file_info.insert(
            FINGERPRINT_METADATA_KEY.to_owned(),
            plan.fingerprint.clone(),
        );
        let session = sim
            .start_large_object("mixed.bin", "application/octet-stream", &file_info, None)
            .await
            .expect("start");
        sim.copy_part(&session, 1, &object_id, range(0, 8000), None)
            .await
            .expect("seed copy part");

        let engine = Synthesizer::new(Arc::clone(&sim));
        engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("mixed.bin")
                    .build(),
            )
            .await
            .expect("synthesize");

        assert_eq!(sim.call_count("copy_part"), 1, "part 1 is not re-copied");
        assert_eq!(sim.call_count("start_large_object"), 1, "session reused");

        let mut expected = remote_data;
        expected.extend_from_slice(&local_data);
        let (_, bytes) = sim.object_named("mixed.bin").expect("object");
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_should_ignore_session_with_foreign_fingerprint() {
        let sim = small_part_sim();
        let remote_data = patterned(8000, 14);
        let object_id = sim.put_object("seed.bin", Bytes::from(remote_data));
        let file = write_file(&patterned(9000, 15));

        let intents = vec![
            remote_intent(&object_id, range(0, 8000)),
            local_intent(&file, range(8000, 17_000)),
        ];

        // An unfinished session exists for the same name but was planned
        // from different inputs.
        let mut foreign_info = FileInfo::new();
        foreign_info.insert(
            FINGERPRINT_METADATA_KEY.to_owned(),
            "0".repeat(64),
        );
        let foreign = sim
            .start_large_object("mixed.bin", "application/octet-stream", &foreign_info, None)
            .await
            .expect("start");
        sim.copy_part(&foreign, 1, &object_id, range(0, 8000), None)
            .await
            .expect("seed");

        let engine = Synthesizer::new(Arc::clone(&sim));
        engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("mixed.bin")
                    .build(),
            )
            .await
            .expect("synthesize");

        assert_eq!(
            sim.call_count("start_large_object"),
            2,
            "foreign session must not be resumed"
        );
        assert!(sim.session_exists(&foreign), "foreign session left alone");
    }

    #[tokio::test]
    async fn test_should_leave_session_resumable_when_finish_fails() {
        let sim = small_part_sim();
        let data = patterned(40_000, 16);
        let file = write_file(&data);
        let intents = vec![local_intent(&file, range(0, 40_000))];

        sim.inject_transient("finish_large_object", 1);
        let engine = Synthesizer::new(Arc::clone(&sim));

        let err = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents.clone())
                    .destination_name("finish-fail.bin")
                    .build(),
            )
            .await
            .expect_err("finish failure must surface");
        assert!(err.is_resumable());
        let uploads_after_first = sim.call_count("upload_part");

        // The second call resumes: every part verifies, nothing is
        // re-transferred, and the finish goes through.
        let object = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("finish-fail.bin")
                    .build(),
            )
            .await
            .expect("resumed synthesize");

        assert_eq!(sim.call_count("upload_part"), uploads_after_first);
        assert_eq!(object.length, 40_000);
        let (_, bytes) = sim.object_named("finish-fail.bin").expect("object");
        assert_eq!(bytes.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_should_honor_manual_resume_with_explicit_session_id() {
        let sim = small_part_sim();
        let data = patterned(40_000, 17);
        let file = write_file(&data);
        let intents = vec![local_intent(&file, range(0, 40_000))];
        let plan = plan_for(&sim, &intents);

        let session = sim
            .start_large_object("manual.bin", "application/octet-stream", &FileInfo::new(), None)
            .await
            .expect("start");
        let first = &plan.parts[0];
        let head = Bytes::copy_from_slice(
            &data[first.destination_range.start() as usize..first.destination_range.end() as usize],
        );
        let sha1 = hex_sha1(&head);
        sim.upload_part(&session, first.index, head, &sha1)
            .await
            .expect("seed");

        let engine = Synthesizer::new(Arc::clone(&sim));
        engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("manual.bin")
                    .explicit_session_id(session.clone())
                    .build(),
            )
            .await
            .expect("synthesize");

        // Matching is bypassed entirely under manual resume.
        assert_eq!(sim.call_count("list_unfinished_sessions"), 0);
        assert_eq!(sim.call_count("start_large_object"), 1);
        let (_, bytes) = sim.object_named("manual.bin").expect("object");
        assert_eq!(bytes.as_ref(), data.as_slice());
    }
}
