//! Planning and whole-pipeline synthesis scenarios.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use coalesce_core::planner::{PartKind, PartSizing, build_plan};
    use coalesce_core::sim::StoreSimulator;
    use coalesce_core::timeline::{OverlapPolicy, SegmentTimeline};
    use coalesce_core::{Synthesizer, engine::SynthesisRequest};

    use crate::{init_tracing, local_intent, patterned, range, remote_intent, small_part_sim, write_file};

    #[tokio::test]
    async fn test_should_emit_exactly_one_part_for_object_at_minimum_size() {
        // 5 000 000 bytes from one local intent with a 5 000 000 byte
        // minimum: one part, executed as a single whole-object request.
        init_tracing();
        let data = patterned(5_000_000, 1);
        let file = write_file(&data);
        let intents = vec![local_intent(&file, range(0, 5_000_000))];

        let timeline =
            SegmentTimeline::resolve(&intents, None, OverlapPolicy::default()).expect("resolve");
        let plan = build_plan(&timeline, &PartSizing::default()).expect("plan");
        assert_eq!(plan.parts.len(), 1);

        let sim = Arc::new(StoreSimulator::new());
        let engine = Synthesizer::new(Arc::clone(&sim));
        let object = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("exact-minimum.bin")
                    .build(),
            )
            .await
            .expect("synthesize");

        assert_eq!(object.length, 5_000_000);
        assert_eq!(sim.call_count("start_large_object"), 0);
        assert_eq!(sim.call_count("upload_object"), 1);
        let (_, bytes) = sim.object_named("exact-minimum.bin").expect("object");
        assert_eq!(bytes.as_ref(), data.as_slice());
    }

    #[test]
    fn test_should_merge_short_local_run_with_neighboring_remote_bytes() {
        // Destination [0, 4 000 000) from remote, a 1 024 byte local run,
        // then remote up to 123 456 789, with a 5 000 000 byte minimum.
        // The short runs cannot stand alone; they merge with borrowed
        // remote bytes into one hybrid part, and the remainder that is
        // still above the minimum stays a server-side copy.
        init_tracing();
        let file = write_file(&patterned(1024, 2));
        let intents = vec![
            remote_intent("obj-head", range(0, 4_000_000)),
            local_intent(&file, range(4_000_000, 4_001_024)),
            remote_intent("obj-tail", range(4_001_024, 123_456_789)),
        ];

        let timeline =
            SegmentTimeline::resolve(&intents, None, OverlapPolicy::default()).expect("resolve");
        let plan = build_plan(&timeline, &PartSizing::default()).expect("plan");

        assert_eq!(plan.parts.len(), 2);
        assert_eq!(plan.parts[0].kind, PartKind::HybridDownloadReupload);
        assert_eq!(plan.parts[0].destination_range, range(0, 5_000_000));
        assert!(plan.parts[0].payload.iter().any(|s| s.source.is_local()));
        assert_eq!(plan.parts[1].kind, PartKind::RemoteCopy);
        assert!(plan.parts[1].len() >= 5_000_000);
        assert_eq!(plan.parts[1].destination_range.end(), 123_456_789);
    }

    #[tokio::test]
    async fn test_should_let_last_writer_win_for_fully_contested_range() {
        // Two intents, same class and priority, both claiming [0, 100):
        // the second one owns the bytes.
        let sim = small_part_sim();
        let first = sim.put_object("a.bin", Bytes::from(patterned(100, 3)));
        let second_data = patterned(100, 4);
        let second = sim.put_object("b.bin", Bytes::from(second_data.clone()));

        let intents = vec![
            remote_intent(&first, range(0, 100)),
            remote_intent(&second, range(0, 100)),
        ];

        let engine = Synthesizer::new(Arc::clone(&sim));
        let object = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("contested.bin")
                    .build(),
            )
            .await
            .expect("synthesize");

        assert_eq!(object.length, 100);
        let (_, bytes) = sim.object_named("contested.bin").expect("object");
        assert_eq!(bytes.as_ref(), second_data.as_slice());
    }

    #[tokio::test]
    async fn test_should_synthesize_mixed_sources_to_expected_bytes() {
        // Short remote head + local middle + long remote tail, scaled to
        // the simulator's 4 KiB minimum. The finished object must be the
        // exact concatenation regardless of how parts were packed.
        let sim = small_part_sim();
        let head_data = patterned(1000, 5);
        let mid_data = patterned(500, 6);
        let tail_data = patterned(40_000, 7);
        let head = sim.put_object("head.bin", Bytes::from(head_data.clone()));
        let tail = sim.put_object("tail.bin", Bytes::from(tail_data.clone()));
        let mid = write_file(&mid_data);

        let intents = vec![
            remote_intent(&head, range(0, 1000)),
            local_intent(&mid, range(1000, 1500)),
            remote_intent(&tail, range(1500, 41_500)),
        ];

        let engine = Synthesizer::new(Arc::clone(&sim));
        let object = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("mixed.bin")
                    .build(),
            )
            .await
            .expect("synthesize");

        assert_eq!(object.length, 41_500);
        let mut expected = head_data;
        expected.extend_from_slice(&mid_data);
        expected.extend_from_slice(&tail_data);
        let (_, bytes) = sim.object_named("mixed.bin").expect("object");
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_should_verify_contested_core_and_synthesize_under_default_policy() {
        // A remote object covers the whole range; a local file re-states
        // the middle with identical bytes. VerifyAgainstLocal downloads
        // the contested core, the comparison passes, and the result is
        // byte-identical to the remote original.
        let sim = small_part_sim();
        let whole = patterned(20_000, 8);
        let object_id = sim.put_object("whole.bin", Bytes::from(whole.clone()));
        let mid = write_file(&whole[8000..12_000]);

        let intents = vec![
            remote_intent(&object_id, range(0, 20_000)),
            local_intent(&mid, range(8000, 12_000)),
        ];

        let engine = Synthesizer::new(Arc::clone(&sim));
        let object = engine
            .synthesize(
                SynthesisRequest::builder()
                    .intents(intents)
                    .destination_name("verified.bin")
                    .build(),
            )
            .await
            .expect("synthesize");

        assert_eq!(object.length, 20_000);
        let (_, bytes) = sim.object_named("verified.bin").expect("object");
        assert_eq!(bytes.as_ref(), whole.as_slice());
    }
}
