use super::*;
use crate::mock::{self, Counters, MockEngine, ScaleScript};

fn all_frames(count: usize) -> Vec<CompressedUnit> {
    mock::units(count, |_| mock::PRODUCE)
}

fn run(
    engine: &MockEngine,
    job: &PipelineJobSpec,
    units: &[CompressedUnit],
) -> Result<RunReport, PipelineError> {
    Strategy::for_job(job)?.run(engine, job, units)
}

#[test]
fn test_strategy_selected_from_output_count() -> anyhow::Result<()> {
    assert_eq!(Strategy::for_job(&mock::job(&[]))?, Strategy::DecodeOnly);
    assert_eq!(Strategy::for_job(&mock::job(&[mock::CODEC_OK]))?.output_count(), 1);
    assert!(matches!(
        Strategy::for_job(&mock::job(&[mock::CODEC_OK, mock::CODEC_OK]))?,
        Strategy::DualOutput(_)
    ));
    let err = Strategy::for_job(&mock::job(&[mock::CODEC_OK; 3])).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidJob(_)));
    Ok(())
}

#[test]
fn test_decode_only_thousand_units() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let report = run(&engine, &mock::job(&[]), &all_frames(1000))?;

    assert_eq!(report.progress_reports, 4);
    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(report.stop, StopReason::InputExhausted);
    assert_eq!(report.decoded_frames, 1000);
    assert!(report.speed > 0.0);
    assert!(report.encoded_packets.is_empty());
    assert_eq!(report.pool_submissions, 0);
    Ok(())
}

#[test]
fn test_needs_more_skips_without_stats() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let units = mock::units(1000, |i| {
        if i % 4 == 3 {
            mock::NEEDS_MORE
        } else {
            mock::PRODUCE
        }
    });
    let report = run(&engine, &mock::job(&[]), &units)?;

    assert_eq!(report.decoded_frames, 750);
    // units 500 and 1000 asked for more input, so only 250 and 750 log
    assert_eq!(report.progress_reports, 2);
    assert_eq!(report.stop, StopReason::InputExhausted);
    Ok(())
}

#[test]
fn test_end_of_stream_stops_cleanly() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let units = mock::units(100, |i| if i == 10 { mock::END } else { mock::PRODUCE });
    let report = run(&engine, &mock::job(&[]), &units)?;

    assert_eq!(report.decoded_frames, 10);
    assert_eq!(
        report.stop,
        StopReason::EndOfStream {
            stage: Stage::Decode
        }
    );
    assert_eq!(report.state, PipelineState::Done);
    // speed counts every pre-read unit
    assert_eq!(report.units, 100);
    Ok(())
}

#[test]
fn test_decoder_runtime_failure_ends_walk() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let units = mock::units(20, |i| if i == 5 { mock::FAIL } else { mock::PRODUCE });
    let report = run(&engine, &mock::job(&[mock::CODEC_OK]), &units)?;

    assert_eq!(report.decoded_frames, 5);
    assert!(matches!(
        report.stop,
        StopReason::StageFailed {
            stage: Stage::Decode,
            branch: None,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_decoder_setup_failure_status() {
    let engine = MockEngine::failing_decoder();
    let err = run(&engine, &mock::job(&[]), &all_frames(10)).unwrap_err();
    assert!(matches!(err, PipelineError::DecoderSetup(_)));
    assert_eq!(err.status(), -1);
}

#[test]
fn test_empty_input_rejected() {
    let engine = MockEngine::new();
    let err = run(&engine, &mock::job(&[]), &[]).unwrap_err();
    assert!(matches!(err, PipelineError::NoInput));
}

#[test]
fn test_single_output_one_scale_and_encode_per_frame() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let report = run(&engine, &mock::job(&[mock::CODEC_OK]), &all_frames(100))?;
    let c = &engine.counters;

    assert_eq!(Counters::get(&c.scalers), 1);
    assert_eq!(Counters::get(&c.encoders), 1);
    assert_eq!(Counters::get(&c.encoder_opens), 1);
    assert_eq!(Counters::get(&c.scale_calls), 100);
    assert_eq!(Counters::get(&c.encode_submits), 100);
    assert_eq!(report.encoded_packets, vec![100]);
    assert_eq!(report.pool_submissions, 0);
    // decoder, scaler and encoder each torn down once
    assert_eq!(Counters::get(&c.teardowns), 3);
    Ok(())
}

#[test]
fn test_single_output_encoder_needs_more() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let report = run(
        &engine,
        &mock::job(&[mock::CODEC_EVERY_OTHER]),
        &all_frames(100),
    )?;

    assert_eq!(report.decoded_frames, 100);
    assert_eq!(report.encoded_packets, vec![50]);
    assert_eq!(Counters::get(&engine.counters.encode_submits), 100);
    assert_eq!(report.stop, StopReason::InputExhausted);
    Ok(())
}

#[test]
fn test_single_output_setup_failures() {
    let engine = MockEngine::new();
    let err = run(
        &engine,
        &mock::job(&[mock::CODEC_SETUP_FAILS]),
        &all_frames(10),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::EncoderSetup { output: 0, .. }));
    assert_eq!(err.status(), -3);

    let err = run(&engine, &mock::job(&[mock::CODEC_MISSING]), &all_frames(10)).unwrap_err();
    assert_eq!(err.status(), -3);
}

#[test]
fn test_sessions_open_on_first_decoded_frame() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let units = mock::units(10, |_| mock::NEEDS_MORE);
    let report = run(&engine, &mock::job(&[mock::CODEC_OK]), &units)?;

    assert_eq!(report.decoded_frames, 0);
    assert_eq!(Counters::get(&engine.counters.scalers), 0);
    assert_eq!(Counters::get(&engine.counters.encoders), 0);
    Ok(())
}

#[test]
fn test_dual_output_two_submissions_per_frame() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let report = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_OK]),
        &all_frames(100),
    )?;

    assert_eq!(report.pool_submissions, 200);
    assert_eq!(report.fanout_completed, 100);
    assert_eq!(report.encoded_packets, vec![100, 100]);
    assert_eq!(Counters::get(&engine.counters.scalers), 2);
    assert_eq!(Counters::get(&engine.counters.encoders), 2);
    assert_eq!(Counters::get(&engine.counters.scale_calls), 200);
    Ok(())
}

#[test]
fn test_dual_output_stats_need_both_branches() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let report = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_EVERY_OTHER]),
        &all_frames(100),
    )?;

    assert_eq!(report.decoded_frames, 100);
    assert_eq!(report.fanout_completed, 50);
    // branch 0 encoded every frame but its packets only count with branch 1
    assert_eq!(report.encoded_packets, vec![50, 50]);
    for packets in &report.encoded_packets {
        assert!(*packets <= report.fanout_completed);
    }
    assert_eq!(Counters::get(&engine.counters.encode_submits), 200);
    assert_eq!(report.pool_submissions, 200);
    Ok(())
}

#[test]
fn test_dual_output_branch_setup_failure_is_distinct() {
    let engine = MockEngine::new();
    let err = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_SETUP_FAILS]),
        &all_frames(10),
    )
    .unwrap_err();

    assert!(matches!(err, PipelineError::Branch { branch: 1, .. }));
    assert_eq!(err.status(), -4);
}

#[test]
fn test_dual_output_runtime_failure_names_branch() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let report = run(
        &engine,
        &mock::job(&[mock::CODEC_RUNTIME_FAILS, mock::CODEC_OK]),
        &all_frames(10),
    )?;

    assert_eq!(report.fanout_completed, 2);
    assert_eq!(report.decoded_frames, 3);
    assert!(matches!(
        report.stop,
        StopReason::StageFailed {
            stage: Stage::Encode,
            branch: Some(0),
            ..
        }
    ));
    // the sibling's packet for the failed frame is discarded
    assert_eq!(report.encoded_packets, vec![2, 2]);
    Ok(())
}

#[test]
fn test_single_output_scaler_needs_more() -> anyhow::Result<()> {
    let engine = MockEngine::with_scalers(&[ScaleScript::EveryOther]);
    let report = run(&engine, &mock::job(&[mock::CODEC_OK]), &all_frames(100))?;

    assert_eq!(report.decoded_frames, 100);
    assert_eq!(report.encoded_packets, vec![50]);
    assert_eq!(Counters::get(&engine.counters.scale_calls), 100);
    assert_eq!(Counters::get(&engine.counters.encode_submits), 50);
    assert_eq!(report.stop, StopReason::InputExhausted);
    Ok(())
}

#[test]
fn test_single_output_scaler_end_of_stream() -> anyhow::Result<()> {
    let engine = MockEngine::with_scalers(&[ScaleScript::EndAt(5)]);
    let report = run(&engine, &mock::job(&[mock::CODEC_OK]), &all_frames(20))?;

    assert_eq!(report.decoded_frames, 5);
    assert_eq!(report.encoded_packets, vec![4]);
    assert_eq!(
        report.stop,
        StopReason::EndOfStream {
            stage: Stage::Scale
        }
    );
    assert_eq!(report.state, PipelineState::Done);
    Ok(())
}

#[test]
fn test_single_output_scaler_runtime_failure() -> anyhow::Result<()> {
    let engine = MockEngine::with_scalers(&[ScaleScript::FailAt(3)]);
    let report = run(&engine, &mock::job(&[mock::CODEC_OK]), &all_frames(20))?;

    assert_eq!(report.decoded_frames, 3);
    assert_eq!(report.encoded_packets, vec![2]);
    assert!(matches!(
        report.stop,
        StopReason::StageFailed {
            stage: Stage::Scale,
            branch: None,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_single_output_scaler_setup_failure() {
    let engine = MockEngine::with_scalers(&[ScaleScript::SetupFails]);
    let err = run(&engine, &mock::job(&[mock::CODEC_OK]), &all_frames(10)).unwrap_err();
    assert!(matches!(err, PipelineError::ScalerSetup { output: 0, .. }));
    assert_eq!(err.status(), -2);
}

#[test]
fn test_dual_output_missing_encoder_is_branch_failure() {
    let engine = MockEngine::new();
    let err = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_MISSING]),
        &all_frames(10),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Branch { branch: 1, .. }));
    assert_eq!(err.status(), -4);

    let err = run(
        &engine,
        &mock::job(&[mock::CODEC_MISSING, mock::CODEC_OK]),
        &all_frames(10),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Branch { branch: 0, .. }));
    assert_eq!(err.status(), -4);
}

#[test]
fn test_dual_output_scaler_setup_is_branch_failure() {
    let engine = MockEngine::with_scalers(&[ScaleScript::Produce, ScaleScript::SetupFails]);
    let err = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_OK]),
        &all_frames(10),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Branch { branch: 1, .. }));
    assert_eq!(err.status(), -4);
}

#[test]
fn test_dual_output_branch_end_of_stream() -> anyhow::Result<()> {
    let engine = MockEngine::with_scalers(&[ScaleScript::Produce, ScaleScript::EndAt(4)]);
    let report = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_OK]),
        &all_frames(10),
    )?;

    assert_eq!(report.decoded_frames, 4);
    assert_eq!(report.fanout_completed, 3);
    assert_eq!(report.encoded_packets, vec![3, 3]);
    assert_eq!(
        report.stop,
        StopReason::EndOfStream {
            stage: Stage::Scale
        }
    );
    Ok(())
}

#[test]
fn test_dual_output_end_of_stream_outranks_needs_more() -> anyhow::Result<()> {
    let engine = MockEngine::with_scalers(&[ScaleScript::EveryOther, ScaleScript::EndAt(1)]);
    let report = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_OK]),
        &all_frames(10),
    )?;

    assert_eq!(report.decoded_frames, 1);
    assert_eq!(report.fanout_completed, 0);
    assert_eq!(
        report.stop,
        StopReason::EndOfStream {
            stage: Stage::Scale
        }
    );
    Ok(())
}

#[test]
fn test_dual_output_failure_outranks_end_of_stream() -> anyhow::Result<()> {
    let engine = MockEngine::with_scalers(&[ScaleScript::EndAt(1), ScaleScript::FailAt(1)]);
    let report = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_OK]),
        &all_frames(10),
    )?;

    assert!(matches!(
        report.stop,
        StopReason::StageFailed {
            stage: Stage::Scale,
            branch: Some(1),
            ..
        }
    ));
    assert_eq!(report.encoded_packets, vec![0, 0]);
    Ok(())
}

#[test]
fn test_dual_output_setup_failure_outranks_runtime_failure() {
    let engine = MockEngine::with_scalers(&[ScaleScript::FailAt(1), ScaleScript::Produce]);
    let err = run(
        &engine,
        &mock::job(&[mock::CODEC_OK, mock::CODEC_SETUP_FAILS]),
        &all_frames(10),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Branch { branch: 1, .. }));
}

fn timings() -> BranchTimings {
    BranchTimings {
        scale_ms: 1.0,
        encode_ms: 2.0,
    }
}

#[test]
fn test_settle_orders_by_severity() {
    assert!(matches!(
        settle((BranchOutcome::Encoded(timings()), BranchOutcome::Encoded(timings()))),
        Settled::Both(_)
    ));
    assert!(matches!(
        settle((BranchOutcome::Encoded(timings()), BranchOutcome::NeedsMore)),
        Settled::Abandoned(1, BranchOutcome::NeedsMore)
    ));
    assert!(matches!(
        settle((
            BranchOutcome::NeedsMore,
            BranchOutcome::EndOfStream(Stage::Encode)
        )),
        Settled::Abandoned(1, BranchOutcome::EndOfStream(Stage::Encode))
    ));
    assert!(matches!(
        settle((
            BranchOutcome::Failed(Stage::Scale, anyhow::anyhow!("scale")),
            BranchOutcome::EndOfStream(Stage::Scale)
        )),
        Settled::Abandoned(0, BranchOutcome::Failed(Stage::Scale, _))
    ));
    assert!(matches!(
        settle((
            BranchOutcome::Failed(Stage::Encode, anyhow::anyhow!("encode")),
            BranchOutcome::SetupFailed(anyhow::anyhow!("open"))
        )),
        Settled::Abandoned(1, BranchOutcome::SetupFailed(_))
    ));
    // ties go to the first branch
    assert!(matches!(
        settle((BranchOutcome::NeedsMore, BranchOutcome::NeedsMore)),
        Settled::Abandoned(0, BranchOutcome::NeedsMore)
    ));
}

#[test]
fn test_speed_factor() {
    assert_eq!(speed_factor(100, 40.0, 1000.0), 4.0);
    assert!(speed_factor(1, 40.0, 0.0).is_finite());
}
