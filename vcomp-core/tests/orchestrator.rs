#![cfg(unix)]

mod support;

use std::time::Duration;

use vcomp_core::composition::{Caption, CaptionPosition, CaptionStyle, PlanError, StyleTable};
use vcomp_core::engine::EncodeError;
use vcomp_core::job::{
    cancellation, CancelSignal, CombineRequest, ComposeRequest, CompositionRequest, FailureKind,
    JobError, JobState, StillImageRequest,
};
use vcomp_core::media::OutputFormat;

use support::{job_id, list, EngineBehaviour, FakeToolchain, Harness, PROBE_SILENT, PROBE_WITH_AUDIO};

#[tokio::test]
async fn native_audio_with_music_is_mixed_and_published() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_WITH_AUDIO, EngineBehaviour::Succeed);
    let orchestrator = harness.orchestrator(&toolchain);

    let report = orchestrator
        .run(
            job_id("aa11bb22"),
            &harness.compose(None, Some("bed.mp3"), Vec::new()),
            CancelSignal::never(),
        )
        .await;

    assert!(report.is_success(), "{:?}", report.error());
    assert_eq!(report.state(), JobState::Cleaned(None));
    let names: Vec<&str> = report
        .lifecycle
        .history()
        .iter()
        .map(|entry| entry.state.name())
        .collect();
    assert_eq!(
        names,
        vec!["created", "acquiring", "probing", "planning", "encoding", "ready", "cleaned"]
    );

    let args = toolchain.engine_args();
    let graph = args
        .iter()
        .skip_while(|arg| *arg != "-filter_complex")
        .nth(1)
        .unwrap();
    assert!(graph.contains("[0:a]aformat="));
    assert!(graph.contains("volume=0.25[bgm]"));
    assert!(graph.contains("amix=inputs=2:duration=shortest"));
    assert!(args.contains(&"-shortest".to_string()));
    assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "copy"));

    let artifact = report.artifact().unwrap();
    assert_eq!(artifact.file_name, "aa11bb22_output.mp4");
    assert_eq!(std::fs::read(&artifact.path).unwrap(), b"encoded-output");
    assert_eq!(artifact.size_bytes, 14);
    assert_eq!(artifact.sha256.len(), 64);
    assert!(list(&harness.work_dir()).is_empty());
}

#[tokio::test]
async fn silent_video_with_narration_maps_narration_directly() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_SILENT, EngineBehaviour::Succeed);
    let report = harness
        .orchestrator(&toolchain)
        .run(
            job_id("cc33dd44"),
            &harness.compose(Some("voice.mp3"), None, Vec::new()),
            CancelSignal::never(),
        )
        .await;

    assert!(report.is_success());
    let args = toolchain.engine_args();
    assert!(!args.contains(&"-filter_complex".to_string()));
    let maps: Vec<&String> = args
        .windows(2)
        .filter(|w| w[0] == "-map")
        .map(|w| &w[1])
        .collect();
    assert_eq!(maps, vec!["0:v", "1:a"]);
    assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
}

#[tokio::test]
async fn failed_video_acquisition_never_reaches_probing() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_WITH_AUDIO, EngineBehaviour::Succeed);
    let request = CompositionRequest::Compose(ComposeRequest {
        video_url: format!("file://{}", harness.fixtures.join("missing.mp4").display()),
        narration_url: Some(harness.url("voice.mp3")),
        music_url: Some(harness.url("bed.mp3")),
        captions: Vec::new(),
        styles: StyleTable::new(),
        format: OutputFormat::Mp4,
    });

    let report = harness
        .orchestrator(&toolchain)
        .run(job_id("ee55ff66"), &request, CancelSignal::never())
        .await;

    assert!(matches!(
        report.error(),
        Some(JobError::Acquisition {
            role: vcomp_core::MediaRole::Video,
            ..
        })
    ));
    assert!(report
        .lifecycle
        .visited(&JobState::Failed(FailureKind::Acquisition)));
    assert!(!report.lifecycle.visited(&JobState::Probing));
    assert_eq!(
        report.state(),
        JobState::Cleaned(Some(FailureKind::Acquisition))
    );
    assert!(toolchain.calls.lock().unwrap().is_empty());
    assert!(list(&harness.work_dir()).is_empty());
    assert!(harness.output_files().is_empty());
    assert!(report.plan.is_none());
}

#[tokio::test]
async fn invalid_caption_timing_fails_before_any_work() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_WITH_AUDIO, EngineBehaviour::Succeed);
    let request = harness.compose(None, None, vec![Caption::new("backwards", 4.0, 2.0)]);

    let report = harness
        .orchestrator(&toolchain)
        .run(job_id("a1b2c3d4"), &request, CancelSignal::never())
        .await;

    assert!(matches!(report.error(), Some(JobError::Plan(_))));
    assert!(report.error().unwrap().is_input_level());
    assert!(!report.lifecycle.visited(&JobState::Acquiring));
    assert!(toolchain.calls.lock().unwrap().is_empty());
    assert!(!harness.work_dir().join("a1b2c3d4").exists());
}

#[tokio::test]
async fn hostile_style_color_is_rejected_before_the_engine() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_WITH_AUDIO, EngineBehaviour::Succeed);
    let styles = StyleTable::new().with_style(
        "loud",
        CaptionStyle {
            color: "white:text=INJECTED".into(),
            ..CaptionStyle::default()
        },
    );
    let request = CompositionRequest::Compose(ComposeRequest {
        video_url: harness.url("clip.mp4"),
        narration_url: None,
        music_url: None,
        captions: vec![Caption::new("hi", 0.0, 1.0).with_style("loud")],
        styles,
        format: OutputFormat::Mp4,
    });

    let report = harness
        .orchestrator(&toolchain)
        .run(job_id("c0c0c0c0"), &request, CancelSignal::never())
        .await;

    assert!(matches!(
        report.error(),
        Some(JobError::Plan(PlanError::InvalidStyleColor { .. }))
    ));
    assert!(report.error().unwrap().is_input_level());
    assert!(toolchain.calls_to("ffmpeg").is_empty());
    assert!(harness.output_files().is_empty());
}

#[tokio::test]
async fn captions_force_reencode_and_reach_the_engine_escaped() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_WITH_AUDIO, EngineBehaviour::Succeed);
    let request = harness.compose(
        None,
        None,
        vec![
            Caption::new("Hello: [test]", 0.0, 2.5),
            Caption::new("second", 2.5, 5.0).with_position(CaptionPosition::Top),
        ],
    );

    let report = harness
        .orchestrator(&toolchain)
        .run(job_id("0f0f0f0f"), &request, CancelSignal::never())
        .await;

    assert!(report.is_success());
    let args = toolchain.engine_args();
    let graph = args
        .iter()
        .skip_while(|arg| *arg != "-filter_complex")
        .nth(1)
        .unwrap();
    assert!(graph.starts_with("[0:v]drawtext="));
    assert!(graph.contains(r"text=Hello\\: \[test\]"));
    assert!(graph.contains("enable='gte(t,0)*lt(t,2.5)'"));
    assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "libx264"));
    assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[vout]"));
    // Native audio untouched by any filter keeps the copy path.
    assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "copy"));
}

#[tokio::test]
async fn engine_failure_keeps_diagnostic_and_discards_output() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(
        PROBE_WITH_AUDIO,
        EngineBehaviour::Fail("Error opening output file: Permission denied"),
    );
    let report = harness
        .orchestrator(&toolchain)
        .run(
            job_id("dead0001"),
            &harness.compose(Some("voice.mp3"), Some("bed.mp3"), Vec::new()),
            CancelSignal::never(),
        )
        .await;

    match report.error() {
        Some(JobError::Encode(err @ EncodeError::Failed { .. })) => {
            assert_eq!(
                err.diagnostic(),
                Some("Error opening output file: Permission denied")
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.state(), JobState::Cleaned(Some(FailureKind::Encode)));
    assert!(report.plan.is_some());
    assert!(harness.output_files().is_empty());
    assert!(list(&harness.work_dir()).is_empty());
}

#[tokio::test]
async fn wall_clock_ceiling_fails_a_hung_engine() {
    let mut harness = Harness::new();
    harness.config.engine.wall_clock_ceiling_seconds = 1;
    let toolchain = FakeToolchain::new(PROBE_WITH_AUDIO, EngineBehaviour::Hang);
    let report = harness
        .orchestrator(&toolchain)
        .run(
            job_id("510e0001"),
            &harness.compose(None, None, Vec::new()),
            CancelSignal::never(),
        )
        .await;

    assert!(matches!(
        report.error(),
        Some(JobError::Encode(EncodeError::Timeout(limit))) if *limit == Duration::from_secs(1)
    ));
    assert!(list(&harness.work_dir()).is_empty());
    assert!(harness.output_files().is_empty());
}

#[tokio::test]
async fn cancellation_stops_waiting_and_cleans_up() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_WITH_AUDIO, EngineBehaviour::Hang);
    let orchestrator = harness.orchestrator(&toolchain);
    let (handle, signal) = cancellation();
    let request = harness.compose(None, Some("bed.mp3"), Vec::new());

    let canceller = async {
        while toolchain.calls_to("ffmpeg").is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.cancel();
    };
    let (report, ()) = tokio::join!(
        orchestrator.run(job_id("cafe0001"), &request, signal),
        canceller
    );

    assert!(matches!(report.error(), Some(JobError::Cancelled)));
    assert!(report.lifecycle.visited(&JobState::Encoding));
    assert_eq!(
        report.state(),
        JobState::Cleaned(Some(FailureKind::Cancelled))
    );
    assert!(list(&harness.work_dir()).is_empty());
}

#[tokio::test]
async fn still_image_skips_probe_and_loops_image() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_WITH_AUDIO, EngineBehaviour::Succeed);
    let request = CompositionRequest::StillImage(StillImageRequest {
        image_url: harness.url("cover.png"),
        audio_url: harness.url("bed.mp3"),
        format: OutputFormat::Mov,
    });

    let report = harness
        .orchestrator(&toolchain)
        .run(job_id("1a1a1a1a"), &request, CancelSignal::never())
        .await;

    assert!(report.is_success());
    assert!(toolchain.calls_to("ffprobe").is_empty());
    assert!(report.lifecycle.visited(&JobState::Probing));
    let args = toolchain.engine_args();
    assert_eq!(&args[5..7], &["-loop", "1"]);
    assert!(args.windows(2).any(|w| w[0] == "-tune" && w[1] == "stillimage"));
    assert_eq!(
        report.artifact().unwrap().file_name,
        "1a1a1a1a_output.mov"
    );
}

#[tokio::test]
async fn concurrent_jobs_use_disjoint_workspaces() {
    let harness = Harness::new();
    let toolchain = FakeToolchain::new(PROBE_SILENT, EngineBehaviour::Succeed);
    let orchestrator = harness.orchestrator(&toolchain);
    let first = CompositionRequest::Combine(CombineRequest {
        video_url: harness.url("clip.mp4"),
        audio_url: harness.url("bed.mp3"),
        format: OutputFormat::Mp4,
    });
    let second = harness.compose(Some("voice.mp3"), Some("bed.mp3"), Vec::new());

    let (a, b) = tokio::join!(
        orchestrator.run(job_id("00000001"), &first, CancelSignal::never()),
        orchestrator.run(job_id("00000002"), &second, CancelSignal::never()),
    );

    assert!(a.is_success() && b.is_success());
    let mut outputs = harness.output_files();
    outputs.sort();
    assert_eq!(
        outputs,
        vec!["00000001_output.mp4", "00000002_output.mp4"]
    );
    let inputs: Vec<String> = toolchain
        .calls_to("ffmpeg")
        .into_iter()
        .flat_map(|args| {
            args.windows(2)
                .filter(|w| w[0] == "-i")
                .map(|w| w[1].clone())
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(inputs
        .iter()
        .filter(|path| path.contains("00000001"))
        .all(|path| !path.contains("00000002")));
    assert!(list(&harness.work_dir()).is_empty());
}
