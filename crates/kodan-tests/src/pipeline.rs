//! Integration tests for the scene pipeline.
//!
//! Exercises kodan-project and kodan-jobs together: edits go through the
//! project store and file layout, jobs run the fixture's shell tools.

use kodan_core::{JobKind, KodanError, PROJECT_POSITION};
use kodan_jobs::{JobState, PipelineEvent};
use kodan_project::{CaptionSettings, InsertAt, ScenePatch, StoreKind};
use std::fs;
use std::time::Duration;

use crate::fixture::Fixture;

const WAIT: Duration = Duration::from_secs(20);

// ── Helpers ────────────────────────────────────────────────────

fn finished(events: &[PipelineEvent]) -> Vec<(usize, JobKind, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Finished {
                position,
                kind,
                success,
                ..
            } => Some((*position, *kind, *success)),
            _ => None,
        })
        .collect()
}

fn message_of(events: &[PipelineEvent], of: JobKind) -> String {
    events
        .iter()
        .find_map(|e| match e {
            PipelineEvent::Finished { kind, message, .. } if *kind == of => Some(message.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn prompt(text: &str) -> ScenePatch {
    ScenePatch {
        positive_prompt: Some(text.into()),
        ..Default::default()
    }
}

fn voiceline(text: &str) -> ScenePatch {
    ScenePatch {
        voiceline: Some(text.into()),
        ..Default::default()
    }
}

fn caption(text: &str) -> CaptionSettings {
    CaptionSettings {
        caption: Some(text.into()),
        ..Default::default()
    }
}

// ── Jobs & the clip trigger ────────────────────────────────────

#[test]
fn voice_line_completes_clip() {
    let f = Fixture::new(1);
    f.write(StoreKind::Image, 1, "image");
    f.set(1, voiceline("The tide came in at dawn."));

    let mut pipeline = f.open();
    pipeline.generate_voice(1).unwrap();
    let events = pipeline.run_until_idle(WAIT);

    assert_eq!(
        finished(&events),
        vec![(1, JobKind::Voice, true), (1, JobKind::Clip, true)]
    );
    assert_eq!(f.read(StoreKind::Clip, 1).as_deref(), Some("imagevoice"));
    assert_eq!(f.clip_runs(), 1);
    assert!(pipeline.is_idle());
}

#[test]
fn image_progress_then_caption() {
    let f = Fixture::new(1);
    f.set(
        1,
        ScenePatch {
            caption_settings: Some(caption("Dawn")),
            ..prompt("a harbour at first light")
        },
    );

    let mut pipeline = f.open();
    pipeline.generate_image(1, 640, 360).unwrap();
    let events = pipeline.run_until_idle(WAIT);

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress {
                kind: JobKind::Image,
                percent,
                ..
            } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(percents.contains(&50));
    assert!(percents.contains(&100));

    assert_eq!(
        finished(&events),
        vec![(1, JobKind::Image, true), (1, JobKind::Caption, true)]
    );
    assert_eq!(f.read(StoreKind::Image, 1).as_deref(), Some("image+Dawn"));
    assert_eq!(f.read(StoreKind::CaptionSource, 1).as_deref(), Some("image"));
    // No voice line yet.
    assert_eq!(f.clip_runs(), 0);
}

#[test]
fn failed_caption_still_assembles_clip() {
    let f = Fixture::new(1);
    f.write(StoreKind::Voiceline, 1, "voice");
    f.set(
        1,
        ScenePatch {
            caption_settings: Some(caption("FAIL")),
            ..prompt("a lighthouse")
        },
    );

    let mut pipeline = f.open();
    pipeline.generate_image(1, 512, 512).unwrap();
    let events = pipeline.run_until_idle(WAIT);

    assert_eq!(
        finished(&events),
        vec![
            (1, JobKind::Image, true),
            (1, JobKind::Caption, false),
            (1, JobKind::Clip, true),
        ]
    );
    assert!(message_of(&events, JobKind::Caption).contains("font not found"));
    assert_eq!(f.read(StoreKind::Clip, 1).as_deref(), Some("imagevoice"));
}

#[test]
fn failed_image_reports_stderr() {
    let f = Fixture::new(1);
    f.write(StoreKind::Voiceline, 1, "voice");
    f.set(1, prompt("FAIL"));

    let mut pipeline = f.open();
    pipeline.generate_image(1, 512, 512).unwrap();
    let events = pipeline.run_until_idle(WAIT);

    assert_eq!(finished(&events), vec![(1, JobKind::Image, false)]);
    assert!(message_of(&events, JobKind::Image).contains("CUDA out of memory"));
    assert!(!f.path(StoreKind::Image, 1).exists());
    assert_eq!(f.clip_runs(), 0);
}

#[test]
fn clean_exit_without_output_is_failure() {
    let f = Fixture::new(1);
    f.set(1, voiceline("NOOUT"));

    let mut pipeline = f.open();
    pipeline.generate_voice(1).unwrap();
    let events = pipeline.run_until_idle(WAIT);

    assert_eq!(finished(&events), vec![(1, JobKind::Voice, false)]);
    assert!(message_of(&events, JobKind::Voice).contains("no output"));
}

#[test]
fn clip_rebuilt_when_inputs_change_mid_run() {
    let f = Fixture::new(1);
    f.write(StoreKind::Image, 1, "image");
    f.write(StoreKind::Voiceline, 1, "old");
    f.set(1, voiceline("A second take."));
    fs::write(f.root().join("slow_clip"), "").unwrap();

    let mut pipeline = f.open();
    pipeline.assemble_clip(1).unwrap();
    pipeline.generate_voice(1).unwrap();
    let events = pipeline.run_until_idle(WAIT);

    let clips = finished(&events)
        .into_iter()
        .filter(|&(_, kind, ok)| kind == JobKind::Clip && ok)
        .count();
    assert_eq!(clips, 2);
    assert_eq!(f.clip_runs(), 2);
    assert_eq!(f.read(StoreKind::Clip, 1).as_deref(), Some("imagevoice"));
}

// ── Registry rules ─────────────────────────────────────────────

#[test]
fn duplicate_submit_then_cancel() {
    let f = Fixture::new(1);
    f.set(
        1,
        ScenePatch {
            caption_settings: Some(caption("never drawn")),
            ..prompt("SLOW")
        },
    );

    let mut pipeline = f.open();
    pipeline.generate_image(1, 512, 512).unwrap();
    let err = pipeline.generate_image(1, 512, 512).unwrap_err();
    assert!(matches!(
        err,
        KodanError::DuplicateJob {
            position: 1,
            kind: JobKind::Image
        }
    ));
    assert!(pipeline
        .status_of(1, JobKind::Image)
        .is_some_and(JobState::is_active));

    assert!(pipeline.cancel(1, JobKind::Image));
    assert_eq!(pipeline.status_of(1, JobKind::Image), Some(JobState::Canceling));
    assert!(!pipeline.cancel(1, JobKind::Image));

    // Until the killed process reports back, nothing else may write its files.
    assert!(matches!(
        pipeline.generate_image(1, 512, 512),
        Err(KodanError::DuplicateJob {
            position: 1,
            kind: JobKind::Image
        })
    ));
    assert!(matches!(
        pipeline.delete_scene(1),
        Err(KodanError::JobsInFlight { .. })
    ));

    let events = pipeline.run_until_idle(WAIT);
    assert_eq!(finished(&events), vec![(1, JobKind::Image, false)]);
    assert_eq!(message_of(&events, JobKind::Image), "canceled");
    assert_eq!(pipeline.status_of(1, JobKind::Image), None);
    assert!(pipeline.active_jobs().is_empty());
}

#[test]
fn image_and_caption_never_overlap() {
    let f = Fixture::new(2);
    f.write(StoreKind::Image, 1, "image");
    f.set(
        1,
        ScenePatch {
            caption_settings: Some(caption("SLOW")),
            ..prompt("a windmill")
        },
    );
    f.set(2, prompt("SLOW"));

    let mut pipeline = f.open();
    pipeline.update_caption(1, None).unwrap();
    assert!(matches!(
        pipeline.generate_image(1, 512, 512),
        Err(KodanError::DuplicateJob {
            position: 1,
            kind: JobKind::Caption
        })
    ));

    pipeline.generate_image(2, 512, 512).unwrap();
    assert!(matches!(
        pipeline.update_caption(2, Some(caption("too early"))),
        Err(KodanError::DuplicateJob {
            position: 2,
            kind: JobKind::Image
        })
    ));
    // The refused caption left the scene untouched.
    assert_eq!(pipeline.project().unwrap().scenes[1].caption_text(), None);
    assert_eq!(pipeline.status_of(1, JobKind::Image), None);
    assert_eq!(pipeline.status_of(2, JobKind::Caption), None);

    pipeline.shutdown();
    let events = pipeline.run_until_idle(WAIT);
    assert_eq!(
        finished(&events).len(),
        2,
        "only the two slow jobs ran: {events:?}"
    );
    assert_eq!(f.read(StoreKind::Image, 1).as_deref(), Some("image"));
    assert!(!f.path(StoreKind::Image, 2).exists());
}

#[test]
fn rejected_submissions_register_nothing() {
    let f = Fixture::new(1);
    let mut pipeline = f.open();

    assert!(matches!(
        pipeline.generate_voice(1),
        Err(KodanError::InvalidParameter(_))
    ));
    assert!(matches!(
        pipeline.update_caption(1, Some(caption("Dawn"))),
        Err(KodanError::NotFound(_))
    ));
    assert!(matches!(
        pipeline.assemble_clip(1),
        Err(KodanError::NotFound(_))
    ));
    assert!(matches!(
        pipeline.generate_image(2, 512, 512),
        Err(KodanError::SceneNotFound {
            position: 2,
            scene_count: 1
        })
    ));
    assert!(pipeline.is_idle());

    // The caption settings were still saved.
    let project = pipeline.project().unwrap();
    assert_eq!(project.scenes[0].caption_text(), Some("Dawn"));
}

#[test]
fn image_models_are_checked_before_submit() {
    let mut f = Fixture::new(1);
    f.config.models_dir = Some(f.tmp.path().join("Models"));
    f.set(
        1,
        ScenePatch {
            selected_lora: Some("ghibli_style_offset".into()),
            ..prompt("a quiet street")
        },
    );

    let mut pipeline = f.open();
    assert!(matches!(
        pipeline.generate_image(1, 512, 512),
        Err(KodanError::ModelNotInstalled(_))
    ));

    pipeline
        .update_scene(
            1,
            ScenePatch {
                base_model: Some("flux".into()),
                selected_lora: Some(String::new()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(matches!(
        pipeline.generate_image(1, 512, 512),
        Err(KodanError::InvalidParameter(_))
    ));
    assert_eq!(pipeline.status_of(1, JobKind::Image), None);
}

// ── Structural edits ───────────────────────────────────────────

#[test]
fn structural_edits_wait_for_affected_jobs() {
    let f = Fixture::new(3);
    f.set(2, prompt("SLOW"));

    let mut pipeline = f.open();
    pipeline.generate_image(2, 512, 512).unwrap();

    for result in [
        pipeline.delete_scene(1),
        pipeline.reorder_scenes(&[2, 1, 3]),
        pipeline.add_scene(InsertAt::Position(1)).map(|_| ()),
    ] {
        match result {
            Err(KodanError::JobsInFlight { positions }) => assert_eq!(positions, vec![2]),
            other => panic!("expected JobsInFlight, got {other:?}"),
        }
    }

    // Edits that leave position 2 alone go through.
    assert_eq!(pipeline.add_scene(InsertAt::End).unwrap(), 4);
    pipeline.reorder_scenes(&[1, 2, 4, 3]).unwrap();
    pipeline.delete_scene(4).unwrap();
    assert_eq!(pipeline.project().unwrap().scene_count(), 3);

    pipeline.cancel(2, JobKind::Image);
    pipeline.run_until_idle(WAIT);
    pipeline.delete_scene(1).unwrap();
    assert_eq!(pipeline.project().unwrap().scene_count(), 2);
}

#[test]
fn reorder_fills_missing_clip() {
    let f = Fixture::new(2);
    f.write(StoreKind::Image, 2, "image");
    f.write(StoreKind::Voiceline, 2, "voice");

    let mut pipeline = f.open();
    pipeline.reorder_scenes(&[2, 1]).unwrap();
    let events = pipeline.run_until_idle(WAIT);

    assert_eq!(finished(&events), vec![(1, JobKind::Clip, true)]);
    assert_eq!(f.read(StoreKind::Clip, 1).as_deref(), Some("imagevoice"));
    assert_eq!(f.read(StoreKind::Image, 2), None);

    // With the clip in place, another layout change leaves it alone.
    pipeline.add_scene(InsertAt::End).unwrap();
    assert!(pipeline.run_until_idle(WAIT).is_empty());
    assert_eq!(f.clip_runs(), 1);
}

#[test]
fn delete_renumbers_and_keeps_thumbnails_in_step() {
    let f = Fixture::new(3);
    f.set(3, prompt("third"));
    f.write(StoreKind::Image, 3, "three");

    let mut pipeline = f.open();
    pipeline.delete_scene(1).unwrap();

    let project = pipeline.project().unwrap();
    assert_eq!(project.scene_count(), 2);
    assert_eq!(project.scenes[1].positive_prompt.as_deref(), Some("third"));
    assert_eq!(
        project.scenes[1].thumbnail,
        f.path(StoreKind::Image, 2).to_string_lossy()
    );
    assert_eq!(f.read(StoreKind::Image, 2).as_deref(), Some("three"));
    assert!(!f.path(StoreKind::Image, 3).exists());
}

// ── Render ─────────────────────────────────────────────────────

#[test]
fn render_joins_clips_in_scene_order() {
    let f = Fixture::new(3);
    f.write(StoreKind::Clip, 2, "two");
    f.write(StoreKind::Clip, 1, "one");
    let mut pipeline = f.open();

    pipeline.render_project(&f.tmp.path().join("film.mov")).unwrap();
    let events = pipeline.run_until_idle(WAIT);

    assert_eq!(
        finished(&events),
        vec![(PROJECT_POSITION, JobKind::Render, true)]
    );
    let film = f.tmp.path().join("film.mp4");
    assert_eq!(fs::read_to_string(&film).unwrap(), "onetwo");
    let output = events.iter().find_map(|e| match e {
        PipelineEvent::Finished { output, .. } => output.clone(),
        _ => None,
    });
    assert_eq!(output, Some(film));

    pipeline.render_project(f.tmp.path()).unwrap();
    pipeline.run_until_idle(WAIT);
    assert!(f.tmp.path().join("output.mp4").is_file());
}

#[test]
fn render_needs_clips_and_idle_scenes() {
    let f = Fixture::new(2);
    f.set(2, prompt("SLOW"));
    let mut pipeline = f.open();

    assert!(matches!(
        pipeline.render_project(f.tmp.path()),
        Err(KodanError::NotFound(_))
    ));
    assert!(pipeline.is_idle());

    f.write(StoreKind::Clip, 1, "one");
    pipeline.generate_image(2, 512, 512).unwrap();
    match pipeline.render_project(f.tmp.path()) {
        Err(KodanError::JobsInFlight { positions }) => assert_eq!(positions, vec![2]),
        other => panic!("expected JobsInFlight, got {other:?}"),
    }
    assert_eq!(pipeline.status_of(PROJECT_POSITION, JobKind::Render), None);

    pipeline.shutdown();
    pipeline.run_until_idle(WAIT);
}

#[test]
fn running_render_holds_every_scene() {
    let f = Fixture::new(2);
    f.write(StoreKind::Clip, 1, "one");
    f.write(StoreKind::Image, 2, "image");
    f.set(2, voiceline("After the render."));
    fs::write(f.root().join("slow_render"), "").unwrap();

    let mut pipeline = f.open();
    pipeline.render_project(f.tmp.path()).unwrap();

    match pipeline.generate_voice(2) {
        Err(KodanError::JobsInFlight { positions }) => assert_eq!(positions, vec![2]),
        other => panic!("expected JobsInFlight, got {other:?}"),
    }
    match pipeline.delete_scene(1) {
        Err(KodanError::JobsInFlight { positions }) => assert_eq!(positions, vec![1, 2]),
        other => panic!("expected JobsInFlight, got {other:?}"),
    }
    assert!(matches!(
        pipeline.render_project(f.tmp.path()),
        Err(KodanError::DuplicateJob {
            kind: JobKind::Render,
            ..
        })
    ));

    assert!(pipeline.cancel(PROJECT_POSITION, JobKind::Render));
    let events = pipeline.run_until_idle(WAIT);
    assert_eq!(
        finished(&events),
        vec![(PROJECT_POSITION, JobKind::Render, false)]
    );
    assert_eq!(message_of(&events, JobKind::Render), "canceled");

    pipeline.generate_voice(2).unwrap();
    let events = pipeline.run_until_idle(WAIT);
    assert_eq!(
        finished(&events),
        vec![(2, JobKind::Voice, true), (2, JobKind::Clip, true)]
    );
}

// ── Export ─────────────────────────────────────────────────────

#[test]
fn export_prefers_clip_over_image() {
    let f = Fixture::new(1);
    let out = f.tmp.path().join("out");
    fs::create_dir_all(&out).unwrap();
    let pipeline = f.open();

    assert!(matches!(
        pipeline.export_scene(1, &out),
        Err(KodanError::NotFound(_))
    ));

    f.write(StoreKind::Image, 1, "image");
    let target = pipeline.export_scene(1, &out).unwrap();
    assert_eq!(target, out.join("1.png"));

    f.write(StoreKind::Clip, 1, "clip");
    let target = pipeline.export_scene(1, &out.join("final.mov")).unwrap();
    assert_eq!(target, out.join("final.mp4"));
    assert_eq!(fs::read_to_string(target).unwrap(), "clip");
}
