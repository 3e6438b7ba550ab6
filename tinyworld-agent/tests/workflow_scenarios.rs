//! End-to-end cycles through the decision workflow with scripted adapters.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{
    ReadOnlyBackend, ScriptedEyes, ScriptedGenerator, SlowBackend, THOUGHT, fast_settings,
    profile, snapshot, socrates, store_for, workflow_with,
};
use tinyworld_agent::profile::{NO_MEMORIES, NO_PERCEPTION};
use tinyworld_agent::{CharacterState, Step, StepFault, Trigger, Workflow, WorkflowSettings};
use tinyworld_core::{CharacterId, MemoryCategory, MemoryTier};
use tinyworld_llm::Position;

fn fresh() -> CharacterState {
    CharacterState::new(CharacterId::new("socrates_001"), "Socrates")
}

fn timer() -> Trigger {
    Trigger::timer(CharacterId::new("socrates_001"))
}

#[tokio::test]
async fn plain_cycle_runs_every_step_once() {
    let generator = Arc::new(ScriptedGenerator::default());
    let workflow = socrates(Arc::clone(&generator));

    let report = workflow.run(timer(), fresh()).await;

    assert_eq!(
        report.steps(),
        vec![
            Step::Observe,
            Step::Recall,
            Step::Generate,
            Step::Evaluate,
            Step::Persist,
            Step::Finalize
        ]
    );
    assert!(report.is_clean(), "faults: {:?}", report.faults());
    assert_eq!(report.state.cycle, 1);
    assert_eq!(report.state.utterance, THOUGHT);
    assert_eq!(report.state.category, MemoryCategory::Reflection);
    let id = report.state.persisted.expect("persisted");
    let (tier, record) = workflow.store().get(id).expect("read").expect("present");
    assert_eq!(tier, MemoryTier::Working);
    assert_eq!(record.content, THOUGHT);
    assert_eq!(record.context["cycle"], 1);
    assert_eq!(record.context["trigger"], "timer");
}

#[tokio::test]
async fn generation_timeout_falls_back_and_stores_placeholder() {
    let generator = Arc::new(ScriptedGenerator::slow(Duration::from_secs(5)));
    let settings = WorkflowSettings {
        generation_timeout: Duration::from_millis(50),
        ..fast_settings()
    };
    let workflow = workflow_with(profile("socrates_001", "Socrates"), generator, settings);

    let started = Instant::now();
    let report = workflow.run(timer(), fresh()).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.steps().last(), Some(&Step::Finalize));
    assert!(report.state.used_fallback);
    assert_eq!(
        report.state.utterance,
        tinyworld_agent::heuristics::fallback_utterance(1)
    );
    assert!(report
        .faults()
        .contains(&StepFault::AdapterTimeout { step: Step::Generate }));
    assert!(!report.state.wants_to_move);
    assert_eq!(report.state.category, MemoryCategory::Thought);

    let id = report.state.persisted.expect("placeholder persisted");
    let (tier, record) = workflow.store().get(id).expect("read").expect("present");
    assert_eq!(tier, MemoryTier::Working);
    assert_eq!(record.content, report.state.utterance);
    assert!((record.importance - tinyworld_agent::heuristics::FALLBACK_IMPORTANCE).abs() < f32::EPSILON);
    assert_eq!(record.context["fallback"], true);
}

#[tokio::test]
async fn unavailable_generator_is_recorded_and_cycle_completes() {
    let generator = Arc::new(ScriptedGenerator {
        fail_reflect: true,
        ..ScriptedGenerator::default()
    });
    let workflow = socrates(generator);

    let report = workflow.run(timer(), fresh()).await;

    assert!(report.state.used_fallback);
    assert!(matches!(
        report.faults(),
        [StepFault::AdapterUnavailable { step: Step::Generate, .. }]
    ));
    assert_eq!(report.steps().last(), Some(&Step::Finalize));
}

#[tokio::test]
async fn movement_is_planned_only_with_snapshot_and_position() {
    let generator = Arc::new(ScriptedGenerator {
        wants_to_move: true,
        target: Some(Position::new(410.0, 300.0)),
        ..ScriptedGenerator::default()
    });
    let workflow = socrates(Arc::clone(&generator));

    let without = workflow.run(timer(), fresh()).await;
    assert!(!without.steps().contains(&Step::PlanMovement));
    assert!(!without.state.wants_to_move);
    assert!(without.state.target.is_none());

    let here = Position::new(400.0, 300.0);
    let with = workflow
        .run(
            Trigger::snapshot(CharacterId::new("socrates_001"), snapshot(), here)
                .with_perception("a quiet square"),
            fresh(),
        )
        .await;
    assert!(with.steps().contains(&Step::PlanMovement));
    let target = with.state.target.clone().expect("target");
    assert_eq!(target.position, Position::new(410.0, 300.0));
    assert_eq!(target.reason, "curiosity");
    assert!(with.state.wants_to_move);
}

#[tokio::test]
async fn failed_plan_cancels_movement() {
    let generator = Arc::new(ScriptedGenerator {
        wants_to_move: true,
        target: None,
        ..ScriptedGenerator::default()
    });
    let workflow = socrates(generator);

    let report = workflow
        .run(
            Trigger::snapshot(
                CharacterId::new("socrates_001"),
                snapshot(),
                Position::new(100.0, 100.0),
            ),
            fresh(),
        )
        .await;

    assert!(report.steps().contains(&Step::PlanMovement));
    assert!(matches!(
        report.faults(),
        [StepFault::AdapterMalformedResponse { step: Step::PlanMovement, .. }]
    ));
    assert!(!report.state.wants_to_move);
    assert!(report.state.target.is_none());
    assert!(report.state.persisted.is_some(), "utterance is still kept");
}

#[tokio::test]
async fn distant_target_is_pulled_inside_the_radius() {
    let generator = Arc::new(ScriptedGenerator {
        wants_to_move: true,
        target: Some(Position::new(800.0, 100.0)),
        ..ScriptedGenerator::default()
    });
    let workflow = socrates(generator);
    let from = Position::new(100.0, 100.0);

    let report = workflow
        .run(
            Trigger::snapshot(CharacterId::new("socrates_001"), snapshot(), from),
            fresh(),
        )
        .await;

    let target = report.state.target.clone().expect("target");
    assert!((from.distance(target.position) - 160.0).abs() < 0.01);
    assert!((target.position.y - 100.0).abs() < f32::EPSILON);
    assert!(report.faults().contains(&StepFault::ValidationClamped {
        step: Step::PlanMovement,
        field: "target_position",
    }));
}

#[tokio::test]
async fn context_carries_previous_utterance_into_next_cycle() {
    let generator = Arc::new(ScriptedGenerator::default());
    let workflow = socrates(Arc::clone(&generator));

    let mut state = fresh();
    let first = workflow.run(timer(), state.clone()).await;
    let first_context = generator.last_context();
    assert!(first_context.contains(NO_MEMORIES));
    assert!(first_context.contains(NO_PERCEPTION));
    assert!(first_context.starts_with("You are Socrates"));

    state.merge_from(&first.state, Utc::now());
    let second = workflow.run(timer(), state).await;

    assert_eq!(second.state.cycle, 2);
    assert_eq!(second.state.recalled, vec![first.state.persisted.expect("first id")]);
    let second_context = generator.last_context();
    assert!(!second_context.contains(NO_MEMORIES));
    assert!(second_context.contains(THOUGHT));
}

#[tokio::test]
async fn mission_override_reaches_the_context() {
    let generator = Arc::new(ScriptedGenerator::default());
    let workflow = socrates(Arc::clone(&generator));

    workflow
        .run(timer().with_mission("Find the lost lyre."), fresh())
        .await;

    assert!(generator.last_context().contains("Find the lost lyre."));
}

#[tokio::test]
async fn insights_go_straight_to_long_term() {
    let generator = Arc::new(ScriptedGenerator::saying(
        "I finally understand the truth of my purpose.",
    ));
    let workflow = socrates(generator);

    let report = workflow.run(timer(), fresh()).await;

    assert_eq!(report.state.category, MemoryCategory::Insight);
    let id = report.state.persisted.expect("persisted");
    let long_term = workflow.store().long_term().expect("long-term");
    assert!(long_term.iter().any(|r| r.id == id));
}

#[tokio::test]
async fn long_utterances_are_truncated_and_flagged() {
    let generator = Arc::new(ScriptedGenerator::saying(&"why ".repeat(200)));
    let settings = WorkflowSettings {
        max_utterance_chars: 40,
        ..fast_settings()
    };
    let workflow = workflow_with(profile("socrates_001", "Socrates"), generator, settings);

    let report = workflow.run(timer(), fresh()).await;

    assert!(report.state.utterance.chars().count() <= 40);
    assert!(report.faults().contains(&StepFault::ValidationClamped {
        step: Step::Generate,
        field: "utterance",
    }));
    assert!(report.is_clean());
}

#[tokio::test]
async fn model_scores_replace_heuristics_when_enabled() {
    let generator = Arc::new(ScriptedGenerator::default());
    let settings = WorkflowSettings {
        evaluate_with_model: true,
        ..fast_settings()
    };
    let workflow = workflow_with(profile("socrates_001", "Socrates"), generator, settings);

    let report = workflow.run(timer(), fresh()).await;

    assert!((report.state.importance - 9.5).abs() < f32::EPSILON);
    assert!((report.state.valence - 0.2).abs() < f32::EPSILON);
}

#[tokio::test]
async fn decay_runs_on_its_cadence() {
    let generator = Arc::new(ScriptedGenerator::default());
    let settings = WorkflowSettings {
        decay_every_cycles: 2,
        ..fast_settings()
    };
    let workflow = workflow_with(profile("socrates_001", "Socrates"), generator, settings);

    let mut state = fresh();
    let first = workflow.run(timer(), state.clone()).await;
    assert!(first.decay.is_none());
    state.merge_from(&first.state, Utc::now());
    let second = workflow.run(timer(), state).await;
    let decay = second.decay.expect("decay on cycle 2");
    assert_eq!(decay.removed(), 0, "fresh records survive");
}

#[tokio::test]
async fn perception_adapter_describes_snapshots() {
    let generator = Arc::new(ScriptedGenerator::default());
    let workflow = socrates(Arc::clone(&generator)).with_perception(Arc::new(ScriptedEyes(Ok(
        "an olive tree beside a well".to_string(),
    ))));

    let report = workflow
        .run(
            Trigger::snapshot(
                CharacterId::new("socrates_001"),
                snapshot(),
                Position::new(10.0, 10.0),
            ),
            fresh(),
        )
        .await;

    assert_eq!(
        report.state.perception.as_deref(),
        Some("an olive tree beside a well")
    );
    assert!(generator.last_context().contains("an olive tree beside a well"));
}

#[tokio::test]
async fn failed_perception_is_a_fault_not_an_abort() {
    let generator = Arc::new(ScriptedGenerator::default());
    let workflow = socrates(generator).with_perception(Arc::new(ScriptedEyes(Err(()))));

    let report = workflow
        .run(
            Trigger::snapshot(
                CharacterId::new("socrates_001"),
                snapshot(),
                Position::new(10.0, 10.0),
            ),
            fresh(),
        )
        .await;

    assert!(report.state.perception.is_none());
    assert!(matches!(
        report.faults(),
        [StepFault::AdapterMalformedResponse { step: Step::Observe, .. }]
    ));
    assert!(report.state.persisted.is_some());
}

#[tokio::test]
async fn store_outage_is_recorded_and_cycle_completes() {
    let who = profile("socrates_001", "Socrates");
    let store = store_for(&who, Arc::new(ReadOnlyBackend::default()));
    let generator = Arc::new(ScriptedGenerator::default());
    let workflow = Workflow::new(who, store, generator, fast_settings());

    let report = workflow.run(timer(), fresh()).await;

    assert_eq!(report.state.utterance, THOUGHT);
    assert_eq!(report.state.persisted, None);
    assert!(matches!(
        report.faults(),
        [StepFault::PersistenceUnavailable { step: Step::Persist, .. }]
    ));
    assert_eq!(report.steps().last(), Some(&Step::Finalize));
}

#[tokio::test]
async fn slow_write_is_reconciled_before_the_next_one_starts() {
    let who = profile("socrates_001", "Socrates");
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(300)));
    let store = store_for(&who, Arc::clone(&backend) as Arc<dyn tinyworld_core::MemoryBackend>);
    let settings = WorkflowSettings {
        persistence_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let workflow = Workflow::new(who, store, Arc::new(ScriptedGenerator::default()), settings);

    let mut state = fresh();
    let first = workflow.run(timer(), state.clone()).await;
    assert_eq!(first.state.persisted, None);
    let detail = first
        .faults()
        .iter()
        .find_map(|f| match f {
            StepFault::PersistenceUnavailable { step: Step::Persist, detail } => Some(detail.clone()),
            _ => None,
        })
        .expect("persist fault");
    assert!(detail.contains("late result will be discarded"), "{detail}");

    for _ in 0..2 {
        state.merge_from(&workflow.run(timer(), state.clone()).await.state, Utc::now());
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(backend.puts.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    assert_eq!(backend.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
    let stats = workflow.store().stats().expect("stats");
    assert_eq!(stats.working + stats.long_term, 0, "late writes are forgotten");
}
