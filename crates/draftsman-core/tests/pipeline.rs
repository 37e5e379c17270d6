//! End-to-end orchestrator runs against scripted capabilities.

mod support;

use std::sync::Arc;

use draftsman_core::capability::CapabilityError;
use draftsman_core::domain::{CitationStatus, FailureCategory, MalformedKind, WordRange};
use draftsman_core::{
    read_export_artifact, write_export_artifact, ApprovalAction, DraftError, ExhaustionPolicy,
    RunOutcome, RunPhase, SectionState,
};
use draftsman_state::fakes::MemoryCheckpointStore;
use draftsman_state::{CheckpointStore, RunId};
use support::*;

fn approve() -> ApprovalAction {
    ApprovalAction::Approve {
        reviewer: "editor@example.org".to_string(),
    }
}

#[tokio::test]
async fn test_full_run_stops_for_approval_then_completes() {
    let h = harness(ScriptedGenerator::new());
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction", "Conclusion"], 2))
        .await
        .unwrap();

    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert_eq!(outcome, RunOutcome::AwaitingApproval { questions: 3 });
    assert_eq!(run.phase, RunPhase::AwaitingApproval);
    assert_eq!(h.generator.draft_calls(0), 0);

    // Driving again without approval does not move the run.
    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert_eq!(outcome, RunOutcome::AwaitingApproval { questions: 3 });

    h.orchestrator.approve(&mut run, approve()).await.unwrap();
    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { flagged: vec![] });
    assert_eq!(run.phase, RunPhase::Done);
    assert!(run.all_passed());

    let bundle = run.export.as_ref().unwrap();
    assert!(!bundle.is_partial());
    assert_eq!(bundle.sections.len(), 2);
    assert_eq!(bundle.bibliography.len(), 1);
    assert_eq!(bundle.bibliography[0].source_id, "s1");
    assert!(bundle.bibliography[0].formatted.contains("Lovelace"));
    assert!(!bundle.sections[0].text.contains("[s1:"));

    // The persisted state matches the in-memory run.
    let loaded = h.orchestrator.load(run.run_id).await.unwrap();
    assert_eq!(loaded.phase, RunPhase::Done);
    assert_eq!(loaded.export, run.export);
}

#[tokio::test]
async fn test_section_passing_first_attempt_records_one_attempt() {
    let h = harness(ScriptedGenerator::new());
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction"], 2))
        .await
        .unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();

    let section = &run.sections[0];
    assert_eq!(section.state, SectionState::Passed);
    assert_eq!(section.attempts.len(), 1);
    assert!(section.attempts[0].evaluation.passed);
    assert_eq!(section.final_text.as_deref(), Some(PASSING_DRAFT));

    let labels: Vec<String> = h
        .store
        .history(&RunId::from(run.run_id))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.label)
        .filter(|l| l.starts_with("section:0:"))
        .collect();
    assert_eq!(
        labels,
        vec!["section:0:drafting", "section:0:evaluating", "section:0:passed"]
    );
}

#[tokio::test]
async fn test_unresolved_citation_triggers_second_attempt_with_feedback() {
    let generator = ScriptedGenerator::new()
        .with_drafts(0, vec![unresolved_draft(), PASSING_DRAFT.to_string()]);
    let h = harness(generator);
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction"], 2))
        .await
        .unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();
    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { flagged: vec![] });

    let section = &run.sections[0];
    assert_eq!(section.attempts.len(), 2);
    assert_eq!(
        section.attempts[0].failure_categories,
        vec![FailureCategory::CitationInvalid]
    );
    assert!(section.attempts[1].evaluation.passed);

    let requests = h.generator.draft_requests(0);
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].instructions.iter().any(|i| i.starts_with("MUST FIX")));
    let must_fix: Vec<&String> = requests[1]
        .instructions
        .iter()
        .filter(|i| i.starts_with("MUST FIX: [citation_invalid]"))
        .collect();
    assert_eq!(must_fix.len(), 1);
    assert!(must_fix[0].contains("s9"));
    assert_eq!(section.attempts[1].instructions.len(), 1);
}

#[tokio::test]
async fn test_short_section_fails_length_even_with_valid_citations() {
    let padded = format!("{PASSING_DRAFT} {}", "analysis ".repeat(367));
    let generator = ScriptedGenerator::new().with_drafts(0, vec![padded]);
    let h = harness(generator);
    let mut req = request(&["Results"], 0);
    req.config.word_range = WordRange::new(1000, 1500);
    req.config.on_exhausted = ExhaustionPolicy::FlagAndContinue;
    let mut run = h.orchestrator.create_run(req).await.unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();
    let outcome = h.orchestrator.drive(&mut run).await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed { flagged: vec![0] });
    let attempt = &run.sections[0].attempts[0];
    assert!(attempt
        .citations
        .verdicts
        .iter()
        .all(|v| v.marker.source_id == "s1"));
    assert_eq!(attempt.failure_categories, vec![FailureCategory::LengthViolation]);
    assert_eq!(run.sections[0].attempts.len(), 1);
}

#[tokio::test]
async fn test_exhausted_section_halts_run() {
    let generator = ScriptedGenerator::new().with_drafts(0, vec![unresolved_draft()]);
    let h = harness(generator);
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction", "Conclusion"], 2))
        .await
        .unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();

    let err = h.orchestrator.drive(&mut run).await.unwrap_err();
    match err {
        DraftError::SectionExhausted { index, attempts, .. } => {
            assert_eq!(index, 0);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(h.generator.draft_calls(0), 3);
    assert_eq!(h.generator.draft_calls(1), 0);

    let loaded = h.orchestrator.load(run.run_id).await.unwrap();
    assert_eq!(loaded.phase, RunPhase::Failed);
    assert_eq!(loaded.sections[0].state, SectionState::FailedExhausted);
    assert!(loaded.sections[0].final_text.is_none());
    let failure = loaded.failure.unwrap();
    assert_eq!(failure.section, Some(0));
    assert_eq!(failure.retry_history.len(), 3);

    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_exhausted_section_flagged_under_partial_delivery() {
    let generator = ScriptedGenerator::new().with_drafts(0, vec![unresolved_draft()]);
    let h = harness(generator);
    let mut req = request(&["Introduction", "Conclusion"], 1);
    req.config.on_exhausted = ExhaustionPolicy::FlagAndContinue;
    let mut run = h.orchestrator.create_run(req).await.unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();

    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { flagged: vec![0] });
    assert_eq!(run.sections[0].attempts.len(), 2);
    assert_eq!(run.sections[0].state, SectionState::FailedExhausted);
    assert!(run.sections[0].final_text.is_none());
    assert_eq!(run.sections[1].state, SectionState::Passed);

    let bundle = run.export.as_ref().unwrap();
    assert!(bundle.is_partial());
    assert!(bundle.sections[0].flagged);
    assert_eq!(bundle.sections[0].retry_history.len(), 2);
    assert!(bundle.sections[0].text.contains("unverified citation: s9"));
    assert!(!bundle.sections[1].flagged);
}

#[tokio::test]
async fn test_flagged_section_with_mismatched_quote_exports_unverified() {
    let mismatched = PASSING_DRAFT.replace("Battery storage lowered peak demand charges", "k demand ch");
    let generator = ScriptedGenerator::new().with_drafts(0, vec![mismatched]);
    let h = harness(generator);
    let mut req = request(&["Introduction", "Conclusion"], 1);
    req.config.on_exhausted = ExhaustionPolicy::FlagAndContinue;
    let mut run = h.orchestrator.create_run(req).await.unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();

    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { flagged: vec![0] });
    let latest = run.sections[0].latest_attempt().unwrap();
    assert_eq!(latest.citations.verdicts[0].status, CitationStatus::QuoteMismatch);

    let bundle = run.export.as_ref().unwrap();
    assert!(bundle.sections[0].text.contains("[unverified citation: s1]"));
    assert!(!bundle.sections[0].text.contains("(Lovelace & Hopper, 2021)"));
    // Only the accepted second section cites s1.
    assert!(bundle.sections[1].text.contains("(Lovelace & Hopper, 2021)"));
    assert_eq!(bundle.bibliography.len(), 1);
}

#[tokio::test]
async fn test_conventional_citations_and_reference_lists_are_rejected() {
    let fabricated = format!(
        "{PASSING_DRAFT} Prior work confirms this (Ghost, 2021).\n\n## References\n- Ghost, G. (2021). Fabricated paper."
    );
    let generator = ScriptedGenerator::new().with_drafts(0, vec![fabricated]);
    let h = harness(generator);
    let mut req = request(&["Introduction"], 0);
    req.config.on_exhausted = ExhaustionPolicy::FlagAndContinue;
    let mut run = h.orchestrator.create_run(req).await.unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();

    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { flagged: vec![0] });
    let attempt = &run.sections[0].attempts[0];
    assert_eq!(attempt.failure_categories, vec![FailureCategory::CitationInvalid]);
    let kinds: Vec<MalformedKind> = attempt.citations.malformed.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![MalformedKind::ConventionalCitation, MalformedKind::ReferenceList]
    );

    let text = &run.export.as_ref().unwrap().sections[0].text;
    assert!(text.contains("[unverified citation: (Ghost, 2021)]"));
    assert!(!text.contains("Fabricated paper"));
}

#[tokio::test]
async fn test_unparsed_marker_shapes_are_rejected() {
    let drafts = [
        format!(r#"{PASSING_DRAFT} See [doi:10.1000/xyz: "storage lowered peak demand charges"]."#),
        format!("{PASSING_DRAFT} Also [s2: 'feed-in tariffs accelerated rooftop solar'] holds."),
        format!("{PASSING_DRAFT} And [s9] agrees."),
    ];
    let generator = drafts
        .iter()
        .enumerate()
        .fold(ScriptedGenerator::new(), |g, (i, d)| g.with_drafts(i, vec![d.clone()]));
    let h = harness(generator);
    let mut req = request(&["Introduction", "Methods", "Conclusion"], 0);
    req.config.on_exhausted = ExhaustionPolicy::FlagAndContinue;
    let mut run = h.orchestrator.create_run(req).await.unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();

    let outcome = h.orchestrator.drive(&mut run).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { flagged: vec![0, 1, 2] });

    let doi = &run.sections[0].attempts[0].citations;
    assert_eq!(doi.verdicts[1].marker.source_id, "doi:10.1000/xyz");
    assert_eq!(doi.verdicts[1].status, CitationStatus::UnresolvedId);

    for index in [1, 2] {
        let report = &run.sections[index].attempts[0].citations;
        assert_eq!(report.malformed.len(), 1, "section {index}");
        assert_eq!(report.malformed[0].kind, MalformedKind::UnparsedMarker);
        assert_eq!(
            run.sections[index].attempts[0].failure_categories,
            vec![FailureCategory::CitationInvalid]
        );
    }

    let bundle = run.export.as_ref().unwrap();
    assert!(bundle.sections[0].text.contains("[unverified citation: doi:10.1000/xyz]"));
    assert!(bundle.sections[2].text.contains("[unverified citation: s9]"));
}

#[tokio::test]
async fn test_attempts_never_exceed_retry_cap() {
    for max_retries in [0u32, 1, 3] {
        let generator = ScriptedGenerator::new().with_drafts(0, vec![unresolved_draft()]);
        let h = harness(generator);
        let mut req = request(&["Introduction"], max_retries);
        req.config.on_exhausted = ExhaustionPolicy::FlagAndContinue;
        let mut run = h.orchestrator.create_run(req).await.unwrap();
        h.orchestrator.drive(&mut run).await.unwrap();
        h.orchestrator.approve(&mut run, approve()).await.unwrap();
        h.orchestrator.drive(&mut run).await.unwrap();

        assert_eq!(run.sections[0].attempts.len() as u32, max_retries + 1);
        assert_eq!(h.generator.draft_calls(0) as u32, max_retries + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_upstream_failures_do_not_consume_retry_budget() {
    let generator = ScriptedGenerator::new().failing_first(2);
    let sources = Arc::new(FlakySources::new(sources()).failing_queries(1).failing_gets(2));
    let h = harness_with(generator, sources, Arc::new(MemoryCheckpointStore::new()));
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction"], 0))
        .await
        .unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();
    let outcome = h.orchestrator.drive(&mut run).await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed { flagged: vec![] });
    assert_eq!(run.sections[0].attempts.len(), 1);
    assert!(run.sections[0].attempts[0].evaluation.passed);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_repository_fails_run() {
    let sources = Arc::new(FlakySources::new(sources()).failing_queries(10));
    let h = harness_with(
        ScriptedGenerator::new(),
        sources,
        Arc::new(MemoryCheckpointStore::new()),
    );
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction"], 1))
        .await
        .unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();

    let err = h.orchestrator.drive(&mut run).await.unwrap_err();
    assert!(matches!(
        err,
        DraftError::UpstreamCapabilityFailure { attempts: 3, .. }
    ));
    assert_eq!(run.phase, RunPhase::Failed);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.phase, RunPhase::Researching);
    assert!(failure.reason.starts_with("upstream_capability_failure"));
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_questions_are_requested_again() {
    let generator = ScriptedGenerator::new().with_questions(vec![
        Ok("I cannot help with that.".to_string()),
        Err(CapabilityError::Unavailable("busy".to_string())),
        Ok(QUESTIONS_JSON.to_string()),
    ]);
    let h = harness(generator);
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction"], 1))
        .await
        .unwrap();
    let outcome = h.orchestrator.drive(&mut run).await.unwrap();

    assert_eq!(outcome, RunOutcome::AwaitingApproval { questions: 3 });
    assert_eq!(h.generator.question_calls(), 3);
}

#[tokio::test]
async fn test_context_overflow_fails_run_at_section() {
    let h = harness(ScriptedGenerator::new());
    let mut req = request(&["Introduction"], 1);
    req.config.context.budget = 5;
    let mut run = h.orchestrator.create_run(req).await.unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();

    let err = h.orchestrator.drive(&mut run).await.unwrap_err();
    assert!(matches!(err, DraftError::ContextOverflow { section: 0, .. }));
    assert_eq!(h.generator.draft_calls(0), 0);

    let loaded = h.orchestrator.load(run.run_id).await.unwrap();
    assert_eq!(loaded.phase, RunPhase::Failed);
    let failure = loaded.failure.unwrap();
    assert_eq!(failure.section, Some(0));
    assert!(failure.reason.starts_with("context_overflow"));
}

#[tokio::test]
async fn test_approval_outside_review_is_rejected() {
    let h = harness(ScriptedGenerator::new());
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction"], 1))
        .await
        .unwrap();
    let err = h.orchestrator.approve(&mut run, approve()).await.unwrap_err();
    assert!(matches!(err, DraftError::Approval(_)));
    assert_eq!(run.phase, RunPhase::Planning);
}

#[tokio::test]
async fn test_export_artifact_round_trip() {
    let h = harness(ScriptedGenerator::new());
    let mut run = h
        .orchestrator
        .create_run(request(&["Introduction", "Discussion"], 1))
        .await
        .unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();
    h.orchestrator.approve(&mut run, approve()).await.unwrap();
    h.orchestrator.drive(&mut run).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let bundle = run.export.clone().unwrap();
    let paths = write_export_artifact(&bundle, dir.path()).unwrap();
    assert!(paths.markdown.exists());

    let restored = read_export_artifact(run.run_id, dir.path()).unwrap();
    assert_eq!(restored, bundle);
}

#[tokio::test]
async fn test_list_and_delete_runs() {
    let h = harness(ScriptedGenerator::new());
    let run = h
        .orchestrator
        .create_run(request(&["Introduction"], 1))
        .await
        .unwrap();

    let runs = h.orchestrator.list().await.unwrap();
    assert!(runs.iter().any(|r| r.run_id == RunId::from(run.run_id)));

    let removed = h.orchestrator.delete(run.run_id).await.unwrap();
    assert!(removed >= 1);
    let err = h.orchestrator.load(run.run_id).await.unwrap_err();
    assert!(matches!(err, DraftError::RunNotFound(id) if id == run.run_id));
}
