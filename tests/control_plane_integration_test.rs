//! 控制面集成测试：通过公开 API 与 mock 协作者端到端驱动

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bee_control::config::AppConfig;
use bee_control::mock::{MockExecutor, MockPlanProvider, MockRouteSelector};
use bee_control::orchestration::{unit, OrchestratorExt, Outcome, Parallel, RetryConfig};
use bee_control::planning::{
    ExecutionTrace, HierarchicalPlan, HierarchicalPlanner, HierarchicalPlanningConfig, Plan,
    PlanExecutor, PlanStep, RepairStrategy, TemporalConstraint,
};
use bee_control::routing::{ConfidenceRouter, FallbackStrategy, RouterConfig};
use bee_control::Orchestrator;
use tokio_util::sync::CancellationToken;

fn ship_release_provider() -> MockPlanProvider {
    MockPlanProvider::new()
        .with_plan(
            "ship release",
            vec![
                PlanStep::new("freeze branch", 0.9),
                PlanStep::new("build artifacts", 0.55),
                PlanStep::new("run tests", 0.85),
                PlanStep::new("write notes", 0.55),
                PlanStep::new("publish", 0.95),
            ],
        )
        .with_plan(
            "build artifacts",
            vec![
                PlanStep::new("compile", 0.3),
                PlanStep::new("link", 0.3),
                PlanStep::new("package", 0.3),
            ],
        )
        .with_plan(
            "write notes",
            vec![
                PlanStep::new("collect changes", 0.2),
                PlanStep::new("draft", 0.2),
                PlanStep::new("review", 0.2),
            ],
        )
}

#[tokio::test]
async fn test_ship_release_decomposition_respects_depth() {
    let provider = Arc::new(ship_release_provider());
    let planner = HierarchicalPlanner::new(provider.clone(), Arc::new(MockExecutor::new()));
    let config = HierarchicalPlanningConfig {
        max_depth: 1,
        min_steps_for_decomposition: 3,
        complexity_threshold: 0.7,
    };

    let plan = planner
        .create_hierarchical_plan("ship release", None, Some(config), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(plan.sub_plans.len(), 2);
    assert!(plan.sub_plans.contains_key("build artifacts"));
    assert!(plan.sub_plans.contains_key("write notes"));
    // 子计划自身的步骤同样低置信度，但 max_depth = 1 不再继续分解
    assert_eq!(provider.calls(), 3);
    assert!(plan.is_consistent());
}

#[tokio::test]
async fn test_empty_inputs_fail_fast_without_collaborator_calls() {
    let provider = MockPlanProvider::new();
    let plan_calls = provider.call_counter();
    let executor = MockExecutor::new();
    let exec_calls = executor.call_counter();
    let planner = HierarchicalPlanner::new(Arc::new(provider), Arc::new(executor));
    let token = CancellationToken::new();

    let err = planner
        .create_hierarchical_plan("  ", None, None, &token)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot be empty"));

    let err = planner
        .plan_with_constraints("", &[], &token)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot be empty"));

    let err = planner.plan_htn("", &[]).unwrap_err();
    assert!(err.to_string().contains("cannot be empty"));

    let selector = MockRouteSelector::new("code", 0.9);
    let route_calls = selector.call_counter();
    let router = ConfidenceRouter::new(Arc::new(selector), RouterConfig::default());
    let err = router.route("", None, &token).await.unwrap_err();
    assert!(err.to_string().contains("cannot be empty"));

    assert_eq!(plan_calls.load(Ordering::SeqCst), 0);
    assert_eq!(exec_calls.load(Ordering::SeqCst), 0);
    assert_eq!(route_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_flat_hierarchy_executes_identically_to_top_level_plan() {
    let plan = Plan::new(
        "tidy repo",
        vec![PlanStep::new("format", 0.9), PlanStep::new("lint", 0.9)],
    );
    let hierarchy = HierarchicalPlan::flat(plan.clone(), 2);

    let executor = Arc::new(MockExecutor::new());
    let planner = HierarchicalPlanner::new(Arc::new(MockPlanProvider::new()), executor.clone());

    let via_hierarchy = planner
        .execute_hierarchical(&hierarchy, &CancellationToken::new())
        .await
        .unwrap();
    let direct = executor.execute(&plan).await.unwrap();

    assert_eq!(
        serde_json::to_vec(&via_hierarchy).unwrap(),
        serde_json::to_vec(&direct).unwrap()
    );
}

#[tokio::test]
async fn test_before_constraint_ordering_and_cycle() {
    let provider = MockPlanProvider::new().with_plan(
        "launch",
        vec![
            PlanStep::new("announce", 0.9),
            PlanStep::new("deploy", 0.9),
            PlanStep::new("migrate", 0.9),
        ],
    );
    let planner = HierarchicalPlanner::new(Arc::new(provider), Arc::new(MockExecutor::new()))
        .with_default_task_duration(Duration::from_millis(200));
    let token = CancellationToken::new();

    let constraints = [
        TemporalConstraint::before("migrate", "deploy"),
        TemporalConstraint::before("deploy", "announce"),
    ];
    let schedule = planner
        .plan_with_constraints("launch", &constraints, &token)
        .await
        .unwrap();
    for c in &constraints {
        let a = schedule.task(&c.predecessor).unwrap();
        let b = schedule.task(&c.successor).unwrap();
        assert!(a.end_time <= b.start_time);
    }
    assert_eq!(schedule.total_duration, Duration::from_millis(600));

    let cyclic = [
        TemporalConstraint::before("migrate", "deploy"),
        TemporalConstraint::before("deploy", "migrate"),
    ];
    assert!(planner
        .plan_with_constraints("launch", &cyclic, &token)
        .await
        .is_err());
}

#[tokio::test]
async fn test_execute_fail_then_patch_repair() {
    let provider = MockPlanProvider::new()
        .with_plan(
            "deploy service",
            vec![
                PlanStep::new("checkout", 0.9),
                PlanStep::new("build", 0.9),
                PlanStep::new("push image", 0.9),
            ],
        )
        .with_plan(
            "Fix push image: registry unreachable",
            vec![PlanStep::new("login registry", 0.8), PlanStep::new("push image", 0.8)],
        );
    let planner = HierarchicalPlanner::new(
        Arc::new(provider),
        Arc::new(MockExecutor::new().failing_on("push image", "registry unreachable")),
    );
    let token = CancellationToken::new();

    let hierarchy = planner
        .create_hierarchical_plan("deploy service", None, None, &token)
        .await
        .unwrap();
    let err = planner
        .execute_hierarchical(&hierarchy, &token)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Execution failed:"));

    let direct = MockExecutor::new()
        .failing_on("push image", "registry unreachable")
        .execute(&hierarchy.top_level_plan)
        .await
        .unwrap();
    let trace = ExecutionTrace::from_execution(&direct).unwrap();
    assert_eq!(trace.failed_at_index, 2);

    let repaired = planner
        .repair_plan(&hierarchy.top_level_plan, &trace, RepairStrategy::Patch, &token)
        .await
        .unwrap();
    assert_eq!(
        repaired.steps[..trace.failed_at_index],
        hierarchy.top_level_plan.steps[..trace.failed_at_index]
    );
    assert_eq!(repaired.steps[2].action, "login registry");

    planner
        .record_repair_outcome("push image", "registry unreachable", RepairStrategy::Patch, true)
        .unwrap();
    assert_eq!(planner.repair_history().len(), 1);
}

#[tokio::test]
async fn test_routing_fallback_then_calibration() {
    let router = ConfidenceRouter::new(
        Arc::new(MockRouteSelector::new("research", 0.4)),
        RouterConfig::new(0.7),
    );
    let token = CancellationToken::new();

    let decision = router.route("summarise this paper", None, &token).await.unwrap();
    assert_eq!(decision.fallback_strategy(), Some(FallbackStrategy::UseEnsemble));
    assert_eq!(decision.route, "ensemble:research");

    router.record_routing_outcome(&decision, true).unwrap();
    router.record_routing_outcome(&decision, false).unwrap();
    assert_eq!(router.route_success_rate("research"), Some(0.5));
    assert_eq!(router.calibration_profile().samples, 2);

    let confidence = router.calculate_confidence("summarise this paper", "research", None);
    assert!((0.0..=1.0).contains(&confidence));
}

#[tokio::test]
async fn test_orchestration_pipeline_with_retry_and_parallel() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flaky = unit("flaky fetch", move |n: u32| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 1 {
                Outcome::failure("timeout")
            } else {
                Outcome::success(n * 2)
            }
        }
    })
    .with_retry(RetryConfig::new(3, Duration::ZERO))
    .unwrap()
    .map(|n| n + 1);

    let double = unit("double", |n: u32| async move { Outcome::success(n * 2) });
    let fan_out = Parallel::new("fan out", vec![flaky, double]).unwrap();

    let outcome = fan_out.execute(5, &CancellationToken::new()).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.output, Some(vec![11, 10]));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(fan_out.stats().total_executions, 1);
}

#[test]
fn test_app_config_feeds_runtime_structs() {
    let config = AppConfig::default();
    config.validate().unwrap();
    let router = ConfidenceRouter::new(
        Arc::new(MockRouteSelector::new("code", 0.9)),
        config.router_config(),
    );
    assert_eq!(router.threshold(), 0.7);
    assert_eq!(config.planning_config().max_depth, 3);
}

#[tokio::test]
async fn test_backtrack_from_real_execution_skips_non_resumable_step() {
    let provider = Arc::new(
        MockPlanProvider::new()
            .with_plan("migrate db", vec![PlanStep::new("online migration", 0.8)]),
    );
    let executor = Arc::new(
        MockExecutor::new()
            .with_state("drop index", "resumable", serde_json::json!(false))
            .failing_on("alter table", "lock timeout"),
    );
    let token = CancellationToken::new();

    let original = Plan::new(
        "migrate db",
        vec![
            PlanStep::new("snapshot", 0.9),
            PlanStep::new("drop index", 0.9),
            PlanStep::new("alter table", 0.9),
        ],
    );
    let result = executor.execute(&original).await.unwrap();
    assert_eq!(executor.executed_goals(), vec!["migrate db"]);

    let trace = ExecutionTrace::from_execution(&result).unwrap();
    assert_eq!(trace.failed_at_index, 2);
    assert!(!trace.executed_steps[1].is_resumable());

    let planner = HierarchicalPlanner::new(provider.clone(), executor.clone());
    let repaired = planner
        .repair_plan(&original, &trace, RepairStrategy::Backtrack, &token)
        .await
        .unwrap();
    let actions: Vec<_> = repaired.actions().collect();
    assert_eq!(actions, vec!["snapshot", "online migration"]);

    let (_, context) = provider.requests().remove(0);
    assert!(context.unwrap().starts_with("Completed steps: snapshot."));
}
