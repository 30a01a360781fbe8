//! End-to-end wizard and run-state flows against in-memory collaborators.
//!
//! Covers:
//! - staking and non-staking wizard paths through to completion
//! - funding gates (19 vs 20 OLAS on the staking pool)
//! - failure handling on the RPC stage
//! - cancellation stopping funding polling
//! - start/pause toggling, single-flight start, and failure semantics

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::timeout;

use olas_operate::error::{RunStateError, SpawnError};
use olas_operate::run_state::{RunStateController, StartDisabledReason, ToggleState};
use olas_operate::service::{
    Address, DeploymentStatus, FundRequirementTemplate, ServiceHash, ServiceKeys,
    ServiceTemplate, ServicesStore, StakingProgram, TemplateConfiguration,
};
use olas_operate::spawn::{FundRequirementMap, FundingPollPolicy, SpawnScreenState, SpawnWizard};
use olas_operate::testing::{FakeBalanceOracle, FakeRegistry};
use olas_operate::wallet::{WalletBalance, WalletBalanceWatcher};

const TIMEOUT: Duration = Duration::from_secs(5);

fn addr(last: u8) -> Address {
    Address::parse(&format!("0x{:040x}", last)).unwrap()
}

fn olas() -> Address {
    addr(0xee)
}

fn agent_key() -> Address {
    addr(1)
}

fn safe() -> Address {
    addr(9)
}

fn operator() -> Address {
    addr(0x42)
}

fn template(staking: bool) -> ServiceTemplate {
    ServiceTemplate {
        hash: ServiceHash::new("bafybeitrader"),
        name: "Trader".to_string(),
        description: "Prediction market trader".to_string(),
        service_version: "v0.1.0".to_string(),
        configuration: TemplateConfiguration {
            agent_id: 14,
            threshold: 1,
            number_of_keys: 1,
            fund_requirements: FundRequirementTemplate {
                agent: dec!(0.1),
                safe: dec!(0.5),
            },
            staking: staking.then(|| StakingProgram {
                id: "pearl_beta".to_string(),
                min_staking_deposit: dec!(10),
                olas_cost_of_bond: dec!(10),
            }),
            rpc: None,
        },
    }
}

fn fast_policy() -> FundingPollPolicy {
    FundingPollPolicy {
        interval: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        timeout: None,
    }
}

struct Harness {
    registry: Arc<FakeRegistry>,
    oracle: Arc<FakeBalanceOracle>,
    store: Arc<ServicesStore>,
    wizard: SpawnWizard,
}

fn harness(staking: bool, policy: FundingPollPolicy) -> Harness {
    let tpl = template(staking);
    let registry = Arc::new(FakeRegistry::with_templates(vec![tpl.clone()]));
    registry.set_build_keys(ServiceKeys {
        instances: vec![agent_key()],
        safe: Some(safe()),
    });
    let oracle = Arc::new(FakeBalanceOracle::default());
    let store = Arc::new(ServicesStore::new(registry.clone()));
    let wizard = SpawnWizard::new(tpl, store.clone(), oracle.clone(), olas(), policy);
    Harness {
        registry,
        oracle,
        store,
        wizard,
    }
}

fn fund_agents(oracle: &FakeBalanceOracle) {
    oracle.set_balance(&agent_key(), dec!(0.1));
    oracle.set_balance(&safe(), dec!(0.5));
}

#[tokio::test]
async fn staking_path_waits_for_full_stake() {
    let h = harness(true, fast_policy());

    assert_eq!(h.wizard.screen(), SpawnScreenState::StakingCheck);
    assert_eq!(
        h.wizard.choose_staking(true).await.unwrap(),
        SpawnScreenState::Rpc
    );
    assert_eq!(
        h.wizard.submit_rpc("https://rpc.gnosischain.com").await.unwrap(),
        SpawnScreenState::StakingFunding
    );
    assert_eq!(
        h.wizard.staking_fund_requirements(),
        FundRequirementMap::from([(safe(), dec!(20))])
    );

    h.oracle.set_token_balance(&safe(), &olas(), dec!(19));
    assert_eq!(
        h.wizard.check_funding().await.unwrap(),
        SpawnScreenState::StakingFunding
    );

    h.oracle.set_token_balance(&safe(), &olas(), dec!(20));
    assert_eq!(
        h.wizard.check_funding().await.unwrap(),
        SpawnScreenState::AgentFunding
    );

    fund_agents(&h.oracle);
    let screen = timeout(TIMEOUT, h.wizard.await_funding())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(screen, SpawnScreenState::Done);
    assert_eq!(h.wizard.is_staking(), Some(true));
}

#[tokio::test]
async fn non_staking_path_skips_staking_funding() {
    let h = harness(true, fast_policy());

    h.wizard.choose_staking(false).await.unwrap();
    assert_eq!(
        h.wizard.submit_rpc("https://rpc.gnosischain.com").await.unwrap(),
        SpawnScreenState::AgentFunding
    );
    assert!(h.wizard.staking_fund_requirements().is_empty());
    assert_eq!(
        h.wizard
            .agent_fund_requirements()
            .keys()
            .cloned()
            .collect::<Vec<_>>(),
        vec![agent_key(), safe()]
    );

    fund_agents(&h.oracle);
    assert_eq!(
        h.wizard.check_funding().await.unwrap(),
        SpawnScreenState::Done
    );
}

#[tokio::test]
async fn template_without_staking_program_rejects_staking() {
    let h = harness(false, fast_policy());

    let err = h.wizard.choose_staking(true).await.unwrap_err();
    assert!(matches!(err, SpawnError::StakingUnavailable(_)));
    assert_eq!(h.wizard.screen(), SpawnScreenState::StakingCheck);
}

#[tokio::test]
async fn rpc_failures_keep_the_wizard_on_rpc() {
    let h = harness(true, fast_policy());
    h.wizard.choose_staking(true).await.unwrap();

    let err = h.wizard.submit_rpc("ftp://rpc.example").await.unwrap_err();
    assert!(matches!(err, SpawnError::InvalidRpc { .. }));
    assert_eq!(h.wizard.screen(), SpawnScreenState::Rpc);
    assert_eq!(h.registry.calls("build_service"), 0);

    h.registry.fail_next("build_service");
    let err = h
        .wizard
        .submit_rpc("https://rpc.gnosischain.com")
        .await
        .unwrap_err();
    assert!(matches!(err, SpawnError::Build(_)));
    assert_eq!(h.wizard.screen(), SpawnScreenState::Rpc);
    assert!(h.wizard.service().is_none());

    assert_eq!(
        h.wizard.submit_rpc("https://rpc.gnosischain.com").await.unwrap(),
        SpawnScreenState::StakingFunding
    );
}

#[tokio::test]
async fn actions_out_of_stage_are_rejected() {
    let h = harness(true, fast_policy());

    let err = h.wizard.check_funding().await.unwrap_err();
    assert!(matches!(
        err,
        SpawnError::WrongStage {
            stage: SpawnScreenState::StakingCheck,
            ..
        }
    ));
    assert!(matches!(
        h.wizard.submit_rpc("https://rpc.gnosischain.com").await,
        Err(SpawnError::WrongStage { .. })
    ));
    assert!(matches!(
        h.wizard.finish().await,
        Err(SpawnError::WrongStage { .. })
    ));
    assert!(matches!(
        h.wizard.set_screen(SpawnScreenState::Rpc).await,
        Err(SpawnError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn set_screen_never_skips_funding_verification() {
    let h = harness(true, fast_policy());
    h.wizard.choose_staking(true).await.unwrap();
    h.wizard
        .submit_rpc("https://rpc.gnosischain.com")
        .await
        .unwrap();

    assert!(matches!(
        h.wizard.set_screen(SpawnScreenState::AgentFunding).await,
        Err(SpawnError::InvalidTransition { .. })
    ));
    assert_eq!(h.wizard.screen(), SpawnScreenState::StakingFunding);

    h.oracle.set_token_balance(&safe(), &olas(), dec!(20));
    assert_eq!(
        h.wizard
            .set_screen(SpawnScreenState::AgentFunding)
            .await
            .unwrap(),
        SpawnScreenState::AgentFunding
    );
    assert!(matches!(
        h.wizard.set_screen(SpawnScreenState::StakingCheck).await,
        Err(SpawnError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn set_screen_racing_a_funding_check_moves_one_stage() {
    let policy = FundingPollPolicy {
        interval: Duration::from_secs(3600),
        ..fast_policy()
    };
    let h = Arc::new(harness(true, policy));
    h.wizard.choose_staking(true).await.unwrap();
    h.wizard
        .submit_rpc("https://rpc.gnosischain.com")
        .await
        .unwrap();
    timeout(TIMEOUT, async {
        while h.oracle.lookups() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    h.oracle.hold();
    h.oracle.set_token_balance(&safe(), &olas(), dec!(20));
    fund_agents(&h.oracle);

    let checker = {
        let h = h.clone();
        tokio::spawn(async move { h.wizard.check_funding().await })
    };
    timeout(TIMEOUT, async {
        while h.oracle.parked() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let setter = {
        let h = h.clone();
        tokio::spawn(async move { h.wizard.set_screen(SpawnScreenState::AgentFunding).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.oracle.release();

    let checked = timeout(TIMEOUT, checker).await.unwrap().unwrap();
    let set = timeout(TIMEOUT, setter).await.unwrap().unwrap();
    assert_eq!(checked.unwrap(), SpawnScreenState::AgentFunding);
    assert_eq!(set.unwrap(), SpawnScreenState::AgentFunding);
    assert_eq!(h.wizard.screen(), SpawnScreenState::AgentFunding);
}

#[tokio::test]
async fn finish_resets_session_and_refreshes_services() {
    let h = harness(false, fast_policy());
    h.wizard.choose_staking(false).await.unwrap();
    h.wizard
        .submit_rpc("https://rpc.gnosischain.com")
        .await
        .unwrap();
    fund_agents(&h.oracle);
    h.wizard.check_funding().await.unwrap();
    assert_eq!(h.wizard.screen(), SpawnScreenState::Done);

    let refreshes_before = h.registry.calls("get_services");
    let outcome = h.wizard.finish().await.unwrap();

    assert_eq!(outcome.service.hash, ServiceHash::new("bafybeitrader"));
    assert!(outcome.refresh_error.is_none());
    assert_eq!(h.wizard.screen(), SpawnScreenState::StakingCheck);
    assert_eq!(h.wizard.is_staking(), None);
    assert!(h.wizard.service().is_none());
    assert!(h.wizard.agent_fund_requirements().is_empty());
    assert!(h.wizard.staking_fund_requirements().is_empty());
    assert_eq!(h.registry.calls("get_services"), refreshes_before + 1);
    assert_eq!(h.store.services().len(), 1);
}

#[tokio::test]
async fn finish_surfaces_refresh_failure_without_undoing_reset() {
    let h = harness(false, fast_policy());
    h.wizard.choose_staking(false).await.unwrap();
    h.wizard
        .submit_rpc("https://rpc.gnosischain.com")
        .await
        .unwrap();
    fund_agents(&h.oracle);
    h.wizard.check_funding().await.unwrap();

    h.registry.fail_next("get_services");
    let outcome = h.wizard.finish().await.unwrap();
    assert!(outcome.refresh_error.is_some());
    assert_eq!(h.wizard.screen(), SpawnScreenState::StakingCheck);
}

#[tokio::test]
async fn cancel_stops_polling_and_keeps_built_service() {
    let h = harness(true, fast_policy());
    h.wizard.choose_staking(true).await.unwrap();
    h.wizard
        .submit_rpc("https://rpc.gnosischain.com")
        .await
        .unwrap();
    assert!(h.wizard.funding_progress().await.is_some());

    h.wizard.cancel().await;
    assert_eq!(h.wizard.screen(), SpawnScreenState::StakingCheck);
    assert!(h.wizard.funding_progress().await.is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let settled = h.oracle.lookups();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(h.oracle.lookups(), settled);

    assert_eq!(h.registry.calls("delete_service"), 0);
    assert_eq!(h.registry.services_snapshot().len(), 1);
}

#[tokio::test]
async fn cancel_releases_a_pending_await() {
    let h = Arc::new(harness(true, fast_policy()));
    h.wizard.choose_staking(true).await.unwrap();
    h.wizard
        .submit_rpc("https://rpc.gnosischain.com")
        .await
        .unwrap();

    let waiter = {
        let h = h.clone();
        tokio::spawn(async move { h.wizard.await_funding().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.wizard.cancel().await;

    let result = timeout(TIMEOUT, waiter).await.unwrap().unwrap();
    assert_eq!(result.unwrap(), SpawnScreenState::StakingCheck);
}

#[tokio::test]
async fn funding_timeout_is_restartable() {
    let policy = FundingPollPolicy {
        timeout: Some(Duration::from_millis(30)),
        ..fast_policy()
    };
    let h = harness(false, policy);
    h.wizard.choose_staking(false).await.unwrap();
    h.wizard
        .submit_rpc("https://rpc.gnosischain.com")
        .await
        .unwrap();

    let err = timeout(TIMEOUT, h.wizard.await_funding())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SpawnError::FundingTimedOut(_)));
    assert_eq!(h.wizard.screen(), SpawnScreenState::AgentFunding);

    fund_agents(&h.oracle);
    let screen = timeout(TIMEOUT, h.wizard.await_funding())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(screen, SpawnScreenState::Done);
}

// ── Run-state controller ────────────────────────────────────

fn run_state(registry: Arc<FakeRegistry>) -> (Arc<ServicesStore>, Arc<RunStateController>) {
    let store = Arc::new(ServicesStore::new(registry));
    let controller = Arc::new(RunStateController::new(store.clone(), dec!(1)));
    (store, controller)
}

#[tokio::test]
async fn start_is_disabled_with_distinct_reasons() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (_store, controller) = run_state(registry.clone());

    assert_eq!(
        controller.toggle_state(WalletBalance::Unresolved),
        ToggleState::Disabled(StartDisabledReason::RpcUnavailable)
    );
    assert_eq!(
        controller.toggle_state(WalletBalance::Resolved(Decimal::ZERO)),
        ToggleState::Disabled(StartDisabledReason::InsufficientFunds)
    );
    assert!(matches!(
        controller.start(WalletBalance::Unresolved).await,
        Err(RunStateError::StartDisabled(
            StartDisabledReason::RpcUnavailable
        ))
    ));
    assert!(registry.call_log().is_empty());
}

#[tokio::test]
async fn start_without_service_creates_exactly_one() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (store, controller) = run_state(registry.clone());

    let status = controller
        .start(WalletBalance::Resolved(dec!(1)))
        .await
        .unwrap();

    assert_eq!(status, DeploymentStatus::Deployed);
    assert_eq!(registry.calls("create_service"), 1);
    assert_eq!(registry.calls("start_deployment"), 0);
    assert_eq!(store.service_status(), DeploymentStatus::Deployed);
    assert!(!controller.is_loading());
    assert_eq!(
        controller.toggle_state(WalletBalance::Resolved(dec!(1))),
        ToggleState::Pause
    );
}

#[tokio::test]
async fn start_with_existing_service_redeploys_it() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (store, controller) = run_state(registry.clone());
    controller
        .start(WalletBalance::Resolved(dec!(2)))
        .await
        .unwrap();
    controller.stop().await.unwrap();

    controller
        .start(WalletBalance::Resolved(dec!(2)))
        .await
        .unwrap();
    assert_eq!(registry.calls("create_service"), 1);
    assert_eq!(registry.calls("start_deployment"), 1);
    assert_eq!(store.service_status(), DeploymentStatus::Deployed);
}

#[tokio::test]
async fn pause_stops_deployed_service() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (store, controller) = run_state(registry.clone());
    controller
        .start(WalletBalance::Resolved(dec!(1)))
        .await
        .unwrap();

    let status = controller
        .toggle(WalletBalance::Unresolved)
        .await
        .unwrap();
    assert_eq!(status, DeploymentStatus::Stopped);
    assert_eq!(registry.calls("stop_deployment"), 1);
    assert_eq!(store.service_status(), DeploymentStatus::Stopped);
}

#[tokio::test]
async fn failed_request_leaves_status_and_clears_loading() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (store, controller) = run_state(registry.clone());
    controller
        .start(WalletBalance::Resolved(dec!(1)))
        .await
        .unwrap();

    registry.fail_next("stop_deployment");
    let err = controller.stop().await.unwrap_err();
    assert!(matches!(err, RunStateError::Request(_)));
    assert_eq!(store.service_status(), DeploymentStatus::Deployed);
    assert!(!controller.is_loading());
}

#[tokio::test]
async fn failed_create_and_start_leave_state_unchanged() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (store, controller) = run_state(registry.clone());

    registry.fail_next("create_service");
    let err = controller
        .start(WalletBalance::Resolved(dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, RunStateError::Request(_)));
    assert_eq!(store.service_status(), DeploymentStatus::NotDeployed);
    assert!(store.services().is_empty());
    assert!(registry.services_snapshot().is_empty());
    assert!(!controller.is_loading());

    controller
        .start(WalletBalance::Resolved(dec!(1)))
        .await
        .unwrap();
    controller.stop().await.unwrap();
    assert_eq!(store.service_status(), DeploymentStatus::Stopped);

    registry.fail_next("start_deployment");
    let err = controller
        .start(WalletBalance::Resolved(dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, RunStateError::Request(_)));
    assert_eq!(store.service_status(), DeploymentStatus::Stopped);
    assert_eq!(store.services().len(), 1);
    assert!(!controller.is_loading());
    assert_eq!(registry.calls("create_service"), 2);
    assert_eq!(registry.calls("start_deployment"), 1);
}

#[tokio::test]
async fn stop_without_service_is_rejected() {
    let registry = Arc::new(FakeRegistry::default());
    let (_store, controller) = run_state(registry.clone());
    assert!(matches!(
        controller.stop().await,
        Err(RunStateError::NothingToStop)
    ));
    assert!(!controller.is_loading());
}

#[tokio::test]
async fn concurrent_start_issues_a_single_request() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (_store, controller) = run_state(registry.clone());
    registry.hold();

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start(WalletBalance::Resolved(dec!(1))).await })
    };
    timeout(TIMEOUT, async {
        while !controller.is_loading() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        controller.toggle_state(WalletBalance::Resolved(dec!(1))),
        ToggleState::Loading
    );
    assert!(matches!(
        controller.start(WalletBalance::Resolved(dec!(1))).await,
        Err(RunStateError::Busy)
    ));

    registry.release();
    let status = timeout(TIMEOUT, first).await.unwrap().unwrap().unwrap();
    assert_eq!(status, DeploymentStatus::Deployed);
    assert_eq!(registry.calls("create_service"), 1);
    assert_eq!(registry.calls("get_service_templates"), 1);
}

#[tokio::test]
async fn operator_balance_feeds_the_toggle() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (_store, controller) = run_state(registry);
    let oracle = FakeBalanceOracle::default();
    oracle.set_balance(&operator(), dec!(0.5));

    let balance = WalletBalance::fetch(&oracle, &operator()).await;
    assert_eq!(
        controller.toggle_state(balance),
        ToggleState::Disabled(StartDisabledReason::InsufficientFunds)
    );

    oracle.set_balance(&operator(), dec!(1));
    let balance = WalletBalance::fetch(&oracle, &operator()).await;
    assert_eq!(controller.toggle_state(balance), ToggleState::Start);
}

#[tokio::test]
async fn start_when_ready_waits_for_the_balance_feed() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (store, controller) = run_state(registry.clone());
    let oracle = Arc::new(FakeBalanceOracle::default());
    oracle.set_balance(&operator(), dec!(0.5));
    let watcher = WalletBalanceWatcher::spawn(oracle.clone(), operator(), Duration::from_millis(5));

    let starting = {
        let controller = controller.clone();
        let balance = watcher.subscribe();
        tokio::spawn(async move { controller.start_when_ready(balance).await })
    };
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(registry.call_log().is_empty());
    assert!(!starting.is_finished());

    oracle.set_balance(&operator(), dec!(1));
    let status = timeout(TIMEOUT, starting).await.unwrap().unwrap().unwrap();
    assert_eq!(status, DeploymentStatus::Deployed);
    assert_eq!(registry.calls("create_service"), 1);
    assert_eq!(store.service_status(), DeploymentStatus::Deployed);
}

#[tokio::test]
async fn start_when_ready_reports_blocker_when_feed_closes() {
    let registry = Arc::new(FakeRegistry::with_templates(vec![template(true)]));
    let (_store, controller) = run_state(registry.clone());
    let oracle = Arc::new(FakeBalanceOracle::default());
    oracle.set_unreachable(true);
    let watcher = WalletBalanceWatcher::spawn(oracle, operator(), Duration::from_millis(5));
    let balance = watcher.subscribe();
    drop(watcher);

    let err = timeout(TIMEOUT, controller.start_when_ready(balance))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        RunStateError::StartDisabled(StartDisabledReason::RpcUnavailable)
    ));
    assert!(registry.call_log().is_empty());
}
