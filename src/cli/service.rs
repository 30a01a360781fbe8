//! Service commands: templates, spawn, start/stop, status, delete.

use anyhow::Context;

use crate::cli::Console;
use crate::error::SpawnError;
use crate::run_state::RunStateController;
use crate::service::ServiceHash;
use crate::spawn::{FundRequirementMap, SpawnScreenState, SpawnWizard};
use crate::staking::StakingSummary;
use crate::wallet::{WalletBalance, WalletBalanceWatcher};

pub(super) async fn templates(console: &Console) -> anyhow::Result<()> {
    let templates = console
        .store
        .registry()
        .get_service_templates()
        .await
        .context("failed to list service templates")?;
    if templates.is_empty() {
        println!("No service templates available.");
        return Ok(());
    }
    for template in templates {
        let staking = match template.staking_program() {
            Some(program) => format!("staking: {} ({} OLAS)", program.id, program.required_stake()),
            None => "no staking".to_string(),
        };
        println!("{}  {}  [{staking}]", template.hash, template.name);
        if !template.description.is_empty() {
            println!("    {}", template.description);
        }
    }
    Ok(())
}

pub(super) async fn spawn(
    console: &Console,
    template_hash: &str,
    rpc: &str,
    staking: Option<bool>,
) -> anyhow::Result<()> {
    let wizard = SpawnWizard::for_template(
        &ServiceHash::new(template_hash),
        console.store.clone(),
        console.oracle.clone(),
        console.config.chain.staking_token.clone(),
        console.config.funding.poll.clone(),
    )
    .await
    .with_context(|| format!("cannot resolve template {template_hash}"))?;

    let is_staking = staking.unwrap_or_else(|| wizard.staking_eligible());
    wizard.choose_staking(is_staking).await?;
    println!(
        "Template {} ({}), staking: {}",
        wizard.template().name,
        wizard.template().hash,
        if is_staking { "yes" } else { "no" }
    );

    wizard.submit_rpc(rpc).await?;
    if let Some(service) = wizard.service() {
        println!("Built service {}", service.hash);
    }

    while wizard.screen().is_funding() {
        let screen = wizard.screen();
        let pool = match screen {
            SpawnScreenState::StakingFunding => wizard.staking_fund_requirements(),
            _ => wizard.agent_fund_requirements(),
        };
        print_requirements(screen, &pool);

        let result = tokio::select! {
            result = wizard.await_funding() => result,
            _ = tokio::signal::ctrl_c() => {
                wizard.cancel().await;
                anyhow::bail!("spawn cancelled; the built service was left in place");
            }
        };
        match result {
            Ok(next) => println!("Funded, now at stage {next}"),
            Err(SpawnError::FundingTimedOut(after)) => {
                wizard.cancel().await;
                anyhow::bail!(
                    "funding was not observed within {}s; fund the addresses above and run spawn again",
                    after.as_secs()
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    let outcome = wizard.finish().await?;
    println!("Service {} provisioned.", outcome.service.hash);
    if let Some(e) = outcome.refresh_error {
        eprintln!("Failed to update services: {e}");
    }
    Ok(())
}

fn print_requirements(screen: SpawnScreenState, pool: &FundRequirementMap) {
    let unit = match screen {
        SpawnScreenState::StakingFunding => "OLAS",
        _ => "native",
    };
    println!("Waiting for {screen}:");
    for (address, amount) in pool {
        println!("  {address}  {} {unit}", amount.normalize());
    }
}

async fn wallet_balance(console: &Console) -> WalletBalance {
    match &console.config.chain.wallet_address {
        Some(address) => WalletBalance::fetch(console.oracle.as_ref(), address).await,
        None => WalletBalance::Unresolved,
    }
}

fn controller(console: &Console) -> RunStateController {
    RunStateController::new(
        console.store.clone(),
        console.config.chain.min_start_balance,
    )
}

pub(super) async fn start(console: &Console, wait: bool) -> anyhow::Result<()> {
    console
        .store
        .update_services_state()
        .await
        .context("failed to load services")?;
    let controller = controller(console);

    let status = if wait {
        let Some(address) = &console.config.chain.wallet_address else {
            anyhow::bail!("--wait needs an operator wallet (OPERATE_WALLET_ADDRESS)");
        };
        let watcher = WalletBalanceWatcher::spawn(
            console.oracle.clone(),
            address.clone(),
            console.config.funding.balance_refresh,
        );
        println!(
            "Waiting for {address} to hold at least {}",
            controller.min_start_balance().normalize()
        );
        tokio::select! {
            result = controller.start_when_ready(watcher.subscribe()) => result?,
            _ = tokio::signal::ctrl_c() => anyhow::bail!("start cancelled"),
        }
    } else {
        let balance = wallet_balance(console).await;
        controller.start(balance).await?
    };
    println!("Service {status}");
    Ok(())
}

pub(super) async fn stop(console: &Console) -> anyhow::Result<()> {
    console
        .store
        .update_services_state()
        .await
        .context("failed to load services")?;
    let status = controller(console).stop().await?;
    println!("Service {status}");
    Ok(())
}

pub(super) async fn status(console: &Console) -> anyhow::Result<()> {
    console
        .store
        .update_services_state()
        .await
        .context("failed to load services")?;
    let snapshot = console.store.snapshot();
    let balance = wallet_balance(console).await;

    if snapshot.services.is_empty() {
        println!("No services.");
    }
    for service in &snapshot.services {
        println!("{}  {}  {}", service.hash, service.name, service.status);
    }
    println!("Wallet balance: {balance}");
    println!("Toggle: {}", controller(console).toggle_state(balance));

    if let Some(service) = snapshot.current_service() {
        let template = console
            .store
            .registry()
            .get_service_template(&service.template_hash)
            .await
            .ok();
        match StakingSummary::fetch(
            console.oracle.as_ref(),
            service,
            template.as_ref(),
            &console.config.chain.staking_token,
        )
        .await
        {
            Ok(summary) => println!(
                "Staking: safe holds {} / {} OLAS, meets minimum: {}, running with stake: {}",
                summary.safe_token_balance.normalize(),
                summary.minimum.normalize(),
                summary.meets_minimum,
                summary.running_with_stake
            ),
            Err(e) => println!("Staking: unavailable ({e})"),
        }
    }
    Ok(())
}

pub(super) async fn update(console: &Console, service_hash: &str) -> anyhow::Result<()> {
    let hash = ServiceHash::new(service_hash);
    let updated = console
        .store
        .registry()
        .update_service(&hash)
        .await
        .with_context(|| format!("failed to update service {hash}"))?;
    if let Err(e) = console.store.update_services_state().await {
        tracing::warn!(error = %e, "services refresh after update failed");
    }
    println!("Updated service {hash} -> {updated}");
    Ok(())
}

pub(super) async fn delete(console: &Console, service_hash: &str) -> anyhow::Result<()> {
    let hash = ServiceHash::new(service_hash);
    console
        .store
        .registry()
        .delete_service(&hash)
        .await
        .with_context(|| format!("failed to delete service {hash}"))?;
    if let Err(e) = console.store.update_services_state().await {
        tracing::warn!(error = %e, "services refresh after delete failed");
    }
    println!("Deleted service {hash}");
    Ok(())
}
