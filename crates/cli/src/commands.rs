use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use rulescope_core::TermRef;
use rulescope_rules::{ScopeEngine, ScopeEvent};

use crate::cli::{Command, Target};

pub async fn run(engine: &ScopeEngine, command: Command) -> Result<()> {
    match command {
        Command::Sweep => publish_and_drain(engine, ScopeEvent::SweepRequested).await,
        Command::Recompute { target } => {
            let event = match target {
                Target::Rule { id } => ScopeEvent::RuleScopeUpdated { rule_id: id },
                Target::Post { id } => ScopeEvent::PostTicketsChanged { post_id: id },
                Target::Ticket { id } => ScopeEvent::TicketChanged { ticket_id: id },
            };
            publish_and_drain(engine, event).await
        }
        Command::TermDeleted { term, id } => {
            let term = TermRef::new(term, id);
            publish_and_drain(engine, ScopeEvent::TermDeleted { term }).await
        }
        Command::RuleStatus { id, status } => {
            let rule = engine
                .service()
                .set_status(id, status)
                .await
                .with_context(|| format!("failed to set status of rule {id}"))?;
            info!(rule_id = rule.id, status = %rule.status, "Rule saved");
            drain(engine).await
        }
        Command::Toggle { rule, post, state } => {
            engine
                .resolver()
                .toggle(rule, post, state.enabled())
                .await
                .with_context(|| format!("failed to toggle rule {rule} on post {post}"))?;
            let effective = engine.resolver().effective_rule_ids(post).await?;
            print_json(&effective)
        }
        Command::Effective {
            post,
            admin,
            rule_type,
        } => {
            let resolver = engine.resolver();
            if admin {
                print_json(&resolver.effective_rules_admin(post).await?)
            } else if let Some(rule_type) = rule_type {
                print_json(&resolver.effective_rules_of_type(post, rule_type).await?)
            } else {
                print_json(&resolver.effective_rules(post).await?)
            }
        }
    }
}

async fn publish_and_drain(engine: &ScopeEngine, event: ScopeEvent) -> Result<()> {
    info!(topic = event.topic(), "Publishing");
    engine.publish(event).await.context("failed to enqueue task")?;
    drain(engine).await
}

async fn drain(engine: &ScopeEngine) -> Result<()> {
    let runner = engine.runner();
    let stats = runner.drain().await.context("task queue failed")?;
    print_json(&stats)?;

    let abandoned = runner.abandoned()?;
    for task in &abandoned {
        warn!(
            task_id = %task.id,
            name = %task.name,
            executions = task.executions,
            error = %task.last_error,
            "Task abandoned"
        );
    }
    if !abandoned.is_empty() {
        bail!("{} task(s) abandoned after exhausting retries", abandoned.len());
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
