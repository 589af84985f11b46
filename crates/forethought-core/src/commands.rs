use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::Session;
use crate::cli::{AddArgs, Command, DeleteArgs, EditArgs, HoldArgs};
use crate::hold::{HoldOutcome, HoldRejection, click, hold_to_complete};
use crate::lifecycle::{Coordinator, DeletionRisk, View, VisibleId, VisibleTask};
use crate::render::Renderer;
use crate::store::TaskStore;
use crate::task::{Interaction, Recurrence, TaskCreate, TaskPatch};

/// Shortest uuid prefix accepted as a task reference.
const MIN_PREFIX_LEN: usize = 4;

pub struct CommandContext<'a, S> {
    pub coordinator: &'a Coordinator<S>,
    pub session: &'a Session,
    pub renderer: &'a Renderer,
    pub hold_duration: Duration,
}

#[instrument(skip(ctx, command))]
pub async fn dispatch<S: TaskStore>(
    ctx: &CommandContext<'_, S>,
    command: Command,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching");
    match command {
        Command::List => cmd_list(ctx).await,
        Command::Add(args) => cmd_add(ctx, args).await,
        Command::Edit(args) => cmd_edit(ctx, args).await,
        Command::Toggle(args) => cmd_toggle(ctx, &args.task).await,
        Command::Hold(args) => cmd_hold(ctx, args).await,
        Command::Delete(args) => cmd_delete(ctx, args).await,
        Command::Info(args) => cmd_info(ctx, &args.task).await,
    }
}

async fn cmd_list<S: TaskStore>(ctx: &CommandContext<'_, S>) -> anyhow::Result<()> {
    info!("command list");
    let view = ctx.coordinator.refresh(ctx.session).await?;
    if view.visible.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    ctx.renderer.print_task_table(&view.visible)
}

async fn cmd_add<S: TaskStore>(ctx: &CommandContext<'_, S>, args: AddArgs) -> anyhow::Result<()> {
    info!("command add");
    let create = TaskCreate {
        text: args.text.join(" "),
        recurrence: Recurrence::from_str(&args.recurrence)?,
        interaction: Interaction::from_str(&args.interaction)?,
        duration_goal: args.duration_goal,
    };

    let task = ctx.coordinator.create(ctx.session, create).await?;
    println!("Created task {}.", task.uuid);
    Ok(())
}

async fn cmd_edit<S: TaskStore>(ctx: &CommandContext<'_, S>, args: EditArgs) -> anyhow::Result<()> {
    info!("command edit");
    let patch = TaskPatch {
        text: args.text,
        recurrence: args
            .recurrence
            .as_deref()
            .map(Recurrence::from_str)
            .transpose()?,
        interaction: args
            .interaction
            .as_deref()
            .map(Interaction::from_str)
            .transpose()?,
        duration_goal: args.duration_goal,
    };
    if patch.is_empty() {
        return Err(anyhow!(
            "nothing to change; pass --text, --recur, --interaction or --goal"
        ));
    }

    let view = ctx.coordinator.refresh(ctx.session).await?;
    let id = resolve_task_ref(&view, &args.task)?;
    let task = ctx.coordinator.update(ctx.session, &id, patch).await?;
    println!("Modified task '{}'.", task.text);
    Ok(())
}

async fn cmd_toggle<S: TaskStore>(ctx: &CommandContext<'_, S>, reference: &str) -> anyhow::Result<()> {
    info!("command toggle");
    let entry = refreshed_entry(ctx, reference).await?;

    match click(ctx.coordinator, ctx.session, &entry).await? {
        Some(outcome) => ctx.renderer.print_toggle(outcome.edge, &outcome.task),
        None => Err(anyhow!(
            "'{}' completes by holding; use `forethought hold {reference}`",
            entry.task.text
        )),
    }
}

async fn cmd_hold<S: TaskStore>(ctx: &CommandContext<'_, S>, args: HoldArgs) -> anyhow::Result<()> {
    info!("command hold");
    let entry = refreshed_entry(ctx, &args.task).await?;

    let release = CancellationToken::new();
    let releaser = tokio::spawn(release_on_signal(release.clone(), args.release_after_ms));

    println!(
        "Holding '{}' for {:.1}s; press Ctrl-C to release.",
        entry.task.text,
        ctx.hold_duration.as_secs_f64()
    );
    let outcome = hold_to_complete(
        ctx.coordinator,
        ctx.session,
        &entry,
        ctx.hold_duration,
        release,
    )
    .await;
    releaser.abort();

    match outcome? {
        HoldOutcome::Committed(toggled) => ctx.renderer.print_toggle(toggled.edge, &toggled.task),
        HoldOutcome::Abandoned => {
            println!("Released early; '{}' unchanged.", entry.task.text);
            Ok(())
        }
        HoldOutcome::Rejected(HoldRejection::CheckboxTask) => Err(anyhow!(
            "'{}' completes by click; use `forethought toggle {}`",
            entry.task.text,
            args.task
        )),
        HoldOutcome::Rejected(rejection) => {
            Err(anyhow!("cannot hold '{}': {rejection}", entry.task.text))
        }
    }
}

async fn release_on_signal(token: CancellationToken, after_ms: Option<u64>) {
    let timeout = async {
        match after_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to listen for Ctrl-C");
                return;
            }
            debug!("released by Ctrl-C");
        }
        () = timeout => debug!("released by --release-after"),
    }
    token.cancel();
}

async fn cmd_delete<S: TaskStore>(ctx: &CommandContext<'_, S>, args: DeleteArgs) -> anyhow::Result<()> {
    info!("command delete");
    let entry = refreshed_entry(ctx, &args.task).await?;

    let risk = ctx
        .coordinator
        .deletion_risk(&entry.id)
        .unwrap_or(DeletionRisk::Plain);
    if matches!(risk, DeletionRisk::StreakAtRisk { .. }) && !args.confirm {
        ctx.renderer.print_deletion_warning(&entry.task.text, risk)?;
        return Err(anyhow!("deletion not confirmed"));
    }

    ctx.coordinator.delete(ctx.session, &entry.id).await?;
    println!("Deleted task '{}'.", entry.task.text);
    Ok(())
}

async fn cmd_info<S: TaskStore>(ctx: &CommandContext<'_, S>, reference: &str) -> anyhow::Result<()> {
    info!("command info");
    let entry = refreshed_entry(ctx, reference).await?;
    ctx.renderer.print_task_info(&entry)
}

async fn refreshed_entry<S: TaskStore>(
    ctx: &CommandContext<'_, S>,
    reference: &str,
) -> anyhow::Result<VisibleTask> {
    let view = ctx.coordinator.refresh(ctx.session).await?;
    let id = resolve_task_ref(&view, reference)?;
    let mut entry = view
        .find(&id)
        .or_else(|| view.find_task(id.task_uuid()))
        .cloned()
        .with_context(|| format!("no task matches '{reference}'"))?;
    // Keep the caller's id so an outdated projection is rejected downstream.
    entry.id = id;
    Ok(entry)
}

/// Resolve a list position, full visible id, or unique uuid prefix.
pub fn resolve_task_ref(view: &View, raw: &str) -> anyhow::Result<VisibleId> {
    let token = raw.trim();

    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        let position: usize = token
            .parse()
            .with_context(|| format!("invalid list position: {token}"))?;
        return position
            .checked_sub(1)
            .and_then(|idx| view.visible.get(idx))
            .map(|entry| entry.id)
            .ok_or_else(|| anyhow!("no task at position {position}"));
    }

    if let Ok(id) = VisibleId::from_str(token) {
        return Ok(id);
    }

    let prefix = token.to_ascii_lowercase();
    if prefix.len() < MIN_PREFIX_LEN {
        return Err(anyhow!(
            "task reference '{token}' is too short; use a list position or at least {MIN_PREFIX_LEN} uuid characters"
        ));
    }

    let mut matches = view
        .visible
        .iter()
        .filter(|entry| entry.id.task_uuid().to_string().starts_with(&prefix));
    let first = matches
        .next()
        .ok_or_else(|| anyhow!("no task matches '{token}'"))?;
    if matches.next().is_some() {
        return Err(anyhow!("task reference '{token}' is ambiguous"));
    }
    Ok(first.id)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::lifecycle::materialize;
    use crate::recurrence::ResetPolicy;
    use crate::task::Task;

    fn view_with(uuids: &[&str]) -> View {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).single().expect("valid");
        let stored: Vec<Task> = uuids
            .iter()
            .map(|raw| {
                let mut task = Task::new_active(TaskCreate::new("Read").validate().expect("valid"), now);
                task.uuid = Uuid::parse_str(raw).expect("uuid");
                task
            })
            .collect();
        let visible = materialize(&stored, &ResetPolicy::default(), now);
        View {
            stored,
            visible,
            materialized_at: Some(now),
        }
    }

    const A: &str = "aaaa1111-0000-4000-8000-000000000001";
    const B: &str = "aaaa2222-0000-4000-8000-000000000002";

    #[test]
    fn positions_are_one_based() {
        let view = view_with(&[A, B]);
        assert_eq!(
            resolve_task_ref(&view, "2").expect("position"),
            VisibleId::Stored(Uuid::parse_str(B).expect("uuid"))
        );
        assert!(resolve_task_ref(&view, "0").is_err());
        assert!(resolve_task_ref(&view, "3").is_err());
    }

    #[test]
    fn prefixes_must_be_unique() {
        let view = view_with(&[A, B]);
        assert_eq!(
            resolve_task_ref(&view, "AAAA1").expect("prefix"),
            VisibleId::Stored(Uuid::parse_str(A).expect("uuid"))
        );
        assert!(resolve_task_ref(&view, "aaaa").is_err());
        assert!(resolve_task_ref(&view, "aa").is_err());
        assert!(resolve_task_ref(&view, "ffff").is_err());
    }

    #[test]
    fn full_ids_pass_through() {
        let view = view_with(&[A]);
        let projected = format!("{B}:reset:20260601T000000Z");
        assert_eq!(
            resolve_task_ref(&view, &projected).expect("projected id"),
            projected.parse::<VisibleId>().expect("parse")
        );
    }
}
