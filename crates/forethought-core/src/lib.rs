pub mod auth;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod error;
pub mod hold;
pub mod lifecycle;
pub mod recurrence;
pub mod render;
pub mod store;
pub mod task;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::auth::{
  Session,
  StaticCredentials
};
use crate::clock::{
  Clock,
  FixedClock,
  SystemClock
};
use crate::lifecycle::Coordinator;
use crate::recurrence::ResetPolicy;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting forethought CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let timezone =
    datetime::resolve_timezone(
      cfg.get("timezone").as_deref()
    );
  let policy = ResetPolicy::new(
    timezone
  )
  .with_week_start(cfg.week_start()?);
  let hold_duration =
    cfg.hold_duration()?;

  let clock: Arc<dyn Clock> =
    match cli.now.as_deref() {
      | Some(expr) => {
        let pinned =
          datetime::parse_date_expr(
            expr,
            Utc::now(),
            timezone
          )
          .with_context(|| {
            format!(
              "invalid --now value: \
               {expr}"
            )
          })?;
        info!(now = %pinned, "clock pinned");
        Arc::new(FixedClock::new(
          pinned
        ))
      }
      | None => Arc::new(SystemClock)
    };

  let coordinator = Coordinator::new(
    store, policy, clock
  );
  let session = Session::new(Arc::new(
    StaticCredentials::from_config(
      &cfg
    )
  ));
  let renderer =
    render::Renderer::new(
      &cfg, timezone
    )?;

  let command = cli
    .command
    .unwrap_or(cli::Command::List);

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;

  runtime.block_on(async {
    let ctx =
      commands::CommandContext {
        coordinator: &coordinator,
        session: &session,
        renderer: &renderer,
        hold_duration
      };
    commands::dispatch(&ctx, command)
      .await
  })?;

  info!("done");
  Ok(())
}
