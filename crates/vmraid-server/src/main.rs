// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `vmraid` operator binary: scheduler, workers and site maintenance.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vmraid_server::commands::{self, SchedulerAction};
use vmraid_server::{version, AppState};
use vmraid_server_config::{LogFormat, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "vmraid", about = "VMRaid scheduler, workers and site maintenance", version)]
struct Args {
	/// Config file (defaults to /etc/vmraid/server.toml)
	#[arg(long, global = true, env = "VMRAID_CONFIG")]
	config: Option<PathBuf>,

	/// Site to act on; repeat for several. Defaults to every configured site.
	#[arg(long = "site", global = true)]
	sites: Vec<String>,

	#[command(subcommand)]
	command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SchedulerState {
	Pause,
	Resume,
	Enable,
	Disable,
}

impl From<SchedulerState> for SchedulerAction {
	fn from(state: SchedulerState) -> Self {
		match state {
			SchedulerState::Pause => SchedulerAction::Pause,
			SchedulerState::Resume => SchedulerAction::Resume,
			SchedulerState::Enable => SchedulerAction::Enable,
			SchedulerState::Disable => SchedulerAction::Disable,
		}
	}
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Enable the scheduler
	EnableScheduler,
	/// Disable the scheduler
	DisableScheduler,
	/// Pause, resume, enable or disable the scheduler
	Scheduler {
		#[arg(value_enum)]
		state: SchedulerState,
	},
	/// Run a scheduled job type now
	TriggerSchedulerEvent { event: String },
	/// Scheduler status and pending jobs
	Doctor,
	/// List queued jobs per queue and site
	ShowPendingJobs,
	/// Delete queued jobs
	PurgeJobs {
		#[arg(long)]
		queue: Option<String>,
		#[arg(long)]
		event: Option<String>,
	},
	/// Run the scheduler poller
	Schedule,
	/// Run background workers
	Worker {
		/// Queues to consume, comma separated. Defaults to all.
		#[arg(long, value_delimiter = ',')]
		queue: Vec<String>,
		/// Exit once the queues are empty
		#[arg(long)]
		burst: bool,
	},
	/// Exit non-zero while jobs are pending
	ReadyForMigration,
	/// Sync scheduled job types with declared scheduler events
	SyncJobs,
	/// Rebuild nested-set intervals of a tree doctype
	RebuildTree {
		doctype: String,
		/// Parent column (defaults to parent_<doctype>)
		#[arg(long)]
		parent_field: Option<String>,
	},
	/// Clear user and domain caches, or one doctype's cache
	ClearCache {
		#[arg(long)]
		user: Option<String>,
		#[arg(long)]
		doctype: Option<String>,
	},
	/// Show version and build information
	Version,
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => vmraid_server_config::load_config_with_file(path)?,
		None => vmraid_server_config::load_config()?,
	};
	init_tracing(&config.logging);

	tracing::info!(
		sites = config.sites.sites.len(),
		queue = %config.queue.database_url,
		cache = config.cache.backend.as_str(),
		"starting vmraid"
	);

	let app = AppState::build(config).await?;
	let sites = &args.sites;

	match args.command {
		Command::EnableScheduler => {
			commands::set_scheduler(&app, sites, SchedulerAction::Enable).await?
		}
		Command::DisableScheduler => {
			commands::set_scheduler(&app, sites, SchedulerAction::Disable).await?
		}
		Command::Scheduler { state } => commands::set_scheduler(&app, sites, state.into()).await?,
		Command::TriggerSchedulerEvent { event } => {
			commands::trigger_scheduler_event(&app, sites, &event).await?
		}
		Command::Doctor => commands::doctor_cmd(&app, sites).await?,
		Command::ShowPendingJobs => commands::show_pending_jobs(&app, sites).await?,
		Command::PurgeJobs { queue, event } => {
			commands::purge_jobs(&app, sites, queue.as_deref(), event.as_deref()).await?;
		}
		Command::Schedule => commands::schedule(&app).await?,
		Command::Worker { queue, burst } => commands::worker(&app, &queue, burst).await?,
		Command::ReadyForMigration => commands::ready_for_migration(&app, sites).await?,
		Command::SyncJobs => {
			commands::sync_jobs_cmd(&app, sites).await?;
		}
		Command::RebuildTree {
			doctype,
			parent_field,
		} => commands::rebuild_tree(&app, sites, &doctype, parent_field.as_deref()).await?,
		Command::ClearCache { user, doctype } => {
			commands::clear_cache(&app, sites, user.as_deref(), doctype.as_deref()).await?
		}
		Command::Version => {}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn test_cli_is_well_formed() {
		Args::command().debug_assert();
	}

	#[test]
	fn test_every_subcommand_has_help() {
		let command = Args::command();
		let missing: Vec<&str> = command
			.get_subcommands()
			.filter(|sub| sub.get_about().is_none())
			.map(|sub| sub.get_name())
			.collect();
		assert!(missing.is_empty(), "subcommands without help: {missing:?}");
	}

	#[test]
	fn test_worker_queues_split_on_commas() {
		let args = Args::try_parse_from(["vmraid", "--site", "a", "worker", "--queue", "short,long"]).unwrap();
		assert_eq!(args.sites, vec!["a"]);
		match args.command {
			Command::Worker { queue, burst } => {
				assert_eq!(queue, vec!["short", "long"]);
				assert!(!burst);
			}
			other => panic!("unexpected command {other:?}"),
		}
	}
}
