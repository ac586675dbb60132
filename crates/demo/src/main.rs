//! Lode demo binary.
//!
//! Loads a user page (profile and posts) through a [`Loadable`] and logs each
//! view change, the way a view layer would re-render on each one.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use lode_loader::{LoadConfig, LoadRegistry, Loadable, LoaderSet, Mode, RemoteError, View};
use serde_json::{Value, json};
use tracing::{info, warn};

/// Demo command line arguments.
#[derive(Parser, Debug)]
#[command(name = "lode-demo")]
#[command(about = "Load a user page through a keyed loader")]
struct Args {
	/// User to load
	#[arg(long, default_value_t = 42)]
	user: u64,

	/// Loader configuration file (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Run the page loaders one after another
	#[arg(long)]
	serial: bool,

	/// Simulated backend latency in milliseconds
	#[arg(long, default_value_t = 300)]
	latency_ms: u64,

	/// Make the posts loader answer 404
	#[arg(long)]
	missing_posts: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[derive(Debug, Clone)]
struct PageArgs {
	user_id: u64,
	latency: Duration,
	missing_posts: bool,
}

fn page_loaders() -> LoaderSet<PageArgs, Value> {
	LoaderSet::named()
		.with("profile", |args: PageArgs| async move {
			tokio::time::sleep(args.latency).await;
			Ok(json!({"id": args.user_id, "name": "Ann"}))
		})
		.with("posts", |args: PageArgs| async move {
			tokio::time::sleep(args.latency / 2).await;
			if args.missing_posts {
				return Err(anyhow::Error::new(RemoteError::status(404, format!("no posts for user {}", args.user_id))));
			}
			Ok(json!([{"id": 1, "author": args.user_id, "title": "hello"}]))
		})
		.build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let mut config = match &args.config {
		Some(path) => LoadConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => LoadConfig::default(),
	};
	if args.serial {
		config = config.with_mode(Mode::Serial);
	}
	info!(mode = ?config.mode, delay = ?config.delay, timeout = ?config.timeout, "starting lode-demo");

	let registry = LoadRegistry::new();
	let page_args = PageArgs {
		user_id: args.user,
		latency: Duration::from_millis(args.latency_ms),
		missing_posts: args.missing_posts,
	};
	let id = format!("user:{}", args.user);
	let mut page = Loadable::new(registry.clone(), &id, page_loaders(), config)?;

	let mut view = page.poll(page_args.clone())?;
	loop {
		match view {
			View::Loading { past_delay } => {
				info!(key = %page.key(), past_delay, "loading");
				view = page.next(page_args.clone()).await?;
			}
			View::Ready(loaded) => {
				let values: serde_json::Map<String, Value> = loaded.into_named().unwrap_or_default().into_iter().collect();
				println!("{}", serde_json::to_string_pretty(&Value::Object(values))?);
				break;
			}
			View::Failed(failure) if failure.is_not_found() => {
				warn!(key = %page.key(), loader = ?failure.loader(), "not found");
				println!("not found: {failure}");
				page.reset();
				break;
			}
			View::Failed(failure) => return Err(failure.into()),
			View::TimedOut(failure) => {
				page.reset();
				return Err(failure.into());
			}
		}
	}

	info!(operations = registry.len(), "done");
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("lode_loader=trace,lode_demo=debug,info")
		} else {
			EnvFilter::new("lode_demo=info,warn")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();
}
