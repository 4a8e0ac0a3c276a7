use std::io::Write as _;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use crossterm::event::{self as term, KeyCode, KeyEventKind};
use crossterm::style::{Stylize, style};
use crossterm::terminal;

use bulk_board::catalog::BatchAction;
use bulk_board::config::loader;
use bulk_board::config::types::AppConfig;
use bulk_board::coordinator::{
    ConfirmationPrompt, Coordinator, DecisionContext, Finished, Outcome, Phase,
};
use bulk_board::engine::{Engine, EngineHandle, Event, HttpEngine, Request, Retention};
use bulk_board::filter::FilterCriteria;
use bulk_board::notify::{Notification, NotificationSink, Severity};
use bulk_board::selection::Selection;
use bulk_board::subworkflow::HeadlessLauncher;
use bulk_board::types::{ItemId, ItemLookup};

#[derive(Parser)]
#[command(name = "bulk-board", version, about = "Batch actions over a filtered listing")]
struct Cli {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging to debug.log.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the batch actions and how each one is routed.
    Actions,
    /// Show the items matching a filter.
    List {
        /// Filter query, e.g. "workspace:3 state:active,paused".
        #[arg(short, long, default_value = "")]
        filter: String,
    },
    /// Apply a batch action to a selection.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Action to apply (archive, kill, move, retain-logs, ...).
    action: BatchAction,

    /// Explicitly selected item ids.
    #[arg(long, value_delimiter = ',', conflicts_with = "all")]
    ids: Vec<u64>,

    /// Select everything matching the filter.
    #[arg(long)]
    all: bool,

    /// Ids to leave out of an --all selection.
    #[arg(long, value_delimiter = ',', requires = "all")]
    exclude: Vec<u64>,

    /// Filter query defining the listed collection.
    #[arg(short, long, default_value = "")]
    filter: String,

    /// Skip the interactive confirmation.
    #[arg(short, long)]
    yes: bool,

    /// Destination project for `move`.
    #[arg(long)]
    project: Option<u64>,

    /// Keep logs for this many days (`retain-logs`).
    #[arg(long, conflicts_with = "retain_forever")]
    retain_days: Option<u32>,

    /// Keep logs forever (`retain-logs`).
    #[arg(long)]
    retain_forever: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing.
    if cli.debug {
        let file = std::fs::File::create("debug.log")?;
        tracing_subscriber::fmt()
            .with_writer(file)
            .with_ansi(false)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
    }

    if let Commands::Actions = cli.command {
        print_actions();
        return Ok(());
    }

    let config = loader::load_config(cli.config.as_deref())?;

    // The engine runs on its own thread and stops once every handle is dropped.
    let engine = HttpEngine::new(config.service.clone()).start();
    tracing::info!("bulk-board starting");

    match cli.command {
        Commands::Actions => Ok(()),
        Commands::List { filter } => list_items(&config, &engine, &FilterCriteria::parse(&filter)),
        Commands::Run(args) => run_batch(&config, engine, args),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn print_actions() {
    for action in BatchAction::ALL {
        let meta = action.meta();
        let mut flags = Vec::new();
        if meta.delegates_to_subworkflow {
            flags.push("sub-workflow");
        } else if meta.requires_confirmation {
            flags.push("confirm");
        } else {
            flags.push("immediate");
        }
        if meta.destructive {
            flags.push("destructive");
        }
        if meta.requires_concrete_targets {
            flags.push("explicit ids only");
        }
        println!("{:<14} {:<14} {}", action.name(), action.label(), flags.join(", "));
    }
}

fn list_items(config: &AppConfig, engine: &EngineHandle, criteria: &FilterCriteria) -> Result<()> {
    let lookup = fetch_items(engine, criteria, config)?;
    for item in lookup.iter() {
        let started = item
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let mut flags = String::new();
        if item.archived {
            flags.push_str(" archived");
        }
        if !item.managed {
            flags.push_str(" unmanaged");
        }
        println!(
            "{:>8}  {:<32} {:<10} ws={:<4} {:<12} {started}{flags}",
            item.id.to_string(),
            item.name,
            item.state.as_str(),
            item.workspace_id.to_string(),
            item.owner,
        );
    }
    println!(
        "{} of {} {}",
        lookup.len(),
        lookup.knowable_total(),
        config.display.label_plural
    );
    Ok(())
}

fn run_batch(config: &AppConfig, engine: EngineHandle, args: RunArgs) -> Result<()> {
    let criteria = FilterCriteria::parse(&args.filter);
    let selection = if args.all {
        Selection::all_except(args.exclude.iter().copied().map(ItemId))
    } else if args.ids.is_empty() {
        bail!("nothing selected: pass --ids or --all");
    } else {
        Selection::explicit(args.ids.iter().copied().map(ItemId))
    };

    let lookup = fetch_items(&engine, &criteria, config)?;
    let permissions = config.permission_view();
    let ctx = DecisionContext {
        lookup: &lookup,
        permissions: permissions.as_ref(),
    };

    let mut launcher = HeadlessLauncher::new(engine.clone());
    launcher.destination_project_id = args.project;
    launcher.retention = if args.retain_forever {
        Some(Retention { days: None })
    } else {
        args.retain_days.map(|days| Retention { days: Some(days) })
    };
    let wait_for = launcher
        .timeout
        .max(Duration::from_secs(config.service.timeout_secs))
        + Duration::from_secs(5);

    let mut coordinator = Coordinator::new(
        engine,
        Box::new(launcher),
        Box::new(ConsoleSink),
        Box::new(|action: BatchAction, ids: &[ItemId]| {
            tracing::info!("{} applied to {} items", action.name(), ids.len());
        }),
    )
    .with_label_plural(config.display.label_plural.clone());
    coordinator.set_criteria(criteria);
    coordinator.set_selection(selection);

    let available = coordinator.available_actions(ctx);
    tracing::debug!("available actions: {available:?}");

    let outcome = coordinator.request_action(args.action, ctx)?;
    if let Outcome::AwaitingConfirmation(prompt) = outcome {
        if args.yes || ask_confirmation(&prompt)? {
            coordinator.confirm()?;
        } else {
            coordinator.cancel()?;
            println!("Cancelled.");
            return Ok(());
        }
    }

    for finished in coordinator.wait(wait_for) {
        if let Finished::SubWorkflowCancelled { action } = finished {
            println!(
                "{} was cancelled; nothing changed (missing --project or --retain-* flag?).",
                action.label()
            );
        }
    }
    if let Phase::Dispatching(action) = coordinator.phase() {
        bail!(
            "timed out waiting for {}; the batch may still be running",
            action.label()
        );
    }
    if coordinator.pending_subworkflows() > 0 {
        bail!("timed out waiting for {}", args.action.label());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fetch_items(
    engine: &EngineHandle,
    criteria: &FilterCriteria,
    config: &AppConfig,
) -> Result<ItemLookup> {
    let (reply_tx, reply_rx) = mpsc::channel();
    let sent = engine.send(Request::FetchItems {
        filter: criteria.clone(),
        limit: config.service.page_limit,
        reply_tx,
    });
    if !sent {
        bail!("the batch engine is not running");
    }
    let timeout = Duration::from_secs(config.service.timeout_secs) + Duration::from_secs(5);
    match reply_rx
        .recv_timeout(timeout)
        .context("waiting for the item listing")?
    {
        Event::ItemsFetched { items, total } => Ok(ItemLookup::new(items).with_total(total)),
        Event::FetchError { message, .. } => bail!("fetching {}: {message}", config.display.label_plural),
        other => bail!("unexpected engine reply: {other:?}"),
    }
}

/// Show the confirmation surface and read a single y/n key.
fn ask_confirmation(prompt: &ConfirmationPrompt) -> Result<bool> {
    let title = if prompt.destructive {
        style(&prompt.title).red().bold()
    } else {
        style(&prompt.title).bold()
    };
    println!("{title}");
    println!("{}", prompt.body);
    print!("Proceed? [y/N] ");
    std::io::stdout().flush()?;

    terminal::enable_raw_mode()?;
    let answer = read_yes_no();
    terminal::disable_raw_mode()?;
    println!();
    answer
}

fn read_yes_no() -> Result<bool> {
    loop {
        if let term::Event::Key(key) = term::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('y' | 'Y') => return Ok(true),
                KeyCode::Char('n' | 'N') | KeyCode::Esc | KeyCode::Enter => return Ok(false),
                _ => {}
            }
        }
    }
}

/// Prints notifications as they arrive.
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn notify(&mut self, notification: Notification) {
        let stamp = notification.at.format("%H:%M:%S");
        let title = match notification.severity {
            Severity::Info => style(&notification.title).green(),
            Severity::Warning => style(&notification.title).yellow(),
            Severity::Error => style(&notification.title).red(),
        };
        println!("[{stamp}] {title}: {}", notification.description);
    }
}
