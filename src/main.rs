//! Operator CLI for the permission sync job queue.

use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use clap::{Args, Parser, Subcommand};
use permsync::{
    config::ConfigLoader,
    db,
    models::{JobPriority, JobState, ReasonGroup, Subject, SyncReason},
    pagination::{OrderField, PaginationArgs},
    repositories::{
        CancelSelector, JobOptions, ListOptions, PermissionSyncJobStore, SearchType,
        SubjectRepository,
    },
    telemetry,
};

mod commands;

#[derive(Parser)]
#[command(name = "permsync")]
#[command(about = "Inspect and drive the permission sync job queue", long_about = None)]
struct Cli {
    /// Database URL (overrides PERMSYNC_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Request a permission sync
    Enqueue {
        #[command(subcommand)]
        subject: EnqueueSubject,
    },
    /// Cancel queued jobs
    Cancel {
        #[command(flatten)]
        target: CancelTarget,
        /// Recorded cancellation reason
        #[arg(long, default_value = "canceled by operator")]
        reason: String,
    },
    /// List jobs
    List {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        page: PageArgs,
        /// Show each queued job's position in the queue
        #[arg(long)]
        place_in_queue: bool,
    },
    /// Count jobs
    Count {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Show the most recently finished job
    Latest {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Count users and repositories whose latest sync failed
    Failing,
}

#[derive(Subcommand)]
enum EnqueueSubject {
    /// Sync a user's permissions
    User {
        /// User ID
        id: i32,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Sync a repository's permissions
    Repo {
        /// Repository ID
        id: i32,
        #[command(flatten)]
        job: JobArgs,
    },
}

#[derive(Args)]
struct JobArgs {
    /// Trigger reason, e.g. REASON_MANUAL_USER_SYNC
    #[arg(long)]
    reason: SyncReason,
    /// low, medium or high
    #[arg(long, default_value = "low")]
    priority: JobPriority,
    /// Delay processing until this RFC 3339 timestamp
    #[arg(long)]
    process_after: Option<DateTime<FixedOffset>>,
    #[arg(long)]
    invalidate_caches: bool,
    #[arg(long)]
    no_perms: bool,
    /// ID of the user requesting the sync
    #[arg(long)]
    triggered_by: Option<i32>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct CancelTarget {
    /// Job ID
    #[arg(long)]
    job: Option<i32>,
    /// Cancel every queued job of this user
    #[arg(long)]
    user: Option<i32>,
    /// Cancel every queued job of this repository
    #[arg(long)]
    repo: Option<i32>,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    id: Option<i32>,
    #[arg(long)]
    user: Option<i32>,
    #[arg(long)]
    repo: Option<i32>,
    #[arg(long)]
    state: Option<JobState>,
    #[arg(long)]
    reason: Option<SyncReason>,
    /// MANUAL, WEBHOOK, SCHEDULE or INTERNAL
    #[arg(long)]
    reason_group: Option<ReasonGroup>,
    /// Only completed jobs that failed against some code host
    #[arg(long)]
    partial_success: bool,
    /// Only jobs without a process_after delay
    #[arg(long, conflicts_with = "delayed")]
    immediate: bool,
    /// Only jobs with a process_after delay
    #[arg(long)]
    delayed: bool,
    #[arg(long)]
    not_canceled: bool,
    /// Restrict to user or repo jobs; with --query, search their names
    #[arg(long)]
    search: Option<SearchType>,
    /// Case-insensitive substring matched against names
    #[arg(long)]
    query: Option<String>,
}

impl FilterArgs {
    fn into_options(self) -> ListOptions {
        ListOptions {
            id: self.id,
            user_id: self.user,
            repo_id: self.repo,
            state: self.state,
            reason: self.reason,
            reason_group: self.reason_group,
            partial_success: self.partial_success,
            null_process_after: self.immediate,
            not_null_process_after: self.delayed,
            not_canceled: self.not_canceled,
            search_type: self.search,
            query: self.query,
            pagination: None,
        }
    }
}

#[derive(Args)]
struct PageArgs {
    /// Page size (defaults to PERMSYNC_QUEUE_PAGE_SIZE)
    #[arg(long, conflicts_with = "last")]
    first: Option<u64>,
    /// Page from the end
    #[arg(long)]
    last: Option<u64>,
    #[arg(long)]
    after: Option<String>,
    #[arg(long)]
    before: Option<String>,
    /// Comma-separated order fields, e.g. queued_at,id
    #[arg(long, value_delimiter = ',')]
    order_by: Vec<OrderField>,
    #[arg(long)]
    desc: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    telemetry::init_tracing(&config).context("failed to initialize tracing")?;
    tracing::debug!(
        profile = %config.profile,
        config = %config.redacted_json()?,
        "Loaded configuration"
    );

    let db = db::init_pool(&config).await?;
    let store = PermissionSyncJobStore::new(db.clone())
        .with_conflict_retries(config.queue.conflict_retries);
    let subjects = SubjectRepository::new(db.clone());

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&db).await?;
            println!("migrations applied");
        }
        Commands::Enqueue { subject } => {
            let (subject, job) = match subject {
                EnqueueSubject::User { id, job } => (Subject::User(id), job),
                EnqueueSubject::Repo { id, job } => (Subject::Repo(id), job),
            };
            commands::enqueue(&store, subject, job.into_options()).await?;
        }
        Commands::Cancel { target, reason } => {
            commands::cancel(&store, target.into_selector()?, &reason).await?;
        }
        Commands::List {
            filters,
            page,
            place_in_queue,
        } => {
            let mut opts = filters.into_options();
            opts.pagination = Some(page.into_pagination(config.queue.page_size));
            commands::list(&store, &subjects, &opts, place_in_queue).await?;
        }
        Commands::Count { filters } => {
            commands::count(&store, &filters.into_options()).await?;
        }
        Commands::Latest { filters } => {
            commands::latest(&store, &subjects, &filters.into_options()).await?;
        }
        Commands::Failing => {
            commands::failing(&store).await?;
        }
    }

    Ok(())
}

impl JobArgs {
    fn into_options(self) -> JobOptions {
        let mut opts = JobOptions::new(self.reason).priority(self.priority);
        if let Some(at) = self.process_after {
            opts = opts.process_after(at);
        }
        if self.invalidate_caches {
            opts = opts.invalidate_caches();
        }
        if self.no_perms {
            opts = opts.no_perms();
        }
        if let Some(user_id) = self.triggered_by {
            opts = opts.triggered_by(user_id);
        }
        opts
    }
}

impl CancelTarget {
    fn into_selector(self) -> anyhow::Result<CancelSelector> {
        match (self.job, self.user, self.repo) {
            (Some(id), None, None) => Ok(CancelSelector::Job(id)),
            (None, Some(id), None) => Ok(CancelSelector::Subject(Subject::User(id))),
            (None, None, Some(id)) => Ok(CancelSelector::Subject(Subject::Repo(id))),
            _ => anyhow::bail!("exactly one of --job, --user or --repo is required"),
        }
    }
}

impl PageArgs {
    fn into_pagination(self, default_page_size: u64) -> PaginationArgs {
        let first = match (self.first, self.last) {
            (None, None) => Some(default_page_size),
            (first, _) => first,
        };
        PaginationArgs {
            first,
            last: self.last,
            after: self.after,
            before: self.before,
            order_by: self.order_by,
            ascending: !self.desc,
        }
    }
}
