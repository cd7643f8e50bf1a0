/*!
TaskFlow CLI - command-line front end for TaskFlow task storage.

Manages tasks in a file-backed namespace and exposes the storage tooling:
export/import, usage estimation and backup inspection/recovery.
*/

use anyhow::{anyhow, bail, Context};
use chrono::{Local, NaiveDate, TimeZone};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use taskflow_core::{
    init_observability_with_filter, read_export_file, Category, FileStore, GzipCompressor, KeyValueStore,
    NewTask, NoCompression, PersistentStore, Priority, Status, StoreConfig, Task, TaskFilter,
    TaskPatch, TaskRepository, UsageScope,
};
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "taskflow")]
#[command(about = "Local-first task manager with versioned storage and rolling backups")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Namespace document holding all stored keys
    #[arg(
        short,
        long,
        global = true,
        env = "TASKFLOW_STORE",
        default_value = "taskflow-store.json"
    )]
    store: PathBuf,

    /// Backups kept per key
    #[arg(long, global = true, env = "TASKFLOW_BACKUP_RETENTION")]
    retention: Option<usize>,

    /// Count only TaskFlow's own keys when estimating usage
    #[arg(long, global = true)]
    owned_usage: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task
    Add {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(short, long, default_value = "other")]
        category: Category,
        #[arg(short, long, default_value = "medium")]
        priority: Priority,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// List tasks, optionally filtered
    List {
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        category: Option<Category>,
        /// Case-insensitive text to find in title or description
        #[arg(long)]
        search: Option<String>,
        /// Only tasks past their due date and not done
        #[arg(long)]
        overdue: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one task
    Show {
        /// Task id or unique id prefix
        id: String,
    },
    /// Change fields of a task
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<NaiveDate>,
        #[arg(long)]
        clear_due: bool,
    },
    /// Set the status of a task
    Status { id: String, status: Status },
    /// Move a task to a position in the list (0 = first)
    Move { id: String, index: usize },
    /// Delete a task
    Remove {
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Task counts per status
    Stats,
    /// List categories, or add one
    Categories {
        /// Name of a category to add
        #[arg(long)]
        add: Option<String>,
        #[arg(long, requires = "add")]
        color: Option<String>,
    },
    /// Write all collections to taskapp_export_{date}.json
    Export {
        /// Directory to write the export into
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Gzip the export file
        #[arg(long)]
        gzip: bool,
        /// Print the export document instead of writing a file
        #[arg(long, conflicts_with_all = ["gzip"])]
        stdout: bool,
    },
    /// Load collections from an export file
    Import {
        file: PathBuf,
        /// Append to stored collections instead of replacing them
        #[arg(short, long)]
        merge: bool,
    },
    /// Estimated share of the storage quota in use
    Usage,
    /// List backups of a key
    Backups {
        #[arg(default_value = "tasks")]
        key: String,
    },
    /// Overwrite a key with its newest backup
    Restore {
        key: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Due")]
    due: String,
}

impl TaskRow {
    fn new(task: &Task, today: NaiveDate) -> Self {
        let overdue = task.is_overdue(today);
        Self {
            id: short_id(&task.id).to_string(),
            title: task.title.clone(),
            status: task.status.to_string(),
            priority: task.priority.to_string(),
            category: task.category.to_string(),
            due: match task.due_date {
                Some(due) if overdue => format!("{due} (overdue)"),
                Some(due) => due.to_string(),
                None => "-".to_string(),
            },
        }
    }
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "Backup Key")]
    key: String,
    #[tabled(rename = "Taken")]
    taken: String,
    #[tabled(rename = "Size")]
    size: String,
}

type Store = PersistentStore<FileStore>;

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.json_logs)?;

    let store = open_store(&cli)?;

    let result = run(&store, cli.command);
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

fn run(store: &Store, command: Commands) -> Result<(), anyhow::Error> {
    match command {
        Commands::Add {
            title,
            description,
            category,
            priority,
            due,
        } => {
            let mut new_task = NewTask::new(title)
                .with_description(description)
                .with_category(category)
                .with_priority(priority);
            if let Some(due) = due {
                new_task = new_task.with_due_date(due);
            }
            let task = TaskRepository::new(store).create(new_task)?;
            println!("✓ Created task {} ({})", short_id(&task.id), task.title);
        }
        Commands::List {
            status,
            priority,
            category,
            search,
            overdue,
            json,
        } => {
            let filter = TaskFilter {
                status,
                priority,
                category,
                search,
                overdue_only: overdue,
            };
            list_tasks(store, &filter, json)?;
        }
        Commands::Show { id } => show_task(store, &id)?,
        Commands::Edit {
            id,
            title,
            description,
            category,
            priority,
            status,
            due,
            clear_due,
        } => {
            let patch = TaskPatch {
                title,
                description,
                category,
                status,
                priority,
                due_date: if clear_due { Some(None) } else { due.map(Some) },
            };
            if patch.is_empty() {
                bail!("Nothing to change; pass at least one field to edit");
            }
            let repo = TaskRepository::new(store);
            let id = resolve_id(&repo, &id)?;
            let task = repo.update(&id, patch)?;
            println!("✓ Updated task {} ({})", short_id(&task.id), task.title);
        }
        Commands::Status { id, status } => {
            let repo = TaskRepository::new(store);
            let id = resolve_id(&repo, &id)?;
            let task = repo.set_status(&id, status)?;
            println!("✓ {} is now {}", task.title, task.status);
        }
        Commands::Move { id, index } => {
            let repo = TaskRepository::new(store);
            let id = resolve_id(&repo, &id)?;
            let tasks = repo.reorder(&id, index)?;
            print_tasks(&tasks, repo.today());
        }
        Commands::Remove { id, force } => {
            let repo = TaskRepository::new(store);
            let id = resolve_id(&repo, &id)?;
            let task = repo.get(&id)?;
            if !force && !confirm(&format!("Delete task '{}'?", task.title))? {
                println!("Deletion cancelled");
                return Ok(());
            }
            repo.delete(&id)?;
            println!("✓ Task deleted");
        }
        Commands::Stats => {
            let stats = TaskRepository::new(store).stats();
            println!("Total:       {}", stats.total);
            println!("Todo:        {}", stats.todo);
            println!("In progress: {}", stats.in_progress);
            println!("Done:        {}", stats.done);
            println!("Overdue:     {}", stats.overdue);
        }
        Commands::Categories { add, color } => {
            let repo = TaskRepository::new(store);
            if let Some(name) = add {
                let record = repo.add_category(name, color)?;
                println!("✓ Added category {}", record.name);
            }
            for category in repo.categories() {
                match &category.color {
                    Some(color) => println!("{} ({color})", category.name),
                    None => println!("{}", category.name),
                }
            }
        }
        Commands::Export { dir, gzip, stdout } => {
            if stdout {
                let document = store.export_data();
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                let path = if gzip {
                    store.write_export(&dir, &GzipCompressor::new())?
                } else {
                    store.write_export(&dir, &NoCompression)?
                };
                println!("✓ Exported to {}", path.display());
            }
        }
        Commands::Import { file, merge } => {
            let document = read_export_file(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = store.try_import(&document, merge)?;
            println!(
                "✓ Imported {} tasks and {} categories ({}); now {} tasks, {} categories",
                summary.tasks_imported,
                summary.categories_imported,
                if summary.merged { "merged" } else { "replaced" },
                summary.total_tasks,
                summary.total_categories
            );
        }
        Commands::Usage => {
            let report = store.try_usage_report()?;
            println!(
                "{:.2}% of quota used ({} of {} across {} keys)",
                report.percent,
                format_size(report.used),
                format_size(report.quota),
                report.keys
            );
            if report.percent > store.config().near_limit_percent {
                println!("⚠ Storage is nearly full; export and prune old tasks");
            }
        }
        Commands::Backups { key } => list_backups(store, &key)?,
        Commands::Restore { key, force } => {
            if !force && !confirm(&format!("Overwrite '{key}' with its newest backup?"))? {
                println!("Restore cancelled");
                return Ok(());
            }
            store.restore_primary(&key)?;
            println!("✓ Restored '{key}' from backup");
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<(), anyhow::Error> {
    let default_filter = if verbose { "debug" } else { "warn" };
    init_observability_with_filter(json, default_filter).context("Failed to initialize logging")
}

fn open_store(cli: &Cli) -> Result<Store, anyhow::Error> {
    let mut config = StoreConfig::file(&cli.store);
    if let Some(retention) = cli.retention {
        config = config.with_backup_retention(retention);
    }
    if cli.owned_usage {
        config = config.with_usage_scope(UsageScope::Owned);
    }
    config.validate()?;

    let file_store = FileStore::open_with_quota(&cli.store, config.store_quota())
        .with_context(|| format!("Failed to open store {}", cli.store.display()))?;
    debug!(store = %cli.store.display(), "Opened store");
    Ok(PersistentStore::new(file_store, config))
}

fn list_tasks(store: &Store, filter: &TaskFilter, json: bool) -> Result<(), anyhow::Error> {
    let repo = TaskRepository::new(store);
    let tasks = repo.filter(filter);
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else if tasks.is_empty() {
        println!("No tasks found");
    } else {
        print_tasks(&tasks, repo.today());
    }
    Ok(())
}

fn print_tasks(tasks: &[Task], today: NaiveDate) {
    let rows: Vec<TaskRow> = tasks.iter().map(|task| TaskRow::new(task, today)).collect();
    println!("{}", Table::new(rows));
}

fn show_task(store: &Store, id: &str) -> Result<(), anyhow::Error> {
    let repo = TaskRepository::new(store);
    let task = repo.get(&resolve_id(&repo, id)?)?;

    println!("Task Details:");
    println!("  ID: {}", task.id);
    println!("  Title: {}", task.title);
    if !task.description.is_empty() {
        println!("  Description: {}", task.description);
    }
    println!("  Status: {}", task.status);
    println!("  Priority: {}", task.priority);
    println!("  Category: {}", task.category);
    if let Some(due) = task.due_date {
        println!("  Due: {due}");
    }
    println!("  Position: {}", task.order);
    println!("  Created: {}", format_timestamp(task.created_at.timestamp_millis()));
    println!("  Updated: {}", format_timestamp(task.updated_at.timestamp_millis()));
    if let Some(attachments) = &task.attachments {
        println!("  Attachments: {}", attachments.len());
    }
    Ok(())
}

fn list_backups(store: &Store, key: &str) -> Result<(), anyhow::Error> {
    let backups = store.list_backups(key)?;
    if backups.is_empty() {
        println!("No backups found for '{key}'");
        return Ok(());
    }

    let rows: Vec<BackupRow> = backups
        .iter()
        .map(|backup| {
            let size = match store.store().get(&backup.storage_key) {
                Ok(Some(text)) => format_size(text.len()),
                _ => "Unknown".to_string(),
            };
            BackupRow {
                key: backup.storage_key.clone(),
                taken: format_timestamp(backup.stamp),
                size,
            }
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

/// Accept a full task id or a prefix matching exactly one task
fn resolve_id<S>(repo: &TaskRepository<'_, S>, id: &str) -> Result<String, anyhow::Error>
where
    S: taskflow_core::KeyValueStore,
{
    let matches: Vec<String> = repo
        .list()
        .into_iter()
        .map(|t| t.id)
        .filter(|candidate| candidate.starts_with(id))
        .collect();

    match matches.as_slice() {
        [only] => Ok(only.clone()),
        [] => Err(anyhow!("No task matches '{id}'")),
        _ if matches.iter().any(|m| m == id) => Ok(id.to_string()),
        _ => Err(anyhow!("'{id}' matches {} tasks; use more characters", matches.len())),
    }
}

fn confirm(prompt: &str) -> Result<bool, anyhow::Error> {
    print!("{prompt} (y/N): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_lowercase().starts_with('y'))
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_size(units: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = units as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", units, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => millis.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_cli_parses_filters() {
        let cli = Cli::try_parse_from([
            "taskflow",
            "--store",
            "/tmp/s.json",
            "list",
            "--status",
            "in-progress",
            "--category",
            "work",
            "--overdue",
        ])
        .unwrap();

        match cli.command {
            Commands::List {
                status,
                category,
                overdue,
                ..
            } => {
                assert_eq!(status, Some(Status::InProgress));
                assert_eq!(category, Some(Category::Work));
                assert!(overdue);
            }
            _ => panic!("expected list command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_priority() {
        let result = Cli::try_parse_from(["taskflow", "add", "Buy milk", "--priority", "urgent"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overdue_marker_uses_given_date() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "0123456789",
            "title": "Pay rent",
            "dueDate": "2024-02-14"
        }))
        .unwrap();

        let due_day = NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        assert_eq!(TaskRow::new(&task, due_day).due, "2024-02-14");
        assert_eq!(TaskRow::new(&task, next_day).due, "2024-02-14 (overdue)");
        assert_eq!(TaskRow::new(&task, next_day).id, "01234567");
    }

    #[test]
    fn test_resolve_id_by_prefix() {
        let store = PersistentStore::new(
            taskflow_core::MemoryStore::new(),
            StoreConfig::default_memory(),
        );
        let repo = TaskRepository::new(&store);
        let task = repo.create(NewTask::new("Buy milk")).unwrap();

        assert_eq!(resolve_id(&repo, &task.id[..6]).unwrap(), task.id);
        assert_eq!(resolve_id(&repo, &task.id).unwrap(), task.id);
        assert!(resolve_id(&repo, "zzzz").is_err());
    }
}
