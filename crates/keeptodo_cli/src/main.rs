use clap::{CommandFactory, Parser};
use keeptodo_cli::cli::{Cli, Command, collect_config_overrides};
use keeptodo_cli::logging::init_logging;
use keeptodo_core::config::{load_config_with_fallback, merge_overrides};
use keeptodo_core::error::AppError;
use keeptodo_core::model::{Filter, Priority, Task};
use keeptodo_core::storage::{FileStore, KeyValueStore, MemoryStore, StorageAdapter};
use keeptodo_core::store::TodoStore;
use std::io::{self, BufRead};
use std::path::PathBuf;
use tabled::settings::Style;
use tabled::{Table, Tabled};

type Store = TodoStore<Box<dyn KeyValueStore>>;

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "")]
    done: &'static str,
    id: String,
    text: String,
    priority: &'static str,
    created: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            done: if task.completed { "[x]" } else { "[ ]" },
            id: task.id.clone(),
            text: task.text.clone(),
            priority: task.priority.as_str(),
            created: task.created_at.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn print_tasks_plain(tasks: &[&Task]) {
    if tasks.is_empty() {
        println!("No todos.");
        return;
    }
    let rows: Vec<TaskRow> = tasks.iter().map(|task| TaskRow::from(*task)).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn print_tasks_json(tasks: &[&Task]) -> Result<(), AppError> {
    println!("{}", serde_json::to_string(tasks)?);
    Ok(())
}

fn print_task_json(task: &Task) -> Result<(), AppError> {
    println!("{}", serde_json::to_string(task)?);
    Ok(())
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err(AppError::invalid_input("unterminated quote in command"));
    }

    if !current.is_empty() {
        args.push(current);
    }

    Ok(args)
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

struct Session {
    store: Store,
    /// Raw stored value as of the end of the previous command.
    last_seen: Option<String>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self, AppError> {
        let overrides =
            collect_config_overrides(&cli.config_override).map_err(AppError::invalid_input)?;
        let loaded = load_config_with_fallback();
        if let Some(err) = loaded.error.as_ref() {
            tracing::warn!(error = %err, "using default configuration");
        }
        let config = merge_overrides(&loaded.config, &overrides);

        let backing: Box<dyn KeyValueStore> = if cli.ephemeral {
            match config.quota_bytes {
                Some(quota) => Box::new(MemoryStore::with_quota(quota)),
                None => Box::new(MemoryStore::new()),
            }
        } else {
            Box::new(FileStore::new(config.resolve_data_dir()?).with_quota(config.quota_bytes))
        };

        let mut store = TodoStore::new(StorageAdapter::new(backing, config.storage_key()));
        if let Some(err) = store.init() {
            eprintln!("WARNING: stored todos could not be read ({err}); starting empty");
        }
        let last_seen = store.adapter().raw();

        Ok(Self { store, last_seen })
    }

    /// Adopts the stored value when another process has rewritten it.
    fn sync_external(&mut self) {
        let current = self.store.adapter().raw();
        if current != self.last_seen {
            let key = self.store.adapter().key().to_string();
            self.store.apply_external_change(&key, current.as_deref());
            self.last_seen = current;
        }
    }

    fn resolve_id(&self, raw: &str) -> Result<String, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::invalid_input("id is required"));
        }
        if self.store.get(trimmed).is_some() {
            return Ok(trimmed.to_string());
        }

        let mut matches = self
            .store
            .todos()
            .iter()
            .filter(|task| task.id.starts_with(trimmed));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task.id.clone()),
            (Some(_), Some(_)) => Err(AppError::invalid_input(format!(
                "id prefix '{trimmed}' is ambiguous"
            ))),
            (None, _) => Err(AppError::invalid_input("task not found")),
        }
    }

    fn warn_if_unsaved(&self) {
        if !self.store.persisted() {
            eprintln!("WARNING: changes are kept in memory but could not be saved");
        }
    }

    fn run(&mut self, command: Command, json: bool) -> Result<(), AppError> {
        match command {
            Command::Add { text, priority } => {
                let text = match text {
                    Some(value) if !value.trim().is_empty() => value,
                    _ => return Err(AppError::invalid_input("text is required")),
                };
                let priority = match priority {
                    Some(level) => level.parse::<Priority>()?,
                    None => Priority::default(),
                };

                let task = self
                    .store
                    .add_todo_with(&text, priority)
                    .ok_or_else(|| AppError::invalid_input("todo was not added"))?;
                if json {
                    print_task_json(&task)?;
                } else {
                    println!("Added todo: {} ({})", task.text, task.id);
                }
                self.warn_if_unsaved();
            }
            Command::Toggle { id } => {
                let id = self.resolve_id(&id)?;
                self.store.toggle_todo(&id);
                let task = self
                    .store
                    .get(&id)
                    .ok_or_else(|| AppError::invalid_input("task not found"))?;
                if json {
                    print_task_json(task)?;
                } else if task.completed {
                    println!("Completed todo: {} ({})", task.text, task.id);
                } else {
                    println!("Reopened todo: {} ({})", task.text, task.id);
                }
                self.warn_if_unsaved();
            }
            Command::Edit { id, new_text } => {
                let id = self.resolve_id(&id)?;
                if new_text.trim().is_empty() {
                    return Err(AppError::invalid_input("text is required"));
                }
                self.store.edit_todo(&id, &new_text);
                let task = self
                    .store
                    .get(&id)
                    .ok_or_else(|| AppError::invalid_input("task not found"))?;
                if json {
                    print_task_json(task)?;
                } else {
                    println!("Updated todo: {} ({})", task.text, task.id);
                }
                self.warn_if_unsaved();
            }
            Command::Delete { id } => {
                let id = self.resolve_id(&id)?;
                let task = self
                    .store
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| AppError::invalid_input("task not found"))?;
                self.store.delete_todo(&id);
                if json {
                    print_task_json(&task)?;
                } else {
                    println!("Deleted todo: {} ({})", task.text, task.id);
                }
                self.warn_if_unsaved();
            }
            Command::Priority { id, level } => {
                let id = self.resolve_id(&id)?;
                let priority = level.parse::<Priority>()?;
                self.store.set_priority(&id, priority);
                let task = self
                    .store
                    .get(&id)
                    .ok_or_else(|| AppError::invalid_input("task not found"))?;
                if json {
                    print_task_json(task)?;
                } else {
                    println!("Priority {}: {} ({})", task.priority, task.text, task.id);
                }
                self.warn_if_unsaved();
            }
            Command::ClearCompleted => {
                let before = self.store.todo_stats().completed;
                self.store.clear_completed();
                if json {
                    println!("{}", serde_json::json!({ "removed": before }));
                } else {
                    println!("Cleared {before} completed todo(s)");
                }
                self.warn_if_unsaved();
            }
            Command::ToggleAll => {
                self.store.toggle_all_todos();
                let stats = self.store.todo_stats();
                let all_completed = self.store.all_completed();
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "allCompleted": all_completed, "total": stats.total })
                    );
                } else if stats.total == 0 {
                    println!("No todos.");
                } else if all_completed {
                    println!("Marked all {} todo(s) completed", stats.total);
                } else {
                    println!("Marked all {} todo(s) active", stats.total);
                }
                self.warn_if_unsaved();
            }
            Command::List { filter } => {
                self.store.set_filter(filter.parse::<Filter>()?);
                let tasks = self.store.filtered_todos();
                if json {
                    print_tasks_json(&tasks)?;
                } else {
                    print_tasks_plain(&tasks);
                }
            }
            Command::Stats => {
                let stats = self.store.todo_stats();
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "total": stats.total,
                            "active": stats.active,
                            "completed": stats.completed,
                            "allCompleted": self.store.all_completed(),
                        })
                    );
                } else {
                    println!(
                        "{} total, {} active, {} completed",
                        stats.total, stats.active, stats.completed
                    );
                }
            }
            Command::StorageStats => {
                let stats = self.store.adapter().stats();
                if json {
                    println!("{}", serde_json::to_string(&stats)?);
                } else {
                    println!("key: {}", self.store.adapter().key());
                    println!("exists: {}", stats.exists);
                    println!("size: {} bytes", stats.size_bytes);
                    println!("todos: {}", stats.todo_count);
                    println!(
                        "last modified: {}",
                        stats.last_modified.as_deref().unwrap_or("-")
                    );
                    println!("version: {}", stats.version.as_deref().unwrap_or("-"));
                    if let Some(error) = stats.error.as_deref() {
                        println!("error: {error}");
                    }
                }
            }
            Command::Export { dir } => {
                let dir = dir.unwrap_or_else(|| PathBuf::from("."));
                let path = self
                    .store
                    .adapter()
                    .export_to_file(&dir)
                    .ok_or_else(|| AppError::io(format!("export to {} failed", dir.display())))?;
                if json {
                    println!("{}", serde_json::json!({ "path": path }));
                } else {
                    println!("Exported todos to {}", path.display());
                }
            }
            Command::Import { file, merge } => {
                let content = std::fs::read_to_string(&file)
                    .map_err(|err| AppError::io(format!("{}: {}", file.display(), err)))?;
                let tasks = self.store.import_todos(&content, merge).ok_or_else(|| {
                    AppError::invalid_data(format!("{} is not a todo backup", file.display()))
                })?;
                if json {
                    println!("{}", serde_json::to_string(&tasks)?);
                } else {
                    println!("Imported todos; collection now has {} todo(s)", tasks.len());
                }
            }
            Command::Migrate => {
                let migrated = self.store.adapter_mut().migrate_legacy();
                if json {
                    println!("{}", serde_json::json!({ "migrated": migrated }));
                } else if migrated {
                    println!("Migrated legacy todos to the current format");
                } else {
                    println!("Nothing to migrate");
                }
            }
            Command::ClearStorage => {
                self.store.clear_all();
                if json {
                    println!("{}", serde_json::json!({ "cleared": self.store.persisted() }));
                } else {
                    println!("Cleared all todos");
                }
                self.warn_if_unsaved();
            }
        }

        self.last_seen = self.store.adapter().raw();
        Ok(())
    }
}

/// Storage flags pick the backing store when the session opens and cannot
/// change it mid-session.
fn reject_startup_flags(cli: &Cli) -> Result<(), AppError> {
    if cli.ephemeral || !cli.config_override.is_empty() {
        return Err(AppError::invalid_input(
            "--ephemeral and --config-override are only accepted at startup",
        ));
    }
    Ok(())
}

fn run_interactive(session: &mut Session) -> Result<(), AppError> {
    let mut input = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        input.clear();
        let bytes = stdin_lock.read_line(&mut input)?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("keeptodo".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        if let Err(err) = reject_startup_flags(&cli) {
            eprintln!("ERROR: {}", err);
            continue;
        }

        let Some(command) = cli.command else {
            continue;
        };

        session.sync_external();
        if let Err(err) = session.run(command, cli.json) {
            eprintln!("ERROR: {}", err);
        }
    }

    Ok(())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    init_logging();

    let mut session = match Session::open(&cli) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(command) => session.run(command, cli.json),
        None => run_interactive(&mut session),
    };

    if let Err(err) = result {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
