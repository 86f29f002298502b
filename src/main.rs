use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use norbu_todo_lib::commands::{
    self, CommandResult, NewCategory, NewProject, NewTask, PreferencesPatch,
};
use norbu_todo_lib::models::{CategoryPatch, Language, Priority, ProjectPatch, TaskPatch};
use norbu_todo_lib::remote::{PostgrestClient, RemoteBackend, RemoteConfig};
use norbu_todo_lib::timefmt::{self, Timestamp};
use norbu_todo_lib::views::{SummaryPeriod, TaskFilter};
use norbu_todo_lib::{logging, DataStore, LocalStore};

#[derive(Debug, Parser)]
#[command(name = "norbu-todo")]
#[command(version)]
#[command(about = "Categories, projects and tasks, stored locally or in remote tables")]
struct Cli {
    #[arg(
        short = 'd',
        long,
        env = "NORBU_TODO_DATA_DIR",
        default_value = ".norbu-todo",
        help = "Directory holding the data file, settings and logs."
    )]
    data_dir: PathBuf,

    #[arg(
        long,
        help = "Use the remote tables configured by NORBU_SUPABASE_URL, NORBU_SUPABASE_ANON_KEY, NORBU_ACCESS_TOKEN and NORBU_USER_ID."
    )]
    remote: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Print the whole tree, or tasks matching a filter.")]
    Show(ShowArgs),
    #[command(about = "Create a category.")]
    AddCategory(AddCategoryArgs),
    #[command(about = "Rename or restyle a category.")]
    UpdateCategory(UpdateCategoryArgs),
    #[command(about = "Delete a category with all of its projects and tasks.")]
    DeleteCategory(CategoryRef),
    #[command(about = "Create a project inside a category.")]
    AddProject(AddProjectArgs),
    #[command(about = "Change project fields. An empty value clears optional fields.")]
    UpdateProject(UpdateProjectArgs),
    #[command(about = "Delete a project with its tasks.")]
    DeleteProject(ProjectRef),
    #[command(about = "Create a task inside a project.")]
    AddTask(AddTaskArgs),
    #[command(about = "Change task fields.")]
    UpdateTask(UpdateTaskArgs),
    #[command(about = "Flip a task between open and completed.")]
    ToggleTask(TaskRef),
    #[command(about = "Delete a task.")]
    DeleteTask(TaskRef),
    #[command(about = "Write a dated JSON backup into a directory.")]
    Export(ExportArgs),
    #[command(about = "Replace all data with a JSON backup.")]
    Import(ImportArgs),
    #[command(about = "Remove stored data and start over with the default categories.")]
    Clear,
    #[command(about = "Completed tasks of the current week, month or year.")]
    Summary(SummaryArgs),
    #[command(about = "Show or change preferences.")]
    Prefs(PrefsArgs),
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[arg(long, help = "all, personal, work or completed.")]
    filter: Option<TaskFilter>,
}

#[derive(Debug, Args)]
struct CategoryRef {
    #[arg(help = "Category id.")]
    category: String,
}

#[derive(Debug, Args)]
struct ProjectRef {
    #[arg(help = "Category id.")]
    category: String,
    #[arg(help = "Project id.")]
    project: String,
}

#[derive(Debug, Args)]
struct TaskRef {
    #[arg(help = "Category id.")]
    category: String,
    #[arg(help = "Project id.")]
    project: String,
    #[arg(help = "Task id.")]
    task: String,
}

#[derive(Debug, Args)]
struct AddCategoryArgs {
    #[arg(help = "Category name.")]
    name: String,
    #[arg(long, default_value = "📁")]
    icon: String,
    #[arg(long, default_value = "#6B7280", help = "Hex color, #RGB or #RRGGBB.")]
    color: String,
}

#[derive(Debug, Args)]
struct UpdateCategoryArgs {
    #[arg(help = "Category id.")]
    category: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    icon: Option<String>,
    #[arg(long)]
    color: Option<String>,
}

#[derive(Debug, Args)]
struct AddProjectArgs {
    #[arg(help = "Category id.")]
    category: String,
    #[arg(help = "Project name.")]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long, value_parser = parse_deadline, help = "YYYY-MM-DD or an RFC 3339 timestamp.")]
    deadline: Option<Timestamp>,
}

#[derive(Debug, Args)]
struct UpdateProjectArgs {
    #[arg(help = "Category id.")]
    category: String,
    #[arg(help = "Project id.")]
    project: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    deadline: Option<String>,
}

#[derive(Debug, Args)]
struct AddTaskArgs {
    #[arg(help = "Category id.")]
    category: String,
    #[arg(help = "Project id.")]
    project: String,
    #[arg(help = "Task title.")]
    title: String,
    #[arg(long, default_value = "medium", help = "high, medium or low.")]
    priority: Priority,
}

#[derive(Debug, Args)]
struct UpdateTaskArgs {
    #[command(flatten)]
    target: TaskRef,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    priority: Option<Priority>,
    #[arg(long)]
    completed: Option<bool>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(help = "Directory to write the backup into.")]
    dir: PathBuf,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(help = "Backup file holding a `categories` array.")]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct SummaryArgs {
    #[arg(help = "week, month or year.")]
    period: SummaryPeriod,
    #[arg(long, help = "Also write the summary as Markdown into this directory.")]
    markdown: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PrefsArgs {
    #[arg(long, help = "en, zh or bo.")]
    language: Option<Language>,
    #[arg(long)]
    dark_mode: Option<bool>,
}

fn parse_deadline(value: &str) -> Result<Timestamp, String> {
    timefmt::parse_iso(value).ok_or_else(|| format!("invalid date: {value}"))
}

// An empty value clears the field.
fn clearable(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| {
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    })
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("error: failed to encode output: {err}"),
    }
}

fn emit<T: Serialize>(result: CommandResult<T>) -> bool {
    print_json(&result);
    result.ok
}

fn fail(message: &str) -> bool {
    emit(CommandResult::<()> {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    })
}

fn main() {
    let cli = Cli::parse();
    let logger = match logging::init_logging(&cli.data_dir) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("warning: file logging disabled: {err}");
            None
        }
    };

    let succeeded = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime.block_on(run(cli)),
        Err(err) => fail(&format!("failed to start runtime: {err}")),
    };

    drop(logger);
    if !succeeded {
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> bool {
    let settings = LocalStore::new(cli.data_dir.clone());
    if let Command::Prefs(args) = &cli.command {
        return prefs(&settings, args);
    }

    let store = match open_store(&cli.data_dir, cli.remote).await {
        Ok(store) => store,
        Err(message) => return fail(&message),
    };
    log::debug!("store ready backend={}", store.backend_name());

    let succeeded = dispatch(&store, cli.command).await;
    store.close().await;
    succeeded
}

async fn open_store(data_dir: &Path, remote: bool) -> Result<DataStore, String> {
    let store = if remote {
        let config = RemoteConfig::from_env().map_err(|err| err.to_string())?;
        let client = PostgrestClient::new(&config).map_err(|err| err.to_string())?;
        DataStore::new(RemoteBackend::new(client, config.user_id))
    } else {
        DataStore::new(LocalStore::new(data_dir.to_path_buf()))
    };
    store.load().await;
    Ok(store)
}

fn prefs(settings: &LocalStore, args: &PrefsArgs) -> bool {
    if args.language.is_none() && args.dark_mode.is_none() {
        return emit(commands::load_preferences(settings));
    }
    emit(commands::update_preferences(
        settings,
        PreferencesPatch {
            language: args.language,
            dark_mode: args.dark_mode,
        },
    ))
}

async fn dispatch(store: &DataStore, command: Command) -> bool {
    match command {
        Command::Show(args) => match args.filter {
            Some(filter) => emit(commands::list_tasks(store, filter)),
            None => emit(commands::load_state(store)),
        },
        Command::AddCategory(args) => emit(
            commands::create_category(
                store,
                NewCategory {
                    name: args.name,
                    icon: args.icon,
                    color: args.color,
                },
            )
            .await,
        ),
        Command::UpdateCategory(args) => emit(
            commands::update_category(
                store,
                &args.category,
                CategoryPatch {
                    name: args.name,
                    icon: args.icon,
                    color: args.color,
                },
            )
            .await,
        ),
        Command::DeleteCategory(args) => {
            emit(commands::delete_category(store, &args.category).await)
        }
        Command::AddProject(args) => emit(
            commands::create_project(
                store,
                &args.category,
                NewProject {
                    name: args.name,
                    description: args.description,
                    color: args.color,
                    deadline: args.deadline,
                },
            )
            .await,
        ),
        Command::UpdateProject(args) => {
            let deadline = match clearable(args.deadline) {
                None => None,
                Some(None) => Some(None),
                Some(Some(text)) => match parse_deadline(&text) {
                    Ok(deadline) => Some(Some(deadline)),
                    Err(message) => return fail(&message),
                },
            };
            let patch = ProjectPatch {
                name: args.name,
                description: clearable(args.description),
                color: clearable(args.color),
                deadline,
            };
            emit(commands::update_project(store, &args.category, &args.project, patch).await)
        }
        Command::DeleteProject(args) => {
            emit(commands::delete_project(store, &args.category, &args.project).await)
        }
        Command::AddTask(args) => emit(
            commands::create_task(
                store,
                &args.category,
                &args.project,
                NewTask {
                    title: args.title,
                    priority: args.priority,
                },
            )
            .await,
        ),
        Command::UpdateTask(args) => {
            let TaskRef {
                category,
                project,
                task,
            } = args.target;
            let patch = TaskPatch {
                title: args.title,
                completed: args.completed,
                priority: args.priority,
            };
            emit(commands::update_task(store, &category, &project, &task, patch).await)
        }
        Command::ToggleTask(args) => emit(
            commands::toggle_task(store, &args.category, &args.project, &args.task).await,
        ),
        Command::DeleteTask(args) => emit(
            commands::delete_task(store, &args.category, &args.project, &args.task).await,
        ),
        Command::Export(args) => emit(commands::export_data(store, &args.dir).await),
        Command::Import(args) => emit(commands::import_data(store, &args.file).await),
        Command::Clear => emit(commands::clear_all_data(store).await),
        Command::Summary(args) => {
            let now = chrono::Local::now();
            if let Some(dir) = &args.markdown {
                if !emit(commands::export_summary_markdown(store, dir, args.period, &now)) {
                    return false;
                }
            }
            emit(commands::completed_summary(store, args.period, &now))
        }
        // Handled before the store is opened.
        Command::Prefs(_) => true,
    }
}
