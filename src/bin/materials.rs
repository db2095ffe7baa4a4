use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use materials_sync::backup;
use materials_sync::config;
use materials_sync::db::{self, Pool};
use materials_sync::model::{
    Category, CategoryKind, CategoryPatch, CategoryType, Material, MaterialPatch,
};
use materials_sync::remote::{RemoteBackend, SupabaseClient};
use materials_sync::sync::{self, PassOutcome, LAST_SYNC_KEY};

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage the local materials store")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

fn parse_category(s: &str) -> Result<CategoryType, String> {
    CategoryType::parse_category(s).ok_or_else(|| format!("unknown category `{}` (bible|general)", s))
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a file as a new material
    Add {
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long, value_parser = parse_category)]
        category: CategoryType,
        #[arg(long)]
        book: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List materials, optionally filtered
    List {
        #[arg(long, conflicts_with = "category")]
        book: Option<String>,
        #[arg(long, value_parser = parse_category)]
        category: Option<CategoryType>,
    },
    /// Show one material's metadata as JSON
    Show { id: String },
    /// Change fields of a material and queue it for sync
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_category)]
        category: Option<CategoryType>,
        #[arg(long, conflicts_with = "clear_book")]
        book: Option<String>,
        #[arg(long)]
        clear_book: bool,
        /// Replace all tags
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,
        /// Replace the stored file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Delete a material locally, or mark it deleted for the backend with --soft
    Delete {
        id: String,
        #[arg(long)]
        soft: bool,
    },
    /// Count materials per sync status
    Status,
    /// Show the per-material sync ledger
    Queue,
    /// Export one category to a backup directory
    Export {
        #[arg(long, value_parser = parse_category)]
        category: CategoryType,
        dest: PathBuf,
    },
    /// Import a backup directory
    Import { src: PathBuf },
    /// Manage the category groups and items
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },
    /// Push pending categories and materials now
    Sync,
}

#[derive(Debug, Subcommand)]
enum CategoryCommand {
    /// Create a top-level group
    AddGroup {
        name: String,
        #[arg(long, default_value_t = 0)]
        order: i64,
    },
    /// Create an item under a group
    AddItem {
        #[arg(long)]
        group: String,
        name: String,
        #[arg(long, default_value_t = 0)]
        order: i64,
    },
    /// List groups with their items
    List,
    /// Rename or reorder a category
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        order: Option<i64>,
    },
    /// Delete a category; deleting a group also removes its items
    Delete { id: String },
}

fn print_category(c: &Category, indent: &str) {
    println!("{}{}  {:<8} {:>3} {}", indent, c.id, c.sync_status, c.sort_order, c.name);
}

async fn run_category(pool: &Pool, command: CategoryCommand) -> Result<()> {
    match command {
        CategoryCommand::AddGroup { name, order } => {
            let group = Category::group(&name, order);
            db::put_category(pool, &group).await?;
            println!("{}", group.id);
        }
        CategoryCommand::AddItem { group, name, order } => {
            let item = Category::item(&group, &name, order);
            db::put_category(pool, &item).await?;
            println!("{}", item.id);
        }
        CategoryCommand::List => {
            for group in db::get_all_categories(pool)
                .await?
                .iter()
                .filter(|c| c.kind == CategoryKind::Group)
            {
                print_category(group, "");
                for item in db::get_category_items(pool, &group.id).await? {
                    print_category(&item, "  ");
                }
            }
        }
        CategoryCommand::Edit { id, name, order } => {
            let patch = CategoryPatch {
                name,
                sort_order: order,
            };
            if patch.is_empty() {
                bail!("nothing to change");
            }
            let updated = db::update_category(pool, &id, patch).await?;
            print_category(&updated, "");
        }
        CategoryCommand::Delete { id } => {
            if !db::delete_category(pool, &id).await? {
                bail!("category {} not found", id);
            }
            println!("deleted {}", id);
        }
    }
    Ok(())
}

async fn read_payload(path: &Path) -> Result<(String, Vec<u8>)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok((name, bytes))
}

fn print_row(m: &Material) {
    println!(
        "{}  {:<8} {:<7} {:<10} {}",
        m.local_id,
        m.sync_status,
        m.category_type,
        m.bible_book.as_deref().unwrap_or("-"),
        m.title
    );
}

async fn sync_now(cfg: &config::Config, pool: Pool) -> Result<()> {
    let remote: Arc<dyn RemoteBackend> = Arc::new(SupabaseClient::from_config(cfg)?);
    match sync::sync_once(pool, remote, false).await? {
        PassOutcome::Offline => bail!("backend unreachable; nothing was pushed"),
        PassOutcome::Completed(report) => {
            println!("{}", report);
            if report.failed > 0 {
                bail!("{} record(s) failed to sync", report.failed);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Add {
            file,
            title,
            category,
            book,
            description,
            tags,
        } => {
            let (name, bytes) = read_payload(&file).await?;
            let mut material = Material::new(&title, category, &name)
                .with_tags(tags)
                .with_payload(bytes);
            material.description = description;
            if let Some(book) = book {
                material = material.with_book(&book);
            }
            db::put_material(&pool, &material).await?;
            println!("{}", material.local_id);
        }
        Command::List { book, category } => {
            let materials = match (book, category) {
                (Some(book), _) => db::get_materials_by_book(&pool, &book).await?,
                (None, Some(category)) => db::get_materials_by_category(&pool, category).await?,
                (None, None) => db::get_all_materials(&pool).await?,
            };
            for m in &materials {
                print_row(m);
            }
        }
        Command::Show { id } => {
            let material = db::get_material(&pool, &id)
                .await?
                .ok_or_else(|| anyhow!("material {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&material)?);
        }
        Command::Edit {
            id,
            title,
            description,
            category,
            book,
            clear_book,
            tags,
            file,
        } => {
            let file = match file {
                Some(path) => Some(read_payload(&path).await?),
                None => None,
            };
            let patch = MaterialPatch {
                title,
                description: description.map(Some),
                category_type: category,
                bible_book: if clear_book { Some(None) } else { book.map(Some) },
                tags,
                metadata: None,
                file,
            };
            if patch.is_empty() {
                bail!("nothing to change");
            }
            let updated = db::edit_material(&pool, &id, patch).await?;
            print_row(&updated);
        }
        Command::Delete { id, soft } => {
            if soft {
                db::soft_delete_material(&pool, &id).await?;
                println!("marked {} deleted", id);
            } else if db::delete_material(&pool, &id).await? {
                println!("deleted {}", id);
            } else {
                bail!("material {} not found", id);
            }
        }
        Command::Status => {
            let counts = db::count_by_status(&pool).await?;
            println!("synced:   {}", counts.synced);
            println!("pending:  {}", counts.pending);
            println!("syncing:  {}", counts.syncing);
            println!("conflict: {}", counts.conflict);
            println!("error:    {}", counts.error);
            let last = db::get_app_metadata(&pool, LAST_SYNC_KEY).await?;
            println!("last sync: {}", last.as_deref().unwrap_or("never"));
        }
        Command::Queue => {
            for entry in db::list_queue(&pool).await? {
                println!(
                    "{}  {:<6} {:<10} retries={} {}",
                    entry.local_id,
                    entry.op_type.as_str(),
                    entry.status.as_str(),
                    entry.retry_count,
                    entry.error.as_deref().unwrap_or("")
                );
            }
        }
        Command::Export { category, dest } => {
            let count = backup::export_category(&pool, category, &dest).await?;
            println!("exported {} material(s) to {}", count, dest.display());
        }
        Command::Import { src } => {
            let imported = backup::import_bundle(&pool, &src).await?;
            println!("imported {} material(s)", imported.len());
        }
        Command::Category { command } => run_category(&pool, command).await?,
        Command::Sync => sync_now(&cfg, pool).await?,
    }
    Ok(())
}
