use clap::{Parser, Subcommand};
use ctmark_core::constants::{
    DEFAULT_RESEARCHES_DIR, PATH_CACHE_CAPACITY_ENV, RESEARCHES_DIR_ENV, UPLOAD_CHUNK_SIZE_ENV,
};
use ctmark_core::{CoreConfig, InMemoryResearchAccess, ResearchId, ResearchService};
use ctmark_storage::{DEFAULT_PATH_CACHE_CAPACITY, DEFAULT_UPLOAD_CHUNK_SIZE, UploadedFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Owner recorded for researches created from the command line.
const CLI_USER: &str = "ctmark-cli";

#[derive(Parser)]
#[command(name = "ctmark")]
#[command(about = "ctmark research storage CLI")]
struct Cli {
    /// Root directory of the research tree
    #[arg(long, env = RESEARCHES_DIR_ENV, default_value = DEFAULT_RESEARCHES_DIR)]
    researches_dir: PathBuf,

    /// Maximum number of memoised research paths
    #[arg(long, env = PATH_CACHE_CAPACITY_ENV, default_value_t = DEFAULT_PATH_CACHE_CAPACITY)]
    path_cache_capacity: u64,

    /// Chunk size in bytes used when spooling archives
    #[arg(long, env = UPLOAD_CHUNK_SIZE_ENV, default_value_t = DEFAULT_UPLOAD_CHUNK_SIZE)]
    upload_chunk_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a research from capture files or a single zip archive
    Create {
        /// Files to ingest, in slot order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the number of captures
    Count {
        /// Research identifier
        id: String,
    },
    /// Scrub patient identifiers from every capture
    Depersonalize {
        /// Research identifier
        id: String,
    },
    /// Regenerate the preview image
    Preview {
        /// Research identifier
        id: String,
    },
    /// Print the paths of a research
    Paths {
        /// Research identifier
        id: String,
    },
    /// Delete a research
    Remove {
        /// Research identifier
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ctmark=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    for line in run(cli).await? {
        println!("{line}");
    }
    Ok(())
}

/// Executes one command and returns the lines to print.
async fn run(cli: Cli) -> anyhow::Result<Vec<String>> {
    let cfg = CoreConfig::new(
        cli.researches_dir,
        cli.path_cache_capacity,
        cli.upload_chunk_size,
    )?;
    let service = ResearchService::new(&cfg, Arc::new(InMemoryResearchAccess::new()));
    let storage = service.storage();

    let lines = match cli.command {
        Commands::Create { files } => {
            tokio::fs::create_dir_all(cfg.researches_dir()).await?;
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                uploads.push(open_upload(path).await?);
            }
            let created = service.create_research(CLI_USER, uploads).await?;
            vec![
                format!("research_id: {}", created.research_id),
                format!("captures: {}", created.captures_count),
            ]
        }
        Commands::Count { id } => {
            let id = ResearchId::parse(&id)?;
            vec![service.captures_count(&id).await?.to_string()]
        }
        Commands::Depersonalize { id } => {
            let id = ResearchId::parse(&id)?;
            let count = storage
                .depersonalize(&id)
                .await?
                .ok_or_else(|| missing(&id))?;
            vec![format!("depersonalized {count} captures")]
        }
        Commands::Preview { id } => {
            let id = ResearchId::parse(&id)?;
            if !storage.is_exists(&id) {
                return Err(missing(&id));
            }
            match storage.generate_preview(&id).await? {
                Some(path) => vec![path.display().to_string()],
                None => vec!["no captures to preview".to_string()],
            }
        }
        Commands::Paths { id } => {
            let id = ResearchId::parse(&id)?;
            let captures = storage.get_captures_path(&id).ok_or_else(|| missing(&id))?;
            let markup = storage.get_markup_path(&id).ok_or_else(|| missing(&id))?;
            let preview = storage.get_preview_path(&id).ok_or_else(|| missing(&id))?;
            vec![
                format!("captures: {}", captures.display()),
                format!("markup: {}", markup.display()),
                format!("preview: {}", preview.display()),
            ]
        }
        Commands::Remove { id } => {
            let id = ResearchId::parse(&id)?;
            service.remove_research(&id).await?;
            vec![format!("removed {id}")]
        }
    };

    Ok(lines)
}

async fn open_upload(path: &Path) -> anyhow::Result<UploadedFile> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("not a file path: {}", path.display()))?
        .to_owned();
    let file = tokio::fs::File::open(path).await?;
    Ok(UploadedFile::new(filename, file))
}

fn missing(id: &ResearchId) -> anyhow::Error {
    anyhow::anyhow!("research {id} not found")
}
