use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use entity_search::config::Config;
use entity_search::search::{
    FilterPredicate, JsonLinesSource, MultiEntitySearchRequest, MultiFieldMode, SearchError,
    SearchRequest, SearchService, SortOrder,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "entity-search")]
#[command(about = "Maintain and query entity search indexes", long_about = None)]
struct Cli {
    /// Configuration file layered over the defaults
    #[arg(short, long, env = "ENTITY_SEARCH_CONFIG")]
    config: Option<String>,

    /// Index storage root; overrides the configuration
    #[arg(short, long)]
    index_root: Option<PathBuf>,

    /// Tenant scope
    #[arg(short, long)]
    tenant: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset indexes to an empty structure
    Rebuild {
        /// Entity type; every declared type when omitted
        #[arg(value_name = "ENTITY")]
        entity: Option<String>,
    },

    /// Clear an index and load it from a JSON-lines file
    Index {
        #[arg(value_name = "ENTITY")]
        entity: String,

        /// One JSON object per line
        #[arg(short, long)]
        source: PathBuf,

        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Search one or more entity types
    Search {
        /// Entity types, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        entity: Vec<String>,

        #[arg(value_name = "QUERY", default_value = "")]
        query: String,

        /// Fields to search, comma separated
        #[arg(short, long, value_delimiter = ',')]
        fields: Vec<String>,

        #[arg(long)]
        fuzzy: bool,

        #[arg(long)]
        max_edits: Option<u8>,

        #[arg(short, long)]
        prefix: bool,

        /// AND or OR
        #[arg(short, long)]
        mode: Option<MultiFieldMode>,

        /// Filter predicate as JSON, e.g. '{"op":"eq","field":"Year","value":1999}'
        #[arg(long)]
        filter: Option<String>,

        #[arg(long, default_value = "0")]
        skip: usize,

        #[arg(long, default_value = "20")]
        take: usize,

        /// Numeric field to sort by instead of relevance
        #[arg(long)]
        sort: Option<String>,

        /// asc or desc
        #[arg(long, default_value = "desc")]
        order: SortOrder,
    },

    /// Show document count and index statistics
    Count {
        #[arg(value_name = "ENTITY")]
        entity: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(root) = cli.index_root.clone() {
        config.search.index_root = Some(root);
    }

    init_tracing(&config);

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if config.search.index_root.is_none() {
        bail!("No index root configured; pass --index-root or set search.index_root");
    }

    let registry = config.registry().context("Invalid entity definitions")?;
    let service = SearchService::new(config.search.clone(), registry.clone()).await?;
    let service = match &cli.tenant {
        Some(tenant) => service.for_tenant(tenant)?,
        None => service,
    };

    match cli.command {
        Commands::Rebuild { entity } => {
            let entities: Vec<String> = match entity {
                Some(entity) => vec![entity],
                None => registry.entity_types().map(str::to_string).collect(),
            };
            for entity in entities {
                let fields = service.rebuild_index(&entity).await?;
                println!("Rebuilt {} ({} fields)", entity, fields);
            }
        }

        Commands::Index {
            entity,
            source,
            batch_size,
        } => {
            let cancel = CancellationToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling indexing");
                    signal_token.cancel();
                }
            });

            let source = JsonLinesSource::new(&entity, &source);
            match service
                .rebuild_and_index_all(&entity, batch_size, &source, &cancel)
                .await
            {
                Ok(indexed) => println!("Indexed {} {} record(s)", indexed, entity),
                Err(SearchError::Cancelled { indexed }) => {
                    eprintln!("Cancelled after committing {} record(s)", indexed);
                    std::process::exit(130);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Search {
            entity,
            query,
            fields,
            fuzzy,
            max_edits,
            prefix,
            mode,
            filter,
            skip,
            take,
            sort,
            order,
        } => {
            let mut request = SearchRequest::new(query)
                .with_fields(fields)
                .with_prefix(prefix)
                .with_paging(skip, take);
            if fuzzy {
                request = request.with_fuzzy(max_edits);
            }
            if let Some(mode) = mode {
                request = request.with_multi_field_mode(mode);
            }
            if let Some(filter) = filter {
                let predicate: FilterPredicate =
                    serde_json::from_str(&filter).context("Invalid filter JSON")?;
                request = request.with_filter(predicate);
            }
            if let Some(field) = sort {
                request = request.with_sort(field, order);
            }

            let response = if entity.len() == 1 {
                service.search(&entity[0], &request).await?
            } else {
                service
                    .search_many(&MultiEntitySearchRequest::new(entity, request))
                    .await?
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Count { entity } => {
            let stats = service.index_stats(&entity).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        // Printed before the service is opened
        Commands::Config => {}
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("entity_search={}", config.observability.log_level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if config.observability.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
