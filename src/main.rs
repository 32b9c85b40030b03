use anyhow::Context;
use arango_datalayer::{
    compile, parse_sort, scan_where, ArangoConfig, CollectionPerResource, DataLayer,
    DataLayerSettings, HttpEngine, Lookup, ParsedRequest,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "arango-datalayer")]
#[command(about = "Compile and run REST-style where/sort/page requests against ArangoDB", long_about = None)]
struct Cli {
    /// Database host
    #[arg(short = 'H', long, env = "ARANGO_HOST", global = true)]
    host: Option<String>,

    /// Database port
    #[arg(short = 'P', long, env = "ARANGO_PORT", global = true)]
    port: Option<u16>,

    /// Database name
    #[arg(short, long, env = "ARANGO_DB", global = true)]
    database: Option<String>,

    /// Username for basic authentication
    #[arg(short = 'u', long, env = "ARANGO_USERNAME", global = true)]
    user: Option<String>,

    /// Password for basic authentication
    #[arg(short = 'p', long, env = "ARANGO_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Pretty-print JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// Resource (collection) name
    resource: String,

    /// Filter expression, e.g. 'name=="Bill Evans" OR born>1930'
    #[arg(short, long = "where")]
    where_clause: Option<String>,

    /// Comma-separated sort fields; prefix with '-' for descending
    #[arg(short, long)]
    sort: Option<String>,

    /// One-indexed page number
    #[arg(long)]
    page: Option<u32>,

    /// Page size
    #[arg(short, long)]
    max_results: Option<u32>,
}

impl RequestArgs {
    fn to_request(&self) -> ParsedRequest {
        ParsedRequest {
            where_clause: self.where_clause.clone(),
            sort: self.sort.clone(),
            page: self.page,
            max_results: self.max_results,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the AQL and bind parameters for a request without connecting
    Compile(RequestArgs),
    /// Run a request and print the matching page
    Find(RequestArgs),
    /// Fetch one document by key or `collection/key` id
    Get {
        resource: String,
        id: String,
    },
}

fn print_json(value: &serde_json::Value, pretty: bool) -> anyhow::Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before parsing so `.env` values act as flag defaults
    let dotenv_path = ArangoConfig::load_dotenv();
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arango_datalayer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = &dotenv_path {
        tracing::debug!("Loaded environment from {}", path.display());
    }
    let mut config = ArangoConfig::from_process_env().context("invalid configuration")?;
    if let Some(host) = args.host.clone() {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database.clone() {
        config.database = database;
    }
    if args.user.is_some() {
        config.username = args.user.clone();
        config.password = args.password.clone();
    }

    match &args.command {
        Command::Compile(request) => {
            let req = request.to_request();
            let tokens = scan_where(req.where_clause.as_deref().unwrap_or_default())?;
            let sort = parse_sort(req.sort.as_deref().unwrap_or_default())?;
            let max_results = req
                .max_results
                .unwrap_or(config.default_page_size)
                .min(config.max_page_size);
            let query = compile(&tokens, &sort, req.page, max_results, &request.resource)?;
            print_json(
                &json!({ "query": query.aql, "bindVars": query.bind_vars }),
                args.pretty,
            )?;
        }
        Command::Find(request) => {
            let layer = data_layer(&config)?;
            let req = request.to_request();
            let result = layer.find(&request.resource, &req, None).await?;
            let meta = result.meta(
                req.page.unwrap_or(1),
                layer.page_size(req.max_results),
            );
            tracing::info!(
                "{} documents on this page, {} total ({:?})",
                result.len(),
                meta.total,
                result.count_source()
            );
            print_json(
                &json!({ "_items": result.into_documents(), "_meta": meta }),
                args.pretty,
            )?;
        }
        Command::Get { resource, id } => {
            let layer = data_layer(&config)?;
            let lookup = if id.contains('/') {
                Lookup::Id(id.clone())
            } else {
                Lookup::key(id.as_str())
            };
            let doc = layer.find_one(resource, &lookup).await?;
            print_json(&doc.into_json(), args.pretty)?;
        }
    }

    Ok(())
}

fn data_layer(config: &ArangoConfig) -> anyhow::Result<DataLayer<HttpEngine>> {
    let engine = HttpEngine::new(config).context("failed to set up the ArangoDB client")?;
    Ok(DataLayer::new(engine, CollectionPerResource).with_settings(DataLayerSettings::from(config)))
}
