pub mod artifact;
pub mod engine;
pub mod event;
pub mod publish;
pub mod template;
pub mod transform;

pub use artifact::ArtifactStore;
pub use engine::{DuckDb, Engine, EngineConfig, InitError};
pub use event::ObjectLambdaEvent;
pub use publish::{Correlation, Publisher, S3Publisher};
pub use transform::{ErrorKind, Failure, Outcome, Stage, TransformConfig, Transformer};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogFormat {
    Json,
    Text,
}

/// S3 Object Lambda function which runs a SQL query over each requested object,
/// returning the query's results in place of the object.
#[derive(clap::Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Request header through which callers supply a query template.
    #[clap(
        long,
        env = "REQUEST_SQL_HEADER",
        default_value = "x-amz-meta-request-sql"
    )]
    pub request_sql_header: String,
    /// Query template run when the request doesn't supply one.
    /// It must contain exactly one '%s' marker, which is replaced with the object URL.
    #[clap(long, env = "DEFAULT_QUERY", default_value = template::DEFAULT_TEMPLATE)]
    pub default_query: String,
    /// Whether callers may supply their own query templates.
    #[clap(long, env = "ALLOW_REQUEST_SQL", default_value = "true", action = clap::ArgAction::Set)]
    pub allow_request_sql: bool,
    /// Directory into which query results are materialized.
    #[clap(long, env = "ARTIFACT_DIR", default_value = "/tmp")]
    pub artifact_dir: std::path::PathBuf,
    /// DuckDB extensions to install and load at startup. Extensions may be
    /// named, or be paths to `.duckdb_extension` files.
    #[clap(
        long,
        env = "DUCKDB_EXTENSIONS",
        value_delimiter = ',',
        default_value = "httpfs"
    )]
    pub extensions: Vec<String>,
    /// Directory from which DuckDB installs and loads extensions.
    #[clap(long, env = "DUCKDB_EXTENSION_DIRECTORY")]
    pub extension_directory: Option<String>,
    /// DuckDB home directory. It must be writable if extensions are installed.
    #[clap(long, env = "DUCKDB_HOME_DIRECTORY")]
    pub home_directory: Option<String>,
    /// Format of emitted logs.
    #[clap(long, env = "LOG_FORMAT", value_enum, default_value = "json")]
    pub log_format: LogFormat,
}

impl Args {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            extensions: self
                .extensions
                .iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
            extension_directory: self.extension_directory.clone(),
            home_directory: self.home_directory.clone(),
        }
    }

    pub fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            request_sql_header: self.request_sql_header.clone(),
            default_query: self.default_query.clone(),
            allow_request_sql: self.allow_request_sql,
        }
    }
}
