use anyhow::Context;
use std::sync::Mutex;

/// Engine executes statements which materialize query results.
/// It's the seam through which the transform pipeline reaches DuckDB,
/// and which tests use to substitute a fake.
pub trait Engine: Send + Sync {
    /// Execute `statement`, blocking until it has completed.
    fn execute(&self, statement: &str) -> anyhow::Result<()>;
}

/// InitError is a failure to bring up the engine. It's fatal:
/// a process which cannot initialize its engine must not serve requests.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open DuckDB database")]
    Open(#[source] duckdb::Error),
    #[error("DuckDB liveness check failed")]
    Ping(#[source] duckdb::Error),
    #[error("failed to apply DuckDB setting: {setting}")]
    Configure {
        setting: String,
        #[source]
        err: duckdb::Error,
    },
    #[error("failed to install DuckDB extension {extension}")]
    Install {
        extension: String,
        #[source]
        err: duckdb::Error,
    },
    #[error("failed to load DuckDB extension {extension}")]
    Load {
        extension: String,
        #[source]
        err: duckdb::Error,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extensions to install and load, in order.
    pub extensions: Vec<String>,
    /// Directory from which extensions are installed and loaded.
    pub extension_directory: Option<String>,
    /// DuckDB home directory, which must be writable if extensions are installed.
    pub home_directory: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["httpfs".to_string()],
            extension_directory: None,
            home_directory: None,
        }
    }
}

/// DuckDb is an in-memory DuckDB database, opened once per process.
pub struct DuckDb {
    // Root connection which is cloned into a session for each statement.
    // It's held behind a Mutex only so that DuckDb is Sync.
    root: Mutex<duckdb::Connection>,
    extensions: Vec<String>,
}

impl DuckDb {
    pub fn open(config: &EngineConfig) -> Result<Self, InitError> {
        let EngineConfig {
            extensions,
            extension_directory,
            home_directory,
        } = config;

        let flags = duckdb::Config::default()
            .access_mode(duckdb::AccessMode::ReadWrite)
            .map_err(InitError::Open)?;
        let conn = duckdb::Connection::open_in_memory_with_flags(flags).map_err(InitError::Open)?;

        let one: i32 = conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .map_err(InitError::Ping)?;
        if one != 1 {
            return Err(InitError::Ping(duckdb::Error::QueryReturnedNoRows));
        }

        for (name, value) in [
            ("home_directory", home_directory),
            ("extension_directory", extension_directory),
        ] {
            let Some(value) = value else { continue };
            let setting = format!("SET {name} = '{}';", value.replace('\'', "''"));

            conn.execute_batch(&setting)
                .map_err(|err| InitError::Configure { setting, err })?;
            tracing::debug!(%name, %value, "applied DuckDB setting");
        }

        for extension in extensions {
            let target = extension_target(extension);

            conn.execute_batch(&format!("INSTALL {target};"))
                .map_err(|err| InitError::Install {
                    extension: extension.clone(),
                    err,
                })?;
            conn.execute_batch(&format!("LOAD {target};"))
                .map_err(|err| InitError::Load {
                    extension: extension.clone(),
                    err,
                })?;
            tracing::debug!(%extension, "loaded DuckDB extension");
        }

        tracing::info!(?extensions, "DuckDB engine is ready");

        Ok(Self {
            root: Mutex::new(conn),
            extensions: extensions.clone(),
        })
    }

    /// Extensions which were loaded when the engine was opened.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Close the engine. This is best-effort: DuckDb holds no durable
    /// state, so a failure to close is logged and otherwise ignored.
    pub fn close(self) {
        let conn = match self.root.into_inner() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err((_conn, error)) = conn.close() {
            tracing::warn!(%error, "failed to close DuckDB connection");
        }
    }

    fn session(&self) -> anyhow::Result<duckdb::Connection> {
        let root = self
            .root
            .lock()
            .map_err(|_| anyhow::anyhow!("DuckDB root connection is poisoned"))?;

        root.try_clone().context("failed to open DuckDB session")
    }
}

// Extensions are named (`httpfs`), or are paths to an extension binary
// (`/opt/extensions/httpfs.duckdb_extension`) which must be quoted.
fn extension_target(extension: &str) -> String {
    if extension.ends_with(".duckdb_extension") {
        format!("'{}'", extension.replace('\'', "''"))
    } else {
        extension.to_string()
    }
}

impl Engine for DuckDb {
    fn execute(&self, statement: &str) -> anyhow::Result<()> {
        let session = self.session()?;
        session.execute_batch(statement)?;
        Ok(())
    }
}
