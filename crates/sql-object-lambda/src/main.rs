use anyhow::Context;
use clap::Parser;
use lambda_runtime::{service_fn, LambdaEvent};
use sql_object_lambda::{
    ArtifactStore, Args, DuckDb, ErrorKind, LogFormat, ObjectLambdaEvent, S3Publisher, Transformer,
};
use std::sync::Arc;

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    // Use reasonable defaults for printing structured logs to stderr.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Json => builder.json().with_current_span(true).init(),
        LogFormat::Text => builder
            .with_ansi(!matches!(std::env::var("NO_COLOR"), Ok(v) if v == "1"))
            .init(),
    }
    tracing::info!(?args, "started!");

    // The engine is opened exactly once, before any request is accepted.
    // A process which cannot open it must not serve requests.
    let engine = match DuckDb::open(&args.engine_config()) {
        Ok(engine) => Arc::new(engine),
        Err(error) => {
            tracing::error!(
                kind = ?ErrorKind::Initialization,
                error = format!("{:#}", anyhow::Error::from(error)),
                "failed to initialize engine"
            );
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async_main(args, engine.clone()));

    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    if let Ok(engine) = Arc::try_unwrap(engine) {
        engine.close();
    }
    result
}

async fn async_main(args: Args, engine: Arc<DuckDb>) -> anyhow::Result<()> {
    let publisher = Arc::new(S3Publisher::from_env().await);

    let transformer = Transformer::new(
        engine,
        publisher,
        ArtifactStore::new(&args.artifact_dir),
        args.transform_config(),
    )
    .context("invalid default query")?;
    let transformer = Arc::new(transformer);

    // The runtime delivers one event at a time to this process.
    lambda_runtime::run(service_fn(move |event: LambdaEvent<ObjectLambdaEvent>| {
        let transformer = transformer.clone();

        async move {
            let LambdaEvent { payload, context } = event;
            tracing::debug!(request_id = %context.request_id, deadline = context.deadline, "received event");

            transformer
                .handle(payload)
                .await
                .map_err(|err| lambda_runtime::Error::from(format!("{err:#}")))
        }
    }))
    .await
    .map_err(|err| anyhow::anyhow!(err))
}
