use crate::artifact::{Artifact, ArtifactStore};
use crate::engine::Engine;
use crate::event::ObjectLambdaEvent;
use crate::publish::{Correlation, Publisher};
use crate::template;
use std::path::PathBuf;
use std::sync::Arc;

/// Stages through which an invocation progresses, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum Stage {
    Start,
    TemplateResolved,
    QueryExecuted,
    ArtifactOpened,
    Published,
    ArtifactDeleted,
    Done,
}

/// Classes of failure. Only `Initialization` is fatal to the process:
/// every other class fails just the request which produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    #[serde(rename = "InitializationError")]
    Initialization,
    #[serde(rename = "TemplateError")]
    Template,
    #[serde(rename = "QueryExecutionError")]
    QueryExecution,
    #[serde(rename = "ArtifactIOError")]
    ArtifactIO,
    #[serde(rename = "PublishError")]
    Publish,
}

impl ErrorKind {
    /// HTTP status code returned to the requester.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Template | Self::QueryExecution => 400,
            Self::Initialization | Self::ArtifactIO => 500,
            Self::Publish => 502,
        }
    }

    /// Error code returned to the requester.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Initialization => "InitializationFailed",
            Self::Template => "InvalidQueryTemplate",
            Self::QueryExecution => "QueryExecutionFailed",
            Self::ArtifactIO => "ArtifactIOError",
            Self::Publish => "PublishFailed",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Template(#[from] template::Error),
    #[error("failed to execute query")]
    QueryExecution(#[source] anyhow::Error),
    #[error("failed to {op} artifact {path:?}")]
    ArtifactIO {
        op: &'static str,
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to publish response")]
    Publish(#[source] anyhow::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Template(_) => ErrorKind::Template,
            Self::QueryExecution(_) => ErrorKind::QueryExecution,
            Self::ArtifactIO { .. } => ErrorKind::ArtifactIO,
            Self::Publish(_) => ErrorKind::Publish,
        }
    }
}

/// Failure is the structured form of an Error, as reported to the requester.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub kind: ErrorKind,
    /// Last stage which the invocation completed.
    pub stage: Stage,
    /// Human-readable cause, including the chain of underlying errors.
    pub message: String,
}

impl Failure {
    pub fn new(stage: Stage, err: &Error) -> Self {
        Self {
            kind: err.kind(),
            stage,
            message: err_chain(err),
        }
    }
}

// Flatten an Error and its sources into a single display string.
fn err_chain(err: &Error) -> String {
    let mut out = err.to_string();
    let mut source = std::error::Error::source(err);

    while let Some(next) = source {
        out.push_str(": ");
        out.push_str(&next.to_string());
        source = next.source();
    }
    out
}

// Presigned locators carry credentials within their query string,
// which must not be logged or returned. Replace it wherever it appears in `text`.
fn redact_locator(text: &str, locator: &str) -> String {
    match locator.split_once('?') {
        Some((_, query)) if !query.is_empty() => text.replace(&format!("?{query}"), "?<redacted>"),
        _ => text.to_string(),
    }
}

/// Outcome of a handled invocation, returned to the Lambda runtime.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub request_id: String,
    /// Last stage which the invocation completed.
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Request header which carries a caller-supplied query template.
    pub request_sql_header: String,
    /// Template used when the request doesn't supply one.
    pub default_query: String,
    /// Whether caller-supplied templates are permitted at all.
    pub allow_request_sql: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            request_sql_header: "x-amz-meta-request-sql".to_string(),
            default_query: template::DEFAULT_TEMPLATE.to_string(),
            allow_request_sql: true,
        }
    }
}

/// Transformer runs caller-supplied queries over requested objects,
/// and publishes their results in place of the original objects.
pub struct Transformer {
    engine: Arc<dyn Engine>,
    publisher: Arc<dyn Publisher>,
    artifacts: ArtifactStore,
    config: TransformConfig,
}

impl Transformer {
    /// Build a Transformer, verifying that the configured default query is a valid template.
    pub fn new(
        engine: Arc<dyn Engine>,
        publisher: Arc<dyn Publisher>,
        artifacts: ArtifactStore,
        config: TransformConfig,
    ) -> Result<Self, template::Error> {
        template::bind(&config.default_query, "")?;

        Ok(Self {
            engine,
            publisher,
            artifacts,
            config,
        })
    }

    /// Handle an invocation.
    ///
    /// Request-scoped failures are published to the requester and returned
    /// within the Outcome. An Err is returned only if no response could be
    /// published at all, in which case the runtime reports an invocation error.
    #[tracing::instrument(name = "invocation", skip_all, fields(request_id = %event.x_amz_request_id))]
    pub async fn handle(&self, event: ObjectLambdaEvent) -> anyhow::Result<Outcome> {
        let ObjectLambdaEvent {
            x_amz_request_id: request_id,
            get_object_context,
            user_request,
            protocol_version: _,
        } = event;

        let Some(context) = get_object_context else {
            anyhow::bail!("event {request_id} has no getObjectContext and cannot be transformed");
        };
        let correlation = Correlation {
            route: context.output_route,
            token: context.output_token,
        };
        let requested = user_request.header(&self.config.request_sql_header);

        let mut stage = Stage::Start;
        let mut artifact = None;

        let result = self
            .run(
                &context.input_s3_url,
                requested,
                &correlation,
                &mut stage,
                &mut artifact,
            )
            .await;

        let err = match result {
            Ok(()) => {
                return Ok(Outcome {
                    request_id,
                    stage: Stage::Done,
                    error: None,
                })
            }
            Err(err) => err,
        };

        let mut failure = Failure::new(stage, &err);
        failure.message = redact_locator(&failure.message, &context.input_s3_url);
        tracing::warn!(kind=?failure.kind, ?stage, error=%failure.message, "transform failed");

        // Clean up an artifact which failed before it could be removed.
        if let Some(artifact) = artifact.take() {
            let path = artifact.path().to_owned();
            if let Err(error) = artifact.remove().await {
                tracing::error!(%error, ?path, "failed to remove artifact of failed transform");
            }
        }

        // The response was already published, and its token is spent.
        // Report the failure to the runtime but not the requester.
        if stage >= Stage::Published {
            return Ok(Outcome {
                request_id,
                stage,
                error: Some(failure),
            });
        }

        match self.publisher.publish_error(&correlation, &failure).await {
            Ok(()) => Ok(Outcome {
                request_id,
                stage,
                error: Some(failure),
            }),
            Err(publish_err) => {
                tracing::error!(error=%format!("{publish_err:#}"), "failed to publish transform failure");
                Err(publish_err.context(format!(
                    "failed to publish {:?} failure ({})",
                    failure.kind, failure.message
                )))
            }
        }
    }

    async fn run(
        &self,
        locator: &str,
        requested: Option<&str>,
        correlation: &Correlation,
        stage: &mut Stage,
        slot: &mut Option<Artifact>,
    ) -> Result<(), Error> {
        if requested.is_some_and(|r| !r.trim().is_empty()) && !self.config.allow_request_sql {
            return Err(template::Error::RequestSqlDisabled.into());
        }
        let template = template::resolve(requested, &self.config.default_query);
        let query = template::bind(template, locator)?;
        *stage = Stage::TemplateResolved;
        tracing::debug!(query = %redact_locator(&query, locator), "resolved query");

        let artifact = slot.insert(self.artifacts.allocate());
        let command = template::copy_to(&query, artifact.path());

        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.execute(&command))
            .await
            .map_err(|err| Error::QueryExecution(err.into()))?
            .map_err(Error::QueryExecution)?;
        *stage = Stage::QueryExecuted;

        let body = artifact.open().await.map_err(|err| Error::ArtifactIO {
            op: "open",
            path: artifact.path().to_owned(),
            err,
        })?;
        let len = body.len;
        *stage = Stage::ArtifactOpened;

        self.publisher
            .publish(correlation, body)
            .await
            .map_err(Error::Publish)?;
        *stage = Stage::Published;
        tracing::info!(bytes = len, "published transformed object");

        if let Some(artifact) = slot.take() {
            let path = artifact.path().to_owned();
            artifact.remove().await.map_err(|err| Error::ArtifactIO {
                op: "remove",
                path,
                err,
            })?;
        }
        *stage = Stage::ArtifactDeleted;

        Ok(())
    }
}
