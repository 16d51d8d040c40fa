use crate::artifact::ArtifactBody;
use crate::transform::Failure;
use anyhow::Context;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;

/// Correlation of a response with the request which produced it.
/// Both values are issued with the request and must be echoed unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub route: String,
    pub token: String,
}

/// Publisher returns transformed objects (or failures) to the requester.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Publish the `body` as a successful response.
    async fn publish(&self, correlation: &Correlation, body: ArtifactBody) -> anyhow::Result<()>;

    /// Publish `failure` as an error response.
    async fn publish_error(&self, correlation: &Correlation, failure: &Failure)
        -> anyhow::Result<()>;
}

/// S3Publisher publishes through the S3 WriteGetObjectResponse API.
pub struct S3Publisher {
    client: aws_sdk_s3::Client,
}

impl S3Publisher {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Build an S3Publisher using credentials and region of the environment.
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;

        Self::new(aws_sdk_s3::Client::new(&config))
    }
}

#[async_trait::async_trait]
impl Publisher for S3Publisher {
    async fn publish(&self, correlation: &Correlation, body: ArtifactBody) -> anyhow::Result<()> {
        let ArtifactBody { file, len } = body;

        let stream = ByteStream::read_from()
            .file(file)
            .build()
            .await
            .context("failed to build response body stream")?;

        let request = self
            .client
            .write_get_object_response()
            .request_route(&correlation.route)
            .request_token(&correlation.token)
            .status_code(200)
            .content_type("text/csv")
            .content_length(len as i64)
            .body(stream);

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => anyhow::bail!(
                "WriteGetObjectResponse failed ({}): {}",
                err.code().unwrap_or_default(),
                err.message().unwrap_or(&err.to_string()),
            ),
        }
    }

    async fn publish_error(
        &self,
        correlation: &Correlation,
        failure: &Failure,
    ) -> anyhow::Result<()> {
        let request = self
            .client
            .write_get_object_response()
            .request_route(&correlation.route)
            .request_token(&correlation.token)
            .status_code(failure.kind.status_code() as i32)
            .error_code(failure.kind.error_code())
            .error_message(header_value(&failure.message));

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => anyhow::bail!(
                "WriteGetObjectResponse of error failed ({}): {}",
                err.code().unwrap_or_default(),
                err.message().unwrap_or(&err.to_string()),
            ),
        }
    }
}

/// Maximum length of an error message returned to the requester.
pub const MAX_ERROR_MESSAGE: usize = 1024;

// Map `message` into a value which is permitted within an HTTP header.
// Engine errors are frequently multi-line, and may hold arbitrary text.
// Control and non-ASCII characters become spaces, and the value is truncated.
fn header_value(message: &str) -> String {
    let mut out: String = message
        .chars()
        .map(|c| if c.is_ascii_graphic() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    // `out` is ASCII, so any index is a char boundary.
    out.truncate(MAX_ERROR_MESSAGE);
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::transform::{ErrorKind, Stage};
    use aws_smithy_runtime::client::http::test_util::{capture_request, CaptureRequestReceiver};

    fn capturing_publisher() -> (S3Publisher, CaptureRequestReceiver) {
        let (http_client, requests) = capture_request(None);

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                "AKIDEXAMPLE",
                "secret",
                None,
                None,
                "test",
            ))
            .http_client(http_client)
            .build();

        (
            S3Publisher::new(aws_sdk_s3::Client::from_conf(config)),
            requests,
        )
    }

    fn correlation() -> Correlation {
        Correlation {
            route: "io-use1-001".to_string(),
            token: "OutputToken+/=abc".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_streams_the_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = ArtifactStore::new(tmp.path()).allocate();
        std::fs::write(artifact.path(), "id,name\n1,alice\n").unwrap();

        let (publisher, requests) = capturing_publisher();
        publisher
            .publish(&correlation(), artifact.open().await.unwrap())
            .await
            .unwrap();

        let request = requests.expect_request();
        let headers = request.headers();

        assert!(request.uri().contains("io-use1-001."), "{}", request.uri());
        assert_eq!(headers.get("x-amz-request-route"), Some("io-use1-001"));
        assert_eq!(headers.get("x-amz-request-token"), Some("OutputToken+/=abc"));
        assert_eq!(headers.get("x-amz-fwd-status"), Some("200"));
        assert_eq!(
            headers.get("x-amz-fwd-header-Content-Type"),
            Some("text/csv")
        );
        assert_eq!(headers.get("content-length"), Some("17"));
    }

    #[tokio::test]
    async fn publish_error_with_multi_line_message() {
        let failure = Failure {
            kind: ErrorKind::QueryExecution,
            stage: Stage::TemplateResolved,
            message: "failed to execute query: Binder Error: Referenced column \"nope\" not found in FROM clause!\nCandidate bindings: \"range\"\n\nLINE 1: COPY (SELECT nope FROM range(3)) TO ...\n                     ^".to_string(),
        };

        let (publisher, requests) = capturing_publisher();
        publisher
            .publish_error(&correlation(), &failure)
            .await
            .unwrap();

        let request = requests.expect_request();
        let headers = request.headers();

        assert_eq!(headers.get("x-amz-request-route"), Some("io-use1-001"));
        assert_eq!(headers.get("x-amz-request-token"), Some("OutputToken+/=abc"));
        assert_eq!(headers.get("x-amz-fwd-status"), Some("400"));
        assert_eq!(
            headers.get("x-amz-fwd-error-code"),
            Some("QueryExecutionFailed")
        );
        insta::assert_snapshot!(headers.get("x-amz-fwd-error-message").unwrap(), @r###"failed to execute query: Binder Error: Referenced column "nope" not found in FROM clause! Candidate bindings: "range" LINE 1: COPY (SELECT nope FROM range(3)) TO ... ^"###);
    }

    #[test]
    fn header_values_are_cleaned_and_truncated() {
        assert_eq!(header_value("one\ntwo\r\n\tthree"), "one two three");
        assert_eq!(header_value("caf\u{e9} \u{0}ok"), "caf ok");

        let long = "x".repeat(MAX_ERROR_MESSAGE * 2);
        assert_eq!(header_value(&long).len(), MAX_ERROR_MESSAGE);
    }
}
