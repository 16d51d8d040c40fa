use std::path::Path;

/// Query run when the request doesn't carry one of its own:
/// the first ten rows of the requested object, read as Parquet.
pub const DEFAULT_TEMPLATE: &str = "SELECT * FROM read_parquet('%s') LIMIT 10";

/// Substitution marker which is replaced with the source object locator.
pub const MARKER: &str = "%s";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("query template must contain a '%s' marker for the source object: {template}")]
    MissingMarker { template: String },
    #[error("query template contains {count} '%s' markers but exactly one is required: {template}")]
    DuplicateMarker { template: String, count: usize },
    #[error("request-supplied query templates are disabled")]
    RequestSqlDisabled,
}

/// Select the template to run, falling back to `default` when the
/// request didn't supply one (or supplied only whitespace).
pub fn resolve<'a>(requested: Option<&'a str>, default: &'a str) -> &'a str {
    match requested {
        Some(template) if !template.trim().is_empty() => template,
        _ => default,
    }
}

/// Bind `locator` into the single marker of `template`.
/// The locator is substituted verbatim: it's neither quoted nor escaped.
pub fn bind(template: &str, locator: &str) -> Result<String, Error> {
    match template.matches(MARKER).count() {
        1 => Ok(template.replacen(MARKER, locator, 1)),
        0 => Err(Error::MissingMarker {
            template: template.to_string(),
        }),
        count => Err(Error::DuplicateMarker {
            template: template.to_string(),
            count,
        }),
    }
}

/// Wrap `query` in a command which materializes its results as CSV
/// (with a leading header row) at `path`.
pub fn copy_to(query: &str, path: &Path) -> String {
    // A trailing terminator is fine on its own but not within COPY ( ... ).
    let query = query.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let path = path.to_string_lossy().replace('\'', "''");

    // The query is placed on lines of its own, so that a trailing
    // line comment doesn't swallow the remainder of the command.
    format!("COPY (\n{query}\n) TO '{path}' (FORMAT CSV, HEADER);")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binding_replaces_the_marker_verbatim() {
        let cases = [
            (
                "SELECT * FROM source('%s') LIMIT 10",
                "obj://bucket/key",
                "SELECT * FROM source('obj://bucket/key') LIMIT 10",
            ),
            (
                "SELECT max(trip_distance) AS max_distance FROM read_parquet('%s')",
                "https://bucket.s3.amazonaws.com/trips.parquet?X-Amz-Signature=abc%20def",
                "SELECT max(trip_distance) AS max_distance FROM read_parquet('https://bucket.s3.amazonaws.com/trips.parquet?X-Amz-Signature=abc%20def')",
            ),
            // A locator which itself contains a marker is not re-expanded.
            ("%s", "a%sb", "a%sb"),
        ];

        for (template, locator, expect) in cases {
            assert_eq!(bind(template, locator).unwrap(), expect);
        }
    }

    #[test]
    fn default_template_when_absent_or_empty() {
        for requested in [None, Some(""), Some("  \n ")] {
            let template = resolve(requested, DEFAULT_TEMPLATE);
            assert_eq!(
                bind(template, "s3://bucket/key.parquet").unwrap(),
                "SELECT * FROM read_parquet('s3://bucket/key.parquet') LIMIT 10",
            );
        }
        assert_eq!(
            resolve(Some("SELECT 1 FROM '%s'"), DEFAULT_TEMPLATE),
            "SELECT 1 FROM '%s'"
        );
    }

    #[test]
    fn marker_count_errors() {
        insta::assert_snapshot!(
            bind("SELECT 42", "s3://b/k").unwrap_err(),
            @"query template must contain a '%s' marker for the source object: SELECT 42"
        );
        insta::assert_snapshot!(
            bind("SELECT * FROM '%s' UNION ALL SELECT * FROM '%s'", "s3://b/k").unwrap_err(),
            @"query template contains 2 '%s' markers but exactly one is required: SELECT * FROM '%s' UNION ALL SELECT * FROM '%s'"
        );
    }

    #[test]
    fn copy_wrapping() {
        let path = Path::new("/tmp/sql-object-lambda-1234.csv");

        insta::assert_snapshot!(
            copy_to("SELECT * FROM read_parquet('s3://b/k') LIMIT 10", path),
            @r###"
        COPY (
        SELECT * FROM read_parquet('s3://b/k') LIMIT 10
        ) TO '/tmp/sql-object-lambda-1234.csv' (FORMAT CSV, HEADER);
        "###
        );
        // Trailing terminators are dropped.
        insta::assert_snapshot!(
            copy_to("SELECT 1;  \n", path),
            @r###"
        COPY (
        SELECT 1
        ) TO '/tmp/sql-object-lambda-1234.csv' (FORMAT CSV, HEADER);
        "###
        );
        // A trailing line comment is closed by the following newline.
        insta::assert_snapshot!(
            copy_to("SELECT 1 -- just one", path),
            @r###"
        COPY (
        SELECT 1 -- just one
        ) TO '/tmp/sql-object-lambda-1234.csv' (FORMAT CSV, HEADER);
        "###
        );
        // Quotes within the path are escaped.
        insta::assert_snapshot!(
            copy_to("SELECT 1", Path::new("/tmp/it's/out.csv")),
            @r###"
        COPY (
        SELECT 1
        ) TO '/tmp/it''s/out.csv' (FORMAT CSV, HEADER);
        "###
        );
    }
}
