use std::collections::BTreeMap;

/// ObjectLambdaEvent is the event delivered to an S3 Object Lambda function.
/// Only the portions used by this function are modeled.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLambdaEvent {
    pub x_amz_request_id: String,
    /// Present only for GetObject requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_object_context: Option<GetObjectContext>,
    #[serde(default)]
    pub user_request: UserRequest,
    #[serde(default)]
    pub protocol_version: String,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetObjectContext {
    /// Presigned URL of the original object.
    pub input_s3_url: String,
    /// Route and token through which the transformed object is returned.
    pub output_route: String,
    pub output_token: String,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl UserRequest {
    /// Value of the named request header. Header names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
