use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error};

use shared_config::AppConfig;

#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;
        Self::parse_response(response).await
    }

    /// Inserts or patches rows and asks PostgREST to echo them back.
    pub async fn request_returning<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: &str,
        body: Value,
    ) -> Result<T>
    where T: DeserializeOwned {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        self.request_with_headers(method, path, Some(auth_token), Some(body), Some(headers)).await
    }

    async fn parse_response<T>(response: reqwest::Response) -> Result<T>
    where T: DeserializeOwned {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("API error ({}): {}", status, text);

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    anyhow!("Authentication error: {}", text)
                }
                StatusCode::NOT_FOUND => anyhow!("Resource not found: {}", text),
                StatusCode::CONFLICT => anyhow!("Conflict: {}", text),
                _ => anyhow!("API error ({}): {}", status, text),
            });
        }

        if text.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// Uploads raw bytes to a storage bucket. Existing objects are never overwritten.
    pub async fn upload_object(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        auth_token: &str,
    ) -> Result<Value> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            bucket,
            encode_object_path(object_path)
        );
        debug!("Uploading {} bytes to {}", bytes.len(), url);

        let mut headers = self.get_headers(Some(auth_token))?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type)?);
        headers.insert("x-upsert", HeaderValue::from_static("false"));

        let response = self.client.request(Method::POST, &url)
            .headers(headers)
            .body(bytes)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    pub async fn delete_object(
        &self,
        bucket: &str,
        object_path: &str,
        auth_token: &str,
    ) -> Result<()> {
        let path = format!(
            "/storage/v1/object/{}/{}",
            bucket,
            encode_object_path(object_path)
        );

        let _: Value = self.request(Method::DELETE, &path, Some(auth_token), None).await?;
        Ok(())
    }

    pub async fn create_signed_url(
        &self,
        bucket: &str,
        object_path: &str,
        expires_in_seconds: u64,
        auth_token: &str,
    ) -> Result<String> {
        let path = format!(
            "/storage/v1/object/sign/{}/{}",
            bucket,
            encode_object_path(object_path)
        );

        let result: Value = self.request(
            Method::POST,
            &path,
            Some(auth_token),
            Some(json!({ "expiresIn": expires_in_seconds })),
        ).await?;

        let signed = result
            .get("signedURL")
            .or_else(|| result.get("signedUrl"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Storage did not return a signed URL"))?;

        Ok(format!("{}/storage/v1{}", self.base_url, signed))
    }

    pub fn public_url(&self, bucket: &str, object_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            bucket,
            encode_object_path(object_path)
        )
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

fn encode_object_path(object_path: &str) -> String {
    object_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
