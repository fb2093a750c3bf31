//! [`HttpClient`] backed by `reqwest`, the host for a procedure's
//! `http` step kind.

use async_trait::async_trait;
use quarrygate_common::GatewayError;
use quarrygate_procedures::HttpClient;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client config is static and always valid");
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(&self, method: &str, url: &str, headers: HashMap<String, String>, body: Option<Value>) -> Result<Value, GatewayError> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| GatewayError::ProcedureStep(format!("unsupported HTTP method '{method}'")))?;

        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| GatewayError::ProcedureStep(format!("invalid header name '{key}'")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|_| GatewayError::ProcedureStep(format!("invalid header value for '{key}'")))?;
            header_map.insert(name, value);
        }

        let mut request = self.client.request(method, url).headers(header_map);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| GatewayError::ProcedureStep(format!("http step request failed: {err}")))?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(GatewayError::ProcedureStep(format!("http step got status {status}: {payload}")));
        }
        Ok(payload)
    }
}
