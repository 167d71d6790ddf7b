use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Methods that carry the task body. A non-empty body on any other method
/// (notably GET) is ignored at the transport level.
const BODY_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
}

/// Outbound HTTP issuer sharing one connection pool across all dispatches
/// in the process. No retries here; a timeout surfaces as a transport
/// error like any other failure.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

fn body_is_empty(body: &serde_json::Value) -> bool {
    match body {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl HttpClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }

    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        json_body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| Error::Transport(format!("Invalid method: {method}")))?;

        let mut req = self.client.request(method.clone(), url);

        for (header_name, value) in headers {
            req = req.header(header_name, value);
        }

        if let Some(body) = json_body
            && !body_is_empty(body)
            && BODY_METHODS.contains(&method.as_str())
        {
            req = req.json(body);
        }

        let response = req.send().await.map_err(|err| {
            if err.is_timeout() {
                return Error::Transport(format!("Request timed out: {err}"));
            }

            Error::Transport(format!("Error sending request: {err}"))
        })?;

        let status_code = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| Error::Transport(format!("Error reading response: {err}")))?;

        Ok(HttpResponse {
            status_code,
            body: body.to_vec(),
        })
    }

    /// Fire-and-forget JSON POST used for callback delivery. The response
    /// body is ignored; a non-2xx status is not an error.
    pub async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        token: Option<&str>,
        payload: &T,
    ) -> Result<()> {
        let mut req = self.client.post(url).json(payload);

        if let Some(token) = token {
            req = req.header("X-Callback-Token", token);
        }

        req.send()
            .await
            .map_err(|err| Error::Transport(format!("Error sending request: {err}")))?;

        Ok(())
    }
}
