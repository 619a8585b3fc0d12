//! Shared helpers: a server on an ephemeral port and an HTTP transport for
//! the engine.

#![allow(dead_code)]

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tether_engine::{
    codec::Payload, BackendError, BatchRequest, BatchResponseItem, Error, SaveOptions, Transport,
};
use tether_server::{config::Config, AppState};

/// Start a server on `127.0.0.1:0`, returning its base URL and state.
pub async fn spawn_server(config: Config) -> (String, AppState) {
    let state = AppState::new(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = tether_server::app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

pub async fn spawn_default() -> (String, AppState) {
    spawn_server(Config::default()).await
}

/// Engine transport speaking the server's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_version: "1.1".to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.base_url, self.api_version, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Error> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let err: BackendError = response.json().await.unwrap_or(BackendError {
                code: i64::from(status.as_u16()),
                message: status.to_string(),
            });
            return Err(Error::Transport {
                code: Some(err.code),
                message: err.message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| Error::transport(e.to_string()))
    }
}

impl Transport for HttpTransport {
    async fn create(
        &self,
        class_name: &str,
        payload: Payload,
        options: &SaveOptions,
    ) -> Result<Payload, Error> {
        let request = self
            .client
            .post(self.url(&format!("/classes/{class_name}")))
            .query(&options.query_params())
            .json(&payload);
        self.send(request).await
    }

    async fn update(
        &self,
        class_name: &str,
        object_id: &str,
        payload: Payload,
        options: &SaveOptions,
    ) -> Result<Payload, Error> {
        let request = self
            .client
            .put(self.url(&format!("/classes/{class_name}/{object_id}")))
            .query(&options.query_params())
            .json(&payload);
        self.send(request).await
    }

    async fn fetch(&self, class_name: &str, object_id: &str) -> Result<Payload, Error> {
        let request = self
            .client
            .get(self.url(&format!("/classes/{class_name}/{object_id}")));
        self.send(request).await
    }

    async fn delete(&self, class_name: &str, object_id: &str) -> Result<(), Error> {
        let request = self
            .client
            .delete(self.url(&format!("/classes/{class_name}/{object_id}")));
        self.send::<Payload>(request).await.map(|_| ())
    }

    async fn batch(&self, requests: Vec<BatchRequest>) -> Result<Vec<BatchResponseItem>, Error> {
        let request = self
            .client
            .post(self.url("/batch"))
            .json(&json!({ "requests": requests }));
        self.send(request).await
    }
}

/// Status and JSON body of a raw request.
pub async fn status_and_body(request: RequestBuilder) -> (StatusCode, serde_json::Value) {
    let response = request.send().await.unwrap();
    let status = response.status();
    let body = response.json().await.unwrap_or(serde_json::Value::Null);
    (status, body)
}
