//! CSRF-aware REST client
//!
//! Plain HTTP calls against the backend origin. Every request that can
//! mutate state carries the `X-CSRFToken` header; without a token such a
//! request is refused locally instead of being sent.

use std::fmt;
use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::ChannelConfig;
use crate::error::{ApiError, ApiResult};
use crate::notify::{Notifier, ToastKind};

pub const CSRF_HEADER: &str = "X-CSRFToken";

const CSRF_COOKIE: &str = "csrftoken";

const GENERIC_ERROR: &str = "Something went wrong. Please try again.";

/// CSRF token value
#[derive(Clone, PartialEq, Eq)]
pub struct CsrfToken(String);

impl CsrfToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Extract the token from a `Cookie` header value
    pub fn from_cookie_header(cookie: &str) -> Option<Self> {
        cookie
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == CSRF_COOKIE)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
            .map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CsrfToken(***)")
    }
}

#[derive(Debug, Deserialize)]
struct UnreadCount {
    #[serde(alias = "count")]
    unread_count: u64,
}

#[derive(Debug, Deserialize)]
struct ActionResult {
    #[serde(default)]
    success: bool,
}

pub struct ApiClient {
    http: reqwest::Client,
    origin: Url,
    notifications: String,
    csrf: Option<CsrfToken>,
    cookie: Option<String>,
    notifier: Arc<dyn Notifier>,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, config: &ChannelConfig, notifier: Arc<dyn Notifier>) -> Self {
        let csrf = config
            .csrf_token
            .clone()
            .map(CsrfToken::new)
            .or_else(|| config.cookie.as_deref().and_then(CsrfToken::from_cookie_header));

        Self {
            http,
            origin: config.origin.clone(),
            notifications: config.stream_resource.clone(),
            csrf,
            cookie: config.cookie.clone(),
            notifier,
        }
    }

    pub fn with_csrf_token(mut self, token: CsrfToken) -> Self {
        self.csrf = Some(token);
        self
    }

    pub fn csrf_token(&self) -> Option<&CsrfToken> {
        self.csrf.as_ref()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.request_json(Method::GET, path, None).await
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: Option<&Value>) -> ApiResult<T> {
        self.request_json(Method::POST, path, body).await
    }

    /// Issue a request and decode its JSON body
    ///
    /// Failures are logged and shown to the user as a generic error toast
    /// before being returned.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ApiResult<T> {
        match self.execute(&method, path, body).await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(
                    method = %method,
                    path,
                    code = e.code(),
                    error = %e,
                    "API request failed"
                );
                self.notifier.show(GENERIC_ERROR, ToastKind::Error);
                Err(e)
            }
        }
    }

    /// Unread notification count
    pub async fn unread_count(&self) -> ApiResult<u64> {
        let path = format!("/{}/api/count/", self.notifications);
        let count: UnreadCount = self.get_json(&path).await?;
        Ok(count.unread_count)
    }

    /// Mark one notification as read. Returns the server's success flag.
    pub async fn mark_read(&self, notification_id: &str) -> ApiResult<bool> {
        let path = format!("/{}/api/mark-read/{}/", self.notifications, notification_id);
        let result: ActionResult = self.post_json(&path, None).await?;
        Ok(result.success)
    }

    /// Mark every notification as read. Returns the server's success flag.
    pub async fn mark_all_read(&self) -> ApiResult<bool> {
        let path = format!("/{}/api/mark-all-read/", self.notifications);
        let result: ActionResult = self.post_json(&path, None).await?;
        if result.success {
            self.notifier
                .show("All notifications marked as read", ToastKind::Success);
        }
        Ok(result.success)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> ApiResult<T> {
        let mutating = !method.is_safe();
        let url = self.origin.join(path)?;

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(ACCEPT, "application/json");

        if mutating {
            let token = self.csrf.as_ref().ok_or(ApiError::MissingCsrfToken)?;
            request = request.header(CSRF_HEADER, token.as_str());
        }
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie.as_str());
        }
        request = match body {
            Some(body) => request.json(body),
            None if mutating => request.header(CONTENT_TYPE, "application/json"),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(if status == StatusCode::FORBIDDEN && !mutating {
                ApiError::Status(status.as_u16())
            } else {
                ApiError::from_status(status)
            });
        }

        Ok(response.json::<T>().await?)
    }
}
