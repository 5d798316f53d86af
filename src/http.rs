//! HTTP transport for the flag service.
//!
//! The three endpoints the SDK talks to:
//! - polling GET (or REPORT) for the full flag bundle,
//! - long-lived streaming GET (or REPORT) for server-sent events,
//! - events POST for analytics payloads.
//!
//! The credential goes out verbatim in `Authorization`.  Unless
//! `use_report` is set, the user JSON rides in the path as a base64url
//! segment; with it, requests use the REPORT method with the user as the
//! body.  `?withReasons=true` is appended when evaluation reasons were
//! requested.

use crate::config::Config;
use crate::error::Result;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use tk_protocol::OutputEvent;
use uuid::Uuid;

pub(crate) const USER_AGENT_VALUE: &str =
    concat!("ToggleKitClient/", env!("CARGO_PKG_VERSION"));

pub(crate) const EVENT_SCHEMA_HEADER: &str = "X-ToggleKit-Event-Schema";
pub(crate) const EVENT_SCHEMA_VERSION: &str = "3";
pub(crate) const PAYLOAD_ID_HEADER: &str = "X-ToggleKit-Payload-ID";

fn report_method() -> Method {
    Method::from_bytes(b"REPORT").expect("static method token")
}

/// Flag-request URL for the polling endpoint.
pub(crate) fn poll_url(base: &str, use_report: bool, use_reasons: bool, user_json: &str) -> String {
    let mut url = if use_report {
        format!("{base}/msdk/evalx/user")
    } else {
        format!("{base}/msdk/evalx/users/{}", URL_SAFE_NO_PAD.encode(user_json))
    };
    if use_reasons {
        url.push_str("?withReasons=true");
    }
    url
}

/// Flag-request URL for the streaming endpoint.
pub(crate) fn stream_url(
    base: &str,
    use_report: bool,
    use_reasons: bool,
    user_json: &str,
) -> String {
    let mut url = if use_report {
        format!("{base}/meval")
    } else {
        format!("{base}/meval/{}", URL_SAFE_NO_PAD.encode(user_json))
    };
    if use_reasons {
        url.push_str("?withReasons=true");
    }
    url
}

#[derive(Debug)]
pub(crate) struct FetchResponse {
    pub status: u16,
    pub body: String,
}

/// One transport per environment, holding that environment's credential.
pub(crate) struct HttpTransport {
    http: reqwest::Client,
    credential: String,
    stream_uri: String,
    poll_uri: String,
    events_uri: String,
    use_report: bool,
    use_reasons: bool,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &Config, credential: String) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if !config.verify_peer {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(proxy) = &config.proxy_uri {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        if let Some(path) = &config.ca_cert_path {
            let pem = std::fs::read(path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(HttpTransport {
            http: builder.build()?,
            credential,
            stream_uri: config.stream_uri.clone(),
            poll_uri: config.poll_uri.clone(),
            events_uri: config.events_uri.clone(),
            use_report: config.use_report,
            use_reasons: config.use_reasons,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// One-shot fetch of the full flag bundle.  The body is only read on
    /// 200; callers classify every other status.
    pub async fn fetch_flags(&self, user_json: &str) -> Result<FetchResponse> {
        let url = poll_url(&self.poll_uri, self.use_report, self.use_reasons, user_json);
        let request = if self.use_report {
            self.http
                .request(report_method(), &url)
                .header(CONTENT_TYPE, "application/json")
                .body(user_json.to_owned())
        } else {
            self.http.get(&url)
        };

        let response = request
            .header(AUTHORIZATION, &self.credential)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = if status == 200 {
            response.text().await?
        } else {
            String::new()
        };
        Ok(FetchResponse { status, body })
    }

    /// Open the long-lived streaming response.  No request timeout: reads
    /// are bounded by the caller's progress watchdog instead.
    pub async fn open_stream(&self, user_json: &str) -> Result<reqwest::Response> {
        let url = stream_url(&self.stream_uri, self.use_report, self.use_reasons, user_json);
        let request = if self.use_report {
            self.http
                .request(report_method(), &url)
                .header(CONTENT_TYPE, "application/json")
                .body(user_json.to_owned())
        } else {
            self.http.get(&url)
        };

        Ok(request
            .header(AUTHORIZATION, &self.credential)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await?)
    }

    /// POST one analytics payload.  The payload id ties retries of the same
    /// batch together; callers reuse it when they re-send.
    pub async fn post_events(&self, events: &[OutputEvent], payload_id: &Uuid) -> Result<u16> {
        let url = format!("{}/mobile", self.events_uri);
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, &self.credential)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(EVENT_SCHEMA_HEADER, EVENT_SCHEMA_VERSION)
            .header(PAYLOAD_ID_HEADER, payload_id.to_string())
            .json(events)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}
