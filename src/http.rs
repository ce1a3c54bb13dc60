use std::thread;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum HttpError {
    #[error("HTTP status {status}{}", body_suffix(.body))]
    Status { status: u16, body: String },
    #[error("request failed after {attempts} attempt(s): HTTP status {status}{}", body_suffix(.body))]
    StatusExhausted {
        status: u16,
        body: String,
        attempts: usize,
    },
    #[error("request failed after {attempts} attempt(s): transport error: {message}")]
    Transport { message: String, attempts: usize },
    #[error("request failed: response decode failed: {0}")]
    Decode(String),
}

impl HttpError {
    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } | HttpError::StatusExhausted { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" ({body})")
    }
}

/// One HTTP call, described independently of the client library.
#[derive(Debug, Clone)]
pub(crate) struct HttpRequest<'a> {
    pub(crate) method: &'a str,
    pub(crate) url: &'a str,
    pub(crate) headers: &'a [(String, String)],
    pub(crate) query: &'a [(String, String)],
    pub(crate) body: Option<&'a str>,
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

pub(crate) fn send_with_retries(
    request: &HttpRequest<'_>,
    policy: &RetryPolicy,
) -> Result<String, HttpError> {
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(policy.connect_timeout)
            .timeout_read(policy.read_timeout)
            .timeout_write(policy.read_timeout)
            .build();

        let mut call = agent.request(request.method, request.url);
        for (key, value) in request.headers {
            call = call.set(key, value);
        }
        for (key, value) in request.query {
            call = call.query(key, value);
        }

        let result = match request.body {
            Some(body) => call.send_string(body),
            None => call.call(),
        };

        match result {
            Ok(response) => {
                return response
                    .into_string()
                    .map_err(|err| HttpError::Decode(err.to_string()));
            }
            Err(ureq::Error::Status(status, response)) => {
                let response_body = response.into_string().ok().unwrap_or_default();
                let body = response_body.trim().chars().take(240).collect::<String>();

                if should_retry_http_status(status) && attempt < attempts {
                    thread::sleep(policy.retry_delay);
                    continue;
                }

                if should_retry_http_status(status) {
                    return Err(HttpError::StatusExhausted {
                        status,
                        body,
                        attempts,
                    });
                }

                return Err(HttpError::Status { status, body });
            }
            Err(ureq::Error::Transport(err)) => {
                let message = err.to_string();
                if attempt < attempts {
                    thread::sleep(policy.retry_delay);
                    last_error = Some(message);
                    continue;
                }
                return Err(HttpError::Transport { message, attempts });
            }
        }
    }

    Err(HttpError::Transport {
        message: last_error.unwrap_or_else(|| "exhausted attempts".to_string()),
        attempts,
    })
}


#[cfg(test)]
mod tests {
    use super::test_server::{Behavior, TestServer};
    use super::*;

    fn policy(read_timeout: Duration, attempts: usize) -> RetryPolicy {
        RetryPolicy {
            connect_timeout: Duration::from_millis(200),
            read_timeout,
            attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn get(url: &str) -> HttpRequest<'_> {
        HttpRequest {
            method: "GET",
            url,
            headers: &[],
            query: &[],
            body: None,
        }
    }

    #[test]
    fn retries_retryable_statuses_until_success() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(500, "server-error".to_string()),
            Behavior::Respond(429, "throttled".to_string()),
            Behavior::Respond(200, "ok".to_string()),
        ]);

        let result = send_with_retries(
            &get(&server.base_url),
            &policy(Duration::from_millis(200), 3),
        );

        assert_eq!(result.expect("should eventually succeed"), "ok");
        assert_eq!(server.request_count(), 3);
    }

    #[test]
    fn does_not_retry_hard_client_errors() {
        let server = TestServer::spawn(vec![Behavior::Respond(404, "not-found".to_string())]);

        let result = send_with_retries(
            &get(&server.base_url),
            &policy(Duration::from_millis(200), 5),
        );

        let err = result.expect_err("404 should not be retried");
        assert_eq!(err.status(), Some(404));
        assert!(
            err.to_string().contains("HTTP status 404"),
            "unexpected error message: {err}"
        );
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn retries_transport_timeout_and_recovers() {
        let server = TestServer::spawn(vec![
            Behavior::DelayRespond(Duration::from_millis(120), 200, "slow".to_string()),
            Behavior::Respond(200, "ok".to_string()),
        ]);

        let result = send_with_retries(
            &get(&server.base_url),
            &policy(Duration::from_millis(20), 2),
        );

        assert_eq!(result.expect("timeout should be retried"), "ok");
        assert_eq!(server.request_count(), 2);
    }

    #[test]
    fn returns_retry_exhausted_error_for_retryable_status() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(503, "down".to_string()),
            Behavior::Respond(503, "still-down".to_string()),
        ]);

        let result = send_with_retries(
            &get(&server.base_url),
            &policy(Duration::from_millis(200), 2),
        );

        let err = result.expect_err("retryable failures should eventually error");
        let message = err.to_string();
        assert!(
            message.contains("after 2 attempt(s)") && message.contains("HTTP status 503"),
            "unexpected error message: {message}"
        );
        assert_eq!(server.request_count(), 2);
    }

    #[test]
    fn posts_body_and_headers() {
        let server = TestServer::spawn(vec![Behavior::Respond(201, "{}".to_string())]);
        let headers = vec![("trakt-api-version".to_string(), "2".to_string())];
        let request = HttpRequest {
            method: "POST",
            url: &server.base_url,
            headers: &headers,
            query: &[],
            body: Some(r#"{"progress":12.5}"#),
        };

        let result = send_with_retries(&request, &policy(Duration::from_millis(200), 1));
        assert_eq!(result.expect("post should succeed"), "{}");

        let seen = server.seen_requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("POST "));
        assert!(seen[0].to_ascii_lowercase().contains("trakt-api-version: 2"));
        assert!(seen[0].ends_with(r#"{"progress":12.5}"#));
    }
}
