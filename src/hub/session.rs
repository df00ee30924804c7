//! Session-managed hub client
//!
//! Every call except `Session.login` carries the session id inside its
//! params. When the hub reports the id as expired, the client drops it,
//! logs in once more with the credentials the session was issued for and
//! retries the call once. A second expiry is returned as `Error::Session`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::transport::{HttpTransport, RpcTransport};
use super::types::RpcRequest;
use crate::{Error, Result};

/// Credentials a session was issued for
#[derive(Clone, PartialEq, Eq)]
struct Credentials {
    username: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Authenticated hub session
///
/// Only [`HubClient`] reads or writes the token.
#[derive(Debug, Clone)]
pub struct Session {
    token: Option<String>,
    issued_at: Option<DateTime<Utc>>,
    last_used: Option<DateTime<Utc>>,
    endpoint: String,
    credentials: Credentials,
}

impl Session {
    /// Whether a token is currently held
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// When the current token was issued
    #[must_use]
    pub const fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// When the token last completed a call
    #[must_use]
    pub const fn last_used(&self) -> Option<DateTime<Utc>> {
        self.last_used
    }

    /// JSON-RPC endpoint the session belongs to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether this session was issued for the given hub and credentials
    #[must_use]
    pub fn matches(&self, hub_address: &str, username: &str, password: &str) -> bool {
        self.endpoint == endpoint_url(hub_address)
            && self.credentials.username == username
            && self.credentials.password == password
    }

    fn invalidate(&mut self) {
        self.token = None;
        self.issued_at = None;
    }
}

/// Build the JSON-RPC endpoint URL for a hub address
///
/// A bare host becomes `http://{host}/api/homematic.cgi`; an address that
/// already carries a scheme is used as the base URL.
#[must_use]
pub fn endpoint_url(hub_address: &str) -> String {
    let base = hub_address.trim().trim_end_matches('/');
    if base.contains("://") {
        format!("{base}/api/homematic.cgi")
    } else {
        format!("http://{base}/api/homematic.cgi")
    }
}

/// Hub JSON-RPC client
pub struct HubClient {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HubClient {
    /// Create a client over an arbitrary transport
    #[must_use]
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a client talking plain HTTP
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn http(timeout: Duration) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(timeout)?), timeout))
    }

    /// Open a session with the hub
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` if credentials are missing or rejected and
    /// `Error::Network` if the hub is unreachable or does not answer in time
    pub async fn login(
        &self,
        hub_address: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Session> {
        let (Some(username), Some(password)) = (username, password) else {
            return Err(Error::Auth("hub username or password not configured".to_string()));
        };
        if hub_address.trim().is_empty() {
            return Err(Error::Config("hub address not configured".to_string()));
        }

        let mut session = Session {
            token: None,
            issued_at: None,
            last_used: None,
            endpoint: endpoint_url(hub_address),
            credentials: Credentials {
                username: username.to_string(),
                password: password.to_string(),
            },
        };
        self.authenticate(&mut session).await?;
        Ok(session)
    }

    /// Invoke `method` with the session token attached
    ///
    /// An unauthenticated session logs in first. On an expiry-class error
    /// the session is cleared, re-established once, and the call retried once.
    ///
    /// # Errors
    ///
    /// - `Error::Network` on unreachable hub or timeout (session untouched)
    /// - `Error::Session` if the hub still reports expiry after the re-login
    /// - `Error::Auth` if the re-login is rejected
    /// - `Error::Rpc` for any other hub error
    pub async fn call(&self, session: &mut Session, method: &str, params: Value) -> Result<Value> {
        if !session.is_authenticated() {
            self.authenticate(session).await?;
        }

        match self.invoke(session, method, &params).await {
            Err(Error::Session(reason)) => {
                tracing::warn!(method, %reason, "hub session expired, logging in again");
                session.invalidate();
                self.authenticate(session).await?;

                self.invoke(session, method, &params).await.inspect_err(|e| {
                    if matches!(e, Error::Session(_)) {
                        session.invalidate();
                    }
                })
            }
            other => other,
        }
    }

    /// Close the session; failures are not actionable and only logged
    pub async fn logout(&self, session: &mut Session) {
        let Some(token) = session.token.take() else {
            return;
        };
        session.issued_at = None;

        let params = json!({ "_session_id_": token });
        match self.send(&session.endpoint, "Session.logout", params).await {
            Ok(resp) => {
                if let Some(err) = resp.error {
                    tracing::debug!(code = err.code, message = %err.message, "hub logout refused");
                } else {
                    tracing::debug!("hub session closed");
                }
            }
            Err(e) => tracing::debug!(error = %e, "hub logout failed"),
        }
    }

    /// Log in with the session's stored credentials and install the new token
    async fn authenticate(&self, session: &mut Session) -> Result<()> {
        let params = json!({
            "username": session.credentials.username,
            "password": session.credentials.password,
        });

        let resp = self.send(&session.endpoint, "Session.login", params).await?;

        if let Some(err) = resp.error {
            return Err(Error::Auth(format!(
                "login rejected ({}): {}",
                err.code, err.message
            )));
        }

        match resp.result {
            Value::String(token) if !token.is_empty() => {
                let now = Utc::now();
                session.token = Some(token);
                session.issued_at = Some(now);
                session.last_used = Some(now);
                tracing::info!(endpoint = %session.endpoint, "hub login succeeded");
                Ok(())
            }
            _ => Err(Error::Auth("login returned no session id".to_string())),
        }
    }

    /// One attempt of an authenticated call, expiry reported as `Error::Session`
    async fn invoke(&self, session: &mut Session, method: &str, params: &Value) -> Result<Value> {
        let Some(token) = session.token.clone() else {
            return Err(Error::Session("no session token".to_string()));
        };

        let mut params = match params {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        params.insert("_session_id_".to_string(), Value::String(token));

        let resp = self
            .send(&session.endpoint, method, Value::Object(params))
            .await?;

        if let Some(err) = resp.error {
            if err.is_session_expired() {
                return Err(Error::Session(err.message));
            }
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        session.last_used = Some(Utc::now());
        Ok(resp.result)
    }

    /// Send one request, bounded by the client timeout
    async fn send(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<super::types::RpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        tracing::trace!(method, id, "hub request");

        match tokio::time::timeout(self.timeout, self.transport.post(endpoint, &request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Network(format!(
                "{method} timed out after {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::hub::types::RpcResponse;

    /// Transport that replays scripted outcomes and records every request
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<RpcResponse>>>,
        seen: Mutex<Vec<RpcRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<RpcResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        async fn methods(&self) -> Vec<String> {
            self.seen.lock().await.iter().map(|r| r.method.clone()).collect()
        }
    }

    #[async_trait]
    impl RpcTransport for Scripted {
        async fn post(&self, _url: &str, request: &RpcRequest) -> Result<RpcResponse> {
            self.seen.lock().await.push(request.clone());
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(Error::Network("script exhausted".into())))
        }
    }

    fn client(t: &Arc<Scripted>) -> HubClient {
        HubClient::new(t.clone(), Duration::from_secs(1))
    }

    // -- endpoint_url ---------------------------------------------------------

    #[test]
    fn endpoint_from_bare_host() {
        assert_eq!(endpoint_url("192.168.1.20"), "http://192.168.1.20/api/homematic.cgi");
    }

    #[test]
    fn endpoint_keeps_explicit_scheme() {
        assert_eq!(endpoint_url("http://ccu.local/"), "http://ccu.local/api/homematic.cgi");
    }

    // -- login ----------------------------------------------------------------

    #[tokio::test]
    async fn login_stores_token() {
        let t = Scripted::new(vec![Ok(RpcResponse::ok(json!("sid-1")))]);
        let session = client(&t).login("hub", Some("u"), Some("p")).await.unwrap();

        assert!(session.is_authenticated());
        assert!(session.issued_at().is_some());
        let seen = t.seen.lock().await;
        assert_eq!(seen[0].params["username"], "u");
        assert!(seen[0].params.get("_session_id_").is_none());
    }

    #[tokio::test]
    async fn login_without_credentials_is_auth_error() {
        let t = Scripted::new(vec![]);
        let err = client(&t).login("hub", Some("u"), None).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(t.methods().await.is_empty());
    }

    #[tokio::test]
    async fn login_rejected_is_auth_error() {
        let t = Scripted::new(vec![Ok(RpcResponse::err(400, "invalid credentials"))]);
        let err = client(&t).login("hub", Some("u"), Some("bad")).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn login_null_result_is_auth_error() {
        let t = Scripted::new(vec![Ok(RpcResponse::ok(Value::Null))]);
        let err = client(&t).login("hub", Some("u"), Some("p")).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn login_unreachable_is_network_error() {
        let t = Scripted::new(vec![Err(Error::Network("connection refused".into()))]);
        let err = client(&t).login("hub", Some("u"), Some("p")).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    // -- call -----------------------------------------------------------------

    #[tokio::test]
    async fn call_attaches_session_id() {
        let t = Scripted::new(vec![
            Ok(RpcResponse::ok(json!("sid-1"))),
            Ok(RpcResponse::ok(json!(["1001"]))),
        ]);
        let c = client(&t);
        let mut s = c.login("hub", Some("u"), Some("p")).await.unwrap();

        let result = c.call(&mut s, "Device.listAll", Value::Null).await.unwrap();
        assert_eq!(result, json!(["1001"]));
        assert_eq!(t.seen.lock().await[1].params["_session_id_"], "sid-1");
    }

    #[tokio::test]
    async fn network_error_leaves_session_untouched() {
        let t = Scripted::new(vec![
            Ok(RpcResponse::ok(json!("sid-1"))),
            Err(Error::Network("host unreachable".into())),
        ]);
        let c = client(&t);
        let mut s = c.login("hub", Some("u"), Some("p")).await.unwrap();
        let issued = s.issued_at();

        let err = c.call(&mut s, "Device.listAll", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert!(s.is_authenticated());
        assert_eq!(s.issued_at(), issued);
        assert_eq!(t.methods().await, vec!["Session.login", "Device.listAll"]);
    }

    #[tokio::test]
    async fn non_session_rpc_error_is_not_retried() {
        let t = Scripted::new(vec![
            Ok(RpcResponse::ok(json!("sid-1"))),
            Ok(RpcResponse::err(501, "unknown method")),
        ]);
        let c = client(&t);
        let mut s = c.login("hub", Some("u"), Some("p")).await.unwrap();

        let err = c.call(&mut s, "Foo.bar", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: 501, .. }));
        assert!(s.is_authenticated());
        assert_eq!(t.methods().await.len(), 2);
    }

    #[tokio::test]
    async fn transport_timeout_maps_to_network_error() {
        struct Stalled;

        #[async_trait]
        impl RpcTransport for Stalled {
            async fn post(&self, _url: &str, _request: &RpcRequest) -> Result<RpcResponse> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RpcResponse::default())
            }
        }

        let c = HubClient::new(Arc::new(Stalled), Duration::from_millis(20));
        let err = c.login("hub", Some("u"), Some("p")).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    // -- logout ---------------------------------------------------------------

    #[tokio::test]
    async fn logout_swallows_failures() {
        let t = Scripted::new(vec![
            Ok(RpcResponse::ok(json!("sid-1"))),
            Err(Error::Network("connection reset".into())),
        ]);
        let c = client(&t);
        let mut s = c.login("hub", Some("u"), Some("p")).await.unwrap();

        c.logout(&mut s).await;
        assert!(!s.is_authenticated());
        assert_eq!(t.seen.lock().await[1].params["_session_id_"], "sid-1");
    }

    #[tokio::test]
    async fn logout_without_token_sends_nothing() {
        let t = Scripted::new(vec![Ok(RpcResponse::ok(json!("sid-1")))]);
        let c = client(&t);
        let mut s = c.login("hub", Some("u"), Some("p")).await.unwrap();
        c.logout(&mut s).await;
        c.logout(&mut s).await;

        assert_eq!(t.methods().await, vec!["Session.login", "Session.logout"]);
    }
}
