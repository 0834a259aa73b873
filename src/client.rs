//! Protocol engine.
//!
//! Drives login, the account listing and the paginated transaction listing
//! over a [`Transport`], threading [`SessionState`] from each response into
//! the next request.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::document::Document;
use crate::error::{BankError, BankResult};
use crate::mapper::{map_accounts, map_transactions, Account, Transaction};
use crate::request::{Credentials, DateRange, PaginationCursor, RequestBuilder};
use crate::session::SessionState;
use crate::transport::{IpDiscovery, Transport};

/// Unauthenticated client. [`OpenbankClient::login`] turns it into a
/// [`Session`].
pub struct OpenbankClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    builder: RequestBuilder,
}

impl<T: Transport> OpenbankClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let builder = RequestBuilder::new(config.protocol.clone());
        Self {
            config,
            transport,
            builder,
        }
    }

    /// Authenticate and open a session.
    ///
    /// Fails with `AuthenticationFailed` when the service answers with a
    /// fault or without a security token.
    pub async fn login<I>(self, credentials: &Credentials, ip_source: &I) -> BankResult<Session<T>>
    where
        I: IpDiscovery + ?Sized,
    {
        let public_ip = ip_source.public_ip().await?;
        info!("Logging in");

        let metrics = SessionMetrics::default();
        let mut state = SessionState::initial();
        let body = self.builder.login(credentials, &public_ip);

        let result = execute(
            &self.transport,
            &self.config,
            &metrics,
            &mut state,
            Operation::Login,
            &self.config.login_url(),
            body,
        )
        .await;

        match result {
            Ok(_) => {}
            Err(BankError::ServerFault(fault)) => {
                warn!(fault = %fault, "Login rejected");
                return Err(BankError::AuthenticationFailed(fault));
            }
            Err(e) => return Err(e),
        }

        if !state.is_authenticated() {
            warn!("Login response carried no security token");
            return Err(BankError::AuthenticationFailed(
                "login response carried no security token".to_string(),
            ));
        }

        info!("Login successful");
        Ok(Session {
            config: self.config,
            transport: self.transport,
            builder: self.builder,
            state: Mutex::new(state),
            metrics,
        })
    }
}

/// Counters for one session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    requests_sent: AtomicU64,
    pages_fetched: AtomicU64,
}

impl SessionMetrics {
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched.load(Ordering::Relaxed)
    }
}

/// An authenticated session.
///
/// Operations take `&self` but are serialized: each holds the session lock
/// for its whole duration, so at most one request is in flight.
pub struct Session<T: Transport> {
    config: ClientConfig,
    transport: T,
    builder: RequestBuilder,
    state: Mutex<SessionState>,
    metrics: SessionMetrics,
}

impl<T: Transport> Session<T> {
    /// Copy of the current session state.
    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// List the user's accounts, in the order the service returns them.
    pub async fn fetch_accounts(&self) -> BankResult<Vec<Account>> {
        let mut state = self.state.lock().await;
        let body = self.builder.accounts(&state)?;

        let document = execute(
            &self.transport,
            &self.config,
            &self.metrics,
            &mut state,
            Operation::Accounts,
            &self.config.products_url(),
            body,
        )
        .await?;

        let accounts = map_accounts(&document)?;
        info!(count = accounts.len(), "Accounts fetched");
        Ok(accounts)
    }

    /// Fetch every transaction of `account` in `range`.
    ///
    /// Pages are requested until the service marks the end of the list.
    /// Any failure discards the pages already fetched.
    pub async fn fetch_transactions(
        &self,
        account: &Account,
        range: DateRange,
    ) -> BankResult<Vec<Transaction>> {
        let mut state = self.state.lock().await;
        let mut cursor = PaginationCursor::first_page();
        let mut transactions = Vec::new();
        let mut page = 0u32;

        loop {
            page += 1;
            let body = self
                .builder
                .transaction_page(&state, &account.contract_id, range, &cursor)?;

            let document = execute(
                &self.transport,
                &self.config,
                &self.metrics,
                &mut state,
                Operation::Transactions,
                &self.config.transactions_url(),
                body,
            )
            .await?;

            let page_transactions = map_transactions(&document, account)?;
            self.metrics.pages_fetched.fetch_add(1, Ordering::Relaxed);
            debug!(
                account = %account.id,
                page,
                count = page_transactions.len(),
                "Transaction page fetched"
            );
            transactions.extend(page_transactions);

            cursor = PaginationCursor::from_page(&document)?;
            if cursor.is_last_page() {
                break;
            }
        }

        info!(
            account = %account.id,
            pages = page,
            count = transactions.len(),
            "Transactions fetched"
        );
        Ok(transactions)
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Login,
    Accounts,
    Transactions,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Accounts => "accounts",
            Self::Transactions => "transactions",
        }
    }
}

/// Send one request, parse the response and refresh `state` from it.
///
/// `state` is only replaced once the response has parsed and is not a
/// SOAP fault.
async fn execute<T: Transport + ?Sized>(
    transport: &T,
    config: &ClientConfig,
    metrics: &SessionMetrics,
    state: &mut SessionState,
    operation: Operation,
    url: &str,
    body: String,
) -> BankResult<Document> {
    debug!(operation = operation.as_str(), url = %url, "Sending request");
    metrics.requests_sent.fetch_add(1, Ordering::Relaxed);

    let headers = config.request_headers();
    let response = transport.send(url, body, &headers).await.map_err(|e| {
        warn!(operation = operation.as_str(), code = e.code(), error = %e, "Request failed");
        e
    })?;

    let document = Document::parse(&response).map_err(|e| {
        warn!(operation = operation.as_str(), code = e.code(), error = %e, "Unreadable response");
        e
    })?;

    if let Some(fault) = document.fault() {
        warn!(operation = operation.as_str(), fault = %fault, "SOAP fault");
        return Err(BankError::ServerFault(fault));
    }

    *state = state.update(&document);
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StaticIp;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct Scripted {
        responses: StdMutex<VecDeque<BankResult<Vec<u8>>>>,
        requests: StdMutex<Vec<(String, String)>>,
    }

    impl Scripted {
        fn new(responses: Vec<BankResult<&str>>) -> Self {
            Self {
                responses: StdMutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(|s| s.as_bytes().to_vec()))
                        .collect(),
                ),
                requests: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(
            &self,
            url: &str,
            body: String,
            _headers: &[(String, String)],
        ) -> BankResult<Vec<u8>> {
            self.requests.lock().unwrap().push((url.to_string(), body));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BankError::Transport("script exhausted".into())))
        }
    }

    const LOGIN_OK: &str = "<Envelope><methodResult><tokenCredential>TOK1</tokenCredential><cookieCredential>CK</cookieCredential></methodResult></Envelope>";

    fn client(responses: Vec<BankResult<&str>>) -> OpenbankClient<Scripted> {
        OpenbankClient::new(ClientConfig::default(), Scripted::new(responses))
    }

    fn credentials() -> Credentials {
        Credentials::new("12345678z", "secret")
    }

    fn ip() -> StaticIp {
        StaticIp("192.0.2.1".to_string())
    }

    #[tokio::test]
    async fn test_login_success() {
        let session = client(vec![Ok(LOGIN_OK)])
            .login(&credentials(), &ip())
            .await
            .unwrap();
        let state = session.snapshot().await;
        assert_eq!(state.token_credential(), Some("TOK1"));
        assert_eq!(state.cookie_credential(), Some("CK"));
        assert_eq!(session.metrics().requests_sent(), 1);

        let requests = session.transport.requests.lock().unwrap();
        assert!(requests[0].0.ends_with("/QUIZ_Def_Listener"));
        assert!(requests[0].1.contains(">12345678Z</CODIGO_DOCUM_PERSONA_CORP>"));
        assert!(requests[0].1.contains(">192.0.2.1</userAddress>"));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<StdMutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_login_logs_no_identity_or_secrets() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let session = client(vec![Ok(LOGIN_OK)])
            .login(&credentials(), &ip())
            .await
            .unwrap();
        assert!(session.snapshot().await.is_authenticated());

        let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Logging in"));
        assert!(!logs.to_uppercase().contains("12345678Z"));
        assert!(!logs.contains("secret"));
        assert!(!logs.contains("TOK1"));
    }

    #[tokio::test]
    async fn test_login_without_token_fails() {
        let result = client(vec![Ok("<Envelope><methodResult/></Envelope>")])
            .login(&credentials(), &ip())
            .await;
        assert!(matches!(result, Err(BankError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_login_fault_is_authentication_failure() {
        let fault = "<Envelope><Body><Fault><faultcode>x</faultcode><faultstring>Usuario bloqueado</faultstring></Fault></Body></Envelope>";
        match client(vec![Ok(fault)]).login(&credentials(), &ip()).await {
            Err(BankError::AuthenticationFailed(message)) => {
                assert_eq!(message, "Usuario bloqueado")
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_login_malformed_response() {
        let result = client(vec![Ok("<Envelope>")])
            .login(&credentials(), &ip())
            .await;
        assert!(matches!(result, Err(BankError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let session = client(vec![
            Ok(LOGIN_OK),
            Err(BankError::Transport("connection reset".into())),
        ])
        .login(&credentials(), &ip())
        .await
        .unwrap();

        let err = session.fetch_accounts().await.unwrap_err();
        assert_eq!(err.code(), "TRANSPORT_ERROR");
        assert_eq!(session.transport.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fault_leaves_state_unchanged() {
        let session = client(vec![
            Ok(LOGIN_OK),
            Ok("<Envelope><Fault><faultstring>Sesion caducada</faultstring><tokenCredential>BAD</tokenCredential></Fault></Envelope>"),
        ])
        .login(&credentials(), &ip())
        .await
        .unwrap();
        let before = session.snapshot().await;

        let err = session.fetch_accounts().await.unwrap_err();
        assert_eq!(err.code(), "SERVER_FAULT");
        assert_eq!(session.snapshot().await, before);
    }
}
