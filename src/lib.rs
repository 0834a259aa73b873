//! Openbank session client
//!
//! Client for the undocumented SOAP API behind the Openbank mobile app:
//! authenticates, lists accounts and retrieves paginated transaction
//! histories.
//!
//! # Features
//!
//! - Login with security token capture
//! - Sticky session state refreshed from every response
//! - Account listing with currency-aware amounts
//! - Transaction listing that follows server continuation tokens
//!
//! # Example
//!
//! ```ignore
//! use openbank_client::{ClientConfig, Credentials, DateRange, HttpTransport, OpenbankClient, StaticIp};
//!
//! let config = ClientConfig::default();
//! let transport = HttpTransport::new(&config)?;
//! let session = OpenbankClient::new(config, transport)
//!     .login(&Credentials::new("12345678z", "secret"), &StaticIp("203.0.113.7".into()))
//!     .await?;
//! let accounts = session.fetch_accounts().await?;
//! let range = DateRange::last_month(chrono::Local::now().date_naive());
//! let transactions = session.fetch_transactions(&accounts[0], range).await?;
//! ```

pub mod client;
pub mod config;
pub mod document;
pub mod envelope;
pub mod error;
pub mod mapper;
pub mod request;
pub mod session;
pub mod transport;

pub use client::{OpenbankClient, Session, SessionMetrics};
pub use config::ClientConfig;
pub use document::{Document, Element};
pub use error::{BankError, BankResult};
pub use mapper::{find_account_by_iban, Account, Money, Transaction};
pub use request::{Credentials, DateRange, PaginationCursor, RequestBuilder};
pub use session::SessionState;
pub use transport::{HttpIpDiscovery, HttpTransport, IpDiscovery, StaticIp, Transport};
