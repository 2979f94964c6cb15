//! Ledger network client
//!
//! The engine talks to the ledger through the `LedgerClient` trait. The
//! bundled `HttpLedgerClient` speaks a horizon-style HTTP API; tests script
//! the trait directly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::transaction::{Address, SignedTransaction};
use crate::Error;

/// Remote-owned snapshot of the fee-paying account.
///
/// The sequence number is consumed by each accepted submission, so this
/// snapshot must be refreshed immediately before every attempt and never
/// cached across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AccountState {
    /// Current sequence number.
    pub sequence: u64,
    /// Native balance.
    pub balance: u64,
}

/// Transport-level client failure with no structured ledger response.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request did not complete within the client timeout
    #[error("request timed out")]
    Timeout,

    /// The endpoint signalled rate limiting
    #[error("rate limited by the ledger endpoint")]
    RateLimited,

    /// Connection or protocol failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response body could not be parsed
    #[error("failed to parse response: {0}")]
    Parse(String),
}

// Translation boundary: a transport failure crossing out of the engine is
// always reclassified, never surfaced raw.
impl From<ClientError> for Error {
    fn from(error: ClientError) -> Self {
        Error::Transport(error.to_string())
    }
}

/// Structured rejection returned by the ledger for a submitted transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct Rejection {
    /// Transaction-level result code.
    pub code: String,

    /// Per-operation result codes, when the ledger reports them.
    #[serde(default)]
    pub operation_codes: Vec<String>,
}

/// Outcome of one submission round trip.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The network accepted the transaction.
    Accepted {
        /// Confirmed transaction hash.
        hash: String,
    },

    /// The network rejected the transaction with a structured code.
    Rejected(Rejection),
}

/// Ledger network operations the engine depends on.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Load the current account state for `address`.
    async fn load_account(&self, address: &Address) -> Result<AccountState, ClientError>;

    /// Current network base fee, per operation.
    async fn base_fee(&self) -> Result<u64, ClientError>;

    /// Submit a signed transaction and wait for the ledger's verdict.
    async fn submit(&self, transaction: &SignedTransaction) -> Result<SubmitOutcome, ClientError>;

    /// Authoritative network wall-clock, epoch seconds.
    async fn network_time(&self) -> Result<u64, ClientError>;
}

/// HTTP implementation of [`LedgerClient`] for horizon-style endpoints.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct FeeStats {
    base_fee: u64,
}

#[derive(Deserialize)]
struct NetworkInfo {
    unix_time: u64,
}

#[derive(Deserialize)]
struct SubmitAccepted {
    hash: String,
}

impl HttpLedgerClient {
    /// Create a client for the given base URL.
    ///
    /// Request timeouts are short so a slow endpoint cannot stall the race
    /// disproportionately.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn map_send_error(error: reqwest::Error) -> ClientError {
        if error.is_timeout() {
            ClientError::Timeout
        } else if error.is_connect() {
            ClientError::Transport(format!("cannot connect: {error}"))
        } else {
            ClientError::Transport(error.to_string())
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ClientError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "unexpected status {} for {path}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn load_account(&self, address: &Address) -> Result<AccountState, ClientError> {
        self.get_json(&format!("/accounts/{address}")).await
    }

    async fn base_fee(&self) -> Result<u64, ClientError> {
        let stats: FeeStats = self.get_json("/fee_stats").await?;
        Ok(stats.base_fee)
    }

    async fn submit(&self, transaction: &SignedTransaction) -> Result<SubmitOutcome, ClientError> {
        let response = self
            .client
            .post(format!("{}/transactions", self.base_url))
            .json(transaction)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(ClientError::RateLimited),
            status if status.is_success() => {
                let accepted: SubmitAccepted = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Parse(e.to_string()))?;
                Ok(SubmitOutcome::Accepted {
                    hash: accepted.hash,
                })
            }
            StatusCode::BAD_REQUEST => {
                let rejection: Rejection = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Parse(e.to_string()))?;
                Ok(SubmitOutcome::Rejected(rejection))
            }
            status => Err(ClientError::Transport(format!(
                "unexpected status {status} from submission"
            ))),
        }
    }

    async fn network_time(&self) -> Result<u64, ClientError> {
        let info: NetworkInfo = self.get_json("/").await?;
        Ok(info.unix_time)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted ledger used by the racer and coordinator tests.

    use std::sync::Mutex;

    use super::*;

    /// One scripted reply to `submit`, drained front to back. Once the
    /// script runs dry every further submission is accepted.
    #[derive(Debug, Clone, Copy)]
    pub enum Script {
        Accept,
        Reject(&'static str),
        TransportFail,
    }

    pub struct ScriptedLedger {
        scripts: Mutex<Vec<Script>>,
        sequence: Mutex<u64>,
        pub submitted: Mutex<Vec<SignedTransaction>>,
        pub network_time: u64,
        pub base_fee: u64,
        pub fail_time_probe: bool,
    }

    impl ScriptedLedger {
        pub fn new(network_time: u64, scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
                sequence: Mutex::new(100),
                submitted: Mutex::new(Vec::new()),
                network_time,
                base_fee: 100,
                fail_time_probe: false,
            }
        }

        pub fn submitted_count(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        async fn load_account(&self, _address: &Address) -> Result<AccountState, ClientError> {
            // The remote sequence advances between attempts, as it would
            // while competitors race for the same account window.
            let mut sequence = self.sequence.lock().unwrap();
            *sequence += 1;
            Ok(AccountState {
                sequence: *sequence,
                balance: 1_000_000,
            })
        }

        async fn base_fee(&self) -> Result<u64, ClientError> {
            Ok(self.base_fee)
        }

        async fn submit(
            &self,
            transaction: &SignedTransaction,
        ) -> Result<SubmitOutcome, ClientError> {
            self.submitted.lock().unwrap().push(transaction.clone());

            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() {
                    Script::Accept
                } else {
                    scripts.remove(0)
                }
            };

            match script {
                Script::Accept => Ok(SubmitOutcome::Accepted {
                    hash: transaction
                        .hash()
                        .map_err(|e| ClientError::Parse(e.to_string()))?,
                }),
                Script::Reject(code) => Ok(SubmitOutcome::Rejected(Rejection {
                    code: code.to_string(),
                    operation_codes: Vec::new(),
                })),
                Script::TransportFail => Err(ClientError::Timeout),
            }
        }

        async fn network_time(&self) -> Result<u64, ClientError> {
            if self.fail_time_probe {
                return Err(ClientError::Timeout);
            }
            Ok(self.network_time)
        }
    }
}
