//! Ledger transaction model and assembly
//!
//! Builds the signed claim-and-forward transaction for one race attempt:
//! `records_per_attempt` repetitions of a {claim, transfer} operation pair,
//! fee-sourced from the sponsor when one participates.

use ed25519_dalek::{Signer as _, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::debug;

use crate::client::AccountState;
use crate::{Error, Result};

/// A 32-byte ed25519 account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// Parse from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| Error::InvalidConfiguration(format!("address is not valid hex: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidConfiguration("address must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Signing identity of a race participant.
///
/// The secret never leaves this type.
pub struct Keypair {
    signing: SigningKey,
    address: Address,
}

impl Keypair {
    /// Build from a hex-encoded 32-byte signing seed.
    ///
    /// The seed is the output of an external key-derivation collaborator;
    /// anything that does not decode to exactly 32 bytes is an
    /// `InvalidSecret`.
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.trim())
            .map_err(|e| Error::InvalidSecret(format!("not valid hex: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidSecret("secret must decode to 32 bytes".to_string()))?;
        Ok(Self::from_seed(seed))
    }

    /// Build from a raw 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let address = Address(signing.verifying_key().to_bytes());
        Self { signing, address }
    }

    /// Public address of this identity.
    pub fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, digest: &[u8]) -> TransactionSignature {
        TransactionSignature {
            signer: self.address,
            bytes: self.signing.sign(digest).to_bytes().to_vec(),
        }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Validity window in epoch seconds. Transactions submitted outside
/// `[min_time, max_time]` are rejected by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Earliest instant the transaction is valid; the unlock instant.
    pub min_time: u64,
    /// Latest instant the transaction is valid.
    pub max_time: u64,
}

impl TimeWindow {
    /// Window opening at the unlock instant and closing `length_secs`
    /// later.
    pub fn from_unlock(unlock_at: u64, length_secs: u64) -> Self {
        Self {
            min_time: unlock_at,
            max_time: unlock_at.saturating_add(length_secs),
        }
    }
}

/// A single ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Claim a time-locked balance held by the ledger.
    ClaimBalance {
        /// Identifier of the claimable balance entry.
        balance_id: String,
    },

    /// Forward the claimed amount.
    Transfer {
        /// Receiving account.
        recipient: Address,
        /// Amount moved by this operation.
        amount: i64,
    },

    /// Release the sponsorship entry held for an account.
    RevokeSponsorship {
        /// The sponsored account.
        account: Address,
    },
}

/// Operation plus the account it acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedOperation {
    /// Account performing the operation.
    pub source: Address,
    /// The operation itself.
    pub operation: Operation,
}

/// The unsigned transaction body.
///
/// Encoding is deterministic: identical inputs produce byte-identical
/// payloads and therefore identical hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPayload {
    /// Fee-paying account; its sequence number is consumed on submission.
    pub source: Address,

    /// Sequence number this transaction consumes.
    pub sequence: u64,

    /// Fee bid per operation.
    pub fee_per_operation: u64,

    /// Validity window.
    pub time_window: TimeWindow,

    /// Ordered operations.
    pub operations: Vec<SourcedOperation>,
}

impl TransactionPayload {
    /// Hex-encoded SHA-256 digest identifying this transaction.
    pub fn hash(&self) -> Result<String> {
        Ok(hex::encode(self.digest()?))
    }

    fn digest(&self) -> Result<[u8; 32]> {
        Ok(Sha256::digest(self.encode()?).into())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Internal(format!("payload encoding failed: {e}")))
    }
}

/// A detached ed25519 signature over the payload digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    /// Account that produced the signature.
    pub signer: Address,
    /// Raw signature bytes.
    pub bytes: Vec<u8>,
}

impl TransactionSignature {
    /// Check this signature against the payload it claims to cover.
    pub fn verify(&self, payload: &TransactionPayload) -> bool {
        use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};

        let Ok(digest) = payload.digest() else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&self.signer.0) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.bytes) else {
            return false;
        };
        key.verify(&digest, &signature).is_ok()
    }
}

/// Signed transaction ready for submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// The signed-over body.
    pub payload: TransactionPayload,
    /// Sender signature first; sponsor signature second when present.
    pub signatures: Vec<TransactionSignature>,
}

impl SignedTransaction {
    /// Hex digest identifying this transaction.
    pub fn hash(&self) -> Result<String> {
        self.payload.hash()
    }
}

/// What one race attempt transfers, independent of account state and fees.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Identifier of the claimable balance entry.
    pub balance_id: String,
    /// Receiving account.
    pub recipient: Option<Address>,
    /// Amount per transfer operation.
    pub amount: i64,
    /// Claim+transfer pairs per attempt.
    pub records_per_attempt: u32,
    /// Append a sponsorship-revocation operation.
    pub revoke_sponsorship: bool,
}

impl TransferRequest {
    /// Checks that run before any network traffic.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(Error::InvalidAmount(self.amount));
        }
        if self.recipient.is_none() {
            return Err(Error::MissingRecipient);
        }
        if self.records_per_attempt < 1 {
            return Err(Error::InvalidConfiguration(
                "records_per_attempt must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Operation count of one assembled transaction.
    pub fn total_operations(&self) -> u64 {
        2 * u64::from(self.records_per_attempt) + u64::from(self.revoke_sponsorship)
    }
}

/// Assemble and sign one attempt's transaction.
///
/// The transaction consumes `account.sequence + 1` and is fee-sourced from
/// the sponsor when one participates, otherwise from the sender. Operations
/// are always sourced from the sender. The sender signs first; the sponsor
/// signs second iff present, since it authorizes spending from its own
/// sequence and balance.
pub fn assemble(
    account: &AccountState,
    sender: &Keypair,
    sponsor: Option<&Keypair>,
    request: &TransferRequest,
    fee_per_operation: u64,
    time_window: TimeWindow,
) -> Result<SignedTransaction> {
    request.validate()?;
    let recipient = request.recipient.ok_or(Error::MissingRecipient)?;

    if let Some(sponsor) = sponsor {
        if sponsor.address() == sender.address() {
            return Err(Error::InvalidConfiguration(
                "sponsor cannot be the same as sender".to_string(),
            ));
        }
    }

    let mut operations = Vec::with_capacity(request.total_operations() as usize);
    for _ in 0..request.records_per_attempt {
        operations.push(SourcedOperation {
            source: sender.address(),
            operation: Operation::ClaimBalance {
                balance_id: request.balance_id.clone(),
            },
        });
        operations.push(SourcedOperation {
            source: sender.address(),
            operation: Operation::Transfer {
                recipient,
                amount: request.amount,
            },
        });
    }
    if request.revoke_sponsorship {
        operations.push(SourcedOperation {
            source: sender.address(),
            operation: Operation::RevokeSponsorship {
                account: sender.address(),
            },
        });
    }

    let source = match sponsor {
        Some(sponsor) => sponsor.address(),
        None => sender.address(),
    };

    let payload = TransactionPayload {
        source,
        sequence: account.sequence + 1,
        fee_per_operation,
        time_window,
        operations,
    };

    let digest = payload.digest()?;
    let mut signatures = vec![sender.sign(&digest)];
    if let Some(sponsor) = sponsor {
        signatures.push(sponsor.sign(&digest));
    }

    debug!(
        sequence = payload.sequence,
        operations = payload.operations.len(),
        fee_per_operation,
        sponsored = sponsor.is_some(),
        "assembled transaction"
    );

    Ok(SignedTransaction {
        payload,
        signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Keypair {
        Keypair::from_seed([1u8; 32])
    }

    fn sponsor() -> Keypair {
        Keypair::from_seed([2u8; 32])
    }

    fn request(records: u32) -> TransferRequest {
        TransferRequest {
            balance_id: "balance-0001".to_string(),
            recipient: Some(Address([9u8; 32])),
            amount: 5_000,
            records_per_attempt: records,
            revoke_sponsorship: false,
        }
    }

    fn account() -> AccountState {
        AccountState {
            sequence: 41,
            balance: 1_000_000,
        }
    }

    fn window() -> TimeWindow {
        TimeWindow::from_unlock(1_700_000_000, 90)
    }

    #[test]
    fn test_operations_come_in_claim_transfer_pairs() {
        for records in 1u32..=4 {
            let tx = assemble(
                &account(),
                &sender(),
                None,
                &request(records),
                100,
                window(),
            )
            .unwrap();

            assert_eq!(tx.payload.operations.len(), 2 * records as usize);
            for pair in tx.payload.operations.chunks(2) {
                assert!(matches!(pair[0].operation, Operation::ClaimBalance { .. }));
                assert!(matches!(pair[1].operation, Operation::Transfer { .. }));
            }
        }
    }

    #[test]
    fn test_revoke_sponsorship_appends_one_operation() {
        let mut request = request(2);
        request.revoke_sponsorship = true;

        let tx = assemble(&account(), &sender(), None, &request, 100, window()).unwrap();
        assert_eq!(tx.payload.operations.len(), 5);
        assert!(matches!(
            tx.payload.operations[4].operation,
            Operation::RevokeSponsorship { .. }
        ));
    }

    #[test]
    fn test_sender_only_transaction() {
        let tx = assemble(&account(), &sender(), None, &request(1), 100, window()).unwrap();

        assert_eq!(tx.payload.source, sender().address());
        assert_eq!(tx.payload.sequence, 42);
        assert_eq!(tx.signatures.len(), 1);
        assert_eq!(tx.signatures[0].signer, sender().address());
        assert!(tx.signatures[0].verify(&tx.payload));
    }

    #[test]
    fn test_sponsored_transaction_is_fee_sourced_and_co_signed() {
        let tx = assemble(
            &account(),
            &sender(),
            Some(&sponsor()),
            &request(1),
            100,
            window(),
        )
        .unwrap();

        assert_eq!(tx.payload.source, sponsor().address());
        assert_eq!(tx.signatures.len(), 2);
        assert_eq!(tx.signatures[0].signer, sender().address());
        assert_eq!(tx.signatures[1].signer, sponsor().address());
        assert!(tx.signatures[0].verify(&tx.payload));
        assert!(tx.signatures[1].verify(&tx.payload));
        // Operations still act for the sender.
        assert!(tx
            .payload
            .operations
            .iter()
            .all(|op| op.source == sender().address()));
    }

    #[test]
    fn test_sponsor_must_differ_from_sender() {
        let result = assemble(
            &account(),
            &sender(),
            Some(&sender()),
            &request(1),
            100,
            window(),
        );
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        for amount in [0, -5_000] {
            let mut request = request(1);
            request.amount = amount;
            let result = assemble(&account(), &sender(), None, &request, 100, window());
            assert!(matches!(result, Err(Error::InvalidAmount(a)) if a == amount));
        }
    }

    #[test]
    fn test_missing_recipient_rejected() {
        let mut request = request(1);
        request.recipient = None;
        let result = assemble(&account(), &sender(), None, &request, 100, window());
        assert!(matches!(result, Err(Error::MissingRecipient)));
    }

    #[test]
    fn test_unsigned_payload_is_deterministic() {
        let a = assemble(&account(), &sender(), None, &request(2), 100, window()).unwrap();
        let b = assemble(&account(), &sender(), None, &request(2), 100, window()).unwrap();

        assert_eq!(a.payload, b.payload);
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_time_window_is_carried_verbatim() {
        let window = TimeWindow::from_unlock(1_700_000_000, 120);
        let tx = assemble(&account(), &sender(), None, &request(1), 100, window).unwrap();

        assert_eq!(tx.payload.time_window.min_time, 1_700_000_000);
        assert_eq!(tx.payload.time_window.max_time, 1_700_000_120);
    }

    #[test]
    fn test_invalid_secret_hex() {
        assert!(matches!(
            Keypair::from_secret_hex("not hex at all"),
            Err(Error::InvalidSecret(_))
        ));
        assert!(matches!(
            Keypair::from_secret_hex("abcd"),
            Err(Error::InvalidSecret(_))
        ));
    }

    #[test]
    fn test_keypair_round_trip_from_hex() {
        let keypair = Keypair::from_secret_hex(&"11".repeat(32)).unwrap();
        assert_eq!(keypair.address(), Keypair::from_seed([0x11; 32]).address());
    }

    #[test]
    fn test_address_parsing() {
        let address = Address::from_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(address.to_string(), "ab".repeat(32));

        assert!(Address::from_hex("zz").is_err());
        assert!(Address::from_hex("abcd").is_err());
    }
}
