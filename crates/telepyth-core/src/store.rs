//! Persistent token/identity index.
//!
//! Two sled trees back the store:
//! - `index`: token -> postcard-encoded [`TokenRecord`]
//! - `rev-index`: decimal user id -> token
//!
//! Every write runs as a multi-tree transaction while holding the writer lock,
//! so the uniqueness check in [`TokenStore::issue_token`] and the read-then-flip
//! in [`TokenStore::revoke_token`] never interleave with another writer.
//! Reads bypass the lock entirely.
//!
//! The store never logs; callers decide what a failure means to the user.

use std::{cell::RefCell, path::Path, sync::Mutex};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sled::{
    transaction::{
        ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
        TransactionalTree,
    },
    Transactional, Tree,
};

use crate::domain::{Token, User, UserId};

const INDEX_TREE: &str = "index";
const REV_INDEX_TREE: &str = "rev-index";

/// How many candidates `issue_token` draws before giving up.
pub const MAX_TOKEN_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not generate a unique token in {attempts} attempts")]
    TokenGenerationExhausted { attempts: usize },

    #[error("unknown token")]
    UnknownToken(String),

    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),

    #[error("corrupted index: {0}")]
    Corrupted(String),

    #[error("token writer lock poisoned")]
    WriterPoisoned,
}

impl StoreError {
    /// Lookup misses, as opposed to infrastructure failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownToken(_) | Self::UnknownUser(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Value stored in the forward index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub user: User,
    pub revoked: bool,
}

/// Source of candidate token strings.
pub trait TokenSource: Send {
    fn next_token(&mut self) -> String;
}

/// Decimal rendering of a random `u64` drawn from a process-local PRNG.
pub struct RandomTokens {
    rng: StdRng,
}

impl RandomTokens {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl TokenSource for RandomTokens {
    fn next_token(&mut self) -> String {
        self.rng.gen::<u64>().to_string()
    }
}

pub struct TokenStore {
    db: sled::Db,
    index: Tree,
    rev_index: Tree,
    writer: Mutex<Box<dyn TokenSource>>,
}

impl TokenStore {
    /// Create or open the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Throwaway database, removed when dropped.
    pub fn temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    /// Wrap an already opened database, creating both trees if missing.
    pub fn from_db(db: sled::Db) -> StoreResult<Self> {
        let index = db.open_tree(INDEX_TREE)?;
        let rev_index = db.open_tree(REV_INDEX_TREE)?;
        Ok(Self {
            db,
            index,
            rev_index,
            writer: Mutex::new(Box::new(RandomTokens::from_entropy())),
        })
    }

    pub fn with_token_source(self, source: impl TokenSource + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(source)),
            ..self
        }
    }

    /// Issue a fresh token for `user` and make it the user's current one.
    ///
    /// A token previously issued to the same user keeps its forward entry and
    /// is not revoked.
    pub fn issue_token(&self, user: &User) -> StoreResult<Token> {
        let mut guard = self.writer.lock().map_err(|_| StoreError::WriterPoisoned)?;
        let source = RefCell::new(&mut **guard);

        let record = encode(&TokenRecord {
            user: user.clone(),
            revoked: false,
        })?;
        let user_key = user.id.to_string();

        let token = (&self.index, &self.rev_index)
            .transaction(|(index, rev_index)| -> ConflictableTransactionResult<String, StoreError> {
                let token = unique_token(index, &mut **source.borrow_mut())?;
                index.insert(token.as_bytes(), record.clone())?;
                rev_index.insert(user_key.as_bytes(), token.as_bytes())?;
                Ok(token)
            })
            .map_err(from_tx)?;

        Ok(Token(token))
    }

    pub fn lookup_user(&self, token: &str) -> StoreResult<User> {
        Ok(self.record(token)?.user)
    }

    pub fn lookup_token(&self, user_id: UserId) -> StoreResult<Token> {
        let raw = self
            .rev_index
            .get(user_id.to_string().as_bytes())?
            .ok_or(StoreError::UnknownUser(user_id))?;
        Ok(Token(decode_str(&raw)?))
    }

    /// Mark the user's current token as revoked and return it.
    pub fn revoke_token(&self, user_id: UserId) -> StoreResult<Token> {
        let _guard = self.writer.lock().map_err(|_| StoreError::WriterPoisoned)?;
        let user_key = user_id.to_string();

        let token = (&self.index, &self.rev_index)
            .transaction(|(index, rev_index)| -> ConflictableTransactionResult<String, StoreError> {
                let raw = rev_index
                    .get(user_key.as_bytes())?
                    .ok_or(StoreError::UnknownUser(user_id))
                    .map_err(ConflictableTransactionError::Abort)?;
                let token = decode_str(&raw).map_err(ConflictableTransactionError::Abort)?;

                let raw = index
                    .get(token.as_bytes())?
                    .ok_or_else(|| {
                        StoreError::Corrupted(format!(
                            "user {user_id} points at missing token {token}"
                        ))
                    })
                    .map_err(ConflictableTransactionError::Abort)?;
                let mut record =
                    decode_record(&raw).map_err(ConflictableTransactionError::Abort)?;
                record.revoked = true;

                let value = encode(&record).map_err(ConflictableTransactionError::Abort)?;
                index.insert(token.as_bytes(), value)?;
                Ok(token)
            })
            .map_err(from_tx)?;

        Ok(Token(token))
    }

    pub fn is_revoked(&self, token: &str) -> StoreResult<bool> {
        Ok(self.record(token)?.revoked)
    }

    pub fn record(&self, token: &str) -> StoreResult<TokenRecord> {
        let raw = self
            .index
            .get(token.as_bytes())?
            .ok_or_else(|| StoreError::UnknownToken(token.to_string()))?;
        decode_record(&raw)
    }

    /// Every forward entry, in key order.
    pub fn records(&self) -> StoreResult<Vec<(Token, TokenRecord)>> {
        self.index
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                Ok((Token(decode_str(&key)?), decode_record(&value)?))
            })
            .collect()
    }

    /// Every reverse entry, in key order.
    pub fn reverse_entries(&self) -> StoreResult<Vec<(UserId, Token)>> {
        self.rev_index
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                let key = decode_str(&key)?;
                let user_id = key
                    .parse::<i64>()
                    .map_err(|_| StoreError::Corrupted(format!("bad user key {key:?}")))?;
                Ok((UserId(user_id), Token(decode_str(&value)?)))
            })
            .collect()
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn unique_token(
    index: &TransactionalTree,
    source: &mut dyn TokenSource,
) -> ConflictableTransactionResult<String, StoreError> {
    for _ in 0..MAX_TOKEN_ATTEMPTS {
        let candidate = source.next_token();
        if candidate.is_empty() {
            continue;
        }
        if index.get(candidate.as_bytes())?.is_none() {
            return Ok(candidate);
        }
    }
    Err(ConflictableTransactionError::Abort(
        StoreError::TokenGenerationExhausted {
            attempts: MAX_TOKEN_ATTEMPTS,
        },
    ))
}

fn from_tx(e: TransactionError<StoreError>) -> StoreError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Storage(e),
    }
}

fn encode(record: &TokenRecord) -> StoreResult<Vec<u8>> {
    Ok(postcard::to_allocvec(record)?)
}

fn decode_record(raw: &[u8]) -> StoreResult<TokenRecord> {
    Ok(postcard::from_bytes(raw)?)
}

fn decode_str(raw: &[u8]) -> StoreResult<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|e| StoreError::Corrupted(format!("non-utf8 key or value: {e}")))
}
