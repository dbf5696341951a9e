/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Errors returned by the ledger.
//!
//! [`StorageError`] means the ledger holds a value it cannot read; [`BlockVerifyError`] and
//! [`TransactionError`] mean a block or a transaction is not valid against the ledger. Neither kind
//! is fatal: the offending block or transaction is rejected and the ledger is left as it was.

use std::fmt::{self, Display, Formatter};

use crate::types::data_types::BlockHeight;

#[derive(Debug)]
pub enum StorageError {
    DeserializeValueError {
        key: String,
        source: std::io::Error,
    },
    SerializeValueError {
        key: String,
        source: std::io::Error,
    },
    ValueExpectedButNotFound {
        key: String,
    },
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DeserializeValueError { key, source } => {
                write!(f, "Could not deserialize the value at {}: {}", key, source)
            }
            StorageError::SerializeValueError { key, source } => {
                write!(f, "Could not serialize the value for {}: {}", key, source)
            }
            StorageError::ValueExpectedButNotFound { key } => {
                write!(f, "Expected a value at {}, but found none", key)
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// Reasons a block fails [`Block::verify`](crate::types::block::Block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockVerifyError {
    GenesisHashMismatch,
    HeightMismatch {
        ledger_version: u64,
        block_height: BlockHeight,
    },
    BodyHashMismatch,
    ParentHashMismatch,
    BlockDelayMismatch,
    RewriteWindowMismatch,
    MaxWeightExceeded {
        weight: u64,
        max_weight: u64,
    },
    MinerInfoNotFound {
        miner_id: String,
    },
    InvalidPose,
    InvalidCharm,
    InvalidSignature,
}

impl Display for BlockVerifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BlockVerifyError::GenesisHashMismatch => {
                write!(f, "Verify block: genesis block hash does not match the ledger")
            }
            BlockVerifyError::HeightMismatch {
                ledger_version,
                block_height,
            } => write!(
                f,
                "Verify block: block height {} does not match ledger version {}",
                block_height, ledger_version
            ),
            BlockVerifyError::BodyHashMismatch => {
                write!(f, "Verify block: header does not commit to the block body")
            }
            BlockVerifyError::ParentHashMismatch => {
                write!(f, "Verify block: previous block hash does not match the ledger")
            }
            BlockVerifyError::BlockDelayMismatch => {
                write!(f, "Verify block: block delay does not match the ledger")
            }
            BlockVerifyError::RewriteWindowMismatch => {
                write!(f, "Verify block: rewrite window does not match the ledger")
            }
            BlockVerifyError::MaxWeightExceeded { weight, max_weight } => write!(
                f,
                "Verify block: block weight {} exceeds the maximum of {}",
                weight, max_weight
            ),
            BlockVerifyError::MinerInfoNotFound { miner_id } => {
                write!(f, "Verify block: miner info not found for {}", miner_id)
            }
            BlockVerifyError::InvalidPose => write!(f, "Verify block: invalid pose"),
            BlockVerifyError::InvalidCharm => write!(f, "Verify block: invalid charm"),
            BlockVerifyError::InvalidSignature => write!(f, "Verify block: invalid block signature"),
        }
    }
}

impl std::error::Error for BlockVerifyError {}

/// Reasons a transaction fails to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    UuidTooLong,
    ExpiredAtHeight { max_height: u64 },
    ExpiredAtTime { record_by: u64 },
    GenesisNotAtHeightZero,
    MissingMaker,
    MakerAccountNotFound { account: String },
    MakerKeyNotFound { key_name: String },
    KeyNotPermitted { key_name: String, transaction_type: String },
    InvalidNonce { expected: u64, found: u64 },
    MissingSignature,
    InvalidSignature,
    UuidAlreadyUsed,
    InsufficientFunds { balance: u64, cost: u64 },
    AccountNotFound { account: String },
    AccountAlreadyExists { account: String },
    InvalidAccountName { account: String },
    InvalidVisage,
    MinerAlreadyRegistered { account: String },
    AssetNotFound,
    NotAssetOwner,
    UnknownAssetType { type_name: String },
    UnknownAssetField { field: String },
    AssetFieldTypeMismatch { field: String },
    InvalidMaturity { maturity: u64 },
    DeferredTransactionPending { account: String },
    Storage(String),
}

impl Display for TransactionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::UuidTooLong => write!(f, "Transaction UUID is too long"),
            TransactionError::ExpiredAtHeight { max_height } => {
                write!(f, "Transaction expired after height {}", max_height)
            }
            TransactionError::ExpiredAtTime { record_by } => {
                write!(f, "Transaction expired after time {}", record_by)
            }
            TransactionError::GenesisNotAtHeightZero => {
                write!(f, "Genesis transaction may only be applied to an empty ledger")
            }
            TransactionError::MissingMaker => write!(f, "Transaction has no maker"),
            TransactionError::MakerAccountNotFound { account } => {
                write!(f, "Maker account {} not found", account)
            }
            TransactionError::MakerKeyNotFound { key_name } => {
                write!(f, "Maker key {} not found", key_name)
            }
            TransactionError::KeyNotPermitted {
                key_name,
                transaction_type,
            } => write!(
                f,
                "Key {} is not permitted to authorize {}",
                key_name, transaction_type
            ),
            TransactionError::InvalidNonce { expected, found } => write!(
                f,
                "Invalid transaction nonce: expected {}, found {}",
                expected, found
            ),
            TransactionError::MissingSignature => write!(f, "Transaction is not signed"),
            TransactionError::InvalidSignature => write!(f, "Invalid transaction signature"),
            TransactionError::UuidAlreadyUsed => write!(f, "Transaction UUID was already used"),
            TransactionError::InsufficientFunds { balance, cost } => write!(
                f,
                "Insufficient funds: balance {} does not cover cost {}",
                balance, cost
            ),
            TransactionError::AccountNotFound { account } => {
                write!(f, "Account {} not found", account)
            }
            TransactionError::AccountAlreadyExists { account } => {
                write!(f, "Account {} already exists", account)
            }
            TransactionError::InvalidAccountName { account } => {
                write!(f, "Invalid account name {}", account)
            }
            TransactionError::InvalidVisage => write!(f, "Visage does not verify against the motto"),
            TransactionError::MinerAlreadyRegistered { account } => {
                write!(f, "Account {} is already a miner", account)
            }
            TransactionError::AssetNotFound => write!(f, "Asset not found"),
            TransactionError::NotAssetOwner => write!(f, "Maker does not own the asset"),
            TransactionError::UnknownAssetType { type_name } => {
                write!(f, "Unknown asset type {}", type_name)
            }
            TransactionError::UnknownAssetField { field } => {
                write!(f, "Unknown asset field {}", field)
            }
            TransactionError::AssetFieldTypeMismatch { field } => {
                write!(f, "Wrong type for asset field {}", field)
            }
            TransactionError::InvalidMaturity { maturity } => {
                write!(f, "Maturity {} overflows the block height", maturity)
            }
            TransactionError::DeferredTransactionPending { account } => write!(
                f,
                "A deferred transaction of {} with the same UUID or nonce has not matured yet",
                account
            ),
            TransactionError::Storage(message) => write!(f, "Storage error: {}", message),
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<StorageError> for TransactionError {
    fn from(value: StorageError) -> Self {
        TransactionError::Storage(value.to_string())
    }
}

#[derive(Debug)]
pub enum LedgerError {
    Storage(StorageError),
    Verify(BlockVerifyError),
    Transaction {
        uuid: String,
        error: TransactionError,
    },
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Storage(err) => Display::fmt(err, f),
            LedgerError::Verify(err) => Display::fmt(err, f),
            LedgerError::Transaction { uuid, error } => {
                write!(f, "Transaction {} failed: {}", uuid, error)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<StorageError> for LedgerError {
    fn from(value: StorageError) -> Self {
        LedgerError::Storage(value)
    }
}

impl From<BlockVerifyError> for LedgerError {
    fn from(value: BlockVerifyError) -> Self {
        LedgerError::Verify(value)
    }
}
