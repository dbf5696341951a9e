/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transactions: the common envelope every transaction carries, and the closed set of bodies the
//! ledger knows how to apply.
//!
//! The envelope holds the fields checked before any body is applied (UUID, expiry, maturity, and the
//! [maker](TransactionMaker) who pays for and signs the transaction). How each body mutates the ledger
//! is defined in [`ledger::transaction_application`](crate::ledger).

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{Keypair, PublicKeyBytes},
    data_types::{AssetIndex, BlockHeight, SignatureBytes},
    records::{AssetFieldValue, KeyAndPolicy, MinerInfo, Schema},
};

/// Longest UUID a transaction may carry.
pub const MAX_UUID_LENGTH: usize = 36;

/// The account, key, and fees of the party that authorizes a transaction.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionMaker {
    pub account: String,
    pub key_name: String,
    pub nonce: u64,
    /// Paid to the miner of the block that applies the transaction.
    pub gratuity: u64,
    /// Part of the gratuity routed to the payout pool instead of the miner.
    pub profit_share: u64,
    /// Paid into the payout pool.
    pub transfer_tax: u64,
}

impl TransactionMaker {
    pub fn new(account: &str, key_name: &str, nonce: u64) -> TransactionMaker {
        TransactionMaker {
            account: account.to_string(),
            key_name: key_name.to_string(),
            nonce,
            gratuity: 0,
            profit_share: 0,
            transfer_tax: 0,
        }
    }

    pub fn with_gratuity(mut self, gratuity: u64) -> TransactionMaker {
        self.gratuity = gratuity;
        self
    }

    pub fn with_fees(mut self, profit_share: u64, transfer_tax: u64) -> TransactionMaker {
        self.profit_share = profit_share;
        self.transfer_tax = transfer_tax;
        self
    }

    /// Amount debited from the maker's account on top of the body's own cost.
    pub fn fees(&self) -> u64 {
        self.gratuity.saturating_add(self.transfer_tax)
    }
}

/// An account created by the genesis transaction.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GenesisAccount {
    pub name: String,
    pub key: PublicKeyBytes,
    pub balance: u64,
    pub miner: Option<MinerInfo>,
}

/// Chain parameters and initial state, applied once, at height 0.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GenesisBody {
    pub identity: String,
    /// Minimum number of seconds between a block and its parent.
    pub block_delay: u64,
    /// Span, in seconds, in which a shorter branch may still overturn a longer one.
    pub rewrite_window: u64,
    pub max_block_weight: u64,
    pub reward_pool: u64,
    pub accounts: Vec<GenesisAccount>,
}

/// The closed set of transaction bodies.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TransactionBody {
    Genesis(GenesisBody),
    /// Open the account `<maker>.<suffix>`, funded with `grant` from the maker.
    OpenAccount {
        suffix: String,
        key: PublicKeyBytes,
        grant: u64,
    },
    /// Add or replace a named key on the maker's account.
    AffirmKey {
        key_name: String,
        key: KeyAndPolicy,
    },
    /// Register the maker's account as a miner.
    RegisterMiner(MinerInfo),
    SendVol {
        to: String,
        amount: u64,
    },
    PublishSchema(Schema),
    /// Create an asset of `type_name`, owned by the maker, overriding the given default fields.
    MintAsset {
        type_name: String,
        fields: Vec<(String, AssetFieldValue)>,
    },
    SendAsset {
        to: String,
        asset: AssetIndex,
    },
}

impl TransactionBody {
    /// Name of the transaction type, as used in key policies and log messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionBody::Genesis(_) => "GENESIS",
            TransactionBody::OpenAccount { .. } => "OPEN_ACCOUNT",
            TransactionBody::AffirmKey { .. } => "AFFIRM_KEY",
            TransactionBody::RegisterMiner(_) => "REGISTER_MINER",
            TransactionBody::SendVol { .. } => "SEND_VOL",
            TransactionBody::PublishSchema(_) => "PUBLISH_SCHEMA",
            TransactionBody::MintAsset { .. } => "MINT_ASSET",
            TransactionBody::SendAsset { .. } => "SEND_ASSET",
        }
    }

    /// Amount moved out of the maker's account by the body itself.
    pub fn cost(&self) -> u64 {
        match self {
            TransactionBody::OpenAccount { grant, .. } => *grant,
            TransactionBody::SendVol { amount, .. } => *amount,
            _ => 0,
        }
    }
}

/// A transaction: envelope, body, and the maker's signature.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub uuid: String,
    /// Last block height at which the transaction may be applied. 0 means no limit.
    pub max_height: u64,
    /// Latest block time at which the transaction may be applied. 0 means no limit.
    pub record_by: u64,
    /// Number of blocks after its own block at which the transaction takes effect.
    pub maturity: u64,
    pub maker: Option<TransactionMaker>,
    pub body: TransactionBody,
    pub signature: Option<SignatureBytes>,
}

impl Transaction {
    /// Create an unsigned transaction without a maker.
    pub fn new(uuid: &str, body: TransactionBody) -> Transaction {
        Transaction {
            uuid: uuid.to_string(),
            max_height: 0,
            record_by: 0,
            maturity: 0,
            maker: None,
            body,
            signature: None,
        }
    }

    /// Create the genesis transaction.
    pub fn genesis(body: GenesisBody) -> Transaction {
        Transaction::new("genesis", TransactionBody::Genesis(body))
    }

    pub fn with_maker(mut self, maker: TransactionMaker) -> Transaction {
        self.maker = Some(maker);
        self
    }

    pub fn with_maturity(mut self, maturity: u64) -> Transaction {
        self.maturity = maturity;
        self
    }

    pub fn with_max_height(mut self, max_height: u64) -> Transaction {
        self.max_height = max_height;
        self
    }

    pub fn with_record_by(mut self, record_by: u64) -> Transaction {
        self.record_by = record_by;
        self
    }

    /// Sign the transaction with `keypair`, which should hold the maker's key.
    pub fn signed(mut self, keypair: &Keypair) -> Transaction {
        self.signature = Some(keypair.sign(&self.signing_bytes()));
        self
    }

    /// The bytes covered by the maker's signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writing into a Vec<u8> cannot fail.
        let _ = self.uuid.serialize(&mut bytes);
        let _ = self.max_height.serialize(&mut bytes);
        let _ = self.record_by.serialize(&mut bytes);
        let _ = self.maturity.serialize(&mut bytes);
        let _ = self.maker.serialize(&mut bytes);
        let _ = self.body.serialize(&mut bytes);
        bytes
    }

    /// Weight counted against a block's maximum weight: the size of the encoded transaction.
    pub fn weight(&self) -> u64 {
        self.try_to_vec().map_or(0, |bytes| bytes.len() as u64)
    }

    /// Height at which the transaction takes effect when included in a block at `block_height`, or
    /// `None` if that height overflows.
    pub fn maturity_height(&self, block_height: BlockHeight) -> Option<BlockHeight> {
        block_height.checked_add(self.maturity)
    }

    pub fn nonce(&self) -> Option<u64> {
        self.maker.as_ref().map(|maker| maker.nonce)
    }

    pub fn gratuity(&self) -> u64 {
        self.maker.as_ref().map_or(0, |maker| maker.gratuity)
    }

    pub fn type_name(&self) -> &'static str {
        self.body.type_name()
    }
}
