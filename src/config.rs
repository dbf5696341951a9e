/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of a miner.
//!
//! A [`Configuration`] is built once, with the builder pattern, and handed to the
//! [node](crate::node::NodeSpec) or directly to a [`Miner`](crate::miner::Miner), which owns it from then
//! on:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .miner_id(String::from("alice"))
//!     .keypair(signing_key)
//!     .motto(String::from("charmed"))
//!     .url(String::from("http://127.0.0.1:9090/"))
//!     .log_events(true)
//!     .build();
//! ```
//!
//! Chain parameters (block delay, rewrite window, maximum block weight, and the reward pool) are not
//! part of a miner's configuration: they live in the ledger and are set by the genesis block.

use std::time::Duration;

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::block_tree::RewriteMode;
use crate::types::block::VerificationPolicy;

#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.miner_id(...)`
    - `.keypair(...)`
    - `.motto(...)`
    - `.url(...)`

    Optional:
    - `.verification_policy(...)`
    - `.rewrite_mode(...)`
    - `.minimum_gratuity(...)`
    - `.reward(...)`
    - `.consensus_lookahead(...)`
    - `.persist_frequency(...)`
    - `.persistence_retry_limit(...)`
    - `.persistence_retry_sleep(...)`
    - `.max_block_searches(...)`
    - `.request_retry_interval(...)`
    - `.peer_urls(...)`
    - `.accepted_release(...)`
    - `.produced_release(...)`
    - `.muted(...)`
    - `.tick_interval(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the name of the miner's account in the ledger. Required."))]
    pub miner_id: String,
    #[builder(setter(doc = "Set the miner's signing key, used for poses and block signatures. Required."))]
    pub keypair: SigningKey,
    #[builder(setter(doc = "Set the motto the miner's visage is a signature of. Required."))]
    pub motto: String,
    #[builder(setter(doc = "Set the URL other miners reach this miner at. Required."))]
    pub url: String,
    #[builder(
        default = VerificationPolicy::ALL,
        setter(doc = "Set the checks performed when applying blocks. Optional, defaults to all checks.")
    )]
    pub verification_policy: VerificationPolicy,
    #[builder(
        default = RewriteMode::Window,
        setter(doc = "Set whether branch comparison honours the rewrite window. Optional, defaults to `RewriteMode::Window`.")
    )]
    pub rewrite_mode: RewriteMode,
    #[builder(
        default = 0,
        setter(doc = "Set the smallest gratuity a transaction must offer to be mined. Optional, defaults to 0.")
    )]
    pub minimum_gratuity: u64,
    #[builder(
        default = 0,
        setter(doc = "Set the reward requested for each mined block; capped by the reward pool. Optional, defaults to 0.")
    )]
    pub reward: u64,
    #[builder(
        default = 10,
        setter(doc = "Set how many blocks past the ledger's head remote branches are followed. Optional, defaults to 10.")
    )]
    pub consensus_lookahead: u64,
    #[builder(
        default = 0,
        setter(doc = "Set every how many composed blocks the ledger is persisted; 0 only persists after mining. Optional, defaults to 0.")
    )]
    pub persist_frequency: u64,
    #[builder(
        default = 3,
        setter(doc = "Set how many times a failed persistence check is retried before aborting. Optional, defaults to 3.")
    )]
    pub persistence_retry_limit: u32,
    #[builder(
        default = Duration::from_millis(100),
        setter(doc = "Set the pause between persistence check retries. Optional, defaults to 100 milliseconds.")
    )]
    pub persistence_retry_sleep: Duration,
    #[builder(
        default = 16,
        setter(doc = "Set the maximum number of concurrent block searches. Optional, defaults to 16.")
    )]
    pub max_block_searches: usize,
    #[builder(
        default = 5,
        setter(doc = "Set the number of seconds after which an unanswered request is retried. Optional, defaults to 5.")
    )]
    pub request_retry_interval: u64,
    #[builder(
        default,
        setter(doc = "Set the URLs of miners to contact besides those registered in the ledger. Optional.")
    )]
    pub peer_urls: Vec<String>,
    #[builder(
        default = 0,
        setter(doc = "Set the newest protocol release accepted in blocks at startup. Optional, defaults to 0.")
    )]
    pub accepted_release: u64,
    #[builder(
        default = 0,
        setter(doc = "Set the protocol release written into mined blocks at startup. Optional, defaults to 0.")
    )]
    pub produced_release: u64,
    #[builder(
        default = false,
        setter(doc = "Set whether the miner only follows the network without mining. Optional, defaults to false.")
    )]
    pub muted: bool,
    #[builder(
        default = Duration::from_millis(100),
        setter(doc = "Set the pause between two ticks of the node's miner thread. Optional, defaults to 100 milliseconds.")
    )]
    pub tick_interval: Duration,
    #[builder(
        default = false,
        setter(doc = "Enable the default CSV logging of events? Optional, defaults to false.")
    )]
    pub log_events: bool,
}
