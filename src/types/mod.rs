/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types shared by the ledger, the block tree, and the miner.

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod records;

pub mod transaction;
