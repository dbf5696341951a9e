/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A simulated network of miners living in one process.
//!
//! Every miner registers its [`MinerCamera`] under its URL. A [`SimMessenger`] answers the requests it
//! is asked to send out of the camera registered at the requested URL, at the time they are sent, and
//! hands the answers back on the next calls to `recv`. Requests to an unregistered URL are answered as
//! unreachable.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use charm_chain::{
    messenger::{Messenger, MessengerRequest, MessengerResponse},
    miner::MinerCamera,
    types::data_types::{BlockHeight, CryptoHash},
};

#[derive(Clone, Default)]
pub(crate) struct SimNetwork(Arc<Mutex<HashMap<String, MinerCamera>>>);

impl SimNetwork {
    pub(crate) fn new() -> SimNetwork {
        SimNetwork::default()
    }

    pub(crate) fn register(&self, url: &str, camera: MinerCamera) {
        self.0.lock().unwrap().insert(url.to_string(), camera);
    }

    pub(crate) fn disconnect(&self, url: &str) {
        self.0.lock().unwrap().remove(url);
    }

    pub(crate) fn messenger(&self) -> SimMessenger {
        SimMessenger {
            network: self.clone(),
            outbox: Vec::new(),
            inbox: VecDeque::new(),
        }
    }

    fn answer(&self, request: &MessengerRequest) -> MessengerResponse {
        let camera = self.0.lock().unwrap().get(&request.url).cloned();
        match camera {
            Some(camera) => camera.answer(request),
            None => MessengerResponse::unreachable(request.clone()),
        }
    }
}

pub(crate) struct SimMessenger {
    network: SimNetwork,
    outbox: Vec<MessengerRequest>,
    inbox: VecDeque<MessengerResponse>,
}

impl Messenger for SimMessenger {
    fn request_block(&mut self, miner_id: &str, url: &str, digest: CryptoHash) {
        self.outbox.push(MessengerRequest::block(miner_id, url, digest));
    }

    fn request_header(&mut self, miner_id: &str, url: &str, height: BlockHeight) {
        self.outbox.push(MessengerRequest::header(miner_id, url, height));
    }

    fn request_peers(&mut self, url: &str) {
        self.outbox.push(MessengerRequest::extend_network(url));
    }

    fn send_requests(&mut self) {
        for request in self.outbox.drain(..) {
            self.inbox.push_back(self.network.answer(&request));
        }
    }

    fn recv(&mut self) -> Option<MessengerResponse> {
        self.inbox.pop_front()
    }
}
