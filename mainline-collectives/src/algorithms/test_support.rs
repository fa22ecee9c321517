// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A recording [`Comms`] implementation for algorithm unit tests.

use mainline_engine::types::{Bytes, NodeId, SimResult};

use crate::comms::Comms;

/// One recorded send or receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub peer: NodeId,
    pub bytes: Bytes,
    pub tag: u64,
}

/// Records every operation an algorithm performs.
pub struct MockComms {
    node: NodeId,
    base_tag: u64,
    pub sends: Vec<Transfer>,
    pub recvs: Vec<Transfer>,
    pub bytes_read: Bytes,
    pub bytes_written: Bytes,
    pub reductions: usize,
}

impl MockComms {
    pub fn new(node: NodeId, base_tag: u64) -> Self {
        Self {
            node,
            base_tag,
            sends: Vec::new(),
            recvs: Vec::new(),
            bytes_read: 0,
            bytes_written: 0,
            reductions: 0,
        }
    }
}

impl Comms for MockComms {
    fn node(&self) -> NodeId {
        self.node
    }

    fn base_tag(&self) -> u64 {
        self.base_tag
    }

    fn send(&mut self, dst: NodeId, bytes: Bytes, tag: u64) -> SimResult {
        self.sends.push(Transfer {
            peer: dst,
            bytes,
            tag,
        });
        Ok(())
    }

    fn recv(&mut self, src: NodeId, bytes: Bytes, tag: u64) -> SimResult {
        self.recvs.push(Transfer {
            peer: src,
            bytes,
            tag,
        });
        Ok(())
    }

    fn mem_read(&mut self, bytes: Bytes) {
        self.bytes_read += bytes;
    }

    fn mem_write(&mut self, bytes: Bytes) {
        self.bytes_written += bytes;
    }

    fn reduction(&mut self) {
        self.reductions += 1;
    }
}
