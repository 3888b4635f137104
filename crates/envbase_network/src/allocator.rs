//! Sequential CIDR allocation.
//!
//! The allocator hands out blocks from the start of a network in request
//! order. Each block starts at the cursor rounded up to the block's own size,
//! so every block is a valid CIDR. Space is never reused.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{NetworkError, NetworkResult};

#[derive(Debug, Clone)]
pub struct CidrAllocator {
    network: Ipv4Net,
    /// Next free address, as an integer. u64 so the end of 255.255.255.255 fits.
    cursor: u64,
}

impl CidrAllocator {
    pub fn new(network: Ipv4Net) -> Self {
        Self {
            network,
            cursor: u64::from(u32::from(network.network())),
        }
    }

    /// Start allocating at `address` instead of the network address.
    pub fn starting_at(network: Ipv4Net, address: Ipv4Addr) -> NetworkResult<Self> {
        if !network.contains(&address) {
            return Err(NetworkError::InvalidConfig(format!(
                "allocation start {} is outside {}",
                address, network
            )));
        }
        Ok(Self {
            network,
            cursor: u64::from(u32::from(address)),
        })
    }

    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    fn end(&self) -> u64 {
        u64::from(u32::from(self.network.broadcast())) + 1
    }

    /// Addresses left after the cursor.
    pub fn remaining(&self) -> u64 {
        self.end().saturating_sub(self.cursor)
    }

    /// Allocate the next block with mask length `prefix_len`.
    pub fn allocate(&mut self, prefix_len: u8) -> NetworkResult<Ipv4Net> {
        let out_of_range = || NetworkError::BlockOutOfRange {
            prefix_len,
            network: self.network.to_string(),
        };

        if prefix_len < self.network.prefix_len() || prefix_len > 32 {
            return Err(out_of_range());
        }

        let block = 1u64 << (32 - prefix_len);
        let start = self.cursor.div_ceil(block) * block;
        let end = start + block;
        if end > self.end() {
            return Err(out_of_range());
        }

        let start_addr = u32::try_from(start).map_err(|_| out_of_range())?;
        let net = Ipv4Net::new(Ipv4Addr::from(start_addr), prefix_len).map_err(|_| out_of_range())?;
        self.cursor = end;
        Ok(net)
    }
}
