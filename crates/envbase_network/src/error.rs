//! Error types for topology generation.

use thiserror::Error;

/// Result type alias for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Network configuration errors. None of these leave a partial layout behind.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Requested {requested} availability zones but only {eligible} are eligible in {region}")]
    InsufficientZones {
        region: String,
        requested: usize,
        eligible: usize,
    },

    #[error("az_count must be at least 1")]
    InvalidAzCount,

    #[error("Invalid network CIDR: {0}")]
    InvalidCidr(String),

    #[error("No subnet tiers configured")]
    NoTiers,

    #[error("Invalid subnet tier '{tier}': {message}")]
    InvalidTier { tier: String, message: String },

    #[error("Cannot allocate a /{prefix_len} block inside {network}: address space exhausted")]
    BlockOutOfRange { prefix_len: u8, network: String },

    #[error("Subnet tier '{tier}' (/{size}) does not fit in {network} for availability zone {az_index}")]
    SubnetDoesNotFit {
        tier: String,
        size: u8,
        az_index: usize,
        network: String,
    },

    #[error("Private tiers need a public tier to host the NAT in availability zone {0}")]
    NoPublicSubnetForNat(usize),

    #[error("Invalid network configuration: {0}")]
    InvalidConfig(String),

    #[error("Provider error: {0}")]
    Provider(#[from] envbase_provider::ProviderError),
}
