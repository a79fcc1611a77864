pub mod rpc;
pub mod signature;

pub use rpc::{EvmRpcClient, TransferLog};
