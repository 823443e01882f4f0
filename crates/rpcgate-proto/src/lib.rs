//! Protobuf fixtures shared by the rpcgate test suites.
//!
//! The build script compiles `proto/rpcgate/testing/v1/testing.proto` into a
//! file descriptor set (well-known type imports included) which is exposed
//! here as a decoded [`DescriptorPool`].

use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor};
use std::sync::OnceLock;

/// Encoded `FileDescriptorSet` for the testing protos
pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/rpcgate_testing.bin"));

/// Package of every fixture message
pub const PACKAGE: &str = "rpcgate.testing.v1";

/// Descriptor pool holding the fixtures
pub fn pool() -> &'static DescriptorPool {
    static POOL: OnceLock<DescriptorPool> = OnceLock::new();
    POOL.get_or_init(|| {
        DescriptorPool::decode(FILE_DESCRIPTOR_SET).expect("embedded descriptor set is valid")
    })
}

/// Look up a fixture message by its short name, e.g. `"ABitOfEverything"`
pub fn message(name: &str) -> MessageDescriptor {
    pool()
        .get_message_by_name(&format!("{PACKAGE}.{name}"))
        .unwrap_or_else(|| panic!("no fixture message named {name}"))
}

/// Look up a method of `rpcgate.testing.v1.LibraryService`
pub fn library_method(name: &str) -> MethodDescriptor {
    pool()
        .get_service_by_name(&format!("{PACKAGE}.LibraryService"))
        .and_then(|service| service.methods().find(|m| m.name() == name))
        .unwrap_or_else(|| panic!("no LibraryService method named {name}"))
}
