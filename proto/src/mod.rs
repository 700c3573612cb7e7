//! P4Runtime protobuf messages and the `P4Runtime` gRPC client, generated by
//! `build.rs` into this directory.

pub mod code;
pub mod p4data;
pub mod p4info;
pub mod p4runtime;
pub mod p4runtime_grpc;
pub mod status;
