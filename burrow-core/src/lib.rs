pub mod config;
pub mod dataplane;
pub mod helpers;
pub mod ip;
pub mod ipam;
pub mod iproute;
pub mod node;
pub mod store;
