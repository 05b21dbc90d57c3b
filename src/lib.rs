pub mod config;
pub mod ingress;
pub mod relay;
