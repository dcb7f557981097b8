//! Host-resident active defense: a kernel-path packet classifier with a
//! single-packet-authorization gate, and an in-process deception server
//! that impersonates the services attackers go looking for.

pub mod agent;
pub mod config;
pub mod ebpf_manager;
pub mod honeypot;
pub mod logger;
pub mod monitor;
pub mod network;
pub mod spa;
