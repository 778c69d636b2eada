//! Reach databases that sit behind an SSH bastion.
//!
//! A [`TunnelSession`](tunnel::TunnelSession) authenticates once to the
//! bastion; its [`TunnelDialer`](tunnel::TunnelDialer) opens one
//! `direct-tcpip` channel per database connection. Register the dialer as a
//! named transport with a
//! [`TunneledConnectionFactory`](tunnel::TunneledConnectionFactory) and
//! database drivers dial through it as if the database were local.

pub mod tunnel;
