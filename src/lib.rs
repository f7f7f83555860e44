// Copyright 2026 Consulta Contributors
// SPDX-License-Identifier: Apache-2.0

//! Consulta: consultation engine for the PST judicial case-register portal.
//!
//! The portal exposes two undocumented surfaces: a DWR-style Ajax-remoting
//! protocol for cascading lookups (region → office → register → roles) and
//! classic server-rendered HTML forms for case search and detail. This crate
//! reproduces the browser-equivalent session handshake, speaks the remoting
//! wire format, and parses the resulting HTML into structured records.

pub mod config;
pub mod dwr;
pub mod engine;
pub mod error;
pub mod parse;
pub mod session;
pub mod transport;
