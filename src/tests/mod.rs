//! Unit tests for sockbridge modules
//!
//! This module contains unit test files for the event bus, the connection
//! adapter, and the relay server. Adapter and relay tests run against real
//! in-process WebSocket servers on ephemeral ports.

pub mod adapter_test;

pub mod helpers;
