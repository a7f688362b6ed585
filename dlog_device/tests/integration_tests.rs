//! Integration tests for the device pipeline.
//!
//! Each test runs the full runtime (sampler, egress writer, ingress) on the
//! simulation board and talks to it through the loopback transport, the way
//! a USB host would.

mod integration;
