//! Behaviour suites for the drain daemon.

pub(crate) mod support;
