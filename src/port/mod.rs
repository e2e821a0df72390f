//! # Ports
//!
//! Input and output ports: the protocol endpoints every component owns.
//!
//! Both kinds share the same lifecycle ([`PortState`]): an active port starts
//! draining when its stream ends, waits for its in-flight jobs, then for its
//! queued values, and only then delivers its terminal signal. Every signal to
//! a peer is posted to the port's mailbox, never delivered inline.

mod base;
mod in_port;
mod out_port;

pub use base::{PortState, TerminationSignal};
pub use in_port::{InPort, SubscriptionId};
pub use out_port::{OutEvent, OutPort, StepResult, SubscriberId};

#[cfg(test)]
mod out_port_test;
