//! Behavioural suites exercising the daemon over real local sockets.

mod election_behaviour;
pub(crate) mod support;
