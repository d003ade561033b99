//! Application layer: ports to the outside world and the services that
//! drive the domain model.

pub mod ports;
pub mod services;
