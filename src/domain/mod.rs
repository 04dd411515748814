//! Domain model: tenants, carts, orders, conversation state and the ports
//! the application layer talks to.

pub mod brand;
pub mod cart;
pub mod event;
pub mod geo;
pub mod order;
pub mod ports;
pub mod session;
