//! Test-only mock of the upstream Signal gateway websocket.
//!
//! Binds to a random port, accepts one connection, and lets the test push
//! raw frames to the client on demand while collecting whatever the client
//! sends back.

mod mock_gateway;

pub use mock_gateway::MockGatewayServer;
