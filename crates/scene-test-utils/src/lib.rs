// scene-test-utils: shared test doubles for the scene pipeline's WebSocket
// surface, used by broadcast-gateway's and the root crate's integration
// tests.

pub mod mock_ws_client;
pub mod mock_ws_server;

pub use mock_ws_client::MockWsClient;
pub use mock_ws_server::MockWsServer;
