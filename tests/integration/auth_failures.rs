//! Every rejection path on the WebSocket auth seam (spec.md §4.7): missing
//! bearer token, a tampered signature, a connection-cap rejection, and a
//! subscribe attempt without the required scope.

use reality_pipeline::{spawn, PipelineOpts};
use scene_protocol::{error_codes, ClientMessage, ServerMessage, REALITY_STREAM_CHANNEL};
use scene_test_utils::MockWsClient;

#[tokio::test]
async fn a_missing_bearer_token_is_rejected_with_a_policy_error() {
    let pipeline = spawn(PipelineOpts::default()).await;
    let mut client = MockWsClient::connect(&pipeline.ws_url()).await.unwrap();
    match client.recv().await.unwrap() {
        ServerMessage::Error { code, .. } => assert_eq!(code, error_codes::POLICY),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn a_tampered_token_signature_is_rejected() {
    let pipeline = spawn(PipelineOpts::default()).await;
    let mut token = pipeline.token("user-1", "acme", &[]);
    token.push('0');
    let mut client = MockWsClient::connect_with_token(&pipeline.ws_url(), &token).await.unwrap();
    match client.recv().await.unwrap() {
        ServerMessage::Error { code, .. } => assert_eq!(code, error_codes::POLICY),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn subscribing_without_the_stream_scope_is_rejected() {
    let pipeline = spawn(PipelineOpts::default()).await;
    let token = pipeline.token("user-1", "acme", &[]); // no reality.stream scope
    let mut client = MockWsClient::connect_with_token(&pipeline.ws_url(), &token).await.unwrap();
    client.recv().await.unwrap(); // Connected

    client.send(&ClientMessage::Subscribe { channel: REALITY_STREAM_CHANNEL.to_owned() }).await.unwrap();
    match client.recv().await.unwrap() {
        ServerMessage::Error { code, .. } => assert_eq!(code, error_codes::POLICY),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn a_connection_beyond_the_per_ip_cap_is_rejected_with_backpressure() {
    let mut opts = PipelineOpts::default();
    opts.max_conn_per_ip = 1;
    let pipeline = spawn(opts).await;
    let token = pipeline.token("user-1", "acme", &[]);

    let mut first = MockWsClient::connect_with_token(&pipeline.ws_url(), &token).await.unwrap();
    first.recv().await.unwrap(); // Connected

    let mut second = MockWsClient::connect_with_token(&pipeline.ws_url(), &token).await.unwrap();
    match second.recv().await.unwrap() {
        ServerMessage::Error { code, .. } => assert_eq!(code, error_codes::BACKPRESSURE),
        other => panic!("expected Error, got {other:?}"),
    }
}
