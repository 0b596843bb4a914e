use marketmesh::cache::MemoryStorage;
use marketmesh::overlay::{DirectPeer, Direction, Outbound};
use marketmesh::roles::{
    ClientConfig, MarketClient, NodeConfig, RelayServer, ServerConfig, SupplierNode,
};
use marketmesh::window::{MarketOffer, MarketRequest, WindowConfig, WindowEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// In-process walkthrough of the marketplace coordination layer:
/// a buyer client, a relay server, and a late-joining supplier node
/// wired together over channel transports.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    marketmesh::metrics::init_metrics();

    println!("MarketMesh - Marketplace Coordination Demo");
    println!("==========================================\n");

    let server = Arc::new(RelayServer::new(ServerConfig {
        node_id: "relay-1".to_string(),
        storage: Some(Arc::new(MemoryStorage::new())),
        cache_capacity: 1024,
        replay_delay: Duration::from_millis(500),
        heartbeat_interval: Duration::from_secs(5),
    })?);

    let (node, mut requests) = SupplierNode::new(NodeConfig {
        node_id: "node-1".to_string(),
        topics: vec!["market/requests".to_string()],
        window: WindowConfig {
            nonce_period: Duration::from_secs(1),
            min_margin: Duration::from_secs(1),
        },
        prune_interval: Duration::from_secs(5),
    })?;
    let node = Arc::new(node);

    let client = MarketClient::new(ClientConfig {
        node_id: "client-1".to_string(),
        direct_peers: vec![DirectPeer::new("relay-1")],
    })?;

    println!("✓ relay-1:  server role, in-memory cache");
    println!("✓ node-1:   supplier role, 1s nonce window");
    println!("✓ client-1: buyer role, direct peer relay-1\n");

    // Channel transports: each outbound frame is routed to the addressed
    // peer's receive pipeline.
    let (client_tx, mut client_out) = mpsc::channel::<Outbound>(64);
    let (server_tx, mut server_out) = mpsc::channel::<Outbound>(64);
    let (node_tx, mut node_out) = mpsc::channel::<Outbound>(64);

    let server_from_client = Arc::clone(&server);
    tokio::spawn(async move {
        while let Some(out) = client_out.recv().await {
            server_from_client.on_receive("client-1", out.bytes).await;
        }
    });

    let client_overlay = Arc::clone(client.overlay());
    let node_from_server = Arc::clone(&node);
    tokio::spawn(async move {
        while let Some(out) = server_out.recv().await {
            match out.peer_id.as_str() {
                "client-1" => client_overlay.on_receive("relay-1", out.bytes).await,
                "node-1" => {
                    node_from_server
                        .overlay()
                        .on_receive("relay-1", out.bytes)
                        .await
                }
                _ => {}
            }
        }
    });

    let server_from_node = Arc::clone(&server);
    tokio::spawn(async move {
        while let Some(out) = node_out.recv().await {
            server_from_node.on_receive("node-1", out.bytes).await;
        }
    });

    client.start(client_tx);
    server.start(server_tx);
    node.start(node_tx).await?;

    // Client connects while the supplier is still offline
    server
        .on_peer_added("client-1", Direction::Inbound, None)
        .await;
    client
        .overlay()
        .on_peer_added("relay-1", Direction::Outbound, None)
        .await;

    let now = chrono::Utc::now().timestamp();
    let original = MarketRequest::new("req-42", 1, now + 120)
        .with_body(serde_json::json!({"service": "transcode", "max_price": 40}));
    let revised = MarketRequest::new("req-42", 2, now + 180)
        .with_body(serde_json::json!({"service": "transcode", "max_price": 55}));

    println!("client-1 publishes req-42 (nonce 1), then a revision (nonce 2)...");
    client.publish_request("market/requests", &original).await?;
    client.publish_request("market/requests", &revised).await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("  {}\n", server.cache().stats());

    println!("node-1 connects late; relay replays the missed traffic...");
    node.overlay()
        .on_peer_added("relay-1", Direction::Outbound, None)
        .await;
    server
        .on_peer_added("node-1", Direction::Inbound, None)
        .await;

    match tokio::time::timeout(Duration::from_secs(5), requests.recv()).await {
        Ok(Some(WindowEvent::Request { topic, payload })) => {
            println!(
                "  → single canonical request on '{}': id={} nonce={} body={}\n",
                topic, payload.request_id, payload.nonce, payload.body
            );
        }
        other => {
            println!("  unexpected outcome: {:?}", other);
            return Ok(());
        }
    }

    println!("node-1 answers with an offer...");
    node.publish_offer(
        "market/offers",
        &MarketOffer {
            request_id: "req-42".to_string(),
            supplier_id: "node-1".to_string(),
            expire: now + 120,
            body: serde_json::json!({"price": 48}),
        },
    )
    .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    server.on_heartbeat();

    println!("  relay   {}", server.stats());
    println!("  window  {}", node.window().stats());
    println!("\n✓ Demo complete");

    Ok(())
}
