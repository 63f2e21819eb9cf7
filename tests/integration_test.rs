use replicated_kv::{
    Coordinator, CoordinatorConfig, CoordinatorOptions, KvRpcClient, NodeExit, StorageNodeConfig, StorageNodeError,
    UNAVAILABLE,
};
use std::collections::HashMap;
use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

type NodeHandle = JoinHandle<Result<NodeExit, StorageNodeError>>;

struct Cluster {
    coordinator: Coordinator,
    nodes: HashMap<String, NodeHandle>,
}

impl Cluster {
    async fn start(replication_factor: usize, num_nodes: usize) -> Result<Cluster, Box<dyn Error>> {
        Self::start_with_client_port(replication_factor, num_nodes, 0).await
    }

    async fn start_with_client_port(
        replication_factor: usize,
        num_nodes: usize,
        client_port: u16,
    ) -> Result<Cluster, Box<dyn Error>> {
        let coordinator = replicated_kv::start_coordinator(CoordinatorConfig {
            client_listen_addr: SocketAddr::new(LOCALHOST, client_port),
            node_listen_addr: SocketAddr::new(LOCALHOST, 0),
            replication_factor,
            info_logger: replicated_kv::create_root_logger_for_stdout("coordinator".to_string()),
            options: CoordinatorOptions::default(),
        })
        .await?;

        let mut cluster = Cluster {
            coordinator,
            nodes: HashMap::new(),
        };
        for i in 0..num_nodes {
            cluster.add_node(&node_id(i));
        }
        cluster.wait_for_node_count(num_nodes).await;

        Ok(cluster)
    }

    fn add_node(&mut self, id: &str) {
        let handle = spawn_node(&self.coordinator, id);
        self.nodes.insert(id.to_string(), handle);
    }

    /// Severs a node's connection without telling the coordinator anything.
    async fn crash_node(&mut self, id: &str) {
        let handle = self.nodes.remove(id).expect("Unknown node");
        handle.abort();
        let _ = handle.await;
    }

    async fn wait_for_node_count(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.coordinator.connected_node_ids().len() != count {
            assert!(
                Instant::now() < deadline,
                "Timeout waiting for {} nodes, have {:?}",
                count,
                self.coordinator.connected_node_ids()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn get(&self, key: &str) -> String {
        sanity_timeout(self.coordinator.front_end.get(key.to_string()))
            .await
            .expect("Get failed")
    }

    async fn put(&self, key: &str, value: &str) -> String {
        sanity_timeout(self.coordinator.front_end.put(key.to_string(), value.to_string()))
            .await
            .expect("Put failed")
    }

    async fn test_set(&self, key: &str, test_value: &str, new_value: &str) -> String {
        sanity_timeout(
            self.coordinator
                .front_end
                .test_set(key.to_string(), test_value.to_string(), new_value.to_string()),
        )
        .await
        .expect("TestSet failed")
    }

    async fn replicas_of(&self, key: &str) -> Vec<String> {
        let reply = self.get(&format!("CMD get-replicas-of {}", key)).await;
        reply.split_whitespace().map(String::from).collect()
    }

    /// Polls until `key`'s replica list equals `expected` (both sorted).
    async fn wait_for_replicas(&self, key: &str, expected: &[String]) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let replicas = self.replicas_of(key).await;
            if replicas == expected {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "Timeout waiting for {} on {:?}, have {:?}",
                key,
                expected,
                replicas
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[tokio::test]
async fn surviving_replica_serves_after_non_replica_leaves() -> Result<(), Box<dyn Error>> {
    // -- setup --
    let mut cluster = Cluster::start(2, 3).await?;
    assert_eq!(cluster.put("a", "1").await, "1");
    let replicas = cluster.replicas_of("a").await;
    assert_eq!(replicas.len(), 2);
    let bystander = (0..3)
        .map(node_id)
        .find(|id| !replicas.contains(id))
        .expect("Three nodes, two replicas");

    // -- execute --
    cluster.crash_node(&bystander).await;
    cluster.wait_for_node_count(2).await;

    // -- verify --
    assert_eq!(cluster.get("a").await, "1");
    assert_eq!(cluster.replicas_of("a").await, replicas);

    Ok(())
}

#[tokio::test]
async fn killing_only_replica_makes_key_unavailable() -> Result<(), Box<dyn Error>> {
    let mut cluster = Cluster::start(1, 2).await?;
    assert_eq!(cluster.put("a", "1").await, "1");
    let replicas = cluster.replicas_of("a").await;
    assert_eq!(replicas.len(), 1);
    let victim = &replicas[0];

    assert_eq!(cluster.get(&format!("CMD kill-replica {}", victim)).await, "true");
    assert_eq!(cluster.get(&format!("CMD kill-replica {}", victim)).await, "false");

    assert_eq!(cluster.get("a").await, UNAVAILABLE);

    // The node process acknowledged and exited on its own.
    let handle = cluster.nodes.remove(victim).unwrap();
    let exit = sanity_timeout(handle).await?;
    assert_eq!(exit?, NodeExit::Killed);
    cluster.wait_for_node_count(1).await;
    assert_eq!(cluster.get("a").await, UNAVAILABLE);

    Ok(())
}

#[tokio::test]
async fn test_set_only_replaces_expected_value() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(1, 1).await?;

    assert_eq!(cluster.test_set("b", "", "x").await, "x");
    assert_eq!(cluster.test_set("b", "", "y").await, "x");
    assert_eq!(cluster.test_set("b", "x", "z").await, "z");
    assert_eq!(cluster.get("b").await, "z");

    Ok(())
}

#[tokio::test]
async fn late_joiner_does_not_change_full_replica_sets() -> Result<(), Box<dyn Error>> {
    let mut cluster = Cluster::start(3, 3).await?;
    let all_nodes: Vec<String> = (0..3).map(node_id).collect();
    for i in 0..5 {
        cluster.put(&format!("k{}", i), "v").await;
    }
    for i in 0..5 {
        assert_eq!(cluster.replicas_of(&format!("k{}", i)).await, all_nodes);
    }

    cluster.add_node(&node_id(3));
    cluster.wait_for_node_count(4).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    for i in 0..5 {
        assert_eq!(cluster.replicas_of(&format!("k{}", i)).await, all_nodes);
    }

    Ok(())
}

#[tokio::test]
async fn early_joiner_is_backfilled() -> Result<(), Box<dyn Error>> {
    let mut cluster = Cluster::start(2, 1).await?;
    cluster.put("a", "1").await;
    cluster.put("b", "2").await;

    cluster.add_node(&node_id(1));
    cluster.wait_for_node_count(2).await;

    let both = vec![node_id(0), node_id(1)];
    cluster.wait_for_replicas("a", &both).await;
    cluster.wait_for_replicas("b", &both).await;

    // Only the newcomer is left to answer.
    cluster.crash_node(&node_id(0)).await;
    cluster.wait_for_node_count(1).await;
    assert_eq!(cluster.get("a").await, "1");
    assert_eq!(cluster.get("b").await, "2");

    Ok(())
}

#[tokio::test]
async fn keys_of_departed_replica_move_to_another_node() -> Result<(), Box<dyn Error>> {
    // -- setup --
    let mut cluster = Cluster::start(2, 3).await?;
    cluster.put("k1", "v1").await;
    cluster.put("k2", "v2").await;
    let k1_replicas = cluster.replicas_of("k1").await;
    let k2_replicas = cluster.replicas_of("k2").await;
    // Two replicas each out of three nodes always overlap.
    let shared = k1_replicas
        .iter()
        .find(|id| k2_replicas.contains(id))
        .expect("Replica sets must overlap")
        .clone();

    // -- execute --
    cluster.crash_node(&shared).await;
    cluster.wait_for_node_count(2).await;

    // -- verify --
    let mut survivors = cluster.coordinator.connected_node_ids();
    survivors.sort();
    cluster.wait_for_replicas("k1", &survivors).await;
    cluster.wait_for_replicas("k2", &survivors).await;
    assert_eq!(cluster.get("k1").await, "v1");
    assert_eq!(cluster.get("k2").await, "v2");

    Ok(())
}

#[tokio::test]
async fn racing_test_sets_have_exactly_one_winner() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(2, 2).await?;
    let front_end = cluster.coordinator.front_end.clone();

    let mut racers = Vec::new();
    for i in 0..10 {
        let front_end = front_end.clone();
        racers.push(tokio::spawn(async move {
            let mine = format!("v{}", i);
            let observed = front_end.test_set("c".to_string(), String::new(), mine.clone()).await;
            (mine, observed)
        }));
    }

    let mut winners = 0;
    let mut observed_values = Vec::new();
    for racer in racers {
        let (mine, observed) = sanity_timeout(racer).await?;
        let observed = observed?;
        if observed == mine {
            winners += 1;
        }
        observed_values.push(observed);
    }

    assert_eq!(winners, 1);
    observed_values.dedup();
    assert_eq!(observed_values.len(), 1, "Everyone sees the same winner");

    Ok(())
}

#[tokio::test]
async fn kill_replicas_of_caps_at_live_replicas() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(2, 3).await?;
    cluster.put("a", "1").await;

    assert_eq!(cluster.get("CMD kill-replicas-of a 5").await, "2");
    assert_eq!(cluster.get("CMD kill-replicas-of a 1").await, "0");
    assert!(cluster.replicas_of("a").await.is_empty());
    assert_eq!(cluster.get("a").await, UNAVAILABLE);

    let bad_count = cluster.coordinator.front_end.get("CMD kill-replicas-of a -1".to_string()).await;
    assert!(bad_count.is_err());

    Ok(())
}

#[tokio::test]
async fn duplicate_node_id_is_turned_away() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(1, 1).await?;

    let impostor = spawn_node(&cluster.coordinator, &node_id(0));
    let result = sanity_timeout(impostor).await?;

    assert!(result.is_err());
    assert_eq!(cluster.coordinator.connected_node_ids(), vec![node_id(0)]);

    Ok(())
}

#[tokio::test]
async fn grpc_end_to_end() -> Result<(), Box<dyn Error>> {
    let client_port = 42_617;
    let _cluster = Cluster::start_with_client_port(1, 2, client_port).await?;
    let mut client = connect_client(SocketAddr::new(LOCALHOST, client_port)).await;

    assert_eq!(client.get("a").await?, "");
    assert_eq!(client.put("a", "1").await?, "1");
    assert_eq!(client.test_set("a", "1", "2").await?, "2");
    assert_eq!(client.get("a").await?, "2");
    assert_eq!(client.get("CMD get-replicas-of a").await?.split_whitespace().count(), 1);

    let status = client
        .get("CMD kill-replicas-of a nope")
        .await
        .expect_err("Bad count must be rejected");
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    Ok(())
}

fn node_id(i: usize) -> String {
    format!("node-{}", i + 1)
}

fn spawn_node(coordinator: &Coordinator, id: &str) -> NodeHandle {
    tokio::spawn(replicated_kv::run_storage_node(StorageNodeConfig {
        local_ip: LOCALHOST,
        coordinator_addr: coordinator.node_listen_addr(),
        node_id: id.to_string(),
        info_logger: replicated_kv::create_root_logger_for_stdout(id.to_string()),
        outbound_queue_capacity: None,
    }))
}

async fn connect_client(addr: SocketAddr) -> KvRpcClient {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match KvRpcClient::connect(addr).await {
            Ok(client) => return client,
            Err(e) => {
                assert!(Instant::now() < deadline, "Never connected to {}: {}", addr, e);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn sanity_timeout<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("Unexpected timeout")
}
