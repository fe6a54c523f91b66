use kvload::client::{Connector, KvClient};
use kvload::config::{ClusterConfig, Consistency, Mode, RunConfig, exit};
use kvload::error::AppError;
use kvload::keyspace::KeySpaceGenerator;
use kvload::memory::{MemoryConnector, MemoryStore};
use kvload::net::{self, TcpConnector};
use kvload::runner::{LoadRunner, run_blocking};

fn scenario() -> RunConfig {
    RunConfig {
        total_keys: 100,
        total_prefixes: 10,
        total_concurrent_ops: 5,
        total_client: 5,
        key_length: 16,
        value_length: 16,
        mode: Mode::All,
        seed: Some(11),
        ..RunConfig::default()
    }
}

fn cluster() -> ClusterConfig {
    ClusterConfig {
        endpoints: vec!["n1:2379".into(), "n2:2379".into(), "n3:2379".into()],
        ..ClusterConfig::default()
    }
}

fn lines(out: &[u8]) -> Vec<String> {
    String::from_utf8(out.to_vec())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn all_mode_runs_phases_in_order_and_cleans_up() {
    let connector = MemoryConnector::default();
    let config = RunConfig {
        verify_reads: true,
        ..scenario()
    };
    let mut out = Vec::new();
    let summaries = run_blocking(&connector, &cluster(), &config, &mut out).unwrap();

    let lines = lines(&out);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("round 0: Time taken for put for keys: 100 is : "));
    assert!(lines[1].starts_with("round 0: Time taken for update for keys: 100 is : "));
    assert!(lines[2].starts_with("round 0: Time taken for get for keys : 100, is : "));

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].deleted, 100);

    let store = connector.store();
    assert!(store.is_empty());
    let stats = store.stats();
    // 控制连接 + 5 条 worker 连接
    assert_eq!(stats.connections, 6);
    assert_eq!(stats.puts, 200);
    assert_eq!(stats.linearizable_gets, 100);
    assert_eq!(stats.range_deletes, 10);
}

#[test]
fn indivisible_prefixes_rejected_before_connecting() {
    let connector = MemoryConnector::default();
    let config = RunConfig {
        total_prefixes: 7,
        ..scenario()
    };
    let err = run_blocking(&connector, &cluster(), &config, &mut Vec::new()).unwrap_err();
    assert!(err.is_config());
    assert_eq!(err.exit_code(), exit::BAD_CONFIG);
    assert_eq!(connector.store().stats().connections, 0);
}

#[test]
fn get_mode_reports_only_the_read() {
    let connector = MemoryConnector::default();
    let config = RunConfig {
        mode: Mode::Get,
        consistency: Consistency::Serializable,
        verify_reads: true,
        ..scenario()
    };
    let mut out = Vec::new();
    run_blocking(&connector, &cluster(), &config, &mut out).unwrap();

    let lines = lines(&out);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("Time taken for get"));
    let stats = connector.store().stats();
    assert_eq!(stats.puts, 100);
    assert_eq!(stats.serializable_gets, 100);
    assert_eq!(stats.linearizable_gets, 0);
}

#[test]
fn update_mode_reports_only_the_update() {
    let connector = MemoryConnector::default();
    let config = RunConfig {
        mode: Mode::Update,
        ..scenario()
    };
    let mut out = Vec::new();
    run_blocking(&connector, &cluster(), &config, &mut out).unwrap();

    let lines = lines(&out);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("Time taken for update"));
    assert_eq!(connector.store().stats().puts, 200);
}

#[test]
fn rounds_are_independent() {
    let connector = MemoryConnector::default();
    let config = RunConfig {
        rounds: 3,
        mode: Mode::Put,
        ..scenario()
    };
    let mut out = Vec::new();
    let summaries = run_blocking(&connector, &cluster(), &config, &mut out).unwrap();
    assert_eq!(summaries.len(), 3);
    assert!(summaries.iter().all(|s| s.deleted == 100));
    let lines = lines(&out);
    assert!(lines[2].starts_with("round 2: "));
    assert_eq!(connector.store().stats().connections, 18);
}

#[test]
fn uneven_split_still_covers_every_key() {
    let connector = MemoryConnector::default();
    let config = RunConfig {
        total_keys: 30,
        total_prefixes: 3,
        total_concurrent_ops: 7,
        total_client: 9,
        verify_reads: true,
        ..scenario()
    };
    let summaries = run_blocking(&connector, &cluster(), &config, &mut Vec::new()).unwrap();
    assert_eq!(summaries[0].deleted, 30);
    assert_eq!(connector.store().stats().puts, 60);
}

#[test]
fn verified_reads_tolerate_repeated_keys() {
    // 两位键、单前缀：后缀只有 62 种，200 个键里必然有重复
    for (workers, clients) in [(1, 1), (5, 5)] {
        let connector = MemoryConnector::default();
        let config = RunConfig {
            key_length: 2,
            total_prefixes: 1,
            total_keys: 200,
            total_concurrent_ops: workers,
            total_client: clients,
            verify_reads: true,
            seed: Some(5),
            ..scenario()
        };
        let summaries = run_blocking(&connector, &cluster(), &config, &mut Vec::new()).unwrap();
        assert_eq!(summaries.len(), 1);
        // 重复的键在存储里只占一条
        assert!(summaries[0].deleted < 200);
        assert!(connector.store().is_empty());
        assert_eq!(connector.store().stats().linearizable_gets, 200);
    }
}

#[test]
fn operation_failure_aborts_without_cleanup() {
    let store = MemoryStore::new();
    store.fail_after(150);
    let connector = MemoryConnector::new(store.clone());
    let mut out = Vec::new();
    let err = run_blocking(&connector, &cluster(), &scenario(), &mut out).unwrap_err();

    assert!(matches!(err, AppError::Operation { op: "put", .. }));
    assert_eq!(err.exit_code(), exit::ERROR);
    // 写入阶段成功输出，更新阶段失败
    assert_eq!(lines(&out).len(), 1);
    assert_eq!(store.stats().range_deletes, 0);
    assert!(!store.is_empty());
}

#[test]
fn cleanup_failure_is_fatal() {
    let store = MemoryStore::new();
    store.fail_deletes();
    let connector = MemoryConnector::new(store);
    let err = run_blocking(&connector, &cluster(), &scenario(), &mut Vec::new()).unwrap_err();
    assert!(matches!(err, AppError::Cleanup { .. }));
    assert_eq!(err.exit_code(), exit::ERROR);
}

#[test]
fn unreachable_endpoint_fails_the_run() {
    let store = MemoryStore::new();
    store.refuse_endpoint("n3:2379");
    let connector = MemoryConnector::new(store.clone());
    let err = run_blocking(&connector, &cluster(), &scenario(), &mut Vec::new()).unwrap_err();
    assert!(matches!(err, AppError::Connect { .. }));
    assert_eq!(store.stats().puts, 0);
}

#[compio::test]
async fn tcp_backend_against_development_server() {
    let listener = net::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    compio::runtime::spawn(net::serve(listener, MemoryStore::new())).detach();

    let cluster = ClusterConfig {
        endpoints: vec![addr.clone()],
        ..ClusterConfig::default()
    };
    let config = RunConfig {
        total_keys: 40,
        total_prefixes: 4,
        total_concurrent_ops: 4,
        total_client: 6,
        verify_reads: true,
        ..scenario()
    };
    let runner = LoadRunner::new(&TcpConnector, &cluster, &config).unwrap();
    let mut out = Vec::new();
    let summaries = runner.run(&mut out).await.unwrap();
    assert_eq!(lines(&out).len(), 3);
    assert_eq!(summaries[0].deleted, 40);

    // 同一种子可以重建键空间，确认清理后键已不存在
    let space = KeySpaceGenerator::for_round(config.seed, 0)
        .generate(&config)
        .unwrap();
    let mut reader = TcpConnector.connect(&addr).await.unwrap();
    for key in space.keys.iter().take(5) {
        assert_eq!(reader.get(key, Consistency::Linearizable).await.unwrap(), None);
    }
}
