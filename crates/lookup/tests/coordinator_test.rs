use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use meridian_lookup::{
    ActivationError, AddressServerConfig, DiscoveryStrategy, Error, LookupConfig,
    LookupCoordinator, MemberSet, MembershipSink, StrategyKind,
};
use meridian_lookup_mock::{
    LifecycleEvent, MockAddressSource, MockStrategyFactory, RecordingSink,
};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

fn file_config() -> LookupConfig {
    LookupConfig {
        lookup_type: Some("file".to_string()),
        ..LookupConfig::default()
    }
}

fn coordinator(
    config: LookupConfig,
    factory: MockStrategyFactory,
) -> (LookupCoordinator<MockStrategyFactory>, RecordingSink) {
    let sink = RecordingSink::new();
    let shared: Arc<dyn MembershipSink> = Arc::new(sink.clone());

    (LookupCoordinator::with_factory(config, factory, shared), sink)
}

#[tokio::test]
#[traced_test]
async fn test_create_lookup_installs_configured_kind() {
    let factory = MockStrategyFactory::new().with_members(
        StrategyKind::FileConfig,
        MemberSet::parse_list("10.0.0.1:8848,10.0.0.2:8848"),
    );
    let (coordinator, sink) = coordinator(file_config(), factory);

    assert!(coordinator.current_lookup().is_none());

    let strategy = coordinator.create_lookup().await.unwrap();

    assert_eq!(strategy.kind(), StrategyKind::FileConfig);
    assert_eq!(coordinator.current_kind(), Some(StrategyKind::FileConfig));
    assert!(Arc::ptr_eq(&strategy, &coordinator.current_lookup().unwrap()));
    assert_eq!(sink.count(), 1);
    assert_eq!(
        sink.last().unwrap().addresses(),
        vec!["10.0.0.1:8848", "10.0.0.2:8848"]
    );
}

#[tokio::test]
#[traced_test]
async fn test_switch_activates_new_before_deactivating_old() {
    let (coordinator, _sink) = coordinator(file_config(), MockStrategyFactory::new());

    coordinator.create_lookup().await.unwrap();
    let switched = coordinator.switch_lookup("address-server").await.unwrap();

    assert_eq!(switched.kind(), StrategyKind::AddressServer);
    assert_eq!(coordinator.current_kind(), Some(StrategyKind::AddressServer));
    assert_eq!(
        coordinator.factory().events(),
        vec![
            LifecycleEvent::Activated(0, StrategyKind::FileConfig),
            LifecycleEvent::Activated(1, StrategyKind::AddressServer),
            LifecycleEvent::Deactivated(0, StrategyKind::FileConfig),
        ]
    );
}

#[tokio::test]
async fn test_switch_to_same_kind_returns_current() {
    let (coordinator, sink) = coordinator(file_config(), MockStrategyFactory::new());

    let created = coordinator.create_lookup().await.unwrap();
    let first = coordinator.switch_lookup("file").await.unwrap();
    let second = coordinator.switch_lookup(" file ").await.unwrap();

    assert!(Arc::ptr_eq(&created, &first));
    assert!(Arc::ptr_eq(&created, &second));
    assert_eq!(coordinator.factory().built().len(), 1);
    assert_eq!(coordinator.factory().built()[0].deactivations(), 0);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn test_unknown_kind_leaves_current_untouched() {
    let (coordinator, _sink) = coordinator(file_config(), MockStrategyFactory::new());
    let created = coordinator.create_lookup().await.unwrap();

    for name in ["bogus", "", "standalone", "FILE"] {
        let result = coordinator.switch_lookup(name).await;
        assert_matches!(result, Err(Error::UnknownStrategyKind(_)));
    }

    assert!(Arc::ptr_eq(&created, &coordinator.current_lookup().unwrap()));
    assert_eq!(coordinator.factory().built().len(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_failed_activation_keeps_current() {
    let factory = MockStrategyFactory::new().with_failing(
        StrategyKind::AddressServer,
        ActivationError::SourceUnavailable("registry down".to_string()),
    );
    let (coordinator, _sink) = coordinator(file_config(), factory);
    let created = coordinator.create_lookup().await.unwrap();

    let result = coordinator.switch_lookup("address-server").await;

    assert_matches!(
        result,
        Err(Error::Activation(ActivationError::SourceUnavailable(reason))) if reason == "registry down"
    );
    assert!(Arc::ptr_eq(&created, &coordinator.current_lookup().unwrap()));
    assert_eq!(coordinator.current_kind(), Some(StrategyKind::FileConfig));

    let built = coordinator.factory().built();
    assert_eq!(built[0].deactivations(), 0);
    assert!(built[0].is_running());

    // The half-started strategy is cleaned up.
    assert_eq!(built[1].activations(), 1);
    assert_eq!(built[1].deactivations(), 1);
}

#[tokio::test]
async fn test_failed_create_installs_nothing() {
    let factory = MockStrategyFactory::new().with_failing(
        StrategyKind::FileConfig,
        ActivationError::SourceUnavailable("no cluster file".to_string()),
    );
    let (coordinator, sink) = coordinator(file_config(), factory);

    let result = coordinator.create_lookup().await;

    assert_matches!(result, Err(Error::Activation(_)));
    assert!(coordinator.current_lookup().is_none());
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn test_current_lookup_never_empty_during_switch() {
    let factory = MockStrategyFactory::new().with_deactivate_delay(Duration::from_millis(200));
    let (coordinator, _sink) = coordinator(file_config(), factory);
    let coordinator = Arc::new(coordinator);
    coordinator.create_lookup().await.unwrap();

    let switching = coordinator.clone();
    let handle = tokio::spawn(async move { switching.switch_lookup("address-server").await });

    let mut observed_new = false;
    while !handle.is_finished() {
        let current = coordinator.current_lookup();
        assert!(current.is_some(), "no active lookup during switch");
        if current.is_some_and(|strategy| strategy.kind() == StrategyKind::AddressServer) {
            observed_new = true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    handle.await.unwrap().unwrap();

    // The new strategy was published while the old one was still stopping.
    assert!(observed_new);
    assert_eq!(coordinator.current_kind(), Some(StrategyKind::AddressServer));
}

#[tokio::test]
async fn test_concurrent_switches_are_serialised() {
    let (coordinator, _sink) = coordinator(file_config(), MockStrategyFactory::new());
    let coordinator = Arc::new(coordinator);
    coordinator.create_lookup().await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = coordinator.clone();
            let name = if i % 2 == 0 { "address-server" } else { "file" };
            tokio::spawn(async move { coordinator.switch_lookup(name).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Exactly one strategy is left running, and it is the installed one.
    let built = coordinator.factory().built();
    let running: Vec<_> = built.iter().filter(|s| s.is_running()).collect();
    assert_eq!(running.len(), 1);
    assert_eq!(Some(running[0].kind()), coordinator.current_kind());

    for strategy in &built {
        assert_eq!(strategy.activations(), 1);
        assert!(strategy.deactivations() <= 1);
    }
}

#[tokio::test]
async fn test_each_replaced_strategy_deactivated_once() {
    let (coordinator, _sink) = coordinator(file_config(), MockStrategyFactory::new());

    coordinator.create_lookup().await.unwrap();
    coordinator.switch_lookup("address-server").await.unwrap();
    coordinator.switch_lookup("file").await.unwrap();
    coordinator.shutdown().await;

    let built = coordinator.factory().built();
    assert_eq!(built.len(), 3);
    for strategy in built {
        assert_eq!(strategy.activations(), 1, "strategy {}", strategy.id());
        assert_eq!(strategy.deactivations(), 1, "strategy {}", strategy.id());
    }
}

#[tokio::test]
async fn test_create_lookup_replaces_active_strategy() {
    let (coordinator, _sink) = coordinator(file_config(), MockStrategyFactory::new());

    let first = coordinator.create_lookup().await.unwrap();
    let second = coordinator.create_lookup().await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &coordinator.current_lookup().unwrap()));
    assert_eq!(
        coordinator.factory().events(),
        vec![
            LifecycleEvent::Activated(0, StrategyKind::FileConfig),
            LifecycleEvent::Activated(1, StrategyKind::FileConfig),
            LifecycleEvent::Deactivated(0, StrategyKind::FileConfig),
        ]
    );
}

#[tokio::test]
#[traced_test]
async fn test_shutdown_is_idempotent_and_restartable() {
    let (coordinator, _sink) = coordinator(file_config(), MockStrategyFactory::new());

    coordinator.shutdown().await;

    coordinator.create_lookup().await.unwrap();
    coordinator.shutdown().await;
    coordinator.shutdown().await;

    assert!(coordinator.current_lookup().is_none());
    assert_eq!(coordinator.factory().built()[0].deactivations(), 1);

    let restarted = coordinator.create_lookup().await.unwrap();
    assert!(Arc::ptr_eq(&restarted, &coordinator.current_lookup().unwrap()));
    assert_eq!(coordinator.factory().built().len(), 2);
}

#[tokio::test]
async fn test_refresh_and_info_follow_active_strategy() {
    let (coordinator, _sink) = coordinator(file_config(), MockStrategyFactory::new());

    coordinator.refresh().await.unwrap();
    assert!(coordinator.info().is_empty());

    coordinator.create_lookup().await.unwrap();
    coordinator.refresh().await.unwrap();
    assert_eq!(coordinator.info().get("kind").unwrap(), "file");

    coordinator.switch_lookup("address-server").await.unwrap();
    assert_eq!(coordinator.info().get("kind").unwrap(), "address-server");
}

#[test]
fn test_choose_kind_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.conf");
    let present = dir.path().join("cluster.conf");
    std::fs::write(&present, "10.0.0.1:8848\n").unwrap();

    let base = LookupConfig {
        cluster_conf_path: missing,
        ..LookupConfig::default()
    };
    let choose = |config: LookupConfig| {
        let (coordinator, _sink) = coordinator(config, MockStrategyFactory::new());
        coordinator.choose_kind()
    };

    // Standalone mode beats everything, including an explicit kind.
    let standalone = LookupConfig {
        standalone: true,
        lookup_type: Some("address-server".to_string()),
        cluster_conf_path: present.clone(),
        ..base.clone()
    };
    assert_eq!(choose(standalone).unwrap(), StrategyKind::Standalone);

    // An explicit kind beats the presence of a cluster file.
    let explicit = LookupConfig {
        lookup_type: Some("address-server".to_string()),
        cluster_conf_path: present.clone(),
        ..base.clone()
    };
    assert_eq!(choose(explicit).unwrap(), StrategyKind::AddressServer);

    let explicit_file = LookupConfig {
        lookup_type: Some("file".to_string()),
        ..base.clone()
    };
    assert_eq!(choose(explicit_file).unwrap(), StrategyKind::FileConfig);

    let with_file = LookupConfig {
        cluster_conf_path: present,
        ..base.clone()
    };
    assert_eq!(choose(with_file).unwrap(), StrategyKind::FileConfig);

    let with_list = LookupConfig {
        member_list: Some("10.0.0.1:8848".to_string()),
        ..base.clone()
    };
    assert_eq!(choose(with_list).unwrap(), StrategyKind::FileConfig);

    let blank_type = LookupConfig {
        lookup_type: Some("   ".to_string()),
        ..base.clone()
    };
    assert_eq!(choose(blank_type).unwrap(), StrategyKind::AddressServer);

    assert_eq!(choose(base.clone()).unwrap(), StrategyKind::AddressServer);

    let unknown = LookupConfig {
        lookup_type: Some("dns".to_string()),
        ..base
    };
    assert_matches!(choose(unknown), Err(Error::UnknownStrategyKind(name)) if name == "dns");
}

#[tokio::test]
#[traced_test]
async fn test_standalone_delivers_only_local_node() {
    let config = LookupConfig {
        standalone: true,
        local_address: "10.1.1.1:8848".to_string(),
        ..LookupConfig::default()
    };
    let sink = RecordingSink::new();
    let coordinator = LookupCoordinator::new(config, MockAddressSource::new(), Arc::new(sink.clone()));

    let strategy = coordinator.create_lookup().await.unwrap();

    assert_eq!(strategy.kind(), StrategyKind::Standalone);
    assert!(!strategy.is_running());
    assert_eq!(sink.count(), 1);
    assert_eq!(sink.last().unwrap().addresses(), vec!["10.1.1.1:8848"]);
    assert_eq!(coordinator.info().get("local").unwrap(), "10.1.1.1:8848");

    // Standalone is not selectable by name, and the node stays standalone.
    assert_matches!(
        coordinator.switch_lookup("standalone").await,
        Err(Error::UnknownStrategyKind(_))
    );
    assert_eq!(coordinator.current_kind(), Some(StrategyKind::Standalone));

    coordinator.shutdown().await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn test_standalone_with_malformed_local_address_fails() {
    let config = LookupConfig {
        standalone: true,
        local_address: "not-an-address".to_string(),
        ..LookupConfig::default()
    };
    let sink = RecordingSink::new();
    let coordinator = LookupCoordinator::new(config, MockAddressSource::new(), Arc::new(sink.clone()));

    assert_matches!(
        coordinator.create_lookup().await,
        Err(Error::MalformedAddress { .. })
    );
    assert!(coordinator.current_lookup().is_none());
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn test_switch_from_static_list_to_address_server() {
    let dir = tempfile::tempdir().unwrap();
    let config = LookupConfig {
        cluster_conf_path: dir.path().join("cluster.conf"),
        member_list: Some("10.0.0.1:8848".to_string()),
        address_server: AddressServerConfig {
            poll_interval: Duration::from_secs(3600),
            ..AddressServerConfig::default()
        },
        ..LookupConfig::default()
    };
    let source = MockAddressSource::with_body("10.0.0.7:8848\n10.0.0.8:8848\n");
    let sink = RecordingSink::new();
    let coordinator = LookupCoordinator::new(config, source.clone(), Arc::new(sink.clone()));

    let file = coordinator.create_lookup().await.unwrap();
    assert_eq!(file.kind(), StrategyKind::FileConfig);
    assert_eq!(sink.last().unwrap().addresses(), vec!["10.0.0.1:8848"]);

    let polling = coordinator.switch_lookup("address-server").await.unwrap();
    assert!(polling.is_running());
    assert_eq!(
        sink.last().unwrap().addresses(),
        vec!["10.0.0.7:8848", "10.0.0.8:8848"]
    );
    assert_eq!(
        source.fetched_endpoints()[0].as_str(),
        "http://localhost:8080/cluster/serverlist"
    );

    coordinator.shutdown().await;
    assert!(!polling.is_running());
}
