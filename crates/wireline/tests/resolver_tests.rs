//! Tests for the caching resolver's public surface.

use wireline::{Address, Resolver};

#[tokio::test]
async fn static_hosts_drive_both_lookup_paths() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = dir.path().join("hosts");
    std::fs::write(
        &hosts,
        "# pinned services\n\
         10.1.0.1 db.internal\n\
         10.1.0.2 db.internal cache.internal\n",
    )
    .unwrap();

    let resolver = Resolver::new();
    resolver.load_static_hosts(&hosts).unwrap();

    let expected: Vec<Address> = vec!["10.1.0.1".parse().unwrap(), "10.1.0.2".parse().unwrap()];
    assert_eq!(resolver.lookup_sync("db.internal"), Some(expected.clone()));
    assert_eq!(resolver.lookup("db.internal").await.unwrap(), expected);

    // Names are matched case-insensitively.
    assert!(resolver.lookup_sync("DB.internal").is_some());
    assert_eq!(resolver.lookup_sync("unknown.internal"), None);
}

#[tokio::test]
async fn lookup_async_delivers_through_the_callback() {
    let resolver = Resolver::new();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    resolver.lookup_async("127.0.0.1:9000", move |result| {
        let _ = tx.send(result);
    });

    let found = rx.recv().await.unwrap().unwrap();
    assert_eq!(found, vec!["127.0.0.1:9000".parse::<Address>().unwrap()]);
}
