//! Connection-string parsing feeding straight into `Client` construction:
//! confirms the options a caller writes in a `mongodb://` URI actually reach
//! the `Topology` seed list and the `ClientOptions` the rest of the client
//! reads from, without ever awaiting a network operation (`Client::with_options`
//! spawns background monitor tasks, which is why this needs a Tokio runtime,
//! but nothing here waits on them to succeed).

use mongo_driver_core::options;
use mongo_driver_core::topology::ReadPreferenceMode;
use mongo_driver_core::Client;

#[tokio::test]
async fn client_seeds_topology_from_connection_string() {
    let client = Client::with_uri_str("mongodb://alice:s3cret@a:27017,b:27018/mydb?replicaSet=rs0&maxPoolSize=5&retryWrites=false").unwrap();

    let description = client.topology().description();
    assert!(description.servers.contains_key("a:27017"));
    assert!(description.servers.contains_key("b:27018"));
}

#[tokio::test]
async fn client_options_carry_pool_size_and_retry_writes() {
    let options = options::parse("mongodb://localhost/?maxPoolSize=5&retryWrites=false&readPreference=secondaryPreferred").unwrap();
    assert_eq!(options.max_pool_size, 5);
    assert!(!options.retry_writes);
    assert_eq!(options.read_preference.mode, ReadPreferenceMode::SecondaryPreferred);

    // The client itself doesn't expose these back out (no getters beyond
    // topology()/database()), but constructing it from the same options
    // must not panic or reject a valid, fully-populated options value.
    let _client = Client::with_options(options);
}

#[tokio::test]
async fn single_seed_with_no_replica_set_selects_single_topology_type() {
    let client = Client::with_uri_str("mongodb://localhost:27017").unwrap();
    assert_eq!(
        client.topology().description().topology_type,
        mongo_driver_core::topology::TopologyType::Single
    );
}

#[tokio::test]
async fn malformed_connection_string_is_rejected_before_any_client_is_built() {
    assert!(Client::with_uri_str("mongodb://").is_err());
    assert!(Client::with_uri_str("not-a-uri").is_err());
}
