use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1::Builder as Http1Builder;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use ledger_operator::environments::{
    ConsoleKind, Environment, EnvironmentFactory, HttpConsoleClient, Node, NodeType,
    OpsToolsEnvironment,
};
use ledger_operator::error::RegistryError;
use ledger_operator::registry::{
    EnvironmentEntry, EnvironmentRegistry, EnvironmentType, GatewayRegistry,
    TransactionDataDirectory,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Clone)]
struct Route {
    status: StatusCode,
    body: Value,
    delay: Duration,
}

impl Route {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            delay: Duration::ZERO,
        }
    }
}

type Routes = Arc<Mutex<HashMap<String, Route>>>;

struct FakeConsole {
    url: String,
    routes: Routes,
}

impl FakeConsole {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let served = routes.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let routes = served.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let route = routes.lock().unwrap().get(req.uri().path()).cloned();
                        async move {
                            let Some(route) = route else {
                                return Ok::<_, Infallible>(
                                    Response::builder()
                                        .status(StatusCode::NOT_FOUND)
                                        .body(Full::new(Bytes::new()))
                                        .unwrap(),
                                );
                            };
                            tokio::time::sleep(route.delay).await;
                            Ok(Response::builder()
                                .status(route.status)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(route.body.to_string())))
                                .unwrap())
                        }
                    });
                    let _ = Http1Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        Self { url, routes }
    }

    fn route(&self, path: &str, route: Route) {
        self.routes.lock().unwrap().insert(path.to_string(), route);
    }
}

fn microfab_components(gateways: usize) -> Value {
    let mut components = vec![
        json!({
            "id": "org1peer",
            "display_name": "Org1 Peer",
            "type": "fabric-peer",
            "msp_id": "Org1MSP",
            "api_url": "grpc://org1peer-api.127-0-0-1.nip.io:8080",
            "wallet": "Org1",
            "identity": "org1admin"
        }),
        json!({
            "id": "orderer",
            "display_name": "Orderer",
            "type": "fabric-orderer",
            "msp_id": "OrdererMSP",
            "api_url": "grpc://orderer-api.127-0-0-1.nip.io:8080",
            "wallet": "Orderer",
            "identity": "ordereradmin"
        }),
        json!({ "id": "org1ca", "display_name": "Org1 CA", "type": "fabric-ca", "wallet": "Org1", "identity": "org1caadmin" }),
        json!({ "id": "couchdb", "type": "couchdb" }),
    ];
    for org in 1..=gateways {
        components.push(json!({
            "id": format!("org{org}gateway"),
            "display_name": format!("Org{org} Gateway"),
            "type": "gateway",
            "wallet": format!("Org{org}"),
            "name": format!("org{org}gateway"),
            "version": "1.0",
            "client": { "organization": format!("Org{org}") }
        }));
    }
    Value::Array(components)
}

fn factory() -> EnvironmentFactory {
    EnvironmentFactory::http(Duration::from_secs(2))
}

#[tokio::test(flavor = "multi_thread")]
async fn local_environment_reads_nodes_and_gateways_from_console() {
    let console = FakeConsole::start().await;
    console.route("/ak/api/v1/health", Route::ok(json!({})));
    console.route("/ak/api/v1/components", Route::ok(microfab_components(2)));
    let temp = tempfile::tempdir().unwrap();
    let entry = EnvironmentEntry::new("Local Fabric", EnvironmentType::LocalSimulated)
        .with_url(&console.url)
        .with_directory(temp.path().join("local"));
    let environment = factory().create(&entry).unwrap();

    assert!(environment.is_alive(Duration::from_secs(1)).await);

    let nodes = environment.get_nodes(false).await.unwrap();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[0].node_type, NodeType::Peer);
    assert_eq!(nodes[0].wallet.as_deref(), Some("Local Fabric - Org1"));

    let gateways = environment.get_gateways().await.unwrap();
    let names: Vec<_> = gateways.iter().map(|gateway| gateway.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Local Fabric - Org1 Gateway", "Local Fabric - Org2 Gateway"]
    );
    assert_eq!(gateways[1].associated_wallet, "Local Fabric - Org2");
    assert_eq!(gateways[0].from_environment.as_deref(), Some("Local Fabric"));
    let profile: Value =
        serde_json::from_slice(&std::fs::read(&gateways[0].connection_profile_path).unwrap())
            .unwrap();
    assert_eq!(profile["client"]["organization"], "Org1");
    assert!(
        gateways[0]
            .connection_profile_path
            .starts_with(temp.path().join("local").join("profiles"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn single_gateway_takes_environment_name_and_keeps_edits() {
    let console = FakeConsole::start().await;
    console.route("/ak/api/v1/health", Route::ok(json!({})));
    console.route("/ak/api/v1/components", Route::ok(microfab_components(1)));
    let temp = tempfile::tempdir().unwrap();
    let environments = EnvironmentRegistry::new(temp.path().join("environments"));
    environments
        .add(
            &EnvironmentEntry::new("1 Org Local Fabric", EnvironmentType::LocalSimulated)
                .with_url(&console.url)
                .with_directory(temp.path().join("runtime"))
                .managed()
                .as_primary(),
        )
        .unwrap();
    let gateways = GatewayRegistry::new(
        temp.path().join("gateways"),
        environments,
        Arc::new(factory()),
    );

    let mut all = gateways.get_all(true).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "1 Org Local Fabric");
    assert_eq!(all[0].display_name.as_deref(), Some("Org1 Gateway"));

    all[0].transaction_data_directories = vec![TransactionDataDirectory {
        chaincode_name: "fabcar".to_string(),
        channel_name: "mychannel".to_string(),
        transaction_data_path: temp.path().join("txdata"),
    }];
    gateways.update(&all[0]).unwrap();

    let refreshed = gateways.get_all(true).await.unwrap();
    assert_eq!(refreshed[0].transaction_data_directories.len(), 1);
    assert_eq!(
        refreshed[0].transaction_data_directories[0].chaincode_name,
        "fabcar"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unwritable_profile_directory_still_lists_gateways() {
    let console = FakeConsole::start().await;
    console.route("/ak/api/v1/components", Route::ok(microfab_components(2)));
    let temp = tempfile::tempdir().unwrap();
    let blocked = temp.path().join("not-a-directory");
    std::fs::write(&blocked, b"occupied").unwrap();
    let entry = EnvironmentEntry::new("Local Fabric", EnvironmentType::LocalSimulated)
        .with_url(&console.url)
        .with_directory(&blocked);
    let environment = factory().create(&entry).unwrap();

    let gateways = environment.get_gateways().await.unwrap();
    assert_eq!(gateways.len(), 2);
    assert!(
        gateways
            .iter()
            .all(|gateway| gateway.connection_profile_path.as_os_str().is_empty())
    );
    assert_eq!(gateways[0].associated_wallet, "Local Fabric - Org1");
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_slow_or_missing_consoles_are_not_alive() {
    let console = FakeConsole::start().await;
    console.route(
        "/ak/api/v1/health",
        Route {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "error": "starting" }),
            delay: Duration::ZERO,
        },
    );
    let failing = EnvironmentEntry::new("failing", EnvironmentType::LocalSimulated)
        .with_url(&console.url);
    let environment = factory().create(&failing).unwrap();
    assert!(!environment.is_alive(Duration::from_secs(1)).await);

    let slow_console = FakeConsole::start().await;
    slow_console.route(
        "/ak/api/v2/health",
        Route {
            status: StatusCode::OK,
            body: json!({}),
            delay: Duration::from_secs(5),
        },
    );
    let slow = EnvironmentEntry::new("slow", EnvironmentType::OpsTools).with_url(&slow_console.url);
    let environment = factory().create(&slow).unwrap();
    let started = Instant::now();
    assert!(!environment.is_alive(Duration::from_millis(200)).await);
    assert!(started.elapsed() < Duration::from_secs(2));

    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_url = format!("http://{}", unused.local_addr().unwrap());
    drop(unused);
    let missing =
        EnvironmentEntry::new("missing", EnvironmentType::SaasOpsTools).with_url(closed_url);
    let environment = factory().create(&missing).unwrap();
    assert!(!environment.is_alive(Duration::from_secs(1)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn console_import_hides_unselected_and_keeps_identities() {
    let console = FakeConsole::start().await;
    console.route(
        "/ak/api/v2/components",
        Route::ok(json!([
            { "id": "peer1", "display_name": "Peer One", "type": "fabric-peer", "msp_id": "Org1MSP" },
            { "id": "peer2", "display_name": "Peer Two", "type": "fabric-peer", "msp_id": "Org2MSP" },
            { "id": "os1", "display_name": "Orderer 1", "type": "fabric-orderer", "cluster_name": "Ordering Service" }
        ])),
    );
    let temp = tempfile::tempdir().unwrap();
    let entry = EnvironmentEntry::new("ops", EnvironmentType::OpsTools)
        .with_url(&console.url)
        .with_directory(temp.path().join("ops"));
    let client = Arc::new(HttpConsoleClient::new(Duration::from_secs(2)));
    let environment = OpsToolsEnvironment::new(entry, ConsoleKind::SelfHosted, client);
    assert_eq!(environment.environment_type(), EnvironmentType::OpsTools);

    let visible = vec!["Peer One".to_string(), "Orderer 1".to_string()];
    let imported = environment.import_nodes(Some(visible.as_slice())).await.unwrap();
    assert_eq!(imported.len(), 3);
    assert_eq!(environment.get_nodes(false).await.unwrap().len(), 2);
    assert_eq!(environment.get_nodes(true).await.unwrap().len(), 3);

    let mut peer = environment
        .get_nodes(false)
        .await
        .unwrap()
        .into_iter()
        .find(|node| node.name == "Peer One")
        .unwrap();
    peer.wallet = Some("Org1 Wallet".to_string());
    peer.identity = Some("admin".to_string());
    environment.update_node(&peer).await.unwrap();

    console.route(
        "/ak/api/v2/components",
        Route::ok(json!([
            { "id": "peer1", "display_name": "Peer One", "type": "fabric-peer", "msp_id": "Org1MSP" }
        ])),
    );
    environment.import_nodes(None).await.unwrap();
    let nodes = environment.get_nodes(true).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].identity.as_deref(), Some("admin"));
}

#[tokio::test(flavor = "multi_thread")]
async fn plain_refresh_keeps_curated_visibility() {
    let console = FakeConsole::start().await;
    console.route(
        "/ak/api/v2/components",
        Route::ok(json!([
            { "id": "peer1", "display_name": "Peer One", "type": "fabric-peer" },
            { "id": "peer2", "display_name": "Peer Two", "type": "fabric-peer" }
        ])),
    );
    let temp = tempfile::tempdir().unwrap();
    let entry = EnvironmentEntry::new("saas", EnvironmentType::SaasOpsTools)
        .with_url(&console.url)
        .with_directory(temp.path().join("saas"));
    let client = Arc::new(HttpConsoleClient::new(Duration::from_secs(2)));
    let environment = OpsToolsEnvironment::new(entry, ConsoleKind::Saas, client);

    let visible = vec!["Peer One".to_string()];
    environment.import_nodes(Some(visible.as_slice())).await.unwrap();

    console.route(
        "/ak/api/v2/components",
        Route::ok(json!([
            { "id": "peer1", "display_name": "Peer One", "type": "fabric-peer" },
            { "id": "peer2", "display_name": "Peer Two", "type": "fabric-peer" },
            { "id": "peer3", "display_name": "Peer Three", "type": "fabric-peer" }
        ])),
    );
    environment.import_nodes(None).await.unwrap();

    let shown: Vec<_> = environment
        .get_nodes(false)
        .await
        .unwrap()
        .into_iter()
        .map(|node| node.name)
        .collect();
    assert_eq!(shown, vec!["Peer One", "Peer Three"]);
    assert_eq!(environment.get_nodes(true).await.unwrap().len(), 3);
}

#[tokio::test]
async fn factory_builds_without_touching_the_network() {
    let factory = factory();
    let unreachable = EnvironmentEntry::new("later", EnvironmentType::LocalSimulated)
        .with_url("http://127.0.0.1:9");
    let environment = factory.create(&unreachable).unwrap();
    assert_eq!(environment.name(), "later");
    assert_eq!(environment.environment_type(), EnvironmentType::LocalSimulated);

    let unknown = EnvironmentEntry::new("future", EnvironmentType::from("quantum".to_string()));
    assert!(matches!(
        factory.create(&unknown),
        Err(RegistryError::Configuration(_))
    ));

    let saas = EnvironmentEntry::new("saas", EnvironmentType::SaasOpsTools)
        .with_url("https://console.example.org");
    let environment = factory.create(&saas).unwrap();
    assert_eq!(environment.environment_type(), EnvironmentType::SaasOpsTools);
    let peer = Node::new("peer", NodeType::Peer);
    assert!(environment.update_node(&peer).await.is_err());
}
