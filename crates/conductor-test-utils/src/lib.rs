//! Shared PostgreSQL harness for integration tests.
//!
//! One PostgreSQL server is shared per test binary: an external one when
//! `CONDUCTOR_TEST_PG_URL` points at a server root, a disposable
//! testcontainers instance otherwise. Each call to [`fresh_store`]
//! provisions a brand-new uniquely-named database inside that server
//! through the store's own provisioning path, so tests are isolated from
//! each other without any teardown choreography: the container dies with
//! the test run, and an external server is expected to be recycled by CI.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use conductor_store::postgres::PgStateStore;

/// The shared server: its root URL, plus the container handle kept alive
/// for the life of the test binary (absent in external-server mode).
struct PgServer {
    base_url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static PG_SERVER: OnceCell<PgServer> = OnceCell::const_new();

async fn pg_server() -> &'static PgServer {
    PG_SERVER
        .get_or_init(|| async {
            if let Ok(url) = std::env::var("CONDUCTOR_TEST_PG_URL") {
                return PgServer {
                    base_url: url,
                    _container: None,
                };
            }

            let container = Postgres::default()
                .with_tag("18")
                .start()
                .await
                .expect("failed to start PostgreSQL container");
            let host = container.get_host().await.expect("failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("failed to get mapped port");

            PgServer {
                base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
                _container: Some(container),
            }
        })
        .await
}

/// Root URL of the shared server, without a database name. For tests
/// that drive provisioning themselves.
pub async fn server_url() -> &'static str {
    &pg_server().await.base_url
}

/// A store backed by a fresh database in the shared server, with the
/// schema already applied.
///
/// Database names are unique per call, so concurrent tests never see each
/// other's state. Reach the raw rows through [`PgStateStore::pool`] when
/// a test needs to inspect or corrupt storage directly.
pub async fn fresh_store() -> PgStateStore {
    let server = pg_server().await;
    let db_name = format!("wf_{}", Uuid::new_v4().simple());
    let url = format!("{}/{db_name}", server.base_url);

    PgStateStore::provision(&url)
        .await
        .unwrap_or_else(|e| panic!("failed to provision test database {db_name}: {e:#}"))
}
