use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use log::{info, warn};

use crate::{
    catalog::CatalogClient,
    config::{AppConfig, CatalogConfig},
    error::Result,
    models::{Application, NavigationLink},
};

/// Last catalog load as shown by the view.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub applications: Vec<Application>,
    pub navigation: Vec<NavigationLink>,
    /// Host that served the applications, if any did.
    pub endpoint: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog_config: Arc<Mutex<CatalogConfig>>,
    pub catalog: Arc<Mutex<CatalogSnapshot>>,
    pub client: CatalogClient,
    refreshing: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: AppConfig, client: CatalogClient) -> Self {
        let catalog_config = config.catalog_config();
        Self::with_catalog_config(config, catalog_config, client)
    }

    pub fn with_catalog_config(
        config: AppConfig,
        catalog_config: CatalogConfig,
        client: CatalogClient,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog_config: Arc::new(Mutex::new(catalog_config)),
            catalog: Arc::new(Mutex::new(CatalogSnapshot::default())),
            client,
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn catalog_config(&self) -> CatalogConfig {
        self.catalog_config.lock().unwrap().clone()
    }

    /// Base used to build server-file URLs: the host that served the catalog, else the selected one.
    pub fn catalog_base(&self) -> String {
        self.catalog
            .lock()
            .unwrap()
            .endpoint
            .clone()
            .unwrap_or_else(|| self.catalog_config().selected().to_string())
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Fetches applications and navigation together and replaces the snapshot.
    ///
    /// Returns `None` when a refresh is already running.
    pub async fn refresh(&self) -> Option<usize> {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return None;
        }
        let config = self.catalog_config();
        let (apps, navigation) = tokio::join!(
            self.client.fetch_applications(&config),
            self.client.fetch_navigation(&config)
        );

        let count = apps.items.len();
        let mut errors = apps.errors;
        errors.extend(navigation.errors);
        {
            let mut snapshot = self.catalog.lock().unwrap();
            *snapshot = CatalogSnapshot {
                applications: apps.items,
                navigation: navigation.items,
                endpoint: apps.endpoint,
                errors,
            };
        }
        self.refreshing.store(false, Ordering::SeqCst);
        info!("catalog refreshed: {count} applications");
        Some(count)
    }

    /// Runs the speed test against the selected host and switches to the fastest one.
    pub async fn speed_test(&self) -> Result<String> {
        let selected = self.catalog_config().selected().to_string();
        let report = self.client.speed_test(&selected).await?;
        let mut guard = self.catalog_config.lock().unwrap();
        let next = guard.apply_speed_test(&report)?;
        *guard = next;
        let fastest = guard.selected().to_string();
        info!("fastest catalog endpoint: {fastest}");
        Ok(fastest)
    }

    pub fn add_endpoint(&self, raw: &str) -> Result<String> {
        self.update_endpoints(|config| config.with_endpoint(raw))
    }

    pub fn remove_endpoint(&self, raw: &str) -> Result<String> {
        self.update_endpoints(|config| config.without_endpoint(raw))
    }

    pub fn select_endpoint(&self, raw: &str) -> Result<String> {
        self.update_endpoints(|config| config.with_selected(raw))
    }

    /// Applies `update` and returns the selected host afterwards.
    fn update_endpoints<F>(&self, update: F) -> Result<String>
    where
        F: FnOnce(&CatalogConfig) -> Result<CatalogConfig>,
    {
        let mut guard = self.catalog_config.lock().unwrap();
        match update(&guard) {
            Ok(next) => {
                *guard = next;
                Ok(guard.selected().to_string())
            }
            Err(err) => {
                warn!("endpoint update rejected: {err}");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::{routing::get, Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use crate::error::Error;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn state_for(base: &str) -> AppState {
        AppState::with_catalog_config(
            AppConfig::default(),
            CatalogConfig::new([base]).unwrap(),
            CatalogClient::new(Duration::from_secs(5)).unwrap(),
        )
    }

    #[tokio::test]
    async fn refresh_replaces_snapshot() {
        let base = serve(
            Router::new()
                .route(
                    "/api/v1/applications/",
                    get(|| async {
                        Json(json!({"results": [
                            {"name": "Foo", "category_name": "Tools"},
                            {"name": "Bar"}
                        ]}))
                    }),
                )
                .route(
                    "/api/v1/navigation/",
                    get(|| async { Json(json!([{"name": "Wiki", "url": "http://wiki"}])) }),
                ),
        )
        .await;
        let state = state_for(&base);

        assert_eq!(state.refresh().await, Some(2));
        let snapshot = state.catalog.lock().unwrap().clone();
        assert_eq!(snapshot.applications.len(), 2);
        assert_eq!(snapshot.navigation[0].name, "Wiki");
        assert_eq!(snapshot.endpoint.as_deref(), Some(base.as_str()));
        assert_eq!(state.catalog_base(), base);
        assert!(!state.is_refreshing());
    }

    #[tokio::test]
    async fn speed_test_switches_selected_endpoint() {
        let base = serve(Router::new().route(
            "/test-speed/",
            get(|| async {
                Json(json!({
                    "success": true,
                    "fastest_api": {"url": "http://fast.example:8000/", "response_time": 12.5},
                    "all_results": []
                }))
            }),
        ))
        .await;
        let state = state_for(&base);

        let fastest = state.speed_test().await.unwrap();
        assert_eq!(fastest, "http://fast.example:8000");
        assert_eq!(state.catalog_config().endpoints().len(), 2);
    }

    #[test]
    fn endpoint_updates_keep_previous_config_on_error() {
        let state = AppState::new(
            AppConfig::default(),
            CatalogClient::new(Duration::from_secs(1)).unwrap(),
        );
        let before = state.catalog_config();

        assert!(matches!(
            state.remove_endpoint("http://dsm:8000"),
            Err(Error::InvalidEndpoint { .. })
        ));
        assert_eq!(state.catalog_config(), before);

        state.add_endpoint("http://mirror.local:8000/").unwrap();
        assert_eq!(
            state.select_endpoint("http://mirror.local:8000").unwrap(),
            "http://mirror.local:8000"
        );
        assert_eq!(
            state.remove_endpoint("http://mirror.local:8000").unwrap(),
            before.selected()
        );
    }
}
