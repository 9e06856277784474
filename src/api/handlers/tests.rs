// API 处理器测试

#[cfg(test)]
mod tests {
    use crate::addons::registry::testing::{document, five_plugin_document, plugin_json, ScriptedSource};
    use crate::addons::restart::testing::RecordingControl;
    use crate::addons::{
        AddonManager, DownloadLimits, ManifestStore, MemoryCatalogStore, MemoryInstallationStore,
        RegistryClient, RestartCoordinator, SystemProvisioner,
    };
    use crate::addons::manifest::builtin_manifests;
    use crate::addons::registry::test_entry;
    use crate::api::{ApiRouteConfig, AppState};
    use crate::errors::ErrorHandlerMiddleware;
    use actix_web::{http::StatusCode, test, web, App};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        state: AppState,
        source: Arc<ScriptedSource>,
        control: Arc<RecordingControl>,
    }

    fn harness() -> Harness {
        let mut bundled = builtin_manifests();
        let mut backup_sync = test_entry("backup-sync", "0.3.0", "backup", &[]).manifest;
        backup_sync.requires_restart = true;
        bundled.push(backup_sync);

        let manifests = Arc::new(ManifestStore::new(bundled).unwrap());
        let installations = Arc::new(MemoryInstallationStore::new());
        let provisioner = Arc::new(
            SystemProvisioner::new("/nonexistent", false, DownloadLimits::default()).unwrap(),
        );
        let control = Arc::new(RecordingControl::default());
        let restart = Arc::new(RestartCoordinator::new(
            Duration::from_millis(3000),
            control.clone(),
        ));
        let source = Arc::new(ScriptedSource::new(five_plugin_document()));

        let manager = Arc::new(AddonManager::new(
            manifests.clone(),
            installations.clone(),
            provisioner,
            restart,
        ));
        let registry = Arc::new(
            RegistryClient::new(
                source.clone(),
                manifests,
                installations,
                Arc::new(MemoryCatalogStore::new()),
                Duration::from_secs(3600),
            )
            .unwrap(),
        );

        Harness {
            state: AppState::new(manager, registry, None),
            source,
            control,
        }
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .wrap(ErrorHandlerMiddleware)
                    .app_data(web::Data::new($state.clone()))
                    .configure(ApiRouteConfig::configure_all),
            )
            .await
        };
    }

    macro_rules! call {
        ($app:expr, $req:expr) => {{
            let resp = test::call_service(&$app, $req.to_request()).await;
            let status = resp.status();
            let body: Value = test::read_body_json(resp).await;
            (status, body)
        }};
    }

    fn ids(plugins: &Value) -> Vec<String> {
        plugins
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[actix_web::test]
    async fn test_list_addons_synthesizes_missing_status() {
        let h = harness();
        let app = app!(h.state);

        let (status, body) = call!(app, test::TestRequest::get().uri("/api/v1/addons"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let addons = body["data"].as_array().unwrap();
        assert_eq!(addons.len(), 6);
        assert!(addons.iter().all(|a| a["status"]["installed"] == false));
        assert_eq!(addons[0]["manifest"]["id"], "backup-sync");
    }

    #[actix_web::test]
    async fn test_unknown_addon_returns_404() {
        let h = harness();
        let app = app!(h.state);

        for req in [
            test::TestRequest::get().uri("/api/v1/addons/nope"),
            test::TestRequest::get().uri("/api/v1/addons/nope/status"),
            test::TestRequest::post().uri("/api/v1/addons/nope/install"),
        ] {
            let (status, body) = call!(app, req);
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["success"], false);
            assert_eq!(body["error"]["code"], "NOT_FOUND");
        }
    }

    #[actix_web::test]
    async fn test_blank_addon_id_is_rejected() {
        let h = harness();
        let app = app!(h.state);

        let (status, body) = call!(app, test::TestRequest::get().uri("/api/v1/addons/%20/status"));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[actix_web::test]
    async fn test_status_of_never_installed_addon_is_not_installed() {
        let h = harness();
        let app = app!(h.state);

        let (status, body) = call!(app, test::TestRequest::get().uri("/api/v1/addons/minio/status"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["addon_id"], "minio");
        assert_eq!(body["data"]["installed"], false);
    }

    #[actix_web::test]
    async fn test_install_requires_restart_schedules_restart() {
        let h = harness();
        let app = app!(h.state);

        let (status, body) = call!(
            app,
            test::TestRequest::post().uri("/api/v1/addons/backup-sync/install")
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["restart_scheduled"], true);
        assert_eq!(body["data"]["version"], "0.3.0");
        assert!(body["data"]["message"].as_str().unwrap().contains("3 seconds"));
        assert!(h.state.manager.restart_coordinator().status().pending);
        assert_eq!(h.control.count(), 0);

        let (_, body) = call!(
            app,
            test::TestRequest::get().uri("/api/v1/addons/backup-sync/status")
        );
        assert_eq!(body["data"]["installed"], true);
        assert_eq!(body["data"]["installed_version"], "0.3.0");
        assert_eq!(body["data"]["packages_ok"], true);
    }

    #[actix_web::test]
    async fn test_install_without_restart_and_conflict() {
        let h = harness();
        let app = app!(h.state);

        let (status, body) = call!(app, test::TestRequest::post().uri("/api/v1/addons/minio/install"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["restart_scheduled"], false);
        assert_eq!(body["data"]["message"], "Addon installed successfully");
        assert!(!h.state.manager.restart_coordinator().status().pending);

        let (status, body) = call!(app, test::TestRequest::post().uri("/api/v1/addons/minio/install"));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[actix_web::test]
    async fn test_uninstall_lifecycle() {
        let h = harness();
        let app = app!(h.state);

        let (status, _) = call!(app, test::TestRequest::delete().uri("/api/v1/addons/minio"));
        assert_eq!(status, StatusCode::NOT_FOUND);

        call!(app, test::TestRequest::post().uri("/api/v1/addons/minio/install"));

        let (status, body) = call!(app, test::TestRequest::delete().uri("/api/v1/addons/minio"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"]["installed"], false);

        let (status, _) = call!(app, test::TestRequest::delete().uri("/api/v1/addons/minio"));
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = call!(app, test::TestRequest::get().uri("/api/v1/addons/minio"));
        assert_eq!(body["data"]["manifest"]["id"], "minio");
        assert_eq!(body["data"]["status"]["installed"], false);
        assert_eq!(body["data"]["status"]["installed_version"], "1.0.0");
    }

    #[actix_web::test]
    async fn test_catalog_syncs_when_stale_and_search_filters() {
        let h = harness();
        let app = app!(h.state);

        let (status, body) = call!(app, test::TestRequest::get().uri("/api/v1/plugin-store"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 5);
        assert!(body["data"]["last_sync"].is_string());

        let (status, body) = call!(
            app,
            test::TestRequest::get().uri("/api/v1/plugin-store/search?category=utilities")
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ids(&body["data"]["plugins"]), vec!["diskwatch", "syncthing"]);

        let (_, body) = call!(
            app,
            test::TestRequest::get().uri("/api/v1/plugin-store/search?q=&category=")
        );
        assert_eq!(body["data"]["total"], 5);

        call!(app, test::TestRequest::get().uri("/api/v1/plugin-store"));
        assert_eq!(h.source.fetch_count(), 1);
    }

    #[actix_web::test]
    async fn test_failed_sync_returns_500_and_keeps_catalog() {
        let h = harness();
        let app = app!(h.state);

        let (status, body) = call!(app, test::TestRequest::post().uri("/api/v1/plugin-store/sync"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["added"], 5);
        assert_eq!(body["data"]["updated"], 0);

        let (_, before) = call!(app, test::TestRequest::get().uri("/api/v1/plugin-store/search"));

        h.source.fail_with("connection reset by peer");
        let (status, body) = call!(app, test::TestRequest::post().uri("/api/v1/plugin-store/sync"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");

        let (_, after) = call!(app, test::TestRequest::get().uri("/api/v1/plugin-store/search"));
        assert_eq!(before["data"]["plugins"], after["data"]["plugins"]);
    }

    #[actix_web::test]
    async fn test_plugin_entry_install_and_update() {
        let h = harness();
        let app = app!(h.state);
        call!(app, test::TestRequest::post().uri("/api/v1/plugin-store/sync"));

        let (status, _) = call!(app, test::TestRequest::get().uri("/api/v1/plugin-store/unknown"));
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call!(
            app,
            test::TestRequest::post().uri("/api/v1/plugin-store/jellyfin/update")
        );
        assert_eq!(status, StatusCode::NOT_FOUND);

        call!(app, test::TestRequest::post().uri("/api/v1/addons/jellyfin/install"));

        let (_, body) = call!(app, test::TestRequest::get().uri("/api/v1/plugin-store/jellyfin"));
        assert_eq!(body["data"]["installed"], true);
        assert_eq!(body["data"]["installed_version"], "10.8.0");

        let (_, body) = call!(app, test::TestRequest::get().uri("/api/v1/plugin-store/installed"));
        assert_eq!(ids(&body["data"]["plugins"]), vec!["jellyfin"]);

        h.source.set_document(document(vec![plugin_json(
            "jellyfin", "10.9.0", "media", &["video"],
        )]));
        call!(app, test::TestRequest::post().uri("/api/v1/plugin-store/sync"));

        let (status, body) = call!(
            app,
            test::TestRequest::post().uri("/api/v1/plugin-store/jellyfin/update")
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["updated"], true);
        assert_eq!(body["data"]["previous_version"], "10.8.0");
        assert_eq!(body["data"]["version"], "10.9.0");
        assert_eq!(body["data"]["restart_scheduled"], false);
    }

    #[actix_web::test]
    async fn test_update_of_restart_plugin_reports_scheduled_restart() {
        let h = harness();
        let app = app!(h.state);

        let mut restart_plugin = plugin_json("photoprism", "1.0.0", "media", &[]);
        restart_plugin["requires_restart"] = Value::Bool(true);
        h.source.set_document(document(vec![restart_plugin.clone()]));
        call!(app, test::TestRequest::post().uri("/api/v1/plugin-store/sync"));
        call!(app, test::TestRequest::post().uri("/api/v1/addons/photoprism/install"));
        let first = h.state.manager.restart_coordinator().status().token.unwrap();

        let (_, body) = call!(
            app,
            test::TestRequest::post().uri("/api/v1/plugin-store/photoprism/update")
        );
        assert_eq!(body["data"]["updated"], false);
        assert_eq!(body["data"]["restart_scheduled"], false);

        restart_plugin["version"] = Value::String("1.1.0".to_string());
        h.source.set_document(document(vec![restart_plugin]));
        call!(app, test::TestRequest::post().uri("/api/v1/plugin-store/sync"));

        let (status, body) = call!(
            app,
            test::TestRequest::post().uri("/api/v1/plugin-store/photoprism/update")
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["updated"], true);
        assert_eq!(body["data"]["restart_scheduled"], true);
        let second = h.state.manager.restart_coordinator().status().token.unwrap();
        assert!(second > first);
        assert_eq!(h.control.count(), 0);
    }

    #[actix_web::test]
    async fn test_enable_disable_and_config_routes() {
        let h = harness();
        let app = app!(h.state);

        let (status, _) = call!(app, test::TestRequest::post().uri("/api/v1/addons/minio/disable"));
        assert_eq!(status, StatusCode::NOT_FOUND);

        call!(app, test::TestRequest::post().uri("/api/v1/addons/minio/install"));

        let (status, body) = call!(app, test::TestRequest::post().uri("/api/v1/addons/minio/disable"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["enabled"], false);
        assert_eq!(body["data"]["installed"], true);

        let (status, body) = call!(app, test::TestRequest::post().uri("/api/v1/addons/minio/enable"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["enabled"], true);

        let (status, body) = call!(
            app,
            test::TestRequest::put()
                .uri("/api/v1/addons/minio/config")
                .set_json(serde_json::json!({"config": "not an object"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = call!(
            app,
            test::TestRequest::put()
                .uri("/api/v1/addons/minio/config")
                .set_json(serde_json::json!({"config": {"console_port": 9001}, "auto_update": true}))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["config"]["console_port"], 9001);
        assert_eq!(body["data"]["auto_update"], true);

        call!(app, test::TestRequest::delete().uri("/api/v1/addons/minio"));
        let (status, body) = call!(app, test::TestRequest::post().uri("/api/v1/addons/minio/enable"));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[actix_web::test]
    async fn test_sync_applies_auto_updates() {
        let h = harness();
        let app = app!(h.state);
        call!(app, test::TestRequest::post().uri("/api/v1/plugin-store/sync"));
        call!(app, test::TestRequest::post().uri("/api/v1/addons/jellyfin/install"));
        call!(app, test::TestRequest::post().uri("/api/v1/addons/pihole/install"));
        call!(
            app,
            test::TestRequest::put()
                .uri("/api/v1/addons/jellyfin/config")
                .set_json(serde_json::json!({"auto_update": true}))
        );

        h.source.set_document(document(vec![
            plugin_json("jellyfin", "10.9.0", "media", &["video"]),
            plugin_json("pihole", "5.18.0", "networking", &["dns"]),
        ]));
        let (status, body) = call!(app, test::TestRequest::post().uri("/api/v1/plugin-store/sync"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["auto_updated"], serde_json::json!(["jellyfin"]));
        assert_eq!(body["data"]["restart_scheduled"], false);

        let (_, body) = call!(app, test::TestRequest::get().uri("/api/v1/addons/jellyfin/status"));
        assert_eq!(body["data"]["installed_version"], "10.9.0");
        let (_, body) = call!(app, test::TestRequest::get().uri("/api/v1/addons/pihole/status"));
        assert_eq!(body["data"]["installed_version"], "5.17.0");
    }

    #[actix_web::test]
    async fn test_health_and_openapi_endpoints() {
        let h = harness();
        let app = app!(h.state);

        let (status, body) = call!(app, test::TestRequest::get().uri("/health"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "nasplane");

        let (status, body) = call!(app, test::TestRequest::get().uri("/api/v1/health/detailed"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "degraded");
        assert_eq!(body["data"]["restart"]["pending"], false);

        let (status, body) = call!(app, test::TestRequest::get().uri("/api/v1/openapi.json"));
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["paths"]["/addons/{id}/install"].is_object());
        assert!(body["data"]["paths"]["/addons/{id}/config"].is_object());
    }
}
