// Preview capability checks against a live project server
mod common;

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use preview_server::{
        ControlChannel, ServerControl, ServerManager, StaticServerProvider,
        config::models::ProjectConfig,
    };

    use super::common::{FOLDER1_TEXT, Fixture, get};

    async fn ready_provider(fixture: &Fixture) -> (Arc<ServerManager>, StaticServerProvider) {
        let manager = Arc::new(ServerManager::default());
        let provider = StaticServerProvider::new(manager.clone());
        provider.set_project_root(fixture.path("folder1")).unwrap();
        provider.ready_to_serve().await.unwrap();
        (manager, provider)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_can_serve_rules() {
        let fixture = Fixture::new();
        let (manager, provider) = ready_provider(&fixture).await;
        let root = fixture.path("folder1");

        assert!(!provider.can_serve("/foo.html"));
        assert!(!provider.can_serve(fixture.path("folder2").join("foo.html")));
        assert!(!provider.can_serve(root.join("foo.jpg")));
        assert!(!provider.can_serve(root.join("index.txt")));

        assert!(provider.can_serve(root.join("foo.htm")));
        assert!(provider.can_serve(root.join("foo.html")));
        assert!(provider.can_serve(root.join("foo.HTML")));
        assert!(provider.can_serve(root.join("sub").join("deep.html")));

        assert!(provider.can_serve(&root));
        assert!(provider.can_serve(format!("{}/", root.display())));

        manager.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_base_url_points_at_project_server() {
        let fixture = Fixture::new();
        let (manager, provider) = ready_provider(&fixture).await;

        let base = provider.base_url().unwrap();
        let port: u16 = base
            .strip_prefix("http://127.0.0.1:")
            .and_then(|rest| rest.strip_suffix('/'))
            .and_then(|port| port.parse().ok())
            .unwrap();

        let (status, body) = get(port, "/index.txt").await;
        assert_eq!(status, 200);
        assert_eq!(body, FOLDER1_TEXT);

        assert_eq!(
            provider.url_for(fixture.path("folder1").join("page.html")),
            Some(format!("{base}page.html"))
        );

        manager.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_custom_extensions_from_config() {
        let fixture = Fixture::new();
        let manager = Arc::new(ServerManager::default());
        let project = ProjectConfig {
            root: Some(fixture.root("folder1")),
            preview_extensions: vec!["txt".to_string()],
        };
        let provider = StaticServerProvider::from_config(manager.clone(), &project).unwrap();
        provider.ready_to_serve().await.unwrap();

        let root = fixture.path("folder1");
        assert!(provider.can_serve(root.join("index.txt")));
        assert!(!provider.can_serve(root.join("page.html")));

        manager.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnected_channel_cannot_serve() {
        let fixture = Fixture::new();
        let manager = Arc::new(ServerManager::default());
        let control = ControlChannel::spawn(manager.clone(), 8);
        let provider = StaticServerProvider::new(Arc::new(control.clone()));
        provider.set_project_root(fixture.path("folder1")).unwrap();
        let info = provider.ready_to_serve().await.unwrap();

        let page = fixture.path("folder1").join("page.html");
        assert!(provider.can_serve(&page));

        control.disconnect();
        assert!(!control.is_connected());
        assert!(!provider.can_serve(&page));

        // The server itself keeps running.
        let (status, body) = get(info.port, "/index.txt").await;
        assert_eq!(status, 200);
        assert_eq!(body, FOLDER1_TEXT);

        manager.close_all().await;
    }
}
