// Command channel behaviour, including disconnection
mod common;

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use preview_server::{
        ControlChannel, PreviewError, ServerControl, ServerManager,
        core::ResponseOverride,
    };

    use super::common::{FOLDER1_TEXT, FOLDER2_TEXT, Fixture, get};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_full_session_over_channel() {
        let fixture = Fixture::new();
        let manager = Arc::new(ServerManager::default());
        let control = ControlChannel::spawn(manager.clone(), 8);
        let root = fixture.root("folder1");

        let info = control.get_server(&root).await.unwrap();
        assert_eq!(control.get_server(&format!("{root}/")).await.unwrap(), info);

        control
            .set_filtered_paths(&root, vec!["/index.txt".to_string()])
            .await
            .unwrap();
        control.set_interception_timeout(2_000).await.unwrap();

        let mut requests = control.subscribe_requests().await.unwrap();
        let responder = tokio::spawn(async move {
            let event = requests.next().await.unwrap();
            event.response.send(ResponseOverride::new("from the channel"))
        });

        let (status, body) = get(info.port, "/index.txt").await;
        assert_eq!(status, 200);
        assert_eq!(body, "from the channel");
        assert!(responder.await.unwrap());

        let servers = control.servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].port, info.port);
        assert_eq!(servers[0].root, format!("{root}/"));

        control.close_server(&root).await.unwrap();
        control.close_server(&root).await.unwrap();
        assert!(control.servers().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_errors_are_returned_not_fatal() {
        let fixture = Fixture::new();
        let manager = Arc::new(ServerManager::default());
        let control = ControlChannel::spawn(manager.clone(), 8);

        let err = control
            .get_server(&fixture.path("folder1").join("index.txt").display().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::InvalidRoot { .. }));

        let err = control
            .set_filtered_paths(&fixture.root("folder2"), vec!["/index.txt".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::NotFound(_)));

        // The channel is still usable afterwards.
        let info = control.get_server(&fixture.root("folder2")).await.unwrap();
        let (_, body) = get(info.port, "/index.txt").await;
        assert_eq!(body, FOLDER2_TEXT);

        manager.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnect_keeps_servers_running() {
        let fixture = Fixture::new();
        let manager = Arc::new(ServerManager::default());
        let control = ControlChannel::spawn(manager.clone(), 8);
        let root = fixture.root("folder1");
        let info = control.get_server(&root).await.unwrap();

        control.disconnect();
        assert!(!control.is_connected());

        assert!(matches!(
            control.get_server(&root).await,
            Err(PreviewError::Disconnected)
        ));
        assert!(matches!(
            control.close_server(&root).await,
            Err(PreviewError::Disconnected)
        ));
        assert!(matches!(
            control.subscribe_requests().await,
            Err(PreviewError::Disconnected)
        ));

        let (status, body) = get(info.port, "/index.txt").await;
        assert_eq!(status, 200);
        assert_eq!(body, FOLDER1_TEXT);
        assert_eq!(manager.servers().await.len(), 1);

        manager.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_command_fails_on_disconnect() {
        let fixture = Fixture::new();
        let manager = Arc::new(ServerManager::default());
        let control = ControlChannel::spawn(manager.clone(), 8);
        let root = fixture.root("folder1");

        // Start a command and cut the channel while it may still be in flight.
        let pending = {
            let control = control.clone();
            tokio::spawn(async move { control.get_server(&root).await })
        };
        control.disconnect();

        match pending.await.unwrap() {
            Ok(info) => assert!(info.port > 0),
            Err(e) => assert!(matches!(e, PreviewError::Disconnected)),
        }

        manager.close_all().await;
    }
}
