use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deploy_listener::dispatcher::{DeployHandler, Dispatcher};
use deploy_listener::rabbitmq::Subscriber;
use deploy_listener::updater::{Orchestrator, Service, UpdateError, Updater};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::support::{test_config, wait_until, MockBroker, SessionScript, StreamEnd};

#[derive(Clone, Default)]
struct RecordingSwarm {
    updates: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Orchestrator for RecordingSwarm {
    async fn list_services(&self) -> Result<Vec<Service>, UpdateError> {
        let service = |name: &str, image: &str| Service {
            id: name.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            version: 1,
            spec: json!({ "Name": name, "TaskTemplate": { "ContainerSpec": { "Image": image } } }),
        };
        Ok(vec![
            service("svc_api", "svc:v1"),
            service("svc_worker", "svc:v1"),
            service("proxy", "traefik:2"),
        ])
    }

    async fn update_image(&self, service: &Service, image: &str) -> Result<(), UpdateError> {
        self.updates
            .lock()
            .unwrap()
            .push((service.name.clone(), image.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn test_push_event_rolls_matching_services() {
    let webhook = r#"{"callback_url":"x","push_data":{"tag":"v2"},"repository":{"repo_name":"svc"}}"#;
    let broker = MockBroker::new().with_session(SessionScript::bodies(
        &["{malformed", webhook],
        StreamEnd::Hang,
    ));
    let swarm = RecordingSwarm::default();
    let updates = swarm.updates.clone();

    let token = CancellationToken::new();
    let subscriber = Subscriber::new(
        test_config(10, Duration::from_millis(10)),
        broker.clone(),
        token.clone(),
    );
    let (deliveries, handle) = subscriber.consume();

    let dispatcher = Dispatcher::new(DeployHandler::new(Updater::new(swarm)));
    let dispatch = tokio::spawn(async move { dispatcher.run(deliveries).await });

    wait_until(|| updates.lock().unwrap().len() == 2).await;
    wait_until(|| broker.acks() == vec![1, 2]).await;

    token.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(dispatch.await.unwrap(), 2);

    assert_eq!(
        *updates.lock().unwrap(),
        vec![
            ("svc_api".to_string(), "svc:v2".to_string()),
            ("svc_worker".to_string(), "svc:v2".to_string()),
        ]
    );
}
