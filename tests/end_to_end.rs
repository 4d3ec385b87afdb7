use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use queuevisor::{
    BackgroundQueue, Envelope, Event, EventKind, HandlerError, HandlerFn, HandlerRef, HealthStatus,
    LifecycleError, QueueConfig, QueueError, Subscribe, Supervisor, SupervisorState,
};

struct Collect(Arc<Mutex<Vec<EventKind>>>);

#[async_trait]
impl Subscribe for Collect {
    async fn on_event(&self, event: &Event) {
        self.0.lock().unwrap().push(event.kind);
    }
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, HandlerRef<Envelope<String>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let h: HandlerRef<Envelope<String>> =
        HandlerFn::arc(move |env: Envelope<String>, _ctx: CancellationToken| {
            sink.lock().unwrap().push(env.payload().clone());
            async { Ok::<_, HandlerError>(()) }
        });
    (seen, h)
}

#[tokio::test]
async fn sequential_queue_preserves_enqueue_order() {
    let (seen, h) = recorder();
    let cfg = QueueConfig {
        max_concurrency: 1,
        capacity: None,
        ..QueueConfig::default()
    };
    let queue = Arc::new(BackgroundQueue::new("orders", cfg, h).unwrap());
    let events = Arc::new(Mutex::new(Vec::new()));
    let collect: Arc<dyn Subscribe> = Arc::new(Collect(events.clone()));
    let sup = Supervisor::builder(queue.clone())
        .with_subscribers(vec![collect])
        .build();

    sup.start().await.unwrap();
    assert!(sup.readiness().is_healthy());

    for item in ["a", "b", "c"] {
        queue.enqueue(Envelope::new(item.to_string())).await.unwrap();
    }
    sup.stop().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(sup.state(), SupervisorState::Stopped);
    assert_eq!(sup.liveness().status, HealthStatus::Unhealthy);

    let late = queue.enqueue(Envelope::new("d".to_string())).await;
    assert!(late.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let kinds = events.lock().unwrap().clone();
    assert!(kinds.contains(&EventKind::ServiceRunning));
    assert!(kinds.contains(&EventKind::DrainedWithinGrace));
    assert!(kinds.contains(&EventKind::ServiceStopped));
}

#[tokio::test]
async fn supervisor_rejects_lifecycle_misuse() {
    let (_, h) = recorder();
    let queue = Arc::new(BackgroundQueue::new("misuse", QueueConfig::default(), h).unwrap());
    let sup = Supervisor::builder(queue).build();

    assert!(matches!(
        sup.stop().await,
        Err(QueueError::Lifecycle(LifecycleError::NotStarted { .. }))
    ));

    sup.start().await.unwrap();
    assert!(matches!(
        sup.start().await,
        Err(QueueError::Lifecycle(LifecycleError::AlreadyStarted { .. }))
    ));

    sup.stop().await.unwrap();
    assert!(matches!(
        sup.stop().await,
        Err(QueueError::Lifecycle(LifecycleError::AlreadyStopped { .. }))
    ));
}

#[tokio::test]
async fn fatal_handler_error_crashes_the_supervisor() {
    let h: HandlerRef<Envelope<u32>> =
        HandlerFn::arc(|_env: Envelope<u32>, _ctx: CancellationToken| async {
            Err::<(), _>(HandlerError::fatal("disk full"))
        });
    let queue = Arc::new(BackgroundQueue::new("crashy", QueueConfig::default(), h).unwrap());
    let sup = Supervisor::builder(queue.clone()).build();

    sup.start().await.unwrap();
    queue.enqueue(Envelope::new(1)).await.unwrap();
    sup.exited().await;

    assert_eq!(sup.state(), SupervisorState::Crashed);
    let report = sup.readiness();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.cause.as_deref().unwrap_or_default().contains("disk full"));
    assert!(sup.stop().await.is_ok());
}

#[tokio::test]
async fn crash_while_draining_fails_the_stop() {
    let h: HandlerRef<Envelope<u32>> =
        HandlerFn::arc(|_env: Envelope<u32>, _ctx: CancellationToken| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<(), _>(HandlerError::fatal("boom"))
        });
    let queue = Arc::new(BackgroundQueue::new("q", QueueConfig::default(), h).unwrap());
    let sup = Supervisor::builder(queue.clone()).build();

    sup.start().await.unwrap();
    queue.enqueue(Envelope::new(1)).await.unwrap();

    let err = sup.stop().await.unwrap_err();
    assert!(matches!(err, QueueError::HandlerFatal { .. }));
    assert_eq!(sup.state(), SupervisorState::Crashed);
    assert!(sup.crash().unwrap().contains("boom"));
    assert!(!sup.readiness().is_healthy());
}
