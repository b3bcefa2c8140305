use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use stockbundle_core::TenantId;
use stockbundle_events::{EventBus, EventEnvelope, Subscription};

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Feeds published envelopes into a projection on its own thread.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Subscribe to `bus` now and apply every envelope with `handler`.
    ///
    /// With `tenant_id`, envelopes of other tenants are skipped. The handler
    /// must tolerate redelivery; its errors are logged, not retried.
    pub fn spawn<B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>> + ?Sized,
        H: FnMut(&EventEnvelope<JsonValue>) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, tenant_id, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<H, E>(
    name: &'static str,
    sub: Subscription<EventEnvelope<JsonValue>>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    H: FnMut(&EventEnvelope<JsonValue>) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(100);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(env) => {
                if tenant_id.is_some_and(|t| env.tenant_id() != t) {
                    continue;
                }
                if let Err(err) = handler(&env) {
                    warn!(worker = name, event_type = env.event_type(), error = ?err, "projection worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "projection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use stockbundle_core::AggregateId;
    use stockbundle_events::InMemoryEventBus;
    use uuid::Uuid;

    fn envelope(tenant_id: TenantId) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            AggregateId::new(),
            "stock.bundle",
            1,
            "stock.bundle.cancelled",
            Utc::now(),
            serde_json::json!({}),
        )
    }

    #[test]
    fn worker_applies_only_its_tenant() {
        let bus = InMemoryEventBus::<EventEnvelope<JsonValue>>::new();
        let mine = TenantId::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let handle = ProjectionWorker::spawn("test-worker", &bus, Some(mine), move |env| {
            seen_clone.lock().unwrap().push(env.tenant_id());
            Ok::<(), ()>(())
        })
        .unwrap();

        bus.publish(envelope(TenantId::new())).unwrap();
        bus.publish(envelope(mine)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![mine]);
    }
}
