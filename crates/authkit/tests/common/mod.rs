//! Shared setup for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use authkit::testing::FakeBackend;
use authkit::transport::LocalTransport;
use authkit::{ActionReply, HelperContext, HelperDispatcher, Registry, Responder, VariantMap};
use authkit_protocol::HelperEvent;
use tokio::sync::mpsc::UnboundedReceiver;

pub const HELPER: &str = "org.example";

/// Arguments seen by the `read` handler, in call order.
#[derive(Debug, Default)]
pub struct Recorder {
    calls: AtomicUsize,
    args: Mutex<Vec<VariantMap>>,
}

impl Recorder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn args(&self) -> Vec<VariantMap> {
        self.args.lock().unwrap().clone()
    }
}

/// Responder for [`HELPER`]:
///
/// - `read` records its arguments and answers with `content`
/// - `echo` returns its arguments
/// - `slow` reports progress until it is stopped
pub fn responder(recorder: Arc<Recorder>) -> Responder {
    Responder::new(HELPER)
        .on("read", move |_ctx: &HelperContext, args: VariantMap| {
            recorder.calls.fetch_add(1, Ordering::SeqCst);
            recorder.args.lock().unwrap().push(args);
            ActionReply::success()
                .with_data("content", "hello")
                .with_data("size", 5)
        })
        .on("echo", |_ctx: &HelperContext, args: VariantMap| {
            ActionReply::success_with(args)
        })
        .on("slow", |ctx: &HelperContext, _args: VariantMap| {
            let mut step = 0;
            while !ctx.is_stopped() {
                ctx.progress_step(step);
                step = (step + 1) % 100;
                std::thread::sleep(Duration::from_millis(5));
            }
            ActionReply::helper_error(1).with_description("stopped")
        })
}

pub fn dispatcher(backend: FakeBackend, recorder: Arc<Recorder>) -> HelperDispatcher {
    let dispatcher = HelperDispatcher::new(HELPER, Arc::new(backend)).unwrap();
    dispatcher.set_responder(responder(recorder)).unwrap();
    dispatcher
}

/// In-process client and helper.
pub struct Setup {
    pub client: Arc<FakeBackend>,
    pub registry: Arc<Registry>,
    pub dispatcher: HelperDispatcher,
    pub recorder: Arc<Recorder>,
}

impl Setup {
    pub fn new(client: FakeBackend, helper: FakeBackend) -> Self {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(helper, recorder.clone());
        let transport = LocalTransport::new().with_helper(dispatcher.clone());
        let client = Arc::new(client);
        let registry = Registry::new(client.clone(), Arc::new(transport)).into_shared();
        Self {
            client,
            registry,
            dispatcher,
            recorder,
        }
    }

    /// Client and helper both defer to the helper.
    pub fn helper_side() -> Self {
        Self::new(FakeBackend::helper_side(), FakeBackend::helper_side())
    }

    pub fn subscribe(&self, action: &str) -> UnboundedReceiver<HelperEvent> {
        self.registry.transport().subscribe(action)
    }

    pub async fn wait_until_running(&self, action: &str) {
        wait_until_running(&self.dispatcher, action).await;
    }
}

pub async fn wait_until_running(dispatcher: &HelperDispatcher, action: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.current_action().as_deref() != Some(action) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("action never started");
}

/// Next `Performed` reply on `events`, skipping other events.
pub async fn next_performed(events: &mut UnboundedReceiver<HelperEvent>) -> ActionReply {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(HelperEvent::Performed(reply)) => return reply,
                Some(_) => {}
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("no Performed event")
}
