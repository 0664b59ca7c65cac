//! Worker orchestrator.
//!
//! Owns the node state machine, the audio and video executors and the
//! contact routine. Pool events, registration results, status notifications
//! and fatal faults all flow through one inbox processed in order, so status
//! reports reach the master in the order the changes happened.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn, Instrument};

use encmesh_cluster::{
    ClusterError, ClusterServer, MasterLink, MessageHandler, Registration, StatusAck,
};
use encmesh_media::Platform;
use encmesh_models::{
    Cause, ClientTask, Codec, Node, NodeState, StatusReport, TaskKey, TaskKind,
};

use crate::config::{ConfigStore, WorkerConfig};
use crate::contact::Contact;
use crate::converter::{Converter, ConverterContext, FilePathManager};
use crate::error::{WorkerError, WorkerResult};
use crate::inflight::InFlightTask;
use crate::metrics;
use crate::pool::{Pool, PoolConfig, PoolEvent};
use crate::server::WorkerHandler;
use crate::state::NodeMachine;

/// Everything the worker inbox processes.
#[derive(Debug)]
pub enum WorkerEvent {
    Pool(PoolEvent<InFlightTask>),
    /// Send the current status report to the master
    Notify,
    /// Registration succeeded, with the id the master assigned if any
    Connected(Option<String>),
    /// Unrecoverable local fault
    Crash(Cause),
}

impl From<PoolEvent<InFlightTask>> for WorkerEvent {
    fn from(event: PoolEvent<InFlightTask>) -> Self {
        WorkerEvent::Pool(event)
    }
}

type TaskPool = Pool<InFlightTask, Converter, WorkerEvent>;

/// Encode worker node.
pub struct Worker {
    config: Mutex<WorkerConfig>,
    store: Arc<dyn ConfigStore>,
    machine: Arc<NodeMachine>,
    link: MasterLink,
    audio: TaskPool,
    video: TaskPool,
    events: mpsc::UnboundedSender<WorkerEvent>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
    accept_lock: tokio::sync::Mutex<()>,
    notify_lock: tokio::sync::Mutex<()>,
    contact: Contact,
    shutdown: watch::Sender<bool>,
}

impl Worker {
    /// Build a worker advertising `codecs`.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn ConfigStore>,
        codecs: Vec<Codec>,
    ) -> WorkerResult<Arc<Self>> {
        config.validate()?;

        let (events, inbox) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let node = Node::new(config.advertise_address, config.listen_port, config.name.clone())
            .with_codecs(codecs)
            .with_thread_count(config.thread_count)
            .with_unid(config.unid.clone());
        let machine = Arc::new(NodeMachine::new(node));

        let link = MasterLink::new(&config.master_host, config.master_port)
            .with_timeout(config.contact_timeout());

        let ctx = Arc::new(ConverterContext {
            ffmpeg_path: config.ffmpeg_path.clone(),
            paths: FilePathManager::new(&config.temp_root, &config.shared_root),
            platform: Platform::detect(),
            encode_timeout_secs: config.encode_timeout_secs,
            events: events.clone(),
        });
        let factory = move || Arc::new(Converter::new(Arc::clone(&ctx)));

        let audio = Pool::new(
            PoolConfig::new(config.thread_count, false),
            factory.clone(),
            events.clone(),
        );
        let video = Pool::new(PoolConfig::exclusive(), factory, events.clone());

        let contact = Contact::new(
            link.clone(),
            Arc::clone(&machine),
            events.clone(),
            shutdown.subscribe(),
            config.reconnect_base(),
            config.reconnect_max(),
        );

        Ok(Arc::new(Self {
            config: Mutex::new(config),
            store,
            machine,
            link,
            audio,
            video,
            events,
            inbox: Mutex::new(Some(inbox)),
            accept_lock: tokio::sync::Mutex::new(()),
            notify_lock: tokio::sync::Mutex::new(()),
            contact,
            shutdown,
        }))
    }

    pub fn machine(&self) -> &NodeMachine {
        &self.machine
    }

    pub fn status(&self) -> NodeState {
        self.machine.status()
    }

    pub fn node(&self) -> Node {
        self.machine.node()
    }

    pub fn config(&self) -> WorkerConfig {
        self.config.lock().clone()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Executor of a task kind: audio tasks share a pool of `thread_count`
    /// slots, video tasks get the exclusive slot.
    fn executor(&self, kind: TaskKind) -> &TaskPool {
        match kind {
            TaskKind::Audio => &self.audio,
            TaskKind::Video => &self.video,
        }
    }

    /// Serve master requests and process the inbox until shutdown.
    pub async fn run(self: Arc<Self>) -> WorkerResult<()> {
        let mut inbox = self
            .inbox
            .lock()
            .take()
            .ok_or_else(|| WorkerError::config_error("worker is already running"))?;

        let (bind_addr, timeout) = {
            let config = self.config.lock();
            (config.bind_addr(), config.contact_timeout())
        };
        let server = ClusterServer::bind(bind_addr).await?.with_timeout(timeout);
        self.machine.set_port(server.local_addr()?.port());

        let handler: Arc<dyn MessageHandler> = Arc::new(WorkerHandler::new(Arc::clone(&self)));
        let serving = tokio::spawn(server.serve(handler, self.shutdown.subscribe()));

        let node = self.machine.node();
        info!(
            node = %node.name,
            port = node.port,
            master = %self.link.addr(),
            threads = node.thread_count,
            codecs = node.codecs.len(),
            "Worker started"
        );
        self.contact.ensure_running();

        let span = self.machine.logger().create_span();
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let event = tokio::select! {
                event = inbox.recv() => event,
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => None,
            };
            match event {
                Some(event) => self.handle_event(event).instrument(span.clone()).await,
                None => break,
            }
        }

        match serving.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Listener failed"),
            Err(e) => warn!(error = %e, "Listener task panicked"),
        }
        info!(node = %self.machine.logger().node(), "Worker stopped");
        Ok(())
    }

    async fn handle_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Pool(PoolEvent::Started(task)) => {
                self.machine.logger().task_started(&task.key());
                let kind = task.kind();
                metrics::set_active_units(kind, self.executor(kind).active_count());
            }
            WorkerEvent::Pool(PoolEvent::Completed(task)) => self.task_finished(task, true).await,
            WorkerEvent::Pool(PoolEvent::Failed(task)) => self.task_finished(task, false).await,
            WorkerEvent::Notify => self.notify_status().await,
            WorkerEvent::Connected(unid) => self.connected(unid).await,
            WorkerEvent::Crash(cause) => self.crash(cause).await,
        }
    }

    async fn task_finished(&self, task: InFlightTask, success: bool) {
        let key = task.key();
        let kind = task.kind();
        if success {
            self.machine.logger().task_completed(&key);
        } else {
            self.machine.logger().task_failed(&key);
        }
        metrics::record_task_finished(kind, success);
        metrics::set_active_units(kind, self.executor(kind).active_count());

        if self.machine.retire(&key).is_some() {
            self.notify_status().await;
        }
    }

    /// Offer a task to this node. Returns whether it was accepted.
    pub async fn task_request(&self, ctask: ClientTask) -> bool {
        let _guard = self.accept_lock.lock().await;
        let key = ctask.key();
        let kind = ctask.kind();
        let status = self.machine.status();

        if let Err(e) = ctask.validate() {
            warn!(task = %key, error = %e, "Refusing malformed task");
            return self.refuse(&key, kind, status);
        }
        let refusal = if !status.accepts_tasks() {
            Some("node does not accept tasks")
        } else if kind == TaskKind::Video && status != NodeState::Free {
            Some("video tasks need an idle node")
        } else if self.machine.contains(&key) {
            Some("task already running")
        } else if !self.supports(ctask.stream.codec()) {
            Some("codec not available")
        } else {
            None
        };
        if let Some(reason) = refusal {
            debug!(task = %key, reason, "Refusing task");
            return self.refuse(&key, kind, status);
        }

        let task = InFlightTask::new(ctask);
        if let Err(e) = self.machine.admit(task.clone()) {
            debug!(task = %key, error = %e, "Refusing task");
            return self.refuse(&key, kind, status);
        }
        // Queued ahead of the pool's events so the master sees the task start.
        let _ = self.events.send(WorkerEvent::Notify);

        if !self.executor(kind).handle(task) {
            self.machine.retire(&key);
            return self.refuse(&key, kind, status);
        }

        self.machine.logger().task_accepted(&key, kind);
        metrics::record_task_accepted(kind);
        true
    }

    fn supports(&self, codec: Codec) -> bool {
        let node = self.machine.node();
        node.codecs.is_empty() || node.codecs.contains(&codec)
    }

    fn refuse(&self, key: &TaskKey, kind: TaskKind, status: NodeState) -> bool {
        self.machine.logger().task_refused(key, kind, status);
        metrics::record_task_refused(kind);
        false
    }

    /// Cancel a task. Returns whether the task was known.
    pub async fn delete_task(&self, key: &TaskKey) -> bool {
        match self.machine.find(key) {
            Some(task) => self.executor(task.kind()).cancel(&task).await,
            None => false,
        }
    }

    pub fn status_request(&self) -> StatusReport {
        self.machine.report()
    }

    /// Administrative pause: tasks are refused until [`Worker::resume`].
    pub fn pause(&self) -> WorkerResult<()> {
        self.machine.pause()?;
        let _ = self.events.send(WorkerEvent::Notify);
        Ok(())
    }

    pub fn resume(&self) -> WorkerResult<()> {
        self.machine.resume()?;
        let _ = self.events.send(WorkerEvent::Notify);
        Ok(())
    }

    /// Send the current status report to the master.
    ///
    /// Nothing is sent while NOT_CONNECTED or CRASHED; entering CRASHED
    /// reports through [`Worker::crash`]. A stale identity is
    /// replaced through a new registration and the report is sent once more.
    /// Any other failure takes the link down.
    async fn notify_status(&self) {
        let _guard = self.notify_lock.lock().await;
        if matches!(self.machine.status(), NodeState::NotConnected | NodeState::Crashed) {
            return;
        }

        let outcome = match self.link.send_status(&self.machine.report()).await {
            Ok(StatusAck::Delivered) => Ok(()),
            Ok(StatusAck::Stale) => self.reregister_and_resend().await,
            Err(e) => Err(WorkerError::from(e)),
        };

        match outcome {
            Ok(()) => debug!(status = %self.machine.status(), "Status delivered"),
            Err(e) => {
                metrics::record_notification_failure();
                self.machine
                    .logger()
                    .log_warning(&format!("Status notification failed: {}", e));
                self.link_down().await;
            }
        }
    }

    async fn reregister_and_resend(&self) -> WorkerResult<()> {
        info!(unid = %self.machine.unid(), "Master discarded our id, registering again");
        self.machine.set_unid("");
        if let Registration::Assigned(unid) = self.link.register(&self.machine.node()).await? {
            self.adopt_unid(unid);
        }
        match self.link.send_status(&self.machine.report()).await? {
            StatusAck::Delivered => Ok(()),
            StatusAck::Stale => Err(ClusterError::unexpected("BYE", "NEW_UNID").into()),
        }
    }

    fn adopt_unid(&self, unid: String) {
        self.machine.set_unid(unid.clone());
        let snapshot = {
            let mut config = self.config.lock();
            config.unid = unid;
            config.clone()
        };
        if let Err(e) = self.store.dump(&snapshot) {
            warn!(error = %e, "Failed to persist node id");
        }
    }

    async fn connected(&self, unid: Option<String>) {
        self.contact.settle();
        if let Some(unid) = unid {
            self.adopt_unid(unid);
        }
        match self
            .machine
            .compare_and_transition(NodeState::NotConnected, NodeState::Free)
        {
            Ok(true) => self.notify_status().await,
            Ok(false) => debug!(status = %self.machine.status(), "Registration no longer needed"),
            Err(e) => warn!(error = %e, "Cannot leave NOT_CONNECTED"),
        }
    }

    /// Mark the master link as lost, cancel every in-flight task and start
    /// reconnecting.
    async fn link_down(&self) {
        if let Err(e) = self.machine.transition(NodeState::NotConnected) {
            debug!(error = %e, "Link loss ignored");
            return;
        }
        let tasks = self.machine.tasks();
        join_all(tasks.iter().map(|task| self.executor(task.kind()).cancel(task))).await;
        if !self.is_shutdown() {
            self.contact.ensure_running();
        }
    }

    /// Enter CRASHED, stop all work and tell the master. The STATUS report
    /// is skipped when there was no link to begin with; its failure never
    /// leaves CRASHED.
    async fn crash(&self, cause: Cause) {
        let prev = match self.machine.transition(NodeState::Crashed) {
            Ok(prev) => prev,
            Err(_) => return,
        };
        self.machine
            .logger()
            .log_error(&format!("Fatal local fault: {}", cause));
        futures::join!(self.audio.stop(), self.video.stop());

        if prev != NodeState::NotConnected {
            let _guard = self.notify_lock.lock().await;
            match self.link.send_status(&self.machine.report()).await {
                Ok(_) => debug!("Crash status delivered"),
                Err(e) => {
                    metrics::record_notification_failure();
                    warn!(error = %e, "Crash status not delivered");
                }
            }
        }
        self.link.send_crash(&self.machine.unid(), cause).await;
    }

    /// Stop accepting work, cancel running tasks, tell the master and save
    /// the configuration. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        info!(node = %self.machine.logger().node(), "Shutting down");

        futures::join!(self.audio.stop(), self.video.stop());

        let node = self.machine.node();
        if !matches!(node.status, NodeState::NotConnected | NodeState::Crashed) {
            if let Err(e) = self.link.disconnect(&node).await {
                warn!(error = %e, "Disconnect notice not delivered");
            }
            let _ = self.machine.transition(NodeState::NotConnected);
        }

        let snapshot = self.config.lock().clone();
        if let Err(e) = self.store.dump(&snapshot) {
            warn!(error = %e, "Failed to save configuration");
        }
    }
}
