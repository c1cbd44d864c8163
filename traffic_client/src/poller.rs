//! Remote state poller.
//!
//! Sequence:
//! 1. POST the configuration form once. On failure, report and stop.
//! 2. Fetch all five collections concurrently.
//! 3. Every period: ask the authority to step, then fetch cars (and traffic
//!    lights when signals are refreshed). The next period starts counting
//!    when that cycle's car fetch completes, whatever its outcome.
//!
//! Requests run as tasks in a `JoinSet`; every completion is forwarded as a
//! `PollEvent` on one channel, whose receiver is the only writer of client
//! state.

use std::{future, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};
use traffic_shared::{
    config::{ClientConfig, EndpointPaths},
    net::{fetch, EndpointKind, EntitySnapshot, PollError, Transport},
};

/// What the poller reports to the frame loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// The configuration form was accepted; fetching begins.
    Started,
    /// The configuration form failed; nothing will ever be fetched.
    ConfigFailed(PollError),
    /// A new poll cycle began.
    CycleStarted { cycle: u64 },
    /// The step request of a cycle failed; the cycle fetched nothing.
    StepFailed { cycle: u64, error: PollError },
    /// A fetch completed.
    Batch {
        cycle: u64,
        kind: EndpointKind,
        result: Result<Vec<EntitySnapshot>, PollError>,
    },
}

/// Poller parameters.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub period: Duration,
    pub paths: EndpointPaths,
    pub init_form: Vec<(String, String)>,
    pub refresh_signals: bool,
}

impl TryFrom<&ClientConfig> for PollerSettings {
    type Error = anyhow::Error;

    fn try_from(cfg: &ClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            period: cfg.poll_period()?,
            paths: cfg.endpoints.clone(),
            init_form: cfg.init_form.clone(),
            refresh_signals: cfg.refresh_signals,
        })
    }
}

enum Completed {
    Step(Result<(), PollError>),
    Fetch(EndpointKind, Result<Vec<EntitySnapshot>, PollError>),
}

/// Polls the authority and forwards results.
pub struct Poller {
    transport: Arc<dyn Transport>,
    settings: PollerSettings,
    tx: mpsc::Sender<PollEvent>,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: PollerSettings,
        tx: mpsc::Sender<PollEvent>,
    ) -> Self {
        Self {
            transport,
            settings,
            tx,
        }
    }

    /// Runs the poller on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the configuration fails or the receiver goes away.
    pub async fn run(self) {
        let paths = &self.settings.paths;
        if let Err(error) = self
            .transport
            .post_form(&paths.init, &self.settings.init_form)
            .await
        {
            warn!(error = %error, "Configuration rejected; polling disabled");
            let _ = self.tx.send(PollEvent::ConfigFailed(error)).await;
            return;
        }
        info!(period = ?self.settings.period, "Configuration accepted; polling");
        if self.tx.send(PollEvent::Started).await.is_err() {
            return;
        }

        let mut tasks: JoinSet<(u64, Completed)> = JoinSet::new();
        let mut cycle = 0u64;
        for kind in EndpointKind::ALL {
            self.queue_fetch(&mut tasks, cycle, kind);
        }

        let mut next_tick: Option<Instant> = None;
        loop {
            let deadline = next_tick;
            let tick = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => future::pending::<()>().await,
                }
            };

            let event = tokio::select! {
                _ = tick => {
                    next_tick = None;
                    cycle += 1;
                    self.queue_step(&mut tasks, cycle);
                    PollEvent::CycleStarted { cycle }
                }
                Some(joined) = tasks.join_next() => {
                    let (done_cycle, completed) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            warn!(error = %e, "Poll task failed");
                            continue;
                        }
                    };
                    match completed {
                        Completed::Step(Ok(())) => {
                            self.queue_fetch(&mut tasks, done_cycle, EndpointKind::Cars);
                            if self.settings.refresh_signals {
                                self.queue_fetch(&mut tasks, done_cycle, EndpointKind::TrafficLights);
                            }
                            continue;
                        }
                        Completed::Step(Err(error)) => {
                            warn!(cycle = done_cycle, error = %error, "Step request failed");
                            next_tick = Some(Instant::now() + self.settings.period);
                            PollEvent::StepFailed { cycle: done_cycle, error }
                        }
                        Completed::Fetch(kind, result) => {
                            if kind == EndpointKind::Cars && done_cycle == cycle {
                                next_tick = Some(Instant::now() + self.settings.period);
                            }
                            if let Err(error) = &result {
                                warn!(cycle = done_cycle, ?kind, error = %error, "Fetch failed");
                            }
                            PollEvent::Batch { cycle: done_cycle, kind, result }
                        }
                    }
                }
                else => break,
            };

            if self.tx.send(event).await.is_err() {
                debug!("Event receiver dropped; poller stopping");
                break;
            }
        }
    }

    fn queue_step(&self, tasks: &mut JoinSet<(u64, Completed)>, cycle: u64) {
        let transport = Arc::clone(&self.transport);
        let path = self.settings.paths.update.clone();
        tasks.spawn(async move {
            let result = transport.get(&path).await.map(|body| {
                debug!(cycle, bytes = body.len(), "Authority stepped");
            });
            (cycle, Completed::Step(result))
        });
    }

    fn queue_fetch(&self, tasks: &mut JoinSet<(u64, Completed)>, cycle: u64, kind: EndpointKind) {
        let transport = Arc::clone(&self.transport);
        let paths = self.settings.paths.clone();
        tasks.spawn(async move {
            let result = fetch(transport.as_ref(), &paths, kind).await;
            (cycle, Completed::Fetch(kind, result))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use tokio::time::timeout;

    /// In-memory authority: records requests, answers from a fixed table.
    #[derive(Default)]
    struct ScriptedTransport {
        reject_init: bool,
        fail_cars: bool,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post_form(&self, path: &str, _fields: &[(String, String)]) -> Result<(), PollError> {
            self.log.lock().unwrap().push(format!("POST {path}"));
            if self.reject_init {
                Err(PollError::Unreachable("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn get(&self, path: &str) -> Result<Bytes, PollError> {
            self.log.lock().unwrap().push(format!("GET {path}"));
            match path {
                "/update" => Ok(Bytes::from_static(b"{}")),
                "/getCars" if self.fail_cars => Ok(Bytes::from_static(b"<html>")),
                "/getCars" => Ok(Bytes::from_static(
                    br#"{"positions":[{"id":"car1","x":0,"y":1,"z":0,"destX":3,"destZ":3}]}"#,
                )),
                _ => Ok(Bytes::from_static(br#"{"positions":[]}"#)),
            }
        }
    }

    fn settings(period_ms: u64) -> PollerSettings {
        PollerSettings {
            period: Duration::from_millis(period_ms),
            paths: EndpointPaths::default(),
            init_form: vec![("width".into(), "24".into())],
            refresh_signals: true,
        }
    }

    #[test]
    fn settings_reject_unrepresentable_periods() {
        for period in [f32::INFINITY, f32::NAN, -1.0, 0.0, f32::MAX] {
            let cfg = ClientConfig {
                poll_period_secs: period,
                ..ClientConfig::default()
            };
            assert!(PollerSettings::try_from(&cfg).is_err(), "{period} accepted");
        }
        let cfg = ClientConfig {
            poll_period_secs: 0.25,
            ..ClientConfig::default()
        };
        let settings = PollerSettings::try_from(&cfg).unwrap();
        assert_eq!(settings.period, Duration::from_millis(250));
        assert_eq!(settings.paths.update, "/update");
    }

    async fn next(rx: &mut mpsc::Receiver<PollEvent>) -> Option<PollEvent> {
        timeout(Duration::from_secs(5), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn failed_config_never_fetches() {
        let transport = Arc::new(ScriptedTransport {
            reject_init: true,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::channel(16);
        let handle = Poller::new(transport.clone(), settings(10), tx).spawn();

        assert!(matches!(next(&mut rx).await, Some(PollEvent::ConfigFailed(PollError::Unreachable(_)))));
        assert_eq!(next(&mut rx).await, None, "poller should have stopped");
        handle.await.unwrap();
        assert_eq!(*transport.log.lock().unwrap(), vec!["POST /init".to_string()]);
    }

    #[tokio::test]
    async fn initial_fetch_covers_every_kind() {
        let transport = Arc::new(ScriptedTransport::default());
        let (tx, mut rx) = mpsc::channel(16);
        let handle = Poller::new(transport, settings(60_000), tx).spawn();

        assert_eq!(next(&mut rx).await, Some(PollEvent::Started));
        let mut kinds = Vec::new();
        for _ in 0..EndpointKind::ALL.len() {
            match next(&mut rx).await {
                Some(PollEvent::Batch { cycle: 0, kind, result }) => {
                    assert!(result.is_ok());
                    kinds.push(kind);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        for kind in EndpointKind::ALL {
            assert!(kinds.contains(&kind), "missing {kind:?}");
        }
        handle.abort();
    }

    #[tokio::test]
    async fn cycles_step_then_fetch_cars() {
        let transport = Arc::new(ScriptedTransport::default());
        let (tx, mut rx) = mpsc::channel(64);
        let handle = Poller::new(transport.clone(), settings(20), tx).spawn();

        let mut saw_cycle = false;
        let mut cycle_cars = None;
        while cycle_cars.is_none() {
            match next(&mut rx).await.expect("poller stalled") {
                PollEvent::CycleStarted { cycle } => {
                    assert_eq!(cycle, 1);
                    saw_cycle = true;
                }
                PollEvent::Batch { cycle: 1, kind: EndpointKind::Cars, result } => {
                    cycle_cars = Some(result);
                }
                _ => {}
            }
        }
        handle.abort();

        assert!(saw_cycle);
        assert_eq!(cycle_cars.unwrap().unwrap()[0].id, "car1");
        let log = transport.log.lock().unwrap();
        let step = log.iter().position(|l| l == "GET /update").unwrap();
        let cars_after = log.iter().skip(step).any(|l| l == "GET /getCars");
        assert!(cars_after, "cars must be fetched after the step: {log:?}");
    }

    #[tokio::test]
    async fn malformed_cars_keep_the_schedule() {
        let transport = Arc::new(ScriptedTransport {
            fail_cars: true,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::channel(64);
        let handle = Poller::new(transport, settings(10), tx).spawn();

        let mut cycles = 0;
        let mut malformed = 0;
        while cycles < 2 {
            match next(&mut rx).await.expect("poller stalled") {
                PollEvent::CycleStarted { .. } => cycles += 1,
                PollEvent::Batch {
                    kind: EndpointKind::Cars,
                    result: Err(PollError::Malformed(_)),
                    ..
                } => malformed += 1,
                _ => {}
            }
        }
        handle.abort();
        assert!(malformed >= 2);
    }
}
