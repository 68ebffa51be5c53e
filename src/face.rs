//! HTTP face of the pilot: the activation boundary, an SSE event stream and
//! a tiny status page.

use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::config::Profile;
use crate::hands::Injector;
use crate::payload::PayloadResolver;
use crate::sequencer::Sequencer;
use crate::session::SessionRegistry;
use crate::types::{
    ActivationRequest, ActivationResponse, Phase, PhaseOutcome, RunReport, TargetId,
};

/// Events streamed to subscribers via SSE.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    RunStarted {
        target: TargetId,
    },
    Phase {
        target: TargetId,
        phase: Phase,
        #[serde(flatten)]
        outcome: PhaseOutcome,
    },
    RunFinished {
        target: TargetId,
        aborted: bool,
    },
    CopyComplete {
        target: TargetId,
    },
}

impl HostEvent {
    fn name(&self) -> &'static str {
        match self {
            HostEvent::RunStarted { .. } => "run_started",
            HostEvent::Phase { .. } => "phase",
            HostEvent::RunFinished { .. } => "run_finished",
            HostEvent::CopyComplete { .. } => "copy_complete",
        }
    }

    fn to_sse_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(self.name()).data(data)
    }
}

pub struct HostState {
    pub profile: Arc<Profile>,
    pub injector: Arc<dyn Injector>,
    pub payloads: PayloadResolver,
    pub event_tx: broadcast::Sender<HostEvent>,
    pub sessions: Mutex<SessionRegistry>,
}

impl HostState {
    pub fn new(
        profile: Arc<Profile>,
        injector: Arc<dyn Injector>,
        payloads: PayloadResolver,
    ) -> Self {
        let (event_tx, _) = broadcast::channel::<HostEvent>(64);
        Self {
            profile,
            injector,
            payloads,
            event_tx,
            sessions: Mutex::new(SessionRegistry::default()),
        }
    }
}

/// Attach to the tab and start a run in the background. The response only
/// reflects the attach.
pub async fn activate(state: &HostState, request: ActivationRequest) -> ActivationResponse {
    info!(
        target_id = %request.target,
        two_panel = request.secondary.is_some(),
        "Activation received"
    );
    let page = match state.injector.inject(&request.target).await {
        Ok(page) => page,
        Err(e) => {
            warn!(target_id = %request.target, error = %e, "Could not attach to tab");
            return ActivationResponse::failed(format!("{e:#}"));
        }
    };

    // Watchers only make sense on the editor itself.
    match page.host().await {
        Ok(host) if state.profile.host_matches(&host) => {
            let started = state
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .ensure(
                    &request.target,
                    page.clone(),
                    state.profile.clone(),
                    &state.event_tx,
                );
            if started {
                info!(target_id = %request.target, "Copy watcher attached");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(target_id = %request.target, error = %e, "Could not read page host"),
    }

    let sequencer = Sequencer::new(page, state.profile.clone(), state.payloads.clone());
    let events = state.event_tx.clone();
    tokio::spawn(async move {
        let target = request.target.clone();
        let _ = events.send(HostEvent::RunStarted {
            target: target.clone(),
        });

        let run = sequencer.run(request).await;
        let mut report = run.report.clone();
        publish(&events, &target, &run.report);

        if let Some(layout) = run.layout {
            match layout.await {
                Ok(rest) => {
                    publish(&events, &target, &rest);
                    report.extend(rest);
                }
                Err(e) => warn!(target_id = %target, error = %e, "Layout task did not finish"),
            }
        }

        info!(target_id = %target, phases = report.phases.len(), aborted = report.aborted(), "Run finished");
        let _ = events.send(HostEvent::RunFinished {
            target,
            aborted: report.aborted(),
        });
    });

    ActivationResponse::ok()
}

fn publish(events: &broadcast::Sender<HostEvent>, target: &TargetId, report: &RunReport) {
    for record in &report.phases {
        let _ = events.send(HostEvent::Phase {
            target: target.clone(),
            phase: record.phase,
            outcome: record.outcome.clone(),
        });
    }
}

pub fn router(state: Arc<HostState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/activate", post(activate_handler))
        .route("/events", get(sse_handler))
        .route("/health", get(|| async { "ok" }))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state)
}

/// Serve on `listen`, or on one of the next nine ports if it is taken.
pub async fn serve(state: Arc<HostState>, listen: SocketAddr) -> Result<()> {
    let mut listener = None;
    for offset in 0..10u16 {
        let addr = SocketAddr::new(listen.ip(), listen.port().saturating_add(offset));
        match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => {
                listener = Some(l);
                break;
            }
            Err(e) => warn!(%addr, error = %e, "Port unavailable"),
        }
    }
    let listener = listener.ok_or_else(|| {
        anyhow!(
            "Could not bind to any port {}-{}",
            listen.port(),
            listen.port().saturating_add(9)
        )
    })?;

    info!("Pilot listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn activate_handler(
    State(state): State<Arc<HostState>>,
    Json(request): Json<ActivationRequest>,
) -> Json<ActivationResponse> {
    Json(activate(&state, request).await)
}

async fn sse_handler(
    State(state): State<Arc<HostState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<HostEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Mockup Pilot</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    padding: 24px 32px;
  }
  h1 { font-size: 20px; font-weight: 600; color: #fff; margin-bottom: 16px; }
  #log { font-family: ui-monospace, monospace; font-size: 13px; line-height: 1.6; }
  .run_started, .run_finished { color: #6495ed; }
  .copy_complete { color: #50c878; }
  .degraded { color: #e0b040; }
  .aborted { color: #e05050; }
</style>
</head>
<body>
<h1>Mockup Pilot</h1>
<div id="log"></div>
<script>
  const log = document.getElementById('log');
  const source = new EventSource('/events');
  for (const name of ['run_started', 'phase', 'run_finished', 'copy_complete']) {
    source.addEventListener(name, (e) => {
      const data = JSON.parse(e.data);
      const line = document.createElement('div');
      line.className = data.outcome || name;
      const detail = data.phase ? `${data.phase}: ${data.outcome}${data.detail ? ' (' + data.detail + ')' : ''}` : name;
      line.textContent = `${new Date().toLocaleTimeString()}  [${data.target}]  ${detail}`;
      log.prepend(line);
    });
  }
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::TargetPage;
    use crate::testing::{FakeNode, FakePage};
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubInjector {
        page: Option<Arc<FakePage>>,
    }

    #[async_trait]
    impl Injector for StubInjector {
        async fn inject(&self, target: &TargetId) -> Result<Arc<dyn TargetPage>> {
            match &self.page {
                Some(page) => Ok(page.clone()),
                None => Err(anyhow!("No tab with target id {target}")),
            }
        }
    }

    fn state(page: Option<Arc<FakePage>>) -> HostState {
        HostState::new(
            Arc::new(Profile::default()),
            Arc::new(StubInjector { page }),
            PayloadResolver::default(),
        )
    }

    fn request(primary: &str) -> ActivationRequest {
        ActivationRequest {
            target: "T1".into(),
            primary: primary.into(),
            secondary: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attach_failure_is_reported_to_caller() {
        let state = state(None);
        let response = activate(&state, request("data:image/png;base64,AA==")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("T1"));
        assert!(state.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_does_not_depend_on_the_run() {
        let page = Arc::new(FakePage::new("app.mockup.studio"));
        let state = state(Some(page.clone()));
        let mut rx = state.event_tx.subscribe();

        // A payload that cannot be decoded still gets a success reply.
        let response = activate(&state, request("data:image/png;base64,@@")).await;
        assert_eq!(response, ActivationResponse::ok());
        assert_eq!(state.sessions.lock().unwrap().len(), 1);

        let mut aborted = None;
        while aborted.is_none() {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(HostEvent::RunFinished { aborted: a, .. })) => aborted = Some(a),
                Ok(Ok(_)) => {}
                other => panic!("event stream ended early: {other:?}"),
            }
        }
        assert_eq!(aborted, Some(true));
        assert!(page.uploads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_host_gets_no_watchers() {
        let page = Arc::new(FakePage::new("example.com"));
        page.set(
            &Profile::default().selectors.copy_button,
            vec![FakeNode::text("Copy")],
        );
        let state = state(Some(page.clone()));

        let response = activate(&state, request("data:image/png;base64,AA==")).await;
        assert!(response.success);
        assert!(state.sessions.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(page.actions().is_empty());
    }

    #[test]
    fn phase_events_serialize_flat() {
        let event = HostEvent::Phase {
            target: "T1".into(),
            phase: Phase::TwoPanelSetup,
            outcome: PhaseOutcome::Degraded("no empty drop slot".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "phase");
        assert_eq!(json["phase"], "two_panel_setup");
        assert_eq!(json["outcome"], "degraded");
        assert_eq!(json["detail"], "no empty drop slot");
        assert_eq!(event.name(), "phase");
    }
}
