//! Event stream
//!
//! The orchestrator emits into an unbounded sink so it never blocks on a slow
//! observer. A pump task forwards events into a bounded channel of frames,
//! interleaving keep-alive frames, and stops after the first terminal event.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::RunSummary;
use crate::reflection::Verdict;
use crate::scheduler::Phase;

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Connected {
        session_id: String,
    },
    OrchestratorGoal {
        session_id: String,
        goal: String,
        cities: Vec<String>,
        max_iterations: u32,
        quality_threshold: f64,
    },
    OrchestratorPlan {
        city_id: String,
        iteration: u32,
        phases: Vec<Phase>,
        /// Units that run this iteration
        units: Vec<String>,
    },
    AgentStarted {
        city_id: String,
        agent: String,
        phase: usize,
        iteration: u32,
    },
    AgentProgress {
        city_id: String,
        agent: String,
        progress: u8,
    },
    AgentComplete {
        city_id: String,
        agent: String,
        iteration: u32,
        confidence: f64,
        execution_time_ms: u64,
    },
    AgentError {
        city_id: String,
        agent: String,
        iteration: u32,
        error: String,
    },
    Reflection {
        city_id: String,
        iteration: u32,
        quality: f64,
        verdict: Verdict,
        strengths: Vec<String>,
        gaps: Vec<String>,
    },
    RefinementStarted {
        city_id: String,
        iteration: u32,
        units: Vec<String>,
        instructions: BTreeMap<String, String>,
    },
    CityComplete {
        city_id: String,
        quality: f64,
        iterations: u32,
    },
    AllComplete {
        summary: RunSummary,
    },
    Error {
        message: String,
    },
    Cancelled {
        session_id: String,
    },
    Done {
        session_id: String,
    },
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Done { .. } | EventKind::Error { .. } | EventKind::Cancelled { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected { .. } => "connected",
            EventKind::OrchestratorGoal { .. } => "orchestrator_goal",
            EventKind::OrchestratorPlan { .. } => "orchestrator_plan",
            EventKind::AgentStarted { .. } => "agent_started",
            EventKind::AgentProgress { .. } => "agent_progress",
            EventKind::AgentComplete { .. } => "agent_complete",
            EventKind::AgentError { .. } => "agent_error",
            EventKind::Reflection { .. } => "reflection",
            EventKind::RefinementStarted { .. } => "refinement_started",
            EventKind::CityComplete { .. } => "city_complete",
            EventKind::AllComplete { .. } => "all_complete",
            EventKind::Error { .. } => "error",
            EventKind::Cancelled { .. } => "cancelled",
            EventKind::Done { .. } => "done",
        }
    }
}

/// Cloneable emitter handed to the orchestrator and its unit jobs
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event; a dropped observer is not an error
    pub fn emit(&self, kind: EventKind) {
        if self.tx.send(Event::now(kind)).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeepAlive {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// What an observer receives
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Frame {
    Event(Event),
    KeepAlive(KeepAlive),
}

impl Frame {
    pub fn keep_alive() -> Self {
        Frame::KeepAlive(KeepAlive {
            kind: "keep_alive",
            timestamp: Utc::now(),
        })
    }

    pub fn event(&self) -> Option<&Event> {
        match self {
            Frame::Event(event) => Some(event),
            Frame::KeepAlive(_) => None,
        }
    }
}

/// Push channel returned by `IntelligenceService::start`
pub struct EventStream {
    rx: mpsc::Receiver<Frame>,
}

impl EventStream {
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

/// Start the pump that turns raw events into frames
pub fn event_stream(
    mut events: mpsc::UnboundedReceiver<Event>,
    keep_alive: Duration,
    buffer: usize,
) -> EventStream {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(keep_alive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe = events.recv() => {
                    let Some(event) = maybe else {
                        debug!("Event sink closed without terminal event");
                        break;
                    };
                    let terminal = event.is_terminal();
                    if tx.send(Frame::Event(event)).await.is_err() || terminal {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(Frame::keep_alive()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    EventStream { rx }
}
