//! Async ingestion loop.
//!
//! Drives a [`ComfortEngine`] from a stream of sensor events while watching
//! for route replacements. Route changes are always handled before pending
//! sensor events, and the engine lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::context::ContextualStep;
use crate::engine::ComfortEngine;
use crate::map_matcher::LocationSample;
use crate::route::Route;

/// One event from the device sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorEvent {
    Location(LocationSample),
    Motion { timestamp_ms: i64, magnitude: f64 },
}

/// A route together with its prepared context.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub route: Route,
    pub steps: Vec<ContextualStep>,
}

/// What an ingestion run processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub location_events: u64,
    pub motion_events: u64,
    pub matched: u64,
    pub dropped: u64,
    pub route_changes: u64,
}

/// Feed sensor events into `engine` until the event channel closes.
///
/// `routes` carries the active plan; `None` clears the route. When the route
/// sender goes away the last plan stays active.
pub async fn run_ingestion(
    engine: &Mutex<ComfortEngine>,
    mut events: mpsc::Receiver<SensorEvent>,
    mut routes: watch::Receiver<Option<Arc<RoutePlan>>>,
) -> IngestSummary {
    let mut summary = IngestSummary::default();
    let mut routes_open = true;

    let initial = routes.borrow_and_update().clone();
    if let Some(plan) = initial {
        apply_plan(engine, Some(plan));
        summary.route_changes += 1;
    }

    loop {
        tokio::select! {
            biased;

            changed = routes.changed(), if routes_open => {
                if changed.is_err() {
                    debug!("[Ingest] Route sender closed, keeping current route");
                    routes_open = false;
                    continue;
                }
                let plan = routes.borrow_and_update().clone();
                apply_plan(engine, plan);
                summary.route_changes += 1;
            }

            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                handle_event(engine, event, &mut summary);
            }
        }
    }

    info!(
        "[Ingest] Finished: {} locations ({} matched, {} dropped), {} motion samples, {} route changes",
        summary.location_events,
        summary.matched,
        summary.dropped,
        summary.motion_events,
        summary.route_changes
    );
    summary
}

fn lock(engine: &Mutex<ComfortEngine>) -> MutexGuard<'_, ComfortEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn apply_plan(engine: &Mutex<ComfortEngine>, plan: Option<Arc<RoutePlan>>) {
    let mut engine = lock(engine);
    match plan {
        Some(plan) => engine.load_route(plan.route.clone(), plan.steps.clone()),
        None => engine.clear_route(),
    }
}

fn handle_event(engine: &Mutex<ComfortEngine>, event: SensorEvent, summary: &mut IngestSummary) {
    let mut engine = lock(engine);
    match event {
        SensorEvent::Motion {
            timestamp_ms,
            magnitude,
        } => {
            summary.motion_events += 1;
            engine.record_motion(timestamp_ms, magnitude);
        }
        SensorEvent::Location(sample) => {
            summary.location_events += 1;
            if engine.record_location(&sample).is_some() {
                summary.matched += 1;
            } else {
                summary.dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteStep;
    use crate::GpsPoint;

    fn plan(id: &str) -> Arc<RoutePlan> {
        let route = Route::new(
            id,
            vec![RouteStep::new(
                vec![GpsPoint::new(51.5, -0.120), GpsPoint::new(51.5, -0.119)],
                None,
            )],
        );
        Arc::new(RoutePlan {
            route,
            steps: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_ingests_until_channel_closes() {
        let engine = Mutex::new(ComfortEngine::new());
        let (tx, rx) = mpsc::channel(16);
        let (_route_tx, route_rx) = watch::channel(Some(plan("r1")));

        tx.send(SensorEvent::Motion {
            timestamp_ms: 0,
            magnitude: 0.5,
        })
        .await
        .unwrap();
        tx.send(SensorEvent::Location(LocationSample::new(
            1,
            GpsPoint::new(51.5, -0.1195),
        )))
        .await
        .unwrap();
        tx.send(SensorEvent::Location(LocationSample::new(
            2,
            GpsPoint::new(52.0, -0.1195),
        )))
        .await
        .unwrap();
        drop(tx);

        let summary = run_ingestion(&engine, rx, route_rx).await;
        assert_eq!(summary.motion_events, 1);
        assert_eq!(summary.location_events, 2);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.route_changes, 1);

        let engine = lock(&engine);
        assert_eq!(engine.route_id(), Some("r1"));
        assert_eq!(engine.stats().tracked_steps, 1);
    }

    #[tokio::test]
    async fn test_no_route_drops_locations() {
        let engine = Mutex::new(ComfortEngine::new());
        let (tx, rx) = mpsc::channel(4);
        let (route_tx, route_rx) = watch::channel(None);
        drop(route_tx);

        tx.send(SensorEvent::Motion {
            timestamp_ms: 0,
            magnitude: 0.5,
        })
        .await
        .unwrap();
        tx.send(SensorEvent::Location(LocationSample::new(
            1,
            GpsPoint::new(51.5, -0.1195),
        )))
        .await
        .unwrap();
        drop(tx);

        let summary = run_ingestion(&engine, rx, route_rx).await;
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.route_changes, 0);
    }
}
