//! Per-node cursor over its assigned actors.

use faultline_core::Actor;
use faultline_types::{ActorResult, ResultWithClock, VectorClock};

/// Progress of one node through its actor sequence.
///
/// The cursor survives crashes: a recovered incarnation resumes after the
/// actor that was in flight when its predecessor crashed, and that actor
/// keeps a `NoResult`.
///
/// Only the owning incarnation may advance the cursor or write results; calls
/// from an incarnation that has since crashed are ignored.
#[derive(Debug)]
pub(crate) struct TestNodeExecution {
    actors: Vec<Actor>,
    owner: u32,
    cursor: usize,
    results: Vec<Option<ResultWithClock>>,
    in_flight: Option<usize>,
    scenario_finished: bool,
}

impl TestNodeExecution {
    pub(crate) fn new(actors: Vec<Actor>) -> Self {
        let results = vec![None; actors.len()];
        Self {
            actors,
            owner: 0,
            cursor: 0,
            results,
            in_flight: None,
            scenario_finished: false,
        }
    }

    /// Take the next actor, moving the cursor past it.
    pub(crate) fn start_next(&mut self, incarnation: u32) -> Option<(usize, Actor)> {
        if incarnation != self.owner {
            return None;
        }
        let index = self.cursor;
        let actor = self.actors.get(index)?.clone();
        self.cursor += 1;
        self.in_flight = Some(index);
        Some((index, actor))
    }

    pub(crate) fn record(
        &mut self,
        incarnation: u32,
        index: usize,
        result: ActorResult,
        clock: VectorClock,
    ) {
        if incarnation != self.owner {
            return;
        }
        self.results[index] = Some(ResultWithClock::new(result, clock));
        if self.in_flight == Some(index) {
            self.in_flight = None;
        }
    }

    /// Mark a blocking actor as suspended until it returns.
    pub(crate) fn suspend(&mut self, incarnation: u32, index: usize, clock: VectorClock) {
        if incarnation != self.owner {
            return;
        }
        self.results[index] = Some(ResultWithClock::new(ActorResult::Suspended, clock));
    }

    /// `incarnation` crashed: the in-flight actor has no result, and the
    /// next incarnation takes over.
    pub(crate) fn crash(&mut self, incarnation: u32, clock: &VectorClock) {
        if incarnation != self.owner {
            return;
        }
        self.owner = incarnation + 1;
        if let Some(index) = self.in_flight.take() {
            self.results[index] = Some(ResultWithClock::new(ActorResult::NoResult, clock.clone()));
        }
    }

    /// The node will never come back: no remaining actor has a result.
    pub(crate) fn terminate(&mut self, clock: &VectorClock) {
        for result in &mut self.results[self.cursor..] {
            *result = Some(ResultWithClock::new(ActorResult::NoResult, clock.clone()));
        }
        self.cursor = self.actors.len();
    }

    /// Whether this is the first time the node finished its sequence.
    pub(crate) fn finish(&mut self, incarnation: u32) -> bool {
        if incarnation != self.owner {
            return false;
        }
        !std::mem::replace(&mut self.scenario_finished, true)
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    /// Results in actor order; actors that never got one report `NoResult`
    /// at `clock`.
    pub(crate) fn results(&self, clock: &VectorClock) -> Vec<ResultWithClock> {
        self.results
            .iter()
            .map(|result| {
                result
                    .clone()
                    .unwrap_or_else(|| ResultWithClock::new(ActorResult::NoResult, clock.clone()))
            })
            .collect()
    }
}
