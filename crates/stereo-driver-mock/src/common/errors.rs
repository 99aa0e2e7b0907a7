//! Error injection framework for mock devices.
//!
//! Scenarios target either a lifecycle operation (`init`, `attach_buffers`,
//! `begin_acquisition`, ...) or a specific capture iteration, counted from 0
//! in the order `next_event` is called.

use super::rng::MockRng;
use parking_lot::Mutex;
use std::sync::Arc;
use stereo_core::{ComponentKind, DeviceFault, FaultKind};

/// A scripted failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorScenario {
    /// The wait of this iteration times out.
    TimeoutAt { iteration: u64 },
    /// The wait of this iteration fails with a transport fault.
    TransportFaultAt { iteration: u64 },
    /// The event of this iteration carries an incomplete payload.
    IncompleteAt {
        iteration: u64,
        component: ComponentKind,
    },
    /// The event of this iteration lacks a component.
    MissingAt {
        iteration: u64,
        component: ComponentKind,
    },
    /// The compressed stream of this component is cut short at this iteration.
    CorruptAt {
        iteration: u64,
        component: ComponentKind,
    },
    /// A lifecycle operation fails every time it is called.
    FailOperation { operation: &'static str },
    /// Every operation fails after the first call that observes it.
    CommunicationLoss,
}

/// What the error framework decided for one capture iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedEventFault {
    /// The wait times out.
    Timeout,
    /// The wait fails on the transport.
    Transport,
    /// The component arrives incomplete.
    Incomplete(ComponentKind),
    /// The component is left out.
    Missing(ComponentKind),
    /// The component's compressed stream is cut short.
    Corrupt(ComponentKind),
}

#[derive(Default, Debug)]
struct ErrorState {
    communication_lost: bool,
}

/// Error injection configuration for mock devices
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    scenarios: Arc<Vec<ErrorScenario>>,
    /// Chaos-mode probability that an iteration times out
    timeout_rate: f64,
    /// Chaos-mode probability that an iteration is incomplete
    incomplete_rate: f64,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            timeout_rate: 0.0,
            incomplete_rate: 0.0,
            rng: Arc::new(MockRng::new(Some(0))),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Random timeouts and incomplete events with a reproducible seed
    pub fn chaos(timeout_rate: f64, incomplete_rate: f64, seed: Option<u64>) -> Self {
        Self {
            timeout_rate,
            incomplete_rate,
            rng: Arc::new(MockRng::new(seed)),
            ..Self::none()
        }
    }

    /// Fail `operation` if a scenario says so.
    pub fn check_operation(&self, operation: &'static str) -> Result<(), DeviceFault> {
        let mut state = self.state.lock();
        if state.communication_lost {
            return Err(DeviceFault::communication("communication lost"));
        }
        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailOperation { operation: op } if *op == operation => {
                    return Err(DeviceFault::new(
                        FaultKind::Hardware,
                        format!("injected failure in '{operation}'"),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DeviceFault::communication("communication lost"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Faults to apply to capture iteration `iteration`.
    pub fn event_faults(&self, iteration: u64) -> Vec<InjectedEventFault> {
        let mut faults: Vec<_> = self
            .scenarios
            .iter()
            .filter_map(|scenario| match *scenario {
                ErrorScenario::TimeoutAt { iteration: i } if i == iteration => {
                    Some(InjectedEventFault::Timeout)
                }
                ErrorScenario::TransportFaultAt { iteration: i } if i == iteration => {
                    Some(InjectedEventFault::Transport)
                }
                ErrorScenario::IncompleteAt {
                    iteration: i,
                    component,
                } if i == iteration => Some(InjectedEventFault::Incomplete(component)),
                ErrorScenario::MissingAt {
                    iteration: i,
                    component,
                } if i == iteration => Some(InjectedEventFault::Missing(component)),
                ErrorScenario::CorruptAt {
                    iteration: i,
                    component,
                } if i == iteration => Some(InjectedEventFault::Corrupt(component)),
                _ => None,
            })
            .collect();

        if self.rng.should_fail(self.timeout_rate) {
            faults.push(InjectedEventFault::Timeout);
        } else if self.rng.should_fail(self.incomplete_rate) {
            faults.push(InjectedEventFault::Incomplete(ComponentKind::DisparitySensor1));
        }
        faults
    }

    /// Clear communication-loss state.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
