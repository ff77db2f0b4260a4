//! Read-only market description shared by every simulation of one replicate.

use crate::ccp::ProbabilityTable;
use crate::config::DiscretizationConfig;
use crate::panel::{Fleet, LocationSet};
use crate::payoff::PayoffEvaluator;
use crate::policy::PolicySampler;
use crate::state::{StateBuilder, StateLayout};
use crate::transition::StateTransition;

/// Fleet, locations, state layout and estimated CCPs.
#[derive(Debug, Clone)]
pub struct MarketModel {
    pub fleet: Fleet,
    pub locations: LocationSet,
    pub layout: StateLayout,
    pub probabilities: ProbabilityTable,
    pub discretization: DiscretizationConfig,
}

impl MarketModel {
    #[must_use]
    pub fn builder(&self) -> StateBuilder<'_> {
        StateBuilder::new(
            &self.layout,
            &self.fleet,
            &self.locations,
            &self.discretization,
        )
    }

    #[must_use]
    pub fn sampler(&self) -> PolicySampler<'_> {
        PolicySampler::new(&self.probabilities, self.fleet.len(), self.locations.len())
    }

    #[must_use]
    pub fn payoffs(&self) -> PayoffEvaluator<'_> {
        PayoffEvaluator::new(
            &self.layout,
            &self.fleet,
            &self.locations,
            &self.discretization,
        )
    }

    #[must_use]
    pub fn transition(&self) -> StateTransition<'_> {
        StateTransition::new(self.builder())
    }
}
