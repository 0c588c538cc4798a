//! Per-step rewards for the trainable environment variant.

use super::{EnvError, Environment};
use crate::episode::{Action, EpisodeContext, Observation, Transition};
use std::sync::Arc;

/// Scalar reward over one transition. Must be a pure function of the
/// three values; it gets no access to episode state.
pub trait RewardFn: Send + Sync {
    fn reward(&self, observation: &Observation, action: &Action, next: &Observation) -> f64;
}

/// Default reward: pay for every document identity the step added, plus a
/// bonus for an applied patch. Failed units only matter through what the
/// observations show (a caller wanting to penalize them can read
/// `outcome.failed_units` in its own implementation).
#[derive(Debug, Clone)]
pub struct DocumentCoverageReward {
    pub per_document: f64,
    pub patch_bonus: f64,
}

impl Default for DocumentCoverageReward {
    fn default() -> Self {
        Self { per_document: 0.25, patch_bonus: 1.0 }
    }
}

impl RewardFn for DocumentCoverageReward {
    fn reward(&self, observation: &Observation, action: &Action, next: &Observation) -> f64 {
        let before = observation.document_identities();
        let added = next
            .document_identities()
            .into_iter()
            .filter(|identity| !before.contains(identity))
            .count();

        let mut reward = added as f64 * self.per_document;
        if matches!(action, Action::Patch { .. })
            && next.outcome.as_ref().and_then(|o| o.patch_applied) == Some(true)
        {
            reward += self.patch_bonus;
        }
        reward
    }
}

/// Environment variant that additionally scores every transition.
pub struct TrainableEnvironment {
    env: Environment,
    reward: Arc<dyn RewardFn>,
}

impl TrainableEnvironment {
    pub fn new(env: Environment, reward: Arc<dyn RewardFn>) -> Self {
        Self { env, reward }
    }

    pub fn reset(&mut self, ctx: &EpisodeContext) -> Observation {
        self.env.reset(ctx)
    }

    pub fn step(
        &mut self,
        action: &Action,
        observation: &Observation,
        ctx: &EpisodeContext,
    ) -> Result<(Transition, f64), EnvError> {
        let transition = self.env.step(action, observation, ctx)?;
        let reward = self.reward.reward(observation, action, &transition.observation);
        Ok((transition, reward))
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }
}
