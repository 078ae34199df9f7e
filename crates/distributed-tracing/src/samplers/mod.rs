// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampling strategies.
//!
//! A [`Sampler`] answers one question: should this trace be recorded? Which sampler runs
//! depends on the [`SamplingCase`], i.e. how the current unit of work relates to its caller.
//! [`SamplerFactory`] builds one sampler per case from configuration. Adaptive slots without an
//! explicit target all share the factory's adaptive instance so that they draw from a single
//! per-period budget.

pub mod adaptive;
pub mod trace_id_ratio;

use std::fmt;
use std::sync::Arc;

pub use adaptive::AdaptiveSampler;
pub use trace_id_ratio::TraceIdRatioBasedSampler;

use crate::config::sampler::{SamplerConfig, SamplerSlots};

/// The kind of sampler behind a `dyn Sampler`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerType {
    Adaptive,
    AlwaysOn,
    AlwaysOff,
    TraceIdRatioBased,
}

impl SamplerType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SamplerType::Adaptive => "adaptive",
            SamplerType::AlwaysOn => "always_on",
            SamplerType::AlwaysOff => "always_off",
            SamplerType::TraceIdRatioBased => "trace_id_ratio_based",
        }
    }
}

impl fmt::Display for SamplerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the current unit of work relates to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplingCase {
    /// No remote parent.
    Root,
    /// A remote parent exists and propagated `sampled = true`.
    RemoteParentSampled,
    /// A remote parent exists and propagated `sampled = false`.
    RemoteParentNotSampled,
}

impl SamplingCase {
    /// Picks the case for an inbound sampled flag. `None` means there is no remote parent.
    #[must_use]
    pub fn from_remote_parent(remote_parent_sampled: Option<bool>) -> Self {
        match remote_parent_sampled {
            None => SamplingCase::Root,
            Some(true) => SamplingCase::RemoteParentSampled,
            Some(false) => SamplingCase::RemoteParentNotSampled,
        }
    }
}

pub trait Sampler: Send + Sync + fmt::Debug {
    fn sampler_type(&self) -> SamplerType;

    /// Decides whether the trace is sampled. Never panics for any input.
    fn should_sample(&self, trace_id: &str) -> bool;

    /// Called once per harvest period by the harvest timer.
    fn before_harvest(&self) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlwaysOnSampler;

impl Sampler for AlwaysOnSampler {
    fn sampler_type(&self) -> SamplerType {
        SamplerType::AlwaysOn
    }

    fn should_sample(&self, _trace_id: &str) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlwaysOffSampler;

impl Sampler for AlwaysOffSampler {
    fn sampler_type(&self) -> SamplerType {
        SamplerType::AlwaysOff
    }

    fn should_sample(&self, _trace_id: &str) -> bool {
        false
    }
}

/// One sampler per [`SamplingCase`].
#[derive(Clone, Debug)]
pub struct CaseSamplers {
    pub root: Arc<dyn Sampler>,
    pub remote_parent_sampled: Arc<dyn Sampler>,
    pub remote_parent_not_sampled: Arc<dyn Sampler>,
}

impl CaseSamplers {
    #[must_use]
    pub fn for_case(&self, case: SamplingCase) -> &Arc<dyn Sampler> {
        match case {
            SamplingCase::Root => &self.root,
            SamplingCase::RemoteParentSampled => &self.remote_parent_sampled,
            SamplingCase::RemoteParentNotSampled => &self.remote_parent_not_sampled,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Sampler>> {
        [
            &self.root,
            &self.remote_parent_sampled,
            &self.remote_parent_not_sampled,
        ]
        .into_iter()
    }
}

/// Builds samplers from configuration.
#[derive(Clone, Debug)]
pub struct SamplerFactory {
    shared_adaptive: Arc<AdaptiveSampler>,
}

impl SamplerFactory {
    #[must_use]
    pub fn new(shared_adaptive: Arc<AdaptiveSampler>) -> Self {
        Self { shared_adaptive }
    }

    /// The adaptive instance handed to every adaptive slot that has no target of its own.
    #[must_use]
    pub fn shared_adaptive(&self) -> &Arc<AdaptiveSampler> {
        &self.shared_adaptive
    }

    #[must_use]
    pub fn create(&self, config: &SamplerConfig) -> Arc<dyn Sampler> {
        match config {
            SamplerConfig::Adaptive {
                sampling_target: None,
            } => Arc::clone(&self.shared_adaptive) as Arc<dyn Sampler>,
            SamplerConfig::Adaptive {
                sampling_target: Some(target),
            } => Arc::new(AdaptiveSampler::new(
                *target,
                self.shared_adaptive.period(),
            )),
            SamplerConfig::AlwaysOn => Arc::new(AlwaysOnSampler),
            SamplerConfig::AlwaysOff => Arc::new(AlwaysOffSampler),
            SamplerConfig::TraceIdRatioBased { ratio } => {
                Arc::new(TraceIdRatioBasedSampler::new(*ratio))
            }
        }
    }

    #[must_use]
    pub fn create_all(&self, slots: &SamplerSlots) -> CaseSamplers {
        CaseSamplers {
            root: self.create(&slots.root),
            remote_parent_sampled: self.create(&slots.remote_parent_sampled),
            remote_parent_not_sampled: self.create(&slots.remote_parent_not_sampled),
        }
    }
}

/// Identity of the sampler behind an `Arc`, used to roll shared instances over only once.
#[must_use]
pub fn sampler_id(sampler: &Arc<dyn Sampler>) -> *const () {
    Arc::as_ptr(sampler).cast::<()>()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn factory() -> SamplerFactory {
        SamplerFactory::new(Arc::new(AdaptiveSampler::new(
            10,
            Duration::from_secs(30),
        )))
    }

    #[test]
    fn test_always_on_and_off() {
        assert!(AlwaysOnSampler.should_sample("abc"));
        assert!(!AlwaysOffSampler.should_sample("abc"));
        assert_eq!(AlwaysOnSampler.sampler_type(), SamplerType::AlwaysOn);
        assert_eq!(AlwaysOffSampler.sampler_type().to_string(), "always_off");
    }

    #[test]
    fn test_factory_shares_adaptive_without_target() {
        let factory = factory();
        let a = factory.create(&SamplerConfig::default());
        let b = factory.create(&SamplerConfig::Adaptive {
            sampling_target: None,
        });
        assert_eq!(sampler_id(&a), sampler_id(&b));
        let shared: Arc<dyn Sampler> = Arc::clone(factory.shared_adaptive()) as Arc<dyn Sampler>;
        assert_eq!(sampler_id(&a), sampler_id(&shared));
    }

    #[test]
    fn test_factory_builds_dedicated_adaptive_with_target() {
        let factory = factory();
        let dedicated = factory.create(&SamplerConfig::Adaptive {
            sampling_target: Some(15),
        });
        let shared = factory.create(&SamplerConfig::default());
        assert_eq!(dedicated.sampler_type(), SamplerType::Adaptive);
        assert_ne!(sampler_id(&dedicated), sampler_id(&shared));
    }

    #[test]
    fn test_factory_builds_each_type() {
        let factory = factory();
        let slots = SamplerSlots {
            root: SamplerConfig::TraceIdRatioBased { ratio: 0.25 },
            remote_parent_sampled: SamplerConfig::AlwaysOn,
            remote_parent_not_sampled: SamplerConfig::AlwaysOff,
        };
        let samplers = factory.create_all(&slots);
        assert_eq!(
            samplers.for_case(SamplingCase::Root).sampler_type(),
            SamplerType::TraceIdRatioBased
        );
        assert_eq!(
            samplers
                .for_case(SamplingCase::RemoteParentSampled)
                .sampler_type(),
            SamplerType::AlwaysOn
        );
        assert_eq!(
            samplers
                .for_case(SamplingCase::RemoteParentNotSampled)
                .sampler_type(),
            SamplerType::AlwaysOff
        );
        assert_eq!(samplers.iter().count(), 3);
    }

    #[test]
    fn test_case_from_remote_parent() {
        assert_eq!(SamplingCase::from_remote_parent(None), SamplingCase::Root);
        assert_eq!(
            SamplingCase::from_remote_parent(Some(true)),
            SamplingCase::RemoteParentSampled
        );
        assert_eq!(
            SamplingCase::from_remote_parent(Some(false)),
            SamplingCase::RemoteParentNotSampled
        );
    }
}
