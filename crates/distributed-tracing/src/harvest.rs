// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Harvest timer.
//!
//! A single task rolls the samplers over once per period. Sampling decisions never wait on it:
//! roll-over swaps counters atomically while decisions keep incrementing them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::reservoir::PriorityAware;
use crate::service::DistributedTraceService;

/// Spawns the harvest timer. The first roll-over happens one `period` from now.
pub fn spawn_sampler_harvest<S, T>(
    service: Arc<DistributedTraceService<S, T>>,
    period: Duration,
    shutdown_token: CancellationToken,
) -> JoinHandle<()>
where
    S: PriorityAware + Send + Sync + 'static,
    T: PriorityAware + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    service.before_harvest();
                }
                () = shutdown_token.cancelled() => {
                    debug!("Sampler harvest shutting down");
                    break;
                }
            }
        }
    })
}
