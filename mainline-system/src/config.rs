// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The system configuration file.
//!
//! A line-based `key: value` format. `#` starts a comment. Unknown keys and
//! unparsable values are fatal: a config the simulator does not fully
//! understand must not silently produce numbers.

use std::path::Path;
use std::str::FromStr;

use mainline_collectives::phase::{
    CollectiveOptimization, InterDimOrder, PerOpImpls, PlanConfig,
};
use mainline_collectives::planner::NcclFlowPlanner;
use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, Cycles, SimError};

use crate::net::LogGpParams;
use crate::scheduler::IntraDimPolicy;
use crate::sendrecv::RENDEZVOUS_CONTROL_BYTES;
use crate::stream::PriorityPolicy;

/// Parsed system configuration.
#[derive(Clone, Debug)]
pub struct SystemConfig {
    /// Default priority policy for collectives issued without one.
    pub scheduling_policy: PriorityPolicy,
    /// Added to every message a node sends.
    pub endpoint_delay: Cycles,
    /// Cost of one local combine during a reduction.
    pub local_reduction_delay: Cycles,
    /// Max initialized streams per dimension (`queue_threshold`).
    pub active_chunks_per_dimension: usize,
    /// Max initialized streams over all dimensions.
    pub max_running_streams: usize,
    /// Eager-admission gate on first-phase streams.
    pub ready_list_threshold: usize,
    /// Target chunk size for splitting collectives.
    pub preferred_chunk_bytes: Bytes,
    /// Per-operation, per-dimension algorithm selection.
    pub impls: PerOpImpls,
    /// All-reduce decomposition.
    pub optimization: CollectiveOptimization,
    /// Queue insertion policy.
    pub intra_scheduling: IntraDimPolicy,
    /// Dimension traversal rule.
    pub inter_scheduling: InterDimOrder,
    /// Initialize freshly queued streams without waiting for the next
    /// scheduling round.
    pub boost_mode: bool,
    /// Reads and writes share one memory bus.
    pub model_shared_bus: bool,
    /// Memory-bus bandwidth in bytes per cycle.
    pub membus_bytes_per_cycle: f64,
    /// LogGP network cost parameters.
    pub logp: LogGpParams,
    /// Sends at or above this size use the rendezvous handshake.
    pub rendezvous_threshold_bytes: Bytes,
    /// Concurrent-partner bound for direct exchange (0 = unbounded).
    pub direct_window: usize,
    /// NCCL-accurate mode: phases execute planned flow DAGs.
    pub nccl_flow_model: bool,
    /// Channels for the NCCL planner.
    pub nccl_channels: usize,
    /// Allow the NVLS variant in the NCCL planner.
    pub nvls_enable: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            scheduling_policy: PriorityPolicy::Lifo,
            endpoint_delay: 10,
            local_reduction_delay: 10,
            active_chunks_per_dimension: 1,
            max_running_streams: 128,
            ready_list_threshold: 128,
            preferred_chunk_bytes: 1 << 20,
            impls: PerOpImpls::default(),
            optimization: CollectiveOptimization::Baseline,
            intra_scheduling: IntraDimPolicy::Fifo,
            inter_scheduling: InterDimOrder::Baseline,
            boost_mode: false,
            model_shared_bus: false,
            membus_bytes_per_cycle: 128.0,
            logp: LogGpParams::default(),
            rendezvous_threshold_bytes: RENDEZVOUS_CONTROL_BYTES,
            direct_window: 0,
            nccl_flow_model: false,
            nccl_channels: 2,
            nvls_enable: false,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, SimError> {
    match value.parse() {
        Ok(parsed) => Ok(parsed),
        Err(_) => sim_error!("unparsable value '{value}' for key '{key}'"),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, SimError> {
    match value {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        _ => sim_error!("unparsable value '{value}' for key '{key}'"),
    }
}

impl SystemConfig {
    /// Parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SimError(format!("unable to read {}: {e}", path.display())))?;
        Self::from_str(&text)
    }

    /// Parse configuration text.
    #[expect(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, SimError> {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return sim_error!("malformed config line '{line}'");
            };
            config.set(key.trim(), value.trim())?;
        }
        Ok(config)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SimError> {
        match key {
            "scheduling-policy" => self.scheduling_policy = PriorityPolicy::parse(value)?,
            "endpoint-delay" => self.endpoint_delay = parse_value(key, value)?,
            "local-reduction-delay" => self.local_reduction_delay = parse_value(key, value)?,
            "active-chunks-per-dimension" => {
                self.active_chunks_per_dimension = parse_value(key, value)?;
            }
            "max-running-streams" => self.max_running_streams = parse_value(key, value)?,
            "ready-list-threshold" => self.ready_list_threshold = parse_value(key, value)?,
            "preferred-chunk-size" => self.preferred_chunk_bytes = parse_value(key, value)?,
            "allreduce-implementation" => self.impls.all_reduce = PerOpImpls::parse_list(value)?,
            "allgather-implementation" => self.impls.all_gather = PerOpImpls::parse_list(value)?,
            "reducescatter-implementation" => {
                self.impls.reduce_scatter = PerOpImpls::parse_list(value)?;
            }
            "alltoall-implementation" => self.impls.all_to_all = PerOpImpls::parse_list(value)?,
            "collective-optimization" => {
                self.optimization = CollectiveOptimization::parse(value)?;
            }
            "intra-dimension-scheduling" => {
                self.intra_scheduling = IntraDimPolicy::parse(value)?;
            }
            "inter-dimension-scheduling" => {
                self.inter_scheduling = InterDimOrder::parse(value)?;
            }
            "boost-mode" => self.boost_mode = parse_flag(key, value)?,
            "model-shared-bus" => self.model_shared_bus = parse_flag(key, value)?,
            "membus-bytes-per-cycle" => self.membus_bytes_per_cycle = parse_value(key, value)?,
            "L" => self.logp.l = parse_value(key, value)?,
            "o" => self.logp.o = parse_value(key, value)?,
            "g" => self.logp.g = parse_value(key, value)?,
            "G" => self.logp.big_g = parse_value(key, value)?,
            "rendezvous-threshold" => {
                self.rendezvous_threshold_bytes = parse_value(key, value)?;
            }
            "direct-collective-window" => self.direct_window = parse_value(key, value)?,
            "nccl-flow-model" => self.nccl_flow_model = parse_flag(key, value)?,
            "nccl-channels" => self.nccl_channels = parse_value(key, value)?,
            "nvls-enable" => self.nvls_enable = parse_flag(key, value)?,
            _ => return sim_error!("unknown system-config key '{key}'"),
        }
        Ok(())
    }

    /// The phase-generation view of this configuration.
    #[must_use]
    pub fn plan_config(&self) -> PlanConfig {
        PlanConfig {
            impls: self.impls.clone(),
            optimization: self.optimization,
            inter_dim: self.inter_scheduling,
            preferred_chunk_bytes: self.preferred_chunk_bytes,
            direct_window: self.direct_window,
            nccl: self
                .nccl_flow_model
                .then(|| NcclFlowPlanner::new(self.nccl_channels, self.nvls_enable)),
        }
    }
}

#[cfg(test)]
mod tests {
    use mainline_collectives::algorithms::AlgorithmKind;

    use super::*;

    #[test]
    fn parses_a_representative_config() {
        let text = "\
# a comment
scheduling-policy: FIFO
endpoint-delay: 25
local-reduction-delay: 4
active-chunks-per-dimension: 2
allreduce-implementation: ring_doubleBinaryTree_direct
collective-optimization: localBWAware
intra-dimension-scheduling: RG
inter-dimension-scheduling: roundRobin
boost-mode: 1
model-shared-bus: 0
L: 700
o: 60
g: 12
G: 32.0
";
        let config = SystemConfig::from_str(text).unwrap();
        assert_eq!(config.scheduling_policy, PriorityPolicy::Fifo);
        assert_eq!(config.endpoint_delay, 25);
        assert_eq!(config.active_chunks_per_dimension, 2);
        assert_eq!(
            config.impls.all_reduce,
            vec![
                AlgorithmKind::Ring,
                AlgorithmKind::DoubleBinaryTree,
                AlgorithmKind::Direct,
            ]
        );
        assert_eq!(config.optimization, CollectiveOptimization::LocalBwAware);
        assert_eq!(config.intra_scheduling, IntraDimPolicy::Rg);
        assert_eq!(config.inter_scheduling, InterDimOrder::RoundRobin);
        assert!(config.boost_mode);
        assert_eq!(config.logp.l, 700);
        assert_eq!(config.logp.big_g, 32.0);
    }

    #[test]
    fn unknown_key_is_fatal() {
        let err = SystemConfig::from_str("no-such-knob: 1\n").unwrap_err();
        assert!(format!("{err}").contains("no-such-knob"));
    }

    #[test]
    fn unparsable_value_is_fatal() {
        assert!(SystemConfig::from_str("endpoint-delay: soon\n").is_err());
        assert!(SystemConfig::from_str("boost-mode: maybe\n").is_err());
    }

    #[test]
    fn nccl_mode_flows_into_the_plan_config() {
        let config = SystemConfig::from_str("nccl-flow-model: 1\nnccl-channels: 4\n").unwrap();
        let plan = config.plan_config();
        assert_eq!(plan.nccl.unwrap().channels, 4);
    }
}
